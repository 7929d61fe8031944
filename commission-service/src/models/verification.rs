//! Client payment verification records.

use super::commission::Installment;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VerificationRecordStatus {
    Verified,
    Reversed,
}

impl VerificationRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Reversed => "reversed",
        }
    }
}

/// How an installment was confirmed as paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    /// The receivable itself carries the paid sentinel.
    ReceivableStatus,
    /// Customer payments on the receivable cover its amount.
    Automatic,
    /// An "installment paid" event was received.
    AutomaticEvent,
    Manual,
}

impl VerificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReceivableStatus => "receivable_status",
            Self::Automatic => "automatic",
            Self::AutomaticEvent => "automatic_event",
            Self::Manual => "manual",
        }
    }
}

/// Verification record, unique per (commission_id, payment_installment).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CommissionPaymentVerification {
    pub verification_id: Uuid,
    pub commission_id: Uuid,
    pub payment_installment: Installment,
    pub customer_payment_id: Option<Uuid>,
    pub ar_id: Uuid,
    pub verification_status: VerificationRecordStatus,
    pub verification_date: DateTime<Utc>,
    pub verified_amount: Decimal,
    /// `None` means the verification was automatic.
    pub verified_by: Option<String>,
    pub verification_method: VerificationMethod,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl CommissionPaymentVerification {
    pub fn is_verified(&self) -> bool {
        self.verification_status == VerificationRecordStatus::Verified
    }
}

/// Input for inserting or refreshing a verification record.
#[derive(Debug, Clone)]
pub struct NewVerification {
    pub commission_id: Uuid,
    pub installment: Installment,
    pub customer_payment_id: Option<Uuid>,
    pub ar_id: Uuid,
    pub verified_amount: Decimal,
    pub verified_by: Option<String>,
    pub method: VerificationMethod,
    pub notes: Option<String>,
}
