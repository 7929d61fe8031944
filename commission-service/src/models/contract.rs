//! Read-only views of the sales and collections data the engine consumes.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Status sentinel a receivable carries once it is settled.
pub const RECEIVABLE_PAID: &str = "PAID";

/// Whether a contract is paid in installments or in cash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleType {
    Financed,
    Cash,
}

impl SaleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Financed => "financed",
            Self::Cash => "cash",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Contract {
    pub contract_id: Uuid,
    pub advisor_id: Option<Uuid>,
    pub financing_amount: Decimal,
    pub term_months: i32,
    pub sign_date: NaiveDate,
    pub status: String,
}

impl Contract {
    pub fn is_financed(&self) -> bool {
        self.financing_amount > Decimal::ZERO
    }

    pub fn sale_type(&self) -> SaleType {
        if self.is_financed() {
            SaleType::Financed
        } else {
            SaleType::Cash
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AccountReceivable {
    pub ar_id: Uuid,
    pub contract_id: Uuid,
    pub due_date: NaiveDate,
    pub original_amount: Decimal,
    pub paid_amount: Decimal,
    pub status: String,
}

impl AccountReceivable {
    pub fn is_paid(&self) -> bool {
        self.status == RECEIVABLE_PAID
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CustomerPayment {
    pub payment_id: Uuid,
    pub ar_id: Uuid,
    pub amount: Decimal,
    pub payment_date: NaiveDate,
}

/// One row of a contract's explicit installment plan.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentScheduleItem {
    pub schedule_id: Uuid,
    pub contract_id: Uuid,
    pub installment_number: i32,
    pub due_date: NaiveDate,
    pub amount: Decimal,
}

/// Installment plans are published under two collaborator namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleNamespace {
    Collections,
    Sales,
}

impl ScheduleNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collections => "collections",
            Self::Sales => "sales",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "collections" => Some(Self::Collections),
            "sales" => Some(Self::Sales),
            _ => None,
        }
    }
}
