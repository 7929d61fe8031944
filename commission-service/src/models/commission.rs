//! Commission model: control records and their payable children.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Which half of a split commission a payable child represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[repr(i16)]
#[serde(rename_all = "lowercase")]
pub enum PaymentPart {
    First = 1,
    Second = 2,
}

impl PaymentPart {
    pub fn from_number(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::First),
            2 => Some(Self::Second),
            _ => None,
        }
    }

    pub fn number(self) -> i32 {
        self as i32
    }

    /// Customer installment this part is paid against.
    pub fn installment(self) -> Installment {
        match self {
            Self::First => Installment::First,
            Self::Second => Installment::Second,
        }
    }

    /// Months after the commission period in which this part is paid.
    pub fn payment_offset_months(self) -> u32 {
        match self {
            Self::First => 1,
            Self::Second => 2,
        }
    }
}

/// Customer installment a commission payout depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Installment {
    First,
    Second,
}

impl Installment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Second => "second",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "first" => Some(Self::First),
            "second" => Some(Self::Second),
            _ => None,
        }
    }

    /// Position in a contract's installment plan (1-based).
    pub fn number(self) -> i32 {
        match self {
            Self::First => 1,
            Self::Second => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::First => "First installment",
            Self::Second => "Second installment",
        }
    }
}

impl std::fmt::Display for Installment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment type stored on a commission row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    FirstPayment,
    SecondPayment,
    FullPayment,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstPayment => "first_payment",
            Self::SecondPayment => "second_payment",
            Self::FullPayment => "full_payment",
        }
    }

    pub fn for_part(part: Option<PaymentPart>) -> Self {
        match part {
            Some(PaymentPart::First) => Self::FirstPayment,
            Some(PaymentPart::Second) => Self::SecondPayment,
            None => Self::FullPayment,
        }
    }
}

/// Lifecycle status of a commission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    Generated,
    Approved,
    PartiallyPaid,
    FullyPaid,
}

impl CommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::Approved => "approved",
            Self::PartiallyPaid => "partially_paid",
            Self::FullyPaid => "fully_paid",
        }
    }
}

/// Payroll payment status. Stored with the values the payroll process reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
pub enum PaymentStatus {
    #[sqlx(rename = "pendiente")]
    #[serde(rename = "pendiente")]
    Pending,
    #[sqlx(rename = "pagado")]
    #[serde(rename = "pagado")]
    Paid,
    #[sqlx(rename = "cancelado")]
    #[serde(rename = "cancelado")]
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pendiente",
            Self::Paid => "pagado",
            Self::Cancelled => "cancelado",
        }
    }
}

/// Which customer installments a commission payout depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentDependency {
    None,
    FirstPaymentOnly,
    SecondPaymentOnly,
    BothPayments,
    AnyPayment,
}

impl PaymentDependency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::FirstPaymentOnly => "first_payment_only",
            Self::SecondPaymentOnly => "second_payment_only",
            Self::BothPayments => "both_payments",
            Self::AnyPayment => "any_payment",
        }
    }

    /// Whether a paid installment counts toward this dependency.
    pub fn involves(&self, installment: Installment) -> bool {
        match self {
            Self::None => false,
            Self::FirstPaymentOnly => installment == Installment::First,
            Self::SecondPaymentOnly => installment == Installment::Second,
            Self::BothPayments | Self::AnyPayment => true,
        }
    }
}

/// Aggregate client-payment verification status of a commission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    PendingVerification,
    FirstPaymentVerified,
    SecondPaymentVerified,
    PartiallyVerified,
    FullyVerified,
    VerificationFailed,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingVerification => "pending_verification",
            Self::FirstPaymentVerified => "first_payment_verified",
            Self::SecondPaymentVerified => "second_payment_verified",
            Self::PartiallyVerified => "partially_verified",
            Self::FullyVerified => "fully_verified",
            Self::VerificationFailed => "verification_failed",
        }
    }

    /// Position in the verification lattice. Higher means more verified.
    pub fn rank(&self) -> u8 {
        match self {
            Self::VerificationFailed | Self::PendingVerification => 0,
            Self::FirstPaymentVerified
            | Self::SecondPaymentVerified
            | Self::PartiallyVerified => 1,
            Self::FullyVerified => 2,
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One commission row. Rows with no parent are control records; rows with a
/// parent are payable children.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Commission {
    pub commission_id: Uuid,
    pub parent_commission_id: Option<Uuid>,
    pub employee_id: Uuid,
    pub contract_id: Uuid,
    pub payment_part: Option<PaymentPart>,
    pub payment_type: PaymentType,
    pub is_payable: bool,
    pub commission_percentage: Decimal,
    pub commission_amount: Decimal,
    pub total_commission_amount: Decimal,
    pub split_percentage: Decimal,
    pub sales_count: i32,
    pub period_month: i32,
    pub period_year: i32,
    pub commission_period: String,
    pub payment_period: Option<String>,
    pub status: CommissionStatus,
    pub payment_status: PaymentStatus,
    pub payment_date: Option<NaiveDate>,
    pub requires_client_payment_verification: bool,
    pub payment_dependency_type: PaymentDependency,
    pub payment_verification_status: VerificationStatus,
    pub is_eligible_for_payment: bool,
    pub first_payment_verified_at: Option<DateTime<Utc>>,
    pub second_payment_verified_at: Option<DateTime<Utc>>,
    pub verification_notes: Option<String>,
    pub verified_payments_count: i32,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Commission {
    pub fn is_control_record(&self) -> bool {
        self.parent_commission_id.is_none()
    }

    /// Split children carry a payment part; everything else is verified as
    /// an unsplit commission.
    pub fn is_split(&self) -> bool {
        self.payment_part.is_some()
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }

    pub fn verified_at(&self, installment: Installment) -> Option<DateTime<Utc>> {
        match installment {
            Installment::First => self.first_payment_verified_at,
            Installment::Second => self.second_payment_verified_at,
        }
    }

    pub fn set_verified_at(&mut self, installment: Installment, at: Option<DateTime<Utc>>) {
        match installment {
            Installment::First => self.first_payment_verified_at = at,
            Installment::Second => self.second_payment_verified_at = at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_installment_parse() {
        assert_eq!(Installment::parse("first"), Some(Installment::First));
        assert_eq!(Installment::parse("second"), Some(Installment::Second));
        assert_eq!(Installment::parse("third"), None);
        assert_eq!(Installment::parse(Installment::Second.as_str()), Some(Installment::Second));
    }

    #[test]
    fn test_payment_part_maps_to_installment() {
        assert_eq!(PaymentPart::First.installment(), Installment::First);
        assert_eq!(PaymentPart::from_number(2), Some(PaymentPart::Second));
        assert_eq!(PaymentPart::from_number(3), None);
    }
}
