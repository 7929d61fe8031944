//! Domain models for commission-service.

pub mod commission;
pub mod contract;
pub mod period;
pub mod scheme;
pub mod verification;

pub use commission::{
    Commission, CommissionStatus, Installment, PaymentDependency, PaymentPart, PaymentStatus,
    PaymentType, VerificationStatus,
};
pub use contract::{
    AccountReceivable, Contract, CustomerPayment, PaymentScheduleItem, SaleType,
    ScheduleNamespace, RECEIVABLE_PAID,
};
pub use period::CommissionPeriod;
pub use scheme::{CommissionRule, CommissionScheme, RuleSaleType, TermGroup};
pub use verification::{
    CommissionPaymentVerification, NewVerification, VerificationMethod, VerificationRecordStatus,
};
