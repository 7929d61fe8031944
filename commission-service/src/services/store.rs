//! Persistence contract for the commission engine.
//!
//! Every mutating engine operation opens one [`CommissionTx`], performs all of
//! its reads and writes through it, and either commits or rolls back. Nothing
//! written through a transaction is visible to other transactions before
//! `commit`.

use crate::models::{
    AccountReceivable, Commission, CommissionPaymentVerification, CommissionRule,
    CommissionScheme, Contract, CustomerPayment, Installment, NewVerification,
    PaymentScheduleItem, ScheduleNamespace,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

/// Factory for unit-of-work transactions.
#[async_trait]
pub trait CommissionStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn CommissionTx>, AppError>;
}

/// Reads and writes available inside one atomic transaction.
#[async_trait]
pub trait CommissionTx: Send {
    // Commissions

    async fn get_commission(&mut self, commission_id: Uuid)
        -> Result<Option<Commission>, AppError>;

    /// Same as `get_commission` but holds the row until the transaction ends.
    async fn lock_commission(
        &mut self,
        commission_id: Uuid,
    ) -> Result<Option<Commission>, AppError>;

    async fn find_control_record(
        &mut self,
        contract_id: Uuid,
        employee_id: Uuid,
        commission_period: &str,
    ) -> Result<Option<Commission>, AppError>;

    /// Children of a control record ordered by payment part, extra splits last.
    async fn list_children(&mut self, parent_id: Uuid) -> Result<Vec<Commission>, AppError>;

    /// Commissions on a contract that still depend on client payments and are
    /// not yet paid out, each held until the transaction ends.
    async fn lock_unpaid_dependent_commissions(
        &mut self,
        contract_id: Uuid,
    ) -> Result<Vec<Commission>, AppError>;

    /// Payable, unpaid commissions still awaiting verification, oldest first.
    async fn list_commissions_awaiting_verification(
        &mut self,
        limit: i64,
    ) -> Result<Vec<Uuid>, AppError>;

    /// Insert a new commission. Fails with `Conflict` when a control record for
    /// the same (contract, employee, period) or a child for the same
    /// (parent, payment_part) already exists.
    async fn insert_commission(&mut self, commission: &Commission) -> Result<(), AppError>;

    /// Persist the verification columns: verification status, eligibility,
    /// installment timestamps, notes and the verified-payment counter.
    /// Payroll columns are left as stored.
    async fn save_verification_state(&mut self, commission: &Commission)
        -> Result<(), AppError>;

    /// Persist the payroll columns: `status`, `payment_status` and
    /// `payment_date`.
    async fn save_payment_state(&mut self, commission: &Commission) -> Result<(), AppError>;

    // Verification records

    async fn get_verification(
        &mut self,
        commission_id: Uuid,
        installment: Installment,
    ) -> Result<Option<CommissionPaymentVerification>, AppError>;

    async fn get_verification_by_id(
        &mut self,
        verification_id: Uuid,
    ) -> Result<Option<CommissionPaymentVerification>, AppError>;

    async fn list_verifications(
        &mut self,
        commission_id: Uuid,
    ) -> Result<Vec<CommissionPaymentVerification>, AppError>;

    /// Insert or refresh the record keyed by (commission, installment).
    ///
    /// Returns `None` without writing when the existing record is already
    /// verified, so replays never count twice.
    async fn upsert_verification(
        &mut self,
        verification: &NewVerification,
    ) -> Result<Option<CommissionPaymentVerification>, AppError>;

    async fn save_verification(
        &mut self,
        verification: &CommissionPaymentVerification,
    ) -> Result<(), AppError>;

    // Collaborator data (read-only)

    async fn get_contract(&mut self, contract_id: Uuid) -> Result<Option<Contract>, AppError>;

    async fn list_contracts_signed_between(
        &mut self,
        from: NaiveDate,
        until_exclusive: NaiveDate,
    ) -> Result<Vec<Contract>, AppError>;

    /// Financed contracts the advisor signed in `[from, until_exclusive)`.
    async fn count_financed_sales(
        &mut self,
        advisor_id: Uuid,
        from: NaiveDate,
        until_exclusive: NaiveDate,
    ) -> Result<i64, AppError>;

    async fn get_receivable(&mut self, ar_id: Uuid)
        -> Result<Option<AccountReceivable>, AppError>;

    /// Receivables of a contract ordered by due date.
    async fn list_receivables(
        &mut self,
        contract_id: Uuid,
    ) -> Result<Vec<AccountReceivable>, AppError>;

    async fn find_receivable(
        &mut self,
        contract_id: Uuid,
        due_date: NaiveDate,
        original_amount: Decimal,
    ) -> Result<Option<AccountReceivable>, AppError>;

    /// Payments on a receivable dated on or before `as_of`, oldest first.
    async fn list_payments(
        &mut self,
        ar_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<Vec<CustomerPayment>, AppError>;

    async fn get_customer_payment(
        &mut self,
        payment_id: Uuid,
    ) -> Result<Option<CustomerPayment>, AppError>;

    /// Installment plan rows in one namespace, ordered by installment number.
    async fn list_schedule(
        &mut self,
        namespace: ScheduleNamespace,
        contract_id: Uuid,
    ) -> Result<Vec<PaymentScheduleItem>, AppError>;

    // Lifecycle

    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}

/// Rule-engine configuration, read outside the mutating transaction.
#[async_trait]
pub trait SchemeSource: Send + Sync {
    async fn list_schemes(&self) -> Result<Vec<CommissionScheme>, AppError>;

    async fn list_rules(&self, scheme_id: Uuid) -> Result<Vec<CommissionRule>, AppError>;
}
