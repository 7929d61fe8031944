//! In-process commission store.
//!
//! A transaction takes the store lock for its whole lifetime and works on a
//! private copy of the state, so transactions are serialized and a rolled back
//! (or dropped) transaction leaves no trace. Used by the test suites and by
//! embedders that do not run PostgreSQL.

use crate::models::{
    AccountReceivable, Commission, CommissionPaymentVerification, CommissionRule,
    CommissionScheme, Contract, CustomerPayment, Installment, NewVerification,
    PaymentDependency, PaymentScheduleItem, PaymentStatus, ScheduleNamespace, VerificationRecordStatus,
    VerificationStatus,
};
use crate::services::store::{CommissionStore, CommissionTx, SchemeSource};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    commissions: HashMap<Uuid, Commission>,
    verifications: HashMap<Uuid, CommissionPaymentVerification>,
    contracts: HashMap<Uuid, Contract>,
    receivables: HashMap<Uuid, AccountReceivable>,
    payments: HashMap<Uuid, CustomerPayment>,
    schedules: HashMap<ScheduleNamespace, Vec<PaymentScheduleItem>>,
}

#[derive(Debug, Default)]
struct SchemeState {
    schemes: Vec<CommissionScheme>,
    rules: Vec<CommissionRule>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    schemes: Arc<RwLock<SchemeState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_contract(&self, contract: Contract) {
        let mut state = self.state.lock().await;
        state.contracts.insert(contract.contract_id, contract);
    }

    pub async fn add_receivable(&self, receivable: AccountReceivable) {
        let mut state = self.state.lock().await;
        state.receivables.insert(receivable.ar_id, receivable);
    }

    pub async fn set_receivable_status(&self, ar_id: Uuid, status: &str) {
        let mut state = self.state.lock().await;
        if let Some(receivable) = state.receivables.get_mut(&ar_id) {
            receivable.status = status.to_string();
        }
    }

    pub async fn add_payment(&self, payment: CustomerPayment) {
        let mut state = self.state.lock().await;
        state.payments.insert(payment.payment_id, payment);
    }

    pub async fn add_schedule_item(&self, namespace: ScheduleNamespace, item: PaymentScheduleItem) {
        let mut state = self.state.lock().await;
        state.schedules.entry(namespace).or_default().push(item);
    }

    pub async fn add_scheme(&self, scheme: CommissionScheme) {
        self.schemes.write().await.schemes.push(scheme);
    }

    pub async fn add_rule(&self, rule: CommissionRule) {
        self.schemes.write().await.rules.push(rule);
    }

    /// Seed a commission directly, bypassing generation.
    pub async fn add_commission(&self, commission: Commission) {
        let mut state = self.state.lock().await;
        state.commissions.insert(commission.commission_id, commission);
    }

    /// Committed commissions ordered by creation.
    pub async fn commissions(&self) -> Vec<Commission> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state.commissions.values().cloned().collect();
        rows.sort_by_key(|c| (c.created_utc, c.commission_id));
        rows
    }

    pub async fn commission(&self, commission_id: Uuid) -> Option<Commission> {
        self.state.lock().await.commissions.get(&commission_id).cloned()
    }

    /// Committed verification records ordered by commission and installment.
    pub async fn verifications(&self) -> Vec<CommissionPaymentVerification> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state.verifications.values().cloned().collect();
        rows.sort_by_key(|v| (v.commission_id, v.payment_installment));
        rows
    }
}

#[async_trait]
impl CommissionStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn CommissionTx>, AppError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }
}

#[async_trait]
impl SchemeSource for MemoryStore {
    async fn list_schemes(&self) -> Result<Vec<CommissionScheme>, AppError> {
        Ok(self.schemes.read().await.schemes.clone())
    }

    async fn list_rules(&self, scheme_id: Uuid) -> Result<Vec<CommissionRule>, AppError> {
        Ok(self
            .schemes
            .read()
            .await
            .rules
            .iter()
            .filter(|r| r.scheme_id == scheme_id)
            .cloned()
            .collect())
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

impl MemoryTx {
    fn stored_mut(&mut self, commission_id: Uuid) -> Result<&mut Commission, AppError> {
        self.working
            .commissions
            .get_mut(&commission_id)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Commission {} not found", commission_id))
            })
    }

    fn children_of(&self, parent_id: Uuid) -> Vec<Commission> {
        let mut children: Vec<_> = self
            .working
            .commissions
            .values()
            .filter(|c| c.parent_commission_id == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by_key(|c| {
            (
                c.payment_part.map(|p| p.number()).unwrap_or(i32::MAX),
                c.created_utc,
                c.commission_id,
            )
        });
        children
    }
}

#[async_trait]
impl CommissionTx for MemoryTx {
    async fn get_commission(
        &mut self,
        commission_id: Uuid,
    ) -> Result<Option<Commission>, AppError> {
        Ok(self.working.commissions.get(&commission_id).cloned())
    }

    async fn lock_commission(
        &mut self,
        commission_id: Uuid,
    ) -> Result<Option<Commission>, AppError> {
        // The whole store is already held by this transaction.
        self.get_commission(commission_id).await
    }

    async fn find_control_record(
        &mut self,
        contract_id: Uuid,
        employee_id: Uuid,
        commission_period: &str,
    ) -> Result<Option<Commission>, AppError> {
        Ok(self
            .working
            .commissions
            .values()
            .find(|c| {
                c.parent_commission_id.is_none()
                    && c.contract_id == contract_id
                    && c.employee_id == employee_id
                    && c.commission_period == commission_period
            })
            .cloned())
    }

    async fn list_children(&mut self, parent_id: Uuid) -> Result<Vec<Commission>, AppError> {
        Ok(self.children_of(parent_id))
    }

    async fn lock_unpaid_dependent_commissions(
        &mut self,
        contract_id: Uuid,
    ) -> Result<Vec<Commission>, AppError> {
        let mut rows: Vec<_> = self
            .working
            .commissions
            .values()
            .filter(|c| {
                c.contract_id == contract_id
                    && c.payment_dependency_type != PaymentDependency::None
                    && c.payment_status != PaymentStatus::Paid
            })
            .cloned()
            .collect();
        rows.sort_by_key(|c| (c.created_utc, c.commission_id));
        Ok(rows)
    }

    async fn list_commissions_awaiting_verification(
        &mut self,
        limit: i64,
    ) -> Result<Vec<Uuid>, AppError> {
        let mut rows: Vec<_> = self
            .working
            .commissions
            .values()
            .filter(|c| {
                c.is_payable
                    && c.payment_status == PaymentStatus::Pending
                    && c.requires_client_payment_verification
                    && c.payment_verification_status != VerificationStatus::FullyVerified
            })
            .collect();
        rows.sort_by_key(|c| (c.created_utc, c.commission_id));
        Ok(rows
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|c| c.commission_id)
            .collect())
    }

    async fn insert_commission(&mut self, commission: &Commission) -> Result<(), AppError> {
        let duplicate = self.working.commissions.values().any(|existing| {
            match commission.parent_commission_id {
                None => {
                    existing.parent_commission_id.is_none()
                        && existing.contract_id == commission.contract_id
                        && existing.employee_id == commission.employee_id
                        && existing.commission_period == commission.commission_period
                }
                Some(parent) => {
                    commission.payment_part.is_some()
                        && existing.parent_commission_id == Some(parent)
                        && existing.payment_part == commission.payment_part
                }
            }
        });
        if duplicate || self.working.commissions.contains_key(&commission.commission_id) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Commission already exists for contract {} period {}",
                commission.contract_id,
                commission.commission_period
            )));
        }
        self.working
            .commissions
            .insert(commission.commission_id, commission.clone());
        Ok(())
    }

    async fn save_verification_state(
        &mut self,
        commission: &Commission,
    ) -> Result<(), AppError> {
        let slot = self.stored_mut(commission.commission_id)?;
        slot.payment_verification_status = commission.payment_verification_status;
        slot.is_eligible_for_payment = commission.is_eligible_for_payment;
        slot.first_payment_verified_at = commission.first_payment_verified_at;
        slot.second_payment_verified_at = commission.second_payment_verified_at;
        slot.verification_notes = commission.verification_notes.clone();
        slot.verified_payments_count = commission.verified_payments_count;
        slot.updated_utc = Utc::now();
        Ok(())
    }

    async fn save_payment_state(&mut self, commission: &Commission) -> Result<(), AppError> {
        let slot = self.stored_mut(commission.commission_id)?;
        slot.status = commission.status;
        slot.payment_status = commission.payment_status;
        slot.payment_date = commission.payment_date;
        slot.updated_utc = Utc::now();
        Ok(())
    }

    async fn get_verification(
        &mut self,
        commission_id: Uuid,
        installment: Installment,
    ) -> Result<Option<CommissionPaymentVerification>, AppError> {
        Ok(self
            .working
            .verifications
            .values()
            .find(|v| v.commission_id == commission_id && v.payment_installment == installment)
            .cloned())
    }

    async fn get_verification_by_id(
        &mut self,
        verification_id: Uuid,
    ) -> Result<Option<CommissionPaymentVerification>, AppError> {
        Ok(self.working.verifications.get(&verification_id).cloned())
    }

    async fn list_verifications(
        &mut self,
        commission_id: Uuid,
    ) -> Result<Vec<CommissionPaymentVerification>, AppError> {
        let mut rows: Vec<_> = self
            .working
            .verifications
            .values()
            .filter(|v| v.commission_id == commission_id)
            .cloned()
            .collect();
        rows.sort_by_key(|v| v.payment_installment);
        Ok(rows)
    }

    async fn upsert_verification(
        &mut self,
        verification: &NewVerification,
    ) -> Result<Option<CommissionPaymentVerification>, AppError> {
        let now = Utc::now();
        let existing_id = self
            .working
            .verifications
            .values()
            .find(|v| {
                v.commission_id == verification.commission_id
                    && v.payment_installment == verification.installment
            })
            .map(|v| v.verification_id);

        if let Some(record) = existing_id.and_then(|id| self.working.verifications.get_mut(&id)) {
            if record.is_verified() {
                return Ok(None);
            }
            record.customer_payment_id = verification.customer_payment_id;
            record.ar_id = verification.ar_id;
            record.verification_status = VerificationRecordStatus::Verified;
            record.verification_date = now;
            record.verified_amount = verification.verified_amount;
            record.verified_by = verification.verified_by.clone();
            record.verification_method = verification.method;
            record.notes = verification.notes.clone();
            record.updated_utc = now;
            return Ok(Some(record.clone()));
        }

        let record = CommissionPaymentVerification {
            verification_id: Uuid::new_v4(),
            commission_id: verification.commission_id,
            payment_installment: verification.installment,
            customer_payment_id: verification.customer_payment_id,
            ar_id: verification.ar_id,
            verification_status: VerificationRecordStatus::Verified,
            verification_date: now,
            verified_amount: verification.verified_amount,
            verified_by: verification.verified_by.clone(),
            verification_method: verification.method,
            notes: verification.notes.clone(),
            created_utc: now,
            updated_utc: now,
        };
        self.working
            .verifications
            .insert(record.verification_id, record.clone());
        Ok(Some(record))
    }

    async fn save_verification(
        &mut self,
        verification: &CommissionPaymentVerification,
    ) -> Result<(), AppError> {
        let slot = self
            .working
            .verifications
            .get_mut(&verification.verification_id)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Verification {} not found",
                    verification.verification_id
                ))
            })?;
        let mut updated = verification.clone();
        updated.updated_utc = Utc::now();
        *slot = updated;
        Ok(())
    }

    async fn get_contract(&mut self, contract_id: Uuid) -> Result<Option<Contract>, AppError> {
        Ok(self.working.contracts.get(&contract_id).cloned())
    }

    async fn list_contracts_signed_between(
        &mut self,
        from: NaiveDate,
        until_exclusive: NaiveDate,
    ) -> Result<Vec<Contract>, AppError> {
        let mut rows: Vec<_> = self
            .working
            .contracts
            .values()
            .filter(|c| c.sign_date >= from && c.sign_date < until_exclusive)
            .cloned()
            .collect();
        rows.sort_by_key(|c| (c.sign_date, c.contract_id));
        Ok(rows)
    }

    async fn count_financed_sales(
        &mut self,
        advisor_id: Uuid,
        from: NaiveDate,
        until_exclusive: NaiveDate,
    ) -> Result<i64, AppError> {
        Ok(self
            .working
            .contracts
            .values()
            .filter(|c| {
                c.advisor_id == Some(advisor_id)
                    && c.is_financed()
                    && !c.status.eq_ignore_ascii_case("cancelled")
                    && c.sign_date >= from
                    && c.sign_date < until_exclusive
            })
            .count() as i64)
    }

    async fn get_receivable(
        &mut self,
        ar_id: Uuid,
    ) -> Result<Option<AccountReceivable>, AppError> {
        Ok(self.working.receivables.get(&ar_id).cloned())
    }

    async fn list_receivables(
        &mut self,
        contract_id: Uuid,
    ) -> Result<Vec<AccountReceivable>, AppError> {
        let mut rows: Vec<_> = self
            .working
            .receivables
            .values()
            .filter(|r| r.contract_id == contract_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.due_date, r.ar_id));
        Ok(rows)
    }

    async fn find_receivable(
        &mut self,
        contract_id: Uuid,
        due_date: NaiveDate,
        original_amount: Decimal,
    ) -> Result<Option<AccountReceivable>, AppError> {
        let mut rows: Vec<_> = self
            .working
            .receivables
            .values()
            .filter(|r| {
                r.contract_id == contract_id
                    && r.due_date == due_date
                    && r.original_amount == original_amount
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.ar_id);
        Ok(rows.into_iter().next())
    }

    async fn list_payments(
        &mut self,
        ar_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<Vec<CustomerPayment>, AppError> {
        let mut rows: Vec<_> = self
            .working
            .payments
            .values()
            .filter(|p| p.ar_id == ar_id && p.payment_date <= as_of)
            .cloned()
            .collect();
        rows.sort_by_key(|p| (p.payment_date, p.payment_id));
        Ok(rows)
    }

    async fn get_customer_payment(
        &mut self,
        payment_id: Uuid,
    ) -> Result<Option<CustomerPayment>, AppError> {
        Ok(self.working.payments.get(&payment_id).cloned())
    }

    async fn list_schedule(
        &mut self,
        namespace: ScheduleNamespace,
        contract_id: Uuid,
    ) -> Result<Vec<PaymentScheduleItem>, AppError> {
        let mut rows: Vec<_> = self
            .working
            .schedules
            .get(&namespace)
            .map(|items| {
                items
                    .iter()
                    .filter(|i| i.contract_id == contract_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by_key(|i| i.installment_number);
        Ok(rows)
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }
}
