//! A failure after earlier writes in the same operation leaves nothing behind.

mod common;

use async_trait::async_trait;
use chrono::NaiveDate;
use commission_service::models::{
    AccountReceivable, Commission, CommissionPaymentVerification, CommissionStatus, Contract,
    CustomerPayment, Installment, NewVerification, PaymentScheduleItem, PaymentStatus,
    ScheduleNamespace, VerificationStatus,
};
use commission_service::services::{
    CommissionServices, CommissionStore, CommissionTx, EngineSettings, GenerationSettings,
    InstallmentPaid, MemoryStore,
};
use common::{date, TestEngine};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Insert,
    SavePayment,
    SaveVerification,
}

/// Store whose transactions fail the n-th call of one write operation.
struct FaultyStore {
    inner: MemoryStore,
    fault: Fault,
    fail_on_call: usize,
}

#[async_trait]
impl CommissionStore for FaultyStore {
    async fn begin(&self) -> Result<Box<dyn CommissionTx>, AppError> {
        Ok(Box::new(FaultyTx {
            inner: self.inner.begin().await?,
            fault: self.fault,
            fail_on_call: self.fail_on_call,
            calls: 0,
        }))
    }
}

struct FaultyTx {
    inner: Box<dyn CommissionTx>,
    fault: Fault,
    fail_on_call: usize,
    calls: usize,
}

impl FaultyTx {
    fn trip(&mut self, op: Fault) -> Result<(), AppError> {
        if op != self.fault {
            return Ok(());
        }
        self.calls += 1;
        if self.calls < self.fail_on_call {
            return Ok(());
        }
        Err(match op {
            Fault::Insert => AppError::Conflict(anyhow::anyhow!("duplicate key")),
            _ => AppError::DatabaseError(anyhow::anyhow!("connection reset")),
        })
    }
}

#[async_trait]
impl CommissionTx for FaultyTx {
    async fn get_commission(
        &mut self,
        commission_id: Uuid,
    ) -> Result<Option<Commission>, AppError> {
        self.inner.get_commission(commission_id).await
    }

    async fn lock_commission(
        &mut self,
        commission_id: Uuid,
    ) -> Result<Option<Commission>, AppError> {
        self.inner.lock_commission(commission_id).await
    }

    async fn find_control_record(
        &mut self,
        contract_id: Uuid,
        employee_id: Uuid,
        commission_period: &str,
    ) -> Result<Option<Commission>, AppError> {
        self.inner
            .find_control_record(contract_id, employee_id, commission_period)
            .await
    }

    async fn list_children(&mut self, parent_id: Uuid) -> Result<Vec<Commission>, AppError> {
        self.inner.list_children(parent_id).await
    }

    async fn lock_unpaid_dependent_commissions(
        &mut self,
        contract_id: Uuid,
    ) -> Result<Vec<Commission>, AppError> {
        self.inner.lock_unpaid_dependent_commissions(contract_id).await
    }

    async fn list_commissions_awaiting_verification(
        &mut self,
        limit: i64,
    ) -> Result<Vec<Uuid>, AppError> {
        self.inner.list_commissions_awaiting_verification(limit).await
    }

    async fn insert_commission(&mut self, commission: &Commission) -> Result<(), AppError> {
        self.trip(Fault::Insert)?;
        self.inner.insert_commission(commission).await
    }

    async fn save_verification_state(
        &mut self,
        commission: &Commission,
    ) -> Result<(), AppError> {
        self.trip(Fault::SaveVerification)?;
        self.inner.save_verification_state(commission).await
    }

    async fn save_payment_state(&mut self, commission: &Commission) -> Result<(), AppError> {
        self.trip(Fault::SavePayment)?;
        self.inner.save_payment_state(commission).await
    }

    async fn get_verification(
        &mut self,
        commission_id: Uuid,
        installment: Installment,
    ) -> Result<Option<CommissionPaymentVerification>, AppError> {
        self.inner.get_verification(commission_id, installment).await
    }

    async fn get_verification_by_id(
        &mut self,
        verification_id: Uuid,
    ) -> Result<Option<CommissionPaymentVerification>, AppError> {
        self.inner.get_verification_by_id(verification_id).await
    }

    async fn list_verifications(
        &mut self,
        commission_id: Uuid,
    ) -> Result<Vec<CommissionPaymentVerification>, AppError> {
        self.inner.list_verifications(commission_id).await
    }

    async fn upsert_verification(
        &mut self,
        verification: &NewVerification,
    ) -> Result<Option<CommissionPaymentVerification>, AppError> {
        self.inner.upsert_verification(verification).await
    }

    async fn save_verification(
        &mut self,
        verification: &CommissionPaymentVerification,
    ) -> Result<(), AppError> {
        self.inner.save_verification(verification).await
    }

    async fn get_contract(&mut self, contract_id: Uuid) -> Result<Option<Contract>, AppError> {
        self.inner.get_contract(contract_id).await
    }

    async fn list_contracts_signed_between(
        &mut self,
        from: NaiveDate,
        until_exclusive: NaiveDate,
    ) -> Result<Vec<Contract>, AppError> {
        self.inner
            .list_contracts_signed_between(from, until_exclusive)
            .await
    }

    async fn count_financed_sales(
        &mut self,
        advisor_id: Uuid,
        from: NaiveDate,
        until_exclusive: NaiveDate,
    ) -> Result<i64, AppError> {
        self.inner
            .count_financed_sales(advisor_id, from, until_exclusive)
            .await
    }

    async fn get_receivable(
        &mut self,
        ar_id: Uuid,
    ) -> Result<Option<AccountReceivable>, AppError> {
        self.inner.get_receivable(ar_id).await
    }

    async fn list_receivables(
        &mut self,
        contract_id: Uuid,
    ) -> Result<Vec<AccountReceivable>, AppError> {
        self.inner.list_receivables(contract_id).await
    }

    async fn find_receivable(
        &mut self,
        contract_id: Uuid,
        due_date: NaiveDate,
        original_amount: Decimal,
    ) -> Result<Option<AccountReceivable>, AppError> {
        self.inner
            .find_receivable(contract_id, due_date, original_amount)
            .await
    }

    async fn list_payments(
        &mut self,
        ar_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<Vec<CustomerPayment>, AppError> {
        self.inner.list_payments(ar_id, as_of).await
    }

    async fn get_customer_payment(
        &mut self,
        payment_id: Uuid,
    ) -> Result<Option<CustomerPayment>, AppError> {
        self.inner.get_customer_payment(payment_id).await
    }

    async fn list_schedule(
        &mut self,
        namespace: ScheduleNamespace,
        contract_id: Uuid,
    ) -> Result<Vec<PaymentScheduleItem>, AppError> {
        self.inner.list_schedule(namespace, contract_id).await
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.inner.rollback().await
    }
}

/// Services over `engine.store` whose transactions fail as configured.
fn faulty_services(
    engine: &TestEngine,
    fault: Fault,
    fail_on_call: usize,
    settings: EngineSettings,
) -> CommissionServices {
    let store = FaultyStore {
        inner: engine.store.clone(),
        fault,
        fail_on_call,
    };
    CommissionServices::new(Arc::new(store), Arc::new(engine.store.clone()), settings)
}

fn without_verification() -> EngineSettings {
    EngineSettings {
        generation: GenerationSettings {
            requires_client_payment_verification: false,
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_failed_child_insert_discards_control_record() {
    let engine = TestEngine::new();
    let contract = engine
        .contract(Uuid::new_v4(), "25000.00", 12, date(2024, 1, 15))
        .await;

    // The control record is the first insert, the first child the second.
    let services = faulty_services(&engine, Fault::Insert, 2, EngineSettings::default());
    let result = services
        .generator
        .generate_for_contract(contract.contract_id, None)
        .await;

    assert!(matches!(result, Err(AppError::Conflict(_))));
    assert!(engine.store.commissions().await.is_empty());

    let created = engine
        .services
        .generator
        .generate_for_contract(contract.contract_id, None)
        .await
        .unwrap();
    assert_eq!(created.len(), 3);
}

#[tokio::test]
async fn test_failed_save_mid_batch_leaves_nothing_paid() {
    let engine = TestEngine::with_settings(without_verification());
    let contract = engine
        .contract(Uuid::new_v4(), "25000.00", 12, date(2024, 1, 15))
        .await;
    let (control, first, second) = engine.generate(&contract).await;
    for commission in [&first, &second] {
        engine
            .services
            .verification
            .verify(commission.commission_id)
            .await
            .unwrap();
    }

    let services = faulty_services(&engine, Fault::SavePayment, 2, without_verification());
    let result = services
        .admin
        .mark_multiple_as_paid(&[first.commission_id, second.commission_id], date(2024, 3, 1))
        .await;
    assert!(matches!(result, Err(AppError::DatabaseError(_))));

    for commission in [&first, &second] {
        let stored = engine.reload(commission).await;
        assert_eq!(stored.payment_status, PaymentStatus::Pending);
        assert!(stored.payment_date.is_none());
        assert!(stored.is_eligible_for_payment);
    }
    assert_eq!(engine.reload(&control).await.status, CommissionStatus::Generated);
}

#[tokio::test]
async fn test_failed_event_write_discards_verification_records() {
    let engine = TestEngine::new();
    let contract = engine
        .contract(Uuid::new_v4(), "25000.00", 12, date(2024, 1, 15))
        .await;
    let (control, first, _) = engine.generate(&contract).await;
    let ar = engine
        .receivable(contract.contract_id, date(2024, 2, 15), "800.00", "PENDING")
        .await;
    let payment = engine.payment(ar.ar_id, "800.00", date(2024, 2, 14)).await;
    let event = InstallmentPaid {
        payment_id: payment.payment_id,
        installment_type: Installment::First,
    };

    // Fails on the second of the two affected commissions.
    let services = faulty_services(&engine, Fault::SaveVerification, 2, EngineSettings::default());
    let result = services.events.handle(&event).await;
    assert!(matches!(result, Err(AppError::DatabaseError(_))));

    assert!(engine.store.verifications().await.is_empty());
    for commission in [&control, &first] {
        let stored = engine.reload(commission).await;
        assert_eq!(
            stored.payment_verification_status,
            VerificationStatus::PendingVerification
        );
        assert_eq!(stored.verified_payments_count, 0);
    }

    // A redelivery applies cleanly.
    let outcome = engine.services.events.handle(&event).await.unwrap();
    assert_eq!(outcome.commissions_updated.len(), 2);
}
