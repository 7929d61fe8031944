//! Client payment verification tests.

mod common;

use commission_service::models::{
    Contract, Installment, ScheduleNamespace, VerificationMethod, VerificationStatus,
    RECEIVABLE_PAID,
};
use commission_service::services::{
    CommissionStore, EngineSettings, GenerationSettings, PaymentScheduleAdapter,
};
use common::{date, dec, TestEngine};
use service_core::error::AppError;
use uuid::Uuid;

const PENDING: &str = "PENDING";

async fn split_contract(engine: &TestEngine) -> Contract {
    engine
        .contract(Uuid::new_v4(), "25000.00", 12, date(2024, 1, 15))
        .await
}

#[tokio::test]
async fn test_verification_not_required_is_immediately_eligible() {
    let engine = TestEngine::with_settings(EngineSettings {
        generation: GenerationSettings {
            requires_client_payment_verification: false,
        },
        ..Default::default()
    });
    let contract = split_contract(&engine).await;
    let (_, first, _) = engine.generate(&contract).await;

    let outcome = engine
        .services
        .verification
        .verify(first.commission_id)
        .await
        .unwrap();

    assert!(outcome.first_payment_ok && outcome.second_payment_ok);
    assert_eq!(outcome.status, VerificationStatus::FullyVerified);
    assert!(outcome.eligible);

    let stored = engine.reload(&first).await;
    assert_eq!(stored.payment_verification_status, VerificationStatus::FullyVerified);
    assert!(stored.is_eligible_for_payment);
    assert_eq!(
        stored.verification_notes.as_deref(),
        Some("Client payment verification not required")
    );
    assert!(engine.store.verifications().await.is_empty());
}

#[tokio::test]
async fn test_first_split_verified_by_customer_payments() {
    let engine = TestEngine::new();
    let contract = split_contract(&engine).await;
    let (_, first, second) = engine.generate(&contract).await;

    let ar1 = engine
        .receivable(contract.contract_id, date(2024, 2, 15), "1000.00", PENDING)
        .await;
    engine
        .receivable(contract.contract_id, date(2024, 3, 15), "1000.00", PENDING)
        .await;
    engine.payment(ar1.ar_id, "600.00", date(2024, 2, 10)).await;
    let last = engine.payment(ar1.ar_id, "400.00", date(2024, 2, 14)).await;

    let outcome = engine
        .services
        .verification
        .verify_as_of(first.commission_id, date(2024, 12, 31))
        .await
        .unwrap();

    assert!(outcome.first_payment_ok);
    assert!(!outcome.insufficient);
    assert_eq!(outcome.status, VerificationStatus::FullyVerified);
    assert!(outcome.eligible);
    assert_eq!(outcome.message, "First installment: verified");

    let stored = engine.reload(&first).await;
    assert!(stored.first_payment_verified_at.is_some());
    assert!(stored.is_eligible_for_payment);
    assert_eq!(stored.verified_payments_count, 1);

    let records = engine.store.verifications().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payment_installment, Installment::First);
    assert_eq!(records[0].verification_method, VerificationMethod::Automatic);
    assert_eq!(records[0].verified_amount, dec("1000.00"));
    assert_eq!(records[0].customer_payment_id, Some(last.payment_id));

    // Re-verifying finds the existing record and counts nothing new.
    engine
        .services
        .verification
        .verify_as_of(first.commission_id, date(2024, 12, 31))
        .await
        .unwrap();
    assert_eq!(engine.reload(&first).await.verified_payments_count, 1);

    // The second split waits on the second receivable, which is unpaid.
    let outcome = engine
        .services
        .verification
        .verify_as_of(second.commission_id, date(2024, 12, 31))
        .await
        .unwrap();
    assert!(!outcome.second_payment_ok);
    assert_eq!(outcome.status, VerificationStatus::PendingVerification);
    assert!(!outcome.eligible);
    assert_eq!(outcome.message, "Second installment: pending");
}

#[tokio::test]
async fn test_payment_tolerance_is_one_cent() {
    let engine = TestEngine::new();

    let covered = split_contract(&engine).await;
    let (_, covered_first, _) = engine.generate(&covered).await;
    let ar = engine
        .receivable(covered.contract_id, date(2024, 2, 15), "1000.00", PENDING)
        .await;
    engine.payment(ar.ar_id, "999.99", date(2024, 2, 15)).await;

    let short = split_contract(&engine).await;
    let (_, short_first, _) = engine.generate(&short).await;
    let ar = engine
        .receivable(short.contract_id, date(2024, 2, 15), "1000.00", PENDING)
        .await;
    engine.payment(ar.ar_id, "999.98", date(2024, 2, 15)).await;

    let as_of = date(2024, 12, 31);
    let ok = engine
        .services
        .verification
        .verify_as_of(covered_first.commission_id, as_of)
        .await
        .unwrap();
    let not_ok = engine
        .services
        .verification
        .verify_as_of(short_first.commission_id, as_of)
        .await
        .unwrap();

    assert!(ok.first_payment_ok);
    assert!(!not_ok.first_payment_ok);
    assert_eq!(not_ok.status, VerificationStatus::PendingVerification);
}

#[tokio::test]
async fn test_payments_after_as_of_date_are_ignored() {
    let engine = TestEngine::new();
    let contract = split_contract(&engine).await;
    let (_, first, _) = engine.generate(&contract).await;
    let ar = engine
        .receivable(contract.contract_id, date(2024, 2, 15), "500.00", PENDING)
        .await;
    engine.payment(ar.ar_id, "500.00", date(2024, 5, 1)).await;

    let before = engine
        .services
        .verification
        .verify_as_of(first.commission_id, date(2024, 4, 30))
        .await
        .unwrap();
    assert!(!before.first_payment_ok);

    let after = engine
        .services
        .verification
        .verify_as_of(first.commission_id, date(2024, 5, 1))
        .await
        .unwrap();
    assert!(after.first_payment_ok);
}

#[tokio::test]
async fn test_paid_receivable_verifies_without_payments() {
    let engine = TestEngine::new();
    let contract = split_contract(&engine).await;
    let (_, first, _) = engine.generate(&contract).await;
    engine
        .receivable(contract.contract_id, date(2024, 2, 15), "750.00", RECEIVABLE_PAID)
        .await;

    let outcome = engine
        .services
        .verification
        .verify(first.commission_id)
        .await
        .unwrap();

    assert_eq!(outcome.status, VerificationStatus::FullyVerified);
    let records = engine.store.verifications().await;
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].verification_method,
        VerificationMethod::ReceivableStatus
    );
    assert_eq!(records[0].verified_amount, dec("750.00"));
    assert_eq!(records[0].customer_payment_id, None);
}

#[tokio::test]
async fn test_verified_status_does_not_regress_on_recheck() {
    let engine = TestEngine::new();
    let contract = split_contract(&engine).await;
    let (_, first, _) = engine.generate(&contract).await;
    let ar = engine
        .receivable(contract.contract_id, date(2024, 2, 15), "750.00", RECEIVABLE_PAID)
        .await;

    engine
        .services
        .verification
        .verify(first.commission_id)
        .await
        .unwrap();
    let verified_at = engine.reload(&first).await.first_payment_verified_at;

    engine.store.set_receivable_status(ar.ar_id, PENDING).await;
    let outcome = engine
        .services
        .verification
        .verify(first.commission_id)
        .await
        .unwrap();

    assert_eq!(outcome.status, VerificationStatus::FullyVerified);
    assert!(outcome.eligible);
    assert_eq!(engine.reload(&first).await.first_payment_verified_at, verified_at);
}

#[tokio::test]
async fn test_unsplit_commission_needs_two_receivables() {
    let engine = TestEngine::new();
    let contract = split_contract(&engine).await;
    let (control, _, _) = engine.generate(&contract).await;
    engine
        .receivable(contract.contract_id, date(2024, 2, 15), "750.00", RECEIVABLE_PAID)
        .await;

    let outcome = engine
        .services
        .verification
        .verify(control.commission_id)
        .await
        .unwrap();

    assert!(outcome.insufficient);
    assert!(!outcome.first_payment_ok && !outcome.second_payment_ok);
    assert_eq!(outcome.status, VerificationStatus::PendingVerification);

    let stored = engine.reload(&control).await;
    assert_eq!(stored.payment_verification_status, VerificationStatus::PendingVerification);
    assert!(stored.first_payment_verified_at.is_none());
    assert!(stored.verification_notes.is_none());
    assert!(engine.store.verifications().await.is_empty());
}

#[tokio::test]
async fn test_unsplit_commission_partially_then_fully_verified() {
    let engine = TestEngine::new();
    let contract = split_contract(&engine).await;
    let (control, _, _) = engine.generate(&contract).await;
    engine
        .receivable(contract.contract_id, date(2024, 2, 15), "750.00", RECEIVABLE_PAID)
        .await;
    let ar2 = engine
        .receivable(contract.contract_id, date(2024, 3, 15), "750.00", PENDING)
        .await;

    let outcome = engine
        .services
        .verification
        .verify(control.commission_id)
        .await
        .unwrap();
    assert_eq!(outcome.status, VerificationStatus::PartiallyVerified);
    assert!(!outcome.eligible);
    assert_eq!(
        outcome.message,
        "First installment: verified; Second installment: pending"
    );

    engine.store.set_receivable_status(ar2.ar_id, RECEIVABLE_PAID).await;
    let outcome = engine
        .services
        .verification
        .verify(control.commission_id)
        .await
        .unwrap();
    assert_eq!(outcome.status, VerificationStatus::FullyVerified);
    assert!(outcome.eligible);
}

#[tokio::test]
async fn test_second_split_with_single_receivable_is_insufficient() {
    let engine = TestEngine::new();
    let contract = split_contract(&engine).await;
    let (_, _, second) = engine.generate(&contract).await;
    engine
        .receivable(contract.contract_id, date(2024, 2, 15), "750.00", RECEIVABLE_PAID)
        .await;

    let outcome = engine
        .services
        .verification
        .verify(second.commission_id)
        .await
        .unwrap();

    assert!(outcome.insufficient);
    assert_eq!(
        engine.reload(&second).await.payment_verification_status,
        VerificationStatus::PendingVerification
    );
}

#[tokio::test]
async fn test_scheduled_contract_matches_receivable_by_due_date_and_amount() {
    let engine = TestEngine::new();
    let contract = split_contract(&engine).await;
    let (_, _, second) = engine.generate(&contract).await;

    // Receivable order differs from the schedule; the schedule decides.
    engine
        .receivable(contract.contract_id, date(2024, 2, 1), "300.00", PENDING)
        .await;
    engine
        .receivable(contract.contract_id, date(2024, 2, 15), "800.00", PENDING)
        .await;
    engine
        .receivable(contract.contract_id, date(2024, 3, 15), "800.00", RECEIVABLE_PAID)
        .await;
    engine
        .schedule_item(ScheduleNamespace::Sales, contract.contract_id, 1, date(2024, 2, 15), "800.00")
        .await;
    engine
        .schedule_item(ScheduleNamespace::Sales, contract.contract_id, 2, date(2024, 3, 15), "800.00")
        .await;

    let outcome = engine
        .services
        .verification
        .verify(second.commission_id)
        .await
        .unwrap();

    assert!(outcome.second_payment_ok);
    assert_eq!(outcome.status, VerificationStatus::FullyVerified);
    assert_eq!(outcome.details.len(), 1);
    assert_eq!(outcome.details[0].installment, Installment::Second);
}

#[tokio::test]
async fn test_schedule_without_required_installment_is_insufficient() {
    let engine = TestEngine::new();
    let contract = split_contract(&engine).await;
    let (_, _, second) = engine.generate(&contract).await;
    engine
        .receivable(contract.contract_id, date(2024, 2, 15), "800.00", RECEIVABLE_PAID)
        .await;
    engine
        .receivable(contract.contract_id, date(2024, 3, 15), "800.00", RECEIVABLE_PAID)
        .await;
    engine
        .schedule_item(ScheduleNamespace::Collections, contract.contract_id, 1, date(2024, 2, 15), "800.00")
        .await;

    let outcome = engine
        .services
        .verification
        .verify(second.commission_id)
        .await
        .unwrap();

    assert!(outcome.insufficient);
    assert!(engine.store.verifications().await.is_empty());
}

#[tokio::test]
async fn test_schedule_row_without_receivable_is_not_found() {
    let engine = TestEngine::new();
    let contract = split_contract(&engine).await;
    let (_, first, _) = engine.generate(&contract).await;
    engine
        .schedule_item(ScheduleNamespace::Sales, contract.contract_id, 1, date(2024, 2, 15), "800.00")
        .await;

    let result = engine
        .services
        .verification
        .verify(first.commission_id)
        .await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert_eq!(
        engine.reload(&first).await.payment_verification_status,
        VerificationStatus::PendingVerification
    );
}

#[tokio::test]
async fn test_missing_commission_or_contract_is_not_found() {
    let engine = TestEngine::new();

    let result = engine.services.verification.verify(Uuid::new_v4()).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));

    let orphan = Contract {
        contract_id: Uuid::new_v4(),
        advisor_id: Some(Uuid::new_v4()),
        financing_amount: dec("1000.00"),
        term_months: 12,
        sign_date: date(2024, 1, 1),
        status: "active".to_string(),
    };
    let control = engine.bare_control(&orphan, "20.00").await;
    let result = engine
        .services
        .verification
        .verify(control.commission_id)
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_schedule_namespaces_consulted_in_order() {
    let engine = TestEngine::new();
    let contract = split_contract(&engine).await;
    engine
        .schedule_item(ScheduleNamespace::Sales, contract.contract_id, 1, date(2024, 2, 1), "100.00")
        .await;
    engine
        .schedule_item(ScheduleNamespace::Collections, contract.contract_id, 1, date(2024, 2, 1), "200.00")
        .await;

    let mut tx = engine.store.begin().await.unwrap();

    let default_order = PaymentScheduleAdapter::default();
    let items = default_order
        .get_schedule(tx.as_mut(), contract.contract_id)
        .await
        .unwrap();
    assert_eq!(items[0].amount, dec("200.00"));

    let sales_first =
        PaymentScheduleAdapter::new(vec![ScheduleNamespace::Sales, ScheduleNamespace::Collections]);
    let items = sales_first
        .get_schedule(tx.as_mut(), contract.contract_id)
        .await
        .unwrap();
    assert_eq!(items[0].amount, dec("100.00"));

    assert!(!default_order
        .has_payment_schedule(tx.as_mut(), Uuid::new_v4())
        .await
        .unwrap());

    tx.rollback().await.unwrap();
}
