//! Installment-paid event handling tests.

mod common;

use commission_service::models::{Installment, VerificationMethod, VerificationStatus};
use commission_service::services::{
    does_payment_affect_commission, event_channel, EventSettings, InstallmentPaid,
};
use common::{date, TestEngine};
use service_core::error::AppError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[tokio::test]
async fn test_first_installment_event_verifies_dependent_commissions() {
    let engine = TestEngine::new();
    let contract = engine
        .contract(Uuid::new_v4(), "25000.00", 12, date(2024, 1, 15))
        .await;
    let (control, first, second) = engine.generate(&contract).await;
    let ar = engine
        .receivable(contract.contract_id, date(2024, 2, 15), "800.00", "PENDING")
        .await;
    let payment = engine.payment(ar.ar_id, "800.00", date(2024, 2, 14)).await;

    let event = InstallmentPaid {
        payment_id: payment.payment_id,
        installment_type: Installment::First,
    };
    let outcome = engine.services.events.handle(&event).await.unwrap();

    assert_eq!(outcome.contract_id, Some(contract.contract_id));
    assert_eq!(outcome.commissions_updated.len(), 2);
    assert!(outcome.commissions_updated.contains(&control.commission_id));
    assert!(outcome.commissions_updated.contains(&first.commission_id));
    assert!(outcome.already_verified.is_empty());

    let first = engine.reload(&first).await;
    assert_eq!(first.payment_verification_status, VerificationStatus::FullyVerified);
    assert!(first.is_eligible_for_payment);
    assert_eq!(first.verified_payments_count, 1);
    assert!(first.first_payment_verified_at.is_some());

    let control = engine.reload(&control).await;
    assert_eq!(control.payment_verification_status, VerificationStatus::PartiallyVerified);
    assert!(!control.is_eligible_for_payment);

    let second = engine.reload(&second).await;
    assert_eq!(second.payment_verification_status, VerificationStatus::PendingVerification);
    assert_eq!(second.verified_payments_count, 0);

    let records = engine.store.verifications().await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| {
        r.verification_method == VerificationMethod::AutomaticEvent
            && r.customer_payment_id == Some(payment.payment_id)
            && r.payment_installment == Installment::First
    }));
}

#[tokio::test]
async fn test_replayed_event_is_a_no_op() {
    let engine = TestEngine::new();
    let contract = engine
        .contract(Uuid::new_v4(), "25000.00", 12, date(2024, 1, 15))
        .await;
    let (_, first, _) = engine.generate(&contract).await;
    let ar = engine
        .receivable(contract.contract_id, date(2024, 2, 15), "800.00", "PENDING")
        .await;
    let payment = engine.payment(ar.ar_id, "800.00", date(2024, 2, 14)).await;
    let event = InstallmentPaid {
        payment_id: payment.payment_id,
        installment_type: Installment::First,
    };

    engine.services.events.handle(&event).await.unwrap();
    let replay = engine.services.events.handle(&event).await.unwrap();

    assert!(replay.commissions_updated.is_empty());
    assert_eq!(replay.already_verified.len(), 2);
    assert_eq!(engine.store.verifications().await.len(), 2);
    assert_eq!(engine.reload(&first).await.verified_payments_count, 1);
}

#[tokio::test]
async fn test_replay_after_reversal_counts_once() {
    let engine = TestEngine::new();
    let contract = engine
        .contract(Uuid::new_v4(), "25000.00", 12, date(2024, 1, 15))
        .await;
    let (_, first, _) = engine.generate(&contract).await;
    let ar = engine
        .receivable(contract.contract_id, date(2024, 2, 15), "800.00", "PENDING")
        .await;
    let payment = engine.payment(ar.ar_id, "800.00", date(2024, 2, 14)).await;
    let event = InstallmentPaid {
        payment_id: payment.payment_id,
        installment_type: Installment::First,
    };

    engine.services.events.handle(&event).await.unwrap();
    let record = engine
        .store
        .verifications()
        .await
        .into_iter()
        .find(|v| v.commission_id == first.commission_id)
        .unwrap();
    engine
        .services
        .admin
        .reverse_verification(record.verification_id, "bounced cheque", None)
        .await
        .unwrap();
    assert_eq!(engine.reload(&first).await.verified_payments_count, 0);

    let replay = engine.services.events.handle(&event).await.unwrap();
    assert!(replay.commissions_updated.contains(&first.commission_id));

    let first = engine.reload(&first).await;
    assert_eq!(first.payment_verification_status, VerificationStatus::FullyVerified);
    assert_eq!(first.verified_payments_count, 1);
    let verified = engine
        .store
        .verifications()
        .await
        .into_iter()
        .filter(|v| v.commission_id == first.commission_id && v.is_verified())
        .count();
    assert_eq!(verified, 1);
}

#[tokio::test]
async fn test_second_installment_completes_control_record() {
    let engine = TestEngine::new();
    let contract = engine
        .contract(Uuid::new_v4(), "25000.00", 12, date(2024, 1, 15))
        .await;
    let (control, _, second) = engine.generate(&contract).await;
    let ar1 = engine
        .receivable(contract.contract_id, date(2024, 2, 15), "800.00", "PENDING")
        .await;
    let ar2 = engine
        .receivable(contract.contract_id, date(2024, 3, 15), "800.00", "PENDING")
        .await;
    let p1 = engine.payment(ar1.ar_id, "800.00", date(2024, 2, 14)).await;
    let p2 = engine.payment(ar2.ar_id, "800.00", date(2024, 3, 14)).await;

    for (payment_id, installment_type) in [(p1.payment_id, Installment::First), (p2.payment_id, Installment::Second)] {
        engine
            .services
            .events
            .handle(&InstallmentPaid {
                payment_id,
                installment_type,
            })
            .await
            .unwrap();
    }

    let control = engine.reload(&control).await;
    assert_eq!(control.payment_verification_status, VerificationStatus::FullyVerified);
    assert!(control.is_eligible_for_payment);
    assert_eq!(control.verified_payments_count, 2);
    assert!(control.first_payment_verified_at.is_some());
    assert!(control.second_payment_verified_at.is_some());

    let second = engine.reload(&second).await;
    assert_eq!(second.payment_verification_status, VerificationStatus::FullyVerified);
}

#[tokio::test]
async fn test_unknown_payment_is_not_found() {
    let engine = TestEngine::new();
    let result = engine
        .services
        .events
        .handle(&InstallmentPaid {
            payment_id: Uuid::new_v4(),
            installment_type: Installment::First,
        })
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_does_payment_affect_commission() {
    let engine = TestEngine::new();
    let contract = engine
        .contract(Uuid::new_v4(), "25000.00", 12, date(2024, 1, 15))
        .await;
    let (control, first, second) = engine.generate(&contract).await;

    assert!(does_payment_affect_commission(&control, Installment::First));
    assert!(does_payment_affect_commission(&control, Installment::Second));
    assert!(does_payment_affect_commission(&first, Installment::First));
    assert!(!does_payment_affect_commission(&first, Installment::Second));
    assert!(!does_payment_affect_commission(&second, Installment::First));
    assert!(does_payment_affect_commission(&second, Installment::Second));
}

#[tokio::test]
async fn test_consumer_applies_queued_events() {
    let engine = TestEngine::new();
    let contract = engine
        .contract(Uuid::new_v4(), "25000.00", 12, date(2024, 1, 15))
        .await;
    let (_, first, _) = engine.generate(&contract).await;
    let ar = engine
        .receivable(contract.contract_id, date(2024, 2, 15), "800.00", "PENDING")
        .await;
    let payment = engine.payment(ar.ar_id, "800.00", date(2024, 2, 14)).await;

    let (sender, consumer) = event_channel(engine.services.events.clone(), EventSettings::default());

    // An unknown payment is dropped without retrying and does not block the queue.
    sender
        .send(InstallmentPaid {
            payment_id: Uuid::new_v4(),
            installment_type: Installment::First,
        })
        .await
        .unwrap();
    let body = format!(
        r#"{{"payment_id":"{}","installment_type":"first"}}"#,
        payment.payment_id
    );
    let event: InstallmentPaid = serde_json::from_str(&body).unwrap();
    sender.try_send(event).unwrap();
    drop(sender);

    // Returns once the channel is drained and closed.
    consumer.run(CancellationToken::new()).await;

    let first = engine.reload(&first).await;
    assert_eq!(first.payment_verification_status, VerificationStatus::FullyVerified);
}

#[tokio::test]
async fn test_sender_reports_full_and_closed_queue() {
    let engine = TestEngine::new();
    let event = InstallmentPaid {
        payment_id: Uuid::new_v4(),
        installment_type: Installment::Second,
    };

    let (sender, consumer) = event_channel(
        engine.services.events.clone(),
        EventSettings {
            queue_size: 1,
            ..Default::default()
        },
    );
    sender.try_send(event.clone()).unwrap();
    assert!(matches!(
        sender.try_send(event.clone()),
        Err(AppError::InternalError(_))
    ));

    drop(consumer);

    let (sender, consumer) = event_channel(engine.services.events.clone(), EventSettings::default());
    drop(consumer);
    assert!(matches!(
        sender.try_send(event.clone()),
        Err(AppError::ServiceUnavailable)
    ));
    assert!(matches!(
        sender.send(event).await,
        Err(AppError::ServiceUnavailable)
    ));
}

#[tokio::test]
async fn test_cancelled_consumer_stops() {
    let engine = TestEngine::new();
    let (_sender, consumer) = event_channel(engine.services.events.clone(), EventSettings::default());
    let token = CancellationToken::new();
    let handle = consumer.spawn(token.clone());

    token.cancel();
    handle.await.unwrap();
}
