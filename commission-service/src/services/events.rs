//! Reaction to "installment paid" notifications.
//!
//! Delivery is at least once. The verification record keyed by
//! (commission, installment) makes a replayed event a no-op.

use crate::models::{Commission, Installment, NewVerification, VerificationMethod};
use crate::services::metrics::{record_error, record_event};
use crate::services::status::{apply_status, describe};
use crate::services::store::{CommissionStore, CommissionTx};
use crate::services::verification::installment_verified;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// A customer paid one installment of a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentPaid {
    pub payment_id: Uuid,
    pub installment_type: Installment,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EventOutcome {
    pub contract_id: Option<Uuid>,
    /// Commissions whose verification changed.
    pub commissions_updated: Vec<Uuid>,
    /// Relevant commissions that already had this installment verified.
    pub already_verified: Vec<Uuid>,
}

/// Whether a paid installment counts toward a commission's payout.
pub fn does_payment_affect_commission(commission: &Commission, installment: Installment) -> bool {
    match commission.payment_part {
        Some(part) => part.installment() == installment,
        None => commission.payment_dependency_type.involves(installment),
    }
}

/// Errors that cannot succeed on retry.
fn is_permanent(error: &AppError) -> bool {
    matches!(error, AppError::NotFound(_) | AppError::BadRequest(_))
}

#[derive(Clone)]
pub struct EventReactor {
    store: Arc<dyn CommissionStore>,
}

impl EventReactor {
    pub fn new(store: Arc<dyn CommissionStore>) -> Self {
        Self { store }
    }

    /// Apply one event in a single transaction.
    #[instrument(skip(self), fields(payment_id = %event.payment_id, installment = %event.installment_type))]
    pub async fn handle(&self, event: &InstallmentPaid) -> Result<EventOutcome, AppError> {
        let mut tx = self.store.begin().await?;
        match self.handle_in(tx.as_mut(), event).await {
            Ok(outcome) => {
                tx.commit().await?;
                record_event(if outcome.commissions_updated.is_empty() {
                    "noop"
                } else {
                    "applied"
                });
                Ok(outcome)
            }
            Err(e) => {
                tx.rollback().await.ok();
                Err(e)
            }
        }
    }

    async fn handle_in(
        &self,
        tx: &mut dyn CommissionTx,
        event: &InstallmentPaid,
    ) -> Result<EventOutcome, AppError> {
        let payment = tx
            .get_customer_payment(event.payment_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Customer payment {} not found",
                    event.payment_id
                ))
            })?;
        let receivable = tx.get_receivable(payment.ar_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Receivable {} not found", payment.ar_id))
        })?;
        let contract = tx
            .get_contract(receivable.contract_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Contract {} not found",
                    receivable.contract_id
                ))
            })?;

        let mut outcome = EventOutcome {
            contract_id: Some(contract.contract_id),
            ..Default::default()
        };
        let installment = event.installment_type;
        let now = Utc::now();

        let commissions = tx
            .lock_unpaid_dependent_commissions(contract.contract_id)
            .await?;

        for mut commission in commissions {
            if !does_payment_affect_commission(&commission, installment) {
                continue;
            }

            let written = tx
                .upsert_verification(&NewVerification {
                    commission_id: commission.commission_id,
                    installment,
                    customer_payment_id: Some(payment.payment_id),
                    ar_id: receivable.ar_id,
                    verified_amount: payment.amount,
                    verified_by: None,
                    method: VerificationMethod::AutomaticEvent,
                    notes: Some(format!("{} paid event", installment.label())),
                })
                .await?;

            if written.is_none() {
                debug!(commission_id = %commission.commission_id, "Installment already verified");
                outcome.already_verified.push(commission.commission_id);
                continue;
            }

            commission.verified_payments_count += 1;

            let has_first = installment_verified(tx, commission.commission_id, Installment::First).await?;
            let has_second = installment_verified(tx, commission.commission_id, Installment::Second).await?;
            apply_status(&mut commission, has_first, has_second, true, now);
            commission.verification_notes = Some(describe(&commission, has_first, has_second));
            tx.save_verification_state(&commission).await?;

            outcome.commissions_updated.push(commission.commission_id);
        }

        info!(
            contract_id = %contract.contract_id,
            updated = outcome.commissions_updated.len(),
            already_verified = outcome.already_verified.len(),
            "Installment paid event applied"
        );

        Ok(outcome)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EventSettings {
    pub queue_size: usize,
    pub retry_max_elapsed: Duration,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            queue_size: 1024,
            retry_max_elapsed: Duration::from_secs(60),
        }
    }
}

/// Producer side of the event queue.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<InstallmentPaid>,
}

impl EventSender {
    /// Wait for queue capacity and enqueue.
    pub async fn send(&self, event: InstallmentPaid) -> Result<(), AppError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| AppError::ServiceUnavailable)
    }

    /// Enqueue without waiting. Fails when the queue is full.
    pub fn try_send(&self, event: InstallmentPaid) -> Result<(), AppError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                AppError::InternalError(anyhow::anyhow!("Event queue full"))
            }
            mpsc::error::TrySendError::Closed(_) => AppError::ServiceUnavailable,
        })
    }
}

/// Consumer side: applies queued events with retry.
pub struct EventConsumer {
    reactor: EventReactor,
    rx: mpsc::Receiver<InstallmentPaid>,
    settings: EventSettings,
}

pub fn event_channel(reactor: EventReactor, settings: EventSettings) -> (EventSender, EventConsumer) {
    let (tx, rx) = mpsc::channel(settings.queue_size.max(1));
    (
        EventSender { tx },
        EventConsumer {
            reactor,
            rx,
            settings,
        },
    )
}

impl EventConsumer {
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Consume until cancelled or every sender is dropped.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(queue_size = self.settings.queue_size, "Payment event consumer started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Payment event consumer shutting down");
                    break;
                }
                event = self.rx.recv() => {
                    match event {
                        Some(event) => self.process(event).await,
                        None => {
                            info!("Event channel closed, consumer exiting");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn process(&self, event: InstallmentPaid) {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.settings.retry_max_elapsed),
            ..Default::default()
        };

        let result = retry(backoff, || async {
            self.reactor.handle(&event).await.map_err(|e| {
                if is_permanent(&e) {
                    backoff::Error::permanent(e)
                } else {
                    warn!(payment_id = %event.payment_id, error = %e, "Event handling failed, retrying");
                    backoff::Error::transient(e)
                }
            })
        })
        .await;

        if let Err(e) = result {
            record_event(if is_permanent(&e) { "rejected" } else { "failed" });
            record_error("payment_event", &e);
            error!(
                payment_id = %event.payment_id,
                installment = %event.installment_type,
                error = %e,
                "Dropping payment event"
            );
        }
    }
}
