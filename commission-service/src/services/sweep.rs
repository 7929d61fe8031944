//! Periodic verification of commissions still waiting on client payments.

use crate::models::VerificationStatus;
use crate::services::metrics::record_sweep_item;
use crate::services::store::CommissionStore;
use crate::services::verification::{PaymentVerificationEngine, VerificationTrigger};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct SweepSettings {
    pub enabled: bool,
    pub interval: Duration,
    pub batch_size: i64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(3600),
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepError {
    pub commission_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub verified: usize,
    pub pending: usize,
    pub insufficient: usize,
    pub errors: Vec<SweepError>,
}

#[derive(Clone)]
pub struct VerificationSweep {
    store: Arc<dyn CommissionStore>,
    engine: PaymentVerificationEngine,
    settings: SweepSettings,
}

impl VerificationSweep {
    pub fn new(
        store: Arc<dyn CommissionStore>,
        engine: PaymentVerificationEngine,
        settings: SweepSettings,
    ) -> Self {
        Self {
            store,
            engine,
            settings,
        }
    }

    pub async fn run_once(&self) -> Result<SweepReport, AppError> {
        self.run_once_as_of(Utc::now().date_naive()).await
    }

    /// Verify up to `batch_size` waiting commissions, oldest first. A failing
    /// commission is recorded in the report and the sweep moves on.
    #[instrument(skip(self), fields(batch_size = self.settings.batch_size))]
    pub async fn run_once_as_of(&self, as_of: NaiveDate) -> Result<SweepReport, AppError> {
        let ids = {
            let mut tx = self.store.begin().await?;
            let result = tx
                .list_commissions_awaiting_verification(self.settings.batch_size)
                .await;
            tx.rollback().await.ok();
            result?
        };

        let mut report = SweepReport::default();
        for commission_id in ids {
            report.examined += 1;
            match self
                .engine
                .verify_with(commission_id, as_of, VerificationTrigger::Sweep)
                .await
            {
                Ok(outcome) if outcome.insufficient => {
                    report.insufficient += 1;
                    record_sweep_item("insufficient");
                }
                Ok(outcome) if outcome.status == VerificationStatus::FullyVerified => {
                    report.verified += 1;
                    record_sweep_item("verified");
                }
                Ok(_) => {
                    report.pending += 1;
                    record_sweep_item("pending");
                }
                Err(e) => {
                    warn!(commission_id = %commission_id, error = %e, "Sweep item failed");
                    record_sweep_item("error");
                    report.errors.push(SweepError {
                        commission_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            examined = report.examined,
            verified = report.verified,
            pending = report.pending,
            insufficient = report.insufficient,
            errors = report.errors.len(),
            "Verification sweep completed"
        );
        Ok(report)
    }

    /// Run the sweep on the configured interval until cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.settings.enabled {
            info!("Verification sweep disabled by configuration");
            return None;
        }

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                interval_secs = self.settings.interval.as_secs(),
                batch_size = self.settings.batch_size,
                "Verification sweep started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Verification sweep shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            error!(error = %e, "Verification sweep failed");
                        }
                    }
                }
            }
        }))
    }
}
