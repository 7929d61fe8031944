//! Client payment verification.
//!
//! A commission is verified by matching the installments it depends on
//! against the customer's receivables. Contracts with an explicit payment
//! schedule are matched through the schedule rows; others by receivable
//! due-date order.

use crate::models::{
    AccountReceivable, Commission, Installment, NewVerification, VerificationMethod,
    VerificationStatus,
};
use crate::services::metrics::{record_error, record_verification};
use crate::services::schedule::PaymentScheduleAdapter;
use crate::services::status::{apply_status, describe, required_installments};
use crate::services::store::{CommissionStore, CommissionTx};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Largest shortfall still accepted as paid in full.
pub fn payment_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

/// What started a verification run. Used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationTrigger {
    Manual,
    Sweep,
}

impl VerificationTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Sweep => "sweep",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallmentCheck {
    pub installment: Installment,
    pub ar_id: Uuid,
    pub verified: bool,
    /// A verification record was written by this check.
    pub newly_recorded: bool,
    pub method: Option<VerificationMethod>,
    pub verified_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationOutcome {
    pub commission_id: Uuid,
    pub first_payment_ok: bool,
    pub second_payment_ok: bool,
    /// Not enough receivables or schedule rows to verify; nothing was changed.
    pub insufficient: bool,
    pub message: String,
    pub details: Vec<InstallmentCheck>,
    pub status: VerificationStatus,
    pub eligible: bool,
}

impl VerificationOutcome {
    fn insufficient(commission: &Commission, message: String) -> Self {
        Self {
            commission_id: commission.commission_id,
            first_payment_ok: false,
            second_payment_ok: false,
            insufficient: true,
            message,
            details: Vec::new(),
            status: commission.payment_verification_status,
            eligible: commission.is_eligible_for_payment,
        }
    }
}

enum Targets {
    Resolved(Vec<(Installment, AccountReceivable)>),
    Insufficient(String),
}

#[derive(Clone)]
pub struct PaymentVerificationEngine {
    store: Arc<dyn CommissionStore>,
    schedules: PaymentScheduleAdapter,
}

impl PaymentVerificationEngine {
    pub fn new(store: Arc<dyn CommissionStore>, schedules: PaymentScheduleAdapter) -> Self {
        Self { store, schedules }
    }

    /// Verify a commission against payments received up to today.
    pub async fn verify(&self, commission_id: Uuid) -> Result<VerificationOutcome, AppError> {
        self.verify_with(
            commission_id,
            Utc::now().date_naive(),
            VerificationTrigger::Manual,
        )
        .await
    }

    /// Verify counting only customer payments dated on or before `as_of`.
    pub async fn verify_as_of(
        &self,
        commission_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<VerificationOutcome, AppError> {
        self.verify_with(commission_id, as_of, VerificationTrigger::Manual)
            .await
    }

    #[instrument(skip(self), fields(trigger = trigger.as_str()))]
    pub(crate) async fn verify_with(
        &self,
        commission_id: Uuid,
        as_of: NaiveDate,
        trigger: VerificationTrigger,
    ) -> Result<VerificationOutcome, AppError> {
        let mut tx = self.store.begin().await?;
        match self.verify_in(tx.as_mut(), commission_id, as_of).await {
            Ok(outcome) => {
                tx.commit().await?;
                let label = if outcome.insufficient {
                    "insufficient"
                } else if outcome.status == VerificationStatus::FullyVerified {
                    "verified"
                } else {
                    "pending"
                };
                record_verification(trigger.as_str(), label);
                Ok(outcome)
            }
            Err(e) => {
                tx.rollback().await.ok();
                warn!(commission_id = %commission_id, error = %e, "Verification failed");
                record_verification(trigger.as_str(), "error");
                record_error("verification", &e);
                Err(e)
            }
        }
    }

    async fn verify_in(
        &self,
        tx: &mut dyn CommissionTx,
        commission_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<VerificationOutcome, AppError> {
        let mut commission = tx.lock_commission(commission_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Commission {} not found", commission_id))
        })?;
        let now = Utc::now();

        if !commission.requires_client_payment_verification {
            commission.payment_verification_status = VerificationStatus::FullyVerified;
            commission.is_eligible_for_payment = true;
            commission.verification_notes =
                Some("Client payment verification not required".to_string());
            commission.updated_utc = now;
            tx.save_verification_state(&commission).await?;

            return Ok(VerificationOutcome {
                commission_id,
                first_payment_ok: true,
                second_payment_ok: true,
                insufficient: false,
                message: "Client payment verification not required".to_string(),
                details: Vec::new(),
                status: commission.payment_verification_status,
                eligible: true,
            });
        }

        tx.get_contract(commission.contract_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "Contract {} not found",
                commission.contract_id
            ))
        })?;

        // Every target is resolved before anything is written.
        let targets = match self.resolve_targets(tx, &commission).await? {
            Targets::Resolved(targets) => targets,
            Targets::Insufficient(message) => {
                info!(commission_id = %commission_id, message = %message, "Not enough installments to verify");
                return Ok(VerificationOutcome::insufficient(&commission, message));
            }
        };

        let mut details = Vec::with_capacity(targets.len());
        for (installment, receivable) in &targets {
            let check = verify_installment_payment(tx, &commission, receivable, *installment, as_of)
                .await?;
            details.push(check);
        }

        let is_ok = |installment: Installment| {
            details
                .iter()
                .any(|c| c.installment == installment && c.verified)
        };
        let has_first = is_ok(Installment::First);
        let has_second = is_ok(Installment::Second);
        commission.verified_payments_count +=
            details.iter().filter(|c| c.newly_recorded).count() as i32;

        let derived = apply_status(&mut commission, has_first, has_second, true, now);
        let note = describe(&commission, has_first, has_second);
        commission.verification_notes = Some(note.clone());
        tx.save_verification_state(&commission).await?;

        debug!(
            commission_id = %commission_id,
            status = %derived.status,
            eligible = derived.eligible,
            "Commission verification recomputed"
        );

        Ok(VerificationOutcome {
            commission_id,
            first_payment_ok: has_first,
            second_payment_ok: has_second,
            insufficient: false,
            message: note,
            details,
            status: derived.status,
            eligible: derived.eligible,
        })
    }

    async fn resolve_targets(
        &self,
        tx: &mut dyn CommissionTx,
        commission: &Commission,
    ) -> Result<Targets, AppError> {
        let required = required_installments(commission);
        let schedule = self
            .schedules
            .get_schedule(tx, commission.contract_id)
            .await?;

        let mut targets = Vec::with_capacity(required.len());

        if !schedule.is_empty() {
            for installment in required {
                let Some(item) = schedule
                    .iter()
                    .find(|item| item.installment_number == installment.number())
                else {
                    return Ok(Targets::Insufficient(format!(
                        "Payment schedule has {} installment(s); installment {} is required",
                        schedule.len(),
                        installment.number()
                    )));
                };

                let receivable = tx
                    .find_receivable(commission.contract_id, item.due_date, item.amount)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(anyhow::anyhow!(
                            "No receivable for contract {} due {} amount {}",
                            commission.contract_id,
                            item.due_date,
                            item.amount
                        ))
                    })?;
                targets.push((installment, receivable));
            }
            return Ok(Targets::Resolved(targets));
        }

        let receivables = tx.list_receivables(commission.contract_id).await?;
        if !commission.is_split() && receivables.len() < 2 {
            return Ok(Targets::Insufficient(format!(
                "Contract has {} receivable(s); at least 2 are required",
                receivables.len()
            )));
        }

        for installment in required {
            let index = (installment.number() - 1) as usize;
            let Some(receivable) = receivables.get(index) else {
                return Ok(Targets::Insufficient(format!(
                    "Contract has {} receivable(s); {} is missing",
                    receivables.len(),
                    installment.label()
                )));
            };
            targets.push((installment, receivable.clone()));
        }
        Ok(Targets::Resolved(targets))
    }
}

/// Whether the (commission, installment) record exists and is verified.
pub async fn installment_verified(
    tx: &mut dyn CommissionTx,
    commission_id: Uuid,
    installment: Installment,
) -> Result<bool, AppError> {
    Ok(tx
        .get_verification(commission_id, installment)
        .await?
        .map(|v| v.is_verified())
        .unwrap_or(false))
}

/// Check one installment, writing a verification record when it is paid.
pub async fn verify_installment_payment(
    tx: &mut dyn CommissionTx,
    commission: &Commission,
    receivable: &AccountReceivable,
    installment: Installment,
    as_of: NaiveDate,
) -> Result<InstallmentCheck, AppError> {
    if let Some(existing) = tx
        .get_verification(commission.commission_id, installment)
        .await?
    {
        if existing.is_verified() {
            return Ok(InstallmentCheck {
                installment,
                ar_id: existing.ar_id,
                verified: true,
                newly_recorded: false,
                method: Some(existing.verification_method),
                verified_amount: Some(existing.verified_amount),
            });
        }
    }

    let new_verification = if receivable.is_paid() {
        Some(NewVerification {
            commission_id: commission.commission_id,
            installment,
            customer_payment_id: None,
            ar_id: receivable.ar_id,
            verified_amount: receivable.original_amount,
            verified_by: None,
            method: VerificationMethod::ReceivableStatus,
            notes: Some(format!("{} receivable marked PAID", installment.label())),
        })
    } else {
        let payments = tx.list_payments(receivable.ar_id, as_of).await?;
        let total: Decimal = payments.iter().map(|p| p.amount).sum();
        if !payments.is_empty() && total >= receivable.original_amount - payment_tolerance() {
            Some(NewVerification {
                commission_id: commission.commission_id,
                installment,
                customer_payment_id: payments.last().map(|p| p.payment_id),
                ar_id: receivable.ar_id,
                verified_amount: total,
                verified_by: None,
                method: VerificationMethod::Automatic,
                notes: Some(format!(
                    "{} covered by {} customer payment(s)",
                    installment.label(),
                    payments.len()
                )),
            })
        } else {
            None
        }
    };

    let Some(new_verification) = new_verification else {
        return Ok(InstallmentCheck {
            installment,
            ar_id: receivable.ar_id,
            verified: false,
            newly_recorded: false,
            method: None,
            verified_amount: None,
        });
    };

    let written = tx.upsert_verification(&new_verification).await?;
    Ok(InstallmentCheck {
        installment,
        ar_id: receivable.ar_id,
        verified: true,
        newly_recorded: written.is_some(),
        method: Some(new_verification.method),
        verified_amount: Some(new_verification.verified_amount),
    })
}
