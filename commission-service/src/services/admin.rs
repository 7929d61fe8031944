//! Administrative commission operations: extra splits, payroll approval,
//! verification reversal and split summaries.

use crate::models::{
    Commission, CommissionPeriod, CommissionStatus, Installment, PaymentStatus, PaymentType,
    VerificationRecordStatus, VerificationStatus,
};
use crate::services::generator::round2;
use crate::services::metrics::record_admin_operation;
use crate::services::status::{apply_status, describe};
use crate::services::verification::installment_verified;
use crate::services::store::{CommissionStore, CommissionTx};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct RejectedCommission {
    pub commission_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MarkPaidReport {
    pub paid: Vec<Uuid>,
    pub rejected: Vec<RejectedCommission>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitPaymentSummary {
    pub control: Commission,
    pub children: Vec<Commission>,
    pub total_commission_amount: Decimal,
    pub allocated_percentage: Decimal,
    pub allocated_amount: Decimal,
    pub paid_amount: Decimal,
    pub pending_amount: Decimal,
    pub eligible_amount: Decimal,
    pub paid_count: usize,
    pub verified_count: usize,
}

#[derive(Clone)]
pub struct CommissionAdmin {
    store: Arc<dyn CommissionStore>,
}

impl CommissionAdmin {
    pub fn new(store: Arc<dyn CommissionStore>) -> Self {
        Self { store }
    }

    /// Add a payable split of `percentage` of the control record's total,
    /// paid in `payment_period` ("YYYY-MM").
    #[instrument(skip(self), fields(commission_id = %commission_id))]
    pub async fn create_split_payment(
        &self,
        commission_id: Uuid,
        percentage: Decimal,
        payment_period: &str,
    ) -> Result<Commission, AppError> {
        if percentage <= Decimal::ZERO || percentage > Decimal::ONE_HUNDRED {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Split percentage must be greater than 0 and at most 100, got {}",
                percentage
            )));
        }
        let period = CommissionPeriod::parse(payment_period).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "Invalid payment period '{}', expected YYYY-MM",
                payment_period
            ))
        })?;

        let mut tx = self.store.begin().await?;
        let result = create_split_in(tx.as_mut(), commission_id, percentage, period).await;
        finish(tx, result, "create_split_payment").await
    }

    /// Approve payroll payment of eligible commissions in one transaction.
    #[instrument(skip(self, commission_ids), fields(count = commission_ids.len()))]
    pub async fn mark_multiple_as_paid(
        &self,
        commission_ids: &[Uuid],
        payment_date: NaiveDate,
    ) -> Result<MarkPaidReport, AppError> {
        if commission_ids.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "No commissions given"
            )));
        }

        let mut tx = self.store.begin().await?;
        let result = mark_paid_in(tx.as_mut(), commission_ids, payment_date).await;
        finish(tx, result, "mark_multiple_as_paid").await
    }

    /// Reverse a verification record and recompute the commission's status,
    /// which may move back down.
    #[instrument(skip(self, reason), fields(verification_id = %verification_id))]
    pub async fn reverse_verification(
        &self,
        verification_id: Uuid,
        reason: &str,
        reversed_by: Option<String>,
    ) -> Result<Commission, AppError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "A reversal reason is required"
            )));
        }

        let mut tx = self.store.begin().await?;
        let result = reverse_in(tx.as_mut(), verification_id, reason, reversed_by).await;
        finish(tx, result, "reverse_verification").await
    }

    /// Control record and children of a split, given either the control or
    /// one of its children.
    #[instrument(skip(self), fields(commission_id = %commission_id))]
    pub async fn get_split_payment_summary(
        &self,
        commission_id: Uuid,
    ) -> Result<SplitPaymentSummary, AppError> {
        let mut tx = self.store.begin().await?;
        let result = summary_in(tx.as_mut(), commission_id).await;
        tx.rollback().await.ok();
        result
    }
}

async fn finish<T>(
    tx: Box<dyn CommissionTx>,
    result: Result<T, AppError>,
    operation: &str,
) -> Result<T, AppError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            record_admin_operation(operation, "success");
            Ok(value)
        }
        Err(e) => {
            tx.rollback().await.ok();
            record_admin_operation(operation, "error");
            Err(e)
        }
    }
}

async fn create_split_in(
    tx: &mut dyn CommissionTx,
    commission_id: Uuid,
    percentage: Decimal,
    period: CommissionPeriod,
) -> Result<Commission, AppError> {
    let control = tx.lock_commission(commission_id).await?.ok_or_else(|| {
        AppError::NotFound(anyhow::anyhow!("Commission {} not found", commission_id))
    })?;
    if !control.is_control_record() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Commission {} is a split; splits can only be added to a control record",
            commission_id
        )));
    }

    let children = tx.list_children(commission_id).await?;
    let allocated: Decimal = children.iter().map(|c| c.split_percentage).sum();
    if allocated + percentage > Decimal::ONE_HUNDRED {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Split of {}% would bring the total to {}%, above 100%",
            percentage,
            allocated + percentage
        )));
    }

    let now = Utc::now();
    let split = Commission {
        commission_id: Uuid::new_v4(),
        parent_commission_id: Some(control.commission_id),
        payment_part: None,
        payment_type: PaymentType::FullPayment,
        is_payable: true,
        commission_amount: round2(
            control.total_commission_amount * percentage / Decimal::ONE_HUNDRED,
        ),
        split_percentage: percentage,
        payment_period: Some(period.to_string()),
        status: CommissionStatus::Generated,
        payment_status: PaymentStatus::Pending,
        payment_date: None,
        payment_verification_status: VerificationStatus::PendingVerification,
        is_eligible_for_payment: false,
        first_payment_verified_at: None,
        second_payment_verified_at: None,
        verification_notes: None,
        verified_payments_count: 0,
        created_utc: now,
        updated_utc: now,
        ..control.clone()
    };
    tx.insert_commission(&split).await?;

    info!(
        control_id = %control.commission_id,
        split_id = %split.commission_id,
        percentage = %percentage,
        amount = %split.commission_amount,
        "Split payment created"
    );
    Ok(split)
}

async fn mark_paid_in(
    tx: &mut dyn CommissionTx,
    commission_ids: &[Uuid],
    payment_date: NaiveDate,
) -> Result<MarkPaidReport, AppError> {
    let mut report = MarkPaidReport::default();
    let mut parents = BTreeSet::new();
    let mut seen = BTreeSet::new();

    for &commission_id in commission_ids {
        if !seen.insert(commission_id) {
            continue;
        }

        let reject = |reason: &str| RejectedCommission {
            commission_id,
            reason: reason.to_string(),
        };

        let Some(mut commission) = tx.lock_commission(commission_id).await? else {
            report.rejected.push(reject("not found"));
            continue;
        };
        if !commission.is_payable {
            report.rejected.push(reject("control records are not payable"));
            continue;
        }
        match commission.payment_status {
            PaymentStatus::Paid => {
                report.rejected.push(reject("already paid"));
                continue;
            }
            PaymentStatus::Cancelled => {
                report.rejected.push(reject("cancelled"));
                continue;
            }
            PaymentStatus::Pending => {}
        }
        if !commission.is_eligible_for_payment {
            report.rejected.push(reject("not eligible for payment"));
            continue;
        }

        commission.payment_status = PaymentStatus::Paid;
        commission.status = CommissionStatus::FullyPaid;
        commission.payment_date = Some(payment_date);
        commission.updated_utc = Utc::now();
        tx.save_payment_state(&commission).await?;

        if let Some(parent_id) = commission.parent_commission_id {
            parents.insert(parent_id);
        }
        report.paid.push(commission_id);
    }

    for parent_id in parents {
        let Some(mut parent) = tx.lock_commission(parent_id).await? else {
            continue;
        };
        let children = tx.list_children(parent_id).await?;
        let paid = children.iter().filter(|c| c.is_paid()).count();
        let rolled_up = if paid == 0 {
            parent.status
        } else if paid == children.len() {
            CommissionStatus::FullyPaid
        } else {
            CommissionStatus::PartiallyPaid
        };
        if rolled_up != parent.status {
            parent.status = rolled_up;
            parent.updated_utc = Utc::now();
            tx.save_payment_state(&parent).await?;
        }
    }

    info!(
        paid = report.paid.len(),
        rejected = report.rejected.len(),
        "Commissions marked as paid"
    );
    Ok(report)
}

async fn reverse_in(
    tx: &mut dyn CommissionTx,
    verification_id: Uuid,
    reason: &str,
    reversed_by: Option<String>,
) -> Result<Commission, AppError> {
    let mut record = tx
        .get_verification_by_id(verification_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "Verification {} not found",
                verification_id
            ))
        })?;
    let mut commission = tx
        .lock_commission(record.commission_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "Commission {} not found",
                record.commission_id
            ))
        })?;

    if commission.is_paid() {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Commission {} is already paid; its verification cannot be reversed",
            commission.commission_id
        )));
    }
    if record.verification_status == VerificationRecordStatus::Reversed {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Verification {} is already reversed",
            verification_id
        )));
    }

    let now = Utc::now();
    let reversal_note = match &reversed_by {
        Some(who) => format!("Reversed by {}: {}", who, reason),
        None => format!("Reversed: {}", reason),
    };
    record.verification_status = VerificationRecordStatus::Reversed;
    record.notes = Some(match record.notes.take() {
        Some(notes) if !notes.is_empty() => format!("{}\n{}", notes, reversal_note),
        _ => reversal_note,
    });
    record.updated_utc = now;
    tx.save_verification(&record).await?;

    let installment = record.payment_installment;
    commission.set_verified_at(installment, None);
    commission.verified_payments_count = (commission.verified_payments_count - 1).max(0);

    let has_first = installment != Installment::First
        && installment_verified(tx, commission.commission_id, Installment::First).await?;
    let has_second = installment != Installment::Second
        && installment_verified(tx, commission.commission_id, Installment::Second).await?;

    let derived = apply_status(&mut commission, has_first, has_second, false, now);
    commission.verification_notes = Some(format!(
        "{}. {} reversed: {}",
        describe(&commission, has_first, has_second),
        installment.label(),
        reason
    ));
    tx.save_verification_state(&commission).await?;

    info!(
        commission_id = %commission.commission_id,
        installment = %installment,
        status = %derived.status,
        "Verification reversed"
    );
    Ok(commission)
}

async fn summary_in(
    tx: &mut dyn CommissionTx,
    commission_id: Uuid,
) -> Result<SplitPaymentSummary, AppError> {
    let commission = tx.get_commission(commission_id).await?.ok_or_else(|| {
        AppError::NotFound(anyhow::anyhow!("Commission {} not found", commission_id))
    })?;

    let control = match commission.parent_commission_id {
        None => commission,
        Some(parent_id) => tx.get_commission(parent_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "Control commission {} not found",
                parent_id
            ))
        })?,
    };
    let children = tx.list_children(control.commission_id).await?;

    let sum = |filter: &dyn Fn(&Commission) -> bool| -> Decimal {
        children
            .iter()
            .filter(|c| filter(c))
            .map(|c| c.commission_amount)
            .sum()
    };
    let allocated_amount = sum(&|_| true);
    let paid_amount = sum(&|c| c.is_paid());
    let eligible_amount = sum(&|c| !c.is_paid() && c.is_eligible_for_payment);
    let pending_amount = sum(&|c| c.payment_status == PaymentStatus::Pending);

    Ok(SplitPaymentSummary {
        total_commission_amount: control.total_commission_amount,
        allocated_percentage: children.iter().map(|c| c.split_percentage).sum(),
        allocated_amount,
        paid_amount,
        pending_amount,
        eligible_amount,
        paid_count: children.iter().filter(|c| c.is_paid()).count(),
        verified_count: children
            .iter()
            .filter(|c| c.payment_verification_status == VerificationStatus::FullyVerified)
            .count(),
        control,
        children,
    })
}
