//! Split commission generation.
//!
//! For each (contract, employee, period) the generator writes one non-payable
//! control record and two payable children paid one and two months after the
//! commission period.

use crate::models::{
    Commission, CommissionPeriod, CommissionStatus, Contract, PaymentDependency, PaymentPart,
    PaymentStatus, PaymentType, VerificationStatus,
};
use crate::services::metrics::{record_error, record_generated};
use crate::services::rates::{RateQuery, RateResolver};
use crate::services::store::{CommissionStore, CommissionTx};
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Sales count at which the split moves from 50/50 to 70/30.
const HIGH_VOLUME_SALES: i64 = 10;

pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// (first, second) share of the total, in percent.
pub fn split_ratio(sales_count: i64) -> (Decimal, Decimal) {
    if sales_count >= HIGH_VOLUME_SALES {
        (Decimal::from(70), Decimal::from(30))
    } else {
        (Decimal::from(50), Decimal::from(50))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GenerationSettings {
    pub requires_client_payment_verification: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            requires_client_payment_verification: true,
        }
    }
}

/// Per-contract failure inside a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationError {
    pub contract_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationReport {
    pub period: String,
    pub contracts_processed: usize,
    pub records_created: usize,
    pub skipped: usize,
    pub errors: Vec<GenerationError>,
}

#[derive(Clone)]
pub struct SplitCommissionGenerator {
    store: Arc<dyn CommissionStore>,
    rates: RateResolver,
    settings: GenerationSettings,
}

impl SplitCommissionGenerator {
    pub fn new(
        store: Arc<dyn CommissionStore>,
        rates: RateResolver,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            store,
            rates,
            settings,
        }
    }

    /// Generate the control record and any missing children for a contract
    /// with an already resolved rate. Returns only the rows created.
    #[instrument(skip(self, contract), fields(contract_id = %contract.contract_id, period = %period))]
    pub async fn generate(
        &self,
        contract: &Contract,
        rate_percentage: Decimal,
        sales_count: i64,
        period: CommissionPeriod,
    ) -> Result<Vec<Commission>, AppError> {
        let mut tx = self.store.begin().await?;
        match self
            .generate_in(tx.as_mut(), contract, rate_percentage, sales_count, period)
            .await
        {
            Ok(created) => {
                tx.commit().await?;
                Ok(created)
            }
            Err(e) => {
                tx.rollback().await.ok();
                Err(e)
            }
        }
    }

    /// Load a contract, count its advisor's financed sales in the signing
    /// month, resolve the rate and generate. `period` defaults to the signing month.
    #[instrument(skip(self), fields(contract_id = %contract_id))]
    pub async fn generate_for_contract(
        &self,
        contract_id: Uuid,
        period: Option<CommissionPeriod>,
    ) -> Result<Vec<Commission>, AppError> {
        let mut tx = self.store.begin().await?;
        let result = self
            .generate_for_contract_in(tx.as_mut(), contract_id, period)
            .await;
        match result {
            Ok(created) => {
                tx.commit().await?;
                Ok(created)
            }
            Err(e) => {
                tx.rollback().await.ok();
                Err(e)
            }
        }
    }

    /// Generate for every contract signed in the given month. Failures are
    /// collected per contract and do not stop the batch.
    #[instrument(skip(self), fields(period = %period))]
    pub async fn generate_for_period(
        &self,
        period: CommissionPeriod,
    ) -> Result<GenerationReport, AppError> {
        let contracts = {
            let mut tx = self.store.begin().await?;
            let result = tx
                .list_contracts_signed_between(period.first_day(), period.next_first_day())
                .await;
            tx.rollback().await.ok();
            result?
        };

        let mut report = GenerationReport {
            period: period.to_string(),
            ..Default::default()
        };

        for contract in contracts {
            report.contracts_processed += 1;
            match self
                .generate_for_contract(contract.contract_id, Some(period))
                .await
            {
                Ok(created) if created.is_empty() => report.skipped += 1,
                Ok(created) => report.records_created += created.len(),
                Err(e) => {
                    warn!(contract_id = %contract.contract_id, error = %e, "Commission generation failed");
                    record_error("generation", &e);
                    report.errors.push(GenerationError {
                        contract_id: contract.contract_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            contracts_processed = report.contracts_processed,
            records_created = report.records_created,
            skipped = report.skipped,
            errors = report.errors.len(),
            "Commission generation batch completed"
        );

        Ok(report)
    }

    async fn generate_for_contract_in(
        &self,
        tx: &mut dyn CommissionTx,
        contract_id: Uuid,
        period: Option<CommissionPeriod>,
    ) -> Result<Vec<Commission>, AppError> {
        let contract = tx.get_contract(contract_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Contract {} not found", contract_id))
        })?;

        let Some(advisor_id) = contract.advisor_id else {
            debug!("Contract has no advisor, skipping");
            return Ok(Vec::new());
        };
        if !contract.is_financed() {
            debug!("Contract is not financed, skipping");
            return Ok(Vec::new());
        }

        let signing_month = CommissionPeriod::of_date(contract.sign_date);
        let sales_count = tx
            .count_financed_sales(
                advisor_id,
                signing_month.first_day(),
                signing_month.next_first_day(),
            )
            .await?;

        let rate = self
            .rates
            .resolve(&RateQuery {
                sales_count,
                term_months: contract.term_months,
                sale_type: Some(contract.sale_type()),
                as_of: Some(contract.sign_date),
            })
            .await;

        let period = period.unwrap_or(signing_month);
        self.generate_in(tx, &contract, rate.percentage, sales_count, period)
            .await
    }

    async fn generate_in(
        &self,
        tx: &mut dyn CommissionTx,
        contract: &Contract,
        rate_percentage: Decimal,
        sales_count: i64,
        period: CommissionPeriod,
    ) -> Result<Vec<Commission>, AppError> {
        let Some(employee_id) = contract.advisor_id else {
            return Ok(Vec::new());
        };
        if contract.financing_amount <= Decimal::ZERO {
            return Ok(Vec::new());
        }

        let period_key = period.to_string();
        let mut created = Vec::new();

        let control = match tx
            .find_control_record(contract.contract_id, employee_id, &period_key)
            .await?
        {
            Some(control) => control,
            None => {
                let total =
                    round2(contract.financing_amount * rate_percentage / Decimal::ONE_HUNDRED);
                let control = self.control_record(
                    contract,
                    employee_id,
                    rate_percentage,
                    total,
                    sales_count,
                    period,
                );
                tx.insert_commission(&control).await?;
                created.push(control.clone());
                control
            }
        };

        let children = tx.list_children(control.commission_id).await?;
        let missing: Vec<PaymentPart> = [PaymentPart::First, PaymentPart::Second]
            .into_iter()
            .filter(|part| !children.iter().any(|c| c.payment_part == Some(*part)))
            .collect();

        if missing.is_empty() {
            debug!(control_id = %control.commission_id, "Split commissions already generated");
            return Ok(created);
        }

        // The control record's snapshot decides amounts so a resumed run
        // produces the same children as an uninterrupted one.
        let total = control.total_commission_amount;
        let (first_pct, second_pct) = split_ratio(control.sales_count as i64);
        let first_amount = round2(total * first_pct / Decimal::ONE_HUNDRED);

        for part in missing {
            let (split_percentage, amount) = match part {
                PaymentPart::First => (first_pct, first_amount),
                PaymentPart::Second => (second_pct, total - first_amount),
            };
            let child = self.child_record(&control, part, split_percentage, amount, period);
            tx.insert_commission(&child).await?;
            created.push(child);
        }

        let controls = created.iter().filter(|c| c.is_control_record()).count();
        record_generated("control", controls);
        record_generated("child", created.len() - controls);

        info!(
            control_id = %control.commission_id,
            total = %total,
            created = created.len(),
            "Split commissions generated"
        );

        Ok(created)
    }

    fn control_record(
        &self,
        contract: &Contract,
        employee_id: Uuid,
        rate_percentage: Decimal,
        total: Decimal,
        sales_count: i64,
        period: CommissionPeriod,
    ) -> Commission {
        let now = Utc::now();
        Commission {
            commission_id: Uuid::new_v4(),
            parent_commission_id: None,
            employee_id,
            contract_id: contract.contract_id,
            payment_part: None,
            payment_type: PaymentType::FullPayment,
            is_payable: false,
            commission_percentage: rate_percentage,
            commission_amount: total,
            total_commission_amount: total,
            split_percentage: Decimal::ONE_HUNDRED,
            sales_count: i32::try_from(sales_count).unwrap_or(i32::MAX),
            period_month: period.month() as i32,
            period_year: period.year(),
            commission_period: period.to_string(),
            payment_period: None,
            status: CommissionStatus::Generated,
            payment_status: PaymentStatus::Pending,
            payment_date: None,
            requires_client_payment_verification: self
                .settings
                .requires_client_payment_verification,
            payment_dependency_type: PaymentDependency::BothPayments,
            payment_verification_status: VerificationStatus::PendingVerification,
            is_eligible_for_payment: false,
            first_payment_verified_at: None,
            second_payment_verified_at: None,
            verification_notes: None,
            verified_payments_count: 0,
            created_utc: now,
            updated_utc: now,
        }
    }

    fn child_record(
        &self,
        control: &Commission,
        part: PaymentPart,
        split_percentage: Decimal,
        amount: Decimal,
        period: CommissionPeriod,
    ) -> Commission {
        let now = Utc::now();
        let dependency = match part {
            PaymentPart::First => PaymentDependency::FirstPaymentOnly,
            PaymentPart::Second => PaymentDependency::SecondPaymentOnly,
        };
        Commission {
            commission_id: Uuid::new_v4(),
            parent_commission_id: Some(control.commission_id),
            employee_id: control.employee_id,
            contract_id: control.contract_id,
            payment_part: Some(part),
            payment_type: PaymentType::for_part(Some(part)),
            is_payable: true,
            commission_percentage: control.commission_percentage,
            commission_amount: amount,
            total_commission_amount: control.total_commission_amount,
            split_percentage,
            sales_count: control.sales_count,
            period_month: period.month() as i32,
            period_year: period.year(),
            commission_period: period.to_string(),
            payment_period: Some(period.plus_months(part.payment_offset_months()).to_string()),
            status: CommissionStatus::Generated,
            payment_status: PaymentStatus::Pending,
            payment_date: None,
            requires_client_payment_verification: self
                .settings
                .requires_client_payment_verification,
            payment_dependency_type: dependency,
            payment_verification_status: VerificationStatus::PendingVerification,
            is_eligible_for_payment: false,
            first_payment_verified_at: None,
            second_payment_verified_at: None,
            verification_notes: None,
            verified_payments_count: 0,
            created_utc: now,
            updated_utc: now,
        }
    }
}
