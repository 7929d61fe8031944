//! Test helper module for commission-service integration tests.
//!
//! Suites run against the in-process store so they need no PostgreSQL.

#![allow(dead_code)]

use chrono::{NaiveDate, Utc};
use commission_service::models::{
    AccountReceivable, Commission, CommissionStatus, Contract, CustomerPayment,
    PaymentDependency, PaymentScheduleItem, PaymentStatus, PaymentType, ScheduleNamespace,
    VerificationStatus,
};
use commission_service::services::{CommissionServices, EngineSettings, MemoryStore};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Once;
use uuid::Uuid;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Store plus the services wired to it.
pub struct TestEngine {
    pub store: MemoryStore,
    pub services: CommissionServices,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        init_tracing();
        let store = MemoryStore::new();
        let services = CommissionServices::in_memory(store.clone(), settings);
        Self { store, services }
    }

    /// Financed contract signed by `advisor_id`.
    pub async fn contract(
        &self,
        advisor_id: Uuid,
        financing_amount: &str,
        term_months: i32,
        sign_date: NaiveDate,
    ) -> Contract {
        let contract = Contract {
            contract_id: Uuid::new_v4(),
            advisor_id: Some(advisor_id),
            financing_amount: dec(financing_amount),
            term_months,
            sign_date,
            status: "active".to_string(),
        };
        self.store.add_contract(contract.clone()).await;
        contract
    }

    /// `count` financed contracts for the advisor in the same month, used to
    /// push the advisor's monthly sales count.
    pub async fn filler_sales(&self, advisor_id: Uuid, count: usize, sign_date: NaiveDate) {
        for _ in 0..count {
            self.contract(advisor_id, "1000.00", 12, sign_date).await;
        }
    }

    pub async fn receivable(
        &self,
        contract_id: Uuid,
        due_date: NaiveDate,
        amount: &str,
        status: &str,
    ) -> AccountReceivable {
        let receivable = AccountReceivable {
            ar_id: Uuid::new_v4(),
            contract_id,
            due_date,
            original_amount: dec(amount),
            paid_amount: Decimal::ZERO,
            status: status.to_string(),
        };
        self.store.add_receivable(receivable.clone()).await;
        receivable
    }

    pub async fn payment(
        &self,
        ar_id: Uuid,
        amount: &str,
        payment_date: NaiveDate,
    ) -> CustomerPayment {
        let payment = CustomerPayment {
            payment_id: Uuid::new_v4(),
            ar_id,
            amount: dec(amount),
            payment_date,
        };
        self.store.add_payment(payment.clone()).await;
        payment
    }

    pub async fn schedule_item(
        &self,
        namespace: ScheduleNamespace,
        contract_id: Uuid,
        installment_number: i32,
        due_date: NaiveDate,
        amount: &str,
    ) -> PaymentScheduleItem {
        let item = PaymentScheduleItem {
            schedule_id: Uuid::new_v4(),
            contract_id,
            installment_number,
            due_date,
            amount: dec(amount),
        };
        self.store.add_schedule_item(namespace, item.clone()).await;
        item
    }

    /// Control record with no children, as written by an older generator.
    pub async fn bare_control(&self, contract: &Contract, total: &str) -> Commission {
        let now = Utc::now();
        let control = Commission {
            commission_id: Uuid::new_v4(),
            parent_commission_id: None,
            employee_id: contract.advisor_id.unwrap_or_else(Uuid::new_v4),
            contract_id: contract.contract_id,
            payment_part: None,
            payment_type: PaymentType::FullPayment,
            is_payable: false,
            commission_percentage: dec("3.00"),
            commission_amount: dec(total),
            total_commission_amount: dec(total),
            split_percentage: Decimal::ONE_HUNDRED,
            sales_count: 1,
            period_month: 1,
            period_year: 2024,
            commission_period: "2024-01".to_string(),
            payment_period: None,
            status: CommissionStatus::Generated,
            payment_status: PaymentStatus::Pending,
            payment_date: None,
            requires_client_payment_verification: true,
            payment_dependency_type: PaymentDependency::BothPayments,
            payment_verification_status: VerificationStatus::PendingVerification,
            is_eligible_for_payment: false,
            first_payment_verified_at: None,
            second_payment_verified_at: None,
            verification_notes: None,
            verified_payments_count: 0,
            created_utc: now,
            updated_utc: now,
        };
        self.store.add_commission(control.clone()).await;
        control
    }

    /// Generated records for a contract: (control, first split, second split).
    pub async fn generate(&self, contract: &Contract) -> (Commission, Commission, Commission) {
        self.services
            .generator
            .generate_for_contract(contract.contract_id, None)
            .await
            .unwrap();
        self.split_of(contract.contract_id).await
    }

    pub async fn split_of(&self, contract_id: Uuid) -> (Commission, Commission, Commission) {
        let rows: Vec<_> = self
            .store
            .commissions()
            .await
            .into_iter()
            .filter(|c| c.contract_id == contract_id)
            .collect();
        let control = rows
            .iter()
            .find(|c| c.is_control_record())
            .cloned()
            .unwrap();
        let part = |n: i32| {
            rows.iter()
                .find(|c| c.payment_part.map(|p| p.number()) == Some(n))
                .cloned()
                .unwrap()
        };
        (control, part(1), part(2))
    }

    pub async fn reload(&self, commission: &Commission) -> Commission {
        self.store.commission(commission.commission_id).await.unwrap()
    }
}
