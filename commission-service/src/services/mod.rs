//! Services module for commission-service.

pub mod admin;
pub mod database;
pub mod events;
pub mod generator;
pub mod memory;
pub mod metrics;
pub mod rates;
pub mod schedule;
pub mod status;
pub mod store;
pub mod sweep;
pub mod verification;

use crate::models::ScheduleNamespace;
use std::sync::Arc;

pub use admin::{CommissionAdmin, MarkPaidReport, RejectedCommission, SplitPaymentSummary};
pub use database::Database;
pub use events::{
    does_payment_affect_commission, event_channel, EventConsumer, EventOutcome, EventReactor,
    EventSender, EventSettings, InstallmentPaid,
};
pub use generator::{
    GenerationError, GenerationReport, GenerationSettings, SplitCommissionGenerator,
};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics, record_error};
pub use rates::{
    RateQuery, RateResolver, RateSource, RateStrategy, ResolvedRate, RuleEngineRateStrategy,
    TableRateStrategy,
};
pub use schedule::PaymentScheduleAdapter;
pub use status::{derive_status, DerivedStatus};
pub use store::{CommissionStore, CommissionTx, SchemeSource};
pub use sweep::{SweepError, SweepReport, SweepSettings, VerificationSweep};
pub use verification::{InstallmentCheck, PaymentVerificationEngine, VerificationOutcome};

/// Engine-wide settings, normally built from [`crate::config::CommissionConfig`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub generation: GenerationSettings,
    pub use_rule_engine: bool,
    pub schedule_order: Vec<ScheduleNamespace>,
    pub sweep: SweepSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            generation: GenerationSettings::default(),
            use_rule_engine: true,
            schedule_order: PaymentScheduleAdapter::default().order().to_vec(),
            sweep: SweepSettings::default(),
        }
    }
}

/// The engine's components wired to one store.
#[derive(Clone)]
pub struct CommissionServices {
    pub generator: SplitCommissionGenerator,
    pub verification: PaymentVerificationEngine,
    pub events: EventReactor,
    pub admin: CommissionAdmin,
    pub sweep: VerificationSweep,
}

impl CommissionServices {
    pub fn new(
        store: Arc<dyn CommissionStore>,
        schemes: Arc<dyn SchemeSource>,
        settings: EngineSettings,
    ) -> Self {
        let rates = if settings.use_rule_engine {
            RateResolver::with_rule_engine(schemes)
        } else {
            RateResolver::table_only()
        };
        let schedules = PaymentScheduleAdapter::new(settings.schedule_order);
        let verification = PaymentVerificationEngine::new(store.clone(), schedules);

        Self {
            generator: SplitCommissionGenerator::new(store.clone(), rates, settings.generation),
            sweep: VerificationSweep::new(store.clone(), verification.clone(), settings.sweep),
            verification,
            events: EventReactor::new(store.clone()),
            admin: CommissionAdmin::new(store),
        }
    }

    /// Services backed by an in-process store, which also serves the rule engine.
    pub fn in_memory(store: MemoryStore, settings: EngineSettings) -> Self {
        let store = Arc::new(store);
        Self::new(store.clone(), store, settings)
    }
}
