//! Commission rate resolution.
//!
//! Rates come from an optional rule-engine strategy backed by commission
//! schemes, with the fixed sales-count tier table as the fallback. The
//! resolver never fails: any rule-engine miss or error falls back to the table.

use crate::models::{CommissionRule, CommissionScheme, SaleType, TermGroup};
use crate::services::metrics::record_rate_fallback;
use crate::services::store::SchemeSource;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Input for a rate lookup.
#[derive(Debug, Clone)]
pub struct RateQuery {
    /// Financed sales the employee closed in the signing month.
    pub sales_count: i64,
    pub term_months: i32,
    pub sale_type: Option<SaleType>,
    /// Date the scheme must be valid on. Defaults to today.
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RateSource {
    Table,
    Rule { scheme_id: Uuid, rule_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedRate {
    /// Percentage of the financed amount, e.g. 4.20.
    pub percentage: Decimal,
    pub source: RateSource,
}

/// One way of turning a [`RateQuery`] into a percentage.
#[async_trait]
pub trait RateStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` when the strategy has no opinion for this query.
    async fn resolve(&self, query: &RateQuery) -> Result<Option<ResolvedRate>, AppError>;
}

/// Fixed sales-count tier by term group table.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableRateStrategy;

impl TableRateStrategy {
    pub fn rate(sales_count: i64, term_months: i32) -> Decimal {
        let (short, long) = if sales_count >= 10 {
            (Decimal::new(420, 2), Decimal::new(300, 2))
        } else if sales_count >= 8 {
            (Decimal::new(400, 2), Decimal::new(250, 2))
        } else if sales_count >= 6 {
            (Decimal::new(300, 2), Decimal::new(150, 2))
        } else {
            (Decimal::new(200, 2), Decimal::new(100, 2))
        };

        match TermGroup::for_term(term_months) {
            TermGroup::Short => short,
            TermGroup::Long => long,
        }
    }
}

#[async_trait]
impl RateStrategy for TableRateStrategy {
    fn name(&self) -> &'static str {
        "table"
    }

    async fn resolve(&self, query: &RateQuery) -> Result<Option<ResolvedRate>, AppError> {
        Ok(Some(ResolvedRate {
            percentage: Self::rate(query.sales_count, query.term_months),
            source: RateSource::Table,
        }))
    }
}

/// Rates configured as commission schemes and rules.
pub struct RuleEngineRateStrategy {
    source: Arc<dyn SchemeSource>,
}

impl RuleEngineRateStrategy {
    pub fn new(source: Arc<dyn SchemeSource>) -> Self {
        Self { source }
    }

    /// Active scheme valid on `date`, default-flagged first, then most recent.
    fn select_scheme(schemes: &[CommissionScheme], date: NaiveDate) -> Option<&CommissionScheme> {
        schemes
            .iter()
            .filter(|s| s.is_valid_on(date))
            .max_by(|a, b| {
                (a.is_default, a.valid_from)
                    .cmp(&(b.is_default, b.valid_from))
                    .then_with(|| b.scheme_id.cmp(&a.scheme_id))
            })
    }

    /// Highest-priority active rule covering the query.
    fn select_rule<'a>(rules: &'a [CommissionRule], query: &RateQuery) -> Option<&'a CommissionRule> {
        rules
            .iter()
            .filter(|r| {
                r.is_active
                    && r.covers_sales(query.sales_count)
                    && r.covers_term(query.term_months)
                    && r.sale_type.matches(query.sale_type)
            })
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.rule_id.cmp(&a.rule_id))
            })
    }
}

#[async_trait]
impl RateStrategy for RuleEngineRateStrategy {
    fn name(&self) -> &'static str {
        "rule_engine"
    }

    #[instrument(skip(self), fields(sales_count = query.sales_count, term_months = query.term_months))]
    async fn resolve(&self, query: &RateQuery) -> Result<Option<ResolvedRate>, AppError> {
        let as_of = query.as_of.unwrap_or_else(|| Utc::now().date_naive());

        let schemes = self.source.list_schemes().await?;
        let Some(scheme) = Self::select_scheme(&schemes, as_of) else {
            debug!(as_of = %as_of, "No commission scheme valid");
            return Ok(None);
        };

        let rules = self.source.list_rules(scheme.scheme_id).await?;
        let Some(rule) = Self::select_rule(&rules, query) else {
            debug!(scheme_id = %scheme.scheme_id, "No commission rule matched");
            return Ok(None);
        };

        if rule.percentage < Decimal::ZERO || rule.percentage > Decimal::ONE_HUNDRED {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "Rule {} has out of range percentage {}",
                rule.rule_id,
                rule.percentage
            )));
        }

        Ok(Some(ResolvedRate {
            percentage: rule.percentage,
            source: RateSource::Rule {
                scheme_id: scheme.scheme_id,
                rule_id: rule.rule_id,
            },
        }))
    }
}

/// Rule engine first, table second.
#[derive(Clone)]
pub struct RateResolver {
    primary: Option<Arc<dyn RateStrategy>>,
}

impl RateResolver {
    /// Resolver that only consults the table.
    pub fn table_only() -> Self {
        Self { primary: None }
    }

    pub fn with_primary(primary: Arc<dyn RateStrategy>) -> Self {
        Self {
            primary: Some(primary),
        }
    }

    pub fn with_rule_engine(source: Arc<dyn SchemeSource>) -> Self {
        Self::with_primary(Arc::new(RuleEngineRateStrategy::new(source)))
    }

    #[instrument(skip(self), fields(sales_count = query.sales_count, term_months = query.term_months))]
    pub async fn resolve(&self, query: &RateQuery) -> ResolvedRate {
        if let Some(primary) = &self.primary {
            match primary.resolve(query).await {
                Ok(Some(rate)) => return rate,
                Ok(None) => {
                    debug!(strategy = primary.name(), "No rate matched, using rate table");
                    record_rate_fallback("no_match");
                }
                Err(e) => {
                    warn!(strategy = primary.name(), error = %e, "Rate lookup failed, using rate table");
                    record_rate_fallback("error");
                }
            }
        }

        ResolvedRate {
            percentage: TableRateStrategy::rate(query.sales_count, query.term_months),
            source: RateSource::Table,
        }
    }
}
