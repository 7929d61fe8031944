//! Commission schemes and rules consulted by the rule-engine rate strategy.

use super::contract::SaleType;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Legacy term grouping: short is 12/24/36 months, long is 48/60 months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TermGroup {
    Short,
    Long,
}

impl TermGroup {
    pub const SHORT_TERM_MAX_MONTHS: i32 = 36;

    pub fn for_term(term_months: i32) -> Self {
        if term_months <= Self::SHORT_TERM_MAX_MONTHS {
            Self::Short
        } else {
            Self::Long
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RuleSaleType {
    Financed,
    Cash,
    Both,
}

impl RuleSaleType {
    pub fn matches(&self, sale_type: Option<SaleType>) -> bool {
        match (self, sale_type) {
            (Self::Both, _) | (_, None) => true,
            (Self::Financed, Some(SaleType::Financed)) => true,
            (Self::Cash, Some(SaleType::Cash)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CommissionScheme {
    pub scheme_id: Uuid,
    pub name: String,
    pub is_default: bool,
    pub is_active: bool,
    pub valid_from: NaiveDate,
    pub valid_to: Option<NaiveDate>,
}

impl CommissionScheme {
    pub fn is_valid_on(&self, date: NaiveDate) -> bool {
        self.is_active
            && self.valid_from <= date
            && self.valid_to.map(|end| date <= end).unwrap_or(true)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CommissionRule {
    pub rule_id: Uuid,
    pub scheme_id: Uuid,
    pub min_sales: i32,
    pub max_sales: Option<i32>,
    pub term_group: Option<TermGroup>,
    pub min_term_months: Option<i32>,
    pub max_term_months: Option<i32>,
    pub sale_type: RuleSaleType,
    pub percentage: Decimal,
    pub priority: i32,
    pub is_active: bool,
}

impl CommissionRule {
    pub fn covers_sales(&self, sales_count: i64) -> bool {
        sales_count >= self.min_sales as i64
            && self
                .max_sales
                .map(|max| sales_count <= max as i64)
                .unwrap_or(true)
    }

    /// An explicit month range takes precedence over the legacy term group.
    pub fn covers_term(&self, term_months: i32) -> bool {
        if self.min_term_months.is_some() || self.max_term_months.is_some() {
            return self.min_term_months.map(|min| term_months >= min).unwrap_or(true)
                && self.max_term_months.map(|max| term_months <= max).unwrap_or(true);
        }
        match self.term_group {
            Some(group) => TermGroup::for_term(term_months) == group,
            None => true,
        }
    }
}
