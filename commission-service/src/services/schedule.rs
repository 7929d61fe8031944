//! Installment plan lookup across the collaborator namespaces.

use crate::models::{PaymentScheduleItem, ScheduleNamespace};
use crate::services::store::CommissionTx;
use service_core::error::AppError;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Consults the configured namespaces in order; the first non-empty one wins.
#[derive(Debug, Clone)]
pub struct PaymentScheduleAdapter {
    order: Vec<ScheduleNamespace>,
}

impl Default for PaymentScheduleAdapter {
    fn default() -> Self {
        Self::new(vec![ScheduleNamespace::Collections, ScheduleNamespace::Sales])
    }
}

impl PaymentScheduleAdapter {
    pub fn new(order: Vec<ScheduleNamespace>) -> Self {
        Self { order }
    }

    pub fn order(&self) -> &[ScheduleNamespace] {
        &self.order
    }

    #[instrument(skip(self, tx), fields(contract_id = %contract_id))]
    pub async fn get_schedule(
        &self,
        tx: &mut dyn CommissionTx,
        contract_id: Uuid,
    ) -> Result<Vec<PaymentScheduleItem>, AppError> {
        for namespace in &self.order {
            let items = tx.list_schedule(*namespace, contract_id).await?;
            if !items.is_empty() {
                debug!(namespace = namespace.as_str(), items = items.len(), "Payment schedule found");
                return Ok(items);
            }
        }
        Ok(Vec::new())
    }

    pub async fn has_payment_schedule(
        &self,
        tx: &mut dyn CommissionTx,
        contract_id: Uuid,
    ) -> Result<bool, AppError> {
        Ok(!self.get_schedule(tx, contract_id).await?.is_empty())
    }
}
