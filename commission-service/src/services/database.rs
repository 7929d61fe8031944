//! Database service for commission-service.

use crate::models::{
    AccountReceivable, Commission, CommissionPaymentVerification, CommissionRule,
    CommissionScheme, Contract, CustomerPayment, Installment, NewVerification,
    PaymentScheduleItem, ScheduleNamespace, VerificationRecordStatus,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{CommissionStore, CommissionTx, SchemeSource};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const COMMISSION_COLUMNS: &str = "commission_id, parent_commission_id, employee_id, contract_id, payment_part, payment_type, is_payable, commission_percentage, commission_amount, total_commission_amount, split_percentage, sales_count, period_month, period_year, commission_period, payment_period, status, payment_status, payment_date, requires_client_payment_verification, payment_dependency_type, payment_verification_status, is_eligible_for_payment, first_payment_verified_at, second_payment_verified_at, verification_notes, verified_payments_count, created_utc, updated_utc";

const VERIFICATION_COLUMNS: &str = "verification_id, commission_id, payment_installment, customer_payment_id, ar_id, verification_status, verification_date, verified_amount, verified_by, verification_method, notes, created_utc, updated_utc";

fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |e| AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

fn rows_found(rows_affected: u64, commission_id: Uuid) -> Result<(), AppError> {
    if rows_affected == 0 {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Commission {} not found",
            commission_id
        )));
    }
    Ok(())
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "commission-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl CommissionStore for Database {
    async fn begin(&self) -> Result<Box<dyn CommissionTx>, AppError> {
        let tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;
        Ok(Box::new(PgCommissionTx { tx }))
    }
}

#[async_trait]
impl SchemeSource for Database {
    #[instrument(skip(self))]
    async fn list_schemes(&self) -> Result<Vec<CommissionScheme>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_schemes"])
            .start_timer();

        let schemes = sqlx::query_as::<_, CommissionScheme>(
            r#"
            SELECT scheme_id, name, is_default, is_active, valid_from, valid_to
            FROM commission_schemes
            WHERE is_active = TRUE
            ORDER BY valid_from DESC, scheme_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list commission schemes"))?;

        timer.observe_duration();
        Ok(schemes)
    }

    #[instrument(skip(self), fields(scheme_id = %scheme_id))]
    async fn list_rules(&self, scheme_id: Uuid) -> Result<Vec<CommissionRule>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_rules"])
            .start_timer();

        let rules = sqlx::query_as::<_, CommissionRule>(
            r#"
            SELECT rule_id, scheme_id, min_sales, max_sales, term_group, min_term_months,
                   max_term_months, sale_type, percentage, priority, is_active
            FROM commission_rules
            WHERE scheme_id = $1
            ORDER BY priority DESC, rule_id
            "#,
        )
        .bind(scheme_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list commission rules"))?;

        timer.observe_duration();
        Ok(rules)
    }
}

/// PostgreSQL unit of work.
pub struct PgCommissionTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CommissionTx for PgCommissionTx {
    #[instrument(skip(self), fields(commission_id = %commission_id))]
    async fn get_commission(
        &mut self,
        commission_id: Uuid,
    ) -> Result<Option<Commission>, AppError> {
        let sql = format!("SELECT {COMMISSION_COLUMNS} FROM commissions WHERE commission_id = $1");
        sqlx::query_as::<_, Commission>(&sql)
            .bind(commission_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("Failed to get commission"))
    }

    #[instrument(skip(self), fields(commission_id = %commission_id))]
    async fn lock_commission(
        &mut self,
        commission_id: Uuid,
    ) -> Result<Option<Commission>, AppError> {
        let sql = format!(
            "SELECT {COMMISSION_COLUMNS} FROM commissions WHERE commission_id = $1 FOR UPDATE"
        );
        sqlx::query_as::<_, Commission>(&sql)
            .bind(commission_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("Failed to lock commission"))
    }

    #[instrument(skip(self), fields(contract_id = %contract_id, employee_id = %employee_id))]
    async fn find_control_record(
        &mut self,
        contract_id: Uuid,
        employee_id: Uuid,
        commission_period: &str,
    ) -> Result<Option<Commission>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_control_record"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {COMMISSION_COLUMNS}
            FROM commissions
            WHERE contract_id = $1 AND employee_id = $2 AND commission_period = $3
              AND parent_commission_id IS NULL
            "#
        );
        let control = sqlx::query_as::<_, Commission>(&sql)
            .bind(contract_id)
            .bind(employee_id)
            .bind(commission_period)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("Failed to find control record"))?;

        timer.observe_duration();
        Ok(control)
    }

    #[instrument(skip(self), fields(parent_id = %parent_id))]
    async fn list_children(&mut self, parent_id: Uuid) -> Result<Vec<Commission>, AppError> {
        let sql = format!(
            r#"
            SELECT {COMMISSION_COLUMNS}
            FROM commissions
            WHERE parent_commission_id = $1
            ORDER BY payment_part NULLS LAST, created_utc, commission_id
            "#
        );
        sqlx::query_as::<_, Commission>(&sql)
            .bind(parent_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error("Failed to list child commissions"))
    }

    #[instrument(skip(self), fields(contract_id = %contract_id))]
    async fn lock_unpaid_dependent_commissions(
        &mut self,
        contract_id: Uuid,
    ) -> Result<Vec<Commission>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["lock_unpaid_dependent_commissions"])
            .start_timer();

        // Rows paid by a concurrent payroll approval are re-checked after the
        // lock wait and drop out of the result.
        let sql = format!(
            r#"
            SELECT {COMMISSION_COLUMNS}
            FROM commissions
            WHERE contract_id = $1
              AND payment_dependency_type <> 'none'
              AND payment_status <> 'pagado'
            ORDER BY created_utc, commission_id
            FOR UPDATE
            "#
        );
        let rows = sqlx::query_as::<_, Commission>(&sql)
            .bind(contract_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error("Failed to list dependent commissions"))?;

        timer.observe_duration();
        Ok(rows)
    }

    #[instrument(skip(self))]
    async fn list_commissions_awaiting_verification(
        &mut self,
        limit: i64,
    ) -> Result<Vec<Uuid>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_commissions_awaiting_verification"])
            .start_timer();

        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT commission_id
            FROM commissions
            WHERE is_payable = TRUE
              AND payment_status = 'pendiente'
              AND requires_client_payment_verification = TRUE
              AND payment_verification_status <> 'fully_verified'
            ORDER BY created_utc, commission_id
            LIMIT $1
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error("Failed to list commissions awaiting verification"))?;

        timer.observe_duration();
        Ok(ids)
    }

    #[instrument(skip(self, commission), fields(commission_id = %commission.commission_id))]
    async fn insert_commission(&mut self, commission: &Commission) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_commission"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO commissions ({COMMISSION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29)
            "#
        );
        let result = sqlx::query(&sql)
            .bind(commission.commission_id)
            .bind(commission.parent_commission_id)
            .bind(commission.employee_id)
            .bind(commission.contract_id)
            .bind(commission.payment_part)
            .bind(commission.payment_type)
            .bind(commission.is_payable)
            .bind(commission.commission_percentage)
            .bind(commission.commission_amount)
            .bind(commission.total_commission_amount)
            .bind(commission.split_percentage)
            .bind(commission.sales_count)
            .bind(commission.period_month)
            .bind(commission.period_year)
            .bind(&commission.commission_period)
            .bind(&commission.payment_period)
            .bind(commission.status)
            .bind(commission.payment_status)
            .bind(commission.payment_date)
            .bind(commission.requires_client_payment_verification)
            .bind(commission.payment_dependency_type)
            .bind(commission.payment_verification_status)
            .bind(commission.is_eligible_for_payment)
            .bind(commission.first_payment_verified_at)
            .bind(commission.second_payment_verified_at)
            .bind(&commission.verification_notes)
            .bind(commission.verified_payments_count)
            .bind(commission.created_utc)
            .bind(commission.updated_utc)
            .execute(&mut *self.tx)
            .await;

        timer.observe_duration();

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                // Another run created the same control record or part first
                Err(AppError::Conflict(anyhow::anyhow!(
                    "Commission already exists for contract {} period {}",
                    commission.contract_id,
                    commission.commission_period
                )))
            }
            Err(e) => Err(AppError::DatabaseError(anyhow::anyhow!(
                "Failed to insert commission: {}",
                e
            ))),
        }
    }

    #[instrument(skip(self, commission), fields(commission_id = %commission.commission_id))]
    async fn save_verification_state(
        &mut self,
        commission: &Commission,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["save_verification_state"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE commissions
            SET payment_verification_status = $2,
                is_eligible_for_payment = $3,
                first_payment_verified_at = $4,
                second_payment_verified_at = $5,
                verification_notes = $6,
                verified_payments_count = $7,
                updated_utc = $8
            WHERE commission_id = $1
            "#,
        )
        .bind(commission.commission_id)
        .bind(commission.payment_verification_status)
        .bind(commission.is_eligible_for_payment)
        .bind(commission.first_payment_verified_at)
        .bind(commission.second_payment_verified_at)
        .bind(&commission.verification_notes)
        .bind(commission.verified_payments_count)
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("Failed to update commission verification"))?;

        timer.observe_duration();
        rows_found(result.rows_affected(), commission.commission_id)
    }

    #[instrument(skip(self, commission), fields(commission_id = %commission.commission_id))]
    async fn save_payment_state(&mut self, commission: &Commission) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["save_payment_state"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE commissions
            SET status = $2,
                payment_status = $3,
                payment_date = $4,
                updated_utc = $5
            WHERE commission_id = $1
            "#,
        )
        .bind(commission.commission_id)
        .bind(commission.status)
        .bind(commission.payment_status)
        .bind(commission.payment_date)
        .bind(Utc::now())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("Failed to update commission payment"))?;

        timer.observe_duration();
        rows_found(result.rows_affected(), commission.commission_id)
    }

    #[instrument(skip(self), fields(commission_id = %commission_id, installment = %installment))]
    async fn get_verification(
        &mut self,
        commission_id: Uuid,
        installment: Installment,
    ) -> Result<Option<CommissionPaymentVerification>, AppError> {
        let sql = format!(
            r#"
            SELECT {VERIFICATION_COLUMNS}
            FROM commission_payment_verifications
            WHERE commission_id = $1 AND payment_installment = $2
            "#
        );
        sqlx::query_as::<_, CommissionPaymentVerification>(&sql)
            .bind(commission_id)
            .bind(installment)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("Failed to get verification"))
    }

    #[instrument(skip(self), fields(verification_id = %verification_id))]
    async fn get_verification_by_id(
        &mut self,
        verification_id: Uuid,
    ) -> Result<Option<CommissionPaymentVerification>, AppError> {
        let sql = format!(
            "SELECT {VERIFICATION_COLUMNS} FROM commission_payment_verifications WHERE verification_id = $1"
        );
        sqlx::query_as::<_, CommissionPaymentVerification>(&sql)
            .bind(verification_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("Failed to get verification"))
    }

    #[instrument(skip(self), fields(commission_id = %commission_id))]
    async fn list_verifications(
        &mut self,
        commission_id: Uuid,
    ) -> Result<Vec<CommissionPaymentVerification>, AppError> {
        let sql = format!(
            r#"
            SELECT {VERIFICATION_COLUMNS}
            FROM commission_payment_verifications
            WHERE commission_id = $1
            ORDER BY payment_installment
            "#
        );
        sqlx::query_as::<_, CommissionPaymentVerification>(&sql)
            .bind(commission_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error("Failed to list verifications"))
    }

    #[instrument(
        skip(self, verification),
        fields(commission_id = %verification.commission_id, installment = %verification.installment)
    )]
    async fn upsert_verification(
        &mut self,
        verification: &NewVerification,
    ) -> Result<Option<CommissionPaymentVerification>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_verification"])
            .start_timer();

        // The WHERE clause on the conflict branch leaves verified rows alone,
        // so a replay returns no row instead of rewriting it.
        let sql = format!(
            r#"
            INSERT INTO commission_payment_verifications
                (verification_id, commission_id, payment_installment, customer_payment_id, ar_id,
                 verification_status, verification_date, verified_amount, verified_by,
                 verification_method, notes)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), $7, $8, $9, $10)
            ON CONFLICT (commission_id, payment_installment) DO UPDATE
            SET customer_payment_id = EXCLUDED.customer_payment_id,
                ar_id = EXCLUDED.ar_id,
                verification_status = EXCLUDED.verification_status,
                verification_date = EXCLUDED.verification_date,
                verified_amount = EXCLUDED.verified_amount,
                verified_by = EXCLUDED.verified_by,
                verification_method = EXCLUDED.verification_method,
                notes = EXCLUDED.notes,
                updated_utc = NOW()
            WHERE commission_payment_verifications.verification_status <> 'verified'
            RETURNING {VERIFICATION_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, CommissionPaymentVerification>(&sql)
            .bind(Uuid::new_v4())
            .bind(verification.commission_id)
            .bind(verification.installment)
            .bind(verification.customer_payment_id)
            .bind(verification.ar_id)
            .bind(VerificationRecordStatus::Verified)
            .bind(verification.verified_amount)
            .bind(&verification.verified_by)
            .bind(verification.method)
            .bind(&verification.notes)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error("Failed to upsert verification"))?;

        timer.observe_duration();
        Ok(record)
    }

    #[instrument(skip(self, verification), fields(verification_id = %verification.verification_id))]
    async fn save_verification(
        &mut self,
        verification: &CommissionPaymentVerification,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE commission_payment_verifications
            SET verification_status = $2,
                verification_date = $3,
                verified_by = $4,
                notes = $5,
                updated_utc = NOW()
            WHERE verification_id = $1
            "#,
        )
        .bind(verification.verification_id)
        .bind(verification.verification_status)
        .bind(verification.verification_date)
        .bind(&verification.verified_by)
        .bind(&verification.notes)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error("Failed to update verification"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Verification {} not found",
                verification.verification_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(contract_id = %contract_id))]
    async fn get_contract(&mut self, contract_id: Uuid) -> Result<Option<Contract>, AppError> {
        sqlx::query_as::<_, Contract>(
            r#"
            SELECT contract_id, advisor_id, financing_amount, term_months, sign_date, status
            FROM contracts
            WHERE contract_id = $1
            "#,
        )
        .bind(contract_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error("Failed to get contract"))
    }

    #[instrument(skip(self))]
    async fn list_contracts_signed_between(
        &mut self,
        from: NaiveDate,
        until_exclusive: NaiveDate,
    ) -> Result<Vec<Contract>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_contracts_signed_between"])
            .start_timer();

        let contracts = sqlx::query_as::<_, Contract>(
            r#"
            SELECT contract_id, advisor_id, financing_amount, term_months, sign_date, status
            FROM contracts
            WHERE sign_date >= $1 AND sign_date < $2
            ORDER BY sign_date, contract_id
            "#,
        )
        .bind(from)
        .bind(until_exclusive)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error("Failed to list contracts"))?;

        timer.observe_duration();
        Ok(contracts)
    }

    #[instrument(skip(self), fields(advisor_id = %advisor_id))]
    async fn count_financed_sales(
        &mut self,
        advisor_id: Uuid,
        from: NaiveDate,
        until_exclusive: NaiveDate,
    ) -> Result<i64, AppError> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM contracts
            WHERE advisor_id = $1
              AND financing_amount > 0
              AND LOWER(status) <> 'cancelled'
              AND sign_date >= $2 AND sign_date < $3
            "#,
        )
        .bind(advisor_id)
        .bind(from)
        .bind(until_exclusive)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error("Failed to count financed sales"))
    }

    #[instrument(skip(self), fields(ar_id = %ar_id))]
    async fn get_receivable(
        &mut self,
        ar_id: Uuid,
    ) -> Result<Option<AccountReceivable>, AppError> {
        sqlx::query_as::<_, AccountReceivable>(
            r#"
            SELECT ar_id, contract_id, due_date, original_amount, paid_amount, status
            FROM accounts_receivable
            WHERE ar_id = $1
            "#,
        )
        .bind(ar_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error("Failed to get receivable"))
    }

    #[instrument(skip(self), fields(contract_id = %contract_id))]
    async fn list_receivables(
        &mut self,
        contract_id: Uuid,
    ) -> Result<Vec<AccountReceivable>, AppError> {
        sqlx::query_as::<_, AccountReceivable>(
            r#"
            SELECT ar_id, contract_id, due_date, original_amount, paid_amount, status
            FROM accounts_receivable
            WHERE contract_id = $1
            ORDER BY due_date, ar_id
            "#,
        )
        .bind(contract_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error("Failed to list receivables"))
    }

    #[instrument(skip(self), fields(contract_id = %contract_id, due_date = %due_date))]
    async fn find_receivable(
        &mut self,
        contract_id: Uuid,
        due_date: NaiveDate,
        original_amount: Decimal,
    ) -> Result<Option<AccountReceivable>, AppError> {
        sqlx::query_as::<_, AccountReceivable>(
            r#"
            SELECT ar_id, contract_id, due_date, original_amount, paid_amount, status
            FROM accounts_receivable
            WHERE contract_id = $1 AND due_date = $2 AND original_amount = $3
            ORDER BY ar_id
            LIMIT 1
            "#,
        )
        .bind(contract_id)
        .bind(due_date)
        .bind(original_amount)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error("Failed to find receivable"))
    }

    #[instrument(skip(self), fields(ar_id = %ar_id))]
    async fn list_payments(
        &mut self,
        ar_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<Vec<CustomerPayment>, AppError> {
        sqlx::query_as::<_, CustomerPayment>(
            r#"
            SELECT payment_id, ar_id, amount, payment_date
            FROM customer_payments
            WHERE ar_id = $1 AND payment_date <= $2
            ORDER BY payment_date, payment_id
            "#,
        )
        .bind(ar_id)
        .bind(as_of)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error("Failed to list customer payments"))
    }

    #[instrument(skip(self), fields(payment_id = %payment_id))]
    async fn get_customer_payment(
        &mut self,
        payment_id: Uuid,
    ) -> Result<Option<CustomerPayment>, AppError> {
        sqlx::query_as::<_, CustomerPayment>(
            r#"
            SELECT payment_id, ar_id, amount, payment_date
            FROM customer_payments
            WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error("Failed to get customer payment"))
    }

    #[instrument(skip(self), fields(namespace = namespace.as_str(), contract_id = %contract_id))]
    async fn list_schedule(
        &mut self,
        namespace: ScheduleNamespace,
        contract_id: Uuid,
    ) -> Result<Vec<PaymentScheduleItem>, AppError> {
        let table = match namespace {
            ScheduleNamespace::Collections => "payment_schedules",
            ScheduleNamespace::Sales => "sales_payment_schedules",
        };
        let sql = format!(
            r#"
            SELECT schedule_id, contract_id, installment_number, due_date, amount
            FROM {table}
            WHERE contract_id = $1
            ORDER BY installment_number
            "#
        );
        sqlx::query_as::<_, PaymentScheduleItem>(&sql)
            .bind(contract_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error("Failed to list payment schedule"))
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.tx.rollback().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to roll back transaction: {}", e))
        })
    }
}
