//! Transaction persistence
//!
//! Business fields and verdict fields have separate writers, so every update
//! here names only the columns its writer owns. No statement rewrites the
//! whole row.

use crate::error::{FraudError, FraudResult};
use crate::pagination::{Page, PageRequest};
use crate::verdict::FraudVerdict;
use chrono::{DateTime, Utc};
use finsys_common::db::{ScoringState, TransactionDraft, TransactionRecord};
use finsys_common::time;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};

const SELECT_COLUMNS: &str = r#"
    SELECT id, type, amount, name_orig, old_balance_orig, new_balance_orig,
           name_dest, old_balance_dest, new_balance_dest, is_fraud,
           fraud_probability, scoring_state, is_deleted, created_at, updated_at
    FROM transactions
"#;

/// Optional filters for [`TransactionRepository::list`]
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub tx_type: Option<String>,
    /// Inclusive lower bound on `created_at`
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`
    pub created_to: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct TransactionRepository {
    pool: SqlitePool,
}

impl TransactionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert one validated draft
    pub async fn create(&self, draft: &TransactionDraft) -> FraudResult<TransactionRecord> {
        draft.validate()?;
        let mut conn = self.pool.acquire().await?;
        let now = time::now();
        let id = insert_draft(&mut conn, draft, now).await?;
        Ok(record_from_draft(id, draft, now))
    }

    /// Insert drafts in one relational transaction; all or nothing
    pub async fn create_batch(
        &self,
        drafts: &[TransactionDraft],
    ) -> FraudResult<Vec<TransactionRecord>> {
        for draft in drafts {
            draft.validate()?;
        }

        let mut tx = self.pool.begin().await?;
        let now = time::now();
        let mut records = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let id = insert_draft(&mut tx, draft, now).await?;
            records.push(record_from_draft(id, draft, now));
        }
        tx.commit().await?;

        Ok(records)
    }

    /// Live (not soft-deleted) transaction by id
    pub async fn find_by_id(&self, id: i64) -> FraudResult<Option<TransactionRecord>> {
        let sql = format!("{} WHERE id = ? AND is_deleted = 0", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_record(&r)).transpose()
    }

    /// Like [`find_by_id`](Self::find_by_id) but absent is an error
    pub async fn get(&self, id: i64) -> FraudResult<TransactionRecord> {
        self.find_by_id(id)
            .await?
            .ok_or(FraudError::TransactionNotFound(id))
    }

    /// Overwrite business fields only; verdict columns are untouched
    pub async fn update_business_fields(
        &self,
        id: i64,
        draft: &TransactionDraft,
    ) -> FraudResult<TransactionRecord> {
        draft.validate()?;

        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET type = ?, amount = ?, name_orig = ?, old_balance_orig = ?,
                new_balance_orig = ?, name_dest = ?, old_balance_dest = ?,
                new_balance_dest = ?, updated_at = ?
            WHERE id = ? AND is_deleted = 0
            "#,
        )
        .bind(&draft.tx_type)
        .bind(draft.amount)
        .bind(&draft.name_orig)
        .bind(draft.old_balance_orig)
        .bind(draft.new_balance_orig)
        .bind(&draft.name_dest)
        .bind(draft.old_balance_dest)
        .bind(draft.new_balance_dest)
        .bind(time::to_millis(time::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(FraudError::TransactionNotFound(id));
        }
        self.get(id).await
    }

    /// Enter the `scoring` state; false if the row is gone
    pub async fn mark_scoring(&self, id: i64) -> FraudResult<bool> {
        let result = sqlx::query(
            "UPDATE transactions SET scoring_state = ? WHERE id = ? AND is_deleted = 0",
        )
        .bind(ScoringState::Scoring.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Return a row stuck in `scoring` to `unscored`
    pub async fn reset_scoring(&self, id: i64) -> FraudResult<()> {
        sqlx::query("UPDATE transactions SET scoring_state = ? WHERE id = ? AND scoring_state = ?")
            .bind(ScoringState::Unscored.as_str())
            .bind(id)
            .bind(ScoringState::Scoring.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Write verdict columns only; false if the row was deleted meanwhile
    pub async fn apply_verdict(&self, id: i64, verdict: &FraudVerdict) -> FraudResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET is_fraud = ?, fraud_probability = ?, scoring_state = ?, updated_at = ?
            WHERE id = ? AND is_deleted = 0
            "#,
        )
        .bind(verdict.is_fraud)
        .bind(verdict.fraud_probability)
        .bind(verdict.source.scoring_state().as_str())
        .bind(time::to_millis(time::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn soft_delete(&self, id: i64) -> FraudResult<()> {
        let now = time::to_millis(time::now());
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET is_deleted = 1, deleted_at = ?, updated_at = ?
            WHERE id = ? AND is_deleted = 0
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(FraudError::TransactionNotFound(id));
        }
        Ok(())
    }

    /// Live transactions, newest first
    pub async fn list(
        &self,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> FraudResult<Page<TransactionRecord>> {
        let mut count_query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM transactions");
        push_filter(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_COLUMNS);
        push_filter(&mut query, filter);
        query.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        query.push_bind(page.size());
        query.push(" OFFSET ");
        query.push_bind(page.offset());

        let rows = query.build().fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(row_to_record)
            .collect::<FraudResult<Vec<_>>>()?;

        Ok(Page::new(page, total, items))
    }
}

fn push_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &TransactionFilter) {
    query.push(" WHERE is_deleted = 0");
    if let Some(tx_type) = &filter.tx_type {
        query.push(" AND type = ");
        query.push_bind(tx_type.clone());
    }
    if let Some(from) = filter.created_from {
        query.push(" AND created_at >= ");
        query.push_bind(time::to_millis(from));
    }
    if let Some(to) = filter.created_to {
        query.push(" AND created_at < ");
        query.push_bind(time::to_millis(to));
    }
}

/// Pre-labelled drafts store their label with a sentinel probability
fn initial_verdict(draft: &TransactionDraft) -> (bool, f64) {
    match draft.is_fraud {
        Some(true) => (true, 1.0),
        Some(false) | None => (false, 0.0),
    }
}

async fn insert_draft(
    conn: &mut SqliteConnection,
    draft: &TransactionDraft,
    now: DateTime<Utc>,
) -> FraudResult<i64> {
    let (is_fraud, fraud_probability) = initial_verdict(draft);
    let millis = time::to_millis(now);

    let result = sqlx::query(
        r#"
        INSERT INTO transactions (
            type, amount, name_orig, old_balance_orig, new_balance_orig,
            name_dest, old_balance_dest, new_balance_dest, is_fraud,
            fraud_probability, scoring_state, is_deleted, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(&draft.tx_type)
    .bind(draft.amount)
    .bind(&draft.name_orig)
    .bind(draft.old_balance_orig)
    .bind(draft.new_balance_orig)
    .bind(&draft.name_dest)
    .bind(draft.old_balance_dest)
    .bind(draft.new_balance_dest)
    .bind(is_fraud)
    .bind(fraud_probability)
    .bind(ScoringState::Unscored.as_str())
    .bind(millis)
    .bind(millis)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

fn record_from_draft(id: i64, draft: &TransactionDraft, now: DateTime<Utc>) -> TransactionRecord {
    let (is_fraud, fraud_probability) = initial_verdict(draft);
    TransactionRecord {
        id,
        tx_type: draft.tx_type.clone(),
        amount: draft.amount,
        name_orig: draft.name_orig.clone(),
        old_balance_orig: draft.old_balance_orig,
        new_balance_orig: draft.new_balance_orig,
        name_dest: draft.name_dest.clone(),
        old_balance_dest: draft.old_balance_dest,
        new_balance_dest: draft.new_balance_dest,
        is_fraud,
        fraud_probability,
        scoring_state: ScoringState::Unscored,
        is_deleted: false,
        created_at: now,
        updated_at: now,
    }
}

fn row_to_record(row: &SqliteRow) -> FraudResult<TransactionRecord> {
    let state: String = row.try_get("scoring_state")?;
    Ok(TransactionRecord {
        id: row.try_get("id")?,
        tx_type: row.try_get("type")?,
        amount: row.try_get("amount")?,
        name_orig: row.try_get("name_orig")?,
        old_balance_orig: row.try_get("old_balance_orig")?,
        new_balance_orig: row.try_get("new_balance_orig")?,
        name_dest: row.try_get("name_dest")?,
        old_balance_dest: row.try_get("old_balance_dest")?,
        new_balance_dest: row.try_get("new_balance_dest")?,
        is_fraud: row.try_get("is_fraud")?,
        fraud_probability: row.try_get("fraud_probability")?,
        scoring_state: state.parse::<ScoringState>()?,
        is_deleted: row.try_get("is_deleted")?,
        created_at: time::from_millis(row.try_get("created_at")?),
        updated_at: time::from_millis(row.try_get("updated_at")?),
    })
}
