//! Order intent operations for the repository.

use crate::domain::{IntentStatus, OrderIntent, Symbol, TimeMs};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use super::{enum_col, opt_decimal_col, Repository};

const INTENT_COLUMNS: &str = r#"
    intent_id, position_id, account_id, symbol, intent_type, qty, order_type, limit_price,
    reason_code, action_key, status, error_message, created_ts, updated_ts
"#;

fn intent_from_row(row: &SqliteRow) -> Result<OrderIntent, sqlx::Error> {
    Ok(OrderIntent {
        intent_id: row.try_get("intent_id")?,
        position_id: row.try_get("position_id")?,
        account_id: row.try_get("account_id")?,
        symbol: Symbol::new(row.try_get::<String, _>("symbol")?),
        intent_type: enum_col(row, "intent_type")?,
        qty: row.try_get("qty")?,
        order_type: enum_col(row, "order_type")?,
        limit_price: opt_decimal_col(row, "limit_price")?,
        reason_code: enum_col(row, "reason_code")?,
        action_key: row.try_get("action_key")?,
        status: enum_col(row, "status")?,
        error_message: row.try_get("error_message")?,
        created_ts: TimeMs::new(row.try_get("created_ts")?),
        updated_ts: TimeMs::new(row.try_get("updated_ts")?),
    })
}

impl Repository {
    /// Insert an intent idempotently on its action key.
    ///
    /// A CANCELLED intent releases its key: the old row is kept under a
    /// retired key and the new intent takes the original one. Returns false
    /// when a live or otherwise terminal intent already holds the key.
    ///
    /// # Errors
    /// Returns an error if the insert fails for any other reason; the
    /// transaction is rolled back.
    pub async fn insert_intent(&self, intent: &OrderIntent) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let retired = sqlx::query(
            r#"
            UPDATE order_intents
            SET action_key = action_key || ':retired:' || intent_id
            WHERE action_key = ? AND status = 'CANCELLED'
            "#,
        )
        .bind(&intent.action_key)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let result = sqlx::query(
            r#"
            INSERT INTO order_intents
            (intent_id, position_id, account_id, symbol, intent_type, qty, order_type, limit_price,
             reason_code, action_key, status, error_message, created_ts, updated_ts)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(action_key) DO NOTHING
            "#,
        )
        .bind(&intent.intent_id)
        .bind(&intent.position_id)
        .bind(&intent.account_id)
        .bind(intent.symbol.as_str())
        .bind(intent.intent_type.as_str())
        .bind(intent.qty)
        .bind(intent.order_type.as_str())
        .bind(intent.limit_price.map(|p| p.to_canonical_string()))
        .bind(intent.reason_code.as_str())
        .bind(&intent.action_key)
        .bind(intent.status.as_str())
        .bind(intent.error_message.as_deref())
        .bind(intent.created_ts.as_i64())
        .bind(intent.updated_ts.as_i64())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        if retired > 0 {
            debug!(action_key = %intent.action_key, "Re-armed action key held by cancelled intent");
        }
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_intent(&self, intent_id: &str) -> Result<Option<OrderIntent>, sqlx::Error> {
        let sql = format!("SELECT {} FROM order_intents WHERE intent_id = ?", INTENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(intent_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(intent_from_row).transpose()
    }

    pub async fn get_intent_by_action_key(
        &self,
        action_key: &str,
    ) -> Result<Option<OrderIntent>, sqlx::Error> {
        let sql = format!("SELECT {} FROM order_intents WHERE action_key = ?", INTENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(action_key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(intent_from_row).transpose()
    }

    /// Intents in one status, oldest first.
    pub async fn load_intents_by_status(
        &self,
        status: IntentStatus,
    ) -> Result<Vec<OrderIntent>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM order_intents WHERE status = ? ORDER BY created_ts ASC, intent_id ASC",
            INTENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(intent_from_row).collect()
    }

    /// NEW, PENDING_APPROVAL and SUBMITTED intents of a position.
    pub async fn active_intents_for_position(
        &self,
        position_id: &str,
    ) -> Result<Vec<OrderIntent>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {} FROM order_intents
            WHERE position_id = ? AND status IN ('NEW', 'PENDING_APPROVAL', 'SUBMITTED')
            ORDER BY created_ts ASC, intent_id ASC
            "#,
            INTENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(position_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(intent_from_row).collect()
    }

    pub async fn list_intents_for_position(
        &self,
        position_id: &str,
    ) -> Result<Vec<OrderIntent>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM order_intents WHERE position_id = ? ORDER BY created_ts DESC, intent_id DESC",
            INTENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(position_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(intent_from_row).collect()
    }

    /// Position ids holding more than one active intent.
    pub async fn positions_with_multiple_active_intents(&self) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT position_id FROM order_intents
            WHERE status IN ('NEW', 'PENDING_APPROVAL', 'SUBMITTED')
            GROUP BY position_id
            HAVING COUNT(*) > 1
            ORDER BY position_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|row| row.try_get("position_id")).collect()
    }

    /// Most recent SUBMITTED or FILLED exit intent of a position created at or after `since`.
    pub async fn recent_exit_intent(
        &self,
        position_id: &str,
        since: TimeMs,
    ) -> Result<Option<OrderIntent>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {} FROM order_intents
            WHERE position_id = ?
              AND intent_type IN ('EXIT_PARTIAL', 'EXIT_FULL')
              AND status IN ('SUBMITTED', 'FILLED')
              AND created_ts >= ?
            ORDER BY created_ts DESC, intent_id DESC
            LIMIT 1
            "#,
            INTENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(position_id)
            .bind(since.as_i64())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(intent_from_row).transpose()
    }

    /// Compare-and-set an intent's status from one of `from`.
    ///
    /// Returns false when the intent is not in any of the expected statuses.
    pub async fn transition_intent_status(
        &self,
        intent_id: &str,
        from: &[IntentStatus],
        to: IntentStatus,
        error_message: Option<&str>,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        if from.is_empty() {
            return Ok(false);
        }
        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            r#"
            UPDATE order_intents
            SET status = ?, error_message = COALESCE(?, error_message), updated_ts = ?
            WHERE intent_id = ? AND status IN ({})
            "#,
            placeholders
        );
        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(error_message)
            .bind(now.as_i64())
            .bind(intent_id);
        for status in from {
            query = query.bind(status.as_str());
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{seed_position, setup_test_db};
    use super::*;
    use crate::domain::{action_key, ExitPhase, IntentType, OrderType, ReasonCode};

    fn exit_intent(position_id: &str, reason: ReasonCode, status: IntentStatus, ts: i64) -> OrderIntent {
        OrderIntent::new(
            position_id,
            "acct-1",
            Symbol::new("005930"),
            IntentType::ExitPartial,
            10,
            OrderType::Mkt,
            None,
            reason,
            action_key(position_id, ExitPhase::Open, reason),
            status,
            TimeMs::new(ts),
        )
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_on_action_key() {
        let (repo, _temp) = setup_test_db().await;
        let p = seed_position(&repo, "005930", 100, "70000").await;

        let first = exit_intent(&p.position_id, ReasonCode::Tp1, IntentStatus::New, 1);
        let second = exit_intent(&p.position_id, ReasonCode::Tp1, IntentStatus::New, 2);
        assert!(repo.insert_intent(&first).await.unwrap());
        assert!(!repo.insert_intent(&second).await.unwrap());

        let all = repo.list_intents_for_position(&p.position_id).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].intent_id, first.intent_id);
    }

    #[tokio::test]
    async fn test_cancelled_intent_releases_action_key() {
        let (repo, _temp) = setup_test_db().await;
        let p = seed_position(&repo, "005930", 100, "70000").await;

        let first = exit_intent(&p.position_id, ReasonCode::Sl2, IntentStatus::New, 1);
        repo.insert_intent(&first).await.unwrap();
        repo.transition_intent_status(
            &first.intent_id,
            &[IntentStatus::New],
            IntentStatus::Cancelled,
            Some("loss recovered"),
            TimeMs::new(2),
        )
        .await
        .unwrap();

        let second = exit_intent(&p.position_id, ReasonCode::Sl2, IntentStatus::New, 3);
        assert!(repo.insert_intent(&second).await.unwrap());

        let holder = repo
            .get_intent_by_action_key(&second.action_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(holder.intent_id, second.intent_id);
        let retired = repo.get_intent(&first.intent_id).await.unwrap().unwrap();
        assert_eq!(retired.status, IntentStatus::Cancelled);
        assert_ne!(retired.action_key, second.action_key);

        // a live holder still blocks
        let third = exit_intent(&p.position_id, ReasonCode::Sl2, IntentStatus::New, 4);
        assert!(!repo.insert_intent(&third).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_intent_keeps_action_key() {
        let (repo, _temp) = setup_test_db().await;
        let p = seed_position(&repo, "005930", 100, "70000").await;
        let failed = exit_intent(&p.position_id, ReasonCode::Sl2, IntentStatus::Failed, 1);
        repo.insert_intent(&failed).await.unwrap();

        let again = exit_intent(&p.position_id, ReasonCode::Sl2, IntentStatus::New, 2);
        assert!(!repo.insert_intent(&again).await.unwrap());
    }

    #[tokio::test]
    async fn test_transition_requires_expected_status() {
        let (repo, _temp) = setup_test_db().await;
        let p = seed_position(&repo, "005930", 100, "70000").await;
        let intent = exit_intent(&p.position_id, ReasonCode::Sl1, IntentStatus::New, 1);
        repo.insert_intent(&intent).await.unwrap();

        assert!(!repo
            .transition_intent_status(
                &intent.intent_id,
                &[IntentStatus::Submitted],
                IntentStatus::Filled,
                None,
                TimeMs::new(2)
            )
            .await
            .unwrap());
        assert!(repo
            .transition_intent_status(
                &intent.intent_id,
                &[IntentStatus::New],
                IntentStatus::Failed,
                Some("rejected"),
                TimeMs::new(2)
            )
            .await
            .unwrap());

        let loaded = repo.get_intent(&intent.intent_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, IntentStatus::Failed);
        assert_eq!(loaded.error_message.as_deref(), Some("rejected"));
    }

    #[tokio::test]
    async fn test_recent_exit_intent_window() {
        let (repo, _temp) = setup_test_db().await;
        let p = seed_position(&repo, "005930", 100, "70000").await;
        repo.insert_intent(&exit_intent(&p.position_id, ReasonCode::Tp1, IntentStatus::Filled, 100))
            .await
            .unwrap();
        repo.insert_intent(&exit_intent(&p.position_id, ReasonCode::Tp2, IntentStatus::Submitted, 200))
            .await
            .unwrap();
        repo.insert_intent(&exit_intent(&p.position_id, ReasonCode::Sl1, IntentStatus::Failed, 300))
            .await
            .unwrap();

        let found = repo
            .recent_exit_intent(&p.position_id, TimeMs::new(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.reason_code, ReasonCode::Tp2);
        assert!(repo
            .recent_exit_intent(&p.position_id, TimeMs::new(250))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_positions_with_multiple_active_intents() {
        let (repo, _temp) = setup_test_db().await;
        let a = seed_position(&repo, "A", 100, "100").await;
        let b = seed_position(&repo, "B", 100, "100").await;
        repo.insert_intent(&exit_intent(&a.position_id, ReasonCode::Tp1, IntentStatus::New, 1))
            .await
            .unwrap();
        repo.insert_intent(&exit_intent(&a.position_id, ReasonCode::Sl2, IntentStatus::New, 2))
            .await
            .unwrap();
        repo.insert_intent(&exit_intent(&b.position_id, ReasonCode::Tp1, IntentStatus::New, 1))
            .await
            .unwrap();
        repo.insert_intent(&exit_intent(&b.position_id, ReasonCode::Sl2, IntentStatus::Cancelled, 2))
            .await
            .unwrap();

        assert_eq!(
            repo.positions_with_multiple_active_intents().await.unwrap(),
            vec![a.position_id]
        );
    }
}
