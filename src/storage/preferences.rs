use anyhow::Result;

use super::schema::Database;

impl Database {
    // ========================================================================
    // Stored Preference Overrides
    // ========================================================================

    /// Stored value for one dotted key (`recents.view_mode`), if any.
    pub async fn preference(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM user_preferences WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    /// Every stored override under `prefix`, ordered by key.
    ///
    /// Matches on a literal prefix, so `recents.` never picks up
    /// `recents_old.*` keys.
    pub async fn preferences_under(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT key, value FROM user_preferences WHERE substr(key, 1, length(?)) = ? ORDER BY key",
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn save_preference(&self, key: &str, value: &str) -> Result<()> {
        self.save_preferences(&[(key, value)]).await
    }

    /// Upsert several overrides at once; either all land or none do.
    pub async fn save_preferences(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            sqlx::query(
                r#"
                INSERT INTO user_preferences (key, value, updated_at)
                VALUES (?, ?, datetime('now'))
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            )
            .bind(*key)
            .bind(*value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Drop every override under `prefix`. Returns how many were removed.
    pub async fn clear_preferences(&self, prefix: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM user_preferences WHERE substr(key, 1, length(?)) = ?")
            .bind(prefix)
            .bind(prefix)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
