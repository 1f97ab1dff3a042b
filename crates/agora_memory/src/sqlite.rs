use agora_core::{Episode, StateStore, EPISODE_CAP};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use std::path::Path;
use uuid::Uuid;

/// SQLite-backed agent memory: JSON sections in a key/value table plus a
/// pruned episode log.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_state (
                section TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create agent_state table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS episodes (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                kind TEXT NOT NULL,
                data TEXT NOT NULL,
                at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create episodes table")?;

        Ok(())
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn save_section(&self, name: &str, body: &Value) -> Result<()> {
        let text = serde_json::to_string(body).context("Failed to encode state section")?;
        sqlx::query(
            r#"
            INSERT INTO agent_state (section, body, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(section) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(text)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save state section '{}'", name))?;
        Ok(())
    }

    async fn load_section(&self, name: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT body FROM agent_state WHERE section = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to load state section '{}'", name))?;
        match row {
            Some(row) => {
                let body: String = row.get("body");
                let value = serde_json::from_str(&body)
                    .with_context(|| format!("Corrupt state section '{}'", name))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn record_episode(&self, episode: &Episode) -> Result<()> {
        sqlx::query("INSERT INTO episodes (id, kind, data, at) VALUES (?, ?, ?, ?)")
            .bind(episode.id.to_string())
            .bind(&episode.kind)
            .bind(serde_json::to_string(&episode.data)?)
            .bind(episode.at.timestamp_millis())
            .execute(&self.pool)
            .await
            .context("Failed to record episode")?;

        sqlx::query(
            "DELETE FROM episodes WHERE seq NOT IN (SELECT seq FROM episodes ORDER BY seq DESC LIMIT ?)",
        )
        .bind(EPISODE_CAP as i64)
        .execute(&self.pool)
        .await
        .context("Failed to prune episodes")?;
        Ok(())
    }

    async fn recent_episodes(&self, limit: usize) -> Result<Vec<Episode>> {
        let rows = sqlx::query("SELECT id, kind, data, at FROM episodes ORDER BY seq DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load episodes")?;

        let mut episodes = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let data: String = row.get("data");
            let at: i64 = row.get("at");
            episodes.push(Episode {
                id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::new_v4()),
                kind: row.get("kind"),
                data: serde_json::from_str(&data).unwrap_or(Value::Null),
                at: Utc.timestamp_millis_opt(at).single().unwrap_or_else(Utc::now),
            });
        }
        Ok(episodes)
    }
}
