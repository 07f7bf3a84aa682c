//! Run-history index backed by SQLite. The full run state travels as JSON
//! in one column; the indexed columns exist for inspection queries.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;

use screener_core::{RunState, ScreenerError};

pub struct RunStateStore {
    pool: sqlx::SqlitePool,
}

impl RunStateStore {
    pub async fn open(cache_path: &Path) -> Result<Self, ScreenerError> {
        std::fs::create_dir_all(cache_path)
            .map_err(|e| ScreenerError::Database(e.to_string()))?;
        let db_path = cache_path.join("run_state.sqlite");

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(|e| ScreenerError::Database(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                status TEXT NOT NULL,
                phase TEXT NOT NULL,
                state_json TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| ScreenerError::Database(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Upsert the current run state. Called at every phase boundary.
    pub async fn checkpoint(&self, state: &RunState) -> Result<(), ScreenerError> {
        let json = serde_json::to_string(state)
            .map_err(|e| ScreenerError::Database(e.to_string()))?;

        sqlx::query(
            "INSERT OR REPLACE INTO runs
                (run_id, started_at, finished_at, status, phase, state_json)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&state.run_id)
        .bind(state.started_at.to_rfc3339())
        .bind(state.finished_at.map(|t| t.to_rfc3339()))
        .bind(state.status.as_str())
        .bind(state.phase.as_str())
        .bind(&json)
        .execute(&self.pool)
        .await
        .map_err(|e| ScreenerError::Database(e.to_string()))?;

        Ok(())
    }

    pub async fn load(&self, run_id: &str) -> Result<Option<RunState>, ScreenerError> {
        let row = sqlx::query("SELECT state_json FROM runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ScreenerError::Database(e.to_string()))?;

        match row {
            Some(row) => {
                let json: String = row
                    .try_get("state_json")
                    .map_err(|e| ScreenerError::Database(e.to_string()))?;
                let state = serde_json::from_str(&json)
                    .map_err(|e| ScreenerError::Database(e.to_string()))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    /// Most recent run ids with status, newest first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<(String, String)>, ScreenerError> {
        let rows = sqlx::query(
            "SELECT run_id, status FROM runs ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ScreenerError::Database(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let id: String = row
                    .try_get("run_id")
                    .map_err(|e| ScreenerError::Database(e.to_string()))?;
                let status: String = row
                    .try_get("status")
                    .map_err(|e| ScreenerError::Database(e.to_string()))?;
                Ok((id, status))
            })
            .collect()
    }
}
