//! # PostgreSQL repository
//!
//! Durable source of truth: leaderboard configurations, current player
//! scores and the append-only score event log. The ranking index is rebuilt
//! from here on startup; the sync worker mirrors hot state back on a timer.

use std::collections::HashMap;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::configs::PostgresSettings;
use crate::models::{
    LeaderboardConfig, LeaderboardEntry, ResetPeriod, ScoreEvent, SortOrder, UpdateMode,
};

/// Idempotent schema setup, applied on every startup.
const MIGRATIONS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS leaderboards (
        id VARCHAR(64) PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        sort_order VARCHAR(10) DEFAULT 'desc',
        reset_period VARCHAR(20) DEFAULT 'never',
        max_entries INT DEFAULT 10000,
        update_mode VARCHAR(20) DEFAULT 'replace',
        created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
    )"#,
    r#"CREATE TABLE IF NOT EXISTS player_scores (
        id BIGSERIAL PRIMARY KEY,
        leaderboard_id VARCHAR(64) NOT NULL REFERENCES leaderboards(id) ON DELETE CASCADE,
        player_id VARCHAR(64) NOT NULL,
        score BIGINT NOT NULL,
        metadata JSONB,
        created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(leaderboard_id, player_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS score_events (
        id BIGSERIAL PRIMARY KEY,
        leaderboard_id VARCHAR(64) NOT NULL,
        player_id VARCHAR(64) NOT NULL,
        score BIGINT NOT NULL,
        event_type VARCHAR(20) NOT NULL,
        game_id VARCHAR(64),
        metadata JSONB,
        created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_player_scores_leaderboard ON player_scores(leaderboard_id)",
    "CREATE INDEX IF NOT EXISTS idx_player_scores_score ON player_scores(leaderboard_id, score DESC)",
    "CREATE INDEX IF NOT EXISTS idx_score_events_player ON score_events(player_id, created_at DESC)",
];

/// Pooled Postgres client. Cheap to clone; all clones share the pool.
#[derive(Clone)]
pub struct Repository {
    pool: PgPool,
}

impl Repository {
    /// Open the pool and verify connectivity.
    pub async fn connect(settings: &PostgresSettings) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .max_lifetime(Some(settings.max_conn_lifetime))
            .idle_timeout(Some(settings.max_conn_idle_time))
            .acquire_timeout(Duration::from_secs(3))
            .connect(&settings.connection_string())
            .await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Close the pool, waiting for checked-out connections to come back.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        log::info!("database migrations completed");
        Ok(())
    }

    pub async fn create_leaderboard(&self, config: &LeaderboardConfig) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO leaderboards
               (id, name, sort_order, reset_period, max_entries, update_mode, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(&config.id)
        .bind(&config.name)
        .bind(config.sort_order.as_str())
        .bind(config.reset_period.as_str())
        .bind(config.max_entries)
        .bind(config.update_mode.as_str())
        .bind(config.created_at)
        .bind(config.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_leaderboard(
        &self,
        leaderboard_id: &str,
    ) -> Result<Option<LeaderboardConfig>, sqlx::Error> {
        let row = sqlx::query(
            r#"SELECT id, name, sort_order, reset_period, max_entries, update_mode,
                      created_at, updated_at
               FROM leaderboards WHERE id = $1"#,
        )
        .bind(leaderboard_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(config_from_row).transpose()
    }

    pub async fn list_leaderboards(&self) -> Result<Vec<LeaderboardConfig>, sqlx::Error> {
        let rows = sqlx::query(
            r#"SELECT id, name, sort_order, reset_period, max_entries, update_mode,
                      created_at, updated_at
               FROM leaderboards ORDER BY created_at DESC"#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(config_from_row).collect()
    }

    /// Delete a leaderboard; player scores cascade. Returns whether a row
    /// was actually deleted.
    pub async fn delete_leaderboard(&self, leaderboard_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM leaderboards WHERE id = $1")
            .bind(leaderboard_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn leaderboard_exists(&self, leaderboard_id: &str) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM leaderboards WHERE id = $1)")
            .bind(leaderboard_id)
            .fetch_one(&self.pool)
            .await?;
        row.try_get(0)
    }

    /// Unconditional upsert of one score. Metadata, when given, replaces the
    /// stored one; otherwise the stored metadata is kept.
    pub async fn upsert_score(
        &self,
        leaderboard_id: &str,
        player_id: &str,
        score: i64,
        metadata: Option<&serde_json::Value>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO player_scores (leaderboard_id, player_id, score, metadata, created_at, updated_at)
               VALUES ($1, $2, $3, $4, NOW(), NOW())
               ON CONFLICT (leaderboard_id, player_id)
               DO UPDATE SET score = $3,
                             metadata = COALESCE($4, player_scores.metadata),
                             updated_at = NOW()"#,
        )
        .bind(leaderboard_id)
        .bind(player_id)
        .bind(score)
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Conditional upsert: the stored score only moves in the winning
    /// direction (GREATEST/LEAST evaluated inside the store).
    pub async fn upsert_score_best(
        &self,
        leaderboard_id: &str,
        player_id: &str,
        score: i64,
        higher_is_better: bool,
        metadata: Option<&serde_json::Value>,
    ) -> Result<(), sqlx::Error> {
        let query = if higher_is_better {
            r#"INSERT INTO player_scores (leaderboard_id, player_id, score, metadata, created_at, updated_at)
               VALUES ($1, $2, $3, $4, NOW(), NOW())
               ON CONFLICT (leaderboard_id, player_id)
               DO UPDATE SET score = GREATEST(player_scores.score, $3),
                             metadata = COALESCE($4, player_scores.metadata),
                             updated_at = NOW()"#
        } else {
            r#"INSERT INTO player_scores (leaderboard_id, player_id, score, metadata, created_at, updated_at)
               VALUES ($1, $2, $3, $4, NOW(), NOW())
               ON CONFLICT (leaderboard_id, player_id)
               DO UPDATE SET score = LEAST(player_scores.score, $3),
                             metadata = COALESCE($4, player_scores.metadata),
                             updated_at = NOW()"#
        };
        sqlx::query(query)
            .bind(leaderboard_id)
            .bind(player_id)
            .bind(score)
            .bind(metadata)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Atomic add; inserts at `delta` when absent. Returns the new score.
    pub async fn increment_score(
        &self,
        leaderboard_id: &str,
        player_id: &str,
        delta: i64,
    ) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            r#"INSERT INTO player_scores (leaderboard_id, player_id, score, created_at, updated_at)
               VALUES ($1, $2, $3, NOW(), NOW())
               ON CONFLICT (leaderboard_id, player_id)
               DO UPDATE SET score = player_scores.score + $3, updated_at = NOW()
               RETURNING score"#,
        )
        .bind(leaderboard_id)
        .bind(player_id)
        .bind(delta)
        .fetch_one(&self.pool)
        .await?;
        row.try_get("score")
    }

    /// Append one audit event. Callers treat failures as non-fatal.
    pub async fn record_event(&self, event: &ScoreEvent) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO score_events
               (leaderboard_id, player_id, score, event_type, game_id, metadata, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(&event.leaderboard_id)
        .bind(&event.player_id)
        .bind(event.score)
        .bind(&event.event_type)
        .bind(event.game_id.as_deref())
        .bind(event.metadata.as_ref())
        .bind(event.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// One player's score with its 1-based rank over the score-desc order.
    pub async fn get_player_score(
        &self,
        leaderboard_id: &str,
        player_id: &str,
    ) -> Result<Option<LeaderboardEntry>, sqlx::Error> {
        let row = sqlx::query(
            r#"WITH ranked AS (
                   SELECT player_id, score,
                          ROW_NUMBER() OVER (ORDER BY score DESC) AS rank
                   FROM player_scores
                   WHERE leaderboard_id = $1
               )
               SELECT player_id, score, rank FROM ranked WHERE player_id = $2"#,
        )
        .bind(leaderboard_id)
        .bind(player_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(LeaderboardEntry {
                rank: row.try_get("rank")?,
                player_id: row.try_get("player_id")?,
                score: row.try_get("score")?,
            })
        })
        .transpose()
    }

    /// Paginated ordered listing with ranks relative to the whole board.
    pub async fn get_entries(
        &self,
        leaderboard_id: &str,
        limit: i64,
        offset: i64,
        descending: bool,
    ) -> Result<Vec<LeaderboardEntry>, sqlx::Error> {
        let query = if descending {
            r#"SELECT player_id, score,
                      ROW_NUMBER() OVER (ORDER BY score DESC) AS rank
               FROM player_scores WHERE leaderboard_id = $1
               ORDER BY score DESC LIMIT $2 OFFSET $3"#
        } else {
            r#"SELECT player_id, score,
                      ROW_NUMBER() OVER (ORDER BY score ASC) AS rank
               FROM player_scores WHERE leaderboard_id = $1
               ORDER BY score ASC LIMIT $2 OFFSET $3"#
        };
        let rows = sqlx::query(query)
            .bind(leaderboard_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(LeaderboardEntry {
                    rank: row.try_get("rank")?,
                    player_id: row.try_get("player_id")?,
                    score: row.try_get("score")?,
                })
            })
            .collect()
    }

    /// Full score map for one leaderboard, used by startup recovery.
    pub async fn get_all_scores(
        &self,
        leaderboard_id: &str,
    ) -> Result<HashMap<String, i64>, sqlx::Error> {
        let rows = sqlx::query("SELECT player_id, score FROM player_scores WHERE leaderboard_id = $1")
            .bind(leaderboard_id)
            .fetch_all(&self.pool)
            .await?;
        let mut scores = HashMap::with_capacity(rows.len());
        for row in rows {
            scores.insert(row.try_get("player_id")?, row.try_get("score")?);
        }
        Ok(scores)
    }

    /// Remove one player's row. Returns whether a row existed.
    pub async fn remove_player(
        &self,
        leaderboard_id: &str,
        player_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM player_scores WHERE leaderboard_id = $1 AND player_id = $2")
                .bind(leaderboard_id)
                .bind(player_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete all player rows for a leaderboard; the configuration stays.
    pub async fn reset_leaderboard(&self, leaderboard_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM player_scores WHERE leaderboard_id = $1")
            .bind(leaderboard_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Upsert a whole score map inside one transaction, with plain replace
    /// semantics. The sync worker feeds this in bounded chunks.
    pub async fn batch_upsert_scores(
        &self,
        leaderboard_id: &str,
        scores: &HashMap<String, i64>,
    ) -> Result<(), sqlx::Error> {
        if scores.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for (player_id, score) in scores {
            sqlx::query(
                r#"INSERT INTO player_scores (leaderboard_id, player_id, score, created_at, updated_at)
                   VALUES ($1, $2, $3, NOW(), NOW())
                   ON CONFLICT (leaderboard_id, player_id)
                   DO UPDATE SET score = $3, updated_at = NOW()"#,
            )
            .bind(leaderboard_id)
            .bind(player_id)
            .bind(score)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await
    }

    pub async fn player_count(&self, leaderboard_id: &str) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) FROM player_scores WHERE leaderboard_id = $1")
            .bind(leaderboard_id)
            .fetch_one(&self.pool)
            .await?;
        row.try_get(0)
    }
}

fn config_from_row(row: sqlx::postgres::PgRow) -> Result<LeaderboardConfig, sqlx::Error> {
    let sort_order: String = row.try_get("sort_order")?;
    let reset_period: String = row.try_get("reset_period")?;
    let update_mode: String = row.try_get("update_mode")?;
    Ok(LeaderboardConfig {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        sort_order: SortOrder::parse(&sort_order),
        reset_period: ResetPeriod::parse(&reset_period),
        max_entries: row.try_get("max_entries")?,
        update_mode: UpdateMode::parse(&update_mode),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
