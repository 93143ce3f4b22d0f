//! # Redis ranking index
//!
//! The hot side of the service: one sorted set per leaderboard holding
//! (player, score), plus a small metadata hash caching the leaderboard
//! configuration. All ranking reads are served from here.
//!
//! Listing order is always score-descending (rank 1 = highest score); the
//! `best` update mode decides its comparison direction through
//! [`RankingCache::set_if_better`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client, RedisResult};

use crate::configs::RedisSettings;
use crate::models::{LeaderboardConfig, LeaderboardEntry, ResetPeriod, SortOrder, UpdateMode};

/// Async Redis client for leaderboard state. Cheap to clone; all clones share
/// one multiplexed connection.
#[derive(Clone)]
pub struct RankingCache {
    conn: ConnectionManager,
}

fn realtime_key(leaderboard_id: &str) -> String {
    format!("leaderboard:{leaderboard_id}:realtime")
}

fn meta_key(leaderboard_id: &str) -> String {
    format!("leaderboard:{leaderboard_id}:meta")
}

/// 0-based inclusive window of up to `2 * radius + 1` positions centred on a
/// 1-based rank. The lower edge clips at the top of the board; the upper edge
/// is clipped by the store.
fn around_window(rank: i64, radius: i64) -> (i64, i64) {
    let start = (rank - radius - 1).max(0);
    let end = rank + radius - 1;
    (start, end)
}

impl RankingCache {
    /// Open the connection and verify it with a PING.
    pub async fn connect(settings: &RedisSettings) -> RedisResult<Self> {
        let client = Client::open(settings.url())?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(settings.dial_timeout)
            .set_response_timeout(settings.read_timeout);
        let mut conn = client.get_connection_manager_with_config(config).await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(Self { conn })
    }

    /// Unconditionally set a player's score.
    pub async fn set(&self, leaderboard_id: &str, player_id: &str, score: i64) -> RedisResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .zadd(realtime_key(leaderboard_id), player_id, score)
            .await?;
        Ok(())
    }

    /// Set the score only if it beats the current one, in a single atomic
    /// store command (`ZADD GT|LT CH`). An absent player is always written.
    /// Returns whether the entry changed.
    pub async fn set_if_better(
        &self,
        leaderboard_id: &str,
        player_id: &str,
        score: i64,
        higher_is_better: bool,
    ) -> RedisResult<bool> {
        let mut conn = self.conn.clone();
        let changed: i64 = redis::cmd("ZADD")
            .arg(realtime_key(leaderboard_id))
            .arg(if higher_is_better { "GT" } else { "LT" })
            .arg("CH")
            .arg(score)
            .arg(player_id)
            .query_async(&mut conn)
            .await?;
        Ok(changed > 0)
    }

    /// Atomically add `delta` to a player's score, creating the entry at
    /// `delta` when absent. Returns the new score.
    pub async fn incr(
        &self,
        leaderboard_id: &str,
        player_id: &str,
        delta: i64,
    ) -> RedisResult<i64> {
        let mut conn = self.conn.clone();
        let new_score: f64 = conn
            .zincr(realtime_key(leaderboard_id), player_id, delta)
            .await?;
        Ok(new_score as i64)
    }

    /// Remove one player. Removing an absent player is not an error.
    pub async fn remove(&self, leaderboard_id: &str, player_id: &str) -> RedisResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.zrem(realtime_key(leaderboard_id), player_id).await?;
        Ok(())
    }

    /// Best `n` entries, ranks starting at 1.
    pub async fn top_n(&self, leaderboard_id: &str, n: i64) -> RedisResult<Vec<LeaderboardEntry>> {
        if n <= 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let rows: Vec<(String, f64)> = conn
            .zrevrange_withscores(realtime_key(leaderboard_id), 0, (n - 1) as isize)
            .await?;
        Ok(ranked_desc(rows, 0))
    }

    /// Worst `n` entries, worst first. Ranks count back from the total, so
    /// the worst entry carries rank = member count.
    pub async fn bottom_n(
        &self,
        leaderboard_id: &str,
        n: i64,
    ) -> RedisResult<Vec<LeaderboardEntry>> {
        if n <= 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let key = realtime_key(leaderboard_id);
        let total: i64 = conn.zcard(&key).await?;
        let rows: Vec<(String, f64)> = conn
            .zrange_withscores(&key, 0, (n - 1) as isize)
            .await?;
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(i, (player_id, score))| LeaderboardEntry {
                rank: total - i as i64,
                player_id,
                score: score as i64,
            })
            .collect())
    }

    /// One player's rank and score, or `None` when the player is not on the
    /// board. Rank and score are fetched in one pipeline.
    pub async fn rank_of(
        &self,
        leaderboard_id: &str,
        player_id: &str,
    ) -> RedisResult<Option<LeaderboardEntry>> {
        let mut conn = self.conn.clone();
        let key = realtime_key(leaderboard_id);
        let (rank, score): (Option<i64>, Option<f64>) = redis::pipe()
            .zrevrank(&key, player_id)
            .zscore(&key, player_id)
            .query_async(&mut conn)
            .await?;
        match (rank, score) {
            (Some(rank), Some(score)) => Ok(Some(LeaderboardEntry {
                rank: rank + 1,
                player_id: player_id.to_string(),
                score: score as i64,
            })),
            _ => Ok(None),
        }
    }

    /// Up to `2 * radius + 1` entries centred on the player, clipped to the
    /// board. `None` when the player is not on the board.
    pub async fn around(
        &self,
        leaderboard_id: &str,
        player_id: &str,
        radius: i64,
    ) -> RedisResult<Option<Vec<LeaderboardEntry>>> {
        let entry = match self.rank_of(leaderboard_id, player_id).await? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let (start, end) = around_window(entry.rank, radius);
        Ok(Some(self.range(leaderboard_id, start, end).await?))
    }

    /// Entries in the 0-based inclusive rank window `[start, end]`.
    pub async fn range(
        &self,
        leaderboard_id: &str,
        start: i64,
        end: i64,
    ) -> RedisResult<Vec<LeaderboardEntry>> {
        let mut conn = self.conn.clone();
        let rows: Vec<(String, f64)> = conn
            .zrevrange_withscores(realtime_key(leaderboard_id), start as isize, end as isize)
            .await?;
        Ok(ranked_desc(rows, start))
    }

    /// Total number of players on the board.
    pub async fn count(&self, leaderboard_id: &str) -> RedisResult<i64> {
        let mut conn = self.conn.clone();
        conn.zcard(realtime_key(leaderboard_id)).await
    }

    /// Full listing, best first. Used by the sync worker's snapshots.
    pub async fn all(&self, leaderboard_id: &str) -> RedisResult<Vec<LeaderboardEntry>> {
        let mut conn = self.conn.clone();
        let rows: Vec<(String, f64)> = conn
            .zrevrange_withscores(realtime_key(leaderboard_id), 0, -1)
            .await?;
        Ok(ranked_desc(rows, 0))
    }

    /// Destroy a board and its cached configuration.
    pub async fn drop_leaderboard(&self, leaderboard_id: &str) -> RedisResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .del(realtime_key(leaderboard_id))
            .ignore()
            .del(meta_key(leaderboard_id))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Clear all entries; the cached configuration survives.
    pub async fn reset(&self, leaderboard_id: &str) -> RedisResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(realtime_key(leaderboard_id)).await?;
        Ok(())
    }

    /// Pipelined bulk replace, used for recovery and batch upserts.
    pub async fn batch_set(
        &self,
        leaderboard_id: &str,
        scores: &HashMap<String, i64>,
    ) -> RedisResult<()> {
        if scores.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let key = realtime_key(leaderboard_id);
        let mut pipe = redis::pipe();
        for (player_id, score) in scores {
            pipe.zadd(&key, player_id, *score).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    /// Whether any entries exist for the board.
    pub async fn exists(&self, leaderboard_id: &str) -> RedisResult<bool> {
        let mut conn = self.conn.clone();
        conn.exists(realtime_key(leaderboard_id)).await
    }

    /// Cache a leaderboard configuration in the metadata hash.
    pub async fn put_meta(&self, config: &LeaderboardConfig) -> RedisResult<()> {
        let mut conn = self.conn.clone();
        let items: [(&str, String); 8] = [
            ("id", config.id.clone()),
            ("name", config.name.clone()),
            ("sort_order", config.sort_order.as_str().to_string()),
            ("reset_period", config.reset_period.as_str().to_string()),
            ("max_entries", config.max_entries.to_string()),
            ("update_mode", config.update_mode.as_str().to_string()),
            ("created_at", config.created_at.to_rfc3339()),
            ("updated_at", config.updated_at.to_rfc3339()),
        ];
        let _: () = conn.hset_multiple(meta_key(&config.id), &items).await?;
        Ok(())
    }

    /// Read the cached configuration; `None` when nothing is cached.
    pub async fn get_meta(&self, leaderboard_id: &str) -> RedisResult<Option<LeaderboardConfig>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(meta_key(leaderboard_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        let get = |name: &str| fields.get(name).cloned().unwrap_or_default();
        Ok(Some(LeaderboardConfig {
            id: get("id"),
            name: get("name"),
            sort_order: SortOrder::parse(&get("sort_order")),
            reset_period: ResetPeriod::parse(&get("reset_period")),
            max_entries: get("max_entries").parse().unwrap_or(0),
            update_mode: UpdateMode::parse(&get("update_mode")),
            created_at: parse_cached_time(&get("created_at")),
            updated_at: parse_cached_time(&get("updated_at")),
        }))
    }
}

fn ranked_desc(rows: Vec<(String, f64)>, first_index: i64) -> Vec<LeaderboardEntry> {
    rows.into_iter()
        .enumerate()
        .map(|(i, (player_id, score))| LeaderboardEntry {
            rank: first_index + i as i64 + 1,
            player_id,
            score: score as i64,
        })
        .collect()
}

fn parse_cached_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_per_leaderboard() {
        assert_eq!(realtime_key("daily"), "leaderboard:daily:realtime");
        assert_eq!(meta_key("daily"), "leaderboard:daily:meta");
    }

    #[test]
    fn around_window_is_centred_and_clipped() {
        // Rank 3, radius 2: positions 0..=4, five entries centred on rank 3.
        assert_eq!(around_window(3, 2), (0, 4));
        // Near the top the lower edge clips to position 0.
        assert_eq!(around_window(1, 2), (0, 2));
        assert_eq!(around_window(2, 5), (0, 6));
        // Interior window keeps 2r + 1 positions.
        assert_eq!(around_window(10, 3), (6, 12));
    }

    #[test]
    fn desc_ranking_is_consecutive_from_offset() {
        let rows = vec![
            ("p4".to_string(), 3200.0),
            ("p2".to_string(), 2500.0),
            ("p3".to_string(), 1800.0),
        ];
        let entries = ranked_desc(rows, 0);
        assert_eq!(entries[0].rank, 1);
        assert_eq!(entries[0].player_id, "p4");
        assert_eq!(entries[2].rank, 3);
        assert_eq!(entries[2].score, 1800);

        let offset = ranked_desc(vec![("p9".to_string(), 10.0)], 4);
        assert_eq!(offset[0].rank, 5);
    }
}
