//! # Ranking engine
//!
//! Policy layer of the write path and the only place that touches both
//! stores for one operation. Writes go to the Redis index according to the
//! leaderboard's update mode, get audited into Postgres best-effort, and
//! trigger a snapshot broadcast through the hub. Ranking reads are served
//! from the Redis index alone.

use crate::configs::LeaderboardSettings;
use crate::connections::{RankingCache, Repository};
use crate::core::hub::HubHandle;
use crate::models::{
    BatchOutcome, BatchScoreSubmission, CreateLeaderboardRequest, LeaderboardConfig,
    LeaderboardEntry, LeaderboardStats, RankingError, ScoreEvent, ScoreSubmission, UpdateMode,
};
use chrono::Utc;

/// Size of the top-N snapshot broadcast after each write. Snapshots are
/// self-contained, so subscribers tolerate dropped ones.
const BROADCAST_TOP_N: i64 = 10;

pub struct LeaderboardService {
    cache: RankingCache,
    repository: Repository,
    limits: LeaderboardSettings,
    hub: HubHandle,
}

impl LeaderboardService {
    pub fn new(
        cache: RankingCache,
        repository: Repository,
        limits: LeaderboardSettings,
        hub: HubHandle,
    ) -> Self {
        Self {
            cache,
            repository,
            limits,
            hub,
        }
    }

    /// Apply one submission. The leaderboard must exist; the index write is
    /// mandatory; the audit event and the broadcast are best-effort.
    pub async fn submit_score(&self, submission: ScoreSubmission) -> Result<(), RankingError> {
        if !submission.is_valid() {
            return Err(RankingError::InvalidRequest);
        }

        let config = self.load_config(&submission.leaderboard_id).await?;

        match config.update_mode {
            UpdateMode::Replace => {
                self.cache
                    .set(
                        &submission.leaderboard_id,
                        &submission.player_id,
                        submission.score,
                    )
                    .await?;
            }
            UpdateMode::Increment => {
                self.cache
                    .incr(
                        &submission.leaderboard_id,
                        &submission.player_id,
                        submission.score,
                    )
                    .await?;
            }
            UpdateMode::Best => {
                let improved = self
                    .cache
                    .set_if_better(
                        &submission.leaderboard_id,
                        &submission.player_id,
                        submission.score,
                        config.sort_order.higher_is_better(),
                    )
                    .await?;
                if !improved {
                    log::debug!(
                        "score {} for {} on {} did not beat the current best",
                        submission.score,
                        submission.player_id,
                        submission.leaderboard_id
                    );
                }
            }
        }

        // Audit trail never fails the write.
        let mut event = ScoreEvent::submit(&submission);
        event.event_type = event_type_for(config.update_mode).to_string();
        if let Err(err) = self.repository.record_event(&event).await {
            log::warn!("failed to record score event: {err}");
        }

        self.broadcast_snapshot(&submission.leaderboard_id).await;
        Ok(())
    }

    /// Apply submissions in order. A failing submission is logged and
    /// counted; the rest of the batch continues.
    pub async fn submit_batch(&self, batch: BatchScoreSubmission) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for submission in batch.scores {
            let player_id = submission.player_id.clone();
            let leaderboard_id = submission.leaderboard_id.clone();
            match self.submit_score(submission).await {
                Ok(()) => outcome.submitted += 1,
                Err(err) => {
                    outcome.failed += 1;
                    log::error!(
                        "batch submit failed for {player_id} on {leaderboard_id}: {err}"
                    );
                }
            }
        }
        outcome
    }

    pub async fn top(
        &self,
        leaderboard_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<LeaderboardEntry>, RankingError> {
        self.load_config(leaderboard_id).await?;
        let limit = clamp_top_limit(limit, self.limits.default_limit, self.limits.max_limit);
        Ok(self.cache.top_n(leaderboard_id, limit).await?)
    }

    pub async fn range(
        &self,
        leaderboard_id: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<LeaderboardEntry>, RankingError> {
        self.load_config(leaderboard_id).await?;
        let (start, end) = clamp_rank_range(start, end, self.limits.max_limit);
        Ok(self.cache.range(leaderboard_id, start, end).await?)
    }

    pub async fn around(
        &self,
        leaderboard_id: &str,
        player_id: &str,
        radius: Option<i64>,
    ) -> Result<Vec<LeaderboardEntry>, RankingError> {
        self.load_config(leaderboard_id).await?;
        let radius = clamp_window_radius(radius);
        self.cache
            .around(leaderboard_id, player_id, radius)
            .await?
            .ok_or(RankingError::PlayerNotFound)
    }

    pub async fn player_rank(
        &self,
        leaderboard_id: &str,
        player_id: &str,
    ) -> Result<LeaderboardEntry, RankingError> {
        self.load_config(leaderboard_id).await?;
        self.cache
            .rank_of(leaderboard_id, player_id)
            .await?
            .ok_or(RankingError::PlayerNotFound)
    }

    pub async fn count(&self, leaderboard_id: &str) -> Result<i64, RankingError> {
        self.load_config(leaderboard_id).await?;
        Ok(self.cache.count(leaderboard_id).await?)
    }

    pub async fn stats(&self, leaderboard_id: &str) -> Result<LeaderboardStats, RankingError> {
        self.load_config(leaderboard_id).await?;
        let total_players = self.cache.count(leaderboard_id).await?;

        let top_score = match self.cache.top_n(leaderboard_id, 1).await {
            Ok(entries) => entries.first().map(|entry| entry.score),
            Err(err) => {
                log::warn!("stats: top probe failed for {leaderboard_id}: {err}");
                None
            }
        };
        let lowest_score = match self.cache.bottom_n(leaderboard_id, 1).await {
            Ok(entries) => entries.first().map(|entry| entry.score),
            Err(err) => {
                log::warn!("stats: bottom probe failed for {leaderboard_id}: {err}");
                None
            }
        };

        Ok(LeaderboardStats {
            leaderboard_id: leaderboard_id.to_string(),
            total_players,
            top_score,
            lowest_score,
        })
    }

    /// Remove a player from the index; the cold-store row is removed
    /// best-effort (absence is tolerated).
    pub async fn remove_player(
        &self,
        leaderboard_id: &str,
        player_id: &str,
    ) -> Result<(), RankingError> {
        self.load_config(leaderboard_id).await?;
        self.cache.remove(leaderboard_id, player_id).await?;

        match self.repository.remove_player(leaderboard_id, player_id).await {
            Ok(_) => {}
            Err(err) => log::warn!("failed to remove player from database: {err}"),
        }

        self.broadcast_snapshot(leaderboard_id).await;
        Ok(())
    }

    pub async fn create_leaderboard(
        &self,
        request: CreateLeaderboardRequest,
    ) -> Result<LeaderboardConfig, RankingError> {
        if request.id.is_empty() || request.name.is_empty() {
            return Err(RankingError::InvalidLeaderboard);
        }
        if self.repository.leaderboard_exists(&request.id).await? {
            return Err(RankingError::LeaderboardExists);
        }

        let config = request.into_config();
        self.repository.create_leaderboard(&config).await?;

        if let Err(err) = self.cache.put_meta(&config).await {
            log::warn!("failed to cache leaderboard meta: {err}");
        }
        Ok(config)
    }

    pub async fn list_leaderboards(&self) -> Result<Vec<LeaderboardConfig>, RankingError> {
        Ok(self.repository.list_leaderboards().await?)
    }

    pub async fn get_leaderboard(
        &self,
        leaderboard_id: &str,
    ) -> Result<LeaderboardConfig, RankingError> {
        self.repository
            .get_leaderboard(leaderboard_id)
            .await?
            .ok_or(RankingError::LeaderboardNotFound)
    }

    /// Clear all entries from both stores. The configuration survives.
    pub async fn reset_leaderboard(&self, leaderboard_id: &str) -> Result<(), RankingError> {
        if !self.repository.leaderboard_exists(leaderboard_id).await? {
            return Err(RankingError::LeaderboardNotFound);
        }

        self.cache.reset(leaderboard_id).await?;
        self.repository.reset_leaderboard(leaderboard_id).await?;

        let event = ScoreEvent {
            player_id: String::new(),
            leaderboard_id: leaderboard_id.to_string(),
            score: 0,
            event_type: "reset".to_string(),
            game_id: None,
            metadata: None,
            timestamp: Utc::now(),
        };
        if let Err(err) = self.repository.record_event(&event).await {
            log::warn!("failed to record reset event: {err}");
        }

        self.broadcast_snapshot(leaderboard_id).await;
        Ok(())
    }

    /// Drop the index and delete the configuration; player rows cascade.
    pub async fn delete_leaderboard(&self, leaderboard_id: &str) -> Result<(), RankingError> {
        if let Err(err) = self.cache.drop_leaderboard(leaderboard_id).await {
            log::warn!("failed to drop leaderboard from cache: {err}");
        }
        if !self.repository.delete_leaderboard(leaderboard_id).await? {
            return Err(RankingError::LeaderboardNotFound);
        }
        Ok(())
    }

    /// Configuration lookup, hot cache first. A cache miss falls back to the
    /// database and backfills the cache; a cache transport error only costs
    /// the fast path.
    async fn load_config(
        &self,
        leaderboard_id: &str,
    ) -> Result<LeaderboardConfig, RankingError> {
        match self.cache.get_meta(leaderboard_id).await {
            Ok(Some(config)) => return Ok(config),
            Ok(None) => {}
            Err(err) => log::warn!("meta cache read failed for {leaderboard_id}: {err}"),
        }

        let config = self
            .repository
            .get_leaderboard(leaderboard_id)
            .await?
            .ok_or(RankingError::LeaderboardNotFound)?;

        if let Err(err) = self.cache.put_meta(&config).await {
            log::warn!("meta cache backfill failed for {leaderboard_id}: {err}");
        }
        Ok(config)
    }

    /// Push a fresh top-N snapshot to the hub. Failures only cost the
    /// notification, never the write that triggered it.
    async fn broadcast_snapshot(&self, leaderboard_id: &str) {
        let entries = match self.cache.top_n(leaderboard_id, BROADCAST_TOP_N).await {
            Ok(entries) => entries,
            Err(err) => {
                log::debug!("snapshot read failed for {leaderboard_id}: {err}");
                return;
            }
        };
        let total_players = match self.cache.count(leaderboard_id).await {
            Ok(count) => count,
            Err(err) => {
                log::debug!("snapshot count failed for {leaderboard_id}: {err}");
                return;
            }
        };
        self.hub
            .broadcast_leaderboard_update(leaderboard_id, &entries, total_players);
    }
}

fn event_type_for(mode: UpdateMode) -> &'static str {
    match mode {
        UpdateMode::Increment => "increment",
        UpdateMode::Replace | UpdateMode::Best => "submit",
    }
}

/// Requested top-N limit, clamped to `[1, max_limit]`; absent or
/// non-positive requests take the default.
fn clamp_top_limit(requested: Option<i64>, default_limit: i64, max_limit: i64) -> i64 {
    match requested {
        Some(n) if n > 0 => n.min(max_limit),
        _ => default_limit,
    }
}

/// Around-window radius, clamped to `[1, 50]`; absent requests take 5.
fn clamp_window_radius(requested: Option<i64>) -> i64 {
    requested.unwrap_or(5).clamp(1, 50)
}

/// 0-based inclusive rank range, clamped so the window never exceeds
/// `max_limit` entries past its start.
fn clamp_rank_range(start: i64, end: i64, max_limit: i64) -> (i64, i64) {
    let start = start.max(0);
    let end = end.max(start);
    if end - start > max_limit {
        (start, start + max_limit)
    } else {
        (start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_limit_clamps() {
        assert_eq!(clamp_top_limit(None, 100, 1000), 100);
        assert_eq!(clamp_top_limit(Some(0), 100, 1000), 100);
        assert_eq!(clamp_top_limit(Some(-3), 100, 1000), 100);
        assert_eq!(clamp_top_limit(Some(25), 100, 1000), 25);
        assert_eq!(clamp_top_limit(Some(5000), 100, 1000), 1000);
    }

    #[test]
    fn window_radius_clamps() {
        assert_eq!(clamp_window_radius(None), 5);
        assert_eq!(clamp_window_radius(Some(0)), 1);
        assert_eq!(clamp_window_radius(Some(2)), 2);
        assert_eq!(clamp_window_radius(Some(500)), 50);
    }

    #[test]
    fn rank_range_clamps() {
        assert_eq!(clamp_rank_range(0, 9, 1000), (0, 9));
        assert_eq!(clamp_rank_range(-5, 9, 1000), (0, 9));
        assert_eq!(clamp_rank_range(10, 3, 1000), (10, 10));
        assert_eq!(clamp_rank_range(0, 5000, 1000), (0, 1000));
    }

    #[test]
    fn event_types_follow_update_mode() {
        assert_eq!(event_type_for(UpdateMode::Replace), "submit");
        assert_eq!(event_type_for(UpdateMode::Best), "submit");
        assert_eq!(event_type_for(UpdateMode::Increment), "increment");
    }
}
