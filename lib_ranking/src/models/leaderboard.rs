use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sort direction of a leaderboard. `Desc` means a higher score is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Desc,
    Asc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Desc => "desc",
            SortOrder::Asc => "asc",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "asc" => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }

    /// True when an improvement means a numerically larger score.
    pub fn higher_is_better(&self) -> bool {
        matches!(self, SortOrder::Desc)
    }
}

/// How a new submission combines with a player's existing score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    Replace,
    Increment,
    Best,
}

impl UpdateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateMode::Replace => "replace",
            UpdateMode::Increment => "increment",
            UpdateMode::Best => "best",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "increment" => UpdateMode::Increment,
            "best" => UpdateMode::Best,
            _ => UpdateMode::Replace,
        }
    }
}

/// Scheduled reset policy. Recorded on the configuration only; resets are
/// triggered through the API, never by a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetPeriod {
    Never,
    Daily,
    Weekly,
    Monthly,
}

impl ResetPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetPeriod::Never => "never",
            ResetPeriod::Daily => "daily",
            ResetPeriod::Weekly => "weekly",
            ResetPeriod::Monthly => "monthly",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "daily" => ResetPeriod::Daily,
            "weekly" => ResetPeriod::Weekly,
            "monthly" => ResetPeriod::Monthly,
            _ => ResetPeriod::Never,
        }
    }
}

/// Persistent configuration of one leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardConfig {
    pub id: String,
    pub name: String,
    pub sort_order: SortOrder,
    pub reset_period: ResetPeriod,
    pub max_entries: i32,
    pub update_mode: UpdateMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One ranked row as returned by ranking queries and broadcast snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: i64,
    pub player_id: String,
    pub score: i64,
}

/// A single score submission, from the HTTP API or the Kafka topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSubmission {
    pub player_id: String,
    pub leaderboard_id: String,
    pub score: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ScoreSubmission {
    /// A submission must carry both identifiers to be routable.
    pub fn is_valid(&self) -> bool {
        !self.player_id.is_empty() && !self.leaderboard_id.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchScoreSubmission {
    pub scores: Vec<ScoreSubmission>,
}

/// Outcome of a batch submit. Individual failures never abort the batch.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BatchOutcome {
    pub submitted: usize,
    pub failed: usize,
}

/// Append-only audit record of one submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreEvent {
    pub player_id: String,
    pub leaderboard_id: String,
    /// The submitted value, not the resolved one.
    pub score: i64,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl ScoreEvent {
    pub fn submit(submission: &ScoreSubmission) -> Self {
        Self {
            player_id: submission.player_id.clone(),
            leaderboard_id: submission.leaderboard_id.clone(),
            score: submission.score,
            event_type: "submit".to_string(),
            game_id: submission.game_id.clone(),
            metadata: submission.metadata.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Request body for leaderboard creation. Missing fields take defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateLeaderboardRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sort_order: Option<SortOrder>,
    #[serde(default)]
    pub reset_period: Option<ResetPeriod>,
    #[serde(default)]
    pub max_entries: Option<i32>,
    #[serde(default)]
    pub update_mode: Option<UpdateMode>,
}

impl CreateLeaderboardRequest {
    /// Resolve the request into a full configuration, applying defaults for
    /// anything the caller left out.
    pub fn into_config(self) -> LeaderboardConfig {
        let now = Utc::now();
        LeaderboardConfig {
            id: self.id,
            name: self.name,
            sort_order: self.sort_order.unwrap_or(SortOrder::Desc),
            reset_period: self.reset_period.unwrap_or(ResetPeriod::Never),
            max_entries: match self.max_entries {
                Some(n) if n > 0 => n,
                _ => 10_000,
            },
            update_mode: self.update_mode.unwrap_or(UpdateMode::Replace),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardStats {
    pub leaderboard_id: String,
    pub total_players: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_score: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lowest_score: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_applies_defaults() {
        let req = CreateLeaderboardRequest {
            id: "weekly".into(),
            name: "Weekly".into(),
            ..Default::default()
        };
        let cfg = req.into_config();
        assert_eq!(cfg.sort_order, SortOrder::Desc);
        assert_eq!(cfg.reset_period, ResetPeriod::Never);
        assert_eq!(cfg.max_entries, 10_000);
        assert_eq!(cfg.update_mode, UpdateMode::Replace);
    }

    #[test]
    fn create_request_keeps_explicit_values() {
        let req = CreateLeaderboardRequest {
            id: "golf".into(),
            name: "Golf".into(),
            sort_order: Some(SortOrder::Asc),
            reset_period: Some(ResetPeriod::Weekly),
            max_entries: Some(500),
            update_mode: Some(UpdateMode::Best),
        };
        let cfg = req.into_config();
        assert_eq!(cfg.sort_order, SortOrder::Asc);
        assert!(!cfg.sort_order.higher_is_better());
        assert_eq!(cfg.max_entries, 500);
        assert_eq!(cfg.update_mode, UpdateMode::Best);
    }

    #[test]
    fn submission_requires_both_ids() {
        let json = r#"{"player_id":"p1","leaderboard_id":"g","score":42}"#;
        let sub: ScoreSubmission = serde_json::from_str(json).unwrap();
        assert!(sub.is_valid());
        assert_eq!(sub.score, 42);
        assert!(sub.game_id.is_none());

        let missing: ScoreSubmission =
            serde_json::from_str(r#"{"player_id":"","leaderboard_id":"g","score":1}"#).unwrap();
        assert!(!missing.is_valid());
    }

    #[test]
    fn enums_round_trip_through_strings() {
        for mode in ["replace", "increment", "best"] {
            assert_eq!(UpdateMode::parse(mode).as_str(), mode);
        }
        for order in ["asc", "desc"] {
            assert_eq!(SortOrder::parse(order).as_str(), order);
        }
        // Unknown strings fall back to the defaults.
        assert_eq!(UpdateMode::parse("??"), UpdateMode::Replace);
        assert_eq!(SortOrder::parse(""), SortOrder::Desc);
        assert_eq!(ResetPeriod::parse("sometimes"), ResetPeriod::Never);
    }
}
