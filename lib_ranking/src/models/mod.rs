//! Domain types shared across the service.

pub mod errors;
pub mod leaderboard;

pub use errors::RankingError;
pub use leaderboard::{
    BatchOutcome, BatchScoreSubmission, CreateLeaderboardRequest, LeaderboardConfig,
    LeaderboardEntry, LeaderboardStats, ResetPeriod, ScoreEvent, ScoreSubmission, SortOrder,
    UpdateMode,
};
