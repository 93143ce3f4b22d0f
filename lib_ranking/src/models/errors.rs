use thiserror::Error;

/// Error taxonomy of the service. The display strings are part of the wire
/// contract: API clients receive them verbatim in the response envelope.
#[derive(Debug, Error)]
pub enum RankingError {
    #[error("player not found in leaderboard")]
    PlayerNotFound,

    #[error("leaderboard not found")]
    LeaderboardNotFound,

    #[error("leaderboard already exists")]
    LeaderboardExists,

    #[error("invalid score value")]
    InvalidScore,

    #[error("invalid leaderboard configuration")]
    InvalidLeaderboard,

    #[error("invalid request")]
    InvalidRequest,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal server error")]
    Internal,
}

impl RankingError {
    /// Whether the error belongs to the not-found class (maps to 404).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RankingError::PlayerNotFound | RankingError::LeaderboardNotFound
        )
    }

    /// Transport failures are reported to clients as an opaque internal
    /// error; everything else is safe to show verbatim.
    pub fn public_message(&self) -> String {
        match self {
            RankingError::Cache(_) | RankingError::Database(_) | RankingError::Internal => {
                RankingError::Internal.to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_messages_are_stable() {
        assert_eq!(
            RankingError::PlayerNotFound.to_string(),
            "player not found in leaderboard"
        );
        assert_eq!(
            RankingError::LeaderboardExists.to_string(),
            "leaderboard already exists"
        );
        assert_eq!(
            RankingError::LeaderboardNotFound.to_string(),
            "leaderboard not found"
        );
    }

    #[test]
    fn not_found_classification() {
        assert!(RankingError::PlayerNotFound.is_not_found());
        assert!(RankingError::LeaderboardNotFound.is_not_found());
        assert!(!RankingError::LeaderboardExists.is_not_found());
    }

    #[test]
    fn transport_errors_are_masked() {
        let err = RankingError::Database(sqlx::Error::PoolClosed);
        assert_eq!(err.public_message(), "internal server error");
        assert_eq!(
            RankingError::InvalidRequest.public_message(),
            "invalid request"
        );
    }
}
