//! Clients for the external stores: Redis (hot ranking index) and
//! PostgreSQL (durable source of truth).

pub mod cache_redis;
pub mod db_postgres;

pub use cache_redis::RankingCache;
pub use db_postgres::Repository;
