//! # lib_ranking
//!
//! Core library for the realtime leaderboard service. The binaries in the
//! `servers` crate wire these pieces together:
//!
//! - [`connections`]: Redis ranking index (hot path) and Postgres repository
//!   (durable source of truth).
//! - [`core`]: the ranking engine, the websocket subscription hub and the
//!   hot/cold sync worker.
//! - [`ingestors`]: the Kafka score consumer.
//! - [`configs`]: YAML/env configuration for all of the above.

pub mod configs;
pub mod connections;
pub mod core;
pub mod ingestors;
pub mod models;
