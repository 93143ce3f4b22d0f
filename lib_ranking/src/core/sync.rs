//! # Hot/cold sync worker
//!
//! Two sync directions with different lifecycles: a one-shot cold→hot
//! rebuild at startup (recovery), and a periodic hot→cold snapshot that
//! bounds how far the database may lag behind the live index.
//!
//! The snapshot is taken without stopping writers; whatever lands
//! concurrently is picked up by the next cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::configs::SyncSettings;
use crate::connections::{RankingCache, Repository};
use crate::models::RankingError;

pub struct SyncWorker {
    cache: RankingCache,
    repository: Repository,
    settings: SyncSettings,
    running: Arc<AtomicBool>,
    task: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl SyncWorker {
    pub fn new(cache: RankingCache, repository: Repository, settings: SyncSettings) -> Self {
        Self {
            cache,
            repository,
            settings,
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Rebuild the hot index from the database: full score map per
    /// leaderboard plus the cached configuration. A failing leaderboard is
    /// logged and skipped so one bad board cannot block recovery.
    pub async fn sync_all_from_cold(&self) -> Result<(), RankingError> {
        log::info!("syncing all leaderboards from database");
        let leaderboards = self.repository.list_leaderboards().await?;

        for config in &leaderboards {
            match self.repository.get_all_scores(&config.id).await {
                Ok(scores) => {
                    if !scores.is_empty() {
                        if let Err(err) = self.cache.batch_set(&config.id, &scores).await {
                            log::error!("failed to restore scores for {}: {err}", config.id);
                            continue;
                        }
                    }
                }
                Err(err) => {
                    log::error!("failed to load scores for {}: {err}", config.id);
                    continue;
                }
            }

            if let Err(err) = self.cache.put_meta(config).await {
                log::warn!("failed to cache meta for {}: {err}", config.id);
            }
        }

        log::info!(
            "completed syncing {} leaderboards from database",
            leaderboards.len()
        );
        Ok(())
    }

    /// Mirror one leaderboard's live scores into the database, in chunks of
    /// the configured batch size.
    pub async fn sync_to_cold(&self, leaderboard_id: &str) -> Result<(), RankingError> {
        sync_to_cold(
            &self.cache,
            &self.repository,
            leaderboard_id,
            self.settings.batch_size,
        )
        .await
    }

    /// Run one full snapshot cycle immediately.
    pub async fn run_once(&self) {
        run_cycle(&self.cache, &self.repository, self.settings.batch_size).await;
    }

    /// Start the periodic snapshot loop. Calling `start` while running is a
    /// no-op.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let cache = self.cache.clone();
        let repository = self.repository.clone();
        let interval = self.settings.interval;
        let batch_size = self.settings.batch_size;
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + interval,
                interval,
            );
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => run_cycle(&cache, &repository, batch_size).await,
                }
            }
            running.store(false, Ordering::SeqCst);
        });

        *task = Some((stop_tx, join));
        log::info!("sync worker started, interval {:?}", self.settings.interval);
    }

    /// Stop the loop, waiting for an in-flight cycle to finish.
    pub async fn stop(&self) {
        let handle = self.task.lock().await.take();
        if let Some((stop_tx, join)) = handle {
            let _ = stop_tx.send(true);
            let _ = join.await;
            log::info!("sync worker stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

async fn run_cycle(cache: &RankingCache, repository: &Repository, batch_size: usize) {
    log::info!("starting sync cycle");
    let started = Instant::now();

    let leaderboards = match repository.list_leaderboards().await {
        Ok(leaderboards) => leaderboards,
        Err(err) => {
            log::error!("failed to list leaderboards for sync: {err}");
            return;
        }
    };

    let mut synced = 0usize;
    let mut errors = 0usize;
    for config in leaderboards {
        match sync_to_cold(cache, repository, &config.id, batch_size).await {
            Ok(()) => synced += 1,
            Err(err) => {
                errors += 1;
                log::error!("failed to sync leaderboard {}: {err}", config.id);
            }
        }
    }

    log::info!(
        "sync cycle completed in {:?}: {synced} synced, {errors} errors",
        started.elapsed()
    );
}

async fn sync_to_cold(
    cache: &RankingCache,
    repository: &Repository,
    leaderboard_id: &str,
    batch_size: usize,
) -> Result<(), RankingError> {
    let entries = cache.all(leaderboard_id).await?;
    if entries.is_empty() {
        log::debug!("no scores to sync for {leaderboard_id}");
        return Ok(());
    }

    let player_count = entries.len();
    let scores: Vec<(String, i64)> = entries
        .into_iter()
        .map(|entry| (entry.player_id, entry.score))
        .collect();

    for chunk in chunked(scores, batch_size) {
        repository.batch_upsert_scores(leaderboard_id, &chunk).await?;
    }

    log::debug!("synced {player_count} players for {leaderboard_id}");
    Ok(())
}

/// Split a score list into maps of at most `size` entries. A zero size is
/// treated as one unbounded chunk.
fn chunked(scores: Vec<(String, i64)>, size: usize) -> Vec<HashMap<String, i64>> {
    if scores.is_empty() {
        return Vec::new();
    }
    if size == 0 {
        return vec![scores.into_iter().collect()];
    }
    let mut chunks = Vec::with_capacity(scores.len().div_ceil(size));
    let mut current = HashMap::with_capacity(size);
    for (player_id, score) in scores {
        current.insert(player_id, score);
        if current.len() >= size {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(n: usize) -> Vec<(String, i64)> {
        (0..n).map(|i| (format!("p{i}"), i as i64)).collect()
    }

    #[test]
    fn chunking_respects_batch_size() {
        let chunks = chunked(scores(2500), 1000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1000);
        assert_eq!(chunks[1].len(), 1000);
        assert_eq!(chunks[2].len(), 500);

        let total: usize = chunks.iter().map(HashMap::len).sum();
        assert_eq!(total, 2500);
    }

    #[test]
    fn chunking_edge_cases() {
        assert!(chunked(Vec::new(), 1000).is_empty());
        assert_eq!(chunked(scores(3), 0), vec![scores(3).into_iter().collect()]);
        let exact = chunked(scores(1000), 1000);
        assert_eq!(exact.len(), 1);
    }
}
