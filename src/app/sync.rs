use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use super::feed::{Feed, FeedSource};
use crate::config::NameMap;
use crate::db::{Database, EpisodeRecord};

pub(crate) const SYNC_INTERVAL: Duration = Duration::from_secs(28 * 60);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SyncReport {
    pub(crate) feeds_synced: usize,
    pub(crate) feeds_empty: usize,
    pub(crate) feeds_failed: usize,
    pub(crate) unrecognized_feeds: Vec<String>,
    pub(crate) stored: usize,
    pub(crate) skipped: usize,
    pub(crate) interrupted: bool,
}

pub(crate) struct Syncer {
    podcasts: NameMap,
    source: Box<dyn FeedSource>,
}

impl Syncer {
    pub(crate) fn new(podcasts: NameMap, source: Box<dyn FeedSource>) -> Self {
        Self { podcasts, source }
    }

    /// One pass over the configured feeds, or just `filter` when given.
    pub(crate) fn sync(&self, db: &Database, filter: Option<&str>) -> Result<SyncReport> {
        self.sync_until(db, filter, &AtomicBool::new(false))
    }

    /// Like [`Syncer::sync`], but gives up at the next feed once `stop` is set.
    fn sync_until(
        &self,
        db: &Database,
        filter: Option<&str>,
        stop: &AtomicBool,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        info!(filter = filter.unwrap_or("*"), "start updating podcast data");

        for (podcast, url) in self.podcasts.iter() {
            if filter.is_some_and(|wanted| wanted != podcast) {
                continue;
            }
            if stop.load(Ordering::SeqCst) {
                info!(podcast, "sync pass interrupted by shutdown");
                report.interrupted = true;
                break;
            }

            debug!(podcast, url, "loading podcast feed");
            let feed = match self.source.fetch(url) {
                Ok(feed) => feed,
                Err(err) => {
                    warn!(podcast, "feed fetch failed: {err:#}");
                    report.feeds_failed += 1;
                    continue;
                }
            };

            info!(podcast, entries = feed.entries.len(), "feed loaded");
            if feed.entries.is_empty() {
                warn!(podcast, "podcast feed is empty");
                report.feeds_empty += 1;
                continue;
            }

            let (records, skipped) = records_from_feed(podcast, &feed);
            if skipped > 0 {
                report.unrecognized_feeds.push(podcast.to_string());
                report.skipped += skipped;
            }
            report.stored += db
                .upsert_all(&records)
                .with_context(|| format!("failed to store episodes for {podcast}"))?;
            report.feeds_synced += 1;
        }

        info!(
            stored = report.stored,
            skipped = report.skipped,
            failed = report.feeds_failed,
            "finished updating podcast data"
        );
        Ok(report)
    }
}

/// Normalizes feed entries into catalog records; returns how many were unusable.
pub(crate) fn records_from_feed(podcast: &str, feed: &Feed) -> (Vec<EpisodeRecord>, usize) {
    let mut records = Vec::with_capacity(feed.entries.len());
    let mut skipped = 0;

    for entry in &feed.entries {
        let Some(url) = entry.playable_url() else {
            warn!(
                podcast,
                entry = entry.title.as_str(),
                "the feed is in an unknown format, entry has no enclosure or media url"
            );
            skipped += 1;
            continue;
        };
        records.push(EpisodeRecord {
            podcast: podcast.to_string(),
            feed_title: feed.title.clone(),
            episode_title: entry.title.clone(),
            url: url.to_string(),
            published_at: entry.published_at.unwrap_or(0),
        });
    }

    (records, skipped)
}

/// Background sync thread; the catalog is the only state it shares.
pub(crate) struct SyncHandle {
    stopping: Arc<AtomicBool>,
    stop_tx: mpsc::Sender<()>,
    join_handle: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.join_handle.take() {
            if handle.join().is_err() {
                error!("podcast sync thread panicked");
            }
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub(crate) fn spawn_periodic(db: Database, syncer: Syncer, interval: Duration) -> Result<SyncHandle> {
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let stopping = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stopping);
    let join_handle = thread::Builder::new()
        .name("podcast-sync".to_string())
        .spawn(move || {
            loop {
                match syncer.sync_until(&db, None, &stop_flag) {
                    Ok(report) if report.interrupted => break,
                    Ok(_) => {}
                    Err(err) => error!("periodic podcast sync failed: {err:#}"),
                }
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("podcast sync thread stopped");
        })
        .context("failed to spawn podcast sync thread")?;

    Ok(SyncHandle {
        stopping,
        stop_tx,
        join_handle: Some(join_handle),
    })
}
