use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;
use vidsync_adapters::{
    fetch_all_items, CollectionApi, PlaylistExtractor, PlaylistFetcher, WixCollectionClient,
    YtDlpExtractor,
};
use vidsync_storage::{
    write_collection_snapshot, write_playlist_snapshot, HttpClientConfig, HttpFetcher,
    StoredSnapshot,
};

use crate::config::SyncConfig;
use crate::reconcile::{missing_ids, FailedInsert, Reconciler};

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotDigest {
    pub path: String,
    pub rows: usize,
    pub bytes: usize,
    pub sha256: String,
}

impl From<StoredSnapshot> for SnapshotDigest {
    fn from(stored: StoredSnapshot) -> Self {
        Self {
            path: stored.path.display().to_string(),
            rows: stored.rows,
            bytes: stored.byte_size,
            sha256: stored.content_hash,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub playlist_videos: usize,
    /// `None` when the fetch came back empty and the old snapshot was kept.
    pub playlist_snapshot: Option<SnapshotDigest>,
    pub collection_items: usize,
    pub collection_snapshot: SnapshotDigest,
    pub missing: Vec<String>,
    pub inserted: Vec<String>,
    pub failed: Vec<FailedInsert>,
}

/// One unit of scheduled work.
#[async_trait]
pub trait SyncCycle: Send + Sync {
    async fn run_cycle(&self) -> Result<CycleSummary>;
}

pub struct SyncPipeline {
    config: SyncConfig,
    playlist: PlaylistFetcher,
    collection: Arc<dyn CollectionApi>,
    reconciler: Reconciler,
}

impl SyncPipeline {
    /// Wires the yt-dlp extractor and the Wix client from `config`.
    pub fn new(config: SyncConfig) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
        })?;
        let collection = WixCollectionClient::new(http, config.collection.clone());
        let extractor = YtDlpExtractor::new(config.ytdlp_bin.clone(), config.socket_timeout_secs);
        Ok(Self::with_components(
            config,
            Arc::new(extractor),
            Arc::new(collection),
        ))
    }

    pub fn with_components(
        config: SyncConfig,
        extractor: Arc<dyn PlaylistExtractor>,
        collection: Arc<dyn CollectionApi>,
    ) -> Self {
        let reconciler = Reconciler::new(
            config.playlist_snapshot.clone(),
            config.collection_snapshot.clone(),
            config.missing_collection_snapshot,
        );
        Self {
            config,
            playlist: PlaylistFetcher::new(extractor),
            collection,
            reconciler,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Fetches the playlist and rewrites its snapshot. An empty fetch leaves
    /// the previous snapshot in place.
    pub async fn refresh_playlist_snapshot(&self) -> Result<(usize, Option<StoredSnapshot>)> {
        let videos = self.playlist.fetch(&self.config.playlist_url).await;
        if videos.is_empty() {
            warn!(
                path = %self.config.playlist_snapshot.display(),
                "no videos were extracted; keeping previous playlist snapshot"
            );
            return Ok((0, None));
        }

        let stored = write_playlist_snapshot(&self.config.playlist_snapshot, &videos)
            .await
            .context("writing playlist snapshot")?;
        info!(videos = videos.len(), path = %stored.path.display(), "playlist snapshot saved");
        Ok((videos.len(), Some(stored)))
    }

    /// Fetches the whole collection and rewrites its snapshot. Any API failure
    /// is returned so the cycle stops before reconciling.
    pub async fn refresh_collection_snapshot(&self) -> Result<StoredSnapshot> {
        self.config.require_credentials()?;
        info!(
            collection_id = %self.config.collection.collection_id,
            "fetching collection data"
        );
        let records = fetch_all_items(self.collection.as_ref(), self.config.page_limit)
            .await
            .context("fetching collection items")?;
        let stored = write_collection_snapshot(&self.config.collection_snapshot, &records)
            .await
            .context("writing collection snapshot")?;
        info!(items = stored.rows, path = %stored.path.display(), "collection snapshot saved");
        Ok(stored)
    }

    /// The missing set from the snapshots currently on disk, without inserting.
    pub async fn preview_missing(&self) -> Result<Vec<String>> {
        let loaded = self.reconciler.load().await?;
        Ok(missing_ids(
            loaded.videos.iter().map(|v| v.video_id.as_str()),
            &loaded.collection_ids,
        )
        .into_iter()
        .collect())
    }

    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_cycle", %run_id);
        async move {
            let started_at = Utc::now();
            self.config.require_credentials()?;

            let (playlist_videos, playlist_snapshot) = self.refresh_playlist_snapshot().await?;
            let collection_snapshot = self.refresh_collection_snapshot().await?;
            let report = self
                .reconciler
                .reconcile(self.collection.as_ref())
                .await
                .context("reconciling snapshots")?;

            let summary = CycleSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                playlist_videos,
                playlist_snapshot: playlist_snapshot.map(SnapshotDigest::from),
                collection_items: collection_snapshot.rows,
                collection_snapshot: collection_snapshot.into(),
                missing: report.missing,
                inserted: report.inserted,
                failed: report.failed,
            };
            info!(
                missing = summary.missing.len(),
                inserted = summary.inserted.len(),
                failed = summary.failed.len(),
                "sync cycle complete"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl SyncCycle for SyncPipeline {
    async fn run_cycle(&self) -> Result<CycleSummary> {
        SyncPipeline::run_cycle(self).await
    }
}
