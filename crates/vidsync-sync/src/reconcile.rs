use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{error, info, warn};
use vidsync_adapters::{insert_video, CollectionApi};
use vidsync_core::{VideoRecord, VIDEO_ID_FIELD};
use vidsync_storage::{read_column, read_playlist_snapshot, SnapshotError};

use crate::config::MissingSnapshotPolicy;

/// Both snapshots as the reconciler sees them.
#[derive(Debug, Clone, Default)]
pub struct LoadedSnapshots {
    pub videos: Vec<VideoRecord>,
    pub collection_ids: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedInsert {
    pub video_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Sorted for stable logs; membership is what matters.
    pub missing: Vec<String>,
    pub inserted: Vec<String>,
    pub failed: Vec<FailedInsert>,
}

/// Playlist ids absent from the collection. `video_id` is the only identity.
pub fn missing_ids<'a>(
    playlist_ids: impl IntoIterator<Item = &'a str>,
    collection_ids: &HashSet<String>,
) -> BTreeSet<String> {
    playlist_ids
        .into_iter()
        .filter(|id| !collection_ids.contains(*id))
        .map(str::to_string)
        .collect()
}

/// LOAD -> DIFF -> INSERT over the two CSV snapshots.
#[derive(Debug, Clone)]
pub struct Reconciler {
    playlist_snapshot: PathBuf,
    collection_snapshot: PathBuf,
    missing_collection: MissingSnapshotPolicy,
}

impl Reconciler {
    pub fn new(
        playlist_snapshot: impl Into<PathBuf>,
        collection_snapshot: impl Into<PathBuf>,
        missing_collection: MissingSnapshotPolicy,
    ) -> Self {
        Self {
            playlist_snapshot: playlist_snapshot.into(),
            collection_snapshot: collection_snapshot.into(),
            missing_collection,
        }
    }

    /// A missing playlist snapshot always fails; a missing collection
    /// snapshot follows the configured policy.
    pub async fn load(&self) -> Result<LoadedSnapshots> {
        let videos = read_playlist_snapshot(&self.playlist_snapshot)
            .await
            .context("loading playlist snapshot")?;

        let collection_ids = match read_column(&self.collection_snapshot, VIDEO_ID_FIELD).await {
            Ok(ids) => ids,
            Err(SnapshotError::Missing { path })
                if self.missing_collection == MissingSnapshotPolicy::TreatAsEmpty =>
            {
                warn!(path = %path.display(), "collection snapshot missing; reconciling against an empty collection");
                Vec::new()
            }
            Err(err) => return Err(err).context("loading collection snapshot"),
        };

        Ok(LoadedSnapshots {
            videos,
            collection_ids: collection_ids
                .into_iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
        })
    }

    /// Inserts every missing id. Each insert stands alone: a failure is logged
    /// and recorded, and the remaining ids are still attempted.
    pub async fn insert_missing(
        &self,
        api: &dyn CollectionApi,
        videos: &[VideoRecord],
        missing: &BTreeSet<String>,
    ) -> ReconcileReport {
        let mut by_id: HashMap<&str, &VideoRecord> = HashMap::with_capacity(videos.len());
        for video in videos {
            by_id.entry(video.video_id.as_str()).or_insert(video);
        }

        let mut report = ReconcileReport {
            missing: missing.iter().cloned().collect(),
            ..Default::default()
        };

        for video_id in missing {
            let Some(video) = by_id.get(video_id.as_str()) else {
                warn!(%video_id, "missing id has no playlist row; skipping");
                continue;
            };
            match insert_video(api, video).await {
                Ok(_) => report.inserted.push(video_id.clone()),
                Err(err) => {
                    error!(%video_id, error = %err, "failed to insert video");
                    report.failed.push(FailedInsert {
                        video_id: video_id.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            inserted = report.inserted.len(),
            failed = report.failed.len(),
            "insert pass finished"
        );
        report
    }

    pub async fn reconcile(&self, api: &dyn CollectionApi) -> Result<ReconcileReport> {
        let loaded = self.load().await?;
        let missing = missing_ids(
            loaded.videos.iter().map(|v| v.video_id.as_str()),
            &loaded.collection_ids,
        );

        if missing.is_empty() {
            info!("no new video");
            return Ok(ReconcileReport::default());
        }

        info!(missing = missing.len(), "checking videos");
        Ok(self.insert_missing(api, &loaded.videos, &missing).await)
    }
}
