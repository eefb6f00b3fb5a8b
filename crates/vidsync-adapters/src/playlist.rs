use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use vidsync_core::{format_duration, normalize_release_date, VideoRecord, NOT_AVAILABLE};

use crate::AdapterError;

/// Raw extractor output. Entries the extractor could not resolve arrive as
/// `null`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedPlaylist {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub entries: Option<Vec<Option<JsonValue>>>,
}

#[async_trait]
pub trait PlaylistExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(&self, url: &str) -> Result<ExtractedPlaylist, AdapterError>;
}

/// Runs `yt-dlp --dump-single-json` against the playlist URL.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    binary: PathBuf,
    socket_timeout_secs: u64,
}

impl YtDlpExtractor {
    pub fn new(binary: impl Into<PathBuf>, socket_timeout_secs: u64) -> Self {
        Self {
            binary: binary.into(),
            socket_timeout_secs,
        }
    }

    /// yt-dlp exits non-zero when `--ignore-errors` skipped an entry, so a
    /// failing status only matters when nothing was printed.
    pub fn decode_output(
        &self,
        success: bool,
        stdout: &[u8],
        stderr: &[u8],
    ) -> Result<ExtractedPlaylist, AdapterError> {
        let stderr = String::from_utf8_lossy(stderr);
        if stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(AdapterError::Message(format!(
                "{} produced no output (success={success}): {}",
                self.binary.display(),
                stderr.trim()
            )));
        }
        if !success {
            warn!(stderr = %stderr.trim(), "extractor reported errors; using partial output");
        }
        Ok(serde_json::from_slice(stdout)?)
    }
}

#[async_trait]
impl PlaylistExtractor for YtDlpExtractor {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn extract(&self, url: &str) -> Result<ExtractedPlaylist, AdapterError> {
        let output = Command::new(&self.binary)
            .arg("--dump-single-json")
            .arg("--ignore-errors")
            .arg("--no-warnings")
            .arg("--no-color")
            .arg("--socket-timeout")
            .arg(self.socket_timeout_secs.to_string())
            .arg(url)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| AdapterError::Spawn {
                program: self.binary.display().to_string(),
                source,
            })?;
        self.decode_output(output.status.success(), &output.stdout, &output.stderr)
    }
}

fn json_str<'a>(value: &'a JsonValue, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(JsonValue::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn json_u64(value: &JsonValue, key: &str) -> Option<u64> {
    let field = value.get(key)?;
    field.as_u64().or_else(|| {
        field
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f as u64)
    })
}

/// Normalizes one extractor entry. Entries without an id are dropped since
/// the id is the only join key against the collection.
pub fn normalize_entry(entry: &JsonValue) -> Option<VideoRecord> {
    let Some(video_id) = json_str(entry, "id") else {
        warn!("skipping playlist entry without an id");
        return None;
    };

    let url = json_str(entry, "webpage_url")
        .map(str::to_string)
        .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={video_id}"));

    Some(VideoRecord {
        video_id: video_id.to_string(),
        title: json_str(entry, "title").unwrap_or(NOT_AVAILABLE).to_string(),
        url,
        release_date: json_str(entry, "upload_date")
            .map(normalize_release_date)
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        view_count: json_u64(entry, "view_count"),
        duration: json_u64(entry, "duration").map(format_duration),
    })
}

pub fn normalize_playlist(playlist: &ExtractedPlaylist) -> Vec<VideoRecord> {
    let Some(entries) = &playlist.entries else {
        info!("no entries found in playlist");
        return Vec::new();
    };

    let total = entries.iter().filter(|e| e.is_some()).count();
    info!(total, unavailable = entries.len() - total, "playlist entries found");

    let mut videos = Vec::with_capacity(total);
    for (idx, entry) in entries.iter().flatten().enumerate() {
        if let Some(video) = normalize_entry(entry) {
            debug!(
                "[{}/{}] {} - {} - {}",
                idx + 1,
                total,
                video.video_id,
                video.release_date,
                video.title
            );
            videos.push(video);
        }
    }
    videos
}

/// Playlist Fetcher. Extraction failures are logged and turn into an empty
/// list; callers cannot tell "failed" from "empty playlist" by return value.
#[derive(Clone)]
pub struct PlaylistFetcher {
    extractor: Arc<dyn PlaylistExtractor>,
}

impl PlaylistFetcher {
    pub fn new(extractor: Arc<dyn PlaylistExtractor>) -> Self {
        Self { extractor }
    }

    pub async fn fetch(&self, playlist_url: &str) -> Vec<VideoRecord> {
        info!(extractor = self.extractor.name(), playlist_url, "fetching playlist information");
        match self.extractor.extract(playlist_url).await {
            Ok(playlist) => normalize_playlist(&playlist),
            Err(err) => {
                error!(error = %err, playlist_url, "playlist extraction failed");
                Vec::new()
            }
        }
    }
}
