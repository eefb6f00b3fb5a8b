//! CSV snapshot storage + HTTP utilities for vidsync.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;
use vidsync_core::{CollectionRecord, VideoRecord, ITEM_ID_FIELD, PLAYLIST_COLUMNS, VIDEO_ID_FIELD};

pub const CRATE_NAME: &str = "vidsync-storage";

#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub path: PathBuf,
    pub rows: usize,
    pub byte_size: usize,
    pub content_hash: String,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot {} does not exist", path.display())]
    Missing { path: PathBuf },
    #[error("snapshot {} has no `{column}` column", path.display())]
    MissingColumn { path: PathBuf, column: String },
    #[error("reading snapshot {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing snapshot {}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Replace `path` with `bytes` through a sibling temp file and a rename, so a
/// reader never observes a half-written snapshot.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating snapshot directory {}", parent.display()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp snapshot file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp snapshot file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp snapshot file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming temp snapshot {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

async fn write_rows(
    path: &Path,
    header: &[String],
    rows: impl Iterator<Item = Vec<String>>,
) -> anyhow::Result<StoredSnapshot> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(header)
        .with_context(|| format!("encoding header for {}", path.display()))?;
    let mut count = 0usize;
    for row in rows {
        writer
            .write_record(&row)
            .with_context(|| format!("encoding row {count} for {}", path.display()))?;
        count += 1;
    }
    let bytes = writer.into_inner().context("flushing csv buffer")?;

    write_atomic(path, &bytes).await?;
    let stored = StoredSnapshot {
        path: path.to_path_buf(),
        rows: count,
        byte_size: bytes.len(),
        content_hash: sha256_hex(&bytes),
    };
    debug!(path = %path.display(), rows = count, sha256 = %stored.content_hash, "snapshot written");
    Ok(stored)
}

/// Writes the playlist snapshot with the fixed [`PLAYLIST_COLUMNS`] header.
pub async fn write_playlist_snapshot(
    path: impl AsRef<Path>,
    videos: &[VideoRecord],
) -> anyhow::Result<StoredSnapshot> {
    let header = PLAYLIST_COLUMNS.iter().map(|c| c.to_string()).collect::<Vec<_>>();
    write_rows(
        path.as_ref(),
        &header,
        videos.iter().map(|v| v.to_cells().to_vec()),
    )
    .await
}

/// Union of keys across all records, sorted, with `_id` forced first.
pub fn collection_columns(records: &[CollectionRecord]) -> Vec<String> {
    let keys = records
        .iter()
        .flat_map(|r| r.keys().cloned())
        .collect::<BTreeSet<_>>();
    let mut columns = vec![ITEM_ID_FIELD.to_string()];
    columns.extend(keys.into_iter().filter(|k| k != ITEM_ID_FIELD));
    columns
}

/// Flattens a JSON value into one CSV cell. Nested objects and arrays are
/// embedded as compact JSON.
pub fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Writes the collection snapshot. An empty collection still produces a
/// header-only file so stale rows from an earlier cycle never survive.
pub async fn write_collection_snapshot(
    path: impl AsRef<Path>,
    records: &[CollectionRecord],
) -> anyhow::Result<StoredSnapshot> {
    let columns = collection_columns(records);
    let rows = records.iter().map(|record| {
        columns
            .iter()
            .map(|c| record.get(c).map(render_cell).unwrap_or_default())
            .collect::<Vec<_>>()
    });
    write_rows(path.as_ref(), &columns, rows).await
}

async fn open_snapshot(path: &Path) -> Result<csv::Reader<std::io::Cursor<Vec<u8>>>, SnapshotError> {
    let bytes = fs::read(path).await.map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            SnapshotError::Missing {
                path: path.to_path_buf(),
            }
        } else {
            SnapshotError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    Ok(csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(std::io::Cursor::new(bytes)))
}

fn csv_error(path: &Path) -> impl Fn(csv::Error) -> SnapshotError + '_ {
    move |source| SnapshotError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

/// Reads every value of `column`. A file with no data rows yields an empty
/// list even when the column is absent from its header.
pub async fn read_column(
    path: impl AsRef<Path>,
    column: &str,
) -> Result<Vec<String>, SnapshotError> {
    let path = path.as_ref();
    let mut reader = open_snapshot(path).await?;
    let index = reader
        .headers()
        .map_err(csv_error(path))?
        .iter()
        .position(|h| h == column);

    let mut values = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error(path))?;
        let Some(index) = index else {
            return Err(SnapshotError::MissingColumn {
                path: path.to_path_buf(),
                column: column.to_string(),
            });
        };
        values.push(record.get(index).unwrap_or_default().to_string());
    }
    Ok(values)
}

/// Reads the playlist snapshot back into records. Only `video_id` is
/// required; other absent columns read as empty cells.
pub async fn read_playlist_snapshot(
    path: impl AsRef<Path>,
) -> Result<Vec<VideoRecord>, SnapshotError> {
    let path = path.as_ref();
    let mut reader = open_snapshot(path).await?;
    let headers = reader.headers().map_err(csv_error(path))?.clone();
    let indices = PLAYLIST_COLUMNS.map(|c| headers.iter().position(|h| h == c));
    if indices[0].is_none() {
        return Err(SnapshotError::MissingColumn {
            path: path.to_path_buf(),
            column: VIDEO_ID_FIELD.to_string(),
        });
    }

    let mut videos = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error(path))?;
        let cells = indices.map(|i| i.and_then(|i| record.get(i)).unwrap_or_default());
        videos.push(VideoRecord::from_cells(cells));
    }
    Ok(videos)
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Turns any status outside `accepted` into [`FetchError::HttpStatus`].
    pub fn require_status(self, accepted: &[u16]) -> Result<Self, FetchError> {
        if accepted.contains(&self.status.as_u16()) {
            Ok(self)
        } else {
            Err(FetchError::HttpStatus {
                status: self.status.as_u16(),
                url: self.final_url.clone(),
                body: self.body_text(),
            })
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|source| FetchError::Decode {
            url: self.final_url.clone(),
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
    #[error("decoding response from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Thin reqwest wrapper. No retries: a failed request surfaces to the caller
/// and is retried by the next sync cycle.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    /// POSTs `body` as JSON and returns the response whatever its status.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &B,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_post", url);
        async move {
            let mut request = self.client.post(url).json(body);
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
            let resp = request.send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();
            let body = resp.bytes().await?.to_vec();
            debug!(status = status.as_u16(), bytes = body.len(), "response received");
            Ok(FetchedResponse {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use vidsync_core::NOT_AVAILABLE;

    fn record(value: Value) -> CollectionRecord {
        value.as_object().cloned().expect("object")
    }

    fn video(id: &str, views: Option<u64>) -> VideoRecord {
        VideoRecord {
            video_id: id.to_string(),
            title: format!("Episode {id}, part \"one\""),
            url: format!("https://www.youtube.com/watch?v={id}"),
            release_date: "2024-03-01".into(),
            view_count: views,
            duration: Some("12:04".into()),
        }
    }

    #[test]
    fn snapshot_hashing_is_stable() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn playlist_snapshot_keeps_declared_column_order() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("youtube_playlist.csv");
        let videos = vec![video("a1", Some(42)), video("b2", None)];

        let stored = write_playlist_snapshot(&path, &videos).await.expect("write");
        assert_eq!(stored.rows, 2);

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.starts_with("video_id,title,url,release_date,view_count,duration\n"));
        assert!(text.contains(NOT_AVAILABLE));

        let back = read_playlist_snapshot(&path).await.expect("read back");
        assert_eq!(back, videos);
    }

    #[tokio::test]
    async fn collection_snapshot_sorts_columns_with_id_first() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("wix_data.csv");
        let records = vec![
            record(json!({"video_id": "a1", "title": "A", "_id": "x1", "tags": ["x", "y"]})),
            record(json!({"video_id": "b2", "_id": "x2", "meta": {"k": 1}, "view_count": 7})),
        ];

        write_collection_snapshot(&path, &records).await.expect("write");

        let text = std::fs::read_to_string(&path).expect("read");
        let header = text.lines().next().expect("header");
        assert_eq!(header, "_id,meta,tags,title,video_id,view_count");
        assert!(text.contains(r#""[""x"",""y""]""#));
        assert!(text.contains(r#""{""k"":1}""#));

        let ids = read_column(&path, VIDEO_ID_FIELD).await.expect("ids");
        assert_eq!(ids, vec!["a1".to_string(), "b2".to_string()]);
    }

    #[tokio::test]
    async fn empty_collection_writes_header_only_and_reads_no_ids() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("wix_data.csv");

        let stored = write_collection_snapshot(&path, &[]).await.expect("write");
        assert_eq!(stored.rows, 0);
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "_id\n");

        let ids = read_column(&path, VIDEO_ID_FIELD).await.expect("ids");
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn rewrite_replaces_previous_snapshot() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("youtube_playlist.csv");

        write_playlist_snapshot(&path, &[video("a1", None), video("b2", None)])
            .await
            .expect("first");
        write_playlist_snapshot(&path, &[video("c3", None)])
            .await
            .expect("second");

        let ids = read_column(&path, VIDEO_ID_FIELD).await.expect("ids");
        assert_eq!(ids, vec!["c3".to_string()]);
        let leftovers = std::fs::read_dir(dir.path())
            .expect("dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn missing_file_and_column_are_distinguishable() {
        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("absent.csv");
        assert!(matches!(
            read_column(&missing, VIDEO_ID_FIELD).await,
            Err(SnapshotError::Missing { .. })
        ));

        let path = dir.path().join("other.csv");
        std::fs::write(&path, "_id,title\nx1,A\n").expect("write");
        assert!(matches!(
            read_column(&path, VIDEO_ID_FIELD).await,
            Err(SnapshotError::MissingColumn { .. })
        ));
        assert!(matches!(
            read_playlist_snapshot(&path).await,
            Err(SnapshotError::MissingColumn { .. })
        ));
    }

    #[test]
    fn cells_flatten_scalars_and_nested_values() {
        assert_eq!(render_cell(&Value::Null), "");
        assert_eq!(render_cell(&json!("text")), "text");
        assert_eq!(render_cell(&json!(12)), "12");
        assert_eq!(render_cell(&json!(true)), "true");
        assert_eq!(render_cell(&json!({"a": [1, 2]})), r#"{"a":[1,2]}"#);
    }
}
