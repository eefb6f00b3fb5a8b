use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use vidsync_adapters::{CollectionClientConfig, DEFAULT_PAGE_LIMIT};

pub const DEFAULT_PLAYLIST_URL: &str =
    "https://www.youtube.com/watch?v=MORU93Ibwd0&list=PLhQVfDe_eNXoDyRUzjYUV9uVvPc3yucvB";
pub const DEFAULT_API_BASE: &str = "https://www.wixapis.com/wix-data/v2";
pub const DEFAULT_COLLECTION_ID: &str = "TvBroadcasts";

/// What the reconciler does when the collection snapshot file is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingSnapshotPolicy {
    /// Reconcile against an empty collection.
    TreatAsEmpty,
    /// Abort the cycle.
    Abort,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub playlist_url: String,
    pub collection: CollectionClientConfig,
    pub page_limit: usize,
    pub playlist_snapshot: PathBuf,
    pub collection_snapshot: PathBuf,
    pub interval: Duration,
    pub cron: Option<String>,
    pub ytdlp_bin: PathBuf,
    pub socket_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub missing_collection_snapshot: MissingSnapshotPolicy,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Everything has a default except
    /// `WIX_ACCESS_TOKEN` and `WIX_SITE_ID`, which are left blank when unset
    /// and checked by [`SyncConfig::require_credentials`] before any CMS call.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let number = |key: &str, default: u64| -> Result<u64> {
            match var(key) {
                Some(v) => v
                    .trim()
                    .parse()
                    .with_context(|| format!("{key} must be a non-negative integer, got {v:?}")),
                None => Ok(default),
            }
        };

        let page_limit = number("WIX_PAGE_LIMIT", DEFAULT_PAGE_LIMIT as u64)? as usize;
        if page_limit == 0 {
            bail!("WIX_PAGE_LIMIT must be at least 1");
        }

        Ok(Self {
            playlist_url: var("VIDSYNC_PLAYLIST_URL")
                .unwrap_or_else(|| DEFAULT_PLAYLIST_URL.to_string()),
            collection: CollectionClientConfig {
                api_base: var("WIX_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
                access_token: var("WIX_ACCESS_TOKEN").unwrap_or_default(),
                site_id: var("WIX_SITE_ID").unwrap_or_default(),
                collection_id: var("WIX_COLLECTION_ID")
                    .unwrap_or_else(|| DEFAULT_COLLECTION_ID.to_string()),
            },
            page_limit,
            playlist_snapshot: var("VIDSYNC_PLAYLIST_SNAPSHOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("youtube_playlist.csv")),
            collection_snapshot: var("VIDSYNC_COLLECTION_SNAPSHOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("wix_data.csv")),
            interval: Duration::from_secs(number("VIDSYNC_INTERVAL_SECS", 3600)?),
            cron: var("VIDSYNC_CRON"),
            ytdlp_bin: var("VIDSYNC_YTDLP_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("yt-dlp")),
            socket_timeout_secs: number("VIDSYNC_SOCKET_TIMEOUT_SECS", 30)?,
            http_timeout_secs: number("VIDSYNC_HTTP_TIMEOUT_SECS", 30)?,
            user_agent: var("VIDSYNC_USER_AGENT").unwrap_or_else(|| "vidsync/0.1".to_string()),
            missing_collection_snapshot: match var("VIDSYNC_STRICT_SNAPSHOTS") {
                Some(v) if matches!(v.trim(), "1" | "true" | "TRUE" | "True") => {
                    MissingSnapshotPolicy::Abort
                }
                _ => MissingSnapshotPolicy::TreatAsEmpty,
            },
        })
    }

    /// Fails unless both CMS credentials are present.
    pub fn require_credentials(&self) -> Result<()> {
        for (key, value) in [
            ("WIX_ACCESS_TOKEN", &self.collection.access_token),
            ("WIX_SITE_ID", &self.collection.site_id),
        ] {
            if value.trim().is_empty() {
                bail!("{key} must be set (environment or .env)");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_credentials_are_set() {
        let config =
            SyncConfig::from_lookup(lookup(&[("WIX_ACCESS_TOKEN", "tok"), ("WIX_SITE_ID", "site")]))
                .expect("config");

        assert_eq!(config.collection.collection_id, DEFAULT_COLLECTION_ID);
        assert_eq!(config.collection.api_base, DEFAULT_API_BASE);
        assert_eq!(config.page_limit, 50);
        assert_eq!(config.interval, Duration::from_secs(3600));
        assert_eq!(config.playlist_snapshot, PathBuf::from("youtube_playlist.csv"));
        assert_eq!(config.collection_snapshot, PathBuf::from("wix_data.csv"));
        assert_eq!(config.cron, None);
        assert_eq!(
            config.missing_collection_snapshot,
            MissingSnapshotPolicy::TreatAsEmpty
        );
    }

    #[test]
    fn credentials_are_checked_on_demand() {
        let config = SyncConfig::from_lookup(lookup(&[])).expect("loads without credentials");
        let err = config.require_credentials().expect_err("no token");
        assert!(err.to_string().contains("WIX_ACCESS_TOKEN"));

        let config = SyncConfig::from_lookup(lookup(&[("WIX_ACCESS_TOKEN", "tok"), ("WIX_SITE_ID", "  ")]))
            .expect("config");
        let err = config.require_credentials().expect_err("blank site");
        assert!(err.to_string().contains("WIX_SITE_ID"));

        let config =
            SyncConfig::from_lookup(lookup(&[("WIX_ACCESS_TOKEN", "tok"), ("WIX_SITE_ID", "site")]))
                .expect("config");
        assert!(config.require_credentials().is_ok());
    }

    #[test]
    fn overrides_and_bad_numbers() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("WIX_ACCESS_TOKEN", "tok"),
            ("WIX_SITE_ID", "site"),
            ("WIX_PAGE_LIMIT", "25"),
            ("VIDSYNC_INTERVAL_SECS", "90"),
            ("VIDSYNC_CRON", "0 0 * * * *"),
            ("VIDSYNC_STRICT_SNAPSHOTS", "true"),
        ]))
        .expect("config");
        assert_eq!(config.page_limit, 25);
        assert_eq!(config.interval, Duration::from_secs(90));
        assert_eq!(config.cron.as_deref(), Some("0 0 * * * *"));
        assert_eq!(config.missing_collection_snapshot, MissingSnapshotPolicy::Abort);

        assert!(SyncConfig::from_lookup(lookup(&[
            ("WIX_ACCESS_TOKEN", "tok"),
            ("WIX_SITE_ID", "site"),
            ("VIDSYNC_INTERVAL_SECS", "hourly"),
        ]))
        .is_err());
        assert!(SyncConfig::from_lookup(lookup(&[
            ("WIX_ACCESS_TOKEN", "tok"),
            ("WIX_SITE_ID", "site"),
            ("WIX_PAGE_LIMIT", "0"),
        ]))
        .is_err());
    }
}
