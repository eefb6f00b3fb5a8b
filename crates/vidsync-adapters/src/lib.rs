//! Source adapters: the playlist extractor and the CMS collection client.

pub mod collection;
pub mod playlist;

use thiserror::Error;

pub use collection::{
    fetch_all_items, flatten_item, insert_video, video_to_collection_data, CollectionApi,
    CollectionClientConfig, CollectionError, DataItem, QueryPage, WixCollectionClient,
    DEFAULT_PAGE_LIMIT, RELEASE_DATE_COLLECTION_FIELD,
};
pub use playlist::{
    normalize_entry, normalize_playlist, ExtractedPlaylist, PlaylistExtractor, PlaylistFetcher,
    YtDlpExtractor,
};

pub const CRATE_NAME: &str = "vidsync-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("spawning extractor `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("decoding extractor output")]
    Decode(#[from] serde_json::Error),
}
