use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use thiserror::Error;
use tracing::info;
use vidsync_core::{
    CollectionRecord, VideoRecord, CREATED_DATE_FIELD, ITEM_ID_FIELD, UPDATED_DATE_FIELD,
    VIDEO_ID_FIELD,
};
use vidsync_storage::{FetchError, HttpFetcher};

pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// The collection stores the playlist's `release_date` under this name.
pub const RELEASE_DATE_COLLECTION_FIELD: &str = "release_date2";

#[derive(Debug, Clone)]
pub struct CollectionClientConfig {
    pub api_base: String,
    pub access_token: String,
    pub site_id: String,
    pub collection_id: String,
}

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("collection API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error(transparent)]
    Fetch(FetchError),
}

impl From<FetchError> for CollectionError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::HttpStatus { status, body, .. } => Self::Status { status, body },
            other => Self::Fetch(other),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    data_collection_id: &'a str,
    query: QueryBody,
    return_total_count: bool,
}

#[derive(Debug, Serialize)]
struct QueryBody {
    paging: Paging,
}

#[derive(Debug, Serialize)]
struct Paging {
    limit: usize,
    offset: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    data_items: Vec<DataItem>,
    #[serde(default)]
    paging_metadata: Option<PagingMetadata>,
}

#[derive(Debug, Deserialize)]
struct PagingMetadata {
    #[serde(default)]
    total: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertRequest<'a> {
    data_collection_id: &'a str,
    data_item: InsertItem,
}

#[derive(Debug, Serialize)]
struct InsertItem {
    data: CollectionRecord,
}

/// One item as returned by the query API.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created_date: Option<JsonValue>,
    #[serde(default)]
    pub updated_date: Option<JsonValue>,
    #[serde(default)]
    pub data: Option<Map<String, JsonValue>>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub items: Vec<DataItem>,
    pub total: Option<usize>,
}

#[async_trait]
pub trait CollectionApi: Send + Sync {
    async fn query_page(&self, limit: usize, offset: usize) -> Result<QueryPage, CollectionError>;

    /// Inserts one item and returns the server's representation of it.
    async fn insert(&self, data: CollectionRecord) -> Result<JsonValue, CollectionError>;
}

/// Wix Data v2 client.
#[derive(Debug, Clone)]
pub struct WixCollectionClient {
    http: HttpFetcher,
    config: CollectionClientConfig,
}

impl WixCollectionClient {
    pub fn new(http: HttpFetcher, config: CollectionClientConfig) -> Self {
        Self { http, config }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    fn headers(&self) -> [(&str, &str); 2] {
        [
            ("Authorization", self.config.access_token.as_str()),
            ("wix-site-id", self.config.site_id.as_str()),
        ]
    }
}

#[async_trait]
impl CollectionApi for WixCollectionClient {
    async fn query_page(&self, limit: usize, offset: usize) -> Result<QueryPage, CollectionError> {
        let body = QueryRequest {
            data_collection_id: &self.config.collection_id,
            query: QueryBody {
                paging: Paging { limit, offset },
            },
            return_total_count: true,
        };
        let resp = self
            .http
            .post_json(&self.endpoint("items/query"), &self.headers(), &body)
            .await?
            .require_status(&[200])?;
        let parsed: QueryResponse = resp.json()?;
        Ok(QueryPage {
            items: parsed.data_items,
            total: parsed.paging_metadata.and_then(|m| m.total),
        })
    }

    async fn insert(&self, data: CollectionRecord) -> Result<JsonValue, CollectionError> {
        let body = InsertRequest {
            data_collection_id: &self.config.collection_id,
            data_item: InsertItem { data },
        };
        let resp = self
            .http
            .post_json(&self.endpoint("items"), &self.headers(), &body)
            .await?
            .require_status(&[200, 201])?;
        Ok(resp.json()?)
    }
}

/// Promotes the item's data payload to the top level and adds `_id`,
/// `_createdDate` and `_updatedDate`.
pub fn flatten_item(item: DataItem) -> CollectionRecord {
    let mut record = item.data.unwrap_or_default();
    record.insert(
        ITEM_ID_FIELD.to_string(),
        JsonValue::String(item.id.unwrap_or_default()),
    );
    record.insert(
        CREATED_DATE_FIELD.to_string(),
        item.created_date.unwrap_or_else(|| json!("")),
    );
    record.insert(
        UPDATED_DATE_FIELD.to_string(),
        item.updated_date.unwrap_or_else(|| json!("")),
    );
    record
}

/// Collection Fetcher: pages through the whole collection.
///
/// Stops on an empty page, a page shorter than `limit`, or once `offset`
/// reaches the reported total. A missing total counts as zero, so such a
/// response ends paging after its first page.
pub async fn fetch_all_items(
    api: &dyn CollectionApi,
    limit: usize,
) -> Result<Vec<CollectionRecord>, CollectionError> {
    let limit = limit.max(1);
    let mut offset = 0usize;
    let mut records = Vec::new();

    loop {
        info!(offset, limit, "fetching collection items");
        let page = api.query_page(limit, offset).await?;
        if page.items.is_empty() {
            break;
        }

        let batch = page.items.len();
        records.extend(page.items.into_iter().map(flatten_item));
        info!(retrieved = batch, "collection page retrieved");

        offset += limit;
        if offset >= page.total.unwrap_or(0) || batch < limit {
            break;
        }
    }

    info!(total = records.len(), "collection items fetched");
    Ok(records)
}

/// Maps a playlist record onto the collection schema. Absent optional fields
/// are left out rather than sent as null.
pub fn video_to_collection_data(video: &VideoRecord) -> CollectionRecord {
    let mut data = Map::new();
    data.insert(VIDEO_ID_FIELD.to_string(), json!(video.video_id));
    data.insert("title".to_string(), json!(video.title));
    data.insert("url".to_string(), json!(video.url));
    data.insert(
        RELEASE_DATE_COLLECTION_FIELD.to_string(),
        json!(video.release_date),
    );
    if let Some(view_count) = video.view_count {
        data.insert("view_count".to_string(), json!(view_count));
    }
    if let Some(duration) = &video.duration {
        data.insert("duration".to_string(), json!(duration));
    }
    data
}

/// Collection Writer. No retry: a failed insert is picked up again by the
/// next cycle because the id is still missing then.
pub async fn insert_video(
    api: &dyn CollectionApi,
    video: &VideoRecord,
) -> Result<JsonValue, CollectionError> {
    let created = api.insert(video_to_collection_data(video)).await?;
    info!(video_id = %video.video_id, "inserted video");
    Ok(created)
}
