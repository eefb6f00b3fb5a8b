//! Core domain model for the playlist to CMS collection sync.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const CRATE_NAME: &str = "vidsync-core";

/// Placeholder written for fields the extractor did not report.
pub const NOT_AVAILABLE: &str = "N/A";

/// Join key shared by the playlist snapshot and the collection.
pub const VIDEO_ID_FIELD: &str = "video_id";

/// Synthesized collection fields promoted next to the item payload.
pub const ITEM_ID_FIELD: &str = "_id";
pub const CREATED_DATE_FIELD: &str = "_createdDate";
pub const UPDATED_DATE_FIELD: &str = "_updatedDate";

/// Fixed column order of the playlist snapshot.
pub const PLAYLIST_COLUMNS: [&str; 6] = [
    VIDEO_ID_FIELD,
    "title",
    "url",
    "release_date",
    "view_count",
    "duration",
];

/// One flattened collection item: the item's data payload plus the synthesized
/// `_id`, `_createdDate` and `_updatedDate` fields.
pub type CollectionRecord = Map<String, Value>;

/// Normalized playlist entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_id: String,
    pub title: String,
    pub url: String,
    /// ISO date when the extractor reported a well-formed `YYYYMMDD` value,
    /// the raw value when it did not, `N/A` when absent.
    pub release_date: String,
    pub view_count: Option<u64>,
    /// Clock string (`H:MM:SS` or `M:SS`).
    pub duration: Option<String>,
}

impl VideoRecord {
    /// Cells in [`PLAYLIST_COLUMNS`] order, with absent values rendered as `N/A`.
    pub fn to_cells(&self) -> [String; 6] {
        [
            self.video_id.clone(),
            self.title.clone(),
            self.url.clone(),
            self.release_date.clone(),
            self.view_count
                .map(|v| v.to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            self.duration
                .clone()
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        ]
    }

    /// Inverse of [`VideoRecord::to_cells`]. An unparseable view count is
    /// treated as absent.
    pub fn from_cells(cells: [&str; 6]) -> Self {
        let [video_id, title, url, release_date, view_count, duration] = cells;
        Self {
            video_id: video_id.to_string(),
            title: title.to_string(),
            url: url.to_string(),
            release_date: release_date.to_string(),
            view_count: present(view_count).and_then(|v| v.parse().ok()),
            duration: present(duration).map(str::to_string),
        }
    }
}

/// `None` for empty cells and the `N/A` sentinel.
pub fn present(cell: &str) -> Option<&str> {
    let trimmed = cell.trim();
    if trimmed.is_empty() || trimmed == NOT_AVAILABLE {
        None
    } else {
        Some(trimmed)
    }
}

/// Converts a compact `YYYYMMDD` date into `YYYY-MM-DD`. Anything else is
/// returned unchanged.
pub fn normalize_release_date(raw: &str) -> String {
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw.to_string();
    }
    match NaiveDate::parse_from_str(raw, "%Y%m%d") {
        Ok(date) => date.format("%Y-%m-%d").to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Formats seconds as `H:MM:SS`, dropping the hour component when it is zero.
pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Parses a clock string produced by [`format_duration`] back into seconds.
pub fn parse_clock_duration(clock: &str) -> Option<u64> {
    let parts = clock
        .trim()
        .split(':')
        .map(|p| p.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    match parts.as_slice() {
        [m, s] if *s < 60 => Some(m * 60 + s),
        [h, m, s] if *m < 60 && *s < 60 => Some(h * 3600 + m * 60 + s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_dates_become_iso() {
        assert_eq!(normalize_release_date("20230115"), "2023-01-15");
        assert_eq!(normalize_release_date("19991231"), "1999-12-31");
    }

    #[test]
    fn malformed_dates_pass_through() {
        assert_eq!(normalize_release_date("2023-01-15"), "2023-01-15");
        assert_eq!(normalize_release_date("20231345"), "20231345");
        assert_eq!(normalize_release_date("2023011"), "2023011");
        assert_eq!(normalize_release_date(NOT_AVAILABLE), NOT_AVAILABLE);
        assert_eq!(normalize_release_date(""), "");
    }

    #[test]
    fn durations_format_with_and_without_hours() {
        assert_eq!(format_duration(3725), "1:02:05");
        assert_eq!(format_duration(125), "2:05");
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(3600), "1:00:00");
    }

    #[test]
    fn formatted_durations_parse_back_to_seconds() {
        for secs in [0, 1, 59, 60, 125, 3599, 3600, 3725, 86_399, 360_000] {
            assert_eq!(parse_clock_duration(&format_duration(secs)), Some(secs));
        }
        assert_eq!(parse_clock_duration("1:75"), None);
        assert_eq!(parse_clock_duration("abc"), None);
    }

    #[test]
    fn cells_render_sentinel_for_absent_values() {
        let record = VideoRecord {
            video_id: "abc".into(),
            title: "Title".into(),
            url: "https://www.youtube.com/watch?v=abc".into(),
            release_date: NOT_AVAILABLE.into(),
            view_count: None,
            duration: None,
        };
        let cells = record.to_cells();
        assert_eq!(cells[4], NOT_AVAILABLE);
        assert_eq!(cells[5], NOT_AVAILABLE);

        let refs = [
            cells[0].as_str(),
            cells[1].as_str(),
            cells[2].as_str(),
            cells[3].as_str(),
            cells[4].as_str(),
            cells[5].as_str(),
        ];
        assert_eq!(VideoRecord::from_cells(refs), record);
    }
}
