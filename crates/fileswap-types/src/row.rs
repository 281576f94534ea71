//! Persisted form of a swap: one flat row, the same shape in the JSON
//! snapshot, the SQLite table and the hosted `swaps` table.
//! Distinct from [`SwapRecord`] to keep the storage layout independent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{FileDescriptor, SwapRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRow {
    pub swap_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file1_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file1_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file1_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file2_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file2_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file2_size: Option<u64>,
}

// A slot counts as filled iff its url column is set.
fn descriptor(
    url: Option<String>,
    name: Option<String>,
    size: Option<u64>,
) -> Option<FileDescriptor> {
    url.map(|locator| FileDescriptor {
        locator,
        display_name: name.unwrap_or_default(),
        size_bytes: size.unwrap_or(0),
    })
}

fn columns(desc: Option<FileDescriptor>) -> (Option<String>, Option<String>, Option<u64>) {
    match desc {
        Some(d) => (Some(d.locator), Some(d.display_name), Some(d.size_bytes)),
        None => (None, None, None),
    }
}

impl From<SwapRow> for SwapRecord {
    fn from(row: SwapRow) -> Self {
        let file1 = descriptor(row.file1_url, row.file1_name, row.file1_size);
        // file2 is only meaningful once file1 is attached.
        let file2 = file1
            .as_ref()
            .and(descriptor(row.file2_url, row.file2_name, row.file2_size));
        Self {
            id: row.swap_id,
            created_at: row.created_at,
            expires_at: row.expires_at,
            file1,
            file2,
        }
    }
}

impl From<SwapRecord> for SwapRow {
    fn from(record: SwapRecord) -> Self {
        let (file1_url, file1_name, file1_size) = columns(record.file1);
        let (file2_url, file2_name, file2_size) = columns(record.file2);
        Self {
            swap_id: record.id,
            created_at: record.created_at,
            expires_at: record.expires_at,
            file1_url,
            file1_name,
            file1_size,
            file2_url,
            file2_name,
            file2_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_without_urls_has_no_descriptors() {
        let json = r#"{
            "swap_id": "abc",
            "created_at": "2025-03-01T10:00:00Z",
            "expires_at": "2025-03-02T10:00:00Z",
            "file1_url": null,
            "file1_name": null,
            "file1_size": null
        }"#;
        let row: SwapRow = serde_json::from_str(json).unwrap();
        let record = SwapRecord::from(row);
        assert_eq!(record.id, "abc");
        assert!(record.file1.is_none());
        assert!(record.file2.is_none());
    }

    #[test]
    fn hosted_timestamps_with_offsets_parse() {
        let json = r#"{
            "swap_id": "abc",
            "created_at": "2025-03-01T10:00:00.123456+00:00",
            "expires_at": "2025-03-02T10:00:00.123456+00:00",
            "file1_url": "https://blob.example/abc/a.txt",
            "file1_name": "a.txt",
            "file1_size": 100
        }"#;
        let record = SwapRecord::from(serde_json::from_str::<SwapRow>(json).unwrap());
        let file1 = record.file1.unwrap();
        assert_eq!(file1.display_name, "a.txt");
        assert_eq!(file1.size_bytes, 100);
    }

    #[test]
    fn file2_without_file1_is_dropped() {
        let json = r#"{
            "swap_id": "abc",
            "created_at": "2025-03-01T10:00:00Z",
            "expires_at": "2025-03-02T10:00:00Z",
            "file2_url": "https://blob.example/abc/b.txt",
            "file2_name": "b.txt",
            "file2_size": 7
        }"#;
        let record = SwapRecord::from(serde_json::from_str::<SwapRow>(json).unwrap());
        assert!(record.file1.is_none());
        assert!(record.file2.is_none());
        assert_eq!(
            record.status_at(record.created_at),
            crate::SwapStatus::WaitingForFile1
        );
    }

    #[test]
    fn empty_slots_are_omitted_from_json() {
        let record = SwapRecord::new("abc", Utc::now());
        let value = serde_json::to_value(SwapRow::from(record)).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("swap_id"));
        assert!(!obj.contains_key("file1_url"));
        assert!(!obj.contains_key("file2_size"));
    }
}
