use serde::{Deserialize, Serialize};

use crate::models::{SwapRecord, SwapStatus};
use crate::row::SwapRow;

// -- Uploads --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub swap_id: String,
    pub file_id: String,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapUploadResponse {
    pub swap_id: String,
    pub file_id: String,
    pub filename: String,
    pub swap: SwapView,
}

// -- Swaps --

/// Read-only projection of a swap: the stored columns plus derived status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapView {
    #[serde(flatten)]
    pub row: SwapRow,
    pub status: SwapStatus,
}

impl SwapView {
    pub fn new(record: SwapRecord, status: SwapStatus) -> Self {
        Self {
            row: record.into(),
            status,
        }
    }
}

// -- Errors --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use crate::{
        ErrorResponse, FileDescriptor, SwapRecord, SwapStatus, SwapUploadResponse, SwapView,
        UploadResponse,
    };
    use chrono::{TimeZone, Utc};

    fn record() -> SwapRecord {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut record = SwapRecord::new("abc", created);
        record.file1 = Some(FileDescriptor {
            locator: "/uploads/k1-a.txt".into(),
            display_name: "a.txt".into(),
            size_bytes: 3,
        });
        record
    }

    #[test]
    fn upload_responses_use_camel_case() {
        let upload = serde_json::to_value(UploadResponse {
            swap_id: "abc".into(),
            file_id: "/uploads/k1-a.txt".into(),
            filename: "a.txt".into(),
        })
        .unwrap();
        assert_eq!(upload["swapId"], "abc");
        assert_eq!(upload["fileId"], "/uploads/k1-a.txt");

        let swap = serde_json::to_value(SwapUploadResponse {
            swap_id: "abc".into(),
            file_id: "/uploads/k2-b.txt".into(),
            filename: "b.txt".into(),
            swap: SwapView::new(record(), SwapStatus::WaitingForFile2),
        })
        .unwrap();
        assert_eq!(swap["swap"]["swap_id"], "abc");
        assert_eq!(swap["swap"]["file1_name"], "a.txt");
        assert_eq!(swap["swap"]["status"], "waiting_for_file2");
    }

    #[test]
    fn error_body_has_a_single_field() {
        let body = serde_json::to_value(ErrorResponse {
            error: "Swap not found".into(),
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "error": "Swap not found" }));
    }
}
