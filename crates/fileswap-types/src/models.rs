use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 10 MiB upload limit per file
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Swaps are readable for this long after creation and are never renewed.
pub const SWAP_LIFETIME_HOURS: i64 = 24;

pub fn swap_lifetime() -> Duration {
    Duration::hours(SWAP_LIFETIME_HOURS)
}

/// Metadata for one uploaded file. The bytes themselves live in a blob sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Where the blob sink put the bytes (local `/uploads/...` path or URL).
    pub locator: String,
    pub display_name: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    WaitingForFile1,
    WaitingForFile2,
    Completed,
    Expired,
}

impl SwapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingForFile1 => "waiting_for_file1",
            Self::WaitingForFile2 => "waiting_for_file2",
            Self::Completed => "completed",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the two upload slots of a swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    File1,
    File2,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File1 => f.write_str("file1"),
            Self::File2 => f.write_str("file2"),
        }
    }
}

/// One file-exchange session.
///
/// Status is never stored; it is derived from the attachments and the clock
/// with [`SwapRecord::status_at`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub file1: Option<FileDescriptor>,
    pub file2: Option<FileDescriptor>,
}

impl SwapRecord {
    /// A fresh record with both slots empty, expiring one lifetime from `now`.
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at: now,
            expires_at: now + swap_lifetime(),
            file1: None,
            file2: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Expiry is checked first: a completed swap past its deadline is
    /// `Expired`, never `Completed`.
    pub fn status_at(&self, now: DateTime<Utc>) -> SwapStatus {
        if self.is_expired_at(now) {
            SwapStatus::Expired
        } else if self.file1.is_none() {
            SwapStatus::WaitingForFile1
        } else if self.file2.is_none() {
            SwapStatus::WaitingForFile2
        } else {
            SwapStatus::Completed
        }
    }

    pub fn slot(&self, slot: Slot) -> Option<&FileDescriptor> {
        match slot {
            Slot::File1 => self.file1.as_ref(),
            Slot::File2 => self.file2.as_ref(),
        }
    }

    /// Apply an attachment if the slot is free and the upload order holds.
    /// The record is left untouched on rejection.
    pub fn apply(&mut self, update: &SwapUpdate) -> Result<(), UpdateRejected> {
        match update {
            SwapUpdate::AttachFile1(desc) => {
                if self.file1.is_some() {
                    return Err(UpdateRejected::SlotOccupied(Slot::File1));
                }
                self.file1 = Some(desc.clone());
            }
            SwapUpdate::AttachFile2(desc) => {
                if self.file1.is_none() {
                    return Err(UpdateRejected::OutOfOrder);
                }
                if self.file2.is_some() {
                    return Err(UpdateRejected::SlotOccupied(Slot::File2));
                }
                self.file2 = Some(desc.clone());
            }
        }
        Ok(())
    }
}

/// The only two mutations a swap ever sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapUpdate {
    AttachFile1(FileDescriptor),
    AttachFile2(FileDescriptor),
}

impl SwapUpdate {
    pub fn slot(&self) -> Slot {
        match self {
            Self::AttachFile1(_) => Slot::File1,
            Self::AttachFile2(_) => Slot::File2,
        }
    }

    pub fn descriptor(&self) -> &FileDescriptor {
        match self {
            Self::AttachFile1(desc) | Self::AttachFile2(desc) => desc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateRejected {
    /// The slot already holds a file.
    SlotOccupied(Slot),
    /// `file2` was offered while `file1` is still empty.
    OutOfOrder,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(name: &str, size: u64) -> FileDescriptor {
        FileDescriptor {
            locator: format!("/uploads/{}", name),
            display_name: name.to_string(),
            size_bytes: size,
        }
    }

    #[test]
    fn new_record_expires_after_one_lifetime() {
        let now = Utc::now();
        let record = SwapRecord::new("abc", now);
        assert_eq!(record.created_at, now);
        assert_eq!(record.expires_at, now + Duration::hours(24));
        assert_eq!(record.status_at(now), SwapStatus::WaitingForFile1);
    }

    #[test]
    fn status_follows_attachments() {
        let now = Utc::now();
        let mut record = SwapRecord::new("abc", now);

        record.apply(&SwapUpdate::AttachFile1(desc("a.txt", 100))).unwrap();
        assert_eq!(record.status_at(now), SwapStatus::WaitingForFile2);

        record.apply(&SwapUpdate::AttachFile2(desc("b.txt", 200))).unwrap();
        assert_eq!(record.status_at(now), SwapStatus::Completed);
    }

    #[test]
    fn expiry_wins_over_every_state() {
        let now = Utc::now();
        let mut record = SwapRecord::new("abc", now);
        let later = record.expires_at + Duration::seconds(1);
        assert_eq!(record.status_at(later), SwapStatus::Expired);

        record.apply(&SwapUpdate::AttachFile1(desc("a.txt", 1))).unwrap();
        assert_eq!(record.status_at(later), SwapStatus::Expired);

        record.apply(&SwapUpdate::AttachFile2(desc("b.txt", 2))).unwrap();
        assert_eq!(record.status_at(later), SwapStatus::Expired);
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let now = Utc::now();
        let record = SwapRecord::new("abc", now);
        assert_eq!(record.status_at(record.expires_at), SwapStatus::WaitingForFile1);
        assert!(record.is_expired_at(record.expires_at + Duration::milliseconds(1)));
    }

    #[test]
    fn file2_before_file1_is_rejected() {
        let mut record = SwapRecord::new("abc", Utc::now());
        let err = record
            .apply(&SwapUpdate::AttachFile2(desc("b.txt", 2)))
            .unwrap_err();
        assert_eq!(err, UpdateRejected::OutOfOrder);
        assert!(record.file2.is_none());
    }

    #[test]
    fn occupied_slot_keeps_first_descriptor() {
        let mut record = SwapRecord::new("abc", Utc::now());
        record.apply(&SwapUpdate::AttachFile1(desc("a.txt", 100))).unwrap();

        let err = record
            .apply(&SwapUpdate::AttachFile1(desc("other.txt", 5)))
            .unwrap_err();
        assert_eq!(err, UpdateRejected::SlotOccupied(Slot::File1));
        assert_eq!(record.file1, Some(desc("a.txt", 100)));
    }

    #[test]
    fn status_serializes_as_snake_case() {
        let json = serde_json::to_string(&SwapStatus::WaitingForFile2).unwrap();
        assert_eq!(json, "\"waiting_for_file2\"");
        assert_eq!(SwapStatus::Completed.to_string(), "completed");
    }
}
