//! Task and file records shared by the store, loader, and manager.
//!
//! The store is the only owner of live `Task` values; everything it hands
//! out is a deep copy, so callers can never mutate stored state through a
//! returned value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-URL state tracked inside a task.
///
/// `id` is unique within its task, assigned when the file is added and never
/// changed afterwards. Updates written back after a probe or download are
/// matched by this id, not by slice position, so concurrent mutations of the
/// same task cannot land on the wrong record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(skip)]
    pub id: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub real_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub orig_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub size: i64,
    /// HTTP-style status code; 0 means the URL was never attempted.
    #[serde(default, skip_serializing_if = "is_zero_u16")]
    pub status: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_msg: String,
}

impl FileRecord {
    /// A fresh record carrying only the submitted URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Whether a status refresh should probe this URL again: never attempted,
    /// or a transient upstream failure last time.
    #[must_use]
    pub fn needs_check(&self) -> bool {
        matches!(self.status, 0 | 502)
    }

    /// Whether an archive generation should fetch this URL: never attempted,
    /// or previously verified OK.
    #[must_use]
    pub fn downloadable(&self) -> bool {
        matches!(self.status, 0 | 200)
    }

    /// Fills `error_msg` with the canonical HTTP reason phrase when a failure
    /// status was recorded without a more specific message.
    pub fn fill_default_error(&mut self) {
        if self.status != 200 && self.status != 0 && self.error_msg.is_empty() {
            self.error_msg = reqwest::StatusCode::from_u16(self.status)
                .ok()
                .and_then(|status| status.canonical_reason())
                .unwrap_or("request failed")
                .to_string();
        }
    }
}

/// A container grouping up to N URLs for batched fetch and archival.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileRecord>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero_i64(value: &i64) -> bool {
    *value == 0
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero_u16(value: &u16) -> bool {
    *value == 0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_file_record_serializes_only_populated_fields() {
        let record = FileRecord {
            id: 42,
            url: "https://example.com/a.jpg".to_string(),
            status: 200,
            size: 17,
            ..FileRecord::default()
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["url"], "https://example.com/a.jpg");
        assert_eq!(json["status"], 200);
        assert_eq!(json["size"], 17);
        assert!(json.get("id").is_none(), "file id must stay internal");
        assert!(json.get("error_msg").is_none());
        assert!(json.get("real_type").is_none());
    }

    #[test]
    fn test_file_record_pending_serializes_url_only() {
        let record = FileRecord::new("https://example.com/b.png");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json.as_object().unwrap().len(),
            1,
            "pending record should carry only the url: {json}"
        );
    }

    #[test]
    fn test_needs_check_only_for_pending_and_bad_gateway() {
        for (status, expected) in [(0, true), (502, true), (200, false), (403, false), (404, false)]
        {
            let record = FileRecord {
                status,
                ..FileRecord::default()
            };
            assert_eq!(record.needs_check(), expected, "status {status}");
        }
    }

    #[test]
    fn test_downloadable_only_for_pending_and_ok() {
        for (status, expected) in [(0, true), (200, true), (502, false), (403, false)] {
            let record = FileRecord {
                status,
                ..FileRecord::default()
            };
            assert_eq!(record.downloadable(), expected, "status {status}");
        }
    }

    #[test]
    fn test_fill_default_error_uses_reason_phrase() {
        let mut record = FileRecord {
            status: 404,
            ..FileRecord::default()
        };
        record.fill_default_error();
        assert_eq!(record.error_msg, "Not Found");

        let mut ok = FileRecord {
            status: 200,
            ..FileRecord::default()
        };
        ok.fill_default_error();
        assert!(ok.error_msg.is_empty());
    }

    #[test]
    fn test_fill_default_error_keeps_specific_message() {
        let mut record = FileRecord {
            status: 403,
            error_msg: "file type \"text/html\" is not allowed".to_string(),
            ..FileRecord::default()
        };
        record.fill_default_error();
        assert_eq!(record.error_msg, "file type \"text/html\" is not allowed");
    }
}
