//! Record shapes passed between the scraper, classifier and loader
//!
//! Message batches travel as pretty-printed JSON arrays, one file per
//! channel per ingestion day. Detection runs travel as a single CSV file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::RecordError;

/// One ingested message, keyed by (channel_name, message_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub channel_name: String,
    pub message_id: i64,
    pub message_date: DateTime<Utc>,
    #[serde(default)]
    pub message_text: Option<String>,
    pub has_media: bool,
    /// Set only when the attached photo was downloaded
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub views: Option<i32>,
    #[serde(default)]
    pub forwards: Option<i32>,
}

/// One classification result for one downloaded image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub image_path: String,
    pub channel_name: String,
    pub message_id: i64,
    pub category: String,
    pub max_confidence: f32,
    /// `label:confidence` pairs joined by `"; "`, absent when nothing relevant was seen
    pub detections: Option<String>,
    pub processed_at: DateTime<Utc>,
}

/// Read one channel batch file.
///
/// Missing required fields (`channel_name`, `message_id`, `message_date`,
/// `has_media`) fail the whole file instead of being defaulted.
pub fn read_message_batch(path: &Path) -> Result<Vec<MessageRecord>, RecordError> {
    let file = File::open(path).map_err(|source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_reader(BufReader::new(file)).map_err(|e| RecordError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Write one channel batch file, creating parent directories as needed.
pub fn write_message_batch(path: &Path, records: &[MessageRecord]) -> Result<(), RecordError> {
    let io_err = |source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let json = serde_json::to_string_pretty(records).map_err(|e| RecordError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    std::fs::write(path, json).map_err(io_err)
}

/// Path of a batch file: `<root>/<YYYY-MM-DD>/<channel>.json`
pub fn batch_path(root: &Path, day: &str, channel: &str) -> PathBuf {
    root.join(day).join(format!("{}.json", channel))
}

pub fn read_detections(path: &Path) -> Result<Vec<DetectionRecord>, RecordError> {
    let mut reader = csv::Reader::from_path(path).map_err(|source| RecordError::Csv {
        path: path.to_path_buf(),
        source,
    })?;

    reader
        .deserialize()
        .collect::<Result<Vec<DetectionRecord>, _>>()
        .map_err(|source| RecordError::Csv {
            path: path.to_path_buf(),
            source,
        })
}

pub fn write_detections(path: &Path, records: &[DetectionRecord]) -> Result<(), RecordError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| RecordError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    }

    let csv_err = |source| RecordError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    for record in records {
        writer.serialize(record).map_err(csv_err)?;
    }
    writer.flush().map_err(|source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(id: i64) -> MessageRecord {
        MessageRecord {
            channel_name: "lobelia4cosmetics".to_string(),
            message_id: id,
            message_date: Utc.with_ymd_and_hms(2025, 1, 14, 9, 30, 0).unwrap(),
            message_text: Some("New stock arrived".to_string()),
            has_media: true,
            image_path: None,
            views: Some(120),
            forwards: None,
        }
    }

    #[test]
    fn test_batch_file_layout() {
        let path = batch_path(Path::new("data/raw"), "2025-01-14", "CheMed123");
        assert_eq!(path, PathBuf::from("data/raw/2025-01-14/CheMed123.json"));
    }

    #[test]
    fn test_batch_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = batch_path(dir.path(), "2025-01-14", "lobelia4cosmetics");
        let records = vec![message(2), message(1)];

        write_message_batch(&path, &records).unwrap();
        assert_eq!(read_message_batch(&path).unwrap(), records);
    }

    #[test]
    fn test_nullable_fields_accept_null() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(
            &path,
            r#"[{"channel_name":"c","message_id":7,"message_date":"2025-01-14T09:30:00+00:00",
                "message_text":null,"has_media":false,"image_path":null,"views":null,"forwards":null}]"#,
        )
        .unwrap();

        let records = read_message_batch(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message_text, None);
        assert_eq!(records[0].views, None);
    }

    #[test]
    fn test_missing_required_field_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(&path, r#"[{"channel_name":"c","has_media":false}]"#).unwrap();

        match read_message_batch(&path) {
            Err(RecordError::Parse { reason, .. }) => assert!(reason.contains("message_id")),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_detections_csv_keeps_absent_detections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enriched/yolo_detections.csv");
        let records = vec![DetectionRecord {
            image_path: "data/raw/images/c/5.jpg".to_string(),
            channel_name: "c".to_string(),
            message_id: 5,
            category: "other".to_string(),
            max_confidence: 0.0,
            detections: None,
            processed_at: Utc.with_ymd_and_hms(2025, 1, 15, 2, 0, 0).unwrap(),
        }];

        write_detections(&path, &records).unwrap();
        let header = std::fs::read_to_string(&path).unwrap();
        assert!(header.starts_with(
            "image_path,channel_name,message_id,category,max_confidence,detections,processed_at"
        ));
        assert_eq!(read_detections(&path).unwrap(), records);
    }
}
