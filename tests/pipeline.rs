//! End-to-end: scrape into batch files, load twice, classify images, load detections.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::path::Path;

use channel_ingest::channel::{ChannelClient, ChannelHandle, ChannelMessage};
use channel_ingest::classifier::Detection;
use channel_ingest::db::Database;
use channel_ingest::detector::{DetectionRun, ObjectDetector};
use channel_ingest::error::ChannelError;
use channel_ingest::loader::RawLoader;
use channel_ingest::records::read_detections;
use channel_ingest::scraper::ChannelScraper;
use tempfile::TempDir;

/// Five recent messages per channel, every other one with a photo.
struct StaticChannel;

#[async_trait]
impl ChannelClient for StaticChannel {
    async fn resolve(&self, channel: &str) -> Result<ChannelHandle, ChannelError> {
        if channel == "private" {
            return Err(ChannelError::Inaccessible {
                channel: channel.to_string(),
                reason: "private".to_string(),
            });
        }
        Ok(ChannelHandle {
            id: 7,
            title: Some(channel.to_string()),
        })
    }

    async fn history(
        &self,
        _handle: &ChannelHandle,
        offset_id: i64,
        limit: usize,
    ) -> Result<Vec<ChannelMessage>, ChannelError> {
        let now = Utc::now();
        Ok((1..=5)
            .rev()
            .filter(|id| offset_id == 0 || *id < offset_id)
            .take(limit)
            .map(|id| ChannelMessage {
                id,
                date: now - ChronoDuration::hours(6 - id),
                text: Some(format!("post {}", id)),
                has_media: id % 2 == 1,
                has_photo: id % 2 == 1,
                views: Some(100 * id as i32),
                forwards: Some(0),
            })
            .collect())
    }

    async fn download_photo(
        &self,
        _handle: &ChannelHandle,
        _message: &ChannelMessage,
        dest: &Path,
    ) -> Result<(), ChannelError> {
        std::fs::create_dir_all(dest.parent().unwrap())
            .map_err(|e| ChannelError::Transient(e.to_string()))?;
        std::fs::write(dest, b"jpeg").map_err(|e| ChannelError::Transient(e.to_string()))
    }
}

/// Message 5 shows a person holding a bottle, message 3 is corrupt, the rest show nothing relevant.
struct ScriptedDetector;

#[async_trait]
impl ObjectDetector for ScriptedDetector {
    async fn detect(&self, image: &Path) -> Result<Vec<Detection>> {
        match image.file_stem().and_then(|s| s.to_str()) {
            Some("5") => Ok(vec![
                Detection::new("person", 0.9),
                Detection::new("bottle", 0.6),
                Detection::new("chair", 0.95),
            ]),
            Some("3") => Err(anyhow!("truncated JPEG")),
            _ => Ok(vec![Detection::new("tv", 0.5)]),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_scrape_load_detect_load() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("raw/telegram_messages");
    let images = dir.path().join("raw/images");
    let detections = dir.path().join("enriched/yolo_detections.csv");

    // scrape
    let client = StaticChannel;
    let channels = vec!["private".to_string(), "Y".to_string()];
    let summaries = ChannelScraper::new(&client, &images)
        .run(&channels, 1, 1000, &raw)
        .await;

    assert_eq!(summaries[0].messages, 0);
    assert_eq!(summaries[1].messages, 5);
    assert_eq!(summaries[1].images, 3);
    assert!(images.join("Y").join("5.jpg").exists());

    // load twice: same row count
    let db = Database::in_memory().unwrap();
    let loader = RawLoader::new(&db).unwrap();

    let first = loader.load_messages(&raw).unwrap();
    assert_eq!(first.inserted, 5);
    let second = loader.load_messages(&raw).unwrap();
    assert_eq!(second.attempted, 5);
    assert_eq!(second.inserted, 0);
    assert_eq!(db.count_messages().unwrap(), 5);

    let stored = db.get_message("Y", 5).unwrap().unwrap();
    assert!(stored.has_media);
    assert!(stored.image_path.unwrap().ends_with("5.jpg"));

    // detect: the corrupt image is skipped
    let written = DetectionRun::new(&ScriptedDetector)
        .run(&images, &detections)
        .await
        .unwrap();
    assert_eq!(written, 2);

    // detections append on every load
    assert_eq!(loader.load_detections(&detections).unwrap().inserted, 2);
    assert_eq!(loader.load_detections(&detections).unwrap().inserted, 2);
    assert_eq!(db.count_detections().unwrap(), 4);

    assert_eq!(
        db.detections_by_category().unwrap(),
        vec![("other".to_string(), 2), ("promotional".to_string(), 2)]
    );

    let rows = read_detections(&detections).unwrap();
    let five = rows.iter().find(|r| r.message_id == 5).unwrap();
    assert_eq!(five.channel_name, "Y");
    assert_eq!(five.category, "promotional");
    assert!((five.max_confidence - 0.9).abs() < 1e-6);
    assert_eq!(five.detections.as_deref(), Some("person:0.90; bottle:0.60"));

    let one = rows.iter().find(|r| r.message_id == 1).unwrap();
    assert_eq!(one.category, "other");
    assert_eq!(one.detections, None);
}
