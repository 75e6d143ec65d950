//! Detection run over downloaded images
//!
//! Discovers images under the image root, sends each one to the object
//! detector and classifies the result. One image failing never stops the run.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::classifier::{classify, Detection};
use crate::config::DetectorConfig;
use crate::records::{write_detections, DetectionRecord};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Black-box object detector: image in, labelled boxes out
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    async fn detect(&self, image: &Path) -> Result<Vec<Detection>>;
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

/// Detector served over HTTP by an inference server
pub struct HttpDetector {
    client: Client,
    endpoint: String,
    model: String,
}

impl HttpDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl ObjectDetector for HttpDetector {
    async fn detect(&self, image: &Path) -> Result<Vec<Detection>> {
        let bytes = tokio::fs::read(image).await?;

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("model", self.model.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Detector returned {}", response.status()));
        }

        let body: DetectResponse = response.json().await?;
        Ok(body.detections)
    }
}

/// Image files under `root`, sorted so repeated runs see the same order
pub fn find_images(root: &Path) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_image(path))
        .collect();
    images.sort();
    images
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Channel name and message id encoded in `<root>/<channel>/<message_id>.<ext>`
pub fn image_identity(path: &Path) -> Option<(String, i64)> {
    let message_id = path.file_stem()?.to_str()?.parse().ok()?;
    let channel = path.parent()?.file_name()?.to_str()?.to_string();
    Some((channel, message_id))
}

pub struct DetectionRun<'a, D: ObjectDetector + ?Sized> {
    detector: &'a D,
}

impl<'a, D: ObjectDetector + ?Sized> DetectionRun<'a, D> {
    pub fn new(detector: &'a D) -> Self {
        Self { detector }
    }

    /// Classify every image under `image_root`.
    ///
    /// A missing root yields no records. Images the detector rejects, or whose
    /// file name does not carry a message id, are logged and left out.
    pub async fn classify_images(&self, image_root: &Path) -> Vec<DetectionRecord> {
        let mut records = Vec::new();

        if !image_root.exists() {
            warn!("Image directory {} does not exist", image_root.display());
            return records;
        }

        for path in find_images(image_root) {
            let Some((channel_name, message_id)) = image_identity(&path) else {
                warn!("Skipping {}: name is not <channel>/<message_id>", path.display());
                continue;
            };

            let detections = match self.detector.detect(&path).await {
                Ok(detections) => detections,
                Err(e) => {
                    error!("Error running model on {}: {}", path.display(), e);
                    continue;
                }
            };

            let result = classify(&detections);
            info!(
                "{} -> {} (max conf: {:.2})",
                path.display(),
                result.category,
                result.max_confidence
            );

            records.push(DetectionRecord {
                image_path: path.to_string_lossy().to_string(),
                channel_name,
                message_id,
                category: result.category.to_string(),
                max_confidence: result.max_confidence,
                detections: result.detections,
                processed_at: Utc::now(),
            });
        }

        records
    }

    /// Classify every image and write the results to `output`.
    ///
    /// Returns the number of records written; nothing is written when no
    /// image was processed.
    pub async fn run(&self, image_root: &Path, output: &Path) -> Result<usize> {
        let records = self.classify_images(image_root).await;

        if records.is_empty() {
            warn!("No images processed");
            return Ok(0);
        }

        write_detections(output, &records)?;
        info!("Saved {} results to {}", records.len(), output.display());

        Ok(records.len())
    }
}
