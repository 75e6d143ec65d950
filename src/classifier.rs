//! Coarse image categories from object-detection output

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

pub const PERSON_LABEL: &str = "person";

// Labels that mark a product shot
static CONTAINER_LABELS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["bottle", "cup", "vase"].into_iter().collect());

// Everything the categorization rule looks at; other detector labels are ignored
static RELEVANT_LABELS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    CONTAINER_LABELS
        .iter()
        .copied()
        .chain(std::iter::once(PERSON_LABEL))
        .collect()
});

/// One bounding-box detection reported by the upstream detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(label: &str, confidence: f32) -> Self {
        Self {
            label: label.to_string(),
            confidence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Promotional,
    ProductDisplay,
    Lifestyle,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Promotional => "promotional",
            Category::ProductDisplay => "product_display",
            Category::Lifestyle => "lifestyle",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one image
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: Category,
    /// Highest confidence among relevant detections, 0.0 when there are none
    pub max_confidence: f32,
    /// `label:0.00` pairs joined by `"; "`, `None` when nothing relevant was seen
    pub detections: Option<String>,
}

pub fn is_relevant(label: &str) -> bool {
    RELEVANT_LABELS.contains(label)
}

/// Map the set of detected labels to a category.
///
/// Person plus any container is promotional, a container alone is a product
/// display, a person alone is lifestyle, anything else is other.
pub fn categorize<'a, I>(labels: I) -> Category
where
    I: IntoIterator<Item = &'a str>,
{
    let mut has_person = false;
    let mut has_container = false;

    for label in labels {
        if label == PERSON_LABEL {
            has_person = true;
        } else if CONTAINER_LABELS.contains(label) {
            has_container = true;
        }
    }

    match (has_person, has_container) {
        (true, true) => Category::Promotional,
        (false, true) => Category::ProductDisplay,
        (true, false) => Category::Lifestyle,
        (false, false) => Category::Other,
    }
}

/// Classify one image's raw detections.
pub fn classify(detections: &[Detection]) -> Classification {
    let category = categorize(detections.iter().map(|d| d.label.as_str()));

    let relevant: Vec<&Detection> = detections.iter().filter(|d| is_relevant(&d.label)).collect();

    let max_confidence = relevant
        .iter()
        .map(|d| d.confidence)
        .fold(0.0_f32, f32::max);

    let detections = if relevant.is_empty() {
        None
    } else {
        Some(
            relevant
                .iter()
                .map(|d| format!("{}:{:.2}", d.label, d.confidence))
                .collect::<Vec<_>>()
                .join("; "),
        )
    };

    Classification {
        category,
        max_confidence,
        detections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_branches() {
        let cases: &[(&[&str], Category)] = &[
            (&["person", "bottle"], Category::Promotional),
            (&["person", "cup"], Category::Promotional),
            (&["vase"], Category::ProductDisplay),
            (&["bottle", "cup", "dog"], Category::ProductDisplay),
            (&["person"], Category::Lifestyle),
            (&["person", "car"], Category::Lifestyle),
            (&["car", "dog"], Category::Other),
            (&[], Category::Other),
            (&["person", "bottle", "cup", "vase"], Category::Promotional),
        ];

        for (labels, expected) in cases {
            assert_eq!(
                categorize(labels.iter().copied()),
                *expected,
                "labels: {:?}",
                labels
            );
        }
    }

    #[test]
    fn test_promotional_example() {
        let result = classify(&[Detection::new("person", 0.9), Detection::new("bottle", 0.6)]);

        assert_eq!(result.category, Category::Promotional);
        assert!((result.max_confidence - 0.9).abs() < f32::EPSILON);
        let detections = result.detections.unwrap();
        assert!(detections.contains("person:0.90"));
        assert!(detections.contains("bottle:0.60"));
        assert_eq!(detections, "person:0.90; bottle:0.60");
    }

    #[test]
    fn test_irrelevant_labels_do_not_raise_confidence() {
        let result = classify(&[Detection::new("car", 0.99), Detection::new("cup", 0.41)]);

        assert_eq!(result.category, Category::ProductDisplay);
        assert!((result.max_confidence - 0.41).abs() < f32::EPSILON);
        assert_eq!(result.detections.as_deref(), Some("cup:0.41"));
    }

    #[test]
    fn test_nothing_relevant() {
        let result = classify(&[Detection::new("dog", 0.8)]);

        assert_eq!(result.category, Category::Other);
        assert_eq!(result.max_confidence, 0.0);
        assert_eq!(result.detections, None);

        let empty = classify(&[]);
        assert_eq!(empty.category, Category::Other);
        assert_eq!(empty.max_confidence, 0.0);
        assert_eq!(empty.detections, None);
    }

    #[test]
    fn test_category_names() {
        assert_eq!(Category::ProductDisplay.to_string(), "product_display");
        assert_eq!(Category::Promotional.as_str(), "promotional");
    }
}
