use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed batch lifecycle. Transitions only move forward, one stage at a time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Active,
    Processing,
    Testing,
    Completed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Active => "active",
            BatchStatus::Processing => "processing",
            BatchStatus::Testing => "testing",
            BatchStatus::Completed => "completed",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "active" => Some(BatchStatus::Active),
            "processing" => Some(BatchStatus::Processing),
            "testing" => Some(BatchStatus::Testing),
            "completed" => Some(BatchStatus::Completed),
            _ => None,
        }
    }

    /// The only status reachable from this one, if any.
    pub fn successor(&self) -> Option<Self> {
        match self {
            BatchStatus::Active => Some(BatchStatus::Processing),
            BatchStatus::Processing => Some(BatchStatus::Testing),
            BatchStatus::Testing => Some(BatchStatus::Completed),
            BatchStatus::Completed => None,
        }
    }

    /// Index of the timeline step a batch in this status is working through.
    pub fn step_position(&self) -> i64 {
        match self {
            BatchStatus::Active => 0,
            BatchStatus::Processing => 1,
            BatchStatus::Testing => 2,
            BatchStatus::Completed => 3,
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Soil rating from the collection form.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SoilQuality {
    Excellent,
    Good,
    Average,
    Poor,
}

impl SoilQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            SoilQuality::Excellent => "excellent",
            SoilQuality::Good => "good",
            SoilQuality::Average => "average",
            SoilQuality::Poor => "poor",
        }
    }

    pub fn parse_rating(s: &str) -> Option<Self> {
        match s {
            "excellent" => Some(SoilQuality::Excellent),
            "good" => Some(SoilQuality::Good),
            "average" => Some(SoilQuality::Average),
            "poor" => Some(SoilQuality::Poor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Certificate,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Certificate => "certificate",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(MediaKind::Photo),
            "certificate" => Some(MediaKind::Certificate),
            _ => None,
        }
    }
}

/// Location reading captured at collection time. Immutable once stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Reported accuracy radius in meters. Informational; no upper bound.
    pub accuracy_m: f64,
}

static QUANTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*(kg|g|t)\s*$").expect("quantity pattern"));

/// Parse a quantity string like "18kg" or "25 kg" into (amount, unit).
/// The registry stores the caller's original string; this only gates input.
pub fn parse_quantity(s: &str) -> Option<(f64, &str)> {
    let caps = QUANTITY_RE.captures(s)?;
    let amount: f64 = caps.get(1)?.as_str().parse().ok()?;
    match caps.get(2)?.as_str() {
        "kg" => Some((amount, "kg")),
        "g" => Some((amount, "g")),
        "t" => Some((amount, "t")),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub farmer_id: String,
    pub species: String,
    pub quantity: String,
    pub status: BatchStatus,
    pub geo: GeoPoint,
    pub weather: Option<String>,
    pub soil_quality: Option<SoilQuality>,
    pub estimated_value: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineStep {
    pub position: i64,
    pub title: String,
    pub completed: bool,
    pub in_progress: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub batch_id: Uuid,
    pub sequence: i64,
    pub media_ref: String,
    pub kind: MediaKind,
    pub created_at: DateTime<Utc>,
}

/// Input for registering a new collection batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBatch {
    pub farmer_id: String,
    pub species: String,
    pub quantity: String,
    pub geo: GeoPoint,
    pub weather: Option<String>,
    pub soil_quality: Option<SoilQuality>,
    pub estimated_value: Option<String>,
}
