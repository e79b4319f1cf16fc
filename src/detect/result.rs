use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::compliance::ClassCounts;

/// Object classes the compliance models are trained on.
///
/// The set is closed: labels outside it are dropped before aggregation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PpeClass {
    Person,
    Helmet,
    Vest,
    Glasses,
    Boots,
}

impl PpeClass {
    pub const ALL: [PpeClass; 5] = [
        PpeClass::Person,
        PpeClass::Helmet,
        PpeClass::Vest,
        PpeClass::Glasses,
        PpeClass::Boots,
    ];

    /// Equipment categories a person must wear to be fully compliant.
    pub const REQUIRED_EQUIPMENT: [PpeClass; 4] = [
        PpeClass::Helmet,
        PpeClass::Vest,
        PpeClass::Glasses,
        PpeClass::Boots,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PpeClass::Person => "person",
            PpeClass::Helmet => "helmet",
            PpeClass::Vest => "vest",
            PpeClass::Glasses => "glasses",
            PpeClass::Boots => "boots",
        }
    }

    /// Parse a model label. Matching ignores case and surrounding whitespace.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|class| class.label().eq_ignore_ascii_case(label))
    }

    /// Map a class index emitted by the deployed models.
    ///
    /// The order follows the training data set: helmet, glasses, person, vest, boots.
    pub fn from_model_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(PpeClass::Helmet),
            1 => Some(PpeClass::Glasses),
            2 => Some(PpeClass::Person),
            3 => Some(PpeClass::Vest),
            4 => Some(PpeClass::Boots),
            _ => None,
        }
    }
}

impl fmt::Display for PpeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PpeClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_label(s).ok_or_else(|| anyhow!("unknown class label '{}'", s))
    }
}

/// Axis-aligned box in image pixel space.
///
/// Construction guarantees `x1 < x2` and `y1 < y2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
}

impl BoundingBox {
    /// Returns `None` for degenerate boxes.
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Option<Self> {
        if x1 < x2 && y1 < y2 {
            Some(Self { x1, y1, x2, y2 })
        } else {
            None
        }
    }

    pub fn from_array(coords: [i32; 4]) -> Option<Self> {
        Self::new(coords[0], coords[1], coords[2], coords[3])
    }

    /// Clamp to `[0, width] x [0, height]`. The box may become degenerate and be rejected.
    pub fn clamp_to(self, width: u32, height: u32) -> Option<Self> {
        let max_x = i32::try_from(width).unwrap_or(i32::MAX);
        let max_y = i32::try_from(height).unwrap_or(i32::MAX);
        Self::new(
            self.x1.clamp(0, max_x),
            self.y1.clamp(0, max_y),
            self.x2.clamp(0, max_x),
            self.y2.clamp(0, max_y),
        )
    }

    pub fn x1(&self) -> i32 {
        self.x1
    }

    pub fn y1(&self) -> i32 {
        self.y1
    }

    pub fn x2(&self) -> i32 {
        self.x2
    }

    pub fn y2(&self) -> i32 {
        self.y2
    }

    pub fn width(&self) -> i64 {
        i64::from(self.x2) - i64::from(self.x1)
    }

    pub fn height(&self) -> i64 {
        i64::from(self.y2) - i64::from(self.y1)
    }

    /// Exact for every coordinate pair; `i64` sides can overflow `i64` when multiplied.
    pub fn area(&self) -> i128 {
        i128::from(self.width()) * i128::from(self.height())
    }

    pub fn to_array(&self) -> [i32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

impl Serialize for BoundingBox {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_array().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BoundingBox {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let coords = <[i32; 4]>::deserialize(deserializer)?;
        Self::from_array(coords).ok_or_else(|| {
            serde::de::Error::custom(format!("degenerate bounding box {:?}", coords))
        })
    }
}

/// Identifier of the detection source (typically the model file name).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Detection as emitted by a model adapter, before validation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub class: String,
    pub confidence: f32,
    pub bbox: [i32; 4],
}

impl DetectionRecord {
    pub fn new(class: impl Into<String>, confidence: f32, bbox: [i32; 4]) -> Self {
        Self {
            class: class.into(),
            confidence,
            bbox,
        }
    }
}

/// One validated object hypothesis from a single source for a single frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RawDetection {
    class: PpeClass,
    confidence: f32,
    bbox: BoundingBox,
    source: SourceId,
}

impl RawDetection {
    /// Returns `None` when the confidence is not finite.
    ///
    /// Finite confidences are clamped into `[0, 1]`.
    pub fn new(
        class: PpeClass,
        confidence: f32,
        bbox: BoundingBox,
        source: SourceId,
    ) -> Option<Self> {
        if !confidence.is_finite() {
            return None;
        }
        Some(Self {
            class,
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
            source,
        })
    }

    /// Validate a wire record. Unknown labels, non-finite confidences and
    /// degenerate boxes are rejected.
    pub fn from_record(record: &DetectionRecord, source: &SourceId) -> Option<Self> {
        let Some(class) = PpeClass::from_label(&record.class) else {
            log::debug!("{}: dropping unknown class '{}'", source, record.class);
            return None;
        };
        let Some(bbox) = BoundingBox::from_array(record.bbox) else {
            log::debug!("{}: dropping degenerate box {:?}", source, record.bbox);
            return None;
        };
        let detection = Self::new(class, record.confidence, bbox, source.clone());
        if detection.is_none() {
            log::debug!(
                "{}: dropping non-finite confidence for {}",
                source,
                class
            );
        }
        detection
    }

    /// Like [`RawDetection::from_record`], clamping the box to the frame first.
    pub fn from_record_in_frame(
        record: &DetectionRecord,
        source: &SourceId,
        width: u32,
        height: u32,
    ) -> Option<Self> {
        let mut detection = Self::from_record(record, source)?;
        detection.bbox = detection.bbox.clamp_to(width, height)?;
        Some(detection)
    }

    pub fn class(&self) -> PpeClass {
        self.class
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }
}

/// What a source produced for one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceReport {
    /// Per-object boxes.
    Boxes(Vec<DetectionRecord>),
    /// Count-only backends that return no geometry.
    Summary(ClassCounts),
}

impl Default for SourceReport {
    fn default() -> Self {
        SourceReport::Boxes(Vec::new())
    }
}
