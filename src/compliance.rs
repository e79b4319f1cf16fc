//! Compliance scoring.
//!
//! The score is a coarse bucket policy over how many required equipment
//! categories are missing from a frame, not a per-person assignment. A frame
//! with no confirmed person always scores 0%: equipment seen without a person
//! usually means the person detector missed someone.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::detect::PpeClass;

/// Rates at or above this are "Bon" and raise no alert.
pub const HIGH_COMPLIANCE_THRESHOLD: f32 = 80.0;
/// Rates at or above this (and below the high threshold) are "Moyen".
pub const MEDIUM_COMPLIANCE_THRESHOLD: f32 = 50.0;

/// Non-negative per-class counts for one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassCounts {
    pub person: u32,
    pub helmet: u32,
    pub vest: u32,
    pub glasses: u32,
    pub boots: u32,
}

impl ClassCounts {
    pub fn get(&self, class: PpeClass) -> u32 {
        match class {
            PpeClass::Person => self.person,
            PpeClass::Helmet => self.helmet,
            PpeClass::Vest => self.vest,
            PpeClass::Glasses => self.glasses,
            PpeClass::Boots => self.boots,
        }
    }

    fn slot(&mut self, class: PpeClass) -> &mut u32 {
        match class {
            PpeClass::Person => &mut self.person,
            PpeClass::Helmet => &mut self.helmet,
            PpeClass::Vest => &mut self.vest,
            PpeClass::Glasses => &mut self.glasses,
            PpeClass::Boots => &mut self.boots,
        }
    }

    pub fn set(&mut self, class: PpeClass, count: u32) {
        *self.slot(class) = count;
    }

    pub fn increment(&mut self, class: PpeClass) {
        let slot = self.slot(class);
        *slot = slot.saturating_add(1);
    }

    /// Build counts from possibly-negative values. Negatives clamp to zero.
    pub fn from_signed<I>(counts: I) -> Self
    where
        I: IntoIterator<Item = (PpeClass, i64)>,
    {
        let mut out = Self::default();
        for (class, count) in counts {
            let clamped = u32::try_from(count.max(0)).unwrap_or(u32::MAX);
            out.set(class, clamped);
        }
        out
    }

    /// Count classes over any sequence of class labels.
    pub fn tally<I>(classes: I) -> Self
    where
        I: IntoIterator<Item = PpeClass>,
    {
        let mut out = Self::default();
        for class in classes {
            out.increment(class);
        }
        out
    }

    /// Required equipment categories with no detection at all.
    pub fn missing_equipment(&self) -> Vec<PpeClass> {
        PpeClass::REQUIRED_EQUIPMENT
            .into_iter()
            .filter(|class| self.get(*class) == 0)
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComplianceLevel {
    Excellent,
    Bon,
    Moyen,
    Faible,
    Inconnu,
}

impl ComplianceLevel {
    /// `None` (no data) maps to `Inconnu`; exactly 100 maps to `Excellent`.
    pub fn from_rate(rate: Option<f32>) -> Self {
        match rate {
            None => ComplianceLevel::Inconnu,
            Some(r) if r.is_nan() => ComplianceLevel::Inconnu,
            Some(r) if r >= 100.0 => ComplianceLevel::Excellent,
            Some(r) if r >= HIGH_COMPLIANCE_THRESHOLD => ComplianceLevel::Bon,
            Some(r) if r >= MEDIUM_COMPLIANCE_THRESHOLD => ComplianceLevel::Moyen,
            Some(_) => ComplianceLevel::Faible,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComplianceLevel::Excellent => "Excellent",
            ComplianceLevel::Bon => "Bon",
            ComplianceLevel::Moyen => "Moyen",
            ComplianceLevel::Faible => "Faible",
            ComplianceLevel::Inconnu => "Inconnu",
        }
    }
}

impl fmt::Display for ComplianceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertType {
    Aucune,
    Avertissement,
    Critique,
}

impl AlertType {
    /// An unknown rate raises no alert.
    pub fn from_rate(rate: Option<f32>) -> Self {
        match rate {
            None => AlertType::Aucune,
            Some(r) if r.is_nan() || r >= HIGH_COMPLIANCE_THRESHOLD => AlertType::Aucune,
            Some(r) if r >= MEDIUM_COMPLIANCE_THRESHOLD => AlertType::Avertissement,
            Some(_) => AlertType::Critique,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertType::Aucune => "Aucune",
            AlertType::Avertissement => "Avertissement",
            AlertType::Critique => "Critique",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [AlertType::Aucune, AlertType::Avertissement, AlertType::Critique]
            .into_iter()
            .find(|alert| alert.as_str() == name)
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scored outcome for one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComplianceResult {
    pub total_persons: u32,
    pub with_helmet: u32,
    pub with_vest: u32,
    pub with_glasses: u32,
    pub with_boots: u32,
    pub compliance_rate: f32,
    pub compliance_level: ComplianceLevel,
    pub alert_type: AlertType,
    pub missing_equipment: Vec<PpeClass>,
}

/// Compliance rate for a given number of missing equipment categories.
pub fn rate_for_missing(missing: usize) -> f32 {
    match missing {
        0 => 100.0,
        1 | 2 => 90.0,
        3 => 60.0,
        _ => 10.0,
    }
}

/// Score one frame's counts. Total over every input.
pub fn score(counts: &ClassCounts) -> ComplianceResult {
    let missing_equipment = counts.missing_equipment();
    let compliance_rate = if counts.person == 0 {
        0.0
    } else {
        rate_for_missing(missing_equipment.len())
    };

    ComplianceResult {
        total_persons: counts.person,
        with_helmet: counts.helmet,
        with_vest: counts.vest,
        with_glasses: counts.glasses,
        with_boots: counts.boots,
        compliance_rate,
        compliance_level: ComplianceLevel::from_rate(Some(compliance_rate)),
        alert_type: AlertType::from_rate(Some(compliance_rate)),
        missing_equipment,
    }
}
