//! Scar and confirmation types shared by the tracker, snapshots, and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// Surfaced Scars
// ═══════════════════════════════════════════════════════════════════════════════

/// Where a scar came from. Only recalled scars are gated on confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScarSource {
    Recall,
    /// Pre-vetted defaults surfaced during session bootstrap.
    SessionStart,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfacedScar {
    pub scar_id: String,
    pub title: String,
    pub source: ScarSource,
    pub surfaced_at: DateTime<Utc>,
}

impl SurfacedScar {
    pub fn new(scar_id: impl Into<String>, title: impl Into<String>, source: ScarSource) -> Self {
        Self {
            scar_id: scar_id.into(),
            title: title.into(),
            source,
            surfaced_at: Utc::now(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Confirmations
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "APPLYING")]
    Applying,
    #[serde(rename = "N_A")]
    NotApplicable,
    #[serde(rename = "REFUTED")]
    Refuted,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Applying => "APPLYING",
            Decision::NotApplicable => "N_A",
            Decision::Refuted => "REFUTED",
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "APPLYING" => Ok(Decision::Applying),
            "N_A" | "N/A" | "NA" => Ok(Decision::NotApplicable),
            "REFUTED" => Ok(Decision::Refuted),
            other => Err(format!("unknown decision {other:?} (expected APPLYING, N_A, REFUTED)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub scar_id: String,
    pub decision: Decision,
    pub evidence: String,
    pub confirmed_at: DateTime<Utc>,
}

impl Confirmation {
    pub fn new(scar_id: impl Into<String>, decision: Decision, evidence: impl Into<String>) -> Self {
        Self {
            scar_id: scar_id.into(),
            decision,
            evidence: evidence.into(),
            confirmed_at: Utc::now(),
        }
    }
}
