use serde::{Deserialize, Serialize};

/// Qualitative risk bucket derived from a numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    /// Fixed partition of `[0, 100]`: `[0,20)` low, `[20,50)` medium,
    /// `[50,80)` high, `[80,100]` critical. Scores above 100 are critical.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=19 => RiskTier::Low,
            20..=49 => RiskTier::Medium,
            50..=79 => RiskTier::High,
            _ => RiskTier::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "LOW",
            RiskTier::Medium => "MEDIUM",
            RiskTier::High => "HIGH",
            RiskTier::Critical => "CRITICAL",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskTier::Low => "LOW RISK",
            RiskTier::Medium => "MEDIUM RISK",
            RiskTier::High => "HIGH RISK",
            RiskTier::Critical => "CRITICAL RISK",
        }
    }

    pub fn advice(&self) -> &'static str {
        match self {
            RiskTier::Low => "Safe to use",
            RiskTier::Medium => "Review before using",
            RiskTier::High => "Careful consideration required",
            RiskTier::Critical => "Not recommended",
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output of a risk model: score, tier and the signals that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub score: u8,
    pub tier: RiskTier,
    pub contributing_reasons: Vec<String>,
}

impl RiskAssessment {
    pub fn new(score: u8, contributing_reasons: Vec<String>) -> Self {
        let score = score.min(100);
        Self {
            score,
            tier: RiskTier::from_score(score),
            contributing_reasons,
        }
    }

    /// Inverse presentation of the score: 100 is fully trustworthy.
    pub fn trust_score(&self) -> u8 {
        100 - self.score
    }
}
