//! Alert payloads emitted by the spike and edit-war detectors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a traffic spike, derived from the spike ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpikeSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl SpikeSeverity {
    /// Classify a spike ratio: critical >= 10x, high >= 5x, medium >= 3x.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 10.0 {
            Self::Critical
        } else if ratio >= 5.0 {
            Self::High
        } else if ratio >= 3.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for SpikeSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A short-window edit rate exceeding the hourly baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeAlert {
    /// Page the spike was observed on.
    pub page_title: String,
    /// Projected hourly rate divided by the baseline rate.
    pub spike_ratio: f64,
    /// Edits observed in the trailing five minutes.
    pub edits_5min: u64,
    /// Baseline edits per hour.
    pub baseline_rate: u64,
    /// Derived severity.
    pub severity: SpikeSeverity,
    /// Emission time, epoch seconds.
    pub timestamp: i64,
}

/// Severity of an edit war, derived from revert and editor counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarSeverity {
    Medium,
    High,
    Critical,
}

impl WarSeverity {
    /// Classify a war: 8 reverts or 8 editors make it critical, broad
    /// participation (5+ editors) makes it high, anything else medium.
    pub fn classify(revert_count: u32, editor_count: u32) -> Self {
        if revert_count >= 8 || editor_count >= 8 {
            Self::Critical
        } else if editor_count >= 5 {
            Self::High
        } else {
            Self::Medium
        }
    }
}

impl fmt::Display for WarSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Sustained coordinated reverting between multiple editors on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditWarAlert {
    /// Page the war is happening on.
    pub page_title: String,
    /// Distinct editors in the analyzed window.
    pub editor_count: u32,
    /// Edits classified as reverts in the window.
    pub revert_count: u32,
    /// Total edits in the window.
    pub edit_count: u32,
    /// Time of the oldest edit in the window, epoch seconds.
    pub start_time: i64,
    /// Derived severity.
    pub severity: WarSeverity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spike_severity_thresholds() {
        assert_eq!(SpikeSeverity::from_ratio(2.9), SpikeSeverity::Low);
        assert_eq!(SpikeSeverity::from_ratio(3.0), SpikeSeverity::Medium);
        assert_eq!(SpikeSeverity::from_ratio(5.0), SpikeSeverity::High);
        assert_eq!(SpikeSeverity::from_ratio(9.99), SpikeSeverity::High);
        assert_eq!(SpikeSeverity::from_ratio(10.0), SpikeSeverity::Critical);
    }

    #[test]
    fn war_severity_tiers() {
        assert_eq!(WarSeverity::classify(3, 3), WarSeverity::Medium);
        // Revert volume alone stays medium until the critical line.
        assert_eq!(WarSeverity::classify(5, 3), WarSeverity::Medium);
        assert_eq!(WarSeverity::classify(3, 5), WarSeverity::High);
        assert_eq!(WarSeverity::classify(8, 3), WarSeverity::Critical);
        assert_eq!(WarSeverity::classify(4, 9), WarSeverity::Critical);
        assert!(WarSeverity::Critical > WarSeverity::High);
    }

    #[test]
    fn severity_serializes_lowercase() {
        let json = serde_json::to_string(&SpikeSeverity::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
        let json = serde_json::to_string(&WarSeverity::Medium).unwrap();
        assert_eq!(json, "\"medium\"");
    }
}
