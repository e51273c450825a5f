use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::model::VulnerabilityRecord;

/// How records sharing an id are collapsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergePolicy {
    /// The earliest record wins unchanged.
    FirstSeen,
    /// The most severe record wins; ties keep the earlier one. Affected
    /// ranges of every duplicate are kept.
    #[default]
    PreferHigherSeverity,
}

impl MergePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergePolicy::FirstSeen => "first-seen",
            MergePolicy::PreferHigherSeverity => "prefer-higher-severity",
        }
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MergePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first-seen" | "first" => Ok(MergePolicy::FirstSeen),
            "prefer-higher-severity" | "severity" => Ok(MergePolicy::PreferHigherSeverity),
            _ => Err(format!("Unknown merge policy: {}", s)),
        }
    }
}

/// Collapses per-source record lists into one list with unique ids.
///
/// Sources are consumed in iteration order. A record's position in the
/// output is the position of the first record carrying its id, whatever
/// policy decides the contents.
pub fn merge_sources<I>(sources: I, policy: MergePolicy) -> Vec<VulnerabilityRecord>
where
    I: IntoIterator<Item = Vec<VulnerabilityRecord>>,
{
    let mut merged: Vec<VulnerabilityRecord> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in sources.into_iter().flatten() {
        let Some(slot) = index.get(&record.id).copied() else {
            index.insert(record.id.clone(), merged.len());
            merged.push(record);
            continue;
        };

        if policy == MergePolicy::FirstSeen {
            continue;
        }

        let existing = &mut merged[slot];
        let ranges = union_ranges(&existing.affected_version_ranges, &record.affected_version_ranges);
        if record.severity > existing.severity {
            *existing = record;
        }
        existing.affected_version_ranges = ranges;
    }

    merged
}

fn union_ranges(first: &[String], second: &[String]) -> Vec<String> {
    let mut out = first.to_vec();
    for range in second {
        if !out.contains(range) {
            out.push(range.clone());
        }
    }
    out
}
