//! Analysis record types and the tagged wrapper that preserves provenance.

use serde::{Deserialize, Serialize};

/// How closely the run's accuracy matched expectations. Ordered worst to
/// best so `Unknown` is the conservative default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyScore {
    #[default]
    Unknown,
    Partial,
    Exact,
}

impl AccuracyScore {
    pub fn as_str(self) -> &'static str {
        match self {
            AccuracyScore::Unknown => "unknown",
            AccuracyScore::Partial => "partial",
            AccuracyScore::Exact => "exact",
        }
    }
}

/// Whether the reported bug could be reproduced by the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reproducibility {
    #[default]
    Unknown,
    NotReproducible,
    Reproducible,
}

impl Reproducibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Reproducibility::Unknown => "unknown",
            Reproducibility::NotReproducible => "not_reproducible",
            Reproducibility::Reproducible => "reproducible",
        }
    }
}

/// The reviewer's verdict on one debug step.
///
/// Every field is defaulted: the completion backend is untrusted, and a
/// record with gaps is still worth persisting (the wrapper tier records
/// what was filled in).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub fix_plan: String,
    #[serde(default)]
    pub bug_confirmed: bool,
    #[serde(default)]
    pub bug_fixed: bool,
    #[serde(default)]
    pub all_bugs_fixed: bool,
    #[serde(default)]
    pub accuracy: AccuracyScore,
    #[serde(default)]
    pub reproducibility: Reproducibility,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_code: Option<String>,
}

impl AnalysisRecord {
    /// Record standing in for a run whose bug could not be reproduced at
    /// all; the step is closed without consulting the reviewer.
    pub fn no_reproduction() -> Self {
        Self {
            analysis: "Bug could not be reproduced within the run's time budget.".to_string(),
            fix_plan: "No fix required; the reported failure did not occur.".to_string(),
            bug_confirmed: false,
            bug_fixed: true,
            all_bugs_fixed: true,
            accuracy: AccuracyScore::Unknown,
            reproducibility: Reproducibility::NotReproducible,
            fixed_code: None,
        }
    }
}

/// Persisted analysis, tagged with how trustworthy the parse was.
///
/// The tier is part of the artifact: later steps reading history can tell a
/// verbatim reviewer verdict from one that needed repair, and a `Degraded`
/// blob still contributes its raw text instead of silently vanishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum StoredAnalysis {
    /// Parsed cleanly with every expected field present.
    WellFormed { record: AnalysisRecord },
    /// Parsed after defaulting the fields named in `filled`.
    Repaired {
        record: AnalysisRecord,
        filled: Vec<String>,
    },
    /// Completion text that never yielded a JSON object; kept verbatim.
    Degraded { raw: String },
}

impl StoredAnalysis {
    /// The structured record, when one exists.
    pub fn record(&self) -> Option<&AnalysisRecord> {
        match self {
            StoredAnalysis::WellFormed { record } | StoredAnalysis::Repaired { record, .. } => {
                Some(record)
            }
            StoredAnalysis::Degraded { .. } => None,
        }
    }

    /// The fix plan this step contributes to later prompts. A degraded
    /// record contributes its raw text: a half-garbled plan beats a gap.
    pub fn fix_plan(&self) -> &str {
        match self {
            StoredAnalysis::WellFormed { record } | StoredAnalysis::Repaired { record, .. } => {
                &record.fix_plan
            }
            StoredAnalysis::Degraded { raw } => raw,
        }
    }
}
