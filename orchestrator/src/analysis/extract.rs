//! Salvage a structured record from untrusted completion text.
//!
//! The backend is asked for a bare JSON object but routinely wraps it in
//! markdown fences, prose, or truncates it mid-stream. Extraction never
//! fails: the worst outcome is a `Degraded` record carrying the raw text.

use serde_json::Value;
use tracing::debug;

use crate::analysis::record::{AccuracyScore, AnalysisRecord, Reproducibility, StoredAnalysis};

/// Drop markdown fence lines so brace matching sees only payload.
fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Slice out the first balanced JSON object. Brace counting is byte-wise;
/// braces inside string literals can miscount, which the parse step catches.
/// If the object never closes (truncated output), fall back to the last `}`
/// in the text so a trailing-garbage completion still gets one parse attempt.
fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse completion text into a stored analysis. Infallible by design:
/// anything that cannot be repaired into a record is kept as `Degraded`.
pub fn parse_analysis(raw: &str) -> StoredAnalysis {
    let stripped = strip_code_fences(raw);
    let Some(candidate) = extract_object(&stripped) else {
        debug!("no JSON object found in completion text");
        return StoredAnalysis::Degraded {
            raw: raw.to_string(),
        };
    };
    let Ok(value) = serde_json::from_str::<Value>(candidate) else {
        debug!("extracted candidate is not valid JSON");
        return StoredAnalysis::Degraded {
            raw: raw.to_string(),
        };
    };
    let Value::Object(map) = value else {
        return StoredAnalysis::Degraded {
            raw: raw.to_string(),
        };
    };

    let mut filled = Vec::new();
    let record = AnalysisRecord {
        analysis: take_string(&map, "analysis", &mut filled),
        fix_plan: take_string(&map, "fix_plan", &mut filled),
        bug_confirmed: take_bool(&map, "bug_confirmed", &mut filled),
        bug_fixed: take_bool(&map, "bug_fixed", &mut filled),
        all_bugs_fixed: take_bool(&map, "all_bugs_fixed", &mut filled),
        accuracy: take_accuracy(&map, &mut filled),
        reproducibility: take_reproducibility(&map, &mut filled),
        // Optional: its absence is legitimate, not a repair.
        fixed_code: map
            .get("fixed_code")
            .and_then(Value::as_str)
            .map(str::to_string),
    };

    if filled.is_empty() {
        StoredAnalysis::WellFormed { record }
    } else {
        debug!(filled = ?filled, "analysis record repaired");
        StoredAnalysis::Repaired { record, filled }
    }
}

fn take_string(
    map: &serde_json::Map<String, Value>,
    field: &str,
    filled: &mut Vec<String>,
) -> String {
    match map.get(field).and_then(Value::as_str) {
        Some(s) => s.to_string(),
        None => {
            filled.push(field.to_string());
            String::new()
        }
    }
}

fn take_bool(map: &serde_json::Map<String, Value>, field: &str, filled: &mut Vec<String>) -> bool {
    match map.get(field) {
        Some(Value::Bool(b)) => *b,
        // Models sometimes quote their booleans.
        Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => true,
        Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => false,
        _ => {
            filled.push(field.to_string());
            false
        }
    }
}

fn take_accuracy(map: &serde_json::Map<String, Value>, filled: &mut Vec<String>) -> AccuracyScore {
    let parsed = match map.get("accuracy") {
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "unknown" | "0" => Some(AccuracyScore::Unknown),
            "partial" | "1" => Some(AccuracyScore::Partial),
            "exact" | "2" => Some(AccuracyScore::Exact),
            _ => None,
        },
        Some(Value::Number(n)) => match n.as_u64() {
            Some(0) => Some(AccuracyScore::Unknown),
            Some(1) => Some(AccuracyScore::Partial),
            Some(2) => Some(AccuracyScore::Exact),
            _ => None,
        },
        _ => None,
    };
    parsed.unwrap_or_else(|| {
        filled.push("accuracy".to_string());
        AccuracyScore::Unknown
    })
}

fn take_reproducibility(
    map: &serde_json::Map<String, Value>,
    filled: &mut Vec<String>,
) -> Reproducibility {
    let parsed = match map.get("reproducibility") {
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "unknown" => Some(Reproducibility::Unknown),
            "not_reproducible" | "not reproducible" => Some(Reproducibility::NotReproducible),
            "reproducible" => Some(Reproducibility::Reproducible),
            _ => None,
        },
        Some(Value::Bool(true)) => Some(Reproducibility::Reproducible),
        Some(Value::Bool(false)) => Some(Reproducibility::NotReproducible),
        _ => None,
    };
    parsed.unwrap_or_else(|| {
        filled.push("reproducibility".to_string());
        Reproducibility::Unknown
    })
}
