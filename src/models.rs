//! Core data models used throughout caseguard.
//!
//! These types represent the case reports that flow through submission,
//! duplicate detection and status tracking, plus the transient
//! [`MatchResult`] produced by the matcher.

use anyhow::bail;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Youngest age accepted on a case report.
pub const MIN_AGE: i64 = 0;
/// Oldest age accepted on a case report.
pub const MAX_AGE: i64 = 18;

/// Kind of incident a case describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseType {
    Missing,
    #[serde(alias = "labor")]
    Labour,
    Harassment,
}

impl CaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseType::Missing => "missing",
            CaseType::Labour => "labour",
            CaseType::Harassment => "harassment",
        }
    }
}

impl fmt::Display for CaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaseType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "missing" => Ok(CaseType::Missing),
            "labour" | "labor" => Ok(CaseType::Labour),
            "harassment" => Ok(CaseType::Harassment),
            other => bail!(
                "invalid case type '{}': must be missing, labour, or harassment",
                other
            ),
        }
    }
}

/// Investigation status of a case.
///
/// Transitions only move a case forward, with one exception: an
/// investigation may be dropped back to `open`. `resolved` is terminal.
///
/// ```text
/// open ──▶ investigating ──▶ resolved
///   │  ◀──────┘                 ▲
///   └───────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Open,
    Investigating,
    Resolved,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Open => "open",
            CaseStatus::Investigating => "investigating",
            CaseStatus::Resolved => "resolved",
        }
    }

    /// Whether a case in this status may move to `next`.
    pub fn can_transition_to(self, next: CaseStatus) -> bool {
        matches!(
            (self, next),
            (CaseStatus::Open, CaseStatus::Investigating)
                | (CaseStatus::Open, CaseStatus::Resolved)
                | (CaseStatus::Investigating, CaseStatus::Resolved)
                | (CaseStatus::Investigating, CaseStatus::Open)
        )
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaseStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(CaseStatus::Open),
            "investigating" => Ok(CaseStatus::Investigating),
            "resolved" => Ok(CaseStatus::Resolved),
            other => bail!(
                "invalid status '{}': must be open, investigating, or resolved",
                other
            ),
        }
    }
}

/// A stored case report.
#[derive(Debug, Clone, Serialize)]
pub struct CaseRecord {
    pub id: String,
    pub child_name: String,
    pub age: i64,
    pub location: String,
    pub description: String,
    pub contact_info: String,
    pub case_type: CaseType,
    pub image_url: Option<String>,
    /// Serialized JSON describing physical traits, as submitted.
    pub physical_traits: Option<String>,
    pub status: CaseStatus,
    pub reporter: Option<String>,
    pub blockchain_id: Option<String>,
    #[serde(serialize_with = "serialize_ts")]
    pub created_at: i64,
    #[serde(serialize_with = "serialize_ts")]
    pub updated_at: i64,
}

/// A draft case report as received from a submitter.
///
/// Every field is optional: drafts are compared against existing cases
/// before they are complete, and only validated into a
/// [`CaseSubmission`] when committed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewCase {
    #[serde(default)]
    pub child_name: Option<String>,
    #[serde(default)]
    pub age: Option<i64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub contact_info: Option<String>,
    #[serde(default)]
    pub case_type: Option<CaseType>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Either a JSON object or a string holding serialized JSON.
    #[serde(default)]
    pub physical_traits: Option<serde_json::Value>,
    #[serde(default)]
    pub reporter: Option<String>,
}

/// A fully validated case report, ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseSubmission {
    pub child_name: String,
    pub age: i64,
    pub location: String,
    pub description: String,
    pub contact_info: String,
    pub case_type: CaseType,
    pub image_url: Option<String>,
    pub physical_traits: Option<String>,
    pub reporter: Option<String>,
}

/// A stored case viewed as a draft, for comparing two stored cases.
impl From<&CaseRecord> for NewCase {
    fn from(record: &CaseRecord) -> Self {
        NewCase {
            child_name: Some(record.child_name.clone()),
            age: Some(record.age),
            location: Some(record.location.clone()),
            description: Some(record.description.clone()),
            contact_info: Some(record.contact_info.clone()),
            case_type: Some(record.case_type),
            image_url: record.image_url.clone(),
            physical_traits: record
                .physical_traits
                .as_ref()
                .map(|t| serde_json::Value::String(t.clone())),
            reporter: record.reporter.clone(),
        }
    }
}

/// Similarity between a draft and one existing case.
///
/// All four scores are in `[0, 1]`. `overall_similarity` is a convex
/// combination of the other three.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchResult {
    /// Name + description similarity reported by the text model.
    pub physical_match: f64,
    /// Photo similarity reported by the vision model; 0 when either side has no image.
    pub distinctive_features_match: f64,
    pub contact_match: f64,
    pub overall_similarity: f64,
}

/// Render a unix timestamp as ISO 8601 (UTC).
pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn serialize_ts<S: Serializer>(ts: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_ts_iso(*ts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_type_parses_both_spellings() {
        assert_eq!("labour".parse::<CaseType>().unwrap(), CaseType::Labour);
        assert_eq!("Labor".parse::<CaseType>().unwrap(), CaseType::Labour);
        assert_eq!(" missing ".parse::<CaseType>().unwrap(), CaseType::Missing);
        assert!("kidnapping".parse::<CaseType>().is_err());
    }

    #[test]
    fn status_transitions() {
        use CaseStatus::*;
        assert!(Open.can_transition_to(Investigating));
        assert!(Open.can_transition_to(Resolved));
        assert!(Investigating.can_transition_to(Resolved));
        assert!(Investigating.can_transition_to(Open));

        assert!(!Open.can_transition_to(Open));
        assert!(!Resolved.can_transition_to(Open));
        assert!(!Resolved.can_transition_to(Investigating));
    }

    #[test]
    fn draft_deserializes_partially() {
        let draft: NewCase =
            serde_json::from_str(r#"{"child_name": "Ana", "case_type": "labor"}"#).unwrap();
        assert_eq!(draft.child_name.as_deref(), Some("Ana"));
        assert_eq!(draft.case_type, Some(CaseType::Labour));
        assert!(draft.contact_info.is_none());
        assert!(draft.image_url.is_none());
    }

    #[test]
    fn record_serializes_iso_timestamps() {
        let record = CaseRecord {
            id: "c1".into(),
            child_name: "Ana".into(),
            age: 9,
            location: "Lima".into(),
            description: "Last seen at the market".into(),
            contact_info: "555-123-4567".into(),
            case_type: CaseType::Missing,
            image_url: None,
            physical_traits: None,
            status: CaseStatus::Open,
            reporter: None,
            blockchain_id: None,
            created_at: 0,
            updated_at: 86_400,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["created_at"], "1970-01-01T00:00:00Z");
        assert_eq!(json["updated_at"], "1970-01-02T00:00:00Z");
        assert_eq!(json["case_type"], "missing");
        assert_eq!(json["status"], "open");
    }
}
