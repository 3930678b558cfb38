//! Canonical event and incident types
//!
//! Shared data model used by the normalizer, detector, registry and risk
//! engine. Raw events stay as untyped JSON maps at the boundary; everything
//! past the normalizer is one of the types below.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Canonical second-precision UTC timestamp format (`2025-12-21T06:00:00Z`).
///
/// Every persisted and hashed timestamp goes through this module so the
/// content-addressed incident identity stays portable.
pub mod ts {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Parse an ISO-8601 timestamp; a naive timestamp is taken as UTC.
    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return Some(naive.and_utc());
            }
        }
        None
    }

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&format(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(de)?;
        parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {s}")))
    }
}

/// Outcome of an authentication event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventResult {
    Success,
    Failure,
    Other,
}

impl EventResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventResult::Success => "success",
            EventResult::Failure => "failure",
            EventResult::Other => "other",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, EventResult::Failure)
    }
}

impl std::fmt::Display for EventResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A login event projected into the canonical schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    #[serde(with = "ts")]
    pub timestamp: DateTime<Utc>,
    /// Lower-cased action category, e.g. `login_attempt`.
    pub event_type: String,
    pub result: EventResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Incident severity, ordered so the stronger of two merges by `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incident lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Open,
    Acknowledged,
    Closed,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Open => "open",
            IncidentStatus::Acknowledged => "acknowledged",
            IncidentStatus::Closed => "closed",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, IncidentStatus::Open)
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detection rule family an incident belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    BruteForce,
    CredentialAbuse,
}

impl IncidentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentType::BruteForce => "brute_force",
            IncidentType::CredentialAbuse => "credential_abuse",
        }
    }
}

impl std::fmt::Display for IncidentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MITRE ATT&CK classification derived from the incident type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MitreMapping {
    pub tactic: String,
    pub technique: String,
    pub technique_name: String,
}

impl MitreMapping {
    pub fn for_type(incident_type: IncidentType) -> Self {
        match incident_type {
            IncidentType::BruteForce => Self {
                tactic: "Credential Access".into(),
                technique: "T1110".into(),
                technique_name: "Brute Force".into(),
            },
            IncidentType::CredentialAbuse => Self {
                tactic: "Credential Access".into(),
                technique: "T1110.003".into(),
                technique_name: "Password Spraying".into(),
            },
        }
    }
}

/// Entity the incident is attributed to. `username` is absent for
/// credential-abuse incidents, which target many accounts at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub source_ip: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// One row of the condensed evidence timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    #[serde(with = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub result: EventResult,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl TimelineEntry {
    pub fn from_event(event: &NormalizedEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            event_type: event.event_type.clone(),
            result: event.result,
            reason: event.reason.clone(),
            username: event.username.clone(),
        }
    }

    /// Deduplication key used when merging evidence.
    pub fn dedup_key(&self) -> (DateTime<Utc>, String, Option<String>) {
        (
            self.timestamp,
            self.event_type.clone(),
            self.username.clone(),
        )
    }
}

/// Evidence backing a detection: the triggering window plus every
/// contributing event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(with = "ts")]
    pub window_start: DateTime<Utc>,
    #[serde(with = "ts")]
    pub window_end: DateTime<Utc>,
    pub counts: BTreeMap<String, u64>,
    pub timeline: Vec<TimelineEntry>,
    pub events: Vec<NormalizedEvent>,
    /// Sorted union of the subject IP and every username observed.
    pub affected_entities: Vec<String>,
}

/// Why the rule fired: threshold, the count seen when it first crossed,
/// window length, and the field the rule groups on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub threshold: u64,
    pub observed: u64,
    pub window: String,
    pub trigger_field: String,
}

/// A detected (and possibly merged) security incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Content-addressed id: `inc_` + first 24 hex chars of the sha256 of
    /// the canonical evidence tuple.
    pub incident_id: String,
    #[serde(rename = "type")]
    pub incident_type: IncidentType,
    pub mitre: MitreMapping,
    pub severity: Severity,
    /// Integer percent in [0, 100].
    pub confidence: u8,
    pub status: IncidentStatus,
    pub subject: Subject,
    pub evidence: Evidence,
    pub summary: String,
    pub recommended_actions: Vec<String>,
    pub explanation: Explanation,
    /// Number of evidence events (tracks `evidence.counts.failures`).
    pub evidence_count: u64,
    /// Distinct log source systems across the evidence events.
    pub source_count: u64,
    #[serde(with = "ts")]
    pub first_seen: DateTime<Utc>,
    #[serde(with = "ts")]
    pub last_seen: DateTime<Utc>,
    #[serde(with = "ts")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts")]
    pub updated_at: DateTime<Utc>,
    pub resolution_reason: Option<String>,
    /// Fields written by newer versions are preserved across a
    /// read-modify-write cycle.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// An open incident with no new evidence for this long is stale.
pub const STALE_AFTER_DAYS: i64 = 7;

impl Incident {
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && now - self.last_seen > Duration::days(STALE_AFTER_DAYS)
    }

    /// Distinct `source` values across the evidence events.
    pub fn distinct_sources(&self) -> u64 {
        let sources: std::collections::BTreeSet<&str> = self
            .evidence
            .events
            .iter()
            .filter_map(|e| e.source.as_deref())
            .collect();
        sources.len() as u64
    }
}
