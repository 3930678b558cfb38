//! Sliding-window threat detection
//!
//! Runs the detection rules over one chronologically sorted normalized
//! batch. Windows are monotonic FIFOs per grouping key driven purely by
//! event time; wall-clock never participates, so identical batches always
//! produce identical incidents.
//!
//! A grouping key whose window crosses its thresholds opens an *episode*:
//! further failures for the key are absorbed into the episode's evidence
//! until the window fully drains (the next event is more than one window
//! beyond everything seen) or the batch ends. Each episode emits exactly one
//! incident, graded on its final counts, so a cluster of N failures never
//! produces a run of near-duplicate incidents.

pub mod brute_force;
pub mod credential_abuse;

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{
    ts, Evidence, Explanation, Incident, IncidentStatus, IncidentType, MitreMapping,
    NormalizedEvent, Severity, Subject, TimelineEntry,
};

use self::brute_force::BruteForceRule;
use self::credential_abuse::CredentialAbuseRule;

/// Configuration for the sliding-window rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Window length in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Failures from one (source_ip, username) pair to flag brute force
    #[serde(default = "default_brute_force_failures")]
    pub brute_force_failure_threshold: usize,

    /// Distinct usernames from one source_ip to flag credential abuse
    #[serde(default = "default_cred_abuse_users")]
    pub cred_abuse_distinct_user_threshold: usize,

    /// Total failures from one source_ip to flag credential abuse
    #[serde(default = "default_cred_abuse_failures")]
    pub cred_abuse_failure_threshold: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            brute_force_failure_threshold: default_brute_force_failures(),
            cred_abuse_distinct_user_threshold: default_cred_abuse_users(),
            cred_abuse_failure_threshold: default_cred_abuse_failures(),
        }
    }
}

impl DetectionConfig {
    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_seconds as i64)
    }

    /// Window length as reported in incident explanations, e.g. `60s`.
    pub fn window_label(&self) -> String {
        format!("{}s", self.window_seconds)
    }
}

fn default_window_seconds() -> u64 {
    60
}

fn default_brute_force_failures() -> usize {
    5
}

fn default_cred_abuse_users() -> usize {
    5
}

fn default_cred_abuse_failures() -> usize {
    8
}

/// Response guidance attached to every incident, in fixed order.
pub const RECOMMENDED_ACTIONS: [&str; 4] = [
    "Validate whether the source IP and login pattern are expected for this user (VPNs, known locations, automation).",
    "Review authentication activity before and after the detection window to identify escalation or successful access.",
    "Assess account controls (lockout behavior, MFA enforcement) and confirm whether the user experienced authentication issues.",
    "If activity is unauthorized, follow response policy: reset credentials, revoke active sessions, and apply network controls as appropriate.",
];

/// Content-addressed incident identity: `inc_` plus the first 24 hex chars
/// of the sha256 of the canonical seed.
pub fn incident_id(seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("inc_{}", &digest[..24])
}

/// Canonical seed for a brute-force window:
/// `brute_force|ip|user|window_start|window_end|failures`.
pub fn brute_force_seed(
    ip: &str,
    username: &str,
    window_start: &DateTime<Utc>,
    window_end: &DateTime<Utc>,
    failures: u64,
) -> String {
    format!(
        "brute_force|{ip}|{username}|{}|{}|{failures}",
        ts::format(window_start),
        ts::format(window_end)
    )
}

/// Canonical seed for a credential-abuse window:
/// `cred_abuse|ip|window_start|window_end|failures|distinct_users`.
pub fn cred_abuse_seed(
    ip: &str,
    window_start: &DateTime<Utc>,
    window_end: &DateTime<Utc>,
    failures: u64,
    distinct_users: u64,
) -> String {
    format!(
        "cred_abuse|{ip}|{}|{}|{failures}|{distinct_users}",
        ts::format(window_start),
        ts::format(window_end)
    )
}

/// Runs both rules over one normalized batch.
pub struct Detector {
    config: DetectionConfig,
}

impl Detector {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    /// Detect incidents in a batch sorted by `(timestamp, input index)`.
    /// Only failures carrying a source IP feed the windows.
    pub fn detect(&self, events: &[NormalizedEvent]) -> Vec<Incident> {
        let mut brute = BruteForceRule::new(&self.config);
        let mut spray = CredentialAbuseRule::new(&self.config);
        let mut incidents = Vec::new();

        for event in events {
            if !event.result.is_failure() {
                continue;
            }
            brute.observe(event, &mut incidents);
            spray.observe(event, &mut incidents);
        }

        brute.finish(&mut incidents);
        spray.finish(&mut incidents);

        incidents
    }
}

/// Evidence assembled from an episode's accumulated events. The events are
/// already in chronological order because the batch is.
pub(crate) fn build_evidence(subject_ip: &str, events: Vec<NormalizedEvent>) -> Evidence {
    let window_start = events.first().map(|e| e.timestamp).unwrap_or_default();
    let window_end = events.last().map(|e| e.timestamp).unwrap_or_default();

    let mut entities: BTreeSet<String> = events
        .iter()
        .filter_map(|e| e.username.clone())
        .collect();
    entities.insert(subject_ip.to_string());

    Evidence {
        window_start,
        window_end,
        counts: Default::default(),
        timeline: events.iter().map(TimelineEntry::from_event).collect(),
        events,
        affected_entities: entities.into_iter().collect(),
    }
}

/// Assemble the final incident around prepared evidence.
#[allow(clippy::too_many_arguments)]
pub(crate) fn build_incident(
    id: String,
    incident_type: IncidentType,
    severity: Severity,
    confidence: u8,
    subject: Subject,
    evidence: Evidence,
    summary: String,
    explanation: Explanation,
) -> Incident {
    let now = Utc::now();
    let evidence_count = *evidence.counts.get("failures").unwrap_or(&0);
    let mut incident = Incident {
        incident_id: id,
        incident_type,
        mitre: MitreMapping::for_type(incident_type),
        severity,
        confidence,
        status: IncidentStatus::Open,
        subject,
        evidence,
        summary,
        recommended_actions: RECOMMENDED_ACTIONS.iter().map(|s| s.to_string()).collect(),
        explanation,
        evidence_count,
        source_count: 0,
        first_seen: now,
        last_seen: now,
        created_at: now,
        updated_at: now,
        resolution_reason: None,
        extra: Default::default(),
    };
    incident.first_seen = incident.evidence.window_start;
    incident.last_seen = incident.evidence.window_end;
    incident.source_count = incident.distinct_sources();
    incident
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::models::{EventResult, NormalizedEvent};

    pub fn failure(ts: &str, ip: &str, user: &str) -> NormalizedEvent {
        event(ts, ip, user, EventResult::Failure, "login_attempt")
    }

    pub fn event(
        ts: &str,
        ip: &str,
        user: &str,
        result: EventResult,
        event_type: &str,
    ) -> NormalizedEvent {
        NormalizedEvent {
            timestamp: crate::models::ts::parse(ts).unwrap(),
            event_type: event_type.to_string(),
            result,
            source_ip: Some(ip.to_string()),
            username: Some(user.to_string()),
            reason: Some("bad_password".to_string()),
            user_agent: None,
            source: Some("auth_service".to_string()),
        }
    }
}
