//! Incident registry
//!
//! Content-addressed incident store backed by one JSON file. Upserts merge
//! into existing incidents by id, lifecycle transitions follow the
//! open -> acknowledged -> closed state machine, and every mutation is
//! persisted with an atomic write-to-temp + rename before it becomes
//! visible in memory. Mutations that fail to persist leave the registry
//! unchanged.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::models::{Incident, IncidentStatus, NormalizedEvent, TimelineEntry};

pub const STORE_VERSION: u32 = 1;

/// On-disk shape: `{version, incidents: {incident_id: incident}}`. Unknown
/// envelope fields survive a read-modify-write cycle.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    incidents: BTreeMap<String, Incident>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug)]
struct Inner {
    incidents: BTreeMap<String, Incident>,
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Result of one upsert, reported to metrics and the risk engine.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    /// Post-merge snapshot.
    pub incident: Incident,
    /// True when the id was new to the registry.
    pub created: bool,
    /// True when a closed incident auto-reopened.
    pub reopened: bool,
}

#[derive(Debug)]
pub struct IncidentRegistry {
    path: PathBuf,
    inner: RwLock<Inner>,
}

impl IncidentRegistry {
    /// Open the registry, rehydrating from `path` when it exists. An
    /// unreadable file is logged and treated as empty rather than refusing
    /// to start.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut incidents = BTreeMap::new();
        let mut extra = serde_json::Map::new();

        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str::<StoreFile>(&content) {
                    Ok(store) => {
                        incidents = store.incidents;
                        extra = store.extra;
                        info!(count = incidents.len(), "rehydrated incident registry");
                    }
                    Err(e) => warn!("failed to parse {}; starting empty: {e}", path.display()),
                },
                Err(e) => warn!("failed to read {}; starting empty: {e}", path.display()),
            }
        }

        Ok(Self {
            path,
            inner: RwLock::new(Inner { incidents, extra }),
        })
    }

    /// Insert or merge one incident.
    pub fn upsert(&self, incident: Incident) -> Result<UpsertOutcome> {
        Ok(self.upsert_batch(vec![incident])?.pop().expect("one outcome"))
    }

    /// Insert or merge a batch under one lock and one persistence flush.
    /// Either every staged merge commits or the registry is unchanged.
    pub fn upsert_batch(&self, incidents: Vec<Incident>) -> Result<Vec<UpsertOutcome>> {
        let mut inner = self.inner.write();
        let mut staged = inner.incidents.clone();
        let mut outcomes = Vec::with_capacity(incidents.len());
        let now = Utc::now();

        for incoming in incidents {
            let outcome = match staged.get(&incoming.incident_id) {
                None => {
                    let mut fresh = incoming;
                    fresh.status = IncidentStatus::Open;
                    fresh.resolution_reason = None;
                    fresh.created_at = now;
                    fresh.updated_at = now;
                    staged.insert(fresh.incident_id.clone(), fresh.clone());
                    UpsertOutcome {
                        incident: fresh,
                        created: true,
                        reopened: false,
                    }
                }
                Some(existing) => {
                    let mut merged = merge_incidents(existing, &incoming, now);
                    let reopened = existing.status == IncidentStatus::Closed;
                    if reopened {
                        merged.status = IncidentStatus::Open;
                        merged.resolution_reason = None;
                    }
                    staged.insert(merged.incident_id.clone(), merged.clone());
                    UpsertOutcome {
                        incident: merged,
                        created: false,
                        reopened,
                    }
                }
            };
            outcomes.push(outcome);
        }

        persist(&self.path, &staged, &inner.extra)?;
        inner.incidents = staged;
        Ok(outcomes)
    }

    /// Apply a lifecycle transition. Allowed: open -> acknowledged and
    /// acknowledged -> closed (which requires a resolution reason).
    /// closed -> open happens only through merge, never through this call.
    pub fn transition(
        &self,
        incident_id: &str,
        target: IncidentStatus,
        resolution_reason: Option<String>,
    ) -> Result<Incident> {
        let mut inner = self.inner.write();

        let existing = inner
            .incidents
            .get(incident_id)
            .ok_or_else(|| EngineError::NotFound(format!("incident {incident_id}")))?;

        let allowed = matches!(
            (existing.status, target),
            (IncidentStatus::Open, IncidentStatus::Acknowledged)
                | (IncidentStatus::Acknowledged, IncidentStatus::Closed)
        );
        if !allowed {
            return Err(EngineError::InvalidTransition {
                from: existing.status,
                to: target,
            });
        }
        if target == IncidentStatus::Closed && resolution_reason.is_none() {
            return Err(EngineError::MissingResolutionReason);
        }

        let mut updated = existing.clone();
        updated.status = target;
        updated.updated_at = Utc::now();
        if target == IncidentStatus::Closed {
            updated.resolution_reason = resolution_reason;
        }

        let mut staged = inner.incidents.clone();
        staged.insert(updated.incident_id.clone(), updated.clone());
        persist(&self.path, &staged, &inner.extra)?;
        inner.incidents = staged;

        Ok(updated)
    }

    pub fn get(&self, incident_id: &str) -> Option<Incident> {
        self.inner.read().incidents.get(incident_id).cloned()
    }

    /// Snapshot of every incident, ordered by id.
    pub fn list(&self) -> Vec<Incident> {
        self.inner.read().incidents.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().incidents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().incidents.is_empty()
    }

    pub fn is_stale(&self, incident: &Incident) -> bool {
        incident.is_stale_at(Utc::now())
    }
}

/// Merge an incoming detection into the stored incident with the same id.
fn merge_incidents(existing: &Incident, incoming: &Incident, now: DateTime<Utc>) -> Incident {
    let mut merged = existing.clone();

    merged.first_seen = existing.first_seen.min(incoming.first_seen);
    merged.last_seen = existing.last_seen.max(incoming.last_seen);
    merged.evidence.window_start = existing
        .evidence
        .window_start
        .min(incoming.evidence.window_start);
    merged.evidence.window_end = existing.evidence.window_end.max(incoming.evidence.window_end);

    for (key, value) in &incoming.evidence.counts {
        *merged.evidence.counts.entry(key.clone()).or_insert(0) += value;
    }

    merged.evidence.timeline = dedup_timeline(&existing.evidence.timeline, &incoming.evidence.timeline);
    merged.evidence.events = dedup_events(&existing.evidence.events, &incoming.evidence.events);

    let entities: BTreeSet<String> = existing
        .evidence
        .affected_entities
        .iter()
        .chain(incoming.evidence.affected_entities.iter())
        .cloned()
        .collect();
    merged.evidence.affected_entities = entities.into_iter().collect();

    // The stronger of the two gradings wins.
    merged.severity = existing.severity.max(incoming.severity);
    merged.confidence = existing.confidence.max(incoming.confidence);

    merged.summary = incoming.summary.clone();
    merged.recommended_actions = incoming.recommended_actions.clone();
    merged.explanation = incoming.explanation.clone();
    merged.subject = incoming.subject.clone();
    merged.mitre = incoming.mitre.clone();

    merged.evidence_count = existing.evidence_count + incoming.evidence_count;
    merged.source_count = merged.distinct_sources();
    merged.created_at = existing.created_at;
    merged.updated_at = now;

    merged
}

fn dedup_timeline(existing: &[TimelineEntry], incoming: &[TimelineEntry]) -> Vec<TimelineEntry> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for entry in existing.iter().chain(incoming.iter()) {
        if seen.insert(entry.dedup_key()) {
            out.push(entry.clone());
        }
    }
    out
}

fn dedup_events(existing: &[NormalizedEvent], incoming: &[NormalizedEvent]) -> Vec<NormalizedEvent> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for event in existing.iter().chain(incoming.iter()) {
        let key = (
            event.timestamp,
            event.event_type.clone(),
            event.username.clone(),
        );
        if seen.insert(key) {
            out.push(event.clone());
        }
    }
    out
}

/// Atomic replacement: serialize to `<path>.tmp`, then rename over the
/// registry file.
fn persist(
    path: &Path,
    incidents: &BTreeMap<String, Incident>,
    extra: &serde_json::Map<String, serde_json::Value>,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let store = StoreFile {
        version: STORE_VERSION,
        incidents: incidents.clone(),
        extra: extra.clone(),
    };
    let content = serde_json::to_string_pretty(&store)?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{Detector, DetectionConfig};
    use crate::models::{ts, Severity};
    use tempfile::TempDir;

    fn sample_incident() -> Incident {
        let events: Vec<_> = (0..5)
            .map(|i| {
                crate::detection::test_support::failure(
                    &format!("2025-12-21T05:00:{:02}Z", i),
                    "203.0.113.10",
                    "alice",
                )
            })
            .collect();
        Detector::new(DetectionConfig::default())
            .detect(&events)
            .pop()
            .unwrap()
    }

    fn registry(dir: &TempDir) -> IncidentRegistry {
        IncidentRegistry::open(dir.path().join("incidents.json")).unwrap()
    }

    #[test]
    fn test_insert_and_reload() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let outcome = reg.upsert(sample_incident()).unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.incident.status, IncidentStatus::Open);

        // A fresh registry over the same file sees the incident.
        let reloaded = registry(&dir);
        assert_eq!(reloaded.len(), 1);
        let stored = reloaded.get(&outcome.incident.incident_id).unwrap();
        assert_eq!(stored.evidence.counts["failures"], 5);
        assert_eq!(stored.severity, Severity::Low);
    }

    #[test]
    fn test_merge_sums_counts_and_dedups_events() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let incident = sample_incident();
        reg.upsert(incident.clone()).unwrap();
        let outcome = reg.upsert(incident.clone()).unwrap();

        assert!(!outcome.created);
        let merged = outcome.incident;
        // Counts sum across merges; the evidence list stays deduplicated.
        assert_eq!(merged.evidence.counts["failures"], 10);
        assert_eq!(merged.evidence_count, 10);
        assert_eq!(merged.evidence.events.len(), 5);
        assert_eq!(merged.evidence.timeline.len(), 5);
        assert_eq!(merged.created_at, reg.get(&incident.incident_id).unwrap().created_at);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_merge_keeps_stronger_grading() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let mut strong = sample_incident();
        strong.severity = Severity::High;
        strong.confidence = 95;
        reg.upsert(strong.clone()).unwrap();

        let mut weak = sample_incident();
        weak.severity = Severity::Low;
        weak.confidence = 70;
        let merged = reg.upsert(weak).unwrap().incident;
        assert_eq!(merged.severity, Severity::High);
        assert_eq!(merged.confidence, 95);
    }

    #[test]
    fn test_merge_extends_window() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let first = sample_incident();
        reg.upsert(first.clone()).unwrap();

        let mut later = first.clone();
        later.evidence.window_start = ts::parse("2025-12-21T05:02:00Z").unwrap();
        later.evidence.window_end = ts::parse("2025-12-21T05:02:30Z").unwrap();
        later.first_seen = later.evidence.window_start;
        later.last_seen = later.evidence.window_end;
        let merged = reg.upsert(later).unwrap().incident;

        assert_eq!(merged.evidence.window_start, first.evidence.window_start);
        assert_eq!(ts::format(&merged.evidence.window_end), "2025-12-21T05:02:30Z");
        assert_eq!(merged.first_seen, first.first_seen);
        assert_eq!(ts::format(&merged.last_seen), "2025-12-21T05:02:30Z");
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let id = reg.upsert(sample_incident()).unwrap().incident.incident_id;

        let acked = reg
            .transition(&id, IncidentStatus::Acknowledged, None)
            .unwrap();
        assert_eq!(acked.status, IncidentStatus::Acknowledged);

        let closed = reg
            .transition(&id, IncidentStatus::Closed, Some("false positive".into()))
            .unwrap();
        assert_eq!(closed.status, IncidentStatus::Closed);
        assert_eq!(closed.resolution_reason.as_deref(), Some("false positive"));
    }

    #[test]
    fn test_open_to_closed_rejected() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let id = reg.upsert(sample_incident()).unwrap().incident.incident_id;

        let err = reg
            .transition(&id, IncidentStatus::Closed, Some("nope".into()))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        // And no sequence of transitions skips the acknowledgement.
        assert_eq!(reg.get(&id).unwrap().status, IncidentStatus::Open);
    }

    #[test]
    fn test_close_requires_resolution_reason() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let id = reg.upsert(sample_incident()).unwrap().incident.incident_id;
        reg.transition(&id, IncidentStatus::Acknowledged, None)
            .unwrap();

        let err = reg
            .transition(&id, IncidentStatus::Closed, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingResolutionReason));
    }

    #[test]
    fn test_closed_reopens_on_merge_only() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let incident = sample_incident();
        let id = incident.incident_id.clone();
        reg.upsert(incident.clone()).unwrap();
        reg.transition(&id, IncidentStatus::Acknowledged, None)
            .unwrap();
        reg.transition(&id, IncidentStatus::Closed, Some("resolved".into()))
            .unwrap();

        // The API cannot reopen.
        let err = reg.transition(&id, IncidentStatus::Open, None).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        // Re-ingesting the same evidence does.
        let outcome = reg.upsert(incident).unwrap();
        assert!(outcome.reopened);
        assert_eq!(outcome.incident.status, IncidentStatus::Open);
        assert!(outcome.incident.resolution_reason.is_none());
        assert_eq!(outcome.incident.evidence.counts["failures"], 10);
    }

    #[test]
    fn test_unknown_fields_preserved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("incidents.json");

        let reg = registry(&dir);
        reg.upsert(sample_incident()).unwrap();
        drop(reg);

        // A future version annotates the file; we must not strip it.
        let mut value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        value["schema_hint"] = serde_json::json!("v2");
        let id = value["incidents"]
            .as_object()
            .unwrap()
            .keys()
            .next()
            .unwrap()
            .clone();
        value["incidents"][&id]["triage_notes"] = serde_json::json!("checked by analyst");
        fs::write(&path, serde_json::to_string_pretty(&value).unwrap()).unwrap();

        let reg = IncidentRegistry::open(&path).unwrap();
        reg.transition(&id, IncidentStatus::Acknowledged, None)
            .unwrap();

        let rewritten: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(rewritten["schema_hint"], "v2");
        assert_eq!(
            rewritten["incidents"][&id]["triage_notes"],
            "checked by analyst"
        );
        assert_eq!(rewritten["incidents"][&id]["status"], "acknowledged");
    }

    #[test]
    fn test_stale_detection() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let mut incident = sample_incident();
        incident.last_seen = Utc::now() - chrono::Duration::days(8);
        let stored = reg.upsert(incident).unwrap().incident;
        assert!(reg.is_stale(&stored));

        let mut fresh = sample_incident();
        fresh.last_seen = Utc::now();
        assert!(!fresh.is_stale_at(Utc::now()));
    }

    #[test]
    fn test_batch_upsert_is_atomic_in_memory() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let a = sample_incident();
        let mut b = sample_incident();
        b.incident_id = "inc_000000000000000000000000".into();

        let outcomes = reg.upsert_batch(vec![a, b]).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(reg.len(), 2);
        // Ordered-by-id snapshots.
        let listed = reg.list();
        assert!(listed[0].incident_id < listed[1].incident_id);
    }
}
