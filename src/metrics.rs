//! Metrics counters
//!
//! Process-wide tallies across runs, incidents and transitions. Counters
//! are never reset at runtime; on startup they are rebuilt from the run
//! artifacts and the registry.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::models::{Incident, IncidentStatus, IncidentType, NormalizedEvent};
use crate::normalize::RejectedEvent;
use crate::runstore::RunStore;

/// Flat counters plus labeled breakdowns, as served by `/metrics/`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub breakdowns: BTreeMap<String, BTreeMap<String, u64>>,
}

#[derive(Debug, Default)]
struct State {
    runs_total: u64,
    events_ingested_total: u64,
    events_normalized_total: u64,
    events_rejected_total: u64,
    incidents_created_total: u64,
    incidents_merged_total: u64,
    transitions_total: u64,
    rejected_by_reason: BTreeMap<String, u64>,
    created_by_type: BTreeMap<String, u64>,
    merged_by_type: BTreeMap<String, u64>,
    transitions_by_edge: BTreeMap<String, u64>,
    events_by_source: BTreeMap<String, u64>,
}

#[derive(Debug)]
pub struct Metrics {
    state: Mutex<State>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Tally one completed ingest.
    pub fn record_run(
        &self,
        ingested: u64,
        events: &[NormalizedEvent],
        rejected: &[RejectedEvent],
    ) {
        let mut state = self.state.lock();
        state.runs_total += 1;
        state.events_ingested_total += ingested;
        state.events_normalized_total += events.len() as u64;
        state.events_rejected_total += rejected.len() as u64;

        for event in events {
            let source = event.source.as_deref().unwrap_or("unknown").to_string();
            *state.events_by_source.entry(source).or_insert(0) += 1;
        }
        for rejection in rejected {
            *state
                .rejected_by_reason
                .entry(rejection.reason.label())
                .or_insert(0) += 1;
        }
    }

    pub fn record_incident_created(&self, incident_type: IncidentType) {
        let mut state = self.state.lock();
        state.incidents_created_total += 1;
        *state
            .created_by_type
            .entry(incident_type.as_str().to_string())
            .or_insert(0) += 1;
    }

    pub fn record_incident_merged(&self, incident_type: IncidentType) {
        let mut state = self.state.lock();
        state.incidents_merged_total += 1;
        *state
            .merged_by_type
            .entry(incident_type.as_str().to_string())
            .or_insert(0) += 1;
    }

    pub fn record_transition(&self, from: IncidentStatus, to: IncidentStatus) {
        let mut state = self.state.lock();
        state.transitions_total += 1;
        *state
            .transitions_by_edge
            .entry(format!("{from}->{to}"))
            .or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        let mut counters = BTreeMap::new();
        counters.insert("runs_total".into(), state.runs_total);
        counters.insert("events_ingested_total".into(), state.events_ingested_total);
        counters.insert(
            "events_normalized_total".into(),
            state.events_normalized_total,
        );
        counters.insert("events_rejected_total".into(), state.events_rejected_total);
        counters.insert(
            "incidents_created_total".into(),
            state.incidents_created_total,
        );
        counters.insert("incidents_merged_total".into(), state.incidents_merged_total);
        counters.insert("transitions_total".into(), state.transitions_total);

        let mut breakdowns = BTreeMap::new();
        breakdowns.insert(
            "events_rejected_by_reason".into(),
            state.rejected_by_reason.clone(),
        );
        breakdowns.insert("incidents_created_by_type".into(), state.created_by_type.clone());
        breakdowns.insert("incidents_merged_by_type".into(), state.merged_by_type.clone());
        breakdowns.insert("transitions_by_edge".into(), state.transitions_by_edge.clone());
        breakdowns.insert("events_by_source".into(), state.events_by_source.clone());

        MetricsSnapshot {
            counters,
            breakdowns,
        }
    }

    /// Rebuild counters from the run artifacts and the registry snapshot.
    ///
    /// Creations come from the registry (one per surviving identity);
    /// merges are the per-run detections beyond those. Rejection reasons
    /// and transition history are not reconstructable from artifacts, so
    /// rejected events fall under `unknown` and transition counters restart
    /// at zero.
    pub fn rebuild(&self, runs: &RunStore, registry_incidents: &[Incident]) {
        let mut state = self.state.lock();
        *state = State::default();

        let run_ids = runs.list_runs().unwrap_or_default();
        let mut detections_by_type: BTreeMap<String, u64> = BTreeMap::new();

        for run_id in &run_ids {
            let Ok(meta) = runs.read_meta(run_id) else {
                continue;
            };
            state.runs_total += 1;
            state.events_ingested_total += meta.event_count;

            let normalized = runs.read_normalized(run_id).unwrap_or_default();
            state.events_normalized_total += normalized.len() as u64;
            for event in &normalized {
                let source = event.source.as_deref().unwrap_or("unknown").to_string();
                *state.events_by_source.entry(source).or_insert(0) += 1;
            }

            let gap = meta.event_count.saturating_sub(normalized.len() as u64);
            if gap > 0 {
                state.events_rejected_total += gap;
                *state.rejected_by_reason.entry("unknown".into()).or_insert(0) += gap;
            }

            for incident in runs.read_incidents(run_id).unwrap_or_default() {
                *detections_by_type
                    .entry(incident.incident_type.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }

        for incident in registry_incidents {
            state.incidents_created_total += 1;
            *state
                .created_by_type
                .entry(incident.incident_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        for (incident_type, detected) in detections_by_type {
            let created = state.created_by_type.get(&incident_type).copied().unwrap_or(0);
            let merged = detected.saturating_sub(created);
            if merged > 0 {
                state.incidents_merged_total += merged;
                state.merged_by_type.insert(incident_type, merged);
            }
        }

        info!(
            runs = state.runs_total,
            incidents = state.incidents_created_total,
            "metrics rebuilt from artifacts"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::RejectReason;

    fn event(source: Option<&str>) -> NormalizedEvent {
        NormalizedEvent {
            timestamp: crate::models::ts::parse("2025-12-21T06:00:00Z").unwrap(),
            event_type: "login_attempt".into(),
            result: crate::models::EventResult::Failure,
            source_ip: None,
            username: None,
            reason: None,
            user_agent: None,
            source: source.map(str::to_string),
        }
    }

    #[test]
    fn test_record_run_counts() {
        let metrics = Metrics::new();
        metrics.record_run(
            3,
            &[event(Some("auth_service")), event(None)],
            &[RejectedEvent {
                index: 2,
                reason: RejectReason::Telemetry,
            }],
        );

        let snap = metrics.snapshot();
        assert_eq!(snap.counters["runs_total"], 1);
        assert_eq!(snap.counters["events_ingested_total"], 3);
        assert_eq!(snap.counters["events_normalized_total"], 2);
        assert_eq!(snap.counters["events_rejected_total"], 1);
        assert_eq!(snap.breakdowns["events_rejected_by_reason"]["telemetry"], 1);
        assert_eq!(snap.breakdowns["events_by_source"]["auth_service"], 1);
        assert_eq!(snap.breakdowns["events_by_source"]["unknown"], 1);
    }

    #[test]
    fn test_incident_and_transition_counters() {
        let metrics = Metrics::new();
        metrics.record_incident_created(IncidentType::BruteForce);
        metrics.record_incident_created(IncidentType::CredentialAbuse);
        metrics.record_incident_merged(IncidentType::BruteForce);
        metrics.record_transition(IncidentStatus::Open, IncidentStatus::Acknowledged);
        metrics.record_transition(IncidentStatus::Acknowledged, IncidentStatus::Closed);

        let snap = metrics.snapshot();
        assert_eq!(snap.counters["incidents_created_total"], 2);
        assert_eq!(snap.counters["incidents_merged_total"], 1);
        assert_eq!(snap.counters["transitions_total"], 2);
        assert_eq!(
            snap.breakdowns["incidents_created_by_type"]["brute_force"],
            1
        );
        assert_eq!(
            snap.breakdowns["transitions_by_edge"]["open->acknowledged"],
            1
        );
        assert_eq!(
            snap.breakdowns["transitions_by_edge"]["acknowledged->closed"],
            1
        );
    }

    #[test]
    fn test_counters_accumulate_across_runs() {
        let metrics = Metrics::new();
        metrics.record_run(2, &[event(None)], &[]);
        metrics.record_run(4, &[event(None), event(None)], &[]);

        let snap = metrics.snapshot();
        assert_eq!(snap.counters["runs_total"], 2);
        assert_eq!(snap.counters["events_ingested_total"], 6);
        assert_eq!(snap.counters["events_normalized_total"], 3);
    }
}
