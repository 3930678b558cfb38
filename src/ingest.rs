//! Ingest orchestration
//!
//! Composes the pipeline for one batch: allocate a run, persist the raw
//! batch, normalize, detect, commit the detections into the registry as a
//! single staged batch, notify the risk engine, persist the per-run
//! incident snapshot, and tally metrics. The registry commit is
//! all-or-nothing; artifact writes after it are best-effort and reported
//! through the phase statuses.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::detection::{DetectionConfig, Detector};
use crate::error::Result;
use crate::mapping::MappingSet;
use crate::metrics::Metrics;
use crate::models::Incident;
use crate::normalize::Normalizer;
use crate::registry::IncidentRegistry;
use crate::risk::EntityRiskEngine;
use crate::runstore::{RunMeta, RunStore};

/// Outcome of one pipeline phase as reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Success,
    Failed,
}

/// Summary returned from one ingest.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub run_id: String,
    pub event_count: u64,
    pub normalization_status: PhaseStatus,
    pub detection_status: PhaseStatus,
    pub incident_count: u64,
    /// Post-merge registry snapshots of every incident the batch produced.
    pub incidents: Vec<Incident>,
}

/// Borrows the engine's components for the duration of one batch.
pub struct IngestPipeline<'a> {
    pub mappings: &'a MappingSet,
    pub detection: &'a DetectionConfig,
    pub runs: &'a RunStore,
    pub registry: &'a IncidentRegistry,
    pub risk: &'a EntityRiskEngine,
    pub metrics: &'a Metrics,
}

impl IngestPipeline<'_> {
    pub fn run(&self, batch: &[Value], source_hint: Option<&str>) -> Result<IngestReport> {
        let run_id = self.runs.allocate_run_id();
        self.runs.create_run(&run_id)?;
        self.runs.write_raw(&run_id, batch)?;
        self.runs.write_meta(
            &run_id,
            &RunMeta {
                run_id: run_id.clone(),
                created_at: Utc::now(),
                event_count: batch.len() as u64,
            },
        )?;

        let outcome = Normalizer::new(self.mappings).normalize(batch, source_hint);
        let normalization_status = match self.runs.write_normalized(&run_id, &outcome.events) {
            Ok(()) => PhaseStatus::Success,
            Err(e) => {
                warn!(%run_id, "failed to persist normalized events: {e}");
                PhaseStatus::Failed
            }
        };

        let detected = Detector::new(self.detection.clone()).detect(&outcome.events);

        // One staged commit: either every incident lands or the registry is
        // untouched and the error surfaces to the caller.
        let outcomes = self.registry.upsert_batch(detected.clone())?;

        // Risk and metrics updates happen strictly after the registry lock
        // is released.
        for upsert in &outcomes {
            self.risk.record_incident(&upsert.incident);
            if upsert.created {
                self.metrics.record_incident_created(upsert.incident.incident_type);
            } else {
                self.metrics.record_incident_merged(upsert.incident.incident_type);
            }
        }

        let detection_status = match self.runs.write_incidents(&run_id, &detected) {
            Ok(()) => PhaseStatus::Success,
            Err(e) => {
                warn!(%run_id, "failed to persist incident snapshot: {e}");
                PhaseStatus::Failed
            }
        };

        self.metrics
            .record_run(batch.len() as u64, &outcome.events, &outcome.rejected);

        info!(
            %run_id,
            events = batch.len(),
            normalized = outcome.events.len(),
            rejected = outcome.rejected.len(),
            incidents = outcomes.len(),
            "ingest complete"
        );

        Ok(IngestReport {
            run_id,
            event_count: batch.len() as u64,
            normalization_status,
            detection_status,
            incident_count: outcomes.len() as u64,
            incidents: outcomes.into_iter().map(|o| o.incident).collect(),
        })
    }
}
