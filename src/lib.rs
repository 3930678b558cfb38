//! Deterministic authentication-event analytics engine
//!
//! Accepts batches of heterogeneous login events, projects them into a
//! canonical schema, runs sliding-window threat detectors over the stream,
//! and maintains a persistent registry of incidents whose identity,
//! severity, confidence and lifecycle evolve as new evidence arrives.
//! Downstream consumers read incidents, per-entity risk scores and
//! operational counters over a JSON HTTP surface.

pub mod cli;
pub mod config;
pub mod detection;
pub mod error;
pub mod ingest;
pub mod mapping;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod registry;
pub mod risk;
pub mod runstore;
pub mod server;

use serde_json::Value;
use tracing::info;

use config::Config;
use error::Result;
use ingest::{IngestPipeline, IngestReport};
use mapping::MappingSet;
use metrics::Metrics;
use models::{Incident, IncidentStatus};
use registry::IncidentRegistry;
use risk::{EntityRiskEngine, EntityRiskRow};
use runstore::RunStore;

/// Application root: owns every shared component and composes the pipeline.
/// Handlers hold this behind an `Arc`; internal locking keeps each
/// component consistent under parallel requests.
#[derive(Debug)]
pub struct Engine {
    config: Config,
    mappings: MappingSet,
    runs: RunStore,
    registry: IncidentRegistry,
    risk: EntityRiskEngine,
    metrics: Metrics,
}

impl Engine {
    /// Boot the engine: validate the mapping profiles (fatal on error),
    /// rehydrate the registry, replay it into the risk engine, and rebuild
    /// the counters from the run artifacts.
    pub fn new(config: Config) -> Result<Self> {
        let mappings = MappingSet::load_validated(&config.paths.mappings)?;
        let runs = RunStore::new(&config.paths.runs_dir)?;
        let registry = IncidentRegistry::open(config.registry_path())?;

        let incidents = registry.list();
        let risk = EntityRiskEngine::new();
        risk.rebuild(&incidents);
        let metrics = Metrics::new();
        metrics.rebuild(&runs, &incidents);

        info!(
            incidents = incidents.len(),
            runs_dir = %config.paths.runs_dir.display(),
            "engine ready"
        );

        Ok(Self {
            config,
            mappings,
            runs,
            registry,
            risk,
            metrics,
        })
    }

    /// Run one batch through the full pipeline.
    pub fn ingest(&self, batch: &[Value], source_hint: Option<&str>) -> Result<IngestReport> {
        IngestPipeline {
            mappings: &self.mappings,
            detection: &self.config.detection,
            runs: &self.runs,
            registry: &self.registry,
            risk: &self.risk,
            metrics: &self.metrics,
        }
        .run(batch, source_hint)
    }

    /// Apply a lifecycle transition and tally the edge.
    pub fn transition_incident(
        &self,
        incident_id: &str,
        target: IncidentStatus,
        resolution_reason: Option<String>,
    ) -> Result<Incident> {
        let updated = self
            .registry
            .transition(incident_id, target, resolution_reason)?;
        // Only two edges are reachable through the API.
        let from = match target {
            IncidentStatus::Acknowledged => IncidentStatus::Open,
            _ => IncidentStatus::Acknowledged,
        };
        self.metrics.record_transition(from, target);
        Ok(updated)
    }

    /// Per-entity risk rows over the current registry snapshot.
    pub fn entity_risk(&self) -> Vec<EntityRiskRow> {
        self.risk.rows(&self.registry.list())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn runs(&self) -> &RunStore {
        &self.runs
    }

    pub fn registry(&self) -> &IncidentRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const MAPPINGS: &str = r#"
_default:
  timestamp: [timestamp, time, "@timestamp", ts]
  source_ip: [source_ip, ip, client_ip]
  username: [username, user, account]
  event_type: [event_type, type, action]
  result: [result, outcome, status]
  reason: [reason, error, message]
  user_agent: [user_agent, ua]
  source: [source, provider]
"#;

    fn test_config(dir: &TempDir) -> Config {
        let mapping_path = dir.path().join("field_mappings.yaml");
        std::fs::write(&mapping_path, MAPPINGS).unwrap();
        let mut config = Config::default();
        config.paths.runs_dir = dir.path().join("runs");
        config.paths.mappings = mapping_path;
        config
    }

    fn brute_force_batch() -> Vec<Value> {
        (0..5)
            .map(|i| {
                json!({
                    "timestamp": format!("2025-12-21T05:00:{:02}Z", i),
                    "event_type": "login_attempt",
                    "result": "failure",
                    "source_ip": "203.0.113.10",
                    "username": "alice",
                    "source": "auth_service",
                })
            })
            .collect()
    }

    #[test]
    fn test_boot_requires_valid_mappings() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.paths.mappings = dir.path().join("missing.yaml");
        let err = Engine::new(config).unwrap_err();
        assert!(matches!(err, error::EngineError::ConfigInvalid(_)));
    }

    #[test]
    fn test_boot_rejects_incomplete_default_profile() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "_default:\n  timestamp: [timestamp]\n").unwrap();
        config.paths.mappings = bad;
        assert!(Engine::new(config).is_err());
    }

    #[test]
    fn test_restart_rebuilds_state() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let engine = Engine::new(config.clone()).unwrap();
        let report = engine.ingest(&brute_force_batch(), None).unwrap();
        assert_eq!(report.incident_count, 1);
        drop(engine);

        // A fresh engine over the same directories sees the same world.
        let engine = Engine::new(config).unwrap();
        assert_eq!(engine.registry().len(), 1);

        let rows = engine.entity_risk();
        assert!(rows.iter().any(|r| r.entity_value == "alice"));

        let snap = engine.metrics().snapshot();
        assert_eq!(snap.counters["runs_total"], 1);
        assert_eq!(snap.counters["events_ingested_total"], 5);
        assert_eq!(snap.counters["incidents_created_total"], 1);
    }

    #[test]
    fn test_transition_tallies_edge() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new(test_config(&dir)).unwrap();
        let report = engine.ingest(&brute_force_batch(), None).unwrap();
        let id = report.incidents[0].incident_id.clone();

        engine
            .transition_incident(&id, IncidentStatus::Acknowledged, None)
            .unwrap();
        let snap = engine.metrics().snapshot();
        assert_eq!(snap.breakdowns["transitions_by_edge"]["open->acknowledged"], 1);
    }
}
