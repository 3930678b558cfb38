//! Run artifact store
//!
//! One directory per ingest run (`run-<32 hex>`) holding `raw.json`,
//! `meta.json`, `normalized.json` and `incidents.json`. Every write is
//! atomic (temp + rename). Run ids are validated on every read so no other
//! path component can reach the filesystem.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{ts, Incident, NormalizedEvent};

fn run_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^run-[0-9a-f]{32}$").expect("valid regex"))
}

/// Per-run metadata persisted as `meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    #[serde(with = "ts")]
    pub created_at: DateTime<Utc>,
    pub event_count: u64,
}

#[derive(Debug)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a fresh run identity.
    pub fn allocate_run_id(&self) -> String {
        format!("run-{}", Uuid::new_v4().simple())
    }

    /// Reject anything that is not exactly `run-<32 hex>` before it touches
    /// the filesystem.
    pub fn validate_run_id(&self, run_id: &str) -> Result<()> {
        if run_id_regex().is_match(run_id) {
            Ok(())
        } else {
            Err(EngineError::InvalidRunId(run_id.to_string()))
        }
    }

    fn run_dir(&self, run_id: &str) -> Result<PathBuf> {
        self.validate_run_id(run_id)?;
        Ok(self.root.join(run_id))
    }

    fn existing_run_dir(&self, run_id: &str) -> Result<PathBuf> {
        let dir = self.run_dir(run_id)?;
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(EngineError::NotFound(format!("run {run_id}")))
        }
    }

    /// Idempotent per-run directory creation.
    pub fn create_run(&self, run_id: &str) -> Result<()> {
        fs::create_dir_all(self.run_dir(run_id)?)?;
        Ok(())
    }

    pub fn write_raw(&self, run_id: &str, batch: &[Value]) -> Result<()> {
        self.write_artifact(run_id, "raw.json", batch)
    }

    pub fn write_meta(&self, run_id: &str, meta: &RunMeta) -> Result<()> {
        self.write_artifact(run_id, "meta.json", meta)
    }

    pub fn write_normalized(&self, run_id: &str, events: &[NormalizedEvent]) -> Result<()> {
        self.write_artifact(run_id, "normalized.json", events)
    }

    pub fn write_incidents(&self, run_id: &str, incidents: &[Incident]) -> Result<()> {
        self.write_artifact(run_id, "incidents.json", incidents)
    }

    pub fn read_meta(&self, run_id: &str) -> Result<RunMeta> {
        let path = self.existing_run_dir(run_id)?.join("meta.json");
        if !path.exists() {
            return Err(EngineError::NotFound(format!("meta for run {run_id}")));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Normalized events for a run; an ingest that failed mid-flight may
    /// not have written them yet, which reads as empty.
    pub fn read_normalized(&self, run_id: &str) -> Result<Vec<NormalizedEvent>> {
        let path = self.existing_run_dir(run_id)?.join("normalized.json");
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn read_incidents(&self, run_id: &str) -> Result<Vec<Incident>> {
        let path = self.existing_run_dir(run_id)?.join("incidents.json");
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Run ids, newest first by their meta `created_at` (run ids are random
    /// hex, so lexical order carries no time meaning).
    pub fn list_runs(&self) -> Result<Vec<String>> {
        let mut runs: Vec<(Option<DateTime<Utc>>, String)> = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !run_id_regex().is_match(&name) {
                continue;
            }
            let created_at = self.read_meta(&name).ok().map(|m| m.created_at);
            runs.push((created_at, name));
        }

        runs.sort_by(|a, b| b.cmp(a));
        Ok(runs.into_iter().map(|(_, name)| name).collect())
    }

    fn write_artifact<T: Serialize + ?Sized>(&self, run_id: &str, file: &str, value: &T) -> Result<()> {
        let dir = self.run_dir(run_id)?;
        fs::create_dir_all(&dir)?;

        let path = dir.join(file);
        let tmp = dir.join(format!("{file}.tmp"));
        fs::write(&tmp, serde_json::to_string_pretty(value)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}
