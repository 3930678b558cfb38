//! Entity risk engine
//!
//! Weighted, exponentially decaying per-entity scores derived from the
//! incident registry. Stored scores are the value at the last write; decay
//! is computed lazily at read time with a 24-hour half-life. A weight is
//! applied at most once per (incident_id, entity) pair, so merges of the
//! same identity never compound.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::models::{Incident, IncidentType};

pub const DECAY_HALF_LIFE_HOURS: f64 = 24.0;
pub const BRUTE_FORCE_WEIGHT: f64 = 10.0;
pub const CREDENTIAL_ABUSE_WEIGHT: f64 = 25.0;

pub fn weight_for(incident_type: IncidentType) -> f64 {
    match incident_type {
        IncidentType::BruteForce => BRUTE_FORCE_WEIGHT,
        IncidentType::CredentialAbuse => CREDENTIAL_ABUSE_WEIGHT,
    }
}

/// What a risk entity is: an account or an originating address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Username,
    SourceIp,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Username => "username",
            EntityKind::SourceIp => "source_ip",
        }
    }
}

#[derive(Debug, Clone)]
struct RiskState {
    score: f64,
    last_updated: DateTime<Utc>,
    /// Incident ids already folded into the score.
    contributions: BTreeSet<String>,
}

/// One row of the entity-risk view.
#[derive(Debug, Clone, Serialize)]
pub struct EntityRiskRow {
    pub entity_kind: EntityKind,
    pub entity_value: String,
    /// Decayed to the query instant, rounded to two decimals.
    pub score: f64,
    pub total_incidents: u64,
    pub open_incidents: u64,
    pub highest_confidence: u8,
    #[serde(with = "ts_opt")]
    pub last_seen: Option<DateTime<Utc>>,
}

mod ts_opt {
    use chrono::{DateTime, Utc};
    use serde::Serializer;

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => ser.serialize_str(&crate::models::ts::format(dt)),
            None => ser.serialize_none(),
        }
    }
}

#[derive(Debug)]
pub struct EntityRiskEngine {
    states: Mutex<BTreeMap<(EntityKind, String), RiskState>>,
}

impl Default for EntityRiskEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityRiskEngine {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(BTreeMap::new()),
        }
    }

    /// Fold one (post-merge) incident into the scores. The write instant is
    /// the incident's `last_seen`.
    pub fn record_incident(&self, incident: &Incident) {
        let weight = weight_for(incident.incident_type);
        let at = incident.last_seen;
        let mut states = self.states.lock();

        for (kind, value) in collect_entities(incident) {
            let state = states.entry((kind, value)).or_insert_with(|| RiskState {
                score: 0.0,
                last_updated: at,
                contributions: BTreeSet::new(),
            });
            if !state.contributions.insert(incident.incident_id.clone()) {
                continue;
            }
            if at > state.last_updated {
                state.score = decayed(state.score, state.last_updated, at);
                state.last_updated = at;
            }
            state.score += weight;
        }
    }

    /// Reset and replay the registry in `created_at` order, yielding
    /// deterministic startup state.
    pub fn rebuild(&self, incidents: &[Incident]) {
        self.states.lock().clear();
        let mut ordered: Vec<&Incident> = incidents.iter().collect();
        ordered.sort_by(|a, b| {
            (a.created_at, &a.incident_id).cmp(&(b.created_at, &b.incident_id))
        });
        for incident in ordered {
            self.record_incident(incident);
        }
    }

    /// Entity rows combining lazily decayed scores with aggregates from the
    /// registry snapshot, sorted by
    /// `(score desc, open_incidents desc, last_seen desc)`.
    pub fn rows(&self, incidents: &[Incident]) -> Vec<EntityRiskRow> {
        self.rows_at(incidents, Utc::now())
    }

    pub fn rows_at(&self, incidents: &[Incident], now: DateTime<Utc>) -> Vec<EntityRiskRow> {
        #[derive(Default)]
        struct Aggregate {
            total: u64,
            open: u64,
            highest_confidence: u8,
            last_seen: Option<DateTime<Utc>>,
        }

        let mut aggregates: BTreeMap<(EntityKind, String), Aggregate> = BTreeMap::new();
        for incident in incidents {
            for key in collect_entities(incident) {
                let agg = aggregates.entry(key).or_default();
                agg.total += 1;
                if incident.status.is_open() {
                    agg.open += 1;
                }
                agg.highest_confidence = agg.highest_confidence.max(incident.confidence);
                if agg.last_seen.map_or(true, |seen| incident.last_seen >= seen) {
                    agg.last_seen = Some(incident.last_seen);
                }
            }
        }

        let states = self.states.lock();
        let mut keys: BTreeSet<(EntityKind, String)> = aggregates.keys().cloned().collect();
        keys.extend(states.keys().cloned());

        let mut rows: Vec<EntityRiskRow> = keys
            .into_iter()
            .map(|key| {
                let observed = states
                    .get(&key)
                    .map(|s| decayed(s.score, s.last_updated, now).max(0.0))
                    .unwrap_or(0.0);
                let agg = aggregates.remove(&key).unwrap_or_default();
                EntityRiskRow {
                    entity_kind: key.0,
                    entity_value: key.1,
                    score: (observed * 100.0).round() / 100.0,
                    total_incidents: agg.total,
                    open_incidents: agg.open,
                    highest_confidence: agg.highest_confidence,
                    last_seen: agg.last_seen,
                }
            })
            .collect();

        rows.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.open_incidents.cmp(&a.open_incidents))
                .then(b.last_seen.cmp(&a.last_seen))
                .then(a.entity_kind.cmp(&b.entity_kind))
                .then(a.entity_value.cmp(&b.entity_value))
        });
        rows
    }

    /// Stored (undecayed) score, for tests and audits.
    pub fn stored_score(&self, kind: EntityKind, value: &str) -> Option<f64> {
        self.states
            .lock()
            .get(&(kind, value.to_string()))
            .map(|s| s.score)
    }
}

fn decayed(score: f64, last_updated: DateTime<Utc>, at: DateTime<Utc>) -> f64 {
    if at <= last_updated {
        return score;
    }
    let elapsed_hours = (at - last_updated).num_milliseconds() as f64 / 3_600_000.0;
    score * (-std::f64::consts::LN_2 * elapsed_hours / DECAY_HALF_LIFE_HOURS).exp()
}

/// Entities touched by an incident: the subject plus every affected entity,
/// classified by whether the value parses as an IP address.
fn collect_entities(incident: &Incident) -> BTreeSet<(EntityKind, String)> {
    let mut entities = BTreeSet::new();
    entities.insert((EntityKind::SourceIp, incident.subject.source_ip.clone()));
    if let Some(username) = &incident.subject.username {
        entities.insert((EntityKind::Username, username.clone()));
    }
    for value in &incident.evidence.affected_entities {
        let kind = if value.parse::<IpAddr>().is_ok() {
            EntityKind::SourceIp
        } else {
            EntityKind::Username
        };
        entities.insert((kind, value.clone()));
    }
    entities
}
