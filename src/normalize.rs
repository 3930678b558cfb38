//! Event normalization
//!
//! Projects raw, source-tagged login events into the canonical schema:
//! alias resolution, timestamp coercion, telemetry rejection, result
//! translation, validation, and a stable chronological sort. Individual
//! event failures are collected and reported; they never fail the batch.

use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::mapping::MappingSet;
use crate::models::{ts, NormalizedEvent};

/// Event types that are operational telemetry, never security signal.
pub const TELEMETRY_EVENT_TYPES: &[&str] =
    &["heartbeat", "health_check", "ping", "keepalive", "metrics"];

/// Why a raw event did not survive normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    MissingRequired(&'static str),
    TimestampParse,
    Telemetry,
    Schema,
}

impl RejectReason {
    /// Label used for the rejection counter breakdown.
    pub fn label(&self) -> String {
        match self {
            RejectReason::MissingRequired(field) => format!("missing_required:{field}"),
            RejectReason::TimestampParse => "timestamp_parse".into(),
            RejectReason::Telemetry => "telemetry".into(),
            RejectReason::Schema => "schema".into(),
        }
    }
}

/// A raw event that was dropped, with its position in the input batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEvent {
    pub index: usize,
    pub reason: RejectReason,
}

/// Survivors plus the collected per-event failures.
#[derive(Debug, Default)]
pub struct NormalizationOutcome {
    /// Kept events, sorted by `(timestamp, original index)`.
    pub events: Vec<NormalizedEvent>,
    pub rejected: Vec<RejectedEvent>,
}

pub struct Normalizer<'a> {
    mappings: &'a MappingSet,
}

impl<'a> Normalizer<'a> {
    pub fn new(mappings: &'a MappingSet) -> Self {
        Self { mappings }
    }

    /// Normalize a raw batch. `source_hint` selects the profile for the
    /// whole batch; without it, each event's own `source` alias decides,
    /// falling back to `_default`.
    pub fn normalize(&self, batch: &[Value], source_hint: Option<&str>) -> NormalizationOutcome {
        let mut kept: Vec<(DateTime<Utc>, usize, NormalizedEvent)> = Vec::new();
        let mut rejected = Vec::new();

        for (index, item) in batch.iter().enumerate() {
            let raw = match item.as_object() {
                Some(obj) => obj,
                None => {
                    rejected.push(RejectedEvent {
                        index,
                        reason: RejectReason::Schema,
                    });
                    continue;
                }
            };

            match self.normalize_one(raw, source_hint) {
                Ok(event) => kept.push((event.timestamp, index, event)),
                Err(reason) => rejected.push(RejectedEvent { index, reason }),
            }
        }

        kept.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        NormalizationOutcome {
            events: kept.into_iter().map(|(_, _, event)| event).collect(),
            rejected,
        }
    }

    fn normalize_one(
        &self,
        raw: &Map<String, Value>,
        source_hint: Option<&str>,
    ) -> std::result::Result<NormalizedEvent, RejectReason> {
        let inferred_source = source_hint.map(str::to_string).or_else(|| {
            self.mappings
                .resolver(None)
                .resolve_str(raw, "source")
        });
        let resolver = self.mappings.resolver(inferred_source.as_deref());

        let event_type = resolver
            .resolve_value(raw, "event_type")
            .and_then(identifier)
            .ok_or(RejectReason::MissingRequired("event_type"))?
            .to_lowercase();
        if event_type.is_empty() {
            return Err(RejectReason::Schema);
        }

        if TELEMETRY_EVENT_TYPES.contains(&event_type.as_str()) || resolver.rejects(&event_type) {
            return Err(RejectReason::Telemetry);
        }

        let ts_value = resolver
            .resolve_value(raw, "timestamp")
            .ok_or(RejectReason::MissingRequired("timestamp"))?;
        let timestamp = coerce_timestamp(ts_value).ok_or(RejectReason::TimestampParse)?;

        let result_raw = resolver
            .resolve_str(raw, "result")
            .ok_or(RejectReason::MissingRequired("result"))?;
        let result = resolver.map_result(&result_raw);

        Ok(NormalizedEvent {
            timestamp,
            event_type,
            result,
            source_ip: resolver.resolve_str(raw, "source_ip"),
            username: resolver.resolve_str(raw, "username"),
            reason: resolver.resolve_str(raw, "reason"),
            user_agent: resolver.resolve_str(raw, "user_agent"),
            source: resolver.resolve_str(raw, "source").or(inferred_source),
        })
    }
}

/// Accept string or numeric identifiers (Windows event ids are numbers).
fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Coerce epoch seconds, epoch milliseconds (magnitude > 1e11), or any
/// ISO-8601 string into a second-precision UTC instant.
pub fn coerce_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let dt = match value {
        Value::Number(n) => {
            let raw = n.as_f64()?;
            if !raw.is_finite() {
                return None;
            }
            let millis = if raw.abs() > 1e11 { raw } else { raw * 1000.0 };
            Utc.timestamp_millis_opt(millis.round() as i64).single()?
        }
        Value::String(s) => ts::parse(s.trim())?,
        _ => return None,
    };
    Some(dt.trunc_subsecs(0))
}
