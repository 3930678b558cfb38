//! Field-alias mapping profiles
//!
//! Loads per-source alias profiles from `config/field_mappings.yaml`. Profile
//! names correspond to the `source` value of incoming events; unknown sources
//! fall back to the `_default` profile, which must exist and cover every
//! canonical field. Validation runs at startup and is fatal on error.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{EngineError, Result};
use crate::models::EventResult;

/// Canonical fields every `_default` profile must cover.
pub const CANONICAL_FIELDS: &[&str] = &[
    "timestamp",
    "source_ip",
    "username",
    "event_type",
    "result",
    "reason",
    "user_agent",
    "source",
];

pub const DEFAULT_PROFILE: &str = "_default";

/// One source profile: ordered alias lists per canonical field, plus the
/// reserved `_reject_event_types` and `_result_map` keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    /// Event types this source emits that are not security-relevant
    /// (e.g. Windows 4672/4634).
    #[serde(
        default,
        rename = "_reject_event_types",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub reject_event_types: Vec<String>,

    /// Raw outcome string -> `success` | `failure` | `other`.
    #[serde(
        default,
        rename = "_result_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub result_map: BTreeMap<String, String>,

    /// Canonical field -> ordered raw-field aliases. An alias may be a
    /// dot-path (`detail.ip`) for nested lookup.
    #[serde(flatten)]
    pub aliases: BTreeMap<String, Vec<String>>,
}

/// The full mapping file, keyed by source profile name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingSet {
    #[serde(flatten)]
    pub profiles: BTreeMap<String, Profile>,
}

impl MappingSet {
    /// Parse the mapping file. Errors surface as `ConfigInvalid`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::ConfigInvalid(vec![format!(
                "cannot read mapping file {}: {e}",
                path.display()
            )])
        })?;
        let set: MappingSet = serde_yaml::from_str(&content).map_err(|e| {
            EngineError::ConfigInvalid(vec![format!(
                "cannot parse mapping file {}: {e}",
                path.display()
            )])
        })?;
        Ok(set)
    }

    /// Load and validate; the boot path, fatal on any error.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self> {
        let set = Self::load(&path)?;
        let errors = set.validate();
        if !errors.is_empty() {
            return Err(EngineError::ConfigInvalid(errors));
        }
        info!(
            profiles = set.profiles.len(),
            "loaded field mapping profiles from {}",
            path.as_ref().display()
        );
        Ok(set)
    }

    /// Validate the loaded profiles. Returns a list of error strings.
    ///
    /// Rules: `_default` must exist and carry a non-empty alias list for
    /// every canonical field; no profile may define an empty alias list;
    /// `_result_map` values must be one of the result enumeration.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let default = match self.profiles.get(DEFAULT_PROFILE) {
            Some(profile) => profile,
            None => {
                errors.push(format!("missing required '{DEFAULT_PROFILE}' profile"));
                return errors;
            }
        };

        for field in CANONICAL_FIELDS {
            match default.aliases.get(*field) {
                Some(aliases) if !aliases.is_empty() => {}
                Some(_) => errors.push(format!(
                    "{DEFAULT_PROFILE} profile has an empty alias list for field '{field}'"
                )),
                None => errors.push(format!(
                    "{DEFAULT_PROFILE} profile is missing aliases for required field '{field}'"
                )),
            }
        }

        for (name, profile) in &self.profiles {
            for (field, aliases) in &profile.aliases {
                if aliases.is_empty() {
                    errors.push(format!(
                        "profile '{name}': field '{field}' has an empty alias list"
                    ));
                }
            }
            for (raw, mapped) in &profile.result_map {
                if !matches!(mapped.as_str(), "success" | "failure" | "other") {
                    errors.push(format!(
                        "profile '{name}': _result_map entry '{raw}' maps to '{mapped}', \
                         expected success|failure|other"
                    ));
                }
            }
        }

        errors
    }

    /// Resolver for a given source, falling back to `_default` per field.
    pub fn resolver(&self, source: Option<&str>) -> FieldResolver<'_> {
        FieldResolver {
            profile: source.and_then(|s| self.profiles.get(s)),
            default: self.profiles.get(DEFAULT_PROFILE),
        }
    }
}

/// Resolves raw-event fields against one profile with `_default` fallback.
#[derive(Debug, Clone, Copy)]
pub struct FieldResolver<'a> {
    profile: Option<&'a Profile>,
    default: Option<&'a Profile>,
}

impl<'a> FieldResolver<'a> {
    fn alias_list(&self, field: &str) -> &'a [String] {
        if let Some(aliases) = self.profile.and_then(|p| p.aliases.get(field)) {
            if !aliases.is_empty() {
                return aliases;
            }
        }
        self.default
            .and_then(|p| p.aliases.get(field))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Walk the field's alias list in declaration order; the first alias
    /// present in the raw event (including via dot-path) wins.
    pub fn resolve_value<'v>(&self, raw: &'v Map<String, Value>, field: &str) -> Option<&'v Value> {
        for alias in self.alias_list(field) {
            if let Some(value) = lookup(raw, alias) {
                if !value.is_null() {
                    return Some(value);
                }
            }
        }
        None
    }

    /// Resolve a field to a trimmed, non-empty string.
    pub fn resolve_str(&self, raw: &Map<String, Value>, field: &str) -> Option<String> {
        self.resolve_value(raw, field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Whether this source rejects the (already lower-cased) event type.
    pub fn rejects(&self, event_type: &str) -> bool {
        let own = self.profile.map(|p| p.reject_event_types.as_slice());
        let list = match own {
            Some(list) if !list.is_empty() => list,
            _ => self
                .default
                .map(|p| p.reject_event_types.as_slice())
                .unwrap_or(&[]),
        };
        list.iter().any(|r| r.eq_ignore_ascii_case(event_type))
    }

    /// Translate a raw outcome string through the profile's result map.
    /// `success` and `failure` pass through; anything unmapped is `Other`.
    pub fn map_result(&self, raw: &str) -> EventResult {
        let lowered = raw.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "success" => return EventResult::Success,
            "failure" => return EventResult::Failure,
            _ => {}
        }

        let mapped = self
            .profile
            .and_then(|p| p.result_map.get(&lowered))
            .or_else(|| self.default.and_then(|p| p.result_map.get(&lowered)));

        match mapped.map(String::as_str) {
            Some("success") => EventResult::Success,
            Some("failure") => EventResult::Failure,
            _ => EventResult::Other,
        }
    }
}

/// Exact key match wins over dot-path traversal, so raw keys containing
/// literal dots still resolve.
fn lookup<'v>(raw: &'v Map<String, Value>, alias: &str) -> Option<&'v Value> {
    if let Some(value) = raw.get(alias) {
        return Some(value);
    }
    if !alias.contains('.') {
        return None;
    }

    let mut current: &Value = raw.get(alias.split('.').next()?)?;
    for part in alias.split('.').skip(1) {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}
