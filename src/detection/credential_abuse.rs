//! Credential abuse detection (MITRE T1110.003, password spraying)
//!
//! Flags one source IP failing against many distinct accounts inside the
//! sliding window.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::models::{Explanation, Incident, IncidentType, NormalizedEvent, Severity, Subject};

use super::{build_evidence, build_incident, cred_abuse_seed, incident_id, DetectionConfig};

pub const CONFIDENCE: u8 = 90;

/// Severity graded on the final distinct-account count.
pub fn grade(distinct_users: u64) -> Severity {
    if distinct_users > 15 {
        Severity::Critical
    } else {
        Severity::High
    }
}

struct Episode {
    /// Failure count when both thresholds were first crossed.
    observed: u64,
    events: Vec<NormalizedEvent>,
    opened_seq: usize,
}

#[derive(Default)]
struct KeyState {
    window: VecDeque<NormalizedEvent>,
    episode: Option<Episode>,
}

impl KeyState {
    fn distinct_users(&self) -> usize {
        self.window
            .iter()
            .filter_map(|e| e.username.as_deref())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

/// Per-source_ip sliding windows for one detection pass. Only failures
/// carrying both a source IP and a username participate.
pub struct CredentialAbuseRule<'a> {
    config: &'a DetectionConfig,
    states: HashMap<String, KeyState>,
    next_seq: usize,
}

impl<'a> CredentialAbuseRule<'a> {
    pub fn new(config: &'a DetectionConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn observe(&mut self, event: &NormalizedEvent, out: &mut Vec<Incident>) {
        let (Some(ip), Some(_)) = (&event.source_ip, &event.username) else {
            return;
        };

        let cutoff = event.timestamp - self.config.window();
        let state = self.states.entry(ip.clone()).or_default();

        while state.window.front().is_some_and(|f| f.timestamp < cutoff) {
            state.window.pop_front();
        }
        if state.window.is_empty() {
            if let Some(episode) = state.episode.take() {
                out.push(close_episode(self.config, ip, episode));
            }
        }
        state.window.push_back(event.clone());

        let triggered = state.window.len() >= self.config.cred_abuse_failure_threshold
            && state.distinct_users() >= self.config.cred_abuse_distinct_user_threshold;
        match &mut state.episode {
            Some(episode) => episode.events.push(event.clone()),
            None if triggered => {
                state.episode = Some(Episode {
                    observed: state.window.len() as u64,
                    events: state.window.iter().cloned().collect(),
                    opened_seq: self.next_seq,
                });
                self.next_seq += 1;
            }
            None => {}
        }
    }

    pub fn finish(&mut self, out: &mut Vec<Incident>) {
        let mut open: Vec<_> = self
            .states
            .drain()
            .filter_map(|(ip, state)| {
                state
                    .episode
                    .map(|episode| (episode.opened_seq, ip, episode))
            })
            .collect();
        open.sort_by_key(|(seq, _, _)| *seq);

        for (_, ip, episode) in open {
            out.push(close_episode(self.config, &ip, episode));
        }
    }
}

fn close_episode(config: &DetectionConfig, ip: &str, episode: Episode) -> Incident {
    let failures = episode.events.len() as u64;
    let distinct_users = episode
        .events
        .iter()
        .filter_map(|e| e.username.as_deref())
        .collect::<BTreeSet<_>>()
        .len() as u64;

    let mut evidence = build_evidence(ip, episode.events);
    evidence.counts.insert("failures".into(), failures);
    evidence.counts.insert("distinct_users".into(), distinct_users);

    let id = incident_id(&cred_abuse_seed(
        ip,
        &evidence.window_start,
        &evidence.window_end,
        failures,
        distinct_users,
    ));

    let summary = format!(
        "Potential Credential Abuse detected (MITRE T1110.003 - Password Spraying): \
         {failures} failed login attempts across {distinct_users} distinct accounts \
         from source IP {ip} during {}\u{2013}{}. \
         This pattern is indicative of compromised credentials or unauthorized access attempts.",
        crate::models::ts::format(&evidence.window_start),
        crate::models::ts::format(&evidence.window_end),
    );

    build_incident(
        id,
        IncidentType::CredentialAbuse,
        grade(distinct_users),
        CONFIDENCE,
        Subject {
            source_ip: ip.to_string(),
            username: None,
        },
        evidence,
        summary,
        Explanation {
            threshold: config.cred_abuse_failure_threshold as u64,
            observed: episode.observed,
            window: config.window_label(),
            trigger_field: "source_ip".into(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::super::test_support::failure;
    use super::super::Detector;
    use super::*;
    use crate::models::ts;

    fn detect(events: &[NormalizedEvent]) -> Vec<Incident> {
        Detector::new(DetectionConfig::default()).detect(events)
    }

    fn spray(ip: &str, count: usize, users: usize) -> Vec<NormalizedEvent> {
        (0..count)
            .map(|i| {
                failure(
                    &format!("2025-12-21T05:00:{:02}Z", i * 5),
                    ip,
                    &format!("user{}", i % users),
                )
            })
            .collect()
    }

    #[test]
    fn test_spray_detected() {
        // Ten failures over six distinct accounts within the window.
        let events = spray("198.51.100.4", 10, 6);
        let incidents = detect(&events);
        let spray: Vec<_> = incidents
            .iter()
            .filter(|i| i.incident_type == IncidentType::CredentialAbuse)
            .collect();
        assert_eq!(spray.len(), 1);

        let inc = spray[0];
        assert_eq!(inc.severity, Severity::High);
        assert_eq!(inc.confidence, 90);
        assert_eq!(inc.evidence.counts["failures"], 10);
        assert_eq!(inc.evidence.counts["distinct_users"], 6);
        assert_eq!(inc.mitre.technique, "T1110.003");
        assert_eq!(inc.subject.source_ip, "198.51.100.4");
        assert!(inc.subject.username.is_none());
        // The IP plus every sprayed account.
        assert_eq!(inc.evidence.affected_entities.len(), 7);
        assert!(inc
            .evidence
            .affected_entities
            .contains(&"198.51.100.4".to_string()));

        let recomputed = incident_id(&cred_abuse_seed(
            "198.51.100.4",
            &inc.evidence.window_start,
            &inc.evidence.window_end,
            10,
            6,
        ));
        assert_eq!(inc.incident_id, recomputed);
    }

    #[test]
    fn test_distinct_users_below_threshold() {
        // Plenty of failures but only four accounts.
        let events = spray("198.51.100.4", 10, 4);
        assert!(detect(&events)
            .iter()
            .all(|i| i.incident_type != IncidentType::CredentialAbuse));
    }

    #[test]
    fn test_failures_below_threshold() {
        // Seven failures over seven accounts: distinct users pass, total
        // failures stay under the floor.
        let events = spray("198.51.100.4", 7, 7);
        assert!(detect(&events).is_empty());
    }

    #[test]
    fn test_critical_above_fifteen_accounts() {
        let events = spray("198.51.100.4", 20, 18);
        let incidents = detect(&events);
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].severity, Severity::Critical);
        assert_eq!(incidents[0].confidence, 90);
        assert_eq!(incidents[0].evidence.counts["distinct_users"], 18);
    }

    #[test]
    fn test_explanation_records_trigger() {
        let events = spray("198.51.100.4", 12, 6);
        let incidents = detect(&events);
        let inc = incidents
            .iter()
            .find(|i| i.incident_type == IncidentType::CredentialAbuse)
            .unwrap();
        assert_eq!(inc.explanation.threshold, 8);
        assert_eq!(inc.explanation.observed, 8);
        assert_eq!(inc.explanation.trigger_field, "source_ip");
    }

    #[test]
    fn test_window_bounds_cover_evidence() {
        let events = spray("198.51.100.4", 10, 6);
        let incidents = detect(&events);
        let inc = &incidents[0];
        assert_eq!(ts::format(&inc.evidence.window_start), "2025-12-21T05:00:00Z");
        assert_eq!(ts::format(&inc.evidence.window_end), "2025-12-21T05:00:45Z");
        assert_eq!(inc.first_seen, inc.evidence.window_start);
        assert_eq!(inc.last_seen, inc.evidence.window_end);
    }

    #[test]
    fn test_ips_are_independent() {
        let mut events = spray("198.51.100.4", 5, 5);
        events.extend(spray("198.51.100.5", 5, 5));
        events.sort_by_key(|e| e.timestamp);
        // Five failures per IP: neither reaches the eight-failure floor.
        assert!(detect(&events).is_empty());
    }
}
