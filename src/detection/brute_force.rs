//! Brute force detection (MITRE T1110)
//!
//! Flags repeated authentication failures from one (source IP, username)
//! pair inside the sliding window.

use std::collections::{HashMap, VecDeque};

use crate::models::{Explanation, Incident, IncidentType, NormalizedEvent, Severity, Subject};

use super::{brute_force_seed, build_evidence, build_incident, incident_id, DetectionConfig};

/// Severity & confidence graded on the final failure count.
pub fn grade(failures: u64) -> (Severity, u8) {
    if failures >= 20 {
        (Severity::High, 95)
    } else if failures >= 10 {
        (Severity::Medium, 85)
    } else {
        (Severity::Low, 70)
    }
}

struct Episode {
    /// Failure count when the window first crossed the threshold.
    observed: u64,
    events: Vec<NormalizedEvent>,
    opened_seq: usize,
}

#[derive(Default)]
struct KeyState {
    window: VecDeque<NormalizedEvent>,
    episode: Option<Episode>,
}

/// Per-(source_ip, username) sliding windows for one detection pass.
pub struct BruteForceRule<'a> {
    config: &'a DetectionConfig,
    states: HashMap<(String, String), KeyState>,
    next_seq: usize,
}

impl<'a> BruteForceRule<'a> {
    pub fn new(config: &'a DetectionConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Feed one failure event. Emits an incident when the key's previous
    /// episode fully drains out of the window.
    pub fn observe(&mut self, event: &NormalizedEvent, out: &mut Vec<Incident>) {
        let (Some(ip), Some(username)) = (&event.source_ip, &event.username) else {
            return;
        };

        let cutoff = event.timestamp - self.config.window();
        let state = self
            .states
            .entry((ip.clone(), username.clone()))
            .or_default();

        while state.window.front().is_some_and(|f| f.timestamp < cutoff) {
            state.window.pop_front();
        }
        if state.window.is_empty() {
            if let Some(episode) = state.episode.take() {
                out.push(close_episode(self.config, ip, username, episode));
            }
        }
        state.window.push_back(event.clone());

        let triggered = state.window.len() >= self.config.brute_force_failure_threshold;
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

    /// Close every episode still open at end of batch, in the order the
    /// episodes were opened.
    pub fn finish(&mut self, out: &mut Vec<Incident>) {
        let mut open: Vec<_> = self
            .states
            .drain()
            .filter_map(|((ip, username), state)| {
                state
                    .episode
                    .map(|episode| (episode.opened_seq, ip, username, episode))
            })
            .collect();
        open.sort_by_key(|(seq, _, _, _)| *seq);

        for (_, ip, username, episode) in open {
            out.push(close_episode(self.config, &ip, &username, episode));
        }
    }
}

fn close_episode(
    config: &DetectionConfig,
    ip: &str,
    username: &str,
    episode: Episode,
) -> Incident {
    let failures = episode.events.len() as u64;
    let mut evidence = build_evidence(ip, episode.events);
    evidence.counts.insert("failures".into(), failures);

    let (severity, confidence) = grade(failures);
    let id = incident_id(&brute_force_seed(
        ip,
        username,
        &evidence.window_start,
        &evidence.window_end,
        failures,
    ));

    let summary = format!(
        "Brute-force authentication activity detected (MITRE T1110): \
         {failures} failed login attempts against user '{username}' from source IP {ip} \
         during {}\u{2013}{}, exceeding brute-force threshold.",
        crate::models::ts::format(&evidence.window_start),
        crate::models::ts::format(&evidence.window_end),
    );

    build_incident(
        id,
        IncidentType::BruteForce,
        severity,
        confidence,
        Subject {
            source_ip: ip.to_string(),
            username: Some(username.to_string()),
        },
        evidence,
        summary,
        Explanation {
            threshold: config.brute_force_failure_threshold as u64,
            observed: episode.observed,
            window: config.window_label(),
            trigger_field: "username".into(),
        },
    )
}
