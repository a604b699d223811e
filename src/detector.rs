//! Rule-based traffic anomaly detection
//!
//! Holds the mutable rule set and a sliding buffer of recent events.
//! Every incoming event is evaluated against all rules using one
//! immutable view of the window, so no rule can observe another rule's
//! side effects from the same pass. Matches become `Detection` records:
//! appended to a bounded log, persisted, and published.

use anyhow::Result;
use chrono::Duration;
use regex::Regex;
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::warn;

use crate::models::{Detection, MatchSpec, NewRule, Rule, TrafficEvent};
use crate::publish::Publisher;
use crate::storage::{Store, MAX_DETECTIONS};

/// A rule plus its pre-compiled path pattern.
///
/// Compilation happens once, when the rule enters the engine; a rule
/// with an unparsable pattern is poisoned and never matches, leaving the
/// rest of the rule set untouched.
struct CompiledRule {
    rule: Rule,
    path_regex: Option<Regex>,
    poisoned: bool,
}

impl CompiledRule {
    fn compile(rule: Rule) -> Self {
        let mut poisoned = false;
        let path_regex = match &rule.match_spec {
            MatchSpec::PathAndUniqueSources {
                path_pattern: Some(pattern),
                ..
            } => match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(
                        "rule {} has invalid path pattern {:?}, disabling it: {e}",
                        rule.id, pattern
                    );
                    poisoned = true;
                    None
                }
            },
            _ => None,
        };

        Self {
            rule,
            path_regex,
            poisoned,
        }
    }
}

/// Immutable per-pass view of the event window.
struct WindowView<'a> {
    rps: f64,
    unique_sources: usize,
    window_secs: f64,
    events: &'a VecDeque<TrafficEvent>,
}

/// Classifies traffic events against the active rule set.
pub struct RuleEngine {
    window_secs: i64,
    store: Arc<dyn Store>,
    publisher: Publisher,
    rules: Vec<CompiledRule>,
    events: VecDeque<TrafficEvent>,
    detections: VecDeque<Detection>,
}

impl RuleEngine {
    /// Create an engine, restoring rules and the detection log from the
    /// store. Store errors degrade to empty collections.
    pub fn new(window_secs: u64, store: Arc<dyn Store>, publisher: Publisher) -> Self {
        let rules = store
            .load_rules()
            .unwrap_or_else(|e| {
                warn!("failed to load rules, starting with none: {e:#}");
                Vec::new()
            })
            .into_iter()
            .map(CompiledRule::compile)
            .collect();

        let mut detections: VecDeque<Detection> = store
            .load_detections()
            .unwrap_or_else(|e| {
                warn!("failed to load detection log, starting empty: {e:#}");
                Vec::new()
            })
            .into();
        while detections.len() > MAX_DETECTIONS {
            detections.pop_front();
        }

        Self {
            window_secs: window_secs.max(1) as i64,
            store,
            publisher,
            rules,
            events: VecDeque::new(),
            detections,
        }
    }

    /// Add a rule, filling defaults and persisting the rule set.
    /// Persistence failures are returned to the caller; the rule is kept
    /// in memory either way.
    pub fn add_rule(&mut self, spec: NewRule) -> Result<Rule> {
        let rule = spec.into_rule();
        self.rules.push(CompiledRule::compile(rule.clone()));
        self.persist_rules()?;
        Ok(rule)
    }

    /// Remove a rule by id. Removing an unknown id is a no-op.
    pub fn remove_rule(&mut self, id: &str) -> Result<bool> {
        let before = self.rules.len();
        self.rules.retain(|c| c.rule.id != id);
        let removed = self.rules.len() != before;
        if removed {
            self.persist_rules()?;
        }
        Ok(removed)
    }

    pub fn list_rules(&self) -> Vec<Rule> {
        self.rules.iter().map(|c| c.rule.clone()).collect()
    }

    /// Most recent detections, newest first.
    pub fn list_detections(&self, limit: usize) -> Vec<Detection> {
        self.detections.iter().rev().take(limit).cloned().collect()
    }

    /// Ingest one event: buffer it, prune the window, and evaluate every
    /// rule against the same window snapshot with this event as latest.
    pub fn record_event(&mut self, event: TrafficEvent) {
        let cutoff = event.ts - Duration::seconds(self.window_secs);
        self.events.push_back(event.clone());
        while let Some(front) = self.events.front() {
            if front.ts < cutoff {
                self.events.pop_front();
            } else {
                break;
            }
        }

        let view = WindowView {
            rps: self.events.len() as f64 / self.window_secs as f64,
            unique_sources: self
                .events
                .iter()
                .map(|e| e.source.as_str())
                .collect::<HashSet<_>>()
                .len(),
            window_secs: self.window_secs as f64,
            events: &self.events,
        };

        let mut matched = Vec::new();
        for compiled in &self.rules {
            if let Some(details) = evaluate(compiled, &view, &event) {
                matched.push(Detection {
                    ts: event.ts,
                    rule_id: compiled.rule.id.clone(),
                    name: compiled.rule.name.clone(),
                    technique: compiled.rule.technique.clone(),
                    source: event.source.clone(),
                    details,
                });
            }
        }

        for detection in matched {
            self.record_detection(detection);
        }
    }

    /// Append a detection, trim the log, persist best-effort, publish.
    fn record_detection(&mut self, detection: Detection) {
        self.detections.push_back(detection.clone());
        while self.detections.len() > MAX_DETECTIONS {
            self.detections.pop_front();
        }

        let log: Vec<Detection> = self.detections.iter().cloned().collect();
        if let Err(e) = self.store.save_detections(&log) {
            warn!("failed to persist detection log: {e:#}");
        }

        self.publisher.publish_detection(detection.clone());

        warn!(
            "detection: {} ({}) from {}",
            detection.name, detection.technique, detection.source
        );
    }

    fn persist_rules(&self) -> Result<()> {
        let rules: Vec<Rule> = self.rules.iter().map(|c| c.rule.clone()).collect();
        self.store.save_rules(&rules)
    }
}

/// Evaluate one rule against the window view and the latest event.
/// Returns the detection details on a match, `None` otherwise.
fn evaluate(
    compiled: &CompiledRule,
    view: &WindowView<'_>,
    latest: &TrafficEvent,
) -> Option<serde_json::Value> {
    if compiled.poisoned {
        return None;
    }

    let mut details = serde_json::Map::new();
    details.insert("rps".to_string(), json!(view.rps));
    details.insert("unique_sources".to_string(), json!(view.unique_sources));
    details.insert(
        "latest".to_string(),
        serde_json::to_value(latest).unwrap_or(serde_json::Value::Null),
    );

    let matched = match &compiled.rule.match_spec {
        MatchSpec::RpsAndPort { ports, min_rps } => {
            if ports.is_empty() {
                view.rps >= *min_rps
            } else {
                let count = view
                    .events
                    .iter()
                    .filter(|e| e.port.map_or(false, |p| ports.contains(&p)))
                    .count();
                let port_rps = count as f64 / view.window_secs;
                details.insert("port_rps".to_string(), json!(port_rps));
                port_rps >= *min_rps
            }
        }
        MatchSpec::PathAndUniqueSources {
            min_rps,
            min_unique_sources,
            ..
        } => {
            let filtered: Vec<&TrafficEvent> = view
                .events
                .iter()
                .filter(|e| {
                    compiled
                        .path_regex
                        .as_ref()
                        .map_or(true, |re| re.is_match(&e.path))
                })
                .collect();

            let local_rps = filtered.len() as f64 / view.window_secs;
            let local_unique = filtered
                .iter()
                .map(|e| e.source.as_str())
                .collect::<HashSet<_>>()
                .len();

            details.insert("local_rps".to_string(), json!(local_rps));
            details.insert("local_unique_sources".to_string(), json!(local_unique));

            local_rps >= *min_rps && local_unique >= *min_unique_sources
        }
        MatchSpec::HeaderContains { key, value } => latest
            .headers
            .get(key)
            .map_or(false, |v| v.contains(value.as_str())),
        MatchSpec::PortOnly { port, ports } => latest
            .port
            .map_or(false, |p| *port == Some(p) || ports.contains(&p)),
        // Extension point for external matchers; the built-in evaluator
        // never matches it.
        MatchSpec::Custom => false,
        MatchSpec::Unknown => false,
    };

    matched.then(|| serde_json::Value::Object(details))
}
