use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single observed request, as reported by the ingestion side.
///
/// Events are ephemeral: they live in the detector's window buffer until
/// they age out and are never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficEvent {
    pub ts: DateTime<Utc>,
    /// Source identifier, usually the client IP address
    pub source: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub size: Option<u64>,
}

impl TrafficEvent {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            source: source.into(),
            method: String::new(),
            path: String::new(),
            headers: HashMap::new(),
            port: None,
            size: None,
        }
    }

    pub fn at(mut self, ts: DateTime<Utc>) -> Self {
        self.ts = ts;
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// Match condition for a detection rule.
///
/// A closed set of variants; specs with an unrecognized `type` tag
/// deserialize to `Unknown` and never match, so a typo in a stored rule
/// cannot turn it into a match-everything rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchSpec {
    /// Overall request rate, optionally restricted to a set of ports
    RpsAndPort {
        #[serde(default)]
        ports: Vec<u16>,
        #[serde(default)]
        min_rps: f64,
    },
    /// Rate and distinct-source count among events matching a path pattern
    PathAndUniqueSources {
        #[serde(default)]
        path_pattern: Option<String>,
        #[serde(default)]
        min_rps: f64,
        #[serde(default)]
        min_unique_sources: usize,
    },
    /// Latest event carries a header whose value contains a substring
    HeaderContains { key: String, value: String },
    /// Latest event hit a specific port, or one of a set
    PortOnly {
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        ports: Vec<u16>,
    },
    /// Reserved for externally supplied matchers; never matches here
    Custom,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for MatchSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchSpec::RpsAndPort { .. } => write!(f, "rps_and_port"),
            MatchSpec::PathAndUniqueSources { .. } => write!(f, "path_and_unique_sources"),
            MatchSpec::HeaderContains { .. } => write!(f, "header_contains"),
            MatchSpec::PortOnly { .. } => write!(f, "port_only"),
            MatchSpec::Custom => write!(f, "custom"),
            MatchSpec::Unknown => write!(f, "unknown"),
        }
    }
}

/// A stored detection rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub technique: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "match")]
    pub match_spec: MatchSpec,
    pub created_at: DateTime<Utc>,
}

/// Intake shape for creating a rule; missing fields get defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub technique: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "match")]
    pub match_spec: MatchSpec,
}

impl NewRule {
    pub fn new(match_spec: MatchSpec) -> Self {
        Self {
            id: None,
            name: None,
            technique: None,
            description: None,
            match_spec,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn technique(mut self, technique: impl Into<String>) -> Self {
        self.technique = Some(technique.into());
        self
    }

    /// Materialize into a full rule, generating an id and stamping the
    /// creation time.
    pub fn into_rule(self) -> Rule {
        Rule {
            id: self
                .id
                .unwrap_or_else(|| format!("rule-{}", uuid::Uuid::new_v4())),
            name: self.name.unwrap_or_else(|| "Unnamed".to_string()),
            technique: self.technique.unwrap_or_else(|| "unknown".to_string()),
            description: self.description.unwrap_or_default(),
            match_spec: self.match_spec,
            created_at: Utc::now(),
        }
    }
}

/// Record produced when a rule condition is satisfied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub ts: DateTime<Utc>,
    pub rule_id: String,
    pub name: String,
    pub technique: String,
    pub source: String,
    pub details: serde_json::Value,
}

/// Point-in-time view of the traffic window. Derived, never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Snapshot {
    pub ts: DateTime<Utc>,
    pub rps: f64,
    pub unique_sources: usize,
    pub total_in_window: u64,
}

/// A honeypot target: one domain with the ports to probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Target {
    pub domain: String,
    #[serde(default)]
    pub ports: Vec<u16>,
}

/// Result of a single liveness probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortStatus {
    pub domain: String,
    pub port: u16,
    pub alive: bool,
    pub ts: DateTime<Utc>,
}

impl std::fmt::Display for PortStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} {}",
            self.domain,
            self.port,
            if self.alive { "alive" } else { "down" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder() {
        let ev = TrafficEvent::new("10.0.0.1")
            .with_method("GET")
            .with_path("/login")
            .with_header("user-agent", "curl/8.0")
            .with_port(8443);

        assert_eq!(ev.source, "10.0.0.1");
        assert_eq!(ev.path, "/login");
        assert_eq!(ev.port, Some(8443));
        assert_eq!(
            ev.headers.get("user-agent").map(String::as_str),
            Some("curl/8.0")
        );
    }

    #[test]
    fn test_match_spec_tagged_deserialization() {
        let spec: MatchSpec = serde_json::from_str(
            r#"{"type": "rps_and_port", "ports": [80, 443], "min_rps": 5.0}"#,
        )
        .unwrap();
        assert_eq!(
            spec,
            MatchSpec::RpsAndPort {
                ports: vec![80, 443],
                min_rps: 5.0
            }
        );
    }

    #[test]
    fn test_unknown_match_spec_is_rejected_variant() {
        let spec: MatchSpec =
            serde_json::from_str(r#"{"type": "geo_fence"}"#).unwrap();
        assert_eq!(spec, MatchSpec::Unknown);
    }

    #[test]
    fn test_new_rule_fills_defaults() {
        let rule = NewRule::new(MatchSpec::Custom).into_rule();
        assert!(rule.id.starts_with("rule-"));
        assert_eq!(rule.name, "Unnamed");
        assert_eq!(rule.technique, "unknown");
        assert!(rule.description.is_empty());
    }

    #[test]
    fn test_rule_serde_round_trip() {
        let rule = NewRule::new(MatchSpec::PortOnly {
            port: Some(2222),
            ports: vec![],
        })
        .named("ssh honeypot hit")
        .technique("T1046")
        .into_rule();

        let json = serde_json::to_string(&rule).unwrap();
        let parsed: Rule = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, rule.id);
        assert_eq!(parsed.match_spec, rule.match_spec);
    }
}
