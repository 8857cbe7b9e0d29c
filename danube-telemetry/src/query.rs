//! PromQL builders for broker pod telemetry.
//!
//! Broker pods are managed by a StatefulSet and named `<broker>-ss-<ordinal>`, so a
//! single regex matcher on the `pod` label selects every replica of one broker.

use std::fmt;
use std::str::FromStr;

use crate::errors::{Result, TelemetryError};

/// Raw metric charted for a broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKind {
    Cpu,
    Memory,
}

impl MetricKind {
    pub const ALL: [MetricKind; 2] = [MetricKind::Cpu, MetricKind::Memory];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "CPU",
            MetricKind::Memory => "Memory",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(MetricKind::Cpu),
            "memory" | "mem" => Ok(MetricKind::Memory),
            other => Err(TelemetryError::InvalidIdentity(format!(
                "unknown metric kind '{}'",
                other
            ))),
        }
    }
}

/// One polled series: which broker, where, and what.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricIdentity {
    pub entity_name: String,
    pub namespace: String,
    pub kind: MetricKind,
}

impl MetricIdentity {
    pub fn new(entity_name: impl Into<String>, namespace: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            entity_name: entity_name.into(),
            namespace: namespace.into(),
            kind,
        }
    }
}

impl fmt::Display for MetricIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.entity_name, self.kind)
    }
}

/// Broker identity handed over by the hosting view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceIdentity {
    pub name: String,
    pub namespace: String,
    /// Replica count when known; narrows the pod matcher to the exact ordinals.
    pub size_hint: Option<u32>,
}

impl ResourceIdentity {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            size_hint: None,
        }
    }

    pub fn with_size_hint(mut self, size_hint: Option<u32>) -> Self {
        self.size_hint = size_hint;
        self
    }

    /// One identity per charted metric kind, in chart order.
    pub fn metrics(&self) -> Vec<MetricIdentity> {
        MetricKind::ALL
            .iter()
            .map(|kind| MetricIdentity::new(self.name.clone(), self.namespace.clone(), *kind))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        validate_names(&self.name, &self.namespace)
    }

    pub fn query(&self, kind: MetricKind) -> Result<String> {
        build_query_for_pods(&self.name, &self.namespace, kind, self.size_hint)
    }
}

/// Build the range-query expression for one broker metric, matching any pod ordinal.
pub fn build_query(entity_name: &str, namespace: &str, kind: MetricKind) -> Result<String> {
    build_query_for_pods(entity_name, namespace, kind, None)
}

/// Same as [`build_query`], but limited to ordinals `0..size_hint` when a size is known.
pub fn build_query_for_pods(
    entity_name: &str,
    namespace: &str,
    kind: MetricKind,
    size_hint: Option<u32>,
) -> Result<String> {
    validate_names(entity_name, namespace)?;

    let pod = escape_label_value(&pod_matcher(entity_name, size_hint));
    let namespace = escape_label_value(namespace);

    let query = match kind {
        MetricKind::Memory => format!(
            "sum(container_memory_working_set_bytes{{pod=~\"{}\", namespace=\"{}\", container=\"\"}}) BY (pod)",
            pod, namespace
        ),
        MetricKind::Cpu => format!(
            "sum(pod:container_cpu_usage:sum{{pod=~\"{}\", namespace=\"{}\"}}) BY (pod)",
            pod, namespace
        ),
    };
    Ok(query)
}

fn validate_names(entity_name: &str, namespace: &str) -> Result<()> {
    if entity_name.trim().is_empty() {
        return Err(TelemetryError::InvalidIdentity(
            "entity name must not be empty".to_string(),
        ));
    }
    if namespace.trim().is_empty() {
        return Err(TelemetryError::InvalidIdentity(
            "namespace must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn pod_matcher(entity_name: &str, size_hint: Option<u32>) -> String {
    let prefix = escape_regex(entity_name);
    match size_hint {
        Some(size) if size > 0 => {
            let ordinals: Vec<String> = (0..size).map(|i| i.to_string()).collect();
            format!("{}-ss-({})", prefix, ordinals.join("|"))
        }
        _ => format!("{}-ss-[0-9]+", prefix),
    }
}

fn escape_regex(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// PromQL double-quoted strings use Go escaping.
fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
