//! # bobcat-model
//!
//! Scenario loading and graph building for the bobcat simulator.
//!
//! A scenario file is a mapping from node name to a map holding the node's
//! `type`, behavior-specific options, and link keys. A key that names
//! another node (case-insensitively) declares a directed link; its value is
//! either `~` (always deliver), a predicate string, or a nested map of link
//! attributes:
//!
//! ```yaml
//! DEFAULT:
//!     msg_size_key: size_mbits
//! Imager:
//!     type: RandomDataSource
//!     single_pulse: True
//!     Downlink: ~
//! Downlink:
//!     type: DelaySize
//!     rate_per_mbit: 50
//!     Ground: size_mbits > 10
//! Ground:
//!     type: Sink
//! ```
//!
//! A top-level `DEFAULT` mapping provides fallback option values; explicit
//! keys win. Entries with `type: MetaNode` declare a position provider and
//! the member nodes that share it. Loading resolves everything up front:
//! behaviors are instantiated, predicates compiled, and link targets
//! resolved through a name table, so the engine never parses anything at
//! run time.

use bobcat_core::{Behavior, NodeId, Options, PositionProvider, Value};
use bobcat_nodes::{build_behavior, find_node_type, NodeError};
use bobcat_orbit::PositionModel;
use bobcat_predicate::{Predicate, PredicateError};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

// Re-export for embedders building behaviors themselves.
pub use bobcat_nodes::node_types;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while loading a scenario. All abort before any event is
/// scheduled.
#[derive(Debug, Error)]
pub enum ModelError {
    /// File could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Scenario files must be .yml, .yaml, or .json.
    #[error("Could not parse unknown file type '{0}'. Accepted types are [yml, yaml, json]")]
    UnsupportedExtension(String),

    /// Scenario root must be a mapping of node names.
    #[error("Scenario root must be a mapping of node names")]
    NotAMapping,

    /// A node entry is missing its `type` key.
    #[error("Node '{0}' has no type")]
    MissingType(String),

    /// Two entries share a name.
    #[error("Duplicate node name: {0}")]
    DuplicateNode(String),

    /// Behavior construction failed (unknown type, bad option, bad gate
    /// condition).
    #[error(transparent)]
    Node(#[from] NodeError),

    /// A link predicate failed to parse.
    #[error(transparent)]
    Predicate(#[from] PredicateError),

    /// A meta-node names a member that is not declared.
    #[error("Meta node '{meta}' references undeclared node '{member}'")]
    UndeclaredMember {
        /// Meta-node name.
        meta: String,
        /// Missing member name.
        member: String,
    },

    /// A meta-node's propagator block is malformed.
    #[error("Meta node '{meta}': {message}")]
    BadMeta {
        /// Meta-node name.
        meta: String,
        /// Diagnostic.
        message: String,
    },

    /// Propagator construction failed (bad TLE).
    #[error(transparent)]
    Position(#[from] bobcat_core::SimError),
}

// ============================================================================
// Scenario Types
// ============================================================================

/// How a link turns a message into a delivery delay.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkDelaySpec {
    /// Fixed delay in seconds.
    Constant(f64),
    /// Delay proportional to message size.
    SizeRate {
        /// Megabits per second.
        rate_mbits_per_s: f64,
    },
    /// TCP throughput limit from the Mathis equation.
    Mathis {
        /// Maximum segment size in bytes.
        mss: f64,
        /// Round trip time in seconds.
        rtt: f64,
        /// Packet loss probability.
        packet_loss: f64,
        /// Mathis constant.
        c_constant: f64,
    },
}

/// A directed link as declared in the scenario.
#[derive(Debug, Clone)]
pub struct LinkSpec {
    /// Destination node name as written.
    pub to: String,
    /// Compiled predicate.
    pub predicate: Predicate,
    /// Delivery delay model.
    pub delay: LinkDelaySpec,
}

/// A node entry, fully resolved against `DEFAULT`.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    /// Unique node name.
    pub name: String,
    /// Behavior type string as written.
    pub type_name: String,
    /// Resolved options (link keys and `type` stripped).
    pub options: Options,
    /// Outgoing links in definition order.
    pub links: Vec<LinkSpec>,
}

/// Propagator attached to a meta-node.
#[derive(Debug, Clone)]
pub enum PropagatorSpec {
    /// Constant geodetic location.
    Geopoint {
        /// Latitude in degrees.
        lat_deg: f64,
        /// Longitude in degrees.
        lon_deg: f64,
        /// Altitude in kilometers.
        alt_km: f64,
    },
    /// Two-line element set propagated with SGP4.
    Satellite {
        /// First TLE line.
        tle_line1: String,
        /// Second TLE line.
        tle_line2: String,
    },
}

/// A meta-node entry: a position provider plus its member nodes.
#[derive(Debug, Clone)]
pub struct MetaSpec {
    /// Meta-node name.
    pub name: String,
    /// Position provider configuration.
    pub propagator: PropagatorSpec,
    /// Names of the member nodes sharing the provider.
    pub members: Vec<String>,
}

/// A fully loaded and validated scenario.
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Nodes in definition order.
    pub nodes: Vec<NodeSpec>,
    /// Meta-nodes in definition order.
    pub metas: Vec<MetaSpec>,
}

// ============================================================================
// Raw Value Conversion
// ============================================================================

/// YAML value to payload value. Nulls drop the option entirely.
fn value_from_yaml(raw: &serde_yaml::Value) -> Option<Value> {
    match raw {
        serde_yaml::Value::Null => None,
        serde_yaml::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_yaml::Value::Number(n) => Some(if let Some(i) = n.as_i64() {
            Value::Int(i)
        } else {
            Value::Float(n.as_f64().unwrap_or(0.0))
        }),
        serde_yaml::Value::String(s) => Some(Value::Str(s.clone())),
        serde_yaml::Value::Sequence(items) => Some(Value::List(
            items.iter().filter_map(value_from_yaml).collect(),
        )),
        serde_yaml::Value::Mapping(map) => Some(Value::Map(
            map.iter()
                .filter_map(|(k, v)| {
                    let key = k.as_str()?.to_string();
                    value_from_yaml(v).map(|value| (key, value))
                })
                .collect(),
        )),
        serde_yaml::Value::Tagged(tagged) => value_from_yaml(&tagged.value),
    }
}

fn value_from_json(raw: &serde_json::Value) -> Option<Value> {
    match raw {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::Number(n) => Some(if let Some(i) = n.as_i64() {
            Value::Int(i)
        } else {
            Value::Float(n.as_f64().unwrap_or(0.0))
        }),
        serde_json::Value::String(s) => Some(Value::Str(s.clone())),
        serde_json::Value::Array(items) => Some(Value::List(
            items.iter().filter_map(value_from_json).collect(),
        )),
        serde_json::Value::Object(map) => Some(Value::Map(
            map.iter()
                .filter_map(|(k, v)| value_from_json(v).map(|value| (k.clone(), value)))
                .collect(),
        )),
    }
}

/// An entry's body: key order preserved, nulls kept as `None` so link
/// sentinels survive.
type RawEntry = Vec<(String, Option<Value>)>;

fn entries_from_yaml(text: &str) -> Result<Vec<(String, RawEntry)>, ModelError> {
    let root: serde_yaml::Value = serde_yaml::from_str(text)?;
    let serde_yaml::Value::Mapping(map) = root else {
        return Err(ModelError::NotAMapping);
    };
    let mut entries = Vec::new();
    for (key, body) in &map {
        let name = key.as_str().ok_or(ModelError::NotAMapping)?.trim().to_string();
        let serde_yaml::Value::Mapping(body) = body else {
            return Err(ModelError::MissingType(name));
        };
        let mut raw = Vec::new();
        for (k, v) in body {
            let Some(option) = k.as_str() else { continue };
            raw.push((option.to_string(), value_from_yaml(v)));
        }
        entries.push((name, raw));
    }
    Ok(entries)
}

fn entries_from_json(text: &str) -> Result<Vec<(String, RawEntry)>, ModelError> {
    let root: serde_json::Value = serde_json::from_str(text)?;
    let serde_json::Value::Object(map) = root else {
        return Err(ModelError::NotAMapping);
    };
    let mut entries = Vec::new();
    for (name, body) in &map {
        let name = name.trim().to_string();
        let serde_json::Value::Object(body) = body else {
            return Err(ModelError::MissingType(name));
        };
        let raw = body
            .iter()
            .map(|(k, v)| (k.clone(), value_from_json(v)))
            .collect();
        entries.push((name, raw));
    }
    Ok(entries)
}

// ============================================================================
// Scenario Loading
// ============================================================================

/// Scenario text format, dispatched on file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// YAML scenario.
    Yaml,
    /// JSON scenario (also what `loaded_network.json` re-loads through).
    Json,
}

/// Load a scenario file, dispatching on its extension.
pub fn load_scenario(path: &Path) -> Result<Scenario, ModelError> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    let format = match extension {
        "yml" | "yaml" => Format::Yaml,
        "json" => Format::Json,
        other => return Err(ModelError::UnsupportedExtension(other.to_string())),
    };
    let text = std::fs::read_to_string(path)?;
    load_scenario_from_str(&text, format)
}

/// Parse a scenario from text.
pub fn load_scenario_from_str(text: &str, format: Format) -> Result<Scenario, ModelError> {
    let entries = match format {
        Format::Yaml => entries_from_yaml(text)?,
        Format::Json => entries_from_json(text)?,
    };

    // First pass: defaults and the set of linkable node names. Meta-nodes
    // are not link targets.
    let mut defaults: Vec<(String, Option<Value>)> = Vec::new();
    let mut node_names: Vec<String> = Vec::new();
    for (name, raw) in &entries {
        if name == "DEFAULT" {
            defaults = raw.clone();
            continue;
        }
        let type_name = entry_type(raw).ok_or_else(|| ModelError::MissingType(name.clone()))?;
        if node_names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            return Err(ModelError::DuplicateNode(name.clone()));
        }
        if !type_name.eq_ignore_ascii_case("metanode") {
            node_names.push(name.clone());
        }
    }

    let is_node_name =
        |key: &str| node_names.iter().find(|n| n.eq_ignore_ascii_case(key)).cloned();

    // Second pass: build specs.
    let mut nodes = Vec::new();
    let mut metas = Vec::new();
    for (name, raw) in &entries {
        if name == "DEFAULT" {
            continue;
        }
        let type_name = entry_type(raw).ok_or_else(|| ModelError::MissingType(name.clone()))?;

        if type_name.eq_ignore_ascii_case("metanode") {
            metas.push(parse_meta(name, raw, &node_names)?);
            continue;
        }

        // Defaults never overwrite explicit keys.
        let mut merged: Vec<(String, Option<Value>)> = raw.clone();
        for (key, value) in &defaults {
            if !merged.iter().any(|(k, _)| k == key) {
                merged.push((key.clone(), value.clone()));
            }
        }

        let mut options = BTreeMap::new();
        let mut links = Vec::new();
        for (key, value) in &merged {
            if key == "type" {
                continue;
            }
            if let Some(target) = is_node_name(key) {
                links.push(parse_link(target, value)?);
                continue;
            }
            if let Some(value) = value {
                options.insert(key.clone(), value.clone());
            }
        }

        nodes.push(NodeSpec {
            name: name.clone(),
            type_name: type_name.clone(),
            options: Options(options),
            links,
        });
    }

    Ok(Scenario { nodes, metas })
}

fn entry_type(raw: &RawEntry) -> Option<String> {
    raw.iter().find(|(k, _)| k == "type").and_then(|(_, v)| {
        v.as_ref().map(|value| value.render())
    })
}

fn parse_link(to: String, value: &Option<Value>) -> Result<LinkSpec, ModelError> {
    match value {
        // `~` is the always-deliver sentinel.
        None => Ok(LinkSpec {
            to,
            predicate: Predicate::always(),
            delay: LinkDelaySpec::Constant(0.0),
        }),
        Some(Value::Map(attrs)) => {
            let predicate = match attrs.get("predicate") {
                Some(Value::Str(text)) => Predicate::parse(text)?,
                _ => Predicate::always(),
            };
            let get_f64 = |key: &str, default: f64| -> f64 {
                attrs.get(key).and_then(Value::as_f64).unwrap_or(default)
            };
            let delay = if let Some(rate) = attrs.get("rate_mbits_per_s").and_then(Value::as_f64) {
                LinkDelaySpec::SizeRate { rate_mbits_per_s: rate }
            } else if ["mss", "rtt", "packet_loss"].iter().any(|k| attrs.contains_key(*k)) {
                LinkDelaySpec::Mathis {
                    mss: get_f64("mss", 1460.0),
                    rtt: get_f64("rtt", 0.1),
                    packet_loss: get_f64("packet_loss", 0.001),
                    c_constant: get_f64("c_constant", 0.93),
                }
            } else {
                LinkDelaySpec::Constant(get_f64("link_delay", 0.0))
            };
            Ok(LinkSpec { to, predicate, delay })
        }
        Some(other) => Ok(LinkSpec {
            to,
            predicate: Predicate::parse(&other.render())?,
            delay: LinkDelaySpec::Constant(0.0),
        }),
    }
}

fn parse_meta(name: &str, raw: &RawEntry, node_names: &[String]) -> Result<MetaSpec, ModelError> {
    let bad = |message: &str| ModelError::BadMeta {
        meta: name.to_string(),
        message: message.to_string(),
    };

    let propagator_raw = raw
        .iter()
        .find(|(k, _)| k == "propagator")
        .and_then(|(_, v)| v.clone())
        .ok_or_else(|| bad("missing propagator block"))?;
    let Value::Map(propagator_map) = propagator_raw else {
        return Err(bad("propagator must be a mapping"));
    };

    let prop_type = propagator_map
        .get("type")
        .map(Value::render)
        .ok_or_else(|| bad("propagator has no type"))?
        .to_ascii_lowercase();
    let get_f64 = |key: &str, default: f64| -> f64 {
        propagator_map.get(key).and_then(Value::as_f64).unwrap_or(default)
    };
    let propagator = match prop_type.as_str() {
        "geopoint" => PropagatorSpec::Geopoint {
            lat_deg: get_f64("Lat_deg", 0.0),
            lon_deg: get_f64("Lon_deg", 0.0),
            alt_km: get_f64("Alt_km", 0.0),
        },
        "satellite" => PropagatorSpec::Satellite {
            tle_line1: propagator_map
                .get("tle_line1")
                .map(Value::render)
                .ok_or_else(|| bad("satellite propagator needs tle_line1"))?,
            tle_line2: propagator_map
                .get("tle_line2")
                .map(Value::render)
                .ok_or_else(|| bad("satellite propagator needs tle_line2"))?,
        },
        other => return Err(bad(&format!("unsupported propagator type '{other}'"))),
    };

    let members: Vec<String> = raw
        .iter()
        .find(|(k, _)| k == "nodes")
        .and_then(|(_, v)| v.as_ref())
        .and_then(Value::as_list)
        .map(|items| items.iter().map(Value::render).collect())
        .unwrap_or_default();
    for member in &members {
        if !node_names.iter().any(|n| n.eq_ignore_ascii_case(member)) {
            return Err(ModelError::UndeclaredMember {
                meta: name.to_string(),
                member: member.clone(),
            });
        }
    }

    Ok(MetaSpec {
        name: name.to_string(),
        propagator,
        members,
    })
}

// ============================================================================
// Canonical Dump
// ============================================================================

impl Scenario {
    /// Canonical JSON rendering of the resolved graph. Re-loading the output
    /// with [`load_scenario_from_str`] produces an isomorphic scenario.
    pub fn to_canonical_json(&self) -> serde_json::Value {
        let mut root = serde_json::Map::new();
        for node in &self.nodes {
            let mut body = serde_json::Map::new();
            body.insert("type".to_string(), json!(node.type_name));
            for (key, value) in &node.options.0 {
                body.insert(key.clone(), serde_json::to_value(value).unwrap_or_default());
            }
            for link in &node.links {
                body.insert(link.to.clone(), link_json(link));
            }
            root.insert(node.name.clone(), serde_json::Value::Object(body));
        }
        for meta in &self.metas {
            let propagator = match &meta.propagator {
                PropagatorSpec::Geopoint { lat_deg, lon_deg, alt_km } => json!({
                    "type": "geopoint",
                    "Lat_deg": lat_deg,
                    "Lon_deg": lon_deg,
                    "Alt_km": alt_km,
                }),
                PropagatorSpec::Satellite { tle_line1, tle_line2 } => json!({
                    "type": "satellite",
                    "tle_line1": tle_line1,
                    "tle_line2": tle_line2,
                }),
            };
            root.insert(
                meta.name.clone(),
                json!({
                    "type": "MetaNode",
                    "propagator": propagator,
                    "nodes": meta.members,
                }),
            );
        }
        serde_json::Value::Object(root)
    }
}

fn link_json(link: &LinkSpec) -> serde_json::Value {
    match &link.delay {
        LinkDelaySpec::Constant(delay) if *delay == 0.0 => {
            if link.predicate.is_always() {
                serde_json::Value::Null
            } else {
                json!(link.predicate.source())
            }
        }
        LinkDelaySpec::Constant(delay) => json!({
            "predicate": link.predicate.source(),
            "link_delay": delay,
        }),
        LinkDelaySpec::SizeRate { rate_mbits_per_s } => json!({
            "predicate": link.predicate.source(),
            "rate_mbits_per_s": rate_mbits_per_s,
        }),
        LinkDelaySpec::Mathis { mss, rtt, packet_loss, c_constant } => json!({
            "predicate": link.predicate.source(),
            "mss": mss,
            "rtt": rtt,
            "packet_loss": packet_loss,
            "c_constant": c_constant,
        }),
    }
}

// ============================================================================
// Graph Building
// ============================================================================

/// A resolved outgoing link ready for dispatch.
pub struct Link {
    /// Destination name as written.
    pub to_name: String,
    /// Resolved destination.
    pub to: NodeId,
    /// Compiled predicate.
    pub predicate: Predicate,
    /// Delivery delay model.
    pub delay: LinkDelaySpec,
}

/// A live node: behavior plus routing state.
pub struct BuiltNode {
    /// Node name.
    pub name: String,
    /// Behavior type string.
    pub type_name: String,
    /// Instantiated behavior.
    pub behavior: Box<dyn Behavior>,
    /// Outgoing links in definition order.
    pub links: Vec<Link>,
    /// Shared position provider, when a meta-node claims this node.
    pub position: Option<Arc<dyn PositionProvider>>,
    /// Name of the claiming meta-node.
    pub meta_name: Option<String>,
    /// Payload key this node reads sizes from.
    pub size_key: String,
    /// Resolved options, kept for config dumps.
    pub options: Options,
}

/// The runnable scenario graph.
pub struct BuiltGraph {
    /// Nodes in definition order; [`NodeId`] indexes into this.
    pub nodes: Vec<BuiltNode>,
    /// Lower-cased name to node table.
    pub name_table: BTreeMap<String, NodeId>,
}

impl BuiltGraph {
    /// Find a node by name, case-insensitively.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.name_table.get(&name.to_ascii_lowercase()).copied()
    }
}

/// Instantiate behaviors, resolve links, and attach position providers.
pub fn build_graph(scenario: &Scenario) -> Result<BuiltGraph, ModelError> {
    let mut name_table = BTreeMap::new();
    for (index, node) in scenario.nodes.iter().enumerate() {
        name_table.insert(node.name.to_ascii_lowercase(), NodeId(index));
    }

    // Position providers are shared by every member of their meta-node.
    let mut positions: BTreeMap<String, (String, Arc<dyn PositionProvider>)> = BTreeMap::new();
    for meta in &scenario.metas {
        let model = match &meta.propagator {
            PropagatorSpec::Geopoint { lat_deg, lon_deg, alt_km } => {
                PositionModel::geopoint(*lat_deg, *lon_deg, *alt_km)
            }
            PropagatorSpec::Satellite { tle_line1, tle_line2 } => {
                PositionModel::orbital(&meta.name, tle_line1, tle_line2)?
            }
        };
        let shared: Arc<dyn PositionProvider> = Arc::new(model);
        for member in &meta.members {
            positions.insert(
                member.to_ascii_lowercase(),
                (meta.name.clone(), Arc::clone(&shared)),
            );
        }
    }

    let mut nodes = Vec::new();
    for spec in &scenario.nodes {
        let type_def = find_node_type(&spec.type_name)
            .ok_or_else(|| NodeError::UnknownType(spec.type_name.clone()))?;
        for unknown in spec.options.unknown_keys(type_def.options) {
            warn!(node = %spec.name, option = unknown, "unknown option ignored by this node type");
        }

        let behavior = build_behavior(&spec.type_name, &spec.options)?;
        let links = spec
            .links
            .iter()
            .map(|link| Link {
                to: name_table[&link.to.to_ascii_lowercase()],
                to_name: link.to.clone(),
                predicate: link.predicate.clone(),
                delay: link.delay.clone(),
            })
            .collect();
        let (meta_name, position) = match positions.get(&spec.name.to_ascii_lowercase()) {
            Some((meta, provider)) => (Some(meta.clone()), Some(Arc::clone(provider))),
            None => (None, None),
        };

        nodes.push(BuiltNode {
            name: spec.name.clone(),
            type_name: spec.type_name.clone(),
            behavior,
            links,
            position,
            meta_name,
            size_key: spec.options.str_or("msg_size_key", bobcat_core::DEFAULT_SIZE_KEY),
            options: spec.options.clone(),
        });
    }

    Ok(BuiltGraph { nodes, name_table })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PULSE_SCENARIO: &str = r#"
DEFAULT:
    msg_size_key: size_mbits
Imager:
    type: RandomDataSource
    single_pulse: True
    Downlink: ~
Downlink:
    type: DelayTime
    time_delay: 5
    Ground: ~
Ground:
    type: Sink
"#;

    #[test]
    fn test_load_pulse_scenario() {
        let scenario = load_scenario_from_str(PULSE_SCENARIO, Format::Yaml).unwrap();
        assert_eq!(scenario.nodes.len(), 3);

        let imager = &scenario.nodes[0];
        assert_eq!(imager.name, "Imager");
        assert_eq!(imager.links.len(), 1);
        assert_eq!(imager.links[0].to, "Downlink");
        assert!(imager.links[0].predicate.is_always());
        // DEFAULT resolved into options.
        assert_eq!(imager.options.str_or("msg_size_key", "x"), "size_mbits");
        // single_pulse survives as an option, not a link.
        assert!(imager.options.contains("single_pulse"));
    }

    #[test]
    fn test_predicate_and_attribute_links() {
        let text = r#"
Router:
    type: DelayTime
    Red_Sink: color == "red"
    Slow_Sink:
        predicate: size_mbits > 10
        link_delay: 2.5
    Tcp_Sink:
        mss: 1460
        rtt: 0.2
Red_Sink:
    type: Sink
Slow_Sink:
    type: Sink
Tcp_Sink:
    type: Sink
"#;
        let scenario = load_scenario_from_str(text, Format::Yaml).unwrap();
        let router = &scenario.nodes[0];
        assert_eq!(router.links.len(), 3);
        assert_eq!(router.links[0].predicate.source(), "color == \"red\"");
        assert_eq!(router.links[1].delay, LinkDelaySpec::Constant(2.5));
        assert!(matches!(router.links[2].delay, LinkDelaySpec::Mathis { rtt, .. } if rtt == 0.2));
    }

    #[test]
    fn test_defaults_do_not_overwrite_explicit_keys() {
        let text = r#"
DEFAULT:
    time_delay: 9
A:
    type: DelayTime
    time_delay: 1
B:
    type: DelayTime
"#;
        let scenario = load_scenario_from_str(text, Format::Yaml).unwrap();
        assert_eq!(scenario.nodes[0].options.f64_or("time_delay", 0.0).unwrap(), 1.0);
        assert_eq!(scenario.nodes[1].options.f64_or("time_delay", 0.0).unwrap(), 9.0);
    }

    #[test]
    fn test_missing_type_fails() {
        assert!(matches!(
            load_scenario_from_str("A:\n    Downlink: ~\n", Format::Yaml),
            Err(ModelError::MissingType(_))
        ));
    }

    #[test]
    fn test_bad_predicate_fails_at_load() {
        let text = "A:\n    type: DelayTime\n    B: total nonsense\nB:\n    type: Sink\n";
        assert!(matches!(
            load_scenario_from_str(text, Format::Yaml),
            Err(ModelError::Predicate(_))
        ));
    }

    #[test]
    fn test_meta_node_members() {
        let text = r#"
Site:
    type: MetaNode
    propagator:
        type: geopoint
        Lat_deg: 10.0
        Lon_deg: 20.0
        Alt_km: 0.1
    nodes: [Reporter]
Reporter:
    type: PositionReport
"#;
        let scenario = load_scenario_from_str(text, Format::Yaml).unwrap();
        assert_eq!(scenario.metas.len(), 1);
        assert_eq!(scenario.metas[0].members, vec!["Reporter"]);

        let graph = build_graph(&scenario).unwrap();
        let reporter = &graph.nodes[0];
        assert_eq!(reporter.meta_name.as_deref(), Some("Site"));
        assert!(reporter.position.is_some());
    }

    #[test]
    fn test_meta_undeclared_member_fails() {
        let text = r#"
Site:
    type: MetaNode
    propagator:
        type: geopoint
    nodes: [Ghost]
"#;
        assert!(matches!(
            load_scenario_from_str(text, Format::Yaml),
            Err(ModelError::UndeclaredMember { .. })
        ));
    }

    #[test]
    fn test_unknown_node_type_fails_at_build() {
        let scenario = load_scenario_from_str("A:\n    type: Warp\n", Format::Yaml).unwrap();
        assert!(matches!(
            build_graph(&scenario),
            Err(ModelError::Node(NodeError::UnknownType(_)))
        ));
    }

    #[test]
    fn test_canonical_json_round_trip_is_isomorphic() {
        let scenario = load_scenario_from_str(PULSE_SCENARIO, Format::Yaml).unwrap();
        let dumped = serde_json::to_string_pretty(&scenario.to_canonical_json()).unwrap();
        let reloaded = load_scenario_from_str(&dumped, Format::Json).unwrap();

        assert_eq!(scenario.nodes.len(), reloaded.nodes.len());
        for (a, b) in scenario.nodes.iter().zip(reloaded.nodes.iter()) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.type_name, b.type_name);
            assert_eq!(a.links.len(), b.links.len());
            for (la, lb) in a.links.iter().zip(b.links.iter()) {
                assert_eq!(la.to, lb.to);
                assert_eq!(la.predicate.source(), lb.predicate.source());
                assert_eq!(la.delay, lb.delay);
            }
            assert_eq!(a.options.0, b.options.0);
        }
    }

    #[test]
    fn test_build_graph_resolves_links() {
        let scenario = load_scenario_from_str(PULSE_SCENARIO, Format::Yaml).unwrap();
        let graph = build_graph(&scenario).unwrap();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.nodes[0].links[0].to, NodeId(1));
        assert_eq!(graph.find("ground"), Some(NodeId(2)));
        assert!(graph.nodes[0].behavior.is_source());
    }
}
