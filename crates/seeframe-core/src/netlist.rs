//! Netlist model: candidate signals derived from a structural netlist.
//!
//! Reads the JSON netlist written by Yosys (`write_json`) and flattens the
//! module hierarchy below the top module into a [`CandidateRegistry`]. Every
//! visible net becomes a candidate unless it is pure flip-flop control fan-in
//! (clock, enable, reset) or constant.
//!
//! Classification per net, per module instance:
//!
//! ```text
//! all bits driven by a flip-flop Q pin  -> StorageElement  (SEU target)
//! all bits only reach flip-flop control -> skipped
//! all bits constant / hidden name       -> skipped
//! anything else                         -> CombinationalNet (SET target)
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use crate::{error::ParseError, event::FaultKind};

/// Yosys internal (word-level) flip-flop cell types.
const STORAGE_CELLS: &[&str] = &[
    "$dff", "$dffe", "$adff", "$adffe", "$sdff", "$sdffe", "$sdffce", "$dffsr", "$dffsre", "$aldff",
    "$aldffe", "$ff",
];

/// Yosys gate-level flip-flop families (`$_DFF_PP0_`, `$_SDFFE_PN1P_`, ...).
const STORAGE_GATE_PREFIXES: &[&str] = &[
    "$_DFF_", "$_DFFE_", "$_SDFF_", "$_SDFFE_", "$_SDFFCE_", "$_DFFSR_", "$_DFFSRE_", "$_ALDFF_",
    "$_ALDFFE_", "$_FF_",
];

/// Flip-flop pins that carry control rather than data.
const CONTROL_PINS: &[&str] =
    &["CLK", "C", "EN", "E", "CE", "ARST", "SRST", "R", "S", "SET", "CLR", "ALOAD", "L"];

/// Flip-flop output pin.
const Q_PIN: &str = "Q";

/// Injectability class of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignalClass {
    /// Flip-flop output. Receives permanent upsets.
    StorageElement,
    /// Plain net. Receives transient glitches only.
    CombinationalNet,
}

impl SignalClass {
    /// Fault kind this class receives.
    pub fn fault_kind(self) -> FaultKind {
        match self {
            Self::StorageElement => FaultKind::Upset,
            Self::CombinationalNet => FaultKind::Transient,
        }
    }
}

/// A named, bit-addressable netlist element eligible for fault injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSignal {
    segments: Vec<String>,
    path: String,
    width: u32,
    class: SignalClass,
    module: String,
    constant_bits: Vec<u32>,
}

impl CandidateSignal {
    /// Create a candidate from its hierarchical path segments.
    ///
    /// `module` is the definition name of the module the signal lives in.
    pub fn new(
        segments: Vec<String>,
        width: u32,
        class: SignalClass,
        module: impl Into<String>,
    ) -> Self {
        let path = segments.join(".");
        Self { segments, path, width, class, module: module.into(), constant_bits: Vec::new() }
    }

    /// Mark bits tied to a constant driver. They are never faulted.
    #[must_use]
    pub fn with_constant_bits(mut self, bits: impl IntoIterator<Item = u32>) -> Self {
        self.constant_bits = bits.into_iter().filter(|&bit| bit < self.width).collect();
        self.constant_bits.sort_unstable();
        self.constant_bits.dedup();
        self
    }

    /// Check if `bit` is tied to a constant.
    pub fn is_constant_bit(&self, bit: u32) -> bool {
        self.constant_bits.binary_search(&bit).is_ok()
    }

    /// Bits that can take a fault, ascending.
    pub fn injectable_bits(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.width).filter(|&bit| !self.is_constant_bit(bit))
    }

    /// Full dotted path (`top.u_core.state`).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path segments from the top module down.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Local (leaf) name.
    pub fn name(&self) -> &str {
        self.segments.last().map_or("", String::as_str)
    }

    /// Number of bits.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Injectability class.
    pub fn class(&self) -> SignalClass {
        self.class
    }

    /// Definition name of the enclosing module.
    pub fn module(&self) -> &str {
        &self.module
    }
}

/// All candidates of a design, keyed by dotted path.
///
/// Built once per run, read-only afterwards. Iteration order is the path
/// order, which is what makes [`crate::EligibleSet`] ordering stable.
#[derive(Debug, Clone, Default)]
pub struct CandidateRegistry {
    signals: BTreeMap<String, CandidateSignal>,
}

impl CandidateRegistry {
    /// Parse a Yosys JSON netlist with default options.
    pub fn from_json(json: &str, top: Option<&str>) -> Result<Self, ParseError> {
        let mut parser = NetlistParser::new();
        if let Some(top) = top {
            parser = parser.with_top(top);
        }
        parser.parse_str(json)
    }

    /// Build a registry from already-constructed candidates.
    ///
    /// Later duplicates of a path replace earlier ones.
    pub fn from_signals(signals: impl IntoIterator<Item = CandidateSignal>) -> Self {
        let signals = signals.into_iter().map(|s| (s.path.clone(), s)).collect();
        Self { signals }
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Look up a candidate by dotted path.
    pub fn get(&self, path: &str) -> Option<&CandidateSignal> {
        self.signals.get(path)
    }

    /// Candidates in path order.
    pub fn iter(&self) -> impl Iterator<Item = &CandidateSignal> {
        self.signals.values()
    }

    /// Number of candidates of `class`.
    pub fn count(&self, class: SignalClass) -> usize {
        self.signals.values().filter(|s| s.class == class).count()
    }
}

/// Netlist parser with its options.
#[derive(Debug, Clone, Default)]
pub struct NetlistParser {
    top: Option<String>,
    storage_cells: Vec<String>,
}

impl NetlistParser {
    /// Parser that picks the top module from the `top` attribute.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `top` as the top module.
    #[must_use]
    pub fn with_top(mut self, top: impl Into<String>) -> Self {
        self.top = Some(top.into());
        self
    }

    /// Treat an additional (technology library) cell type as a flip-flop.
    #[must_use]
    pub fn with_storage_cell(mut self, cell_type: impl Into<String>) -> Self {
        self.storage_cells.push(cell_type.into());
        self
    }

    /// Parse a netlist from a JSON string.
    pub fn parse_str(&self, json: &str) -> Result<CandidateRegistry, ParseError> {
        let raw: RawNetlist = serde_json::from_str(json)?;
        self.build(&raw)
    }

    /// Parse a netlist from raw JSON bytes.
    pub fn parse_slice(&self, json: &[u8]) -> Result<CandidateRegistry, ParseError> {
        let raw: RawNetlist = serde_json::from_slice(json)?;
        self.build(&raw)
    }

    /// Check whether `cell_type` is a storage element.
    pub fn is_storage_cell(&self, cell_type: &str) -> bool {
        STORAGE_CELLS.contains(&cell_type)
            || STORAGE_GATE_PREFIXES.iter().any(|p| cell_type.starts_with(p))
            || self.storage_cells.iter().any(|c| c == cell_type)
    }

    fn build(&self, raw: &RawNetlist) -> Result<CandidateRegistry, ParseError> {
        let top = self.find_top(raw)?;
        let mut registry = CandidateRegistry::default();
        let mut stack = vec![top.to_string()];
        self.walk(raw, top, &[top.to_string()], &mut stack, &mut registry)?;

        tracing::debug!(
            top,
            storage = registry.count(SignalClass::StorageElement),
            nets = registry.count(SignalClass::CombinationalNet),
            "netlist parsed"
        );
        Ok(registry)
    }

    fn find_top<'a>(&'a self, raw: &'a RawNetlist) -> Result<&'a str, ParseError> {
        if let Some(top) = &self.top {
            return raw
                .modules
                .get_key_value(top)
                .map(|(name, _)| name.as_str())
                .ok_or_else(|| ParseError::TopModuleNotFound(top.clone()));
        }

        raw.modules
            .iter()
            .find(|(_, module)| module.attributes.get("top").is_some_and(is_truthy))
            .map(|(name, _)| name.as_str())
            .ok_or(ParseError::NoTopModule)
    }

    fn walk(
        &self,
        raw: &RawNetlist,
        module_name: &str,
        prefix: &[String],
        stack: &mut Vec<String>,
        registry: &mut CandidateRegistry,
    ) -> Result<(), ParseError> {
        let Some(module) = raw.modules.get(module_name) else {
            return Err(ParseError::TopModuleNotFound(module_name.to_string()));
        };

        for (port_name, port) in &module.ports {
            resolve_bits(module_name, port_name, &port.bits)?;
        }

        let mut q_bits = HashSet::new();
        let mut control_bits = HashSet::new();
        let mut data_bits = HashSet::new();
        let mut instances = Vec::new();

        for (cell_name, cell) in &module.cells {
            if let Some(child) = raw.modules.get(&cell.cell_type) {
                for (port, bits) in &cell.connections {
                    if !child.ports.contains_key(port) {
                        return Err(ParseError::MissingPort {
                            module: module_name.to_string(),
                            cell: cell_name.clone(),
                            port: port.clone(),
                        });
                    }
                    let context = format!("{cell_name}.{port}");
                    data_bits.extend(net_ids(&resolve_bits(module_name, &context, bits)?));
                }
                instances.push((cell_name, cell.cell_type.as_str()));
            } else if self.is_storage_cell(&cell.cell_type) {
                if !cell.connections.contains_key(Q_PIN) {
                    return Err(ParseError::MissingPort {
                        module: module_name.to_string(),
                        cell: cell_name.clone(),
                        port: Q_PIN.to_string(),
                    });
                }
                for (port, bits) in &cell.connections {
                    let context = format!("{cell_name}.{port}");
                    let ids = net_ids(&resolve_bits(module_name, &context, bits)?);
                    if port == Q_PIN {
                        q_bits.extend(ids);
                    } else if CONTROL_PINS.contains(&port.as_str()) {
                        control_bits.extend(ids);
                    } else {
                        data_bits.extend(ids);
                    }
                }
            } else {
                for (port, bits) in &cell.connections {
                    let context = format!("{cell_name}.{port}");
                    data_bits.extend(net_ids(&resolve_bits(module_name, &context, bits)?));
                }
            }
        }

        for (net_name, net) in &module.netnames {
            let bits = resolve_bits(module_name, net_name, &net.bits)?;
            if net.hide_name != 0 {
                continue;
            }

            let ids = net_ids(&bits);
            if ids.is_empty() {
                continue;
            }

            let class = if ids.iter().all(|id| q_bits.contains(id)) {
                SignalClass::StorageElement
            } else if ids.iter().all(|id| control_bits.contains(id) && !data_bits.contains(id)) {
                continue;
            } else {
                SignalClass::CombinationalNet
            };

            let mut segments = prefix.to_vec();
            segments.push(net_name.clone());
            let constants = bits
                .iter()
                .enumerate()
                .filter(|(_, bit)| **bit == Bit::Const)
                .map(|(index, _)| index as u32);
            let signal = CandidateSignal::new(segments, bits.len() as u32, class, module_name)
                .with_constant_bits(constants);
            registry.signals.entry(signal.path.clone()).or_insert(signal);
        }

        for (instance, child) in instances {
            if stack.iter().any(|m| m == child) {
                return Err(ParseError::RecursiveInstance(child.to_string()));
            }

            let mut child_prefix = prefix.to_vec();
            child_prefix.push(instance.clone());
            stack.push(child.to_string());
            self.walk(raw, child, &child_prefix, stack, registry)?;
            stack.pop();
        }

        Ok(())
    }
}

/// A resolved netlist bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bit {
    Net(u64),
    Const,
}

fn resolve_bits(module: &str, net: &str, raw: &[RawBit]) -> Result<Vec<Bit>, ParseError> {
    raw.iter()
        .map(|bit| match bit {
            RawBit::Net(id) => Ok(Bit::Net(*id)),
            RawBit::Const(c) if matches!(c.as_str(), "0" | "1" | "x" | "z") => Ok(Bit::Const),
            RawBit::Const(c) => Err(ParseError::UnresolvableBit {
                module: module.to_string(),
                net: net.to_string(),
                bit: c.clone(),
            }),
        })
        .collect()
}

fn net_ids(bits: &[Bit]) -> Vec<u64> {
    bits.iter()
        .filter_map(|b| match b {
            Bit::Net(id) => Some(*id),
            Bit::Const => None,
        })
        .collect()
}

/// Yosys writes attributes as binary strings ("000...1") or plain numbers.
fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Number(n) => n.as_u64().is_some_and(|n| n != 0),
        serde_json::Value::String(s) => s.contains('1'),
        serde_json::Value::Bool(b) => *b,
        _ => false,
    }
}

#[derive(Debug, Deserialize)]
struct RawNetlist {
    #[serde(default)]
    modules: BTreeMap<String, RawModule>,
}

#[derive(Debug, Deserialize)]
struct RawModule {
    #[serde(default)]
    attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    ports: BTreeMap<String, RawPort>,
    #[serde(default)]
    cells: BTreeMap<String, RawCell>,
    #[serde(default)]
    netnames: BTreeMap<String, RawNet>,
}

#[derive(Debug, Deserialize)]
struct RawPort {
    #[serde(default)]
    bits: Vec<RawBit>,
}

#[derive(Debug, Deserialize)]
struct RawCell {
    #[serde(rename = "type")]
    cell_type: String,
    #[serde(default)]
    connections: BTreeMap<String, Vec<RawBit>>,
}

#[derive(Debug, Deserialize)]
struct RawNet {
    #[serde(default)]
    hide_name: u8,
    #[serde(default)]
    bits: Vec<RawBit>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBit {
    Net(u64),
    Const(String),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    /// Counter with a 4-bit register, its next-state logic, and a clock.
    fn counter() -> serde_json::Value {
        json!({
            "modules": {
                "counter": {
                    "attributes": { "top": "00000000000000000000000000000001" },
                    "ports": {
                        "clk": { "direction": "input", "bits": [2] },
                        "count": { "direction": "output", "bits": [3, 4, 5, 6] }
                    },
                    "cells": {
                        "$procdff$1": {
                            "type": "$dff",
                            "connections": { "CLK": [2], "D": [7, 8, 9, 10], "Q": [3, 4, 5, 6] }
                        },
                        "$add$2": {
                            "type": "$add",
                            "connections": { "A": [3, 4, 5, 6], "B": ["1"], "Y": [7, 8, 9, 10] }
                        }
                    },
                    "netnames": {
                        "clk": { "hide_name": 0, "bits": [2] },
                        "count": { "hide_name": 0, "bits": [3, 4, 5, 6] },
                        "next": { "hide_name": 0, "bits": [7, 8, 9, 10] },
                        "$add$2_Y": { "hide_name": 1, "bits": [7, 8, 9, 10] },
                        "tie": { "hide_name": 0, "bits": ["0", "1"] }
                    }
                }
            }
        })
    }

    #[test]
    fn classifies_storage_and_nets() {
        let registry = CandidateRegistry::from_json(&counter().to_string(), None).unwrap();

        assert_eq!(registry.len(), 2);
        let count = registry.get("counter.count").unwrap();
        assert_eq!(count.class(), SignalClass::StorageElement);
        assert_eq!(count.width(), 4);
        let next = registry.get("counter.next").unwrap();
        assert_eq!(next.class(), SignalClass::CombinationalNet);
        assert_eq!(next.module(), "counter");
    }

    #[test]
    fn clock_only_nets_and_constants_are_skipped() {
        let registry = CandidateRegistry::from_json(&counter().to_string(), None).unwrap();

        assert!(registry.get("counter.clk").is_none());
        assert!(registry.get("counter.tie").is_none());
        assert!(registry.get("counter.$add$2_Y").is_none());
    }

    #[test]
    fn tied_bits_are_kept_out_of_injection() {
        let json = json!({
            "modules": { "m": {
                "cells": {
                    "g": { "type": "$and", "connections": { "A": [5], "B": [6], "Y": [7] } }
                },
                "netnames": { "mixed": { "hide_name": 0, "bits": ["0", 5, "1", 7] } }
            } }
        });
        let registry = CandidateRegistry::from_json(&json.to_string(), Some("m")).unwrap();

        let mixed = registry.get("m.mixed").unwrap();
        assert_eq!(mixed.width(), 4);
        assert!(mixed.is_constant_bit(0));
        assert!(!mixed.is_constant_bit(1));
        assert_eq!(mixed.injectable_bits().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn explicit_top_must_exist() {
        let result = CandidateRegistry::from_json(&counter().to_string(), Some("uart"));
        assert_eq!(result.unwrap_err(), ParseError::TopModuleNotFound("uart".to_string()));
    }

    #[test]
    fn missing_top_attribute_is_an_error() {
        let json = json!({ "modules": { "m": { "netnames": {} } } });
        let result = CandidateRegistry::from_json(&json.to_string(), None);
        assert_eq!(result.unwrap_err(), ParseError::NoTopModule);
    }

    #[test]
    fn unresolvable_bit_is_rejected() {
        let json = json!({
            "modules": { "m": { "netnames": { "n": { "hide_name": 0, "bits": [1, "q"] } } } }
        });
        let result = CandidateRegistry::from_json(&json.to_string(), Some("m"));
        assert!(matches!(result, Err(ParseError::UnresolvableBit { bit, .. }) if bit == "q"));
    }

    #[test]
    fn flip_flop_without_q_is_rejected() {
        let json = json!({
            "modules": { "m": {
                "cells": { "ff": { "type": "$_DFF_P_", "connections": { "C": [1], "D": [2] } } }
            } }
        });
        let result = CandidateRegistry::from_json(&json.to_string(), Some("m"));
        assert!(matches!(result, Err(ParseError::MissingPort { port, .. }) if port == "Q"));
    }

    #[test]
    fn hierarchy_prefixes_instance_names() {
        let json = json!({
            "modules": {
                "top": {
                    "attributes": { "top": 1 },
                    "cells": { "u_cnt": { "type": "leaf", "connections": { "q": [5] } } },
                    "netnames": { "q_out": { "hide_name": 0, "bits": [5] } }
                },
                "leaf": {
                    "ports": { "q": { "direction": "output", "bits": [2] } },
                    "cells": {
                        "ff": { "type": "$dff", "connections": { "CLK": [1], "D": [3], "Q": [2] } }
                    },
                    "netnames": {
                        "q": { "hide_name": 0, "bits": [2] },
                        "d": { "hide_name": 0, "bits": [3] }
                    }
                }
            }
        });
        let registry = CandidateRegistry::from_json(&json.to_string(), None).unwrap();

        let q = registry.get("top.u_cnt.q").unwrap();
        assert_eq!(q.class(), SignalClass::StorageElement);
        assert_eq!(q.segments(), ["top", "u_cnt", "q"]);
        assert_eq!(q.module(), "leaf");
        assert!(registry.get("top.u_cnt.d").is_some());
        assert!(registry.get("top.q_out").is_some());
    }

    #[test]
    fn instance_port_must_exist_on_definition() {
        let json = json!({
            "modules": {
                "top": { "cells": { "u": { "type": "leaf", "connections": { "nope": [1] } } } },
                "leaf": { "ports": { "a": { "direction": "input", "bits": [2] } } }
            }
        });
        let result = CandidateRegistry::from_json(&json.to_string(), Some("top"));
        assert!(matches!(result, Err(ParseError::MissingPort { port, .. }) if port == "nope"));
    }

    #[test]
    fn recursive_instantiation_is_rejected() {
        let json = json!({
            "modules": {
                "loop": { "cells": { "self_inst": { "type": "loop", "connections": {} } } }
            }
        });
        let result = CandidateRegistry::from_json(&json.to_string(), Some("loop"));
        assert_eq!(result.unwrap_err(), ParseError::RecursiveInstance("loop".to_string()));
    }

    #[test]
    fn technology_flip_flops_can_be_registered() {
        let json = json!({
            "modules": { "m": {
                "cells": {
                    "r": { "type": "DFFR_X1", "connections": { "CK": [1], "D": [2], "Q": [3] } }
                },
                "netnames": { "state": { "hide_name": 0, "bits": [3] } }
            } }
        });
        let parser = NetlistParser::new().with_top("m");
        let plain = parser.parse_str(&json.to_string()).unwrap();
        assert_eq!(plain.get("m.state").unwrap().class(), SignalClass::CombinationalNet);

        let tech = parser.with_storage_cell("DFFR_X1").parse_str(&json.to_string()).unwrap();
        assert_eq!(tech.get("m.state").unwrap().class(), SignalClass::StorageElement);
    }
}
