//! Netlists and registries shared by the test suites.

use seeframe_core::{CandidateRegistry, CandidateSignal, SignalClass};
use serde_json::{Value, json};

/// Small design with three registers and five combinational nets.
///
/// ```text
/// CLK_sync, state, flag   $dff outputs           (StorageElement)
/// d_sync, d_state, d_flag flip-flop D inputs     (CombinationalNet)
/// out, tx                 output logic           (CombinationalNet)
/// clk                     clock only, skipped
/// ```
///
/// Excluding `"CLK"` removes exactly one register and leaves 7 eligible
/// signals.
pub fn scenario_netlist() -> String {
    let dff = |d: u64, q: u64| {
        json!({ "type": "$dff", "connections": { "CLK": [2], "D": [d], "Q": [q] } })
    };
    let gate = |ty: &str, a: u64, b: Option<u64>, y: u64| match b {
        Some(b) => json!({ "type": ty, "connections": { "A": [a], "B": [b], "Y": [y] } }),
        None => json!({ "type": ty, "connections": { "A": [a], "Y": [y] } }),
    };

    json!({
        "creator": "Yosys 0.38",
        "modules": {
            "top": {
                "attributes": { "top": "00000000000000000000000000000001" },
                "ports": {
                    "clk": { "direction": "input", "bits": [2] },
                    "tx": { "direction": "output", "bits": [31] }
                },
                "cells": {
                    "$procdff$1": dff(20, 10),
                    "$procdff$2": dff(21, 11),
                    "$procdff$3": dff(22, 12),
                    "$and$4": gate("$and", 10, Some(11), 20),
                    "$not$5": gate("$not", 12, None, 21),
                    "$xor$6": gate("$xor", 10, Some(12), 22),
                    "$or$7": gate("$or", 11, Some(21), 30),
                    "$buf$8": gate("$buf", 30, None, 31)
                },
                "netnames": {
                    "clk": net(&[2]),
                    "CLK_sync": net(&[10]),
                    "state": net(&[11]),
                    "flag": net(&[12]),
                    "d_sync": net(&[20]),
                    "d_state": net(&[21]),
                    "d_flag": net(&[22]),
                    "out": net(&[30]),
                    "tx": net(&[31]),
                    "$auto$hidden": { "hide_name": 1, "bits": [40] }
                }
            }
        }
    })
    .to_string()
}

/// Hierarchical counter: `top` instantiates `counter` twice.
///
/// Each instance has a 4-bit `count` register and a 4-bit `next` net, plus
/// the top-level 1-bit `overflow` net.
pub fn counter_netlist() -> String {
    json!({
        "modules": {
            "top": {
                "attributes": { "top": 1 },
                "ports": { "clk": { "direction": "input", "bits": [2] } },
                "cells": {
                    "u_lo": { "type": "counter", "connections": { "clk": [2], "carry": [3] } },
                    "u_hi": { "type": "counter", "connections": { "clk": [2], "carry": [4] } },
                    "$and$1": { "type": "$and", "connections": { "A": [3], "B": [4], "Y": [5] } }
                },
                "netnames": {
                    "clk": net(&[2]),
                    "lo_carry": net(&[3]),
                    "hi_carry": net(&[4]),
                    "overflow": net(&[5])
                }
            },
            "counter": {
                "ports": {
                    "clk": { "direction": "input", "bits": [2] },
                    "carry": { "direction": "output", "bits": [12] }
                },
                "cells": {
                    "$procdff$1": {
                        "type": "$dff",
                        "connections": { "CLK": [2], "D": [20, 21, 22, 23], "Q": [10, 11, 12, 13] }
                    },
                    "$add$2": {
                        "type": "$add",
                        "connections": { "A": [10, 11, 12, 13], "B": ["1"], "Y": [20, 21, 22, 23] }
                    }
                },
                "netnames": {
                    "clk": net(&[2]),
                    "count": net(&[10, 11, 12, 13]),
                    "next": net(&[20, 21, 22, 23])
                }
            }
        }
    })
    .to_string()
}

fn net(bits: &[u64]) -> Value {
    json!({ "hide_name": 0, "bits": bits })
}

/// Flat registry of `registers` storage elements and `nets` combinational
/// nets, all under `top`, with the given widths cycling.
pub fn flat_registry(registers: usize, nets: usize, widths: &[u32]) -> CandidateRegistry {
    let width = |i: usize| widths.get(i % widths.len().max(1)).copied().unwrap_or(1);
    let regs = (0..registers).map(|i| {
        CandidateSignal::new(
            vec!["top".to_string(), format!("reg{i}")],
            width(i),
            SignalClass::StorageElement,
            "top",
        )
    });
    let wires = (0..nets).map(|i| {
        CandidateSignal::new(
            vec!["top".to_string(), format!("net{i}")],
            width(registers + i),
            SignalClass::CombinationalNet,
            "top",
        )
    });
    CandidateRegistry::from_signals(regs.chain(wires))
}
