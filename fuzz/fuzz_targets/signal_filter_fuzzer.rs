//! Fuzz target for name-based signal filtering
//!
//! # Invariants
//!
//! - Every eligible path contains an include pattern (when any are given)
//! - No eligible path contains an exclude pattern
//! - Eligible signals keep registry order
//! - An empty result is reported as an error, never as an empty set

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use seeframe_core::{CandidateRegistry, CandidateSignal, SignalClass, SignalFilter};

#[derive(Debug, Arbitrary)]
struct Input {
    signals: Vec<(Vec<String>, u8, bool)>,
    include: Vec<String>,
    exclude: Vec<String>,
    max_width: Option<u8>,
}

fuzz_target!(|input: Input| {
    let registry = CandidateRegistry::from_signals(input.signals.iter().filter_map(
        |(segments, width, storage)| {
            if segments.is_empty() || *width == 0 {
                return None;
            }
            let class =
                if *storage { SignalClass::StorageElement } else { SignalClass::CombinationalNet };
            Some(CandidateSignal::new(segments.clone(), u32::from(*width), class, "top"))
        },
    ));

    let filter = SignalFilter::new()
        .include(input.include.iter().cloned())
        .exclude(input.exclude.iter().cloned())
        .max_width(input.max_width.map(u32::from));

    let Ok(eligible) = filter.apply(&registry) else {
        assert!(registry.iter().all(|signal| !filter.is_eligible(signal)));
        return;
    };

    assert!(!eligible.is_empty());
    let mut last = None;
    for (id, signal) in eligible.iter() {
        let path = signal.path();
        assert!(
            input.include.is_empty() || input.include.iter().any(|p| path.contains(p.as_str()))
        );
        assert!(!input.exclude.iter().any(|p| path.contains(p.as_str())));
        assert!(last < Some(id));
        last = Some(id);
    }
});
