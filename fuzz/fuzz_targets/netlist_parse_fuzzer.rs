//! Fuzz target for `NetlistParser`
//!
//! Arbitrary bytes must never panic the parser. Anything it accepts must
//! describe signals with a dotted path, a non-zero width and at least one bit
//! that is not tied to a constant.

#![no_main]

use libfuzzer_sys::fuzz_target;
use seeframe_core::NetlistParser;

fuzz_target!(|data: &[u8]| {
    let Ok(registry) = NetlistParser::new().parse_slice(data) else {
        return;
    };

    for signal in registry.iter() {
        assert!(signal.width() > 0, "zero-width signal {}", signal.path());
        assert_eq!(signal.path(), signal.segments().join("."));
        assert!(signal.injectable_bits().next().is_some(), "all-constant {}", signal.path());
    }
});
