#![no_main]
use libfuzzer_sys::fuzz_target;

use ssara::fuzzing::FuzzingGraph;
use ssara::validator::validate;

fuzz_target!(|input: FuzzingGraph| {
    // Generated graphs are well-formed by construction.
    if let Err(err) = validate(&input.graph) {
        println!("{}", input.graph);
        panic!("validation error: {}", err);
    }
});
