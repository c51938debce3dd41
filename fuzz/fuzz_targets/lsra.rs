#![no_main]
use libfuzzer_sys::fuzz_target;

use ssa_regalloc::{allocate_registers, RegAllocError, RegAllocOptions};
use ssara::fuzzing::FuzzingGraph;
use ssara::validator::validate;

static mut COUNTER_GEN: usize = 0;
static mut COUNTER_OK: usize = 0;

fuzz_target!(|input: FuzzingGraph| {
    let (num_gen, num_ok) = unsafe {
        COUNTER_GEN += 1;
        (COUNTER_GEN, COUNTER_OK)
    };

    println!(
        "=== status: #ok/#total: {}/{} == {} ",
        num_ok,
        num_gen,
        100.0 * (num_ok as f64) / (num_gen as f64)
    );

    let mut graph = input.graph;
    if let Err(err) = validate(&graph) {
        println!("{}", graph);
        panic!("lsra.rs: malformed input graph: {}", err);
    }
    let original_graph = graph.clone();

    let options = RegAllocOptions {
        run_verifier: true,
        ..RegAllocOptions::default()
    };

    match allocate_registers(&mut graph, &options) {
        Ok(_) => unsafe {
            COUNTER_OK += 1;
        },
        Err(err) => {
            if let RegAllocError::Verifier(_) = &err {
                println!("{}", original_graph);
                panic!("lsra.rs: checker error: {}", err);
            }
            println!("allocation error: {}", err);
        }
    }
});
