#![no_main]
use libfuzzer_sys::fuzz_target;

use ssa_regalloc::{allocate_registers, RegAllocError, RegAllocOptions, RegClass, TargetInfo};
use ssara::fuzzing::FuzzingGraph;
use ssara::test_framework::{run_graph, RunStage};
use ssara::validator::{check_results, validate};

fuzz_target!(|input: (FuzzingGraph, u8, u8)| {
    let (FuzzingGraph { mut graph, args }, iregs, fregs) = input;
    if let Err(err) = validate(&graph) {
        println!("{}", graph);
        panic!("lsra_differential.rs: malformed input graph: {}", err);
    }

    let expected = run_graph(&graph, "Before allocation", &args, RunStage::BeforeRegalloc);
    if expected.is_err() {
        return;
    }
    println!("before allocation:\n{}", graph);

    // Between 3 registers per class and all of them.
    let target = TargetInfo::new(graph.arch);
    let options = RegAllocOptions {
        available_register_mask: Some(
            target.allocatable_mask(RegClass::Int).truncate(3 + u32::from(iregs % 14)),
        ),
        available_float_register_mask: Some(
            target.allocatable_mask(RegClass::Float).truncate(3 + u32::from(fregs % 14)),
        ),
        run_verifier: true,
        ..RegAllocOptions::default()
    };

    if let Err(err) = allocate_registers(&mut graph, &options) {
        if let RegAllocError::Verifier(_) = &err {
            panic!("lsra_differential.rs: checker error: {}", err);
        }
        println!("allocation error: {}", err);
        return;
    }
    println!("after allocation:\n{}", graph);

    let observed = run_graph(&graph, "After allocation", &args, RunStage::AfterRegalloc);
    check_results(&expected, &observed);
});
