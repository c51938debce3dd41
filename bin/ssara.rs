/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! A driver to run the register allocator on the named test programs, and to
//! check that allocation preserves their behavior.

use std::fs::File;
use std::io::{BufReader, BufWriter};

use clap;
use log::{error, info};
use pretty_env_logger;
use serde::{Deserialize, Serialize};

use ssa_regalloc::{
  allocate_registers, verify_allocation, Arch, Graph, RegAllocOptions,
  RegClass, TargetInfo,
};
use ssara::test_cases::{all_test_names, find_graph};
use ssara::test_framework::{run_graph, RunStage};
use ssara::validator::{check_results, validate};

/// An allocated graph, as written by `--save`.
#[derive(Serialize, Deserialize)]
struct SavedRun {
  graph: Graph,
  args: Vec<i64>,
}

/// Options using the `count` lowest allocatable registers of each class, or
/// all of them.
fn make_options(
  arch: Arch, num_regs: Option<u32>, num_fp_regs: Option<u32>,
) -> RegAllocOptions {
  let target = TargetInfo::new(arch);
  RegAllocOptions {
    available_register_mask: num_regs
      .map(|n| target.allocatable_mask(RegClass::Int).truncate(n)),
    available_float_register_mask: num_fp_regs
      .map(|n| target.allocatable_mask(RegClass::Float).truncate(n)),
    run_verifier: true,
    ..RegAllocOptions::default()
  }
}

//=============================================================================
// Top level

fn main() {
  pretty_env_logger::init();

  let app = clap::App::new("ssara")
    .about("a simple program to allow separate testing of the SSA register allocator")
    .arg(
      clap::Arg::new("iregs")
        .short('i')
        .takes_value(true)
        .help("number of integer registers available (all if not set)"),
    )
    .arg(
      clap::Arg::new("fregs")
        .short('f')
        .takes_value(true)
        .help("number of floating-point registers available (all if not set)"),
    )
    .arg(
      clap::Arg::new("slots")
        .short('s')
        .takes_value(true)
        .help("stack slot budget"),
    )
    .arg(
      clap::Arg::new("arch")
        .short('a')
        .takes_value(true)
        .possible_values(["aarch64", "x86_64", "aarch32", "none"])
        .default_value("aarch64")
        .help("target architecture"),
    )
    .arg(
      clap::Arg::new("test")
        .short('t')
        .takes_value(true)
        .required_unless_present_any(["load", "list"])
        .help("test case name"),
    )
    .arg(
      clap::Arg::new("save")
        .long("save")
        .takes_value(true)
        .help("file to write the allocated graph to"),
    )
    .arg(
      clap::Arg::new("load")
        .long("load")
        .takes_value(true)
        .conflicts_with("test")
        .help("file to read an allocated graph from, to check and run it"),
    )
    .arg(clap::Arg::new("list").long("list").help("list the test cases"));
  let matches = app.get_matches();

  if matches.is_present("list") {
    for name in all_test_names() {
      println!("{}", name);
    }
    return;
  }

  if let Some(path) = matches.value_of("load") {
    load(path);
    return;
  }

  let arch = match matches.value_of("arch").and_then(Arch::from_name) {
    Some(arch) => arch,
    None => {
      println!("invalid architecture: {}", matches.value_of("arch").unwrap_or(""));
      return;
    }
  };

  let parse = |name: &str| matches.value_of(name).map(|v| v.parse::<u32>()).transpose();
  let (num_regs, num_fp_regs, budget) =
    match (parse("iregs"), parse("fregs"), parse("slots")) {
      (Ok(i), Ok(f), Ok(s)) => (i, f, s),
      _ => {
        println!("invalid iregs/fregs/slots values");
        return;
      }
    };

  let test_name = matches.value_of("test").unwrap_or("");
  let case = match find_graph(test_name, arch) {
    Ok(case) => case,
    Err(available) => {
      error!("can't find a test case named '{}'", test_name);
      println!("available test cases are:");
      for name in available {
        println!("     {}", name);
      }
      return;
    }
  };
  if let Err(err) = validate(&case.graph) {
    println!("invalid graph: {}", err);
    return;
  }

  let mut options = make_options(arch, num_regs, num_fp_regs);
  if let Some(budget) = budget {
    options.stack_slot_budget = budget;
  }

  let mut graph = case.graph.clone();
  println!("before allocation:\n{}", graph);

  let result = match allocate_registers(&mut graph, &options) {
    Err(e) => {
      println!("allocation failed: {}", e);
      return;
    }
    Ok(r) => r,
  };
  println!("after allocation:\n{}", graph);
  info!("{:?}", result);

  let before = run_graph(&case.graph, "Before allocation", &case.args, RunStage::BeforeRegalloc);
  let after = run_graph(&graph, "After allocation", &case.args, RunStage::AfterRegalloc);
  println!("before: {:?}", before.as_ref().map(|r| r.ret_value));
  println!("after: {:?}", after.as_ref().map(|r| r.ret_value));
  check_results(&before, &after);

  if let Some(path) = matches.value_of("save") {
    let saved = SavedRun { graph, args: case.args };
    let written = File::create(path)
      .map_err(|e| e.to_string())
      .and_then(|file| {
        bincode::serialize_into(BufWriter::new(file), &saved).map_err(|e| e.to_string())
      });
    if let Err(err) = written {
      println!("can't save to {}: {}", path, err);
    }
  }
}

fn load(path: &str) {
  let saved: SavedRun = match File::open(path)
    .map_err(|e| e.to_string())
    .and_then(|file| bincode::deserialize_from(BufReader::new(file)).map_err(|e| e.to_string()))
  {
    Ok(saved) => saved,
    Err(err) => {
      println!("can't load {}: {}", path, err);
      return;
    }
  };
  println!("{}", saved.graph);
  match verify_allocation(&saved.graph) {
    Ok(()) => println!("allocation is valid"),
    Err(errors) => {
      println!("allocation is invalid: {}", errors);
      return;
    }
  }
  match run_graph(&saved.graph, "Loaded", &saved.args, RunStage::AfterRegalloc) {
    Ok(result) => println!("result: {:?}", result.ret_value),
    Err(err) => println!("run failed: {}", err),
  }
}

#[cfg(test)]
mod test_utils {
  use super::*;
  use ssa_regalloc::{RegAllocError, RegAllocResult};

  pub const ARCHES: [Arch; 3] = [Arch::Aarch64, Arch::X86_64, Arch::Aarch32];

  pub fn run_lsra(
    name: &str, arch: Arch, num_regs: Option<u32>,
  ) -> Result<(Graph, RegAllocResult), RegAllocError> {
    let _ = pretty_env_logger::try_init();
    let mut graph = find_graph(name, arch).unwrap().graph;
    let options = make_options(arch, num_regs, num_regs);
    let result = allocate_registers(&mut graph, &options)?;
    Ok((graph, result))
  }

  pub fn check_lsra(name: &str, arch: Arch, num_regs: Option<u32>) -> Graph {
    let _ = pretty_env_logger::try_init();
    let case = find_graph(name, arch).unwrap();
    validate(&case.graph).unwrap();
    let before =
      run_graph(&case.graph, "Before allocation", &case.args, RunStage::BeforeRegalloc);
    assert!(before.is_ok(), "{}: {:?}", name, before);

    let mut graph = case.graph.clone();
    let options = make_options(arch, num_regs, num_regs);
    allocate_registers(&mut graph, &options).unwrap_or_else(|err| {
      panic!("allocation of {} for {} failed: {}", name, arch, err);
    });
    let after = run_graph(&graph, "After allocation", &case.args, RunStage::AfterRegalloc);
    if let Err(err) = &after {
      panic!("{} for {} after allocation: {}\n{}", name, arch, err, graph);
    }
    check_results(&before, &after);
    graph
  }
}


#[test]
fn lsra_straight_line() {
  for &arch in &test_utils::ARCHES {
    test_utils::check_lsra("straight_line", arch, None);
    test_utils::check_lsra("straight_line", arch, Some(4));
  }
}

#[test]
fn lsra_select4() {
  for &arch in &test_utils::ARCHES {
    assert!(test_utils::run_lsra("select4", arch, Some(3)).is_err());
    test_utils::check_lsra("select4", arch, Some(4));
  }
}

#[test]
fn lsra_fill_then_sum() {
  for i in 4..8 {
    test_utils::check_lsra("fill_then_sum", Arch::X86_64, Some(i));
  }
  test_utils::check_lsra("fill_then_sum", Arch::Aarch32, None);
}

#[test]
fn lsra_diamond() {
  for &arch in &test_utils::ARCHES {
    test_utils::check_lsra("diamond", arch, None);
  }
}

#[test]
fn lsra_critical_edge() {
  for &arch in &test_utils::ARCHES {
    test_utils::check_lsra("critical_edge", arch, None);
    test_utils::check_lsra("critical_edge", arch, Some(4));
  }
}

#[test]
fn lsra_swap_loop() {
  for &arch in &test_utils::ARCHES {
    test_utils::check_lsra("swap_loop", arch, None);
    test_utils::check_lsra("swap_loop", arch, Some(5));
  }
}

#[test]
fn lsra_aarch32_keeps_scratch_slot() {
  let (_, result) = test_utils::run_lsra("swap_loop", Arch::Aarch32, None).unwrap();
  assert!(result.num_stack_slots >= 1);
  let (_, result) = test_utils::run_lsra("swap_loop", Arch::Aarch64, None).unwrap();
  assert_eq!(result.num_stack_slots, 0);
}

#[test]
fn lsra_calls() {
  for &arch in &test_utils::ARCHES {
    test_utils::check_lsra("calls", arch, None);
  }
}

#[test]
fn lsra_zero_register_across_call() {
  let graph = test_utils::check_lsra("calls", Arch::Aarch64, None);
  let zero_uses = graph
    .insts
    .iter()
    .filter(|inst| inst.opcode == ssa_regalloc::Opcode::Add)
    .flat_map(|inst| inst.inputs.iter().zip(inst.input_locations.iter()))
    .filter(|&(&v, _)| graph.constant_of(v) == Some(0))
    .map(|(_, &loc)| loc)
    .collect::<Vec<_>>();
  assert!(!zero_uses.is_empty());
  for loc in zero_uses {
    assert_eq!(loc, ssa_regalloc::Location::register(31));
  }
}

#[test]
fn lsra_stack_params() {
  for &arch in &test_utils::ARCHES {
    test_utils::check_lsra("stack_params", arch, None);
  }
}

#[test]
fn lsra_load_pair() {
  for &arch in &test_utils::ARCHES {
    test_utils::check_lsra("load_pair", arch, None);
    test_utils::check_lsra("load_pair", arch, Some(4));
  }
}

#[test]
fn lsra_pressure() {
  for i in 4..8 {
    test_utils::check_lsra("pressure", Arch::X86_64, Some(i));
  }
  test_utils::check_lsra("pressure", Arch::Aarch64, Some(4));
}

#[test]
fn lsra_fp() {
  for &arch in &test_utils::ARCHES {
    test_utils::check_lsra("fp", arch, None);
  }
}

#[test]
fn lsra_nested_loops() {
  for &arch in &test_utils::ARCHES {
    test_utils::check_lsra("nested_loops", arch, None);
  }
  test_utils::check_lsra("nested_loops", Arch::X86_64, Some(4));
}

#[test]
fn lsra_call_loop() {
  for &arch in &test_utils::ARCHES {
    test_utils::check_lsra("call_loop", arch, None);
  }
}

#[test]
fn lsra_sort() {
  for &arch in &test_utils::ARCHES {
    test_utils::check_lsra("sort", arch, None);
  }
  test_utils::check_lsra("sort", Arch::Aarch64, Some(6));
}

#[test]
fn lsra_high_memory() {
  for &arch in &test_utils::ARCHES {
    test_utils::check_lsra("high_memory", arch, None);
  }
}

#[test]
fn lsra_no_backend() {
  let err = test_utils::run_lsra("straight_line", Arch::None, None).unwrap_err();
  assert!(!err.is_structural());
}

#[test]
fn saved_runs_reload() {
  let case = find_graph("swap_loop", Arch::X86_64).unwrap();
  let mut graph = case.graph.clone();
  allocate_registers(&mut graph, &make_options(Arch::X86_64, Some(5), None)).unwrap();
  let saved = SavedRun { graph, args: case.args };
  let bytes = bincode::serialize(&saved).unwrap();
  let loaded: SavedRun = bincode::deserialize(&bytes).unwrap();
  assert!(verify_allocation(&loaded.graph).is_ok());
  let expected = run_graph(&case.graph, "ssa", &loaded.args, RunStage::BeforeRegalloc);
  let observed = run_graph(&loaded.graph, "loaded", &loaded.args, RunStage::AfterRegalloc);
  check_results(&expected, &observed);
}

#[test]
fn lsra_random_graphs() {
  use arbitrary::{Arbitrary, Unstructured};
  use ssara::fuzzing::FuzzingGraph;

  let _ = pretty_env_logger::try_init();
  // xorshift64, so that every run sees the same graphs.
  let mut seed: u64 = 0x5eed_0f_c0ffee;
  let mut num_checked = 0;
  for round in 0..200u32 {
    let bytes: Vec<u8> = (0..4096)
      .map(|_| {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        (seed >> 24) as u8
      })
      .collect();
    let FuzzingGraph { graph, args } =
      match FuzzingGraph::arbitrary(&mut Unstructured::new(&bytes)) {
        Ok(input) => input,
        Err(_) => continue,
      };
    if let Err(err) = validate(&graph) {
      panic!("graph #{} is malformed: {}\n{}", round, err, graph);
    }
    let before = run_graph(&graph, "Before allocation", &args, RunStage::BeforeRegalloc);
    if before.is_err() {
      continue;
    }

    let num_regs = 3 + round % 8;
    let mut allocated = graph.clone();
    let options = make_options(graph.arch, Some(num_regs), Some(num_regs));
    match allocate_registers(&mut allocated, &options) {
      Ok(_) => {}
      Err(err) if err.is_structural() => continue,
      Err(err) => panic!("graph #{} with {} registers: {}\n{}", round, num_regs, err, graph),
    }
    let after = run_graph(&allocated, "After allocation", &args, RunStage::AfterRegalloc);
    if let Err(err) = &after {
      panic!("graph #{} after allocation: {}\n{}", round, err, allocated);
    }
    check_results(&before, &after);
    num_checked += 1;
  }
  assert!(num_checked > 0);
}
