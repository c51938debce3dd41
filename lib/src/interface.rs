/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! This is the top level interface for the regalloc library.
//!
//! The allocator works on a `Graph` in SSA form. Given options describing the
//! registers and stack slots it may use, `allocate_registers` assigns every
//! value a location, writes those locations into the instructions, and inserts
//! the spill-fill instructions needed to move values between locations. Once
//! it returns successfully, every spill-fill is an ordered sequence of moves.

use log::{info, warn};

use std::error::Error;
use std::fmt;

use crate::analysis::LivenessAnalyzer;
use crate::checker::{verify_allocation, CheckerErrors};
use crate::data_structures::{RegClass, RegMask};
use crate::inst_stream::apply_locations;
use crate::ir::Graph;
use crate::linear_scan;
use crate::spill_fills_resolver::SpillFillsResolver;
use crate::split_resolver::SplitResolver;
use crate::target::{Arch, TargetInfo};

//=============================================================================
// Options and results

/// Options controlling a run of the allocator.
#[derive(Clone, Debug)]
pub struct RegAllocOptions {
  /// General purpose registers the allocator may use, restricted to the
  /// allocatable registers of the target. `None` stands for all of them.
  pub available_register_mask: Option<RegMask>,
  /// Same as `available_register_mask`, for floating-point registers.
  pub available_float_register_mask: Option<RegMask>,
  /// Number of stack slots the frame may hold.
  pub stack_slot_budget: u32,
  /// When false, running out of registers or stack slots is fatal.
  pub allow_backend_failures: bool,
  /// Run the checker on the result.
  pub run_verifier: bool,
}

impl Default for RegAllocOptions {
  fn default() -> Self {
    Self {
      available_register_mask: None,
      available_float_register_mask: None,
      stack_slot_budget: 256,
      allow_backend_failures: true,
      run_verifier: cfg!(debug_assertions),
    }
  }
}

/// A structure with which the client can learn about the allocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegAllocResult {
  /// Number of stack slots of the frame, the cycle-breaking one included.
  pub num_stack_slots: u32,
  /// Number of incoming parameters passed on the stack.
  pub num_stack_params: u32,
  /// Stack parameter slots holding the outgoing arguments of calls.
  pub num_stack_args: u32,
  /// Number of intervals sent to memory.
  pub num_spilled: u32,
  /// Number of spill-fill instructions in the graph.
  pub num_spill_fills: usize,
  /// Number of blocks added on critical edges.
  pub num_edge_blocks: usize,
}

#[derive(Clone, Debug)]
pub enum RegAllocError {
  /// The target has no calling convention, so no code can be generated for it.
  BackendUnsupported(Arch),
  /// An instruction needs more registers of the class than available.
  OutOfRegisters(RegClass),
  /// More stack slots than the budget are needed.
  OutOfStackSlots(u32),
  /// The allocation was found invalid.
  Verifier(CheckerErrors),
  /// The graph is malformed.
  Other(String),
}

impl RegAllocError {
  /// Whether allocation failed because of the constraints, the graph being
  /// otherwise fine. Such failures are recoverable: allocating again with
  /// more registers or stack slots may succeed.
  pub fn is_structural(&self) -> bool {
    matches!(self, RegAllocError::OutOfRegisters(_) | RegAllocError::OutOfStackSlots(_))
  }
}

impl fmt::Display for RegAllocError {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      RegAllocError::BackendUnsupported(arch) => {
        write!(fmt, "no code generation support for {}", arch)
      }
      RegAllocError::OutOfRegisters(class) => write!(fmt, "out of {} registers", class),
      RegAllocError::OutOfStackSlots(budget) => {
        write!(fmt, "more than {} stack slots needed", budget)
      }
      RegAllocError::Verifier(errors) => write!(fmt, "checker failed: {}", errors),
      RegAllocError::Other(msg) => write!(fmt, "{}", msg),
    }
  }
}

impl Error for RegAllocError {}

//=============================================================================
// Entry point

/// Allocate registers for `graph`.
///
/// On success the graph is rewritten in place: every instruction carries the
/// locations of its inputs and results, spill-fills connect the locations a
/// value moves between, and `graph.num_stack_slots`, `graph.num_stack_params`,
/// `graph.num_stack_args` and `graph.immediates` describe the frame. On
/// failure the instructions are left untouched, except when the checker
/// rejects the result.
///
/// # Panics
///
/// When `allow_backend_failures` is false and the allocation fails for lack of
/// registers or stack slots.
pub fn allocate_registers(
  graph: &mut Graph, options: &RegAllocOptions,
) -> Result<RegAllocResult, RegAllocError> {
  match allocate(graph, options) {
    Err(err) if err.is_structural() && !options.allow_backend_failures => {
      panic!("register allocation failed for {}: {}", graph.name, err)
    }
    Err(err) => {
      warn!("register allocation failed for {}: {}", graph.name, err);
      Err(err)
    }
    ok => ok,
  }
}

fn allocate(
  graph: &mut Graph, options: &RegAllocOptions,
) -> Result<RegAllocResult, RegAllocError> {
  info!("allocate_registers: begin for {} ({})", graph.name, graph.arch);
  let target = TargetInfo::new(graph.arch);
  if target.calling_convention().is_none() {
    return Err(RegAllocError::BackendUnsupported(graph.arch));
  }

  let mut liveness = LivenessAnalyzer::run(graph, &target);
  let frame = linear_scan::run(graph, &mut liveness, &target, options)?;

  graph.immediates = frame.immediates.clone();
  graph.num_stack_slots = frame.num_stack_slots;
  graph.num_stack_params = frame.num_stack_params;
  graph.num_stack_args = frame.num_stack_args;
  apply_locations(graph, &liveness, &target)?;

  let num_edge_blocks = SplitResolver::new(&liveness).run(graph);
  let num_spill_fills = SpillFillsResolver::new(graph, &target).run(graph);

  if options.run_verifier {
    verify_allocation(graph).map_err(RegAllocError::Verifier)?;
  }

  let result = RegAllocResult {
    num_stack_slots: frame.num_stack_slots,
    num_stack_params: frame.num_stack_params,
    num_stack_args: frame.num_stack_args,
    num_spilled: frame.num_spilled,
    num_spill_fills,
    num_edge_blocks,
  };
  info!("allocate_registers: end, {:?}", result);
  Ok(result)
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::data_structures::DataType;
  use crate::ir::{CondCode, Opcode};

  const I64: DataType = DataType::Int64;

  fn select(arch: Arch) -> Graph {
    let mut g = Graph::new("select", arch);
    let entry = g.entry;
    let p = g.param(I64);
    let vals: Vec<_> = (0..4)
      .map(|i| {
        let c = g.constant(entry, I64, i + 2);
        g.binary(entry, Opcode::Add, p, c)
      })
      .collect();
    let sel = g.value(entry, Opcode::Select(CondCode::Eq), I64, &vals);
    g.ret(entry, sel);
    g
  }

  #[test]
  fn unsupported_backend() {
    let mut g = select(Arch::None);
    let err = allocate_registers(&mut g, &RegAllocOptions::default()).unwrap_err();
    assert!(matches!(err, RegAllocError::BackendUnsupported(Arch::None)));
    assert!(!err.is_structural());
  }

  #[test]
  fn recoverable_failure() {
    let mut g = select(Arch::Aarch64);
    let options = RegAllocOptions {
      available_register_mask: Some(RegMask::first(3)),
      ..RegAllocOptions::default()
    };
    let err = allocate_registers(&mut g, &options).unwrap_err();
    assert!(err.is_structural());
    assert_eq!(err.to_string(), "out of int registers");
  }

  #[test]
  #[should_panic(expected = "register allocation failed")]
  fn fatal_failure() {
    let mut g = select(Arch::Aarch64);
    let options = RegAllocOptions {
      available_register_mask: Some(RegMask::first(3)),
      allow_backend_failures: false,
      ..RegAllocOptions::default()
    };
    let _ = allocate_registers(&mut g, &options);
  }

  #[test]
  fn result_describes_frame() {
    let mut g = select(Arch::Aarch32);
    let options = RegAllocOptions { run_verifier: true, ..RegAllocOptions::default() };
    let result = allocate_registers(&mut g, &options).unwrap();
    // Slot 0 is kept for move cycles on targets without scratch registers.
    assert!(result.num_stack_slots >= 1);
    assert_eq!(g.num_stack_slots, result.num_stack_slots);
    assert_eq!(result.num_edge_blocks, 0);
  }
}
