/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Rewriting of the instruction stream once every interval has a location:
//! each instruction learns where its inputs are read from and its results
//! written to, and calls get the moves the calling convention asks for.
//!
//! Stack arguments of a call are copied to the outgoing argument area, made
//! of the stack parameter slots following the incoming parameters of the
//! function, unless the value is already in memory: it is then passed from
//! there.

use log::{debug, info, trace};
use smallvec::SmallVec;

use crate::analysis::Liveness;
use crate::data_structures::{InstId, ValueId};
use crate::interface::RegAllocError;
use crate::ir::{Graph, Inst, SpillFillInst, SpillFillKind};
use crate::location::Location;
use crate::target::TargetInfo;

//=============================================================================
// Edits

/// A spill-fill to place next to an instruction.
#[derive(Clone, Debug)]
pub(crate) struct InstToInsert {
  anchor: InstId,
  before: bool,
  spill_fill: SpillFillInst,
}

/// Location of the value at its definition.
fn root_location(liveness: &Liveness, value: ValueId) -> Result<Location, RegAllocError> {
  liveness
    .interval(value)
    .map(|root| liveness.intervals[root].location())
    .filter(|loc| !loc.is_invalid())
    .ok_or_else(|| RegAllocError::Other(format!("{} was not allocated", value)))
}

fn apply_phi(
  graph: &mut Graph, liveness: &Liveness, id: InstId,
) -> Result<(), RegAllocError> {
  let result = graph.insts[id].results[0];
  let location = root_location(liveness, result)?;
  let inst = &mut graph.insts[id];
  inst.result_locations = SmallVec::from_elem(location, 1);
  inst.input_locations = SmallVec::from_elem(location, inst.inputs.len());
  Ok(())
}

fn apply_inst(
  graph: &mut Graph, liveness: &Liveness, target: &TargetInfo, id: InstId,
  edits: &mut Vec<InstToInsert>,
) -> Result<(), RegAllocError> {
  let ln = liveness
    .inst_ln(id)
    .ok_or_else(|| RegAllocError::Other(format!("{} has no life number", id)))?;

  // Where each input lives right before the instruction.
  let mut input_locations: SmallVec<[Location; 4]> = SmallVec::new();
  for &input in &graph.insts[id].inputs {
    let location = liveness.location_at(input, ln - 1).ok_or_else(|| {
      RegAllocError::Other(format!("{} is not live at {} ({})", input, ln - 1, id))
    })?;
    input_locations.push(location);
  }

  let mut result_locations: SmallVec<[Location; 2]> = SmallVec::new();
  if graph.insts[id].is_call() {
    let cc = target
      .calling_convention()
      .ok_or(RegAllocError::BackendUnsupported(graph.arch))?;
    let inst = &graph.insts[id];
    let types: Vec<_> = inst.inputs.iter().map(|&v| graph.value_type(v)).collect();

    let mut fills = SpillFillInst::new(SpillFillKind::InputFill);
    for (k, param) in cc.param_locations(&types).into_iter().enumerate() {
      let dst = if param.is_any_register() {
        param
      } else if input_locations[k].is_memory() {
        // The argument moves never write memory the value may already be in.
        continue;
      } else {
        // The outgoing argument area follows the incoming parameters.
        Location::stack_parameter(graph.num_stack_params + param.value())
      };
      if input_locations[k] != dst {
        fills.add(input_locations[k], dst, types[k]);
      }
      input_locations[k] = dst;
    }
    if !fills.is_empty() {
      trace!("{}: argument moves {:?}", id, fills.moves());
      edits.push(InstToInsert { anchor: id, before: true, spill_fill: fills });
    }

    if let Some(&result) = inst.results.first() {
      let ret = cc.return_location(inst.ty);
      let location = root_location(liveness, result)?;
      if location != ret {
        let mut spill = SpillFillInst::new(SpillFillKind::ResultSpill);
        spill.add(ret, location, inst.ty);
        edits.push(InstToInsert { anchor: id, before: false, spill_fill: spill });
      }
      result_locations.push(ret);
    }
  } else {
    for &result in &graph.insts[id].results {
      result_locations.push(root_location(liveness, result)?);
    }
  }

  let inst = &mut graph.insts[id];
  inst.input_locations = input_locations;
  inst.result_locations = result_locations;
  Ok(())
}

/// Writes the allocated locations into the instructions of `graph`, and adds
/// the argument and result moves of calls.
#[inline(never)]
pub(crate) fn apply_locations(
  graph: &mut Graph, liveness: &Liveness, target: &TargetInfo,
) -> Result<(), RegAllocError> {
  info!("apply_locations: begin");

  let mut edits = Vec::new();
  for &block in &liveness.linear_order {
    let insts = graph.blocks[block].insts.clone();
    for id in insts {
      if graph.insts[id].is_phi() {
        apply_phi(graph, liveness, id)?;
      } else {
        apply_inst(graph, liveness, target, id, &mut edits)?;
      }
    }
  }

  let (mut num_fills, mut num_spills) = (0, 0);
  for edit in edits {
    let kind = edit.spill_fill.kind();
    if edit.before {
      num_fills += edit.spill_fill.moves().len();
    } else {
      num_spills += edit.spill_fill.moves().len();
    }
    let block = graph.insts[edit.anchor].block;
    let mut inst = Inst::new_spill_fill(block, kind);
    inst.spill_fill = Some(edit.spill_fill);
    if edit.before {
      graph.insert_before(edit.anchor, inst);
    } else {
      graph.insert_after(edit.anchor, inst);
    }
  }

  debug!("apply_locations: {} argument moves, {} result moves", num_fills, num_spills);
  info!("apply_locations: end");
  Ok(())
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::analysis::LivenessAnalyzer;
  use crate::data_structures::DataType;
  use crate::interface::RegAllocOptions;
  use crate::ir::Opcode;
  use crate::linear_scan;
  use crate::target::Arch;

  const I64: DataType = DataType::Int64;

  fn apply(graph: &mut Graph) -> Liveness {
    let target = TargetInfo::new(graph.arch);
    let mut liveness = LivenessAnalyzer::run(graph, &target);
    let frame =
      linear_scan::run(graph, &mut liveness, &target, &RegAllocOptions::default()).unwrap();
    graph.immediates = frame.immediates;
    graph.num_stack_slots = frame.num_stack_slots;
    graph.num_stack_params = frame.num_stack_params;
    graph.num_stack_args = frame.num_stack_args;
    apply_locations(graph, &liveness, &target).unwrap();
    liveness
  }

  fn spill_fills(graph: &Graph, kind: SpillFillKind) -> Vec<InstId> {
    graph.blocks[graph.entry]
      .insts
      .iter()
      .copied()
      .filter(|&i| graph.insts[i].spill_fill_kind() == Some(kind))
      .collect()
  }

  #[test]
  fn swapped_call_arguments() {
    let mut g = Graph::new("swap_args", Arch::Aarch64);
    let entry = g.entry;
    let a = g.param(I64);
    let b = g.param(I64);
    let r = g.call(entry, 3, I64, &[b, a]).unwrap();
    g.ret(entry, r);
    apply(&mut g);

    let call = g.values[r].def;
    assert_eq!(
      g.insts[call].input_locations.as_slice(),
      &[Location::register(0), Location::register(1)]
    );
    let fills = spill_fills(&g, SpillFillKind::InputFill);
    assert_eq!(fills.len(), 1);
    let pos = g.position_in_block(fills[0]);
    assert_eq!(g.blocks[entry].insts[pos + 1], call);
    let moves = g.insts[fills[0]].spill_fill.as_ref().unwrap().moves().to_vec();
    assert_eq!(moves.len(), 2);
    assert!(moves.iter().all(|m| m.src != m.dst));
  }

  #[test]
  fn call_result_moved_out_of_return_register() {
    let mut g = Graph::new("results", Arch::Aarch64);
    let entry = g.entry;
    let r1 = g.call(entry, 1, I64, &[]).unwrap();
    let r2 = g.call(entry, 2, I64, &[]).unwrap();
    let s = g.binary(entry, Opcode::Add, r1, r2);
    g.ret(entry, s);
    let liveness = apply(&mut g);

    let first = g.values[r1].def;
    assert_eq!(g.insts[first].result_locations.as_slice(), &[Location::register(0)]);
    let spills = spill_fills(&g, SpillFillKind::ResultSpill);
    assert_eq!(spills.len(), 1);
    assert_eq!(g.position_in_block(spills[0]), g.position_in_block(first) + 1);
    let sf = g.insts[spills[0]].spill_fill.as_ref().unwrap();
    let root = liveness.interval(r1).unwrap();
    assert_eq!(sf.moves()[0].src, Location::register(0));
    assert_eq!(sf.moves()[0].dst, liveness.intervals[root].location());
  }

  #[test]
  fn phi_inputs_use_phi_location() {
    let mut g = Graph::new("phi", Arch::X86_64);
    let entry = g.entry;
    let left = g.add_block();
    let right = g.add_block();
    let join = g.add_block();
    g.add_edge(entry, left);
    g.add_edge(entry, right);
    g.add_edge(left, join);
    g.add_edge(right, join);
    let p = g.param(I64);
    let q = g.param(I64);
    g.append(entry, Opcode::If(crate::ir::CondCode::Lt), I64, &[p, q]);
    let x = g.binary(left, Opcode::Add, p, q);
    let y = g.binary(right, Opcode::Sub, p, q);
    let phi = g.phi(join, I64, &[x, y]);
    g.ret(join, phi);
    apply(&mut g);

    let inst = &g.insts[g.values[phi].def];
    let loc = inst.result_locations[0];
    assert!(!loc.is_invalid());
    assert_eq!(inst.input_locations.as_slice(), &[loc, loc]);
  }

  #[test]
  fn stack_arguments_go_to_the_outgoing_area() {
    let mut g = Graph::new("many_args", Arch::Aarch32);
    let entry = g.entry;
    let params: Vec<ValueId> = (0..6).map(|_| g.param(DataType::Int32)).collect();
    let args: Vec<ValueId> = params.iter().rev().copied().collect();
    let r = g.call(entry, 6, DataType::Int32, &args).unwrap();
    g.ret(entry, r);
    apply(&mut g);

    // Two incoming parameters on the stack, followed by two outgoing ones.
    assert_eq!((g.num_stack_params, g.num_stack_args), (2, 2));
    let call = g.values[r].def;
    let locs = &g.insts[call].input_locations;
    let regs: Vec<Location> = (0..4).map(Location::register).collect();
    assert_eq!(&locs[..4], regs.as_slice());
    assert_eq!(&locs[4..], &[Location::stack_parameter(2), Location::stack_parameter(3)]);

    // The registers of the last two arguments are read before being reused.
    let fills = spill_fills(&g, SpillFillKind::InputFill);
    assert_eq!(fills.len(), 1);
    let moves = g.insts[fills[0]].spill_fill.as_ref().unwrap().moves().to_vec();
    assert!(moves
      .iter()
      .any(|m| m.src == Location::register(1) && m.dst == Location::stack_parameter(2)));
    assert!(moves
      .iter()
      .any(|m| m.src == Location::register(0) && m.dst == Location::stack_parameter(3)));
  }

  #[test]
  fn spilled_stack_argument_passed_in_place() {
    let mut g = Graph::new("in_place", Arch::Aarch32);
    let entry = g.entry;
    let params: Vec<ValueId> = (0..6).map(|_| g.param(DataType::Int32)).collect();
    let r = g.call(entry, 2, DataType::Int32, &params).unwrap();
    g.ret(entry, r);
    apply(&mut g);

    // The last two parameters arrive on the stack and stay there.
    let call = g.values[r].def;
    let locs = &g.insts[call].input_locations;
    assert_eq!(&locs[4..], &[Location::stack_parameter(0), Location::stack_parameter(1)]);
    let fills = spill_fills(&g, SpillFillKind::InputFill);
    assert!(fills.iter().all(|&id| {
      let sf = g.insts[id].spill_fill.as_ref().unwrap();
      sf.moves().iter().all(|m| !m.dst.is_stack_parameter())
    }));
  }
}
