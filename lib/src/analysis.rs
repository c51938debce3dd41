/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Liveness analysis: linear block order, life numbers, live-in sets and the
//! life intervals the allocator works on.

use log::{debug, info, trace};

use std::collections::VecDeque;

use crate::data_structures::{
  BlockId, DataType, InstId, IntervalId, LifeNumber, Map, RegClass, Set,
  TypedIxVec, ValueId, INVALID_LIFE_NUMBER, LIFE_NUMBER_GAP,
};
use crate::ir::{Graph, Inst, Opcode};
use crate::life_intervals::{Intervals, UsePosition};
use crate::location::Location;
use crate::target::TargetInfo;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockRange {
  pub begin: LifeNumber,
  pub end: LifeNumber,
}

/// Result of the liveness analysis of one graph.
pub struct Liveness {
  /// Reachable blocks in reverse post order.
  pub linear_order: Vec<BlockId>,
  /// `None` for unreachable blocks.
  pub block_ranges: TypedIxVec<BlockId, Option<BlockRange>>,
  inst_lns: TypedIxVec<InstId, LifeNumber>,
  ln_insts: Map<LifeNumber, InstId>,
  /// Values live at the beginning of each block, phi results excluded,
  /// sorted.
  pub live_in: TypedIxVec<BlockId, Vec<ValueId>>,
  pub intervals: Intervals,
  value_intervals: TypedIxVec<ValueId, Option<IntervalId>>,
  /// One interval per caller-saved register, covering every call.
  pub physical: Vec<IntervalId>,
}

impl Liveness {
  /// Life number of an instruction of a reachable block. Phis share the
  /// number of the beginning of their block.
  pub fn inst_ln(&self, inst: InstId) -> Option<LifeNumber> {
    self.inst_lns.get(inst).copied().filter(|&ln| ln != INVALID_LIFE_NUMBER)
  }

  /// The non-phi instruction numbered `ln`.
  pub fn inst_at(&self, ln: LifeNumber) -> Option<InstId> {
    self.ln_insts.get(&ln).copied()
  }

  pub fn block_range(&self, block: BlockId) -> Option<BlockRange> {
    self.block_ranges.get(block).copied().flatten()
  }

  /// The block whose range holds `pos`.
  pub fn block_at(&self, pos: LifeNumber) -> Option<BlockId> {
    let at = self.linear_order.partition_point(|&b| match self.block_range(b) {
      Some(range) => range.end <= pos,
      None => true,
    });
    self.linear_order.get(at).copied().filter(|&b| match self.block_range(b) {
      Some(range) => range.begin <= pos,
      None => false,
    })
  }

  /// Root interval of a value defined in a reachable block.
  pub fn interval(&self, value: ValueId) -> Option<IntervalId> {
    self.value_intervals.get(value).copied().flatten()
  }

  /// Location held by `value` at `pos`, once allocated.
  pub fn location_at(&self, value: ValueId, pos: LifeNumber) -> Option<Location> {
    self.intervals.location_at(self.interval(value)?, pos)
  }
}

//=============================================================================
// Use positions

/// Whether input `index` of `inst` must be read from a register, and the
/// location it had better be in.
fn input_use(inst: &Inst, index: usize, graph: &Graph, target: &TargetInfo) -> (bool, Option<Location>) {
  match inst.opcode {
    Opcode::Phi => (false, None),
    Opcode::Call { .. } => {
      let hint = target.calling_convention().and_then(|cc| {
        let types: Vec<DataType> = inst.inputs.iter().map(|&v| graph.value_type(v)).collect();
        cc.param_locations(&types).get(index).copied()
      });
      (false, hint.filter(|loc| loc.is_any_register()))
    }
    Opcode::Return => {
      let hint = target.calling_convention().map(|cc| cc.return_location(inst.ty));
      (true, hint)
    }
    _ => (true, None),
  }
}

/// Whether the results of `inst` are written to registers, and the location
/// they had better be in.
fn def_use(inst: &Inst, target: &TargetInfo) -> (bool, Option<Location>) {
  match inst.opcode {
    Opcode::Phi | Opcode::Parameter | Opcode::Constant(_) | Opcode::NullPtr => (false, None),
    Opcode::Call { .. } => {
      let hint = target.calling_convention().map(|cc| cc.return_location(inst.ty));
      (false, hint)
    }
    _ => (true, None),
  }
}

//=============================================================================
// Live-in and live-out sets

// Values defined in each block (phi results included), and values read in
// each block before any definition (phi inputs excluded).
#[inline(never)]
fn calc_def_and_use(
  graph: &Graph, order: &[BlockId],
) -> (TypedIxVec<BlockId, Set<ValueId>>, TypedIxVec<BlockId, Set<ValueId>>) {
  let mut def_sets = TypedIxVec::new();
  let mut use_sets = TypedIxVec::new();
  def_sets.resize(graph.blocks.len(), Set::default());
  use_sets.resize(graph.blocks.len(), Set::default());
  for &block in order {
    let mut def = Set::default();
    let mut uce = Set::default();
    for &id in &graph.blocks[block].insts {
      let inst = &graph.insts[id];
      if !inst.is_phi() {
        for &input in &inst.inputs {
          if !def.contains(&input) {
            uce.insert(input);
          }
        }
      }
      def.extend(inst.results.iter().copied());
    }
    def_sets[block] = def;
    use_sets[block] = uce;
  }
  (def_sets, use_sets)
}

/// Inputs of the phis of `succ` flowing along its edges from `pred`.
fn phi_inputs_from(graph: &Graph, pred: BlockId, succ: BlockId) -> Vec<ValueId> {
  let mut inputs = Vec::new();
  for (k, &p) in graph.blocks[succ].preds.iter().enumerate() {
    if p != pred {
      continue;
    }
    for phi in graph.phis(succ) {
      if let Some(&input) = graph.insts[phi].inputs.get(k) {
        inputs.push(input);
      }
    }
  }
  inputs
}

#[inline(never)]
fn calc_livein_and_liveout(
  graph: &Graph, order: &[BlockId], def_sets: &TypedIxVec<BlockId, Set<ValueId>>,
  use_sets: &TypedIxVec<BlockId, Set<ValueId>>,
) -> (TypedIxVec<BlockId, Set<ValueId>>, TypedIxVec<BlockId, Set<ValueId>>) {
  let num_blocks = graph.blocks.len();
  let mut liveins = TypedIxVec::<BlockId, Set<ValueId>>::new();
  let mut liveouts = TypedIxVec::<BlockId, Set<ValueId>>::new();
  liveins.resize(num_blocks, Set::default());
  liveouts.resize(num_blocks, Set::default());

  let mut reachable = vec![false; num_blocks as usize];
  for &block in order {
    reachable[block.get() as usize] = true;
  }

  // Start in post order, then revisit predecessors on demand.
  let mut work_queue: VecDeque<BlockId> = order.iter().rev().copied().collect();
  let mut num_evals = 0;
  while let Some(block) = work_queue.pop_front() {
    num_evals += 1;
    let mut out = Set::default();
    for &succ in &graph.blocks[block].succs {
      out.extend(liveins[succ].iter().copied());
      out.extend(phi_inputs_from(graph, block, succ));
    }
    let mut live_in: Set<ValueId> =
      out.iter().filter(|v| !def_sets[block].contains(v)).copied().collect();
    live_in.extend(use_sets[block].iter().copied());
    liveouts[block] = out;

    if live_in != liveins[block] {
      liveins[block] = live_in;
      for &pred in &graph.blocks[block].preds {
        if reachable[pred.get() as usize] && !work_queue.contains(&pred) {
          work_queue.push_back(pred);
        }
      }
    }
  }
  trace!("calc_livein_and_liveout: {} evaluations", num_evals);
  (liveins, liveouts)
}

fn sorted(set: &Set<ValueId>) -> Vec<ValueId> {
  let mut values: Vec<ValueId> = set.iter().copied().collect();
  values.sort();
  values
}

//=============================================================================
// Interval construction

pub struct LivenessAnalyzer;

impl LivenessAnalyzer {
  #[inline(never)]
  pub fn run(graph: &Graph, target: &TargetInfo) -> Liveness {
    info!("liveness: begin for {}", graph.name);
    let order = graph.rpo();

    // Life numbers.
    let mut block_ranges = TypedIxVec::new();
    block_ranges.resize(graph.blocks.len(), None);
    let mut inst_lns = TypedIxVec::new();
    inst_lns.resize(graph.insts.len(), INVALID_LIFE_NUMBER);
    let mut ln_insts = Map::default();
    let mut counter: LifeNumber = 0;
    for &block in &order {
      let begin = counter;
      for &id in &graph.blocks[block].insts {
        if graph.insts[id].is_phi() {
          inst_lns[id] = begin;
        } else {
          counter += LIFE_NUMBER_GAP;
          inst_lns[id] = counter;
          ln_insts.insert(counter, id);
        }
      }
      counter += LIFE_NUMBER_GAP;
      block_ranges[block] = Some(BlockRange { begin, end: counter });
    }

    let (def_sets, use_sets) = calc_def_and_use(graph, &order);
    let (liveins, liveouts) = calc_livein_and_liveout(graph, &order, &def_sets, &use_sets);
    for &block in &order {
      debug!("{}: live-in {:?}", block, sorted(&liveins[block]));
    }

    // One root interval per value, in definition order.
    let mut intervals = Intervals::new();
    let mut value_intervals = TypedIxVec::new();
    value_intervals.resize(graph.values.len(), None);
    for &block in &order {
      for &id in &graph.blocks[block].insts {
        for &result in &graph.insts[id].results {
          value_intervals[result] =
            Some(intervals.add_virtual(result, graph.value_type(result), id));
        }
      }
    }
    let root = |value: ValueId| {
      value_intervals[value].unwrap_or_else(|| panic!("{} used but never defined", value))
    };

    // Physical intervals, created on first use.
    let mut fixed: [Vec<Option<IntervalId>>; 2] = [Vec::new(), Vec::new()];
    let cc = target.calling_convention();

    for &block in order.iter().rev() {
      let range = block_ranges[block].unwrap_or(BlockRange { begin: 0, end: 0 });
      for &value in &sorted(&liveouts[block]) {
        intervals[root(value)].add_range(range.begin, range.end);
      }

      for &id in graph.blocks[block].insts.iter().rev() {
        let inst = &graph.insts[id];
        if inst.is_phi() {
          for &result in &inst.results {
            intervals[root(result)].set_begin(range.begin);
          }
          continue;
        }
        let ln = inst_lns[id];

        let (requires_reg, hint) = def_use(inst, target);
        for &result in &inst.results {
          let int = &mut intervals[root(result)];
          int.set_begin(ln);
          int.add_use(UsePosition { pos: ln, requires_reg, hint });
        }

        for (k, &input) in inst.inputs.iter().enumerate() {
          let (requires_reg, hint) = input_use(inst, k, graph, target);
          let int = &mut intervals[root(input)];
          if range.begin < ln {
            int.add_range(range.begin, ln);
          }
          int.add_use(UsePosition { pos: ln, requires_reg, hint });
        }

        if let (true, Some(cc)) = (inst.is_call(), cc) {
          for (class, fixed) in [RegClass::Int, RegClass::Float].iter().zip(fixed.iter_mut()) {
            let num_regs = target.num_regs(*class);
            fixed.resize(num_regs as usize, None);
            for reg in cc.caller_saved(*class).iter().filter(|&r| r < num_regs) {
              let ty = match class {
                RegClass::Int => DataType::Int64,
                RegClass::Float => DataType::Float64,
              };
              let id = *fixed[reg as usize].get_or_insert_with(|| {
                intervals.add_physical(Location::make_register(reg, ty), ty)
              });
              intervals[id].add_range(ln, ln + 1);
            }
          }
        }
      }
    }

    let physical: Vec<IntervalId> =
      fixed.iter().flat_map(|regs| regs.iter().flatten().copied()).collect();

    let mut live_in = TypedIxVec::new();
    live_in.resize(graph.blocks.len(), Vec::new());
    for &block in &order {
      live_in[block] = sorted(&liveins[block]);
    }

    trace!("intervals:\n{:?}", intervals);
    info!(
      "liveness: end, {} intervals, {} physical",
      intervals.len(),
      physical.len()
    );

    Liveness {
      linear_order: order,
      block_ranges,
      inst_lns,
      ln_insts,
      live_in,
      intervals,
      value_intervals,
      physical,
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::ir::CondCode;
  use crate::target::Arch;

  #[test]
  fn life_numbers_and_ranges() {
    let mut g = Graph::new("straight", Arch::Aarch64);
    let entry = g.entry;
    let a = g.param(DataType::Int64);
    let b = g.param(DataType::Int64);
    let c = g.binary(entry, Opcode::Add, a, b);
    let d = g.binary(entry, Opcode::Mul, c, a);
    g.ret(entry, d);

    let target = TargetInfo::new(Arch::Aarch64);
    let liveness = LivenessAnalyzer::run(&g, &target);
    assert_eq!(liveness.block_range(entry), Some(BlockRange { begin: 0, end: 12 }));

    let ia = &liveness.intervals[liveness.interval(a).unwrap()];
    assert_eq!((ia.begin(), ia.end()), (2, 8));
    let ic = &liveness.intervals[liveness.interval(c).unwrap()];
    assert_eq!((ic.begin(), ic.end()), (6, 8));
    assert_eq!(ic.next_use(7), Some(8));
    let id = &liveness.intervals[liveness.interval(d).unwrap()];
    assert_eq!(id.hint(), Some(Location::register(0)));
    assert_eq!(liveness.inst_at(6), Some(g.values[c].def));
    assert!(liveness.physical.is_empty());
  }

  #[test]
  fn loop_liveness() {
    let mut g = Graph::new("loop", Arch::X86_64);
    let entry = g.entry;
    let header = g.add_block();
    let body = g.add_block();
    let exit = g.add_block();
    g.add_edge(entry, header);
    g.add_edge(header, body);
    g.add_edge(header, exit);
    g.add_edge(body, header);

    let n = g.param(DataType::Int64);
    let zero = g.constant(entry, DataType::Int64, 0);
    let one = g.constant(entry, DataType::Int64, 1);
    let i = g.phi(header, DataType::Int64, &[zero]);
    g.append(header, Opcode::If(CondCode::Lt), DataType::Void, &[i, n]);
    let next = g.binary(body, Opcode::Add, i, one);
    g.add_phi_input(i, next);
    g.ret(exit, i);

    let target = TargetInfo::new(Arch::X86_64);
    let liveness = LivenessAnalyzer::run(&g, &target);
    assert_eq!(liveness.linear_order[0], entry);
    assert_eq!(liveness.live_in[header], vec![n, one]);
    assert_eq!(liveness.live_in[body], vec![n, one, i]);

    // `n` stays live through the whole loop, back edge included.
    let body_range = liveness.block_range(body).unwrap();
    let int_n = &liveness.intervals[liveness.interval(n).unwrap()];
    assert!(int_n.covers(body_range.end - 1));
    let phi = &liveness.intervals[liveness.interval(i).unwrap()];
    assert_eq!(phi.begin(), liveness.block_range(header).unwrap().begin);
    assert_eq!(liveness.block_at(body_range.begin + 1), Some(body));
  }

  #[test]
  fn calls_create_physical_intervals() {
    let mut g = Graph::new("call", Arch::Aarch64);
    let entry = g.entry;
    let a = g.param(DataType::Int64);
    let r = g.call(entry, 3, DataType::Int64, &[a]).unwrap();
    let s = g.binary(entry, Opcode::Add, r, a);
    g.ret(entry, s);

    let target = TargetInfo::new(Arch::Aarch64);
    let liveness = LivenessAnalyzer::run(&g, &target);
    // 19 general purpose and 24 floating-point caller-saved registers.
    assert_eq!(liveness.physical.len(), 19 + 24);
    let call_ln = liveness.inst_ln(g.values[r].def).unwrap();
    let first = &liveness.intervals[liveness.physical[0]];
    assert_eq!(first.location(), Location::register(0));
    assert!(first.covers(call_ln));
    let ia = &liveness.intervals[liveness.interval(a).unwrap()];
    assert_eq!(ia.first_intersection_with(first, 0), Some(call_ln));
    let arg_use = ia.uses().iter().find(|u| u.pos == call_ln).unwrap();
    assert_eq!(arg_use.hint, Some(Location::register(0)));
    assert!(!arg_use.requires_reg);
    assert_eq!(ia.next_use(0), Some(call_ln + 2));
  }
}
