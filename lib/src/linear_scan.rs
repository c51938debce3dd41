/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Implementation of the linear scan allocator algorithm.
//!
//! This tries to follow the implementation as suggested by:
//!   Optimized Interval Splitting in a Linear Scan Register Allocator,
//!     by Wimmer et al., 2005
//!
//! Each register class is allocated in its own pass over the life intervals
//! of that class. Caller-saved registers are blocked at calls by the physical
//! intervals built by the liveness analysis. Parameters arrive in the
//! locations of the calling convention and are only pinned there until the
//! last of them is defined. Constants equal to zero live in the zero register
//! when the target has one. Spilled constants are never
//! given a stack slot: they are rematerialized from the immediate table.

use log::{debug, info, trace};

use crate::analysis::Liveness;
use crate::data_structures::{
  gap_before, IntervalId, LifeNumber, Map, RegClass, RegMask, ValueId,
  INVALID_LIFE_NUMBER, MAX_NUM_REGS,
};
use crate::interface::{RegAllocError, RegAllocOptions};
use crate::ir::{Graph, Opcode};
use crate::life_intervals::Intervals;
use crate::location::Location;
use crate::target::TargetInfo;

//=============================================================================
// Stack frame

/// Stack slots and immediates handed out while allocating, shared by the
/// passes over both register classes.
pub(crate) struct Frame {
  pub num_stack_slots: u32,
  pub num_stack_params: u32,
  /// Outgoing argument area, the largest needed by a call.
  pub num_stack_args: u32,
  pub immediates: Vec<i64>,
  pub num_spilled: u32,
  budget: u32,
  /// Slots below this one are reserved.
  first_slot: u32,
  /// For each slot, the end of the last value that owned it.
  slot_ends: Vec<LifeNumber>,
  /// Memory location of every value spilled so far; later spilled siblings
  /// of a value go to the same place.
  spill_locations: Map<ValueId, Location>,
}

impl Frame {
  fn new(graph: &Graph, target: &TargetInfo, budget: u32) -> Self {
    let first_slot = if target.needs_scratch_slot() { 1 } else { 0 };
    Self {
      num_stack_slots: first_slot,
      num_stack_params: 0,
      num_stack_args: 0,
      immediates: graph.immediates.clone(),
      num_spilled: 0,
      budget,
      first_slot,
      slot_ends: Vec::new(),
      spill_locations: Map::default(),
    }
  }

  /// Lowest slot free from `begin` on, reserved up to `end`.
  fn allocate_slot(
    &mut self, begin: LifeNumber, end: LifeNumber,
  ) -> Result<u32, RegAllocError> {
    let index = match self.slot_ends.iter().position(|&e| e <= begin) {
      Some(index) => index,
      None => {
        self.slot_ends.push(0);
        self.slot_ends.len() - 1
      }
    };
    let slot = self.first_slot + index as u32;
    if slot >= self.budget {
      return Err(RegAllocError::OutOfStackSlots(self.budget));
    }
    self.slot_ends[index] = end;
    self.num_stack_slots = self.num_stack_slots.max(slot + 1);
    Ok(slot)
  }

  fn add_immediate(&mut self, value: i64) -> u32 {
    match self.immediates.iter().position(|&imm| imm == value) {
      Some(pos) => pos as u32,
      None => {
        self.immediates.push(value);
        self.immediates.len() as u32 - 1
      }
    }
  }
}

//=============================================================================
// State management.

struct State<'a> {
  graph: &'a Graph,
  intervals: &'a mut Intervals,
  frame: &'a mut Frame,
  class: RegClass,
  /// Registers the allocator may hand out.
  regs: RegMask,

  /// Physical intervals of the class, blocking caller-saved registers at
  /// calls.
  fixed: Vec<IntervalId>,

  /// Intervals that are starting after the current interval's start position.
  unhandled: Vec<IntervalId>,

  /// Intervals that are covering the current interval's start position.
  active: Vec<IntervalId>,

  /// Intervals that are not covering but end after the current interval's start
  /// position.
  inactive: Vec<IntervalId>,
}

impl<'a> State<'a> {
  fn next_unhandled(&mut self) -> Option<IntervalId> {
    self.unhandled.pop()
  }

  fn insert_unhandled(&mut self, id: IntervalId) {
    let begin = self.intervals[id].begin();
    // Maintain reversed begin order by inverting the operands in the
    // comparison.
    let intervals = &*self.intervals;
    let pos = self
      .unhandled
      .binary_search_by(|&other| begin.cmp(&intervals[other].begin()));
    let pos = match pos {
      Ok(index) => index,
      Err(index) => index,
    };
    self.unhandled.insert(pos, id);
  }

  fn in_class(&self, location: Location) -> bool {
    match self.class {
      RegClass::Int => location.is_register(),
      RegClass::Float => location.is_fp_register(),
    }
  }

  /// Register of the class held by `id`, if any.
  fn reg_of(&self, id: IntervalId) -> Option<u32> {
    let location = self.intervals[id].location();
    if self.in_class(location) {
      location.register_number()
    } else {
      None
    }
  }

  /// Position from which the current interval conflicts with physical
  /// intervals. The result of a call is written once the call has clobbered
  /// the caller-saved registers.
  fn fixed_conflicts_from(&self, id: IntervalId) -> LifeNumber {
    let int = &self.intervals[id];
    match int.def_inst() {
      Some(def) if self.graph.insts[def].is_call() => int.begin() + 1,
      _ => int.begin(),
    }
  }

  fn assign(&mut self, id: IntervalId, reg: u32) {
    let location = Location::make_register(reg, self.intervals[id].ty());
    debug!(
      "{}: {:?} <- {}",
      id,
      self.intervals[id].value(),
      location
    );
    self.intervals[id].set_location(location);
  }

  fn spill(&mut self, id: IntervalId) -> Result<(), RegAllocError> {
    let (value, begin, root) = {
      let int = &self.intervals[id];
      debug_assert!(!int.is_physical() && !int.is_preassigned(), "can't spill {}", id);
      let value = int
        .value()
        .ok_or_else(|| RegAllocError::Other(format!("spilling fixed interval {}", id)))?;
      (value, int.begin(), int.root())
    };

    let location = match self.frame.spill_locations.get(&value) {
      Some(&location) => location,
      None => {
        let location = match self.graph.constant_of(value) {
          Some(c) => Location::immediate(self.frame.add_immediate(c)),
          None => {
            let end = self.intervals.chain_end(root);
            Location::stack_slot(self.frame.allocate_slot(begin, end)?)
          }
        };
        self.frame.spill_locations.insert(value, location);
        location
      }
    };

    debug!("spilling {} ({}) to {}", id, value, location);
    self.frame.num_spilled += 1;
    self.intervals[id].set_location(location);
    Ok(())
  }
}

/// Transitions intervals from active/inactive into active/inactive/handled.
#[inline(never)]
fn update_state(cur_id: IntervalId, state: &mut State) {
  let intervals = &*state.intervals;
  let start_point = intervals[cur_id].begin();

  let mut next_active = Vec::new();
  let mut next_inactive = Vec::new();

  for &id in state.active.iter().chain(state.inactive.iter()) {
    let int = &intervals[id];
    if int.end() <= start_point {
      // It's expired, forget about it.
    } else if int.covers(start_point) {
      next_active.push(id);
    } else {
      next_inactive.push(id);
    }
  }

  state.active = next_active;
  state.inactive = next_inactive;

  trace!("state active: {:?}", state.active);
  trace!("state inactive: {:?}", state.inactive);
}

/// Register of `regs` with the highest position, the lowest one on ties.
fn furthest(regs: RegMask, positions: &[LifeNumber]) -> Option<(u32, LifeNumber)> {
  let mut best: Option<(u32, LifeNumber)> = None;
  for reg in regs.iter() {
    let pos = positions[reg as usize];
    match best {
      Some((_, best_pos)) if best_pos >= pos => {}
      _ => best = Some((reg, pos)),
    }
  }
  best
}

#[inline(never)]
fn try_allocate_reg(id: IntervalId, state: &mut State) -> bool {
  let (begin, end) = (state.intervals[id].begin(), state.intervals[id].end());

  let mut free_until_pos = [0; MAX_NUM_REGS as usize];
  for reg in state.regs.iter() {
    free_until_pos[reg as usize] = INVALID_LIFE_NUMBER;
  }

  // All registers currently in use are blocked.
  for &other in &state.active {
    if let Some(reg) = state.reg_of(other) {
      free_until_pos[reg as usize] = 0;
    }
  }

  // All registers that would be used at the same time as the current interval
  // are partially blocked, up to the point when they start being used.
  {
    let intervals = &*state.intervals;
    let cur = &intervals[id];
    for &other in &state.inactive {
      if let Some(reg) = state.reg_of(other) {
        if let Some(at) = intervals[other].first_intersection_with(cur, begin) {
          let pos = &mut free_until_pos[reg as usize];
          *pos = (*pos).min(at);
        }
      }
    }
    let from = state.fixed_conflicts_from(id);
    for &fixed in &state.fixed {
      let reg = intervals[fixed].location().value();
      if let Some(at) = intervals[fixed].first_intersection_with(cur, from) {
        let pos = &mut free_until_pos[reg as usize];
        *pos = (*pos).min(at);
      }
    }
  }

  let hint = state.intervals[id]
    .hint()
    .filter(|&loc| state.in_class(loc))
    .map(|loc| loc.value())
    .filter(|&reg| state.regs.test(reg) && free_until_pos[reg as usize] >= end);

  let (best_reg, best_pos) = match hint {
    Some(reg) => (reg, free_until_pos[reg as usize]),
    None => match furthest(state.regs, &free_until_pos) {
      Some(best) => best,
      None => return false,
    },
  };
  debug!(
    "try_allocate_reg: best register {} is free until {}",
    best_reg, best_pos
  );

  if best_pos <= begin {
    debug!("try_allocate_reg: all registers taken, need to spill.");
    return false;
  }

  if best_pos < end {
    // Only a partial match: the rest of the interval will be allocated once
    // the register is taken.
    let split_pos = gap_before(best_pos);
    if split_pos <= begin {
      return false;
    }
    let child = state.intervals.split_at(id, split_pos);
    debug!("try_allocate_reg: split {} at {} into {}", id, split_pos, child);
    state.insert_unhandled(child);
  }

  state.assign(id, best_reg);
  true
}

#[inline(never)]
fn allocate_blocked_reg(id: IntervalId, state: &mut State) -> Result<(), RegAllocError> {
  let begin = state.intervals[id].begin();

  // If the current interval has no register uses, spill it directly.
  let first_use = match state.intervals[id].next_use(begin) {
    Some(u) => u,
    None => return state.spill(id),
  };

  // 1. Compute all the positions of next uses for registers of active intervals
  // and inactive intervals that might intersect with the current one.
  // 2. Then use this to select the register with the furthest next use.
  // 3. Spill either the current interval or active/inactive intervals with the
  //    selected register.
  // 4. Make sure that the current interval doesn't intersect with the fixed
  //    interval for the selected register.

  // Step 1: compute all the next use positions.
  let mut next_use_pos = [0; MAX_NUM_REGS as usize];
  let mut block_pos = [0; MAX_NUM_REGS as usize];
  for reg in state.regs.iter() {
    next_use_pos[reg as usize] = INVALID_LIFE_NUMBER;
    block_pos[reg as usize] = INVALID_LIFE_NUMBER;
  }

  {
    let intervals = &*state.intervals;
    let cur = &intervals[id];

    for &other in &state.active {
      let reg = match state.reg_of(other) {
        Some(reg) => reg as usize,
        None => continue,
      };
      if intervals[other].is_preassigned() {
        block_pos[reg] = 0;
        next_use_pos[reg] = 0;
      } else if let Some(next_use) = intervals[other].next_use(begin) {
        next_use_pos[reg] = next_use_pos[reg].min(next_use);
      }
    }

    for &other in &state.inactive {
      let reg = match state.reg_of(other) {
        Some(reg) => reg as usize,
        None => continue,
      };
      let intersect_pos = match intervals[other].first_intersection_with(cur, begin) {
        Some(pos) => pos,
        None => continue,
      };
      if intervals[other].is_preassigned() {
        block_pos[reg] = block_pos[reg].min(intersect_pos);
        next_use_pos[reg] = next_use_pos[reg].min(intersect_pos);
      } else if let Some(next_use) = intervals[other].next_use(begin) {
        next_use_pos[reg] = next_use_pos[reg].min(next_use);
      }
    }

    let from = state.fixed_conflicts_from(id);
    for &fixed in &state.fixed {
      let reg = intervals[fixed].location().value() as usize;
      if let Some(at) = intervals[fixed].first_intersection_with(cur, from) {
        block_pos[reg] = block_pos[reg].min(at);
        next_use_pos[reg] = next_use_pos[reg].min(at);
      }
    }
  }

  // Step 2: find the register with the furthest next use.
  let (best_reg, best_pos) = match furthest(state.regs, &next_use_pos) {
    Some(best) => best,
    None => return Err(RegAllocError::OutOfRegisters(state.class)),
  };
  debug!(
    "allocate_blocked_reg: {} first used at {}, register {} next used at {}",
    id, first_use, best_reg, best_pos
  );

  // Step 3: if the next use of the current interval is after the furthest use
  // of the selected register, then we should spill the current interval.
  // Otherwise, spill other intervals.
  if first_use >= best_pos {
    let split_pos = gap_before(first_use);
    if split_pos <= begin {
      debug!("allocate_blocked_reg: no register left for {} at {}", id, first_use);
      return Err(RegAllocError::OutOfRegisters(state.class));
    }
    debug!("spill current interval up to {}", split_pos);
    let child = state.intervals.split_at(id, split_pos);
    state.spill(id)?;
    state.insert_unhandled(child);
    return Ok(());
  }

  debug!("taking over register {}, spilling intersecting intervals", best_reg);
  state.assign(id, best_reg);

  // Step 4: if there's an interference with a fixed interval, split at the
  // intersection.
  let block = block_pos[best_reg as usize];
  if block < state.intervals[id].end() {
    let child = state.intervals.split_at(id, gap_before(block));
    debug!("allocate_blocked_reg: blocked at {}, continuing in {}", block, child);
    state.insert_unhandled(child);
  }

  let stolen: Vec<IntervalId> = state
    .active
    .iter()
    .copied()
    .filter(|&other| other != id && state.reg_of(other) == Some(best_reg))
    .collect();
  state.active.retain(|other| !stolen.contains(other));
  for other in stolen {
    debug!("allocate_blocked_reg: split and spill active {}", other);
    split_and_spill(state, other, begin)?;
  }

  let stolen: Vec<IntervalId> = {
    let intervals = &*state.intervals;
    state
      .inactive
      .iter()
      .copied()
      .filter(|&other| {
        state.reg_of(other) == Some(best_reg)
          && !intervals[other].is_preassigned()
          && intervals[other].first_intersection_with(&intervals[id], begin).is_some()
      })
      .collect()
  };
  state.inactive.retain(|other| !stolen.contains(other));
  for other in stolen {
    // begin is in the middle of a hole in the other interval (otherwise it'd
    // be active), so it's a good split position.
    debug!("allocate_blocked_reg: split and spill inactive {}", other);
    split_and_spill(state, other, begin)?;
  }

  Ok(())
}

/// Spills `id` from right after its last use before `pos`, up to the gap
/// before its next register use, where it is queued again for allocation.
fn split_and_spill(
  state: &mut State, id: IntervalId, pos: LifeNumber,
) -> Result<(), RegAllocError> {
  let mut split_pos = gap_before(pos);
  if let Some(last_use) = state.intervals[id].last_use_before(split_pos) {
    split_pos = last_use + 1;
  }

  let child = if split_pos <= state.intervals[id].begin() {
    debug!("split_and_spill {}: no uses before {}, spilling it whole", id, pos);
    id
  } else {
    let child = state.intervals.split_at(id, split_pos);
    debug!("split_and_spill {}: spill {} from {}", id, child, split_pos);
    child
  };

  // Split until the next register use.
  let child_begin = state.intervals[child].begin();
  match state.intervals[child].next_use(child_begin) {
    Some(next_use) if gap_before(next_use) > child_begin => {
      state.spill(child)?;
      let rest = state.intervals.split_at(child, gap_before(next_use));
      debug!("split spilled interval before next use @ {} into {}", next_use, rest);
      state.insert_unhandled(rest);
    }
    Some(next_use) => {
      // Needs a register right away: allocate it again.
      debug!("split_and_spill {}: {} used at {}, requeued", id, child, next_use);
      state.intervals[child].set_location(Location::invalid());
      state.insert_unhandled(child);
    }
    None => {
      // Let it be spilled for the rest of its lifetime.
      state.spill(child)?;
    }
  }
  Ok(())
}

//=============================================================================
// Entry point

/// Pins parameters and zero constants, and fills the unhandled list with the
/// other intervals of the class.
///
/// A parameter passed in a register holds it from the entry of the function
/// until every parameter of the class is defined; from there on it is an
/// ordinary interval, free to move or be evicted. A parameter passed on the
/// stack stays there up to its first register use.
#[inline(never)]
fn preassign(
  state: &mut State, target: &TargetInfo, param_locations: &Map<ValueId, Location>,
) {
  let roots: Vec<IntervalId> = state
    .intervals
    .ids()
    .filter(|&id| {
      let int = &state.intervals[id];
      !int.is_physical()
        && !int.is_split_sibling()
        && !int.is_empty()
        && int.class() == state.class
    })
    .collect();

  let last_param_def = roots
    .iter()
    .filter(|&&id| {
      let int = &state.intervals[id];
      int.value().map_or(false, |value| param_locations.contains_key(&value))
    })
    .map(|&id| state.intervals[id].begin())
    .max()
    .unwrap_or(0);

  for id in roots {
    let (value, ty) = match state.intervals[id].value() {
      Some(value) => (value, state.intervals[id].ty()),
      None => continue,
    };

    if let (Some(0), Some(zero)) = (state.graph.constant_of(value), target.zero_reg()) {
      if ty.fits_zero_reg() {
        debug!("{}: {} lives in the zero register", id, value);
        state.intervals[id].set_preassigned(Location::register(zero));
        continue;
      }
    }

    let location = match param_locations.get(&value) {
      Some(&location) => location,
      None => {
        state.insert_unhandled(id);
        continue;
      }
    };
    debug!("{}: parameter {} preassigned to {}", id, value, location);
    let def = state.intervals[id].begin();
    state.intervals[id].set_preassigned(location);

    if !location.is_any_register() {
      state.frame.spill_locations.insert(value, location);
      if let Some(first_use) = state.intervals[id].next_use(def) {
        let child = state.intervals.split_at(id, gap_before(first_use));
        debug!("{}: loaded before {} in {}", id, first_use, child);
        state.insert_unhandled(child);
      }
      continue;
    }

    if def > 0 {
      state.intervals[id].add_range(0, def);
    }
    let mut split_pos = last_param_def + 1;
    let clobber = state.fixed.iter().find_map(|&fixed| {
      let fixed = &state.intervals[fixed];
      if fixed.location() == location {
        fixed.first_intersection_with(&state.intervals[id], 0)
      } else {
        None
      }
    });
    if let Some(at) = clobber {
      split_pos = split_pos.min(gap_before(at)).max(def + 1);
    }
    if split_pos < state.intervals[id].end() {
      let child = state.intervals.split_at(id, split_pos);
      state.intervals[child].set_preferred(location);
      debug!("{}: released at {}, continuing in {}", id, split_pos, child);
      state.insert_unhandled(child);
    }
    state.inactive.push(id);
  }
}

#[inline(never)]
fn allocate_class(state: &mut State) -> Result<(), RegAllocError> {
  let mut prev_start = None;
  while let Some(id) = state.next_unhandled() {
    trace!("main loop: allocating {} {:?}", id, state.intervals[id]);

    let start = state.intervals[id].begin();
    if let Some(prev) = prev_start {
      debug_assert!(prev <= start, "main loop must make progress");
    }
    prev_start = Some(start);

    update_state(id, state);
    if !try_allocate_reg(id, state) {
      allocate_blocked_reg(id, state)?;
    }
    if state.reg_of(id).is_some() {
      state.active.push(id);
    }
  }
  Ok(())
}

/// Assigns a location to every life interval of the graph, splitting them as
/// needed. Returns the stack frame and immediate table the locations refer to.
#[inline(never)]
pub(crate) fn run(
  graph: &Graph, liveness: &mut Liveness, target: &TargetInfo,
  options: &RegAllocOptions,
) -> Result<Frame, RegAllocError> {
  let cc = target
    .calling_convention()
    .ok_or(RegAllocError::BackendUnsupported(graph.arch))?;
  let mut frame = Frame::new(graph, target, options.stack_slot_budget);

  let params: Vec<ValueId> = graph.blocks[graph.entry]
    .insts
    .iter()
    .map(|&inst| &graph.insts[inst])
    .filter(|inst| inst.opcode == Opcode::Parameter)
    .flat_map(|inst| inst.results.iter().copied())
    .collect();
  let types: Vec<_> = params.iter().map(|&p| graph.value_type(p)).collect();
  let locations = cc.param_locations(&types);
  frame.num_stack_params = locations.iter().filter(|loc| loc.is_stack_parameter()).count() as u32;
  frame.num_stack_args = graph
    .insts
    .iter()
    .filter(|inst| inst.is_call())
    .map(|inst| {
      let types: Vec<_> = inst.inputs.iter().map(|&v| graph.value_type(v)).collect();
      cc.param_locations(&types).iter().filter(|loc| loc.is_stack_parameter()).count() as u32
    })
    .max()
    .unwrap_or(0);
  let param_locations: Map<ValueId, Location> =
    params.iter().copied().zip(locations.into_iter()).collect();

  for &class in &[RegClass::Int, RegClass::Float] {
    let available = match class {
      RegClass::Int => options.available_register_mask,
      RegClass::Float => options.available_float_register_mask,
    };
    let allocatable = target.allocatable_mask(class);
    let regs = available.map_or(allocatable, |mask| allocatable.intersect(mask));
    info!("linear_scan: {} pass, registers {:?}", class, regs);

    let fixed: Vec<IntervalId> = liveness
      .physical
      .iter()
      .copied()
      .filter(|&id| liveness.intervals[id].class() == class)
      .collect();

    let mut state = State {
      graph,
      intervals: &mut liveness.intervals,
      frame: &mut frame,
      class,
      regs,
      fixed,
      unhandled: Vec::new(),
      active: Vec::new(),
      inactive: Vec::new(),
    };
    preassign(&mut state, target, &param_locations);
    allocate_class(&mut state)?;
  }

  debug!("allocation results:\n{:?}", liveness.intervals);
  info!(
    "linear_scan: end, {} spills, {} stack slots, {} immediates",
    frame.num_spilled,
    frame.num_stack_slots,
    frame.immediates.len()
  );
  Ok(frame)
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::analysis::LivenessAnalyzer;
  use crate::data_structures::DataType;
  use crate::ir::CondCode;
  use crate::target::Arch;

  const I64: DataType = DataType::Int64;

  fn allocate(
    graph: &Graph, options: &RegAllocOptions,
  ) -> Result<(Liveness, Frame), RegAllocError> {
    let target = TargetInfo::new(graph.arch);
    let mut liveness = LivenessAnalyzer::run(graph, &target);
    let frame = run(graph, &mut liveness, &target, options)?;
    Ok((liveness, frame))
  }

  fn with_regs(num_regs: u32) -> RegAllocOptions {
    RegAllocOptions {
      available_register_mask: Some(RegMask::first(num_regs)),
      ..RegAllocOptions::default()
    }
  }

  /// No two overlapping intervals share a register.
  fn check_unique_registers(graph: &Graph, liveness: &Liveness) {
    let target = TargetInfo::new(graph.arch);
    let ids: Vec<IntervalId> = liveness
      .intervals
      .ids()
      .filter(|&id| {
        let int = &liveness.intervals[id];
        !int.is_physical()
          && int.location().is_any_register()
          && !target.is_zero_reg(int.location())
      })
      .collect();
    for (i, &a) in ids.iter().enumerate() {
      for &b in &ids[i + 1..] {
        let (ia, ib) = (&liveness.intervals[a], &liveness.intervals[b]);
        if ia.location() == ib.location() {
          assert!(
            ia.first_intersection_with(ib, 0).is_none(),
            "{:?} and {:?} overlap",
            ia,
            ib
          );
        }
      }
    }
  }

  #[test]
  fn no_pressure() {
    let mut g = Graph::new("add", Arch::Aarch64);
    let entry = g.entry;
    let a = g.param(I64);
    let b = g.param(I64);
    let c = g.binary(entry, Opcode::Add, a, b);
    let d = g.binary(entry, Opcode::Mul, c, c);
    g.ret(entry, d);

    let (liveness, frame) = allocate(&g, &RegAllocOptions::default()).unwrap();
    assert_eq!(frame.num_spilled, 0);
    assert_eq!(liveness.location_at(a, 2), Some(Location::register(0)));
    assert_eq!(liveness.location_at(b, 4), Some(Location::register(1)));
    // The returned value takes its hinted register.
    assert_eq!(liveness.location_at(d, 8), Some(Location::register(0)));
    check_unique_registers(&g, &liveness);
  }

  #[test]
  fn spills_under_pressure() {
    let mut g = Graph::new("pressure", Arch::X86_64);
    let entry = g.entry;
    let p = g.param(I64);
    let mut values = Vec::new();
    for i in 0..6 {
      let c = g.constant(entry, I64, i + 10);
      values.push(g.binary(entry, Opcode::Add, p, c));
    }
    let mut acc = values[0];
    for &v in &values[1..] {
      acc = g.binary(entry, Opcode::Add, acc, v);
    }
    g.ret(entry, acc);

    let (liveness, frame) = allocate(&g, &with_regs(3)).unwrap();
    assert!(frame.num_spilled > 0);
    assert!(frame.num_stack_slots > 0);
    check_unique_registers(&g, &liveness);

    // Every register use is served from a register.
    for id in liveness.intervals.ids() {
      let int = &liveness.intervals[id];
      if int.is_physical() {
        continue;
      }
      for u in int.uses().iter().filter(|u| u.requires_reg) {
        let value = int.value().unwrap();
        let at = if Some(u.pos) == liveness.inst_ln(g.values[value].def) { u.pos } else { u.pos - 1 };
        let loc = liveness.location_at(value, at).unwrap();
        assert!(loc.is_any_register(), "{} used at {} from {}", value, u.pos, loc);
      }
    }
  }

  #[test]
  fn constants_rematerialize() {
    let mut g = Graph::new("remat", Arch::X86_64);
    let entry = g.entry;
    let p = g.param(I64);
    let c = g.constant(entry, I64, 42);
    let x = g.binary(entry, Opcode::Add, p, p);
    let y = g.binary(entry, Opcode::Add, x, p);
    let z = g.binary(entry, Opcode::Add, x, y);
    let w = g.binary(entry, Opcode::Add, z, c);
    g.ret(entry, w);

    let (liveness, frame) = allocate(&g, &with_regs(2)).unwrap();
    let y_ln = liveness.inst_ln(g.values[y].def).unwrap();
    assert_eq!(liveness.location_at(c, y_ln), Some(Location::immediate(0)));
    assert_eq!(frame.immediates, vec![42]);
    // Constants never take a stack slot.
    assert_eq!(frame.num_stack_slots, 0);
    check_unique_registers(&g, &liveness);
  }

  #[test]
  fn zero_constant_in_zero_register() {
    let mut g = Graph::new("zero", Arch::Aarch64);
    let entry = g.entry;
    let zero = g.constant(entry, I64, 0);
    let r = g.call(entry, 1, I64, &[zero]).unwrap();
    let s = g.binary(entry, Opcode::Add, r, zero);
    g.ret(entry, s);

    let (liveness, _) = allocate(&g, &RegAllocOptions::default()).unwrap();
    let root = liveness.interval(zero).unwrap();
    assert_eq!(liveness.intervals[root].location(), Location::register(31));
    assert_eq!(liveness.intervals[root].sibling(), None);
  }

  #[test]
  fn values_live_across_calls_avoid_caller_saved() {
    let mut g = Graph::new("across", Arch::Aarch64);
    let entry = g.entry;
    let a = g.param(I64);
    let b = g.binary(entry, Opcode::Add, a, a);
    let r = g.call(entry, 7, I64, &[a]).unwrap();
    let s = g.binary(entry, Opcode::Add, r, b);
    g.ret(entry, s);

    let target = TargetInfo::new(Arch::Aarch64);
    let (liveness, _) = allocate(&g, &RegAllocOptions::default()).unwrap();
    let call_ln = liveness.inst_ln(g.values[r].def).unwrap();
    let loc = liveness.location_at(b, call_ln).unwrap();
    if let Some(reg) = loc.register_number() {
      let cc = target.calling_convention().unwrap();
      assert!(!cc.caller_saved(RegClass::Int).test(reg), "{} clobbered", loc);
    }
    // The call result comes out of the return register.
    assert_eq!(liveness.location_at(r, call_ln), Some(Location::register(0)));
    check_unique_registers(&g, &liveness);
  }

  #[test]
  fn select_needs_four_registers() {
    let build = || {
      let mut g = Graph::new("select", Arch::Aarch64);
      let entry = g.entry;
      let p = g.param(I64);
      let vals: Vec<ValueId> = (0..4)
        .map(|i| {
          let c = g.constant(entry, I64, i + 1);
          g.binary(entry, Opcode::Mul, p, c)
        })
        .collect();
      let sel = g.value(entry, Opcode::Select(CondCode::Lt), I64, &vals);
      g.ret(entry, sel);
      g
    };
    let g = build();
    assert!(matches!(
      allocate(&g, &with_regs(3)),
      Err(RegAllocError::OutOfRegisters(RegClass::Int))
    ));
    assert!(allocate(&g, &with_regs(4)).is_ok());
  }

  #[test]
  fn stack_parameters_are_loaded_before_use() {
    let mut g = Graph::new("params", Arch::Aarch32);
    let entry = g.entry;
    let params: Vec<ValueId> = (0..6).map(|_| g.param(DataType::Int32)).collect();
    let mut acc = params[0];
    for &p in &params[1..] {
      acc = g.binary(entry, Opcode::Add, acc, p);
    }
    g.ret(entry, acc);

    let (liveness, frame) = allocate(&g, &RegAllocOptions::default()).unwrap();
    assert_eq!(frame.num_stack_params, 2);
    // Slot 0 is kept for move cycles.
    assert_eq!(frame.num_stack_slots, 1);
    let root = liveness.interval(params[5]).unwrap();
    assert_eq!(liveness.intervals[root].location(), Location::stack_parameter(1));
    let child = liveness.intervals[root].sibling().unwrap();
    assert!(liveness.intervals[child].location().is_register());
  }

  #[test]
  fn stack_slot_budget() {
    let mut g = Graph::new("budget", Arch::X86_64);
    let entry = g.entry;
    let p = g.param(I64);
    let vals: Vec<ValueId> = (0..8).map(|_| g.binary(entry, Opcode::Add, p, p)).collect();
    let mut acc = p;
    for &v in vals.iter().rev() {
      acc = g.binary(entry, Opcode::Sub, acc, v);
    }
    g.ret(entry, acc);

    let options = RegAllocOptions { stack_slot_budget: 1, ..with_regs(2) };
    assert!(matches!(allocate(&g, &options), Err(RegAllocError::OutOfStackSlots(1))));
  }

  #[test]
  fn parameters_are_evicted_under_pressure() {
    let mut g = Graph::new("evict_params", Arch::Aarch32);
    let entry = g.entry;
    let p: Vec<ValueId> = (0..3).map(|_| g.param(DataType::Int32)).collect();
    let m = g.binary(entry, Opcode::Mul, p[0], p[1]);
    let n = g.binary(entry, Opcode::Add, p[1], p[2]);
    let k = g.binary(entry, Opcode::And, p[2], p[0]);
    let store = g.append(entry, Opcode::Store, DataType::Void, &[m, n, k]);
    let s = g.binary(entry, Opcode::Add, p[0], p[1]);
    let t = g.binary(entry, Opcode::Add, s, p[2]);
    g.ret(entry, t);

    let (liveness, frame) = allocate(&g, &with_regs(4)).unwrap();
    assert!(frame.num_spilled > 0);
    check_unique_registers(&g, &liveness);
    for (i, &param) in p.iter().enumerate() {
      let root = liveness.interval(param).unwrap();
      assert_eq!(liveness.intervals[root].location(), Location::register(i as u32));
    }
    // The store takes three registers: one parameter at least waits in memory.
    let store_ln = liveness.inst_ln(store).unwrap();
    assert!(p
      .iter()
      .any(|&v| !liveness.location_at(v, store_ln - 1).unwrap().is_any_register()));
  }

  #[test]
  fn parameter_registers_outside_the_mask() {
    let build = || {
      let mut g = Graph::new("select_params", Arch::X86_64);
      let entry = g.entry;
      let a = g.param(I64);
      let b = g.param(I64);
      let one = g.constant(entry, I64, 1);
      let x = g.binary(entry, Opcode::Add, a, one);
      let y = g.binary(entry, Opcode::Add, b, one);
      let sel = g.value(entry, Opcode::Select(CondCode::Lt), I64, &[a, b, x, y]);
      g.ret(entry, sel);
      (g, a, sel)
    };
    let (g, a, sel) = build();
    // rdi and rsi are not among the first three registers.
    assert!(matches!(
      allocate(&g, &with_regs(3)),
      Err(RegAllocError::OutOfRegisters(RegClass::Int))
    ));

    let (liveness, _) = allocate(&g, &with_regs(4)).unwrap();
    check_unique_registers(&g, &liveness);
    let root = liveness.interval(a).unwrap();
    assert_eq!(liveness.intervals[root].location(), Location::register(7));
    let sel_ln = liveness.inst_ln(g.values[sel].def).unwrap();
    let loc = liveness.location_at(a, sel_ln - 1).unwrap();
    assert!(RegMask::first(4).test(loc.register_number().unwrap()), "{}", loc);
  }
}
