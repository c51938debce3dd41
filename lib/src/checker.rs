/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Checker: verifies that the locations chosen by the allocator, and the
//! spill-fills it inserted, retain the dataflow of the SSA graph.
//!
//! The basic idea is that we track symbolic values as they flow through
//! registers, stack slots and stack parameters. Every SSA value `Vn` is a
//! symbol; any instruction of the original graph generates its symbol into the
//! location of its result, and spill-fills copy symbols around.
//!
//! In other words, the dataflow analysis state at each program point is a map
//! `L` of: location -> lattice value (top > Vn symbols (unordered) > bottom).
//! Two locations are always known, without being in the map: slots of the
//! immediate table hold their constant, and the zero register holds 0.
//!
//! And the transfer functions for each statement type are:
//!
//!   - move of a resolved spill-fill, applied in order: [ dst := src ]
//!
//!       L[dst] := L[src]
//!
//!   - statement of the graph [ Vi := op Vj, Vk, ... ]
//!     with allocated form    [ Li := op Lj, Lk, ... ]
//!
//!       L[Li] := `Vi`
//!
//!     Constants generate their value rather than their symbol, so that a
//!     rematerialized constant is as good as the original.
//!
//!   - call [ Vi := call Vj, ... ]
//!
//!       L[r] := conflicted, for every caller-saved register r
//!       L[return register] := `Vi`
//!
//! Phis are moved to the edges: flowing from the k-th predecessor of a block,
//! the location of each phi holds the phi symbol if it held the k-th input of
//! the phi, and is conflicted otherwise.
//!
//! At control-flow join points, only the locations known on every incoming
//! path survive, and their symbols meet using a very simple lattice
//! meet-function: two different symbols meet to "conflicted"; otherwise, the
//! symbol meets with itself to produce itself (reflexivity).
//!
//! To check correctness, we first find the dataflow fixpoint with the above
//! lattice and transfer/meet functions. Then, at each instruction, we examine
//! the dataflow solution at the preceding program point, and check that the
//! location of each input holds the symbol of that input.

use log::{debug, info};

use std::fmt;

use crate::data_structures::{BlockId, InstId, Map, RegClass, RegMask, TypedIxVec, ValueId};
use crate::ir::{Graph, Inst, SpillFillData};
use crate::location::Location;
use crate::target::TargetInfo;

/// Abstract state for a location.
///
/// Forms a lattice with \top (`Unknown`), \bot (`Conflicted`), and a number of
/// mutually unordered value-points in between, one per SSA value or constant.
/// Any two different values meet to \bot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckerValue {
  /// "top" value: this location has no known value.
  Unknown,
  /// "bottom" value: this location has a conflicted value.
  Conflicted,
  /// This location holds the given SSA value.
  Value(ValueId),
  /// This location holds a known constant.
  Constant(i64),
}

impl CheckerValue {
  /// Meet function of the abstract-interpretation value lattice.
  pub fn meet(&self, other: &CheckerValue) -> CheckerValue {
    match (self, other) {
      (&CheckerValue::Unknown, _) => *other,
      (_, &CheckerValue::Unknown) => *self,
      (&CheckerValue::Conflicted, _) => *self,
      (_, &CheckerValue::Conflicted) => *other,
      _ if *self == *other => *self,
      _ => CheckerValue::Conflicted,
    }
  }
}

impl fmt::Display for CheckerValue {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      CheckerValue::Unknown => write!(fmt, "unknown"),
      CheckerValue::Conflicted => write!(fmt, "conflicted"),
      CheckerValue::Value(value) => write!(fmt, "{}", value),
      CheckerValue::Constant(c) => write!(fmt, "#{}", c),
    }
  }
}

/// State that steps through program points as we scan over the instruction
/// stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckerState {
  /// For each written location, abstract state.
  values: Map<Location, CheckerValue>,
}

impl CheckerState {
  /// Merge this checker state with another at a CFG join-point.
  pub fn meet_with(&mut self, other: &CheckerState) {
    self.values.retain(|loc, value| match other.values.get(loc) {
      Some(other_value) => {
        *value = value.meet(other_value);
        true
      }
      None => false,
    });
  }

  fn set(&mut self, loc: Location, value: CheckerValue) {
    if value == CheckerValue::Unknown {
      self.values.remove(&loc);
    } else {
      self.values.insert(loc, value);
    }
  }
}

//=============================================================================
// Errors

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckerError {
  /// The instruction lacks the location of an input or a result.
  MissingLocations { inst: InstId },
  /// Input `index` is read from a location not holding it.
  IncorrectValue {
    inst: InstId,
    index: usize,
    location: Location,
    expected: ValueId,
    actual: CheckerValue,
  },
  /// A spill-fill copies a location holding no meaningful value.
  UnknownSource { inst: InstId, src: Location, actual: CheckerValue },
  /// A spill-fill was left as an unordered set of moves.
  UnresolvedSpillFill { inst: InstId },
  /// Two arguments of a call passed in registers share a register.
  ArgumentOverlap { inst: InstId, location: Location },
}

impl fmt::Display for CheckerError {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      CheckerError::MissingLocations { inst } => {
        write!(fmt, "{}: locations missing", inst)
      }
      CheckerError::IncorrectValue { inst, index, location, expected, actual } => write!(
        fmt,
        "{}: input {} expects {} in {}, found {}",
        inst, index, expected, location, actual
      ),
      CheckerError::UnknownSource { inst, src, actual } => {
        write!(fmt, "{}: move from {} holding {}", inst, src, actual)
      }
      CheckerError::UnresolvedSpillFill { inst } => {
        write!(fmt, "{}: spill-fill not resolved", inst)
      }
      CheckerError::ArgumentOverlap { inst, location } => {
        write!(fmt, "{}: several arguments in {}", inst, location)
      }
    }
  }
}

#[derive(Clone, Debug)]
pub struct CheckerErrors {
  pub errors: Vec<CheckerError>,
}

impl fmt::Display for CheckerErrors {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "{} allocation errors", self.errors.len())?;
    for error in &self.errors {
      write!(fmt, "\n  {}", error)?;
    }
    Ok(())
  }
}

//=============================================================================
// Checker

struct Checker<'a> {
  graph: &'a Graph,
  target: TargetInfo,
  zero_reg: Option<u32>,
  caller_saved: [RegMask; 2],
}

impl<'a> Checker<'a> {
  fn new(graph: &'a Graph) -> Self {
    let target = TargetInfo::new(graph.arch);
    let caller_saved = match target.calling_convention() {
      Some(cc) => [cc.caller_saved(RegClass::Int), cc.caller_saved(RegClass::Float)],
      None => [RegMask::empty(), RegMask::empty()],
    };
    Self { graph, zero_reg: target.zero_reg(), caller_saved, target }
  }

  fn is_zero_reg(&self, loc: Location) -> bool {
    loc.is_register() && Some(loc.value()) == self.zero_reg
  }

  fn read(&self, state: &CheckerState, loc: Location) -> CheckerValue {
    if loc.is_immediate() {
      return match self.graph.immediates.get(loc.value() as usize) {
        Some(&imm) => CheckerValue::Constant(imm),
        None => CheckerValue::Unknown,
      };
    }
    if self.is_zero_reg(loc) {
      return CheckerValue::Constant(0);
    }
    state.values.get(&loc).copied().unwrap_or(CheckerValue::Unknown)
  }

  fn write(&self, state: &mut CheckerState, loc: Location, value: CheckerValue) {
    if loc.is_immediate() || loc.is_invalid() || self.is_zero_reg(loc) {
      return;
    }
    state.set(loc, value);
  }

  /// Whether a location holding `actual` may be read for `value`.
  fn holds(&self, actual: CheckerValue, value: ValueId) -> bool {
    match actual {
      CheckerValue::Value(v) => v == value,
      CheckerValue::Constant(c) => self.graph.constant_of(value) == Some(c),
      _ => false,
    }
  }

  fn def_value(&self, inst: &Inst, value: ValueId) -> CheckerValue {
    match inst.opcode.constant_value() {
      Some(c) => CheckerValue::Constant(c),
      None => CheckerValue::Value(value),
    }
  }

  fn process_moves(
    &self, id: InstId, moves: &[SpillFillData], parallel: bool, state: &mut CheckerState,
    errors: &mut Vec<CheckerError>,
  ) {
    let sources: Vec<CheckerValue> = if parallel {
      moves.iter().map(|m| self.read(state, m.src)).collect()
    } else {
      Vec::new()
    };
    for (i, m) in moves.iter().enumerate() {
      let value = if parallel { sources[i] } else { self.read(state, m.src) };
      if let CheckerValue::Unknown | CheckerValue::Conflicted = value {
        errors.push(CheckerError::UnknownSource { inst: id, src: m.src, actual: value });
      }
      self.write(state, m.dst, value);
    }
  }

  fn process_inst(&self, id: InstId, state: &mut CheckerState, errors: &mut Vec<CheckerError>) {
    let inst = &self.graph.insts[id];

    if let Some(sf) = &inst.spill_fill {
      if !sf.is_resolved() {
        errors.push(CheckerError::UnresolvedSpillFill { inst: id });
      }
      self.process_moves(id, sf.moves(), !sf.is_resolved(), state, errors);
      return;
    }

    if inst.is_phi() {
      // Done on the incoming edges.
      return;
    }

    if inst.input_locations.len() != inst.inputs.len()
      || inst.result_locations.len() != inst.results.len()
    {
      errors.push(CheckerError::MissingLocations { inst: id });
      return;
    }

    for (index, (&input, &location)) in
      inst.inputs.iter().zip(inst.input_locations.iter()).enumerate()
    {
      let actual = self.read(state, location);
      if !self.holds(actual, input) {
        errors.push(CheckerError::IncorrectValue {
          inst: id,
          index,
          location,
          expected: input,
          actual,
        });
      }
    }

    if inst.is_call() {
      let types: Vec<_> = inst.inputs.iter().map(|&v| self.graph.value_type(v)).collect();
      let params = self.target.calling_convention().map(|cc| cc.param_locations(&types));
      let in_register = |k: usize| match &params {
        Some(params) => params.get(k).map_or(false, |p| p.is_any_register()),
        None => false,
      };
      for (i, &loc) in inst.input_locations.iter().enumerate() {
        if !in_register(i) {
          continue;
        }
        let overlaps = (0..i).any(|k| in_register(k) && inst.input_locations[k] == loc);
        if overlaps {
          errors.push(CheckerError::ArgumentOverlap { inst: id, location: loc });
        }
      }
      let clobbered: Vec<Location> = state
        .values
        .keys()
        .copied()
        .filter(|loc| self.is_caller_saved(*loc))
        .collect();
      for loc in clobbered {
        state.set(loc, CheckerValue::Conflicted);
      }
    }

    for (&result, &location) in inst.results.iter().zip(inst.result_locations.iter()) {
      self.write(state, location, self.def_value(inst, result));
    }
  }

  fn is_caller_saved(&self, loc: Location) -> bool {
    match loc.register_number() {
      Some(reg) if loc.is_register() => self.caller_saved[0].test(reg),
      Some(reg) => self.caller_saved[1].test(reg),
      None => false,
    }
  }

  fn process_block(
    &self, block: BlockId, state: &mut CheckerState, errors: &mut Vec<CheckerError>,
  ) {
    for &id in &self.graph.blocks[block].insts {
      self.process_inst(id, state, errors);
    }
  }

  /// State flowing into `succ` from its `k`-th predecessor, whose exit state
  /// is `out`.
  fn edge_state(&self, out: &CheckerState, succ: BlockId, k: usize) -> CheckerState {
    let mut state = out.clone();
    let updates: Vec<(Location, CheckerValue)> = self
      .graph
      .phis(succ)
      .filter_map(|phi| {
        let inst = &self.graph.insts[phi];
        let location = *inst.result_locations.first()?;
        let input = *inst.inputs.get(k)?;
        let value = if self.holds(self.read(out, location), input) {
          CheckerValue::Value(inst.results[0])
        } else {
          CheckerValue::Conflicted
        };
        Some((location, value))
      })
      .collect();
    for (location, value) in updates {
      self.write(&mut state, location, value);
    }
    state
  }

  fn entry_state(
    &self, block: BlockId, exits: &TypedIxVec<BlockId, Option<CheckerState>>,
  ) -> CheckerState {
    if block == self.graph.entry {
      return CheckerState::default();
    }
    let mut merged: Option<CheckerState> = None;
    for (k, &pred) in self.graph.blocks[block].preds.iter().enumerate() {
      if let Some(out) = &exits[pred] {
        let state = self.edge_state(out, block, k);
        match merged.as_mut() {
          Some(merged) => merged.meet_with(&state),
          None => merged = Some(state),
        }
      }
    }
    merged.unwrap_or_default()
  }

  fn run(&self) -> Result<(), CheckerErrors> {
    let rpo = self.graph.rpo();
    let mut exits: TypedIxVec<BlockId, Option<CheckerState>> = TypedIxVec::new();
    exits.resize(self.graph.blocks.len(), None);

    // Find the fixpoint, ignoring errors.
    let mut scratch = Vec::new();
    let mut num_iterations = 0;
    let mut changed = true;
    while changed {
      changed = false;
      num_iterations += 1;
      for &block in &rpo {
        let mut state = self.entry_state(block, &exits);
        self.process_block(block, &mut state, &mut scratch);
        scratch.clear();
        if exits[block].as_ref() != Some(&state) {
          exits[block] = Some(state);
          changed = true;
        }
      }
    }
    debug!("checker: fixpoint after {} iterations", num_iterations);

    let mut errors = Vec::new();
    for &block in &rpo {
      let mut state = self.entry_state(block, &exits);
      self.process_block(block, &mut state, &mut errors);
    }

    if errors.is_empty() {
      Ok(())
    } else {
      Err(CheckerErrors { errors })
    }
  }
}

/// Checks that every input of every instruction of an allocated graph is
/// read from a location holding it, on every path.
pub fn verify_allocation(graph: &Graph) -> Result<(), CheckerErrors> {
  info!("checker: begin for {}", graph.name);
  let result = Checker::new(graph).run();
  match &result {
    Ok(()) => info!("checker: end, allocation is valid"),
    Err(errors) => info!("checker: end, {}", errors),
  }
  result
}

pub struct RegAllocVerifier<'a> {
  graph: &'a Graph,
}

impl<'a> RegAllocVerifier<'a> {
  pub fn new(graph: &'a Graph) -> Self {
    Self { graph }
  }

  pub fn run(&self) -> bool {
    verify_allocation(self.graph).is_ok()
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::data_structures::DataType;
  use crate::interface::{allocate_registers, RegAllocOptions};
  use crate::ir::{CondCode, Opcode, SpillFillKind, SpillFillInst};
  use crate::target::Arch;
  use smallvec::SmallVec;

  const I64: DataType = DataType::Int64;

  fn allocate(graph: &mut Graph, num_regs: Option<u32>) {
    let options = RegAllocOptions {
      available_register_mask: num_regs.map(RegMask::first),
      run_verifier: false,
      ..RegAllocOptions::default()
    };
    allocate_registers(graph, &options).unwrap();
  }

  fn assert_valid(graph: &Graph) {
    if let Err(errors) = verify_allocation(graph) {
      panic!("{}\n{}", errors, graph);
    }
  }

  fn errors(graph: &Graph) -> Vec<CheckerError> {
    verify_allocation(graph).unwrap_err().errors
  }

  #[test]
  fn lattice_meet() {
    let v = CheckerValue::Value(ValueId::new(1));
    let w = CheckerValue::Value(ValueId::new(2));
    assert_eq!(v.meet(&v), v);
    assert_eq!(v.meet(&w), CheckerValue::Conflicted);
    assert_eq!(CheckerValue::Unknown.meet(&v), v);
    assert_eq!(CheckerValue::Conflicted.meet(&v), CheckerValue::Conflicted);
    assert_eq!(CheckerValue::Constant(3).meet(&CheckerValue::Constant(3)), CheckerValue::Constant(3));
  }

  #[test]
  fn branchless() {
    let mut g = Graph::new("branchless", Arch::X86_64);
    let entry = g.entry;
    let a = g.param(I64);
    let b = g.param(I64);
    let c = g.constant(entry, I64, 5);
    let x = g.binary(entry, Opcode::Mul, a, c);
    let y = g.binary(entry, Opcode::Sub, x, b);
    let z = g.binary(entry, Opcode::And, y, a);
    g.ret(entry, z);
    allocate(&mut g, Some(2));
    assert_valid(&g);
    assert!(RegAllocVerifier::new(&g).run());
  }

  #[test]
  fn branching() {
    let mut g = Graph::new("diamond", Arch::Aarch64);
    let entry = g.entry;
    let left = g.add_block();
    let right = g.add_block();
    let join = g.add_block();
    g.add_edge(entry, left);
    g.add_edge(entry, right);
    g.add_edge(left, join);
    g.add_edge(right, join);
    let a = g.param(I64);
    let b = g.param(I64);
    g.append(entry, Opcode::If(CondCode::Gt), I64, &[a, b]);
    let x = g.binary(left, Opcode::Sub, a, b);
    let r = g.call(right, 4, I64, &[b]).unwrap();
    let y = g.binary(right, Opcode::Add, r, a);
    let phi = g.phi(join, I64, &[x, y]);
    let z = g.binary(join, Opcode::Mul, phi, a);
    g.ret(join, z);
    allocate(&mut g, None);
    assert_valid(&g);
  }

  fn counting_loop(arch: Arch) -> (Graph, ValueId) {
    let mut g = Graph::new("loop", arch);
    let entry = g.entry;
    let header = g.add_block();
    let body = g.add_block();
    let exit = g.add_block();
    g.add_edge(entry, header);
    g.add_edge(header, body);
    g.add_edge(header, exit);
    g.add_edge(body, header);
    let n = g.param(I64);
    let zero = g.constant(entry, I64, 0);
    let one = g.constant(entry, I64, 1);
    let i = g.phi(header, I64, &[zero]);
    let sum = g.phi(header, I64, &[zero]);
    g.append(header, Opcode::If(CondCode::Lt), I64, &[i, n]);
    let sum2 = g.binary(body, Opcode::Add, sum, i);
    let i2 = g.binary(body, Opcode::Add, i, one);
    g.add_phi_input(i, i2);
    g.add_phi_input(sum, sum2);
    g.ret(exit, sum);
    (g, i)
  }

  #[test]
  fn loop_with_phis() {
    for &arch in &[Arch::Aarch64, Arch::X86_64, Arch::Aarch32] {
      let (mut g, _) = counting_loop(arch);
      allocate(&mut g, Some(4));
      assert_valid(&g);
    }
  }

  #[test]
  fn single_block_loop() {
    let mut g = Graph::new("self_loop", Arch::Aarch64);
    let entry = g.entry;
    let body = g.add_block();
    let exit = g.add_block();
    g.add_edge(entry, body);
    g.add_edge(body, body);
    g.add_edge(body, exit);
    let n = g.param(I64);
    let one = g.constant(entry, I64, 1);
    let i = g.phi(body, I64, &[n]);
    let i2 = g.binary(body, Opcode::Sub, i, one);
    g.add_phi_input(i, i2);
    let zero = g.constant(body, I64, 0);
    g.append(body, Opcode::If(CondCode::Gt), I64, &[i2, zero]);
    g.ret(exit, i2);
    allocate(&mut g, None);
    assert_valid(&g);
  }

  #[test]
  fn load_pair() {
    let mut g = Graph::new("load_pair", Arch::Aarch64);
    let entry = g.entry;
    let base = g.param(DataType::Reference);
    let index = g.param(I64);
    let pair = g.append(entry, Opcode::LoadPair, I64, &[base, index]);
    let (lo, hi) = (g.insts[pair].results[0], g.insts[pair].results[1]);
    let r = g.call(entry, 2, I64, &[hi, lo]).unwrap();
    let s = g.binary(entry, Opcode::Add, r, lo);
    g.ret(entry, s);
    allocate(&mut g, None);
    let locs = &g.insts[pair].result_locations;
    assert_ne!(locs[0], locs[1]);
    assert_valid(&g);
  }

  #[test]
  fn zero_register() {
    let mut g = Graph::new("zero", Arch::Aarch64);
    let entry = g.entry;
    let zero = g.constant(entry, I64, 0);
    let null = g.value(entry, Opcode::NullPtr, DataType::Reference, &[]);
    let r = g.call(entry, 1, I64, &[zero]).unwrap();
    let s = g.binary(entry, Opcode::Add, r, zero);
    g.append(entry, Opcode::Store, I64, &[null, zero, s]);
    g.ret(entry, s);
    allocate(&mut g, None);
    assert_valid(&g);
    let add = g.values[s].def;
    assert_eq!(g.insts[add].input_locations[1], Location::register(31));
  }

  /// Arguments swapped between the two first parameter registers.
  fn swapped_arguments() -> (Graph, InstId) {
    let mut g = Graph::new("swap", Arch::Aarch64);
    let entry = g.entry;
    let a = g.param(I64);
    let b = g.param(I64);
    let r = g.call(entry, 3, I64, &[b, a]).unwrap();
    g.ret(entry, r);
    allocate(&mut g, None);
    let fill = g.blocks[entry]
      .insts
      .iter()
      .copied()
      .find(|&i| g.insts[i].spill_fill_kind() == Some(SpillFillKind::InputFill))
      .unwrap();
    (g, fill)
  }

  #[test]
  fn reordered_spill_fill_fails() {
    let (mut g, fill) = swapped_arguments();
    assert_valid(&g);

    let sf = g.insts[fill].spill_fill.as_ref().unwrap();
    assert_eq!(sf.moves().len(), 3);
    let mut reversed: SmallVec<[SpillFillData; 4]> = sf.moves().iter().copied().collect();
    reversed.reverse();
    let mut corrupted = SpillFillInst::new(SpillFillKind::InputFill);
    corrupted.set_resolved(reversed);
    g.insts[fill].spill_fill = Some(corrupted);

    assert!(!RegAllocVerifier::new(&g).run());
  }

  #[test]
  fn incorrect_input_register_fails() {
    let mut g = Graph::new("sub", Arch::Aarch64);
    let entry = g.entry;
    let a = g.param(I64);
    let b = g.param(I64);
    let d = g.binary(entry, Opcode::Sub, a, b);
    g.ret(entry, d);
    allocate(&mut g, None);
    assert_valid(&g);

    let sub = g.values[d].def;
    g.insts[sub].input_locations.swap(0, 1);
    let errors = errors(&g);
    assert_eq!(errors.len(), 2);
    assert!(matches!(
      errors[0],
      CheckerError::IncorrectValue { index: 0, actual: CheckerValue::Value(v), .. } if v == b
    ));
  }

  #[test]
  fn call_spill_fill() {
    let mut g = Graph::new("across_call", Arch::Aarch64);
    let entry = g.entry;
    let a = g.param(I64);
    let b = g.binary(entry, Opcode::Mul, a, a);
    let r = g.call(entry, 5, I64, &[b, a]).unwrap();
    let s = g.binary(entry, Opcode::Add, r, b);
    g.ret(entry, s);
    // Only caller-saved registers: b goes to the stack around the call.
    allocate(&mut g, Some(3));
    assert_valid(&g);
  }

  #[test]
  fn caller_saved_clobbered_by_call() {
    let build = |b_reg: u32| {
      let mut g = Graph::new("clobber", Arch::Aarch64);
      let entry = g.entry;
      let a = g.param(I64);
      let b = g.binary(entry, Opcode::Mul, a, a);
      let r = g.call(entry, 5, I64, &[a]).unwrap();
      let s = g.binary(entry, Opcode::Add, r, b);
      let ret = g.ret(entry, s);
      let (r0, rb) = (Location::register(0), Location::register(b_reg));
      let plan = [
        (g.values[a].def, vec![], vec![r0]),
        (g.values[b].def, vec![r0, r0], vec![rb]),
        (g.values[r].def, vec![r0], vec![r0]),
        (g.values[s].def, vec![r0, rb], vec![r0]),
        (ret, vec![r0], vec![]),
      ];
      for (id, inputs, results) in plan.iter() {
        g.insts[*id].input_locations = inputs.iter().copied().collect();
        g.insts[*id].result_locations = results.iter().copied().collect();
      }
      g
    };

    assert_valid(&build(19));
    assert!(matches!(
      errors(&build(1))[0],
      CheckerError::IncorrectValue { index: 1, actual: CheckerValue::Conflicted, .. }
    ));
  }

  #[test]
  fn overlapping_arguments_fail() {
    let (mut g, fill) = swapped_arguments();
    let call = g.blocks[g.entry].insts[g.position_in_block(fill) + 1];
    let first = g.insts[call].input_locations[0];
    g.insts[call].input_locations[1] = first;
    assert!(errors(&g)
      .iter()
      .any(|e| matches!(e, CheckerError::ArgumentOverlap { location, .. } if *location == first)));
  }

  #[test]
  fn value_passed_twice_on_the_stack() {
    let mut g = Graph::new("repeated_args", Arch::Aarch32);
    let entry = g.entry;
    let a = g.param(DataType::Int32);
    let b = g.param(DataType::Int32);
    let r = g.call(entry, 8, DataType::Int32, &[b, a, a, b, a, a]).unwrap();
    let s = g.binary(entry, Opcode::Add, r, a);
    g.ret(entry, s);
    allocate(&mut g, None);
    assert_valid(&g);

    let call = g.values[r].def;
    let locs = &g.insts[call].input_locations;
    assert!(locs[4..].iter().all(|loc| loc.is_memory()));
  }
}
