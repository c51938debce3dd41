/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! The SSA intermediate representation the allocator works on: a control-flow
//! graph of blocks holding typed instructions, plus the spill-fill
//! pseudo-instructions the allocator inserts.

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use std::fmt;

use crate::data_structures::{BlockId, DataType, InstId, TypedIxVec, ValueId};
use crate::location::Location;
use crate::target::Arch;

//=============================================================================
// Opcodes

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum CondCode {
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
}

impl CondCode {
  pub fn eval(self, lhs: i64, rhs: i64) -> bool {
    match self {
      CondCode::Eq => lhs == rhs,
      CondCode::Ne => lhs != rhs,
      CondCode::Lt => lhs < rhs,
      CondCode::Le => lhs <= rhs,
      CondCode::Gt => lhs > rhs,
      CondCode::Ge => lhs >= rhs,
    }
  }

  pub fn eval_float(self, lhs: f64, rhs: f64) -> bool {
    match self {
      CondCode::Eq => lhs == rhs,
      CondCode::Ne => lhs != rhs,
      CondCode::Lt => lhs < rhs,
      CondCode::Le => lhs <= rhs,
      CondCode::Gt => lhs > rhs,
      CondCode::Ge => lhs >= rhs,
    }
  }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Opcode {
  /// Next incoming argument of the function.
  Parameter,
  Constant(i64),
  NullPtr,
  Add,
  Sub,
  Mul,
  And,
  Compare(CondCode),
  /// `cc(a, b) ? lhs : rhs`, with inputs `[a, b, lhs, rhs]`.
  Select(CondCode),
  /// `mem[base + index]`.
  Load,
  /// `mem[base + index]` and `mem[base + index + 1]`, as two results.
  LoadPair,
  /// `mem[base + index] = value`, with inputs `[base, index, value]`.
  Store,
  Call {
    callee: u32,
  },
  /// Two-way branch: the first successor is taken when `cc(a, b)` holds.
  If(CondCode),
  /// Inputs are aligned with the predecessors of the block.
  Phi,
  Return,
  ReturnVoid,
  /// Parallel moves inserted by the register allocator.
  SpillFill,
}

impl Opcode {
  /// Number of SSA results produced by an instruction with this opcode and
  /// result type.
  pub fn num_results(self, ty: DataType) -> usize {
    match self {
      Opcode::LoadPair => 2,
      Opcode::Call { .. } => {
        if ty == DataType::Void {
          0
        } else {
          1
        }
      }
      Opcode::Store
      | Opcode::If(_)
      | Opcode::Return
      | Opcode::ReturnVoid
      | Opcode::SpillFill => 0,
      _ => 1,
    }
  }

  /// Expected number of inputs, or `None` when variadic.
  pub fn num_inputs(self) -> Option<usize> {
    match self {
      Opcode::Parameter
      | Opcode::Constant(_)
      | Opcode::NullPtr
      | Opcode::ReturnVoid
      | Opcode::SpillFill => Some(0),
      Opcode::Add
      | Opcode::Sub
      | Opcode::Mul
      | Opcode::And
      | Opcode::Compare(_)
      | Opcode::Load
      | Opcode::LoadPair
      | Opcode::If(_) => Some(2),
      Opcode::Store => Some(3),
      Opcode::Select(_) => Some(4),
      Opcode::Return => Some(1),
      Opcode::Call { .. } | Opcode::Phi => None,
    }
  }

  pub fn is_terminator(self) -> bool {
    matches!(self, Opcode::If(_) | Opcode::Return | Opcode::ReturnVoid)
  }

  pub fn is_constant(self) -> bool {
    matches!(self, Opcode::Constant(_) | Opcode::NullPtr)
  }

  /// The value of a constant-producing opcode.
  pub fn constant_value(self) -> Option<i64> {
    match self {
      Opcode::Constant(c) => Some(c),
      Opcode::NullPtr => Some(0),
      _ => None,
    }
  }
}

impl fmt::Display for Opcode {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Opcode::Parameter => write!(fmt, "Parameter"),
      Opcode::Constant(c) => write!(fmt, "Constant {}", c),
      Opcode::NullPtr => write!(fmt, "NullPtr"),
      Opcode::Add => write!(fmt, "Add"),
      Opcode::Sub => write!(fmt, "Sub"),
      Opcode::Mul => write!(fmt, "Mul"),
      Opcode::And => write!(fmt, "And"),
      Opcode::Compare(cc) => write!(fmt, "Compare {:?}", cc),
      Opcode::Select(cc) => write!(fmt, "Select {:?}", cc),
      Opcode::Load => write!(fmt, "Load"),
      Opcode::LoadPair => write!(fmt, "LoadPair"),
      Opcode::Store => write!(fmt, "Store"),
      Opcode::Call { callee } => write!(fmt, "Call #{}", callee),
      Opcode::If(cc) => write!(fmt, "If {:?}", cc),
      Opcode::Phi => write!(fmt, "Phi"),
      Opcode::Return => write!(fmt, "Return"),
      Opcode::ReturnVoid => write!(fmt, "ReturnVoid"),
      Opcode::SpillFill => write!(fmt, "SpillFill"),
    }
  }
}

//=============================================================================
// Spill-fill instructions

/// Primitive operation realized by one move of a spill-fill, derived from the
/// kinds of its two locations.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpillFillOp {
  /// Register to register.
  Move,
  /// Register to stack.
  Spill,
  /// Stack or immediate to register.
  Fill,
  /// Stack or immediate to stack.
  MemCopy,
}

#[derive(Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct SpillFillData {
  pub src: Location,
  pub dst: Location,
  pub ty: DataType,
}

impl SpillFillData {
  pub fn new(src: Location, dst: Location, ty: DataType) -> Self {
    Self { src, dst, ty }
  }

  pub fn op(&self) -> SpillFillOp {
    match (self.src.is_any_register(), self.dst.is_any_register()) {
      (true, true) => SpillFillOp::Move,
      (true, false) => SpillFillOp::Spill,
      (false, true) => SpillFillOp::Fill,
      (false, false) => SpillFillOp::MemCopy,
    }
  }
}

impl fmt::Debug for SpillFillData {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "{:?}({} -> {}):{}", self.op(), self.src, self.dst, self.ty)
  }
}

/// Why a spill-fill exists. Only split and phi moves may be shared with
/// unrelated moves; the other kinds service one particular instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum SpillFillKind {
  /// Moves the arguments of the following call into place.
  InputFill,
  /// Moves the result of the preceding call out of the return register.
  ResultSpill,
  /// Connects two sibling intervals of one value.
  SplitMove,
  /// Connects a control-flow edge, phi inputs included.
  PhiMove,
}

impl SpillFillKind {
  pub fn is_reusable(self) -> bool {
    matches!(self, SpillFillKind::SplitMove | SpillFillKind::PhiMove)
  }
}

/// A set of moves. Before resolution they execute in parallel; afterwards
/// they are an ordered sequence of primitive operations.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct SpillFillInst {
  kind: SpillFillKind,
  moves: SmallVec<[SpillFillData; 4]>,
  resolved: bool,
}

impl SpillFillInst {
  pub fn new(kind: SpillFillKind) -> Self {
    Self { kind, moves: SmallVec::new(), resolved: false }
  }

  pub fn kind(&self) -> SpillFillKind {
    self.kind
  }

  pub fn set_kind(&mut self, kind: SpillFillKind) {
    self.kind = kind;
  }

  pub fn moves(&self) -> &[SpillFillData] {
    &self.moves
  }

  pub fn is_empty(&self) -> bool {
    self.moves.is_empty()
  }

  pub fn is_resolved(&self) -> bool {
    self.resolved
  }

  pub fn add_move(&mut self, src: Location, dst: Location, ty: DataType) {
    debug_assert!(src.is_any_register() && dst.is_any_register());
    self.push(SpillFillData::new(src, dst, ty));
  }

  pub fn add_spill(&mut self, src: Location, dst: Location, ty: DataType) {
    debug_assert!(src.is_any_register() && dst.is_any_stack());
    self.push(SpillFillData::new(src, dst, ty));
  }

  pub fn add_fill(&mut self, src: Location, dst: Location, ty: DataType) {
    debug_assert!(src.is_memory() && dst.is_any_register());
    self.push(SpillFillData::new(src, dst, ty));
  }

  pub fn add_mem_copy(&mut self, src: Location, dst: Location, ty: DataType) {
    debug_assert!(src.is_memory() && dst.is_any_stack());
    self.push(SpillFillData::new(src, dst, ty));
  }

  /// Adds a move of whichever primitive kind the two locations call for.
  pub fn add(&mut self, src: Location, dst: Location, ty: DataType) {
    match SpillFillData::new(src, dst, ty).op() {
      SpillFillOp::Move => self.add_move(src, dst, ty),
      SpillFillOp::Spill => self.add_spill(src, dst, ty),
      SpillFillOp::Fill => self.add_fill(src, dst, ty),
      SpillFillOp::MemCopy => self.add_mem_copy(src, dst, ty),
    }
  }

  /// Forgets every move; the instruction may then be populated and resolved
  /// again.
  pub fn clear(&mut self) {
    self.moves.clear();
    self.resolved = false;
  }

  /// Installs the sequential order computed by the resolver.
  pub(crate) fn set_resolved(&mut self, moves: SmallVec<[SpillFillData; 4]>) {
    debug_assert!(!self.resolved, "spill-fill resolved twice");
    self.moves = moves;
    self.resolved = true;
  }

  fn push(&mut self, data: SpillFillData) {
    debug_assert!(!self.resolved, "adding moves to a resolved spill-fill");
    debug_assert!(!data.dst.is_immediate() && !data.dst.is_invalid());
    self.moves.push(data);
  }
}

//=============================================================================
// Instructions, values and blocks

#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Inst {
  pub opcode: Opcode,
  pub block: BlockId,
  /// Type of the results; `Void` when there are none. `Store` and `Return`
  /// carry the type of their stored or returned value.
  pub ty: DataType,
  pub inputs: SmallVec<[ValueId; 4]>,
  pub results: SmallVec<[ValueId; 2]>,
  /// Filled in by the allocator, one per input.
  pub input_locations: SmallVec<[Location; 4]>,
  /// Filled in by the allocator, one per result.
  pub result_locations: SmallVec<[Location; 2]>,
  pub spill_fill: Option<SpillFillInst>,
}

impl Inst {
  pub fn new(opcode: Opcode, block: BlockId, ty: DataType) -> Self {
    Self {
      opcode,
      block,
      ty,
      inputs: SmallVec::new(),
      results: SmallVec::new(),
      input_locations: SmallVec::new(),
      result_locations: SmallVec::new(),
      spill_fill: None,
    }
  }

  pub fn new_spill_fill(block: BlockId, kind: SpillFillKind) -> Self {
    let mut inst = Self::new(Opcode::SpillFill, block, DataType::Void);
    inst.spill_fill = Some(SpillFillInst::new(kind));
    inst
  }

  pub fn is_phi(&self) -> bool {
    self.opcode == Opcode::Phi
  }

  pub fn is_call(&self) -> bool {
    matches!(self.opcode, Opcode::Call { .. })
  }

  pub fn is_spill_fill(&self) -> bool {
    self.opcode == Opcode::SpillFill
  }

  /// Kind of the spill-fill, if this is one.
  pub fn spill_fill_kind(&self) -> Option<SpillFillKind> {
    self.spill_fill.as_ref().map(|sf| sf.kind())
  }
}

#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Value {
  pub def: InstId,
  pub ty: DataType,
}

#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Block {
  /// Phis first, then the body; a terminator, if any, comes last.
  pub insts: Vec<InstId>,
  pub preds: SmallVec<[BlockId; 2]>,
  pub succs: SmallVec<[BlockId; 2]>,
}

//=============================================================================
// Graph

#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Graph {
  pub name: String,
  pub arch: Arch,
  pub blocks: TypedIxVec<BlockId, Block>,
  pub insts: TypedIxVec<InstId, Inst>,
  pub values: TypedIxVec<ValueId, Value>,
  pub entry: BlockId,
  /// Constants the allocator rematerializes from, indexed by `Immediate`
  /// locations.
  pub immediates: Vec<i64>,
  /// Stack frame size chosen by the allocator.
  pub num_stack_slots: u32,
  /// Number of incoming arguments passed on the stack.
  pub num_stack_params: u32,
  /// Stack parameter slots of the outgoing arguments of calls. They follow
  /// the incoming ones.
  pub num_stack_args: u32,
}

impl Graph {
  /// Creates a graph holding only an empty entry block.
  pub fn new(name: &str, arch: Arch) -> Self {
    let mut blocks = TypedIxVec::new();
    let entry = blocks.push(Block::default());
    Self {
      name: name.to_string(),
      arch,
      blocks,
      insts: TypedIxVec::new(),
      values: TypedIxVec::new(),
      entry,
      immediates: Vec::new(),
      num_stack_slots: 0,
      num_stack_params: 0,
      num_stack_args: 0,
    }
  }

  pub fn add_block(&mut self) -> BlockId {
    self.blocks.push(Block::default())
  }

  pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
    self.blocks[from].succs.push(to);
    self.blocks[to].preds.push(from);
  }

  /// Appends an instruction to `block`, creating its results. Phis are kept
  /// ahead of the other instructions.
  pub fn append(
    &mut self, block: BlockId, opcode: Opcode, ty: DataType, inputs: &[ValueId],
  ) -> InstId {
    let mut inst = Inst::new(opcode, block, ty);
    inst.inputs.extend_from_slice(inputs);
    let id = self.insts.push(inst);
    for _ in 0..opcode.num_results(ty) {
      let value = self.values.push(Value { def: id, ty });
      self.insts[id].results.push(value);
    }
    if opcode == Opcode::Phi {
      let pos = self.num_phis(block);
      self.blocks[block].insts.insert(pos, id);
    } else {
      self.blocks[block].insts.push(id);
    }
    id
  }

  /// Appends a single-result instruction and returns its value.
  pub fn value(
    &mut self, block: BlockId, opcode: Opcode, ty: DataType, inputs: &[ValueId],
  ) -> ValueId {
    let inst = self.append(block, opcode, ty, inputs);
    self.insts[inst].results[0]
  }

  pub fn param(&mut self, ty: DataType) -> ValueId {
    let entry = self.entry;
    self.value(entry, Opcode::Parameter, ty, &[])
  }

  pub fn constant(&mut self, block: BlockId, ty: DataType, c: i64) -> ValueId {
    self.value(block, Opcode::Constant(c), ty, &[])
  }

  pub fn binary(
    &mut self, block: BlockId, opcode: Opcode, lhs: ValueId, rhs: ValueId,
  ) -> ValueId {
    let ty = match opcode {
      Opcode::Compare(_) => DataType::Bool,
      _ => self.values[lhs].ty,
    };
    self.value(block, opcode, ty, &[lhs, rhs])
  }

  pub fn phi(&mut self, block: BlockId, ty: DataType, inputs: &[ValueId]) -> ValueId {
    self.value(block, Opcode::Phi, ty, inputs)
  }

  /// Adds an input to a phi, for loops whose back-edge value is created after
  /// the phi.
  pub fn add_phi_input(&mut self, phi: ValueId, input: ValueId) {
    let def = self.values[phi].def;
    debug_assert!(self.insts[def].is_phi());
    self.insts[def].inputs.push(input);
  }

  pub fn call(
    &mut self, block: BlockId, callee: u32, ty: DataType, args: &[ValueId],
  ) -> Option<ValueId> {
    let inst = self.append(block, Opcode::Call { callee }, ty, args);
    self.insts[inst].results.first().copied()
  }

  pub fn ret(&mut self, block: BlockId, value: ValueId) -> InstId {
    let ty = self.values[value].ty;
    self.append(block, Opcode::Return, ty, &[value])
  }

  pub fn value_type(&self, value: ValueId) -> DataType {
    self.values[value].ty
  }

  pub fn def_inst(&self, value: ValueId) -> &Inst {
    &self.insts[self.values[value].def]
  }

  /// The constant a value is known to hold, if it is defined by a constant.
  pub fn constant_of(&self, value: ValueId) -> Option<i64> {
    self.def_inst(value).opcode.constant_value()
  }

  /// Index of an immediate-table entry holding `value`, added if missing.
  pub fn add_immediate(&mut self, value: i64) -> u32 {
    match self.immediates.iter().position(|&imm| imm == value) {
      Some(pos) => pos as u32,
      None => {
        self.immediates.push(value);
        self.immediates.len() as u32 - 1
      }
    }
  }

  pub fn phis(&self, block: BlockId) -> impl Iterator<Item = InstId> + '_ {
    self.blocks[block]
      .insts
      .iter()
      .copied()
      .take_while(move |&i| self.insts[i].is_phi())
  }

  pub fn num_phis(&self, block: BlockId) -> usize {
    self.phis(block).count()
  }

  pub fn last_inst(&self, block: BlockId) -> Option<InstId> {
    self.blocks[block].insts.last().copied()
  }

  pub fn position_in_block(&self, inst: InstId) -> usize {
    let block = self.insts[inst].block;
    self.blocks[block]
      .insts
      .iter()
      .position(|&i| i == inst)
      .unwrap_or_else(|| panic!("{} is not in its block {}", inst, block))
  }

  /// Inserts `inst` in `block` at index `pos` of its instruction list.
  pub fn insert_at(&mut self, block: BlockId, pos: usize, mut inst: Inst) -> InstId {
    inst.block = block;
    let id = self.insts.push(inst);
    self.blocks[block].insts.insert(pos, id);
    id
  }

  pub fn insert_before(&mut self, before: InstId, inst: Inst) -> InstId {
    let block = self.insts[before].block;
    let pos = self.position_in_block(before);
    self.insert_at(block, pos, inst)
  }

  pub fn insert_after(&mut self, after: InstId, inst: Inst) -> InstId {
    let block = self.insts[after].block;
    let pos = self.position_in_block(after);
    self.insert_at(block, pos + 1, inst)
  }

  pub fn is_critical_edge(&self, pred: BlockId, succ: BlockId) -> bool {
    self.blocks[pred].succs.len() > 1 && self.blocks[succ].preds.len() > 1
  }

  /// Splices a new empty block on the edge `pred -> succ`. The new block takes
  /// the place of `pred` in the predecessors of `succ` and the place of `succ`
  /// in the successors of `pred`, so phi inputs stay aligned.
  pub fn split_edge(&mut self, pred: BlockId, succ: BlockId) -> BlockId {
    let new_block = self.add_block();
    let succ_pos = self.blocks[pred]
      .succs
      .iter()
      .position(|&b| b == succ)
      .unwrap_or_else(|| panic!("no edge {} -> {}", pred, succ));
    let pred_pos = self.blocks[succ]
      .preds
      .iter()
      .position(|&b| b == pred)
      .unwrap_or_else(|| panic!("no edge {} -> {}", pred, succ));
    self.blocks[pred].succs[succ_pos] = new_block;
    self.blocks[succ].preds[pred_pos] = new_block;
    self.blocks[new_block].preds.push(pred);
    self.blocks[new_block].succs.push(succ);
    new_block
  }

  /// Blocks reachable from the entry, in reverse post order.
  pub fn rpo(&self) -> Vec<BlockId> {
    let mut visited = vec![false; self.blocks.len() as usize];
    let mut post_order = Vec::with_capacity(self.blocks.len() as usize);
    // Explicit stack of (block, index of the next successor to visit).
    let mut stack = vec![(self.entry, 0)];
    visited[self.entry.get() as usize] = true;
    while let Some(top) = stack.last_mut() {
      let (block, next) = *top;
      let succs = &self.blocks[block].succs;
      if next < succs.len() {
        top.1 += 1;
        let succ = succs[next];
        if !visited[succ.get() as usize] {
          visited[succ.get() as usize] = true;
          stack.push((succ, 0));
        }
      } else {
        post_order.push(block);
        stack.pop();
      }
    }
    post_order.reverse();
    post_order
  }

  /// Immediate dominators of the reachable blocks, computed with the
  /// Cooper-Harvey-Kennedy iterative algorithm. The entry is its own
  /// dominator; unreachable blocks have none.
  pub fn dominators(&self) -> TypedIxVec<BlockId, Option<BlockId>> {
    let rpo = self.rpo();
    let mut rpo_index = vec![usize::MAX; self.blocks.len() as usize];
    for (i, &block) in rpo.iter().enumerate() {
      rpo_index[block.get() as usize] = i;
    }

    let mut idom: TypedIxVec<BlockId, Option<BlockId>> = TypedIxVec::new();
    idom.resize(self.blocks.len(), None);
    idom[self.entry] = Some(self.entry);

    let intersect = |idom: &TypedIxVec<BlockId, Option<BlockId>>,
                     mut a: BlockId,
                     mut b: BlockId| {
      while a != b {
        while rpo_index[a.get() as usize] > rpo_index[b.get() as usize] {
          a = idom[a].unwrap_or(self.entry);
        }
        while rpo_index[b.get() as usize] > rpo_index[a.get() as usize] {
          b = idom[b].unwrap_or(self.entry);
        }
      }
      a
    };

    let mut changed = true;
    while changed {
      changed = false;
      for &block in rpo.iter().skip(1) {
        let mut new_idom = None;
        for &pred in &self.blocks[block].preds {
          if idom[pred].is_none() {
            continue;
          }
          new_idom = Some(match new_idom {
            None => pred,
            Some(cur) => intersect(&idom, pred, cur),
          });
        }
        if new_idom.is_some() && idom[block] != new_idom {
          idom[block] = new_idom;
          changed = true;
        }
      }
    }
    idom
  }

  /// Whether `a` dominates `b`, given the result of `dominators`.
  pub fn dominates(
    &self, idom: &TypedIxVec<BlockId, Option<BlockId>>, a: BlockId, b: BlockId,
  ) -> bool {
    let mut cur = b;
    loop {
      if cur == a {
        return true;
      }
      match idom[cur] {
        Some(parent) if parent != cur => cur = parent,
        _ => return false,
      }
    }
  }
}

impl fmt::Display for Graph {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    writeln!(fmt, "graph {} ({})", self.name, self.arch)?;
    if !self.immediates.is_empty() {
      writeln!(fmt, "  immediates {:?}", self.immediates)?;
    }
    for block in self.rpo() {
      let b = &self.blocks[block];
      writeln!(
        fmt,
        "{}: preds {:?} succs {:?}",
        block,
        b.preds.as_slice(),
        b.succs.as_slice()
      )?;
      for &id in &b.insts {
        let inst = &self.insts[id];
        write!(fmt, "  {:>4}: ", format!("{}", id))?;
        if let Some(sf) = &inst.spill_fill {
          writeln!(fmt, "SpillFill {:?} {:?}", sf.kind(), sf.moves())?;
          continue;
        }
        for (i, result) in inst.results.iter().enumerate() {
          if i > 0 {
            write!(fmt, ", ")?;
          }
          write!(fmt, "{}", result)?;
          if let Some(loc) = inst.result_locations.get(i) {
            write!(fmt, "({})", loc)?;
          }
        }
        if !inst.results.is_empty() {
          write!(fmt, " = ")?;
        }
        write!(fmt, "{}.{}", inst.opcode, inst.ty)?;
        for (i, input) in inst.inputs.iter().enumerate() {
          write!(fmt, "{}{}", if i == 0 { " " } else { ", " }, input)?;
          if let Some(loc) = inst.input_locations.get(i) {
            write!(fmt, "({})", loc)?;
          }
        }
        writeln!(fmt)?;
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn diamond() -> (Graph, [BlockId; 4]) {
    let mut g = Graph::new("diamond", Arch::Aarch64);
    let entry = g.entry;
    let left = g.add_block();
    let right = g.add_block();
    let join = g.add_block();
    g.add_edge(entry, left);
    g.add_edge(entry, right);
    g.add_edge(left, join);
    g.add_edge(right, join);
    let a = g.param(DataType::Int64);
    let b = g.param(DataType::Int64);
    g.append(entry, Opcode::If(CondCode::Lt), DataType::Void, &[a, b]);
    let phi = g.phi(join, DataType::Int64, &[a, b]);
    g.ret(join, phi);
    (g, [entry, left, right, join])
  }

  #[test]
  fn rpo_and_dominators() {
    let (g, [entry, left, right, join]) = diamond();
    let rpo = g.rpo();
    assert_eq!(rpo[0], entry);
    assert_eq!(*rpo.last().unwrap(), join);
    let idom = g.dominators();
    assert_eq!(idom[left], Some(entry));
    assert_eq!(idom[right], Some(entry));
    assert_eq!(idom[join], Some(entry));
    assert!(g.dominates(&idom, entry, join));
    assert!(!g.dominates(&idom, left, join));
  }

  #[test]
  fn split_edge_keeps_positions() {
    let (mut g, [entry, _left, right, join]) = diamond();
    let mid = g.split_edge(right, join);
    assert_eq!(g.blocks[join].preds[1], mid);
    assert_eq!(g.blocks[right].succs[0], mid);
    assert_eq!(g.blocks[mid].preds[0], right);
    assert_eq!(g.blocks[mid].succs[0], join);
    let idom = g.dominators();
    assert_eq!(idom[mid], Some(right));
    assert_eq!(idom[join], Some(entry));
    assert!(g.rpo().contains(&mid));
  }

  #[test]
  fn phis_stay_first() {
    let (mut g, [.., join]) = diamond();
    let a = ValueId::new(0);
    g.phi(join, DataType::Int64, &[a, a]);
    assert_eq!(g.num_phis(join), 2);
    let last = g.last_inst(join).unwrap();
    assert_eq!(g.insts[last].opcode, Opcode::Return);
  }

  #[test]
  fn spill_fill_ops() {
    let mut sf = SpillFillInst::new(SpillFillKind::SplitMove);
    sf.add(Location::register(1), Location::register(2), DataType::Int64);
    sf.add(Location::register(1), Location::stack_slot(0), DataType::Int64);
    sf.add(Location::immediate(0), Location::register(3), DataType::Int64);
    sf.add(Location::stack_slot(1), Location::stack_slot(2), DataType::Int64);
    let ops: Vec<_> = sf.moves().iter().map(|m| m.op()).collect();
    assert_eq!(
      ops,
      vec![
        SpillFillOp::Move,
        SpillFillOp::Spill,
        SpillFillOp::Fill,
        SpillFillOp::MemCopy
      ]
    );
    assert!(sf.kind().is_reusable());
    assert!(!SpillFillKind::InputFill.is_reusable());
    sf.clear();
    assert!(sf.is_empty());
  }

  #[test]
  fn immediates_are_shared() {
    let (mut g, _) = diamond();
    assert_eq!(g.add_immediate(42), 0);
    assert_eq!(g.add_immediate(7), 1);
    assert_eq!(g.add_immediate(42), 0);
  }
}
