/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Implements fuzzing primitives for everything.
//!
//! Graphs are generated as nested regions (straight-line code, if-then-else,
//! if-then and counted loops), so that they are always well-formed SSA and
//! always terminate.

use arbitrary::{Arbitrary, Result, Unstructured};

use ssa_regalloc::{
  Arch, BlockId, CondCode, DataType, Graph, Location, Opcode, RegClass,
  SpillFillInst, SpillFillKind, TargetInfo, ValueId,
};

use crate::test_framework::MEM_SIZE;

const MAX_DEPTH: u32 = 3;
const MAX_REGIONS: u8 = 4;
const MAX_BLOCK_INSTS: u8 = 12;
const MAX_PARAMS: u8 = 10;
const MAX_TRIP_COUNT: i64 = 5;

fn arbitrary_arch(u: &mut Unstructured) -> Result<Arch> {
  Ok(match u8::arbitrary(u)? % 3 {
    0 => Arch::Aarch64,
    1 => Arch::X86_64,
    _ => Arch::Aarch32,
  })
}

fn arbitrary_cond(u: &mut Unstructured) -> Result<CondCode> {
  Ok(match u8::arbitrary(u)? % 6 {
    0 => CondCode::Eq,
    1 => CondCode::Ne,
    2 => CondCode::Lt,
    3 => CondCode::Le,
    4 => CondCode::Gt,
    _ => CondCode::Ge,
  })
}

//=============================================================================
// Graphs

/// Values available at the current point, by class.
#[derive(Clone, Default)]
struct Scope {
  ints: Vec<ValueId>,
  floats: Vec<ValueId>,
}

impl Scope {
  fn of(&mut self, class: RegClass) -> &mut Vec<ValueId> {
    match class {
      RegClass::Int => &mut self.ints,
      RegClass::Float => &mut self.floats,
    }
  }

  fn add(&mut self, graph: &Graph, value: ValueId) {
    let class = graph.value_type(value).class();
    self.of(class).push(value);
  }
}

struct FuzzingEnv {
  graph: Graph,
  /// Constants of the entry block, usable everywhere.
  zero: ValueId,
  one: ValueId,
  mask: ValueId,
}

impl FuzzingEnv {
  fn pick(&self, values: &[ValueId], u: &mut Unstructured) -> Result<ValueId> {
    debug_assert!(!values.is_empty());
    Ok(values[usize::arbitrary(u)? % values.len()])
  }

  fn int(&self, scope: &Scope, u: &mut Unstructured) -> Result<ValueId> {
    self.pick(&scope.ints, u)
  }

  /// A memory index: some value, masked to stay in bounds.
  fn index(
    &mut self, block: BlockId, scope: &Scope, u: &mut Unstructured,
  ) -> Result<ValueId> {
    let v = self.int(scope, u)?;
    let mask = self.mask;
    Ok(self.graph.binary(block, Opcode::And, v, mask))
  }

  fn inst(&mut self, block: BlockId, scope: &mut Scope, u: &mut Unstructured) -> Result<()> {
    const NUM_VARIANTS: u8 = 10;
    let zero = self.zero;
    let value = match u8::arbitrary(u)? % NUM_VARIANTS {
      0 => {
        let c = match u8::arbitrary(u)? % 4 {
          0 => 0,
          _ => i64::from(i16::arbitrary(u)?),
        };
        let ty = if bool::arbitrary(u)? { DataType::Int64 } else { DataType::Int32 };
        Some(self.graph.constant(block, ty, c))
      }
      1 | 2 => {
        let class = if !scope.floats.is_empty() && bool::arbitrary(u)? {
          RegClass::Float
        } else {
          RegClass::Int
        };
        let opcode = match u8::arbitrary(u)? % 4 {
          0 => Opcode::Add,
          1 => Opcode::Sub,
          2 => Opcode::Mul,
          _ => Opcode::And,
        };
        let lhs = self.pick(scope.of(class), u)?;
        let rhs = self.pick(scope.of(class), u)?;
        Some(self.graph.binary(block, opcode, lhs, rhs))
      }
      3 => {
        let (lhs, rhs) = (self.int(scope, u)?, self.int(scope, u)?);
        let cond = arbitrary_cond(u)?;
        Some(self.graph.binary(block, Opcode::Compare(cond), lhs, rhs))
      }
      4 => {
        let inputs = [
          self.int(scope, u)?,
          self.int(scope, u)?,
          self.int(scope, u)?,
          self.int(scope, u)?,
        ];
        let cond = arbitrary_cond(u)?;
        Some(self.graph.value(block, Opcode::Select(cond), DataType::Int64, &inputs))
      }
      5 => {
        let index = self.index(block, scope, u)?;
        Some(self.graph.binary(block, Opcode::Load, zero, index))
      }
      6 => {
        let index = self.index(block, scope, u)?;
        let pair = self.graph.append(block, Opcode::LoadPair, DataType::Int64, &[zero, index]);
        let results = self.graph.insts[pair].results.clone();
        for r in results {
          scope.add(&self.graph, r);
        }
        None
      }
      7 => {
        let index = self.index(block, scope, u)?;
        let class = if !scope.floats.is_empty() && bool::arbitrary(u)? {
          RegClass::Float
        } else {
          RegClass::Int
        };
        let v = self.pick(scope.of(class), u)?;
        self.graph.append(block, Opcode::Store, DataType::Void, &[zero, index, v]);
        None
      }
      8 => {
        let num_args = usize::arbitrary(u)? % 11;
        let mut args = Vec::with_capacity(num_args);
        for _ in 0..num_args {
          let class = if !scope.floats.is_empty() && u8::arbitrary(u)? % 4 == 0 {
            RegClass::Float
          } else {
            RegClass::Int
          };
          args.push(self.pick(scope.of(class), u)?);
        }
        let ty = match u8::arbitrary(u)? % 4 {
          0 => DataType::Void,
          1 => DataType::Float64,
          _ => DataType::Int64,
        };
        let callee = u32::from(u8::arbitrary(u)?);
        self.graph.call(block, callee, ty, &args)
      }
      9 => Some(self.graph.value(block, Opcode::NullPtr, DataType::Reference, &[])),
      x => {
        debug_assert!(x < NUM_VARIANTS, "update NUM_VARIANTS above");
        unreachable!()
      }
    };
    if let Some(value) = value {
      scope.add(&self.graph, value);
    }
    Ok(())
  }

  fn straight_code(
    &mut self, block: BlockId, scope: &mut Scope, u: &mut Unstructured,
  ) -> Result<()> {
    let num_insts = u8::arbitrary(u)? % MAX_BLOCK_INSTS;
    for _ in 0..num_insts {
      self.inst(block, scope, u)?;
    }
    Ok(())
  }

  /// Emits code starting in `block`, and returns the block where it ends.
  fn region(
    &mut self, block: BlockId, scope: &mut Scope, depth: u32, u: &mut Unstructured,
  ) -> Result<BlockId> {
    let kind = if depth >= MAX_DEPTH { 0 } else { u8::arbitrary(u)? % 4 };
    match kind {
      1 => self.if_else(block, scope, depth, u),
      2 => self.if_then(block, scope, depth, u),
      3 => self.counted_loop(block, scope, depth, u),
      _ => {
        self.straight_code(block, scope, u)?;
        Ok(block)
      }
    }
  }

  fn branch(&mut self, block: BlockId, scope: &Scope, u: &mut Unstructured) -> Result<()> {
    let (lhs, rhs) = (self.int(scope, u)?, self.int(scope, u)?);
    let cond = arbitrary_cond(u)?;
    self.graph.append(block, Opcode::If(cond), DataType::Void, &[lhs, rhs]);
    Ok(())
  }

  fn if_else(
    &mut self, block: BlockId, scope: &mut Scope, depth: u32, u: &mut Unstructured,
  ) -> Result<BlockId> {
    self.straight_code(block, scope, u)?;
    self.branch(block, scope, u)?;
    let left = self.graph.add_block();
    let right = self.graph.add_block();
    let join = self.graph.add_block();
    self.graph.add_edge(block, left);
    self.graph.add_edge(block, right);

    let mut left_scope = scope.clone();
    let left_end = self.region(left, &mut left_scope, depth + 1, u)?;
    let mut right_scope = scope.clone();
    let right_end = self.region(right, &mut right_scope, depth + 1, u)?;
    self.graph.add_edge(left_end, join);
    self.graph.add_edge(right_end, join);

    let num_phis = u8::arbitrary(u)? % 3;
    for _ in 0..num_phis {
      let has_floats = !left_scope.floats.is_empty() && !right_scope.floats.is_empty();
      let class = if has_floats && bool::arbitrary(u)? {
        RegClass::Float
      } else {
        RegClass::Int
      };
      let l = self.pick(left_scope.of(class), u)?;
      let r = self.pick(right_scope.of(class), u)?;
      let ty = self.graph.value_type(l);
      let phi = self.graph.phi(join, ty, &[l, r]);
      scope.add(&self.graph, phi);
    }
    Ok(join)
  }

  fn if_then(
    &mut self, block: BlockId, scope: &mut Scope, depth: u32, u: &mut Unstructured,
  ) -> Result<BlockId> {
    self.straight_code(block, scope, u)?;
    self.branch(block, scope, u)?;
    let then = self.graph.add_block();
    let join = self.graph.add_block();
    self.graph.add_edge(block, then);
    // Critical edge.
    self.graph.add_edge(block, join);

    let mut then_scope = scope.clone();
    let then_end = self.region(then, &mut then_scope, depth + 1, u)?;
    self.graph.add_edge(then_end, join);

    // Phis of the join are not available on the skipping edge.
    let skipped_scope = scope.clone();
    let num_phis = u8::arbitrary(u)? % 3;
    for _ in 0..num_phis {
      let skipped = self.int(&skipped_scope, u)?;
      let taken = self.int(&then_scope, u)?;
      let ty = self.graph.value_type(skipped);
      let phi = self.graph.phi(join, ty, &[skipped, taken]);
      scope.add(&self.graph, phi);
    }
    Ok(join)
  }

  fn counted_loop(
    &mut self, block: BlockId, scope: &mut Scope, depth: u32, u: &mut Unstructured,
  ) -> Result<BlockId> {
    self.straight_code(block, scope, u)?;
    let trip_count = 1 + i64::from(u8::arbitrary(u)?) % MAX_TRIP_COUNT;
    let bound = self.graph.constant(block, DataType::Int64, trip_count);
    let header = self.graph.add_block();
    self.graph.add_edge(block, header);

    // Loop-carried values: a counter plus a few values of the scope.
    let zero = self.zero;
    let counter = self.graph.phi(header, DataType::Int64, &[zero]);
    let num_carried = 1 + u8::arbitrary(u)? % 3;
    let mut carried = Vec::new();
    for _ in 0..num_carried {
      let init = self.int(scope, u)?;
      let ty = self.graph.value_type(init);
      carried.push(self.graph.phi(header, ty, &[init]));
    }

    let mut body_scope = scope.clone();
    body_scope.ints.push(counter);
    body_scope.ints.extend_from_slice(&carried);
    let latch = self.region(header, &mut body_scope, depth + 1, u)?;

    let one = self.one;
    let next = self.graph.binary(latch, Opcode::Add, counter, one);
    for &phi in &carried {
      let update = self.int(&body_scope, u)?;
      self.graph.add_phi_input(phi, update);
    }
    self.graph.add_phi_input(counter, next);
    self.graph.append(latch, Opcode::If(CondCode::Lt), DataType::Void, &[next, bound]);

    let exit = self.graph.add_block();
    self.graph.add_edge(latch, header);
    self.graph.add_edge(latch, exit);

    // Values of the header stay available after the loop.
    scope.ints.push(counter);
    scope.ints.extend_from_slice(&carried);
    Ok(exit)
  }
}

/// A random well-formed graph, with the arguments to run it on.
#[derive(Clone, Debug)]
pub struct FuzzingGraph {
  pub graph: Graph,
  pub args: Vec<i64>,
}

impl<'a> Arbitrary<'a> for FuzzingGraph {
  fn arbitrary(u: &mut Unstructured<'a>) -> Result<Self> {
    let arch = arbitrary_arch(u)?;
    let mut graph = Graph::new("funk", arch);
    let entry = graph.entry;

    let mut scope = Scope::default();
    let mut args = Vec::new();
    let num_params = u8::arbitrary(u)? % MAX_PARAMS;
    for _ in 0..num_params {
      let (ty, arg) = if u8::arbitrary(u)? % 4 == 0 {
        let f = f64::from(i16::arbitrary(u)?) / 8.0;
        (DataType::Float64, f.to_bits() as i64)
      } else {
        (DataType::Int64, i64::from(i32::arbitrary(u)?))
      };
      let p = graph.param(ty);
      scope.add(&graph, p);
      args.push(arg);
    }
    let zero = graph.constant(entry, DataType::Int64, 0);
    let one = graph.constant(entry, DataType::Int64, 1);
    let mask = graph.constant(entry, DataType::Int64, (MEM_SIZE / 2 - 1) as i64);
    scope.ints.extend_from_slice(&[zero, one]);

    let mut env = FuzzingEnv { graph, zero, one, mask };
    let mut block = entry;
    let num_regions = 1 + u8::arbitrary(u)? % MAX_REGIONS;
    for _ in 0..num_regions {
      block = env.region(block, &mut scope, 0, u)?;
    }

    if bool::arbitrary(u)? {
      let class = if !scope.floats.is_empty() && bool::arbitrary(u)? {
        RegClass::Float
      } else {
        RegClass::Int
      };
      let v = env.pick(scope.of(class), u)?;
      env.graph.ret(block, v);
    } else {
      env.graph.append(block, Opcode::ReturnVoid, DataType::Void, &[]);
    }

    Ok(FuzzingGraph { graph: env.graph, args })
  }
}

//=============================================================================
// Parallel moves

/// A random set of parallel moves over a small frame, with distinct
/// destinations.
#[derive(Clone, Debug)]
pub struct FuzzingMoves {
  pub arch: Arch,
  pub num_stack_slots: u32,
  pub spill_fill: SpillFillInst,
  pub num_immediates: u32,
}

pub const NUM_FUZZ_SLOTS: u32 = 6;
const NUM_FUZZ_IMMEDIATES: u32 = 4;

/// Locations of `class` a move may use on `target`. Each class gets its own
/// stack slots, and scratch locations are left out.
pub fn fuzz_locations(target: &TargetInfo, class: RegClass) -> Vec<Location> {
  let first_slot = if target.needs_scratch_slot() { 1 } else { 0 };
  let per_class = NUM_FUZZ_SLOTS / 2;
  let first_slot = first_slot + class as u32 * per_class;
  let temp = target.temp_reg(class);
  let regs = target
    .allocatable_mask(class)
    .iter()
    .filter(|&reg| Some(reg) != temp)
    .map(|reg| match class {
      RegClass::Int => Location::register(reg),
      RegClass::Float => Location::fp_register(reg),
    });
  regs
    .take(8)
    .chain((first_slot..first_slot + per_class).map(Location::stack_slot))
    .collect()
}

impl<'a> Arbitrary<'a> for FuzzingMoves {
  fn arbitrary(u: &mut Unstructured<'a>) -> Result<Self> {
    let arch = arbitrary_arch(u)?;
    let target = TargetInfo::new(arch);
    let first_slot = if target.needs_scratch_slot() { 1 } else { 0 };

    let mut spill_fill = SpillFillInst::new(SpillFillKind::SplitMove);
    let mut written = Vec::new();
    let num_moves = usize::arbitrary(u)? % 16;
    for _ in 0..num_moves {
      let (class, ty) = if bool::arbitrary(u)? {
        (RegClass::Int, DataType::Int64)
      } else {
        (RegClass::Float, DataType::Float64)
      };
      let locations = fuzz_locations(&target, class);
      let dst = locations[usize::arbitrary(u)? % locations.len()];
      if written.contains(&dst) {
        continue;
      }
      let src = match (u8::arbitrary(u)? % 8, target.zero_reg()) {
        (0, _) => Location::immediate(u32::arbitrary(u)? % NUM_FUZZ_IMMEDIATES),
        (1, Some(zero)) if class == RegClass::Int => Location::register(zero),
        _ => locations[usize::arbitrary(u)? % locations.len()],
      };
      written.push(dst);
      spill_fill.add(src, dst, ty);
    }

    Ok(FuzzingMoves {
      arch,
      num_stack_slots: first_slot + NUM_FUZZ_SLOTS,
      spill_fill,
      num_immediates: NUM_FUZZ_IMMEDIATES,
    })
  }
}
