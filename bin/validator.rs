/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Checks that a graph is well-formed SSA before it is handed to the
//! allocator, and compares the runs of a graph before and after allocation.

use rustc_hash::FxHashSet;
use ssa_regalloc::{BlockId, DataType, Graph, Inst, Opcode, RegClass, TypedIxVec};

use crate::test_framework::RunResult;

struct Context<'a> {
  graph: &'a Graph,
  idom: TypedIxVec<BlockId, Option<BlockId>>,
}

impl<'a> Context<'a> {
  fn new(graph: &'a Graph) -> Self {
    Self { graph, idom: graph.dominators() }
  }

  fn class_of(&self, inst: &Inst, index: usize) -> RegClass {
    self.graph.value_type(inst.inputs[index]).class()
  }

  /// Whether the types of the inputs of `inst` fit its opcode.
  fn type_checks(&self, inst: &Inst) -> bool {
    let same = |a: usize, b: usize| self.class_of(inst, a) == self.class_of(inst, b);
    let is_int = |i: usize| self.class_of(inst, i) == RegClass::Int;
    match inst.opcode {
      Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::And => {
        same(0, 1) && self.class_of(inst, 0) == inst.ty.class()
      }
      Opcode::Compare(_) | Opcode::If(_) => same(0, 1),
      Opcode::Select(_) => {
        same(0, 1) && same(2, 3) && self.class_of(inst, 2) == inst.ty.class()
      }
      Opcode::Load | Opcode::LoadPair => is_int(0) && is_int(1),
      Opcode::Store => is_int(0) && is_int(1),
      Opcode::Phi => (0..inst.inputs.len()).all(|i| self.class_of(inst, i) == inst.ty.class()),
      Opcode::Return => {
        inst.ty != DataType::Void && self.class_of(inst, 0) == inst.ty.class()
      }
      _ => true,
    }
  }

  /// Whether the definition of every input of `inst` is available at it.
  fn defs_dominate(&self, inst: &Inst, pos: usize) -> Result<(), String> {
    let graph = self.graph;
    for (k, &input) in inst.inputs.iter().enumerate() {
      if input.get() >= graph.values.len() {
        return Err(format!("undefined input {}", input));
      }
      let def = graph.values[input].def;
      let def_block = graph.insts[def].block;
      let ok = if inst.is_phi() {
        match graph.blocks[inst.block].preds.get(k) {
          Some(&pred) => graph.dominates(&self.idom, def_block, pred),
          None => false,
        }
      } else if def_block == inst.block {
        graph.position_in_block(def) < pos
      } else {
        graph.dominates(&self.idom, def_block, inst.block)
      };
      if !ok {
        return Err(format!("{} is used where its definition does not dominate", input));
      }
    }
    Ok(())
  }
}

pub fn validate(graph: &Graph) -> Result<(), String> {
  let cx = Context::new(graph);

  if !graph.blocks[graph.entry].preds.is_empty() {
    return Err("the entry block has predecessors".into());
  }
  let reachable = graph.rpo();
  if reachable.len() != graph.blocks.len() as usize {
    return Err(format!(
      "{} blocks are unreachable",
      graph.blocks.len() as usize - reachable.len()
    ));
  }

  // Every value is a result of the instruction defining it, and of no other.
  for (i, value) in graph.values.iter().enumerate() {
    if !graph.insts[value.def].results.iter().any(|r| r.get() as usize == i) {
      return Err(format!("v{} is not a result of its definition", i));
    }
  }
  let mut defined = FxHashSet::default();
  for inst in graph.insts.iter() {
    for &result in &inst.results {
      if !defined.insert(result) {
        return Err(format!("{} is defined twice", result));
      }
    }
  }

  for block in reachable {
    let b = &graph.blocks[block];
    for (pos, &id) in b.insts.iter().enumerate() {
      let inst = &graph.insts[id];
      if inst.block != block {
        return Err(format!("{} is listed in {} but belongs to {}", id, block, inst.block));
      }
      if inst.is_spill_fill() {
        return Err(format!("unexpected spill-fill {} in {}", id, block));
      }
      if inst.opcode == Opcode::Parameter && block != graph.entry {
        return Err(format!("parameter {} outside of the entry block", id));
      }
      if inst.is_phi() && pos >= graph.num_phis(block) {
        return Err(format!("phi {} after the first instructions of {}", id, block));
      }

      let expected = match inst.opcode {
        Opcode::Phi => Some(b.preds.len()),
        opcode => opcode.num_inputs(),
      };
      if let Some(n) = expected {
        if inst.inputs.len() != n {
          return Err(format!("{} has {} inputs instead of {}", id, inst.inputs.len(), n));
        }
      }
      if inst.results.len() != inst.opcode.num_results(inst.ty) {
        return Err(format!("{} has {} results", id, inst.results.len()));
      }

      cx.defs_dominate(inst, pos).map_err(|msg| format!("{}: {}", id, msg))?;
      if !cx.type_checks(inst) {
        return Err(format!("{} in {} does not type check", id, block));
      }

      // No control flow instructions in the middle.
      let is_last = pos + 1 == b.insts.len();
      if inst.opcode.is_terminator() && !is_last {
        return Err(format!("control flow inst {} in the middle of {}", id, block));
      }
    }

    let num_succs = match graph.last_inst(block).map(|i| graph.insts[i].opcode) {
      Some(Opcode::If(_)) => 2,
      Some(Opcode::Return) | Some(Opcode::ReturnVoid) => 0,
      _ => 1,
    };
    if b.succs.len() != num_succs {
      return Err(format!(
        "{} has {} successors, its last instruction wants {}",
        block,
        b.succs.len(),
        num_succs
      ));
    }
  }

  Ok(())
}

/// Compares the run of a graph before allocation with the run after.
pub fn check_results(
  before_regalloc_result: &Result<RunResult, String>,
  after_regalloc_result: &Result<RunResult, String>,
) {
  match before_regalloc_result {
    Ok(before) => {
      let after = after_regalloc_result
        .as_ref()
        .expect("code after regalloc should have succeeded");

      // Allocation only adds instructions.
      assert!(before.num_steps <= after.num_steps, "inconsistent trace");

      assert_eq!(
        before.ret_value, after.ret_value,
        "Incorrect interpreter result: expected {:?}, observed {:?}",
        before.ret_value, after.ret_value
      );
      assert!(before.mem == after.mem, "Different memory contents before/after regalloc");
    }

    Err(err) => {
      assert_eq!(Some(err), after_regalloc_result.as_ref().err());
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::test_cases::{all_test_names, find_graph};
  use ssa_regalloc::{Arch, CondCode};

  const I64: DataType = DataType::Int64;

  #[test]
  fn test_cases_are_valid() {
    for name in all_test_names() {
      let case = find_graph(name, Arch::Aarch64).unwrap();
      if let Err(err) = validate(&case.graph) {
        panic!("{}: {}", name, err);
      }
    }
  }

  #[test]
  fn use_before_def() {
    let mut g = Graph::new("bad", Arch::Aarch64);
    let entry = g.entry;
    let left = g.add_block();
    let right = g.add_block();
    let join = g.add_block();
    g.add_edge(entry, left);
    g.add_edge(entry, right);
    g.add_edge(left, join);
    g.add_edge(right, join);
    let a = g.param(I64);
    g.append(entry, Opcode::If(CondCode::Eq), DataType::Void, &[a, a]);
    let x = g.binary(left, Opcode::Add, a, a);
    // x is only defined on one path.
    g.ret(join, x);
    assert!(validate(&g).unwrap_err().contains("does not dominate"));
  }

  #[test]
  fn phi_arity() {
    let mut g = Graph::new("bad_phi", Arch::Aarch64);
    let entry = g.entry;
    let next = g.add_block();
    g.add_edge(entry, next);
    let a = g.param(I64);
    let phi = g.phi(next, I64, &[a, a]);
    g.ret(next, phi);
    assert!(validate(&g).unwrap_err().contains("inputs instead of 1"));
  }

  #[test]
  fn missing_branch() {
    let mut g = Graph::new("bad_cfg", Arch::Aarch64);
    let entry = g.entry;
    let left = g.add_block();
    let right = g.add_block();
    g.add_edge(entry, left);
    g.add_edge(entry, right);
    let a = g.param(I64);
    g.ret(left, a);
    g.ret(right, a);
    assert!(validate(&g).unwrap_err().contains("successors"));
  }
}
