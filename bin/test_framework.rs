/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! An interpreter for the SSA IR of the allocator.
//!
//! The same graph can be run before allocation, where every SSA value is kept
//! in an unbounded table, and after allocation, where values only live in the
//! registers, stack slots and immediates their instructions name. Comparing
//! both runs checks that the allocation preserves the program's behavior.

use log::{debug, info, trace};

use ssa_regalloc::{
  Arch, BlockId, DataType, Graph, Inst, Location, LocationKind, Opcode,
  RegClass, TargetInfo, ValueId,
};

/// Size of the memory, in 64-bit words.
pub const MEM_SIZE: usize = 1024;

/// Bound on the number of instructions executed, spill-fills excluded.
pub const MAX_STEPS: usize = 100_000;

//=============================================================================
// Results

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RunStage {
  BeforeRegalloc,
  AfterRegalloc,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunResult {
  pub ret_value: Option<i64>,
  /// Number of instructions executed, spill-fills included.
  pub num_steps: usize,
  pub num_spill_fills: usize,
  pub mem: Vec<i64>,
}

/// What a call to `callee` returns. Calls are pure: they mix their arguments
/// into a value that depends on their order.
pub fn call_result(callee: u32, args: &[i64]) -> i64 {
  args.iter().fold(callee as i64, |acc, &arg| {
    acc.wrapping_mul(31).wrapping_add(arg)
  })
}

fn as_float(bits: i64) -> f64 {
  f64::from_bits(bits as u64)
}

fn from_float(f: f64) -> i64 {
  f.to_bits() as i64
}

/// Arithmetic shared by both stages.
fn binary_op(opcode: Opcode, ty: DataType, lhs: i64, rhs: i64) -> i64 {
  if ty.is_float() && opcode != Opcode::And {
    let (l, r) = (as_float(lhs), as_float(rhs));
    return from_float(match opcode {
      Opcode::Add => l + r,
      Opcode::Sub => l - r,
      Opcode::Mul => l * r,
      _ => unreachable!("{} is not a binary operation", opcode),
    });
  }
  match opcode {
    Opcode::Add => lhs.wrapping_add(rhs),
    Opcode::Sub => lhs.wrapping_sub(rhs),
    Opcode::Mul => lhs.wrapping_mul(rhs),
    Opcode::And => lhs & rhs,
    _ => unreachable!("{} is not a binary operation", opcode),
  }
}

/// Entry-block parameters, in calling convention order.
pub fn parameters(graph: &Graph) -> Vec<ValueId> {
  graph.blocks[graph.entry]
    .insts
    .iter()
    .map(|&inst| &graph.insts[inst])
    .filter(|inst| inst.opcode == Opcode::Parameter)
    .flat_map(|inst| inst.results.iter().copied())
    .collect()
}

//=============================================================================
// The interpreter

struct IState<'a> {
  graph: &'a Graph,
  target: TargetInfo,
  stage: RunStage,
  block: BlockId,
  /// Index of the next instruction in `block`.
  pc: usize,
  /// SSA values, before allocation.
  values: Vec<Option<i64>>,
  regs: Vec<Option<i64>>,
  fp_regs: Vec<Option<i64>>,
  slots: Vec<Option<i64>>,
  stack_params: Vec<Option<i64>>,
  mem: Vec<i64>,
  num_steps: usize,
  num_user_steps: usize,
  num_spill_fills: usize,
  ret_value: Option<i64>,
}

impl<'a> IState<'a> {
  fn new(graph: &'a Graph, args: &[i64], stage: RunStage) -> Result<Self, String> {
    let arch = match graph.arch {
      // Graphs without a backend still run in SSA form.
      Arch::None if stage == RunStage::BeforeRegalloc => Arch::Aarch64,
      arch => arch,
    };
    let target = TargetInfo::new(arch);
    let mut state = IState {
      graph,
      stage,
      block: graph.entry,
      pc: 0,
      values: vec![None; graph.values.len() as usize],
      regs: vec![None; target.num_regs(RegClass::Int) as usize],
      fp_regs: vec![None; target.num_regs(RegClass::Float) as usize],
      slots: vec![None; graph.num_stack_slots as usize],
      stack_params: Vec::new(),
      mem: vec![0; MEM_SIZE],
      num_steps: 0,
      num_user_steps: 0,
      num_spill_fills: 0,
      ret_value: None,
      target,
    };

    let params = parameters(graph);
    if params.len() != args.len() {
      return Err(format!("{} arguments for {} parameters", args.len(), params.len()));
    }
    match stage {
      RunStage::BeforeRegalloc => {
        for (&param, &arg) in params.iter().zip(args) {
          state.values[param.get() as usize] = Some(arg);
        }
      }
      RunStage::AfterRegalloc => {
        let types: Vec<_> = params.iter().map(|&p| graph.value_type(p)).collect();
        let locations = state
          .target
          .calling_convention()
          .map(|cc| cc.param_locations(&types))
          .ok_or_else(|| format!("no calling convention for {}", graph.arch))?;
        // Incoming parameters, then the outgoing arguments of calls.
        let num_stack_params = locations.iter().filter(|l| l.is_stack_parameter()).count();
        state.stack_params.resize(num_stack_params + graph.num_stack_args as usize, None);
        for (location, &arg) in locations.into_iter().zip(args) {
          state.write(location, arg)?;
        }
      }
    }
    Ok(state)
  }

  //---------------------------------------------------------------------------
  // Locations

  fn read(&self, loc: Location) -> Result<i64, String> {
    let index = loc.value() as usize;
    let cell = match loc.kind() {
      LocationKind::Register if self.target.is_zero_reg(loc) => return Ok(0),
      LocationKind::Register => self.regs.get(index),
      LocationKind::FpRegister => self.fp_regs.get(index),
      LocationKind::StackSlot => self.slots.get(index),
      LocationKind::StackParameter => self.stack_params.get(index),
      LocationKind::Immediate => {
        return self
          .graph
          .immediates
          .get(index)
          .copied()
          .ok_or_else(|| format!("no immediate #{}", index))
      }
      LocationKind::Invalid => return Err("read of an invalid location".to_string()),
    };
    match cell {
      None => Err(format!("{} is outside of the machine", loc)),
      Some(None) => Err(format!(
        "read of uninit {} in {} at {}",
        loc, self.block, self.pc
      )),
      Some(Some(value)) => Ok(*value),
    }
  }

  fn write(&mut self, loc: Location, value: i64) -> Result<(), String> {
    let index = loc.value() as usize;
    let cell = match loc.kind() {
      // Writes to the zero register and to rematerialized constants vanish.
      LocationKind::Register if self.target.is_zero_reg(loc) => return Ok(()),
      LocationKind::Immediate => return Ok(()),
      LocationKind::Register => self.regs.get_mut(index),
      LocationKind::FpRegister => self.fp_regs.get_mut(index),
      LocationKind::StackSlot => self.slots.get_mut(index),
      LocationKind::StackParameter => self.stack_params.get_mut(index),
      LocationKind::Invalid => return Err("write to an invalid location".to_string()),
    };
    match cell {
      None => Err(format!("{} is outside of the machine", loc)),
      Some(cell) => {
        *cell = Some(value);
        Ok(())
      }
    }
  }

  fn clobber_caller_saved(&mut self) -> Result<(), String> {
    let cc = self
      .target
      .calling_convention()
      .ok_or_else(|| format!("no calling convention for {}", self.graph.arch))?;
    for reg in cc.caller_saved(RegClass::Int).iter() {
      if let Some(cell) = self.regs.get_mut(reg as usize) {
        *cell = None;
      }
    }
    for reg in cc.caller_saved(RegClass::Float).iter() {
      if let Some(cell) = self.fp_regs.get_mut(reg as usize) {
        *cell = None;
      }
    }
    Ok(())
  }

  //---------------------------------------------------------------------------
  // Operands

  fn input(&self, inst: &Inst, index: usize) -> Result<i64, String> {
    match self.stage {
      RunStage::BeforeRegalloc => {
        let value = inst.inputs[index];
        self.values[value.get() as usize]
          .ok_or_else(|| format!("read of undefined {}", value))
      }
      RunStage::AfterRegalloc => {
        let loc = inst
          .input_locations
          .get(index)
          .copied()
          .ok_or_else(|| format!("no location for input {} of {:?}", index, inst.opcode))?;
        self.read(loc)
      }
    }
  }

  fn set_result(&mut self, inst: &Inst, index: usize, value: i64) -> Result<(), String> {
    match self.stage {
      RunStage::BeforeRegalloc => {
        self.values[inst.results[index].get() as usize] = Some(value);
        Ok(())
      }
      RunStage::AfterRegalloc => {
        let loc = inst
          .result_locations
          .get(index)
          .copied()
          .ok_or_else(|| format!("no location for result {} of {:?}", index, inst.opcode))?;
        self.write(loc, value)
      }
    }
  }

  fn address(&self, inst: &Inst) -> Result<usize, String> {
    let addr = self.input(inst, 0)?.wrapping_add(self.input(inst, 1)?);
    if addr < 0 || addr as usize >= MEM_SIZE {
      return Err(format!("invalid address {}", addr));
    }
    Ok(addr as usize)
  }

  fn condition(&self, inst: &Inst) -> Result<bool, String> {
    let (lhs, rhs) = (self.input(inst, 0)?, self.input(inst, 1)?);
    let cc = match inst.opcode {
      Opcode::Compare(cc) | Opcode::Select(cc) | Opcode::If(cc) => cc,
      _ => unreachable!(),
    };
    if self.graph.value_type(inst.inputs[0]).is_float() {
      Ok(cc.eval_float(as_float(lhs), as_float(rhs)))
    } else {
      Ok(cc.eval(lhs, rhs))
    }
  }

  //---------------------------------------------------------------------------
  // Control flow

  fn enter(&mut self, succ: BlockId) -> Result<(), String> {
    let pred = self.block;
    trace!("{} -> {}", pred, succ);
    self.block = succ;
    self.pc = 0;
    if self.stage == RunStage::AfterRegalloc {
      // Phi moves have already been executed on the edge.
      return Ok(());
    }
    let k = self.graph.blocks[succ]
      .preds
      .iter()
      .position(|&b| b == pred)
      .ok_or_else(|| format!("{} is not a predecessor of {}", pred, succ))?;
    let mut phi_values = Vec::new();
    for phi in self.graph.phis(succ) {
      let inst = &self.graph.insts[phi];
      phi_values.push((inst.results[0], self.input(inst, k)?));
    }
    for (value, v) in phi_values {
      self.values[value.get() as usize] = Some(v);
    }
    Ok(())
  }

  fn fall_through(&mut self) -> Result<(), String> {
    let succs = &self.graph.blocks[self.block].succs;
    match succs.len() {
      1 => {
        let succ = succs[0];
        self.enter(succ)
      }
      n => Err(format!("{} ends without a branch and has {} successors", self.block, n)),
    }
  }

  fn spill_fill(&mut self, inst: &Inst) -> Result<(), String> {
    let sf = match &inst.spill_fill {
      Some(sf) => sf,
      None => return Ok(()),
    };
    self.num_spill_fills += 1;
    if sf.is_resolved() {
      for m in sf.moves() {
        let v = self.read(m.src)?;
        self.write(m.dst, v)?;
      }
    } else {
      let mut vals = Vec::with_capacity(sf.moves().len());
      for m in sf.moves() {
        vals.push(self.read(m.src)?);
      }
      for (m, v) in sf.moves().iter().zip(vals) {
        self.write(m.dst, v)?;
      }
    }
    Ok(())
  }

  /// Executes the next instruction. Returns whether the program is finished.
  fn step(&mut self) -> Result<bool, String> {
    let graph = self.graph;
    let id = match graph.blocks[self.block].insts.get(self.pc) {
      Some(&id) => id,
      None => {
        self.fall_through()?;
        return Ok(false);
      }
    };
    self.pc += 1;
    self.num_steps += 1;

    let inst = &graph.insts[id];
    if inst.opcode != Opcode::SpillFill {
      self.num_user_steps += 1;
      if self.num_user_steps > MAX_STEPS {
        return Err(format!("more than {} steps", MAX_STEPS));
      }
    }

    match inst.opcode {
      Opcode::Parameter | Opcode::Phi => {}
      Opcode::Constant(c) => self.set_result(inst, 0, c)?,
      Opcode::NullPtr => self.set_result(inst, 0, 0)?,
      Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::And => {
        let (lhs, rhs) = (self.input(inst, 0)?, self.input(inst, 1)?);
        self.set_result(inst, 0, binary_op(inst.opcode, inst.ty, lhs, rhs))?;
      }
      Opcode::Compare(_) => {
        let cond = self.condition(inst)?;
        self.set_result(inst, 0, cond as i64)?;
      }
      Opcode::Select(_) => {
        let v = if self.condition(inst)? { self.input(inst, 2)? } else { self.input(inst, 3)? };
        self.set_result(inst, 0, v)?;
      }
      Opcode::Load => {
        let addr = self.address(inst)?;
        self.set_result(inst, 0, self.mem[addr])?;
      }
      Opcode::LoadPair => {
        let addr = self.address(inst)?;
        if addr + 1 >= MEM_SIZE {
          return Err(format!("invalid address {}", addr + 1));
        }
        let (first, second) = (self.mem[addr], self.mem[addr + 1]);
        self.set_result(inst, 0, first)?;
        self.set_result(inst, 1, second)?;
      }
      Opcode::Store => {
        let addr = self.address(inst)?;
        self.mem[addr] = self.input(inst, 2)?;
      }
      Opcode::Call { callee } => {
        let mut args = Vec::with_capacity(inst.inputs.len());
        for k in 0..inst.inputs.len() {
          args.push(self.input(inst, k)?);
        }
        let result = call_result(callee, &args);
        if self.stage == RunStage::AfterRegalloc {
          self.clobber_caller_saved()?;
        }
        if !inst.results.is_empty() {
          self.set_result(inst, 0, result)?;
        }
      }
      Opcode::If(_) => {
        let cond = self.condition(inst)?;
        let succs = &graph.blocks[self.block].succs;
        if succs.len() != 2 {
          return Err(format!("branch in {} with {} successors", self.block, succs.len()));
        }
        let succ = if cond { succs[0] } else { succs[1] };
        self.enter(succ)?;
      }
      Opcode::Return => {
        self.ret_value = Some(self.input(inst, 0)?);
        return Ok(true);
      }
      Opcode::ReturnVoid => return Ok(true),
      Opcode::SpillFill => self.spill_fill(inst)?,
    }
    Ok(false)
  }
}

/// Runs `graph` on `args`, at the given stage.
pub fn run_graph(
  graph: &Graph, who: &str, args: &[i64], stage: RunStage,
) -> Result<RunResult, String> {
  info!("Running stage '{}': graph '{}' ({})", who, graph.name, graph.arch);
  let mut state = IState::new(graph, args, stage)?;
  while !state.step()? {}
  debug!(
    "Running stage '{}': done. {} insts, {} spill-fills",
    who, state.num_steps, state.num_spill_fills
  );
  Ok(RunResult {
    ret_value: state.ret_value,
    num_steps: state.num_steps,
    num_spill_fills: state.num_spill_fills,
    mem: state.mem,
  })
}
