/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Linearization of spill-fills: turns each set of parallel moves into a
//! sequence of primitive operations with the same net effect.
//!
//! The moves of one spill-fill are put in a table indexed by destination,
//! where every location of the frame has one dense index. A destination that
//! nobody reads starts a chain: its move is emitted first, then the move
//! writing the source it just read, and so on, so that each location is
//! overwritten only once all of its readers are done. Once a reader has
//! copied a value, later readers of the same source read the copy instead.
//!
//! What is left after all the chains are pure cycles. Each of them is broken
//! by saving one value to a scratch location, either the scratch register of
//! its class or, on targets without one, stack slot 0.

use log::{info, trace};
use smallvec::SmallVec;

use crate::data_structures::{DataType, RegClass};
use crate::ir::{Graph, SpillFillData, SpillFillInst};
use crate::location::{Location, LocationIndexer};
use crate::target::TargetInfo;

pub struct SpillFillsResolver<'a> {
  target: &'a TargetInfo,
  indexer: LocationIndexer,
  /// Move writing each location.
  dst_moves: Vec<Option<usize>>,
  /// Number of pending moves reading each location.
  loads: Vec<u32>,
  /// Type of the value read from each location.
  read_types: Vec<DataType>,
  /// Where the value initially held by each location can be read now.
  remap: Vec<Location>,
}

impl<'a> SpillFillsResolver<'a> {
  pub fn new(graph: &Graph, target: &'a TargetInfo) -> Self {
    let num_stack_params = graph.num_stack_params + graph.num_stack_args;
    Self::with_frame(target, graph.num_stack_slots, num_stack_params)
  }

  pub fn with_frame(
    target: &'a TargetInfo, num_stack_slots: u32, num_stack_params: u32,
  ) -> Self {
    let indexer = LocationIndexer::new(
      target.num_regs(RegClass::Int),
      target.num_regs(RegClass::Float),
      num_stack_slots,
      num_stack_params,
      target.zero_reg(),
    );
    Self {
      target,
      indexer,
      dst_moves: Vec::new(),
      loads: Vec::new(),
      read_types: Vec::new(),
      remap: Vec::new(),
    }
  }

  /// Resolves every unresolved spill-fill of the graph, and returns how many
  /// there were.
  #[inline(never)]
  pub fn run(&mut self, graph: &mut Graph) -> usize {
    info!("resolve_spill_fills: begin");
    let mut count = 0;
    for inst in graph.insts.iter_mut() {
      if let Some(sf) = inst.spill_fill.as_mut() {
        if !sf.is_resolved() {
          self.resolve(sf);
          count += 1;
        }
      }
    }
    info!("resolve_spill_fills: end, {} resolved", count);
    count
  }

  /// Replaces the parallel moves of `sf` by an equivalent sequence.
  pub fn resolve(&mut self, sf: &mut SpillFillInst) {
    debug_assert!(!sf.is_resolved(), "spill-fill resolved twice");
    let moves: SmallVec<[SpillFillData; 4]> =
      sf.moves().iter().filter(|m| m.src != m.dst).copied().collect();

    let size = self.indexer.size();
    self.dst_moves.clear();
    self.dst_moves.resize(size, None);
    self.loads.clear();
    self.loads.resize(size, 0);
    self.read_types.clear();
    self.read_types.resize(size, DataType::Void);
    self.remap.clear();
    self.remap.resize(size, Location::invalid());

    for (i, m) in moves.iter().enumerate() {
      match self.indexer.index(m.dst) {
        Some(dst) => {
          debug_assert!(self.dst_moves[dst].is_none(), "two moves write {}", m.dst);
          self.dst_moves[dst] = Some(i);
        }
        None => debug_assert!(false, "{:?} writes a read-only location", m),
      }
      if let Some(src) = self.indexer.index(m.src) {
        self.loads[src] += 1;
        self.read_types[src] = m.ty;
      }
    }

    let mut done: SmallVec<[bool; 4]> = SmallVec::from_elem(false, moves.len());
    let mut resolved = SmallVec::new();

    // Chains ending in a location nobody reads.
    for dst in 0..size {
      if let Some(i) = self.dst_moves[dst] {
        if !done[i] && self.loads[dst] == 0 {
          self.emit_chain(dst, &moves, &mut done, &mut resolved);
        }
      }
    }

    // Cycles.
    for dst in 0..size {
      if let Some(i) = self.dst_moves[dst] {
        if !done[i] {
          let ty = self.read_types[dst];
          let temp = self.temp_location(ty);
          trace!("breaking cycle at {} through {}", moves[i].dst, temp);
          resolved.push(SpillFillData::new(self.current(dst, moves[i].dst), temp, ty));
          self.remap[dst] = temp;
          self.emit_chain(dst, &moves, &mut done, &mut resolved);
        }
      }
    }

    trace!("resolved {:?} into {:?}", sf.moves(), resolved);
    sf.set_resolved(resolved);
  }

  /// Emits the move writing `dst`, then the one writing its source, as long
  /// as there is one pending.
  fn emit_chain(
    &mut self, mut dst: usize, moves: &[SpillFillData], done: &mut [bool],
    out: &mut SmallVec<[SpillFillData; 4]>,
  ) {
    loop {
      let i = match self.dst_moves[dst] {
        Some(i) if !done[i] => i,
        _ => break,
      };
      let m = moves[i];
      done[i] = true;
      match self.indexer.index(m.src) {
        Some(src) => {
          out.push(SpillFillData::new(self.current(src, m.src), m.dst, m.ty));
          self.loads[src] -= 1;
          self.remap[src] = m.dst;
          dst = src;
        }
        None => {
          // Immediates and the zero register are never overwritten.
          out.push(m);
          break;
        }
      }
    }
  }

  fn current(&self, index: usize, loc: Location) -> Location {
    let remapped = self.remap[index];
    if remapped.is_invalid() {
      loc
    } else {
      remapped
    }
  }

  fn temp_location(&self, ty: DataType) -> Location {
    self.target.temp_location(ty).unwrap_or_else(|| Location::stack_slot(0))
  }
}
