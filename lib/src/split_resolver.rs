/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Connection of split intervals.
//!
//! Once every sibling of every value has a location, the value must be moved
//! wherever two consecutive siblings disagree. Splits in the middle of a block
//! become a `SplitMove` right before the instruction following the split gap.
//! Control-flow edges get the moves of every value live across them and of the
//! phi inputs flowing along them, either at the tail of the predecessor, at the
//! head of the successor, or in a new block spliced onto critical edges.

use log::{debug, info, trace};

use crate::analysis::Liveness;
use crate::data_structures::{
  BlockId, DataType, InstId, LifeNumber, Map, LIFE_NUMBER_GAP,
};
use crate::ir::{Graph, Inst, SpillFillInst, SpillFillKind};
use crate::location::Location;

/// Moves to execute when control flows from `pred` to `succ`.
struct EdgeMoves {
  pred: BlockId,
  succ: BlockId,
  moves: SpillFillInst,
}

pub struct SplitResolver<'a> {
  liveness: &'a Liveness,
  /// Phi moves run when entering each block, from its only predecessor.
  heads: Map<BlockId, InstId>,
  /// Phi moves run when leaving each block, to its only successor. In an
  /// empty block they come after the head moves.
  tails: Map<BlockId, InstId>,
  num_split_moves: usize,
  num_edge_moves: usize,
  num_new_blocks: usize,
}

impl<'a> SplitResolver<'a> {
  pub fn new(liveness: &'a Liveness) -> Self {
    Self {
      liveness,
      heads: Map::default(),
      tails: Map::default(),
      num_split_moves: 0,
      num_edge_moves: 0,
      num_new_blocks: 0,
    }
  }

  /// Inserts every connecting move in `graph`. Returns the number of blocks
  /// added on critical edges.
  pub fn run(&mut self, graph: &mut Graph) -> usize {
    info!("split_resolver: begin");
    self.resolve_intra_block(graph);
    let edges = self.collect_edge_moves(graph);
    for edge in edges {
      self.place_edge_moves(graph, edge);
    }
    info!(
      "split_resolver: end, {} split moves, {} edge moves, {} new blocks",
      self.num_split_moves, self.num_edge_moves, self.num_new_blocks
    );
    self.num_new_blocks
  }

  //===========================================================================
  // Splits inside blocks

  #[inline(never)]
  fn resolve_intra_block(&mut self, graph: &mut Graph) {
    let liveness = self.liveness;
    let intervals = &liveness.intervals;
    for root in intervals.ids() {
      let int = &intervals[root];
      if int.is_physical() || int.is_split_sibling() {
        continue;
      }
      let mut prev = root;
      while let Some(next) = intervals[prev].sibling() {
        let (a, b) = (&intervals[prev], &intervals[next]);
        let pos = b.begin();
        if a.end() == pos && a.location() != b.location() {
          self.insert_split_move(graph, pos, a.location(), b.location(), a.ty());
        }
        prev = next;
      }
    }
  }

  fn insert_split_move(
    &mut self, graph: &mut Graph, pos: LifeNumber, src: Location, dst: Location,
    ty: DataType,
  ) {
    if dst.is_immediate() {
      // Rematerialized when read.
      return;
    }
    // A split at the end of a block is connected by the edge moves.
    let next = match self.liveness.inst_at(pos + 1) {
      Some(next) if pos % 2 == 1 => next,
      _ => {
        trace!("split at {} left to the edges", pos);
        return;
      }
    };

    // Argument moves of a call read the new sibling, so come after.
    let block = graph.insts[next].block;
    let mut at = graph.position_in_block(next);
    while at > 0 {
      let prev = graph.blocks[block].insts[at - 1];
      if graph.insts[prev].spill_fill_kind() == Some(SpillFillKind::InputFill) {
        at -= 1;
      } else {
        break;
      }
    }

    let reusable = if at > 0 {
      let prev = graph.blocks[block].insts[at - 1];
      match &graph.insts[prev].spill_fill {
        Some(sf) if sf.kind() == SpillFillKind::SplitMove && !sf.is_resolved() => Some(prev),
        _ => None,
      }
    } else {
      None
    };

    debug!("split move {} -> {} at {} (before {})", src, dst, pos, next);
    self.num_split_moves += 1;
    match reusable {
      Some(prev) => {
        if let Some(sf) = graph.insts[prev].spill_fill.as_mut() {
          sf.add(src, dst, ty);
        }
      }
      None => {
        let mut inst = Inst::new_spill_fill(block, SpillFillKind::SplitMove);
        if let Some(sf) = inst.spill_fill.as_mut() {
          sf.add(src, dst, ty);
        }
        graph.insert_at(block, at, inst);
      }
    }
  }

  //===========================================================================
  // Control-flow edges

  #[inline(never)]
  fn collect_edge_moves(&self, graph: &Graph) -> Vec<EdgeMoves> {
    let liveness = self.liveness;
    let mut edges = Vec::new();
    for &succ in &liveness.linear_order {
      let succ_begin = match liveness.block_range(succ) {
        Some(range) => range.begin,
        None => continue,
      };
      for (k, &pred) in graph.blocks[succ].preds.iter().enumerate() {
        let pred_end = match liveness.block_range(pred) {
          Some(range) => range.end,
          None => continue,
        };
        let last_pos = pred_end - LIFE_NUMBER_GAP;
        let mut moves = SpillFillInst::new(SpillFillKind::PhiMove);

        for &value in &liveness.live_in[succ] {
          let src = liveness.location_at(value, last_pos);
          let dst = liveness.location_at(value, succ_begin);
          if let (Some(src), Some(dst)) = (src, dst) {
            Self::add_edge_move(&mut moves, src, dst, graph.value_type(value));
          } else {
            debug_assert!(false, "{} has no location on {} -> {}", value, pred, succ);
          }
        }

        for phi in graph.phis(succ) {
          let inst = &graph.insts[phi];
          let input = inst.inputs[k];
          let src = liveness.location_at(input, last_pos);
          let dst = liveness.location_at(inst.results[0], succ_begin);
          if let (Some(src), Some(dst)) = (src, dst) {
            Self::add_edge_move(&mut moves, src, dst, inst.ty);
          } else {
            debug_assert!(false, "phi {} has no location on {} -> {}", phi, pred, succ);
          }
        }

        if !moves.is_empty() {
          trace!("{} -> {}: {:?}", pred, succ, moves.moves());
          edges.push(EdgeMoves { pred, succ, moves });
        }
      }
    }
    edges
  }

  fn add_edge_move(
    moves: &mut SpillFillInst, src: Location, dst: Location,
    ty: DataType,
  ) {
    if src != dst && !dst.is_immediate() {
      moves.add(src, dst, ty);
    }
  }

  /// Adds `moves` to the phi moves of one end of `block`, creating them at
  /// index `at` if that end has none yet.
  fn merge_or_insert(
    graph: &mut Graph, ends: &mut Map<BlockId, InstId>, block: BlockId, at: usize,
    moves: SpillFillInst,
  ) {
    match ends.get(&block) {
      Some(&id) => {
        if let Some(sf) = graph.insts[id].spill_fill.as_mut() {
          for m in moves.moves() {
            sf.add(m.src, m.dst, m.ty);
          }
        }
      }
      None => {
        let mut inst = Inst::new_spill_fill(block, SpillFillKind::PhiMove);
        inst.spill_fill = Some(moves);
        let id = graph.insert_at(block, at, inst);
        ends.insert(block, id);
      }
    }
  }

  #[inline(never)]
  fn place_edge_moves(&mut self, graph: &mut Graph, edge: EdgeMoves) {
    let EdgeMoves { pred, succ, moves } = edge;
    self.num_edge_moves += moves.moves().len();

    if graph.blocks[pred].succs.len() == 1 {
      debug!("edge {} -> {}: moves at the end of {}", pred, succ, pred);
      let at = graph.blocks[pred].insts.len();
      Self::merge_or_insert(graph, &mut self.tails, pred, at, moves);
    } else if graph.blocks[succ].preds.len() == 1 && graph.num_phis(succ) == 0 {
      debug!("edge {} -> {}: moves at the start of {}", pred, succ, succ);
      Self::merge_or_insert(graph, &mut self.heads, succ, 0, moves);
    } else {
      let block = graph.split_edge(pred, succ);
      debug!("edge {} -> {}: moves in new block {}", pred, succ, block);
      self.num_new_blocks += 1;
      let mut inst = Inst::new_spill_fill(block, SpillFillKind::PhiMove);
      inst.spill_fill = Some(moves);
      graph.insert_at(block, 0, inst);
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::analysis::LivenessAnalyzer;
  use crate::data_structures::RegMask;
  use crate::inst_stream::apply_locations;
  use crate::interface::RegAllocOptions;
  use crate::ir::{CondCode, Opcode};
  use crate::linear_scan;
  use crate::target::{Arch, TargetInfo};

  const I64: DataType = DataType::Int64;

  fn resolve(graph: &mut Graph, options: &RegAllocOptions) -> usize {
    let target = TargetInfo::new(graph.arch);
    let mut liveness = LivenessAnalyzer::run(graph, &target);
    let frame = linear_scan::run(graph, &mut liveness, &target, options).unwrap();
    graph.immediates = frame.immediates;
    apply_locations(graph, &liveness, &target).unwrap();
    SplitResolver::new(&liveness).run(graph)
  }

  fn spill_fill(graph: &Graph, id: InstId) -> &SpillFillInst {
    graph.insts[id].spill_fill.as_ref().unwrap()
  }

  #[test]
  fn critical_edge_gets_a_block() {
    let mut g = Graph::new("critical", Arch::X86_64);
    let entry = g.entry;
    let left = g.add_block();
    let join = g.add_block();
    g.add_edge(entry, join);
    g.add_edge(entry, left);
    g.add_edge(left, join);
    let p = g.param(I64);
    let q = g.param(I64);
    g.append(entry, Opcode::If(CondCode::Lt), I64, &[p, q]);
    let x = g.binary(left, Opcode::Add, p, q);
    let phi = g.phi(join, I64, &[p, x]);
    g.ret(join, phi);

    let num_blocks = g.blocks.len();
    assert_eq!(resolve(&mut g, &RegAllocOptions::default()), 1);
    assert_eq!(g.blocks.len(), num_blocks + 1);

    let new_block = g.blocks[join].preds[0];
    assert_ne!(new_block, entry);
    assert_eq!(g.blocks[new_block].preds.as_slice(), &[entry]);
    assert_eq!(g.blocks[new_block].succs.as_slice(), &[join]);
    assert!(g.blocks[entry].succs.contains(&new_block));
    let insts = &g.blocks[new_block].insts;
    assert_eq!(insts.len(), 1);
    let sf = spill_fill(&g, insts[0]);
    assert_eq!(sf.kind(), SpillFillKind::PhiMove);
    // The first parameter arrives in rdi.
    assert_eq!(sf.moves()[0].src, Location::register(7));
    assert_eq!(sf.moves()[0].dst, g.insts[g.values[phi].def].result_locations[0]);
  }

  #[test]
  fn loop_swap_at_back_edge() {
    let mut g = Graph::new("swap", Arch::Aarch64);
    let entry = g.entry;
    let header = g.add_block();
    let body = g.add_block();
    let exit = g.add_block();
    g.add_edge(entry, header);
    g.add_edge(header, body);
    g.add_edge(header, exit);
    g.add_edge(body, header);
    let p0 = g.param(I64);
    let p1 = g.param(I64);
    let a = g.phi(header, I64, &[p0]);
    let b = g.phi(header, I64, &[p1]);
    g.add_phi_input(a, b);
    g.add_phi_input(b, a);
    g.append(header, Opcode::If(CondCode::Lt), I64, &[a, b]);
    g.ret(exit, a);

    resolve(&mut g, &RegAllocOptions::default());

    let loc_a = g.insts[g.values[a].def].result_locations[0];
    let loc_b = g.insts[g.values[b].def].result_locations[0];
    assert_ne!(loc_a, loc_b);
    let tail = *g.blocks[body].insts.last().unwrap();
    let sf = spill_fill(&g, tail);
    assert_eq!(sf.kind(), SpillFillKind::PhiMove);
    let mut moves: Vec<(Location, Location)> =
      sf.moves().iter().map(|m| (m.src, m.dst)).collect();
    moves.sort();
    let mut expected = vec![(loc_a, loc_b), (loc_b, loc_a)];
    expected.sort();
    assert_eq!(moves, expected);
  }

  #[test]
  fn split_moves_precede_their_instruction() {
    let mut g = Graph::new("pressure", Arch::X86_64);
    let entry = g.entry;
    let p = g.param(I64);
    let vals: Vec<_> = (0..5).map(|i| {
      let c = g.constant(entry, I64, i);
      g.binary(entry, Opcode::Mul, p, c)
    }).collect();
    let mut acc = vals[0];
    for &v in &vals[1..] {
      acc = g.binary(entry, Opcode::Add, acc, v);
    }
    let r = g.call(entry, 9, I64, &[acc, vals[4]]).unwrap();
    let s = g.binary(entry, Opcode::Add, r, vals[1]);
    g.ret(entry, s);

    let options = RegAllocOptions {
      available_register_mask: Some(RegMask::first(3)),
      ..RegAllocOptions::default()
    };
    resolve(&mut g, &options);

    let insts = &g.blocks[entry].insts;
    let split_moves: Vec<usize> = (0..insts.len())
      .filter(|&i| g.insts[insts[i]].spill_fill_kind() == Some(SpillFillKind::SplitMove))
      .collect();
    assert!(!split_moves.is_empty());
    for i in split_moves {
      // Followed by an instruction, possibly through the moves of a call.
      let next = &g.insts[insts[i + 1]];
      assert!(
        !next.is_spill_fill() || next.spill_fill_kind() == Some(SpillFillKind::InputFill)
      );
      for m in spill_fill(&g, insts[i]).moves() {
        assert_ne!(m.src, m.dst);
        assert!(!m.dst.is_immediate());
      }
    }
  }

  #[test]
  fn empty_block_runs_entry_moves_before_exit_moves() {
    let mut g = Graph::new("triangle", Arch::Aarch64);
    let entry = g.entry;
    let empty = g.add_block();
    let join = g.add_block();
    g.add_edge(entry, empty);
    g.add_edge(entry, join);
    g.add_edge(empty, join);
    let p = g.param(I64);
    let q = g.param(I64);
    g.append(entry, Opcode::If(CondCode::Lt), DataType::Void, &[q, p]);
    g.ret(join, p);

    let target = TargetInfo::new(Arch::Aarch64);
    let mut liveness = LivenessAnalyzer::run(&g, &target);
    let begin = liveness.block_range(empty).unwrap().begin;
    // p goes r1 -> r2 when entering the empty block, r2 -> r3 when leaving it.
    let (r1, r2, r3) = (Location::register(1), Location::register(2), Location::register(3));
    let root = liveness.interval(p).unwrap();
    let middle = liveness.intervals.split_at(root, begin);
    let last = liveness.intervals.split_at(middle, begin + 1);
    liveness.intervals[root].set_location(r1);
    liveness.intervals[middle].set_location(r2);
    liveness.intervals[last].set_location(r3);

    assert_eq!(SplitResolver::new(&liveness).run(&mut g), 1);
    let moves: Vec<Vec<(Location, Location)>> = g.blocks[empty]
      .insts
      .iter()
      .map(|&id| {
        let sf = spill_fill(&g, id);
        assert_eq!(sf.kind(), SpillFillKind::PhiMove);
        sf.moves().iter().map(|m| (m.src, m.dst)).collect()
      })
      .collect();
    assert_eq!(moves, vec![vec![(r1, r2)], vec![(r2, r3)]]);
  }

  #[test]
  fn broken_triangle_with_empty_block() {
    for &arch in &[Arch::Aarch64, Arch::X86_64, Arch::Aarch32] {
      let mut g = Graph::new("broken_triangle", arch);
      let entry = g.entry;
      let empty = g.add_block();
      let join = g.add_block();
      g.add_edge(entry, empty);
      g.add_edge(entry, join);
      g.add_edge(empty, join);
      let a = g.param(I64);
      let b = g.param(I64);
      let cmp = g.value(entry, Opcode::Compare(CondCode::Lt), I64, &[b, a]);
      let zero = g.constant(entry, I64, 0);
      g.append(entry, Opcode::If(CondCode::Ne), DataType::Void, &[cmp, zero]);
      let phi = g.phi(join, I64, &[b, a]);
      g.ret(join, phi);

      let options = RegAllocOptions { run_verifier: true, ..RegAllocOptions::default() };
      crate::interface::allocate_registers(&mut g, &options).unwrap();
      for &id in &g.blocks[empty].insts {
        assert_eq!(g.insts[id].spill_fill_kind(), Some(SpillFillKind::PhiMove));
      }
    }
  }
}
