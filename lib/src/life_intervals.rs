/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Life intervals: the liveness of one value as sorted half-open ranges of
//! life numbers, split into a chain of siblings as allocation proceeds.

use smallvec::SmallVec;

use std::fmt;
use std::ops::{Index, IndexMut};

use crate::data_structures::{
  DataType, InstId, IntervalId, LifeNumber, RegClass, TypedIxVec, ValueId,
};
use crate::location::Location;

//=============================================================================
// Ranges and use positions

#[derive(Copy, Clone, PartialEq, Eq)]
pub struct LiveRange {
  pub begin: LifeNumber,
  pub end: LifeNumber,
}

impl LiveRange {
  pub fn new(begin: LifeNumber, end: LifeNumber) -> Self {
    debug_assert!(begin < end, "empty range [{}, {})", begin, end);
    Self { begin, end }
  }

  pub fn contains(&self, pos: LifeNumber) -> bool {
    self.begin <= pos && pos < self.end
  }
}

impl fmt::Debug for LiveRange {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "[{}, {})", self.begin, self.end)
  }
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub struct UsePosition {
  pub pos: LifeNumber,
  /// The value must be in a register at this position.
  pub requires_reg: bool,
  /// A location the value is wanted in here, e.g. an argument register.
  pub hint: Option<Location>,
}

impl fmt::Debug for UsePosition {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "{}", self.pos)?;
    if self.requires_reg {
      write!(fmt, "r")?;
    }
    if let Some(hint) = self.hint {
      write!(fmt, "->{}", hint)?;
    }
    Ok(())
  }
}

//=============================================================================
// Life intervals

#[derive(Clone)]
pub struct LifeInterval {
  /// The value this interval belongs to; `None` for physical intervals.
  value: Option<ValueId>,
  ty: DataType,
  ranges: SmallVec<[LiveRange; 2]>,
  uses: Vec<UsePosition>,
  location: Location,
  /// Location to try before the hints of the uses.
  preferred: Option<Location>,
  sibling: Option<IntervalId>,
  root: IntervalId,
  /// Instruction defining the value (root intervals only).
  def: Option<InstId>,
  preassigned: bool,
  physical: bool,
  split_sibling: bool,
}

impl LifeInterval {
  fn new_virtual(
    id: IntervalId, value: ValueId, ty: DataType, def: InstId,
  ) -> Self {
    Self {
      value: Some(value),
      ty,
      ranges: SmallVec::new(),
      uses: Vec::new(),
      location: Location::invalid(),
      preferred: None,
      sibling: None,
      root: id,
      def: Some(def),
      preassigned: false,
      physical: false,
      split_sibling: false,
    }
  }

  fn new_physical(id: IntervalId, location: Location, ty: DataType) -> Self {
    Self {
      value: None,
      ty,
      ranges: SmallVec::new(),
      uses: Vec::new(),
      location,
      preferred: None,
      sibling: None,
      root: id,
      def: None,
      preassigned: true,
      physical: true,
      split_sibling: false,
    }
  }

  pub fn value(&self) -> Option<ValueId> {
    self.value
  }

  pub fn ty(&self) -> DataType {
    self.ty
  }

  pub fn class(&self) -> RegClass {
    self.ty.class()
  }

  pub fn ranges(&self) -> &[LiveRange] {
    &self.ranges
  }

  pub fn uses(&self) -> &[UsePosition] {
    &self.uses
  }

  pub fn begin(&self) -> LifeNumber {
    self.ranges.first().map_or(0, |r| r.begin)
  }

  pub fn end(&self) -> LifeNumber {
    self.ranges.last().map_or(0, |r| r.end)
  }

  pub fn is_empty(&self) -> bool {
    self.ranges.is_empty()
  }

  pub fn location(&self) -> Location {
    self.location
  }

  pub fn set_location(&mut self, location: Location) {
    debug_assert!(!self.physical);
    self.location = location;
  }

  pub fn has_location(&self) -> bool {
    !self.location.is_invalid()
  }

  pub fn sibling(&self) -> Option<IntervalId> {
    self.sibling
  }

  pub fn root(&self) -> IntervalId {
    self.root
  }

  pub fn def_inst(&self) -> Option<InstId> {
    self.def
  }

  pub fn is_preassigned(&self) -> bool {
    self.preassigned
  }

  /// Pins the interval to `location`; the allocator will not pick another.
  pub fn set_preassigned(&mut self, location: Location) {
    self.location = location;
    self.preassigned = true;
  }

  pub fn is_physical(&self) -> bool {
    self.physical
  }

  pub fn is_split_sibling(&self) -> bool {
    self.split_sibling
  }

  pub fn covers(&self, pos: LifeNumber) -> bool {
    self.ranges.iter().any(|r| r.contains(pos))
  }

  /// Adds `[begin, end)`, merging it with overlapping or adjacent ranges.
  pub fn add_range(&mut self, begin: LifeNumber, end: LifeNumber) {
    let mut range = LiveRange::new(begin, end);
    let mut i = 0;
    while i < self.ranges.len() {
      let cur = self.ranges[i];
      if cur.end < range.begin {
        i += 1;
      } else if range.end < cur.begin {
        break;
      } else {
        range.begin = range.begin.min(cur.begin);
        range.end = range.end.max(cur.end);
        self.ranges.remove(i);
      }
    }
    self.ranges.insert(i, range);
  }

  /// Starts the interval at its definition. A value without any range yet is
  /// dead, and lives for its defining position only.
  pub fn set_begin(&mut self, pos: LifeNumber) {
    match self.ranges.first_mut() {
      Some(first) if first.contains(pos) => first.begin = pos,
      _ => self.add_range(pos, pos + 1),
    }
  }

  pub fn add_use(&mut self, use_pos: UsePosition) {
    let at = self.uses.iter().position(|u| u.pos > use_pos.pos).unwrap_or(self.uses.len());
    self.uses.insert(at, use_pos);
  }

  /// First position at or after `pos` where a register is required.
  pub fn next_use(&self, pos: LifeNumber) -> Option<LifeNumber> {
    self.uses.iter().find(|u| u.requires_reg && u.pos >= pos).map(|u| u.pos)
  }

  /// Last position strictly before `pos` where the value is read or written.
  pub fn last_use_before(&self, pos: LifeNumber) -> Option<LifeNumber> {
    self.uses.iter().rev().find(|u| u.pos < pos).map(|u| u.pos)
  }

  /// The preferred location, or else the first location hinted by a use of
  /// this interval.
  pub fn hint(&self) -> Option<Location> {
    self.preferred.or_else(|| self.uses.iter().find_map(|u| u.hint))
  }

  pub fn set_preferred(&mut self, location: Location) {
    self.preferred = Some(location);
  }

  /// First position at or after `from` covered by both intervals.
  pub fn first_intersection_with(
    &self, other: &LifeInterval, from: LifeNumber,
  ) -> Option<LifeNumber> {
    let (mut i, mut j) = (0, 0);
    while i < self.ranges.len() && j < other.ranges.len() {
      let (a, b) = (self.ranges[i], other.ranges[j]);
      let begin = a.begin.max(b.begin).max(from);
      let end = a.end.min(b.end);
      if begin < end {
        return Some(begin);
      }
      if a.end <= b.end {
        i += 1;
      } else {
        j += 1;
      }
    }
    None
  }
}

impl fmt::Debug for LifeInterval {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self.value {
      Some(value) => write!(fmt, "{}:{}", value, self.ty)?,
      None => write!(fmt, "fixed")?,
    }
    write!(fmt, " {:?} @{}", self.ranges.as_slice(), self.location)?;
    if !self.uses.is_empty() {
      write!(fmt, " uses {:?}", self.uses)?;
    }
    if let Some(sibling) = self.sibling {
      write!(fmt, " next {}", sibling)?;
    }
    Ok(())
  }
}

//=============================================================================
// Interval arena

/// Every interval of a graph. Splitting appends the new sibling and links it
/// by index.
#[derive(Clone, Default)]
pub struct Intervals {
  data: TypedIxVec<IntervalId, LifeInterval>,
}

impl Intervals {
  pub fn new() -> Self {
    Self { data: TypedIxVec::new() }
  }

  pub fn len(&self) -> u32 {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn ids(&self) -> impl Iterator<Item = IntervalId> {
    self.data.indices()
  }

  pub fn add_virtual(&mut self, value: ValueId, ty: DataType, def: InstId) -> IntervalId {
    let id = IntervalId::new(self.data.len());
    self.data.push(LifeInterval::new_virtual(id, value, ty, def))
  }

  pub fn add_physical(&mut self, location: Location, ty: DataType) -> IntervalId {
    let id = IntervalId::new(self.data.len());
    self.data.push(LifeInterval::new_physical(id, location, ty))
  }

  /// Truncates `id` to end at `pos` and returns the new sibling holding the
  /// rest of it. Splitting at or before the beginning is a no-op returning
  /// `id` itself.
  pub fn split_at(&mut self, id: IntervalId, pos: LifeNumber) -> IntervalId {
    let (child_ranges, child_uses, sibling, value, ty, root) = {
      let int = &mut self.data[id];
      debug_assert!(!int.physical, "splitting a fixed interval");
      if pos <= int.begin() {
        return id;
      }
      debug_assert!(pos < int.end(), "split of {:?} at {} out of range", int, pos);

      let mut child_ranges = SmallVec::<[LiveRange; 2]>::new();
      let mut kept = SmallVec::<[LiveRange; 2]>::new();
      for range in int.ranges.drain(..) {
        if range.end <= pos {
          kept.push(range);
        } else if range.begin >= pos {
          child_ranges.push(range);
        } else {
          kept.push(LiveRange::new(range.begin, pos));
          child_ranges.push(LiveRange::new(pos, range.end));
        }
      }
      int.ranges = kept;

      let at = int.uses.iter().position(|u| u.pos >= pos).unwrap_or(int.uses.len());
      let child_uses = int.uses.split_off(at);
      (child_ranges, child_uses, int.sibling, int.value, int.ty, int.root)
    };

    let child_id = IntervalId::new(self.data.len());
    self.data.push(LifeInterval {
      value,
      ty,
      ranges: child_ranges,
      uses: child_uses,
      location: Location::invalid(),
      preferred: None,
      sibling,
      root,
      def: None,
      preassigned: false,
      physical: false,
      split_sibling: true,
    });
    self.data[id].sibling = Some(child_id);
    child_id
  }

  /// Splits whichever sibling of the chain starting at `root` spans `pos`.
  pub fn split_cover(&mut self, root: IntervalId, pos: LifeNumber) -> Option<IntervalId> {
    let target = self
      .siblings(root)
      .find(|&id| self.data[id].begin() < pos && pos < self.data[id].end())?;
    Some(self.split_at(target, pos))
  }

  /// The chain of siblings starting at `first`, in increasing position order.
  pub fn siblings(&self, first: IntervalId) -> impl Iterator<Item = IntervalId> + '_ {
    std::iter::successors(Some(first), move |&id| self.data[id].sibling)
  }

  /// The sibling of the chain starting at `root` that covers `pos`.
  pub fn sibling_at(&self, root: IntervalId, pos: LifeNumber) -> Option<IntervalId> {
    self.siblings(root).find(|&id| self.data[id].covers(pos))
  }

  pub fn location_at(&self, root: IntervalId, pos: LifeNumber) -> Option<Location> {
    self.sibling_at(root, pos).map(|id| self.data[id].location)
  }

  /// End of the last sibling of the chain `id` belongs to.
  pub fn chain_end(&self, id: IntervalId) -> LifeNumber {
    self.siblings(id).last().map_or(0, |last| self.data[last].end())
  }
}

impl Index<IntervalId> for Intervals {
  type Output = LifeInterval;
  fn index(&self, id: IntervalId) -> &LifeInterval {
    &self.data[id]
  }
}

impl IndexMut<IntervalId> for Intervals {
  fn index_mut(&mut self, id: IntervalId) -> &mut LifeInterval {
    &mut self.data[id]
  }
}

impl fmt::Debug for Intervals {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    for id in self.ids() {
      writeln!(fmt, "{}: {:?}", id, self.data[id])?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn interval(ranges: &[(u32, u32)], uses: &[(u32, bool)]) -> (Intervals, IntervalId) {
    let mut intervals = Intervals::new();
    let id = intervals.add_virtual(ValueId::new(0), DataType::Int64, InstId::new(0));
    for &(begin, end) in ranges.iter().rev() {
      intervals[id].add_range(begin, end);
    }
    for &(pos, requires_reg) in uses {
      intervals[id].add_use(UsePosition { pos, requires_reg, hint: None });
    }
    (intervals, id)
  }

  #[test]
  fn ranges_merge() {
    let (mut intervals, id) = interval(&[(10, 20), (30, 40)], &[]);
    assert_eq!(intervals[id].ranges().len(), 2);
    intervals[id].add_range(20, 30);
    assert_eq!(intervals[id].ranges(), &[LiveRange::new(10, 40)]);
    intervals[id].add_range(2, 4);
    assert_eq!(intervals[id].begin(), 2);
    assert!(!intervals[id].covers(6));
    assert!(intervals[id].covers(39));
    assert!(!intervals[id].covers(40));
  }

  #[test]
  fn set_begin_on_def() {
    let (mut intervals, id) = interval(&[(8, 20)], &[]);
    intervals[id].set_begin(12);
    assert_eq!(intervals[id].begin(), 12);

    let (mut intervals, dead) = interval(&[], &[]);
    intervals[dead].set_begin(6);
    assert_eq!(intervals[dead].ranges(), &[LiveRange::new(6, 7)]);
  }

  #[test]
  fn split_moves_ranges_and_uses() {
    let (mut intervals, id) =
      interval(&[(10, 20), (30, 40)], &[(10, true), (16, true), (34, false), (40, true)]);
    let child = intervals.split_at(id, 15);
    assert_ne!(child, id);
    assert_eq!(intervals[id].ranges(), &[LiveRange::new(10, 15)]);
    assert_eq!(intervals[child].ranges(), &[LiveRange::new(15, 20), LiveRange::new(30, 40)]);
    assert_eq!(intervals[id].uses().len(), 1);
    assert_eq!(intervals[child].next_use(0), Some(16));
    assert_eq!(intervals[child].next_use(17), Some(40));
    assert_eq!(intervals[child].last_use_before(40), Some(34));
    assert!(intervals[child].is_split_sibling());
    assert_eq!(intervals[child].root(), id);
    assert_eq!(intervals[id].sibling(), Some(child));

    // In a hole.
    let grandchild = intervals.split_at(child, 25);
    assert_eq!(intervals[grandchild].begin(), 30);
    assert_eq!(intervals[child].end(), 20);
    assert_eq!(intervals.siblings(id).collect::<Vec<_>>(), vec![id, child, grandchild]);
    assert_eq!(intervals.sibling_at(id, 31), Some(grandchild));
    assert_eq!(intervals.sibling_at(id, 25), None);
    assert_eq!(intervals.chain_end(id), 40);
  }

  #[test]
  fn split_at_boundary_is_noop() {
    let (mut intervals, id) = interval(&[(10, 20)], &[]);
    let child = intervals.split_at(id, 15);
    assert_eq!(intervals.split_at(child, 15), child);
    assert_eq!(intervals.len(), 2);
    assert_eq!(intervals.split_cover(id, 17), Some(IntervalId::new(2)));
    assert_eq!(intervals.split_cover(id, 25), None);
  }

  #[test]
  fn intersections() {
    let (mut intervals, a) = interval(&[(10, 20), (30, 40)], &[]);
    let b = intervals.add_physical(Location::register(0), DataType::Int64);
    intervals[b].add_range(18, 19);
    intervals[b].add_range(36, 37);
    assert_eq!(intervals[a].first_intersection_with(&intervals[b], 0), Some(18));
    assert_eq!(intervals[a].first_intersection_with(&intervals[b], 19), Some(36));
    assert_eq!(intervals[b].first_intersection_with(&intervals[a], 37), None);
    assert!(intervals[b].is_physical());
  }
}
