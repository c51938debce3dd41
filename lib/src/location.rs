/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Locations: the places where a value can live once registers are allocated.

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

use std::fmt;

use crate::data_structures::DataType;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum LocationKind {
  Invalid,
  Register,
  FpRegister,
  StackSlot,
  StackParameter,
  /// Slot of the graph's immediate table.
  Immediate,
}

/// A location is a kind plus an index within that kind. Two locations denote
/// the same physical place iff both kind and index match.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Location {
  kind: LocationKind,
  value: u32,
}

impl Location {
  pub const INVALID: Location = Location { kind: LocationKind::Invalid, value: 0 };

  pub fn new(kind: LocationKind, value: u32) -> Self {
    Self { kind, value }
  }

  pub fn invalid() -> Self {
    Self::INVALID
  }

  pub fn register(reg: u32) -> Self {
    Self::new(LocationKind::Register, reg)
  }

  pub fn fp_register(reg: u32) -> Self {
    Self::new(LocationKind::FpRegister, reg)
  }

  /// A general or floating-point register, depending on `ty`.
  pub fn make_register(reg: u32, ty: DataType) -> Self {
    if ty.is_float() {
      Self::fp_register(reg)
    } else {
      Self::register(reg)
    }
  }

  pub fn stack_slot(slot: u32) -> Self {
    Self::new(LocationKind::StackSlot, slot)
  }

  pub fn stack_parameter(slot: u32) -> Self {
    Self::new(LocationKind::StackParameter, slot)
  }

  pub fn immediate(slot: u32) -> Self {
    Self::new(LocationKind::Immediate, slot)
  }

  pub fn kind(self) -> LocationKind {
    self.kind
  }

  pub fn value(self) -> u32 {
    self.value
  }

  pub fn is_invalid(self) -> bool {
    self.kind == LocationKind::Invalid
  }

  pub fn is_register(self) -> bool {
    self.kind == LocationKind::Register
  }

  pub fn is_fp_register(self) -> bool {
    self.kind == LocationKind::FpRegister
  }

  pub fn is_any_register(self) -> bool {
    self.is_register() || self.is_fp_register()
  }

  pub fn is_stack_slot(self) -> bool {
    self.kind == LocationKind::StackSlot
  }

  pub fn is_stack_parameter(self) -> bool {
    self.kind == LocationKind::StackParameter
  }

  pub fn is_any_stack(self) -> bool {
    self.is_stack_slot() || self.is_stack_parameter()
  }

  pub fn is_immediate(self) -> bool {
    self.kind == LocationKind::Immediate
  }

  /// Locations read from memory by a spill-fill: stack slots, stack
  /// parameters and the immediate table.
  pub fn is_memory(self) -> bool {
    self.is_any_stack() || self.is_immediate()
  }

  pub fn register_number(self) -> Option<u32> {
    if self.is_any_register() {
      Some(self.value)
    } else {
      None
    }
  }
}

impl Default for Location {
  fn default() -> Self {
    Self::INVALID
  }
}

impl fmt::Display for Location {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self.kind {
      LocationKind::Invalid => write!(fmt, "-"),
      LocationKind::Register => write!(fmt, "r{}", self.value),
      LocationKind::FpRegister => write!(fmt, "v{}", self.value),
      LocationKind::StackSlot => write!(fmt, "s{}", self.value),
      LocationKind::StackParameter => write!(fmt, "p{}", self.value),
      LocationKind::Immediate => write!(fmt, "imm{}", self.value),
    }
  }
}

impl fmt::Debug for Location {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    fmt::Display::fmt(self, fmt)
  }
}

/// Maps register, stack slot and stack parameter locations onto one dense
/// index space: general registers first, then floating-point registers, then
/// stack slots, then stack parameters. Immediates and the zero register have
/// no index: they can be read any number of times and are never written.
#[derive(Clone, Debug)]
pub struct LocationIndexer {
  num_regs: u32,
  num_vregs: u32,
  num_stack_slots: u32,
  num_stack_params: u32,
  zero_reg: Option<u32>,
}

impl LocationIndexer {
  pub fn new(
    num_regs: u32, num_vregs: u32, num_stack_slots: u32, num_stack_params: u32,
    zero_reg: Option<u32>,
  ) -> Self {
    Self { num_regs, num_vregs, num_stack_slots, num_stack_params, zero_reg }
  }

  pub fn size(&self) -> usize {
    (self.num_regs + self.num_vregs + self.num_stack_slots + self.num_stack_params)
      as usize
  }

  pub fn is_zero_reg(&self, loc: Location) -> bool {
    loc.is_register() && Some(loc.value()) == self.zero_reg
  }

  pub fn index(&self, loc: Location) -> Option<usize> {
    let value = loc.value();
    let index = match loc.kind() {
      LocationKind::Register => {
        if self.is_zero_reg(loc) {
          return None;
        }
        debug_assert!(value < self.num_regs, "register {} out of range", loc);
        value
      }
      LocationKind::FpRegister => {
        debug_assert!(value < self.num_vregs, "register {} out of range", loc);
        self.num_regs + value
      }
      LocationKind::StackSlot => {
        debug_assert!(value < self.num_stack_slots, "slot {} out of range", loc);
        self.num_regs + self.num_vregs + value
      }
      LocationKind::StackParameter => {
        debug_assert!(value < self.num_stack_params, "slot {} out of range", loc);
        self.num_regs + self.num_vregs + self.num_stack_slots + value
      }
      LocationKind::Immediate | LocationKind::Invalid => return None,
    };
    Some(index as usize)
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn location_kinds() {
    let reg = Location::make_register(3, DataType::Int64);
    let vreg = Location::make_register(3, DataType::Float64);
    assert!(reg.is_register());
    assert!(vreg.is_fp_register());
    assert_ne!(reg, vreg);
    assert_eq!(reg, Location::register(3));
    assert!(Location::stack_parameter(1).is_any_stack());
    assert!(Location::immediate(0).is_memory());
    assert!(!Location::immediate(0).is_any_stack());
    assert!(Location::invalid().is_invalid());
    assert_eq!(format!("{}", Location::stack_slot(4)), "s4");
  }

  #[test]
  fn unified_index_space() {
    let indexer = LocationIndexer::new(32, 32, 8, 2, Some(31));
    assert_eq!(indexer.size(), 74);
    assert_eq!(indexer.index(Location::register(5)), Some(5));
    assert_eq!(indexer.index(Location::fp_register(5)), Some(37));
    assert_eq!(indexer.index(Location::stack_slot(1)), Some(65));
    assert_eq!(indexer.index(Location::stack_parameter(1)), Some(73));
    assert_eq!(indexer.index(Location::register(31)), None);
    assert_eq!(indexer.index(Location::immediate(0)), None);
  }
}
