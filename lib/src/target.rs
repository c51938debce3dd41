/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Description of the target architectures: register files, reserved and
//! scratch registers, and the calling convention.

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

use std::fmt;

use crate::data_structures::{DataType, RegClass, RegMask};
use crate::location::Location;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Arch {
  Aarch64,
  X86_64,
  Aarch32,
  /// A target without code generation support.
  None,
}

impl Arch {
  pub fn from_name(name: &str) -> Option<Arch> {
    match name {
      "aarch64" | "arm64" => Some(Arch::Aarch64),
      "x86_64" | "amd64" => Some(Arch::X86_64),
      "aarch32" | "arm" => Some(Arch::Aarch32),
      "none" => Some(Arch::None),
      _ => None,
    }
  }
}

impl fmt::Display for Arch {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    let name = match self {
      Arch::Aarch64 => "aarch64",
      Arch::X86_64 => "x86_64",
      Arch::Aarch32 => "aarch32",
      Arch::None => "none",
    };
    write!(fmt, "{}", name)
  }
}

#[derive(Clone, Debug)]
pub struct CallingConvention {
  param_regs: Vec<u32>,
  fp_param_regs: Vec<u32>,
  return_reg: u32,
  fp_return_reg: u32,
  caller_saved: RegMask,
  fp_caller_saved: RegMask,
}

impl CallingConvention {
  /// Locations of the arguments of a call (or of the parameters of the
  /// function) with the given types. General and floating-point arguments use
  /// separate register sequences; the remaining ones go to consecutive stack
  /// parameter slots.
  pub fn param_locations(&self, types: &[DataType]) -> Vec<Location> {
    let mut next_reg = 0;
    let mut next_fp_reg = 0;
    let mut next_slot = 0;
    types
      .iter()
      .map(|&ty| {
        let (regs, next) = if ty.is_float() {
          (&self.fp_param_regs, &mut next_fp_reg)
        } else {
          (&self.param_regs, &mut next_reg)
        };
        if *next < regs.len() {
          let loc = Location::make_register(regs[*next], ty);
          *next += 1;
          loc
        } else {
          next_slot += 1;
          Location::stack_parameter(next_slot - 1)
        }
      })
      .collect()
  }

  pub fn return_location(&self, ty: DataType) -> Location {
    if ty.is_float() {
      Location::fp_register(self.fp_return_reg)
    } else {
      Location::register(self.return_reg)
    }
  }

  pub fn caller_saved(&self, class: RegClass) -> RegMask {
    match class {
      RegClass::Int => self.caller_saved,
      RegClass::Float => self.fp_caller_saved,
    }
  }
}

#[derive(Clone, Debug)]
pub struct TargetInfo {
  arch: Arch,
  num_regs: u32,
  num_vregs: u32,
  zero_reg: Option<u32>,
  temp_reg: Option<u32>,
  temp_vreg: Option<u32>,
  reserved: RegMask,
  fp_reserved: RegMask,
  cc: Option<CallingConvention>,
}

impl TargetInfo {
  pub fn new(arch: Arch) -> Self {
    match arch {
      Arch::Aarch64 => TargetInfo {
        arch,
        num_regs: 32,
        num_vregs: 32,
        zero_reg: Some(31),
        temp_reg: Some(16),
        temp_vreg: Some(31),
        // ip0 (scratch), ip1, platform register, fp, lr and the zero register.
        reserved: RegMask::from_regs(&[16, 17, 18, 29, 30, 31]),
        fp_reserved: RegMask::from_regs(&[31]),
        cc: Some(CallingConvention {
          param_regs: (0..8).collect(),
          fp_param_regs: (0..8).collect(),
          return_reg: 0,
          fp_return_reg: 0,
          caller_saved: RegMask::first(19),
          fp_caller_saved: RegMask::from_bits(0xffff_00ff),
        }),
      },
      Arch::X86_64 => TargetInfo {
        arch,
        num_regs: 16,
        num_vregs: 16,
        zero_reg: None,
        temp_reg: Some(11),
        temp_vreg: Some(15),
        // rsp, rbp and the r11 scratch.
        reserved: RegMask::from_regs(&[4, 5, 11]),
        fp_reserved: RegMask::from_regs(&[15]),
        cc: Some(CallingConvention {
          param_regs: vec![7, 6, 2, 1, 8, 9],
          fp_param_regs: (0..8).collect(),
          return_reg: 0,
          fp_return_reg: 0,
          caller_saved: RegMask::from_regs(&[0, 1, 2, 6, 7, 8, 9, 10, 11]),
          fp_caller_saved: RegMask::first(16),
        }),
      },
      Arch::Aarch32 => TargetInfo {
        arch,
        num_regs: 16,
        num_vregs: 16,
        zero_reg: None,
        // 64-bit values occupy register pairs, so no single scratch register
        // is kept aside: cycles go through a reserved stack slot instead.
        temp_reg: None,
        temp_vreg: None,
        // fp, sp, lr, pc.
        reserved: RegMask::from_regs(&[11, 13, 14, 15]),
        fp_reserved: RegMask::empty(),
        cc: Some(CallingConvention {
          param_regs: (0..4).collect(),
          fp_param_regs: (0..8).collect(),
          return_reg: 0,
          fp_return_reg: 0,
          caller_saved: RegMask::from_regs(&[0, 1, 2, 3, 12]),
          fp_caller_saved: RegMask::first(8),
        }),
      },
      Arch::None => TargetInfo {
        arch,
        num_regs: 0,
        num_vregs: 0,
        zero_reg: None,
        temp_reg: None,
        temp_vreg: None,
        reserved: RegMask::empty(),
        fp_reserved: RegMask::empty(),
        cc: None,
      },
    }
  }

  pub fn arch(&self) -> Arch {
    self.arch
  }

  pub fn num_regs(&self, class: RegClass) -> u32 {
    match class {
      RegClass::Int => self.num_regs,
      RegClass::Float => self.num_vregs,
    }
  }

  pub fn zero_reg(&self) -> Option<u32> {
    self.zero_reg
  }

  pub fn is_zero_reg(&self, loc: Location) -> bool {
    loc.is_register() && Some(loc.value()) == self.zero_reg
  }

  pub fn temp_reg(&self, class: RegClass) -> Option<u32> {
    match class {
      RegClass::Int => self.temp_reg,
      RegClass::Float => self.temp_vreg,
    }
  }

  /// Scratch location for a value of type `ty`, if the target keeps a scratch
  /// register for its class.
  pub fn temp_location(&self, ty: DataType) -> Option<Location> {
    self.temp_reg(ty.class()).map(|reg| Location::make_register(reg, ty))
  }

  /// Whether stack slot 0 is kept aside for breaking move cycles.
  pub fn needs_scratch_slot(&self) -> bool {
    self.temp_reg.is_none() || self.temp_vreg.is_none()
  }

  /// Every register of the class the allocator may use.
  pub fn allocatable_mask(&self, class: RegClass) -> RegMask {
    let all = RegMask::first(self.num_regs(class));
    match class {
      RegClass::Int => all.without(self.reserved),
      RegClass::Float => all.without(self.fp_reserved),
    }
  }

  pub fn calling_convention(&self) -> Option<&CallingConvention> {
    self.cc.as_ref()
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn aarch64_masks() {
    let target = TargetInfo::new(Arch::Aarch64);
    let mask = target.allocatable_mask(RegClass::Int);
    assert!(!mask.test(31));
    assert!(!mask.test(16));
    assert!(mask.test(0));
    assert!(mask.test(28));
    assert_eq!(mask.count(), 26);
    assert!(!target.allocatable_mask(RegClass::Float).test(31));
    assert!(!target.needs_scratch_slot());
  }

  #[test]
  fn param_locations_spill_to_stack() {
    let target = TargetInfo::new(Arch::Aarch32);
    let cc = target.calling_convention().unwrap();
    let types = [
      DataType::Int32,
      DataType::Float64,
      DataType::Int32,
      DataType::Int32,
      DataType::Int32,
      DataType::Int32,
      DataType::Int64,
    ];
    let locs = cc.param_locations(&types);
    assert_eq!(locs[0], Location::register(0));
    assert_eq!(locs[1], Location::fp_register(0));
    assert_eq!(locs[4], Location::register(3));
    assert_eq!(locs[5], Location::stack_parameter(0));
    assert_eq!(locs[6], Location::stack_parameter(1));
    assert!(target.needs_scratch_slot());
  }

  #[test]
  fn unsupported_target() {
    assert!(TargetInfo::new(Arch::None).calling_convention().is_none());
    assert_eq!(Arch::from_name("amd64"), Some(Arch::X86_64));
  }
}
