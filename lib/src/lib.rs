/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Main file / top-level module for the SSA register allocation library.

// Make the interval structures public for fuzzing.
#[cfg(feature = "fuzzing")]
pub mod life_intervals;
#[cfg(not(feature = "fuzzing"))]
mod life_intervals;

mod analysis;
mod checker;
mod data_structures;
mod inst_stream;
mod interface;
mod ir;
mod linear_scan;
mod location;
mod spill_fills_resolver;
mod split_resolver;
mod target;

pub use crate::analysis::{BlockRange, Liveness, LivenessAnalyzer};
pub use crate::checker::{
  verify_allocation, CheckerError, CheckerErrors, CheckerState, CheckerValue,
  RegAllocVerifier,
};
pub use crate::data_structures::{
  BlockId, DataType, InstId, IntervalId, LifeNumber, RegClass, RegMask,
  TypedIxVec, ValueId, MAX_NUM_REGS,
};
pub use crate::interface::*;
pub use crate::ir::{
  Block, CondCode, Graph, Inst, Opcode, SpillFillData, SpillFillInst,
  SpillFillKind, SpillFillOp, Value,
};
pub use crate::location::{Location, LocationKind};
pub use crate::spill_fills_resolver::SpillFillsResolver;
pub use crate::split_resolver::SplitResolver;
pub use crate::target::{Arch, CallingConvention, TargetInfo};
