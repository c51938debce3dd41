/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Data structures for the whole crate.

use rustc_hash::{FxHashMap, FxHashSet};
#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};
use std::slice::{Iter, IterMut};

//=============================================================================
// Maps and sets

pub type Map<K, V> = FxHashMap<K, V>;
pub type Set<T> = FxHashSet<T>;

//=============================================================================
// Typed indices.

macro_rules! generate_boilerplate {
  ($TypeIx:ident, $PrintingPrefix:expr) => {
    #[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
    #[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
    pub struct $TypeIx(u32);

    impl $TypeIx {
      pub fn new(n: u32) -> Self {
        $TypeIx(n)
      }
      pub fn get(self) -> u32 {
        self.0
      }
      pub fn plus(self, delta: u32) -> Self {
        $TypeIx(self.0 + delta)
      }
    }
    impl fmt::Debug for $TypeIx {
      fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}{}", $PrintingPrefix, self.0)
      }
    }
    impl fmt::Display for $TypeIx {
      fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}{}", $PrintingPrefix, self.0)
      }
    }
    impl From<$TypeIx> for u32 {
      fn from(ix: $TypeIx) -> u32 {
        ix.0
      }
    }
    impl From<u32> for $TypeIx {
      fn from(n: u32) -> $TypeIx {
        $TypeIx(n)
      }
    }
  };
}

generate_boilerplate!(InstId, "i");

generate_boilerplate!(BlockId, "bb");

generate_boilerplate!(ValueId, "v");

generate_boilerplate!(IntervalId, "li");

//=============================================================================
// Vectors where both the index and element types can be specified (and at
// most 2^32-1 elems can be stored).

#[derive(Clone)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct TypedIxVec<TyIx, Ty> {
  vek: Vec<Ty>,
  ty_ix: PhantomData<TyIx>,
}

impl<TyIx, Ty> TypedIxVec<TyIx, Ty>
where
  TyIx: From<u32> + Into<u32> + Copy,
{
  pub fn new() -> Self {
    Self { vek: Vec::new(), ty_ix: PhantomData::<TyIx> }
  }
  pub fn from_vec(vek: Vec<Ty>) -> Self {
    Self { vek, ty_ix: PhantomData::<TyIx> }
  }
  pub fn iter(&self) -> Iter<Ty> {
    self.vek.iter()
  }
  pub fn iter_mut(&mut self) -> IterMut<Ty> {
    self.vek.iter_mut()
  }
  pub fn len(&self) -> u32 {
    self.vek.len() as u32
  }
  pub fn is_empty(&self) -> bool {
    self.vek.is_empty()
  }
  /// Appends an element and returns its index.
  pub fn push(&mut self, item: Ty) -> TyIx {
    let ix = TyIx::from(self.vek.len() as u32);
    self.vek.push(item);
    ix
  }
  pub fn get(&self, ix: TyIx) -> Option<&Ty> {
    self.vek.get(ix.into() as usize)
  }
  pub fn indices(&self) -> impl Iterator<Item = TyIx> {
    (0..self.vek.len() as u32).map(TyIx::from)
  }
  pub fn resize(&mut self, new_len: u32, value: Ty)
  where
    Ty: Clone,
  {
    self.vek.resize(new_len as usize, value);
  }
}

impl<TyIx, Ty> Default for TypedIxVec<TyIx, Ty>
where
  TyIx: From<u32> + Into<u32> + Copy,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<TyIx, Ty> Index<TyIx> for TypedIxVec<TyIx, Ty>
where
  TyIx: Into<u32>,
{
  type Output = Ty;
  fn index(&self, ix: TyIx) -> &Ty {
    &self.vek[ix.into() as usize]
  }
}

impl<TyIx, Ty> IndexMut<TyIx> for TypedIxVec<TyIx, Ty>
where
  TyIx: Into<u32>,
{
  fn index_mut(&mut self, ix: TyIx) -> &mut Ty {
    &mut self.vek[ix.into() as usize]
  }
}

impl<TyIx, Ty: fmt::Debug> fmt::Debug for TypedIxVec<TyIx, Ty> {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    self.vek.fmt(fmt)
  }
}

//=============================================================================
// Life numbers.

/// A position in the linear order of the program. Every instruction owns one
/// even life number; the odd number right before it is the gap where moves
/// connecting split intervals take place.
pub type LifeNumber = u32;

/// Distance between the life numbers of two consecutive instructions.
pub const LIFE_NUMBER_GAP: LifeNumber = 2;

pub const INVALID_LIFE_NUMBER: LifeNumber = LifeNumber::MAX;

/// Rounds a position down to the closest odd life number, i.e. to a gap
/// between two instructions.
#[inline]
pub fn gap_before(pos: LifeNumber) -> LifeNumber {
  if pos % 2 == 1 {
    pos
  } else {
    pos.saturating_sub(1)
  }
}

//=============================================================================
// Data types and register classes.

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum DataType {
  Bool,
  Int32,
  UInt32,
  Int64,
  UInt64,
  Reference,
  Float32,
  Float64,
  Void,
}

impl DataType {
  pub fn is_float(self) -> bool {
    matches!(self, DataType::Float32 | DataType::Float64)
  }

  pub fn is_64_bits(self) -> bool {
    matches!(
      self,
      DataType::Int64 | DataType::UInt64 | DataType::Reference | DataType::Float64
    )
  }

  pub fn class(self) -> RegClass {
    if self.is_float() {
      RegClass::Float
    } else {
      RegClass::Int
    }
  }

  /// Whether a constant of this type may live in the zero register.
  pub fn fits_zero_reg(self) -> bool {
    !self.is_float() && self != DataType::Void
  }
}

impl fmt::Display for DataType {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    let name = match self {
      DataType::Bool => "b1",
      DataType::Int32 => "i32",
      DataType::UInt32 => "u32",
      DataType::Int64 => "i64",
      DataType::UInt64 => "u64",
      DataType::Reference => "ref",
      DataType::Float32 => "f32",
      DataType::Float64 => "f64",
      DataType::Void => "void",
    };
    write!(fmt, "{}", name)
  }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum RegClass {
  Int = 0,
  Float = 1,
}

impl fmt::Display for RegClass {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      RegClass::Int => write!(fmt, "int"),
      RegClass::Float => write!(fmt, "float"),
    }
  }
}

//=============================================================================
// Register masks.

/// Set of physical register numbers of one class. A set bit means the
/// register may be handed out by the allocator.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct RegMask(u64);

pub const MAX_NUM_REGS: u32 = 64;

impl RegMask {
  pub fn empty() -> Self {
    RegMask(0)
  }

  pub fn from_bits(bits: u64) -> Self {
    RegMask(bits)
  }

  /// Mask holding registers `0..count`.
  pub fn first(count: u32) -> Self {
    if count >= MAX_NUM_REGS {
      RegMask(u64::MAX)
    } else {
      RegMask((1u64 << count) - 1)
    }
  }

  pub fn from_regs(regs: &[u32]) -> Self {
    let mut mask = RegMask::empty();
    for &reg in regs {
      mask.set(reg);
    }
    mask
  }

  pub fn bits(self) -> u64 {
    self.0
  }

  pub fn set(&mut self, reg: u32) {
    debug_assert!(reg < MAX_NUM_REGS);
    self.0 |= 1 << reg;
  }

  pub fn reset(&mut self, reg: u32) {
    debug_assert!(reg < MAX_NUM_REGS);
    self.0 &= !(1 << reg);
  }

  pub fn test(self, reg: u32) -> bool {
    reg < MAX_NUM_REGS && (self.0 >> reg) & 1 == 1
  }

  pub fn count(self) -> u32 {
    self.0.count_ones()
  }

  pub fn is_empty(self) -> bool {
    self.0 == 0
  }

  pub fn intersect(self, other: RegMask) -> RegMask {
    RegMask(self.0 & other.0)
  }

  pub fn without(self, other: RegMask) -> RegMask {
    RegMask(self.0 & !other.0)
  }

  /// Keeps only the `count` lowest registers of the mask.
  pub fn truncate(self, count: u32) -> RegMask {
    RegMask::from_regs(&self.iter().take(count as usize).collect::<Vec<_>>())
  }

  /// Iterates over the register numbers in ascending order.
  pub fn iter(self) -> impl Iterator<Item = u32> {
    (0..MAX_NUM_REGS).filter(move |&reg| self.test(reg))
  }
}

impl fmt::Debug for RegMask {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "{{")?;
    for (i, reg) in self.iter().enumerate() {
      if i > 0 {
        write!(fmt, ", ")?;
      }
      write!(fmt, "{}", reg)?;
    }
    write!(fmt, "}}")
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn gap_positions() {
    assert_eq!(gap_before(7), 7);
    assert_eq!(gap_before(8), 7);
    assert_eq!(gap_before(0), 0);
  }

  #[test]
  fn reg_mask_ops() {
    let mut mask = RegMask::first(4);
    assert_eq!(mask.count(), 4);
    mask.reset(1);
    assert!(!mask.test(1));
    assert!(mask.test(3));
    assert_eq!(mask.iter().collect::<Vec<_>>(), vec![0, 2, 3]);
    assert_eq!(mask.truncate(2).iter().collect::<Vec<_>>(), vec![0, 2]);
    let callee = RegMask::from_regs(&[2, 9]);
    assert_eq!(mask.intersect(callee).iter().collect::<Vec<_>>(), vec![2]);
    assert_eq!(mask.without(callee).iter().collect::<Vec<_>>(), vec![0, 3]);
    assert_eq!(RegMask::first(64).count(), 64);
  }

  #[test]
  fn typed_vectors() {
    let mut vec: TypedIxVec<BlockId, &str> = TypedIxVec::new();
    let a = vec.push("a");
    let b = vec.push("b");
    assert_eq!(a, BlockId::new(0));
    assert_eq!(vec[b], "b");
    assert_eq!(vec.indices().collect::<Vec<_>>(), vec![a, b]);
    assert_eq!(format!("{:?}", b), "bb1");
  }
}
