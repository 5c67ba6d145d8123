//! # Element Types
//!
//! This module defines the closed set of element types a column can hold and
//! the sealed `Elem` trait that operator implementations are generic over.
//!
//! ## The Closed Sum
//!
//! Tessera columns hold exactly one of seven element kinds:
//!
//! | Kind      | Rust type | Size    |
//! |-----------|-----------|---------|
//! | Int8      | `i8`      | 1       |
//! | Int16     | `i16`     | 2       |
//! | Int32     | `i32`     | 4       |
//! | Int64     | `i64`     | 8       |
//! | Float32   | `f32`     | 4       |
//! | Float64   | `f64`     | 8       |
//! | Bytes(w)  | `[u8; w]` | runtime |
//!
//! The six numeric kinds flow through the generic `SeriesIter<T>` pipeline;
//! fixed-width byte arrays flow through the separate byte-series family in
//! `ops::bytes` (their width is a runtime value, not a type parameter).
//!
//! ## Arithmetic Semantics
//!
//! Integer arithmetic wraps; integer division and remainder by zero are
//! domain errors surfaced by the operator (`checked_div`/`checked_rem`
//! return `None`). Float comparison uses the IEEE total order so NaN sorts
//! last and aggregation extrema are deterministic.
//!
//! ## Accumulator Widening
//!
//! Aggregates accumulate into `Elem::Acc`: `i64` for the integer kinds,
//! `f64` for the float kinds. This keeps `sum` exact for integer inputs of
//! any width.
//!
//! ## Boolean Sequences
//!
//! Predicates produce `i8` sequences where nonzero means true, matching the
//! mask representation the filtering operators consume.

use std::cmp::Ordering;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Element kind of a column: the closed sum the engine dispatches over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemKind {
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Fixed-width byte array; the width is a per-column runtime value.
    Bytes(u16),
}

impl ElemKind {
    /// Element size in bytes.
    pub fn size(self) -> usize {
        match self {
            ElemKind::Int8 => 1,
            ElemKind::Int16 => 2,
            ElemKind::Int32 => 4,
            ElemKind::Int64 => 8,
            ElemKind::Float32 => 4,
            ElemKind::Float64 => 8,
            ElemKind::Bytes(w) => w as usize,
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, ElemKind::Bytes(_))
    }

    pub fn is_float(self) -> bool {
        matches!(self, ElemKind::Float32 | ElemKind::Float64)
    }

    /// Stable one-byte tag used by the persisted column catalog.
    pub fn tag(self) -> u8 {
        match self {
            ElemKind::Int8 => 1,
            ElemKind::Int16 => 2,
            ElemKind::Int32 => 3,
            ElemKind::Int64 => 4,
            ElemKind::Float32 => 5,
            ElemKind::Float64 => 6,
            ElemKind::Bytes(_) => 7,
        }
    }

    pub fn from_tag(tag: u8, width: u16) -> Option<Self> {
        match tag {
            1 => Some(ElemKind::Int8),
            2 => Some(ElemKind::Int16),
            3 => Some(ElemKind::Int32),
            4 => Some(ElemKind::Int64),
            5 => Some(ElemKind::Float32),
            6 => Some(ElemKind::Float64),
            7 => Some(ElemKind::Bytes(width)),
            _ => None,
        }
    }
}

/// Boundary semantics for ordered (timestamp) search endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Unrestricted endpoint: the column edge.
    Open,
    /// Endpoint value included in the range.
    Inclusive,
    /// Endpoint value excluded from the range.
    Exclusive,
    /// Endpoint must match an existing value exactly, else the range is empty.
    Exact,
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for i8 {}
    impl Sealed for i16 {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// A numeric column element. Sealed: implemented exactly for the six numeric
/// kinds of [`ElemKind`].
pub trait Elem:
    sealed::Sealed
    + Copy
    + PartialEq
    + PartialOrd
    + Send
    + Sync
    + std::fmt::Debug
    + Default
    + FromBytes
    + IntoBytes
    + Immutable
    + KnownLayout
    + 'static
{
    const KIND: ElemKind;
    const SIZE: usize;

    /// Widened accumulator type: `i64` for integers, `f64` for floats.
    type Acc: Elem;

    fn zero() -> Self;
    fn one() -> Self;

    /// Total order; NaN sorts after every other float value.
    fn order(self, other: Self) -> Ordering;

    fn add(self, other: Self) -> Self;
    fn sub(self, other: Self) -> Self;
    fn mul(self, other: Self) -> Self;
    fn checked_div(self, other: Self) -> Option<Self>;
    fn checked_rem(self, other: Self) -> Option<Self>;
    fn neg(self) -> Self;
    fn abs(self) -> Self;

    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
    fn to_i64(self) -> i64;
    fn from_i64(v: i64) -> Self;

    fn to_acc(self) -> Self::Acc;

    /// Truth value of a mask element: nonzero means true.
    fn is_true(self) -> bool;
    fn from_bool(b: bool) -> Self;

    /// Reads one element from the front of a little-endian byte slice.
    fn load(bytes: &[u8]) -> Self {
        Self::read_from_prefix(bytes)
            .expect("element buffer shorter than element size")
            .0
    }

    /// Writes the element into the front of a byte slice.
    fn store(self, bytes: &mut [u8]) {
        bytes[..Self::SIZE].copy_from_slice(self.as_bytes());
    }
}

macro_rules! impl_int_elem {
    ($ty:ty, $kind:expr) => {
        impl Elem for $ty {
            const KIND: ElemKind = $kind;
            const SIZE: usize = std::mem::size_of::<$ty>();
            type Acc = i64;

            fn zero() -> Self {
                0
            }

            fn one() -> Self {
                1
            }

            fn order(self, other: Self) -> Ordering {
                Ord::cmp(&self, &other)
            }

            fn add(self, other: Self) -> Self {
                self.wrapping_add(other)
            }

            fn sub(self, other: Self) -> Self {
                self.wrapping_sub(other)
            }

            fn mul(self, other: Self) -> Self {
                self.wrapping_mul(other)
            }

            fn checked_div(self, other: Self) -> Option<Self> {
                if other == 0 {
                    None
                } else {
                    Some(self.wrapping_div(other))
                }
            }

            fn checked_rem(self, other: Self) -> Option<Self> {
                if other == 0 {
                    None
                } else {
                    Some(self.wrapping_rem(other))
                }
            }

            fn neg(self) -> Self {
                self.wrapping_neg()
            }

            fn abs(self) -> Self {
                self.wrapping_abs()
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(v: f64) -> Self {
                v as $ty
            }

            fn to_i64(self) -> i64 {
                self as i64
            }

            fn from_i64(v: i64) -> Self {
                v as $ty
            }

            fn to_acc(self) -> i64 {
                self as i64
            }

            fn is_true(self) -> bool {
                self != 0
            }

            fn from_bool(b: bool) -> Self {
                b as $ty
            }
        }
    };
}

macro_rules! impl_float_elem {
    ($ty:ty, $kind:expr) => {
        impl Elem for $ty {
            const KIND: ElemKind = $kind;
            const SIZE: usize = std::mem::size_of::<$ty>();
            type Acc = f64;

            fn zero() -> Self {
                0.0
            }

            fn one() -> Self {
                1.0
            }

            fn order(self, other: Self) -> Ordering {
                self.total_cmp(&other)
            }

            fn add(self, other: Self) -> Self {
                self + other
            }

            fn sub(self, other: Self) -> Self {
                self - other
            }

            fn mul(self, other: Self) -> Self {
                self * other
            }

            fn checked_div(self, other: Self) -> Option<Self> {
                Some(self / other)
            }

            fn checked_rem(self, other: Self) -> Option<Self> {
                Some(self % other)
            }

            fn neg(self) -> Self {
                -self
            }

            fn abs(self) -> Self {
                <$ty>::abs(self)
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(v: f64) -> Self {
                v as $ty
            }

            fn to_i64(self) -> i64 {
                self as i64
            }

            fn from_i64(v: i64) -> Self {
                v as $ty
            }

            fn to_acc(self) -> f64 {
                self as f64
            }

            fn is_true(self) -> bool {
                self != 0.0
            }

            fn from_bool(b: bool) -> Self {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    };
}

impl_int_elem!(i8, ElemKind::Int8);
impl_int_elem!(i16, ElemKind::Int16);
impl_int_elem!(i32, ElemKind::Int32);
impl_int_elem!(i64, ElemKind::Int64);
impl_float_elem!(f32, ElemKind::Float32);
impl_float_elem!(f64, ElemKind::Float64);

/// Numeric conversion between element kinds. Integer-to-integer conversions
/// go through `i64` so wide integers never round-trip through a float.
pub fn convert<S: Elem, D: Elem>(v: S) -> D {
    if S::KIND.is_float() || D::KIND.is_float() {
        D::from_f64(v.to_f64())
    } else {
        D::from_i64(v.to_i64())
    }
}

/// Compares two raw little-endian elements of the given kind. Byte elements
/// compare lexicographically (`memcmp`).
pub fn compare_raw(kind: ElemKind, a: &[u8], b: &[u8]) -> Ordering {
    with_numeric_kind!(kind, T => T::load(a).order(T::load(b)), a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elem_sizes_match_kind_sizes() {
        assert_eq!(i8::SIZE, ElemKind::Int8.size());
        assert_eq!(i16::SIZE, ElemKind::Int16.size());
        assert_eq!(i32::SIZE, ElemKind::Int32.size());
        assert_eq!(i64::SIZE, ElemKind::Int64.size());
        assert_eq!(f32::SIZE, ElemKind::Float32.size());
        assert_eq!(f64::SIZE, ElemKind::Float64.size());
        assert_eq!(ElemKind::Bytes(12).size(), 12);
    }

    #[test]
    fn integer_conversion_does_not_round_trip_through_float() {
        let big: i64 = (1 << 60) + 1;
        let out: i64 = convert(big);
        assert_eq!(out, big);
    }

    #[test]
    fn nan_sorts_last() {
        let mut vals = [f64::NAN, 1.0, -2.0];
        vals.sort_by(|a, b| a.order(*b));
        assert_eq!(vals[0], -2.0);
        assert_eq!(vals[1], 1.0);
        assert!(vals[2].is_nan());
    }

    #[test]
    fn checked_division_by_zero_is_none_for_ints() {
        assert_eq!(5i32.checked_div(0), None);
        assert_eq!(5i32.checked_rem(0), None);
        assert!(Elem::checked_div(5.0f64, 0.0).unwrap().is_infinite());
    }

    #[test]
    fn raw_comparison_dispatches_on_kind() {
        let a = 3i32.to_le_bytes();
        let b = 7i32.to_le_bytes();
        assert_eq!(compare_raw(ElemKind::Int32, &a, &b), Ordering::Less);

        let x = (-1.5f64).to_le_bytes();
        let y = 0.0f64.to_le_bytes();
        assert_eq!(compare_raw(ElemKind::Float64, &x, &y), Ordering::Less);

        assert_eq!(
            compare_raw(ElemKind::Bytes(3), b"abc", b"abd"),
            Ordering::Less
        );
    }

    #[test]
    fn kind_tags_round_trip() {
        for kind in [
            ElemKind::Int8,
            ElemKind::Int16,
            ElemKind::Int32,
            ElemKind::Int64,
            ElemKind::Float32,
            ElemKind::Float64,
            ElemKind::Bytes(16),
        ] {
            let width = match kind {
                ElemKind::Bytes(w) => w,
                _ => 0,
            };
            assert_eq!(ElemKind::from_tag(kind.tag(), width), Some(kind));
        }
    }
}
