//! # Internal Macros
//!
//! This module provides internal macros for reducing boilerplate in Tessera.
//!
//! ## zerocopy_accessors!
//!
//! Generates getter and setter methods for zerocopy struct fields that use
//! little-endian wrapper types (U16, U32, U64).
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::little_endian::{U32, U64};
//!
//! #[repr(C)]
//! struct Header {
//!     page_count: U64,
//!     page_size: U32,
//! }
//!
//! impl Header {
//!     zerocopy_accessors! {
//!         page_count: u64,
//!         page_size: u32,
//!     }
//! }
//! ```
//!
//! ## with_numeric_kind!
//!
//! Dispatches a runtime `ElemKind` to a compile-time element type, binding
//! the type parameter inside the body. The `Bytes` arm is provided by the
//! caller since byte columns flow through a different iterator family.

/// Generates getter and setter methods for zerocopy little-endian fields.
#[macro_export]
macro_rules! zerocopy_accessors {
    (@impl $field:ident, u16) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u16 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u16) {
                self.$field = ::zerocopy::little_endian::U16::new(val);
            }
        }
    };
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::little_endian::U32::new(val);
            }
        }
    };
    (@impl $field:ident, u64) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u64 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u64) {
                self.$field = ::zerocopy::little_endian::U64::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_accessors!(@impl $field, $ty);
        )*
    };
}

/// Dispatches a runtime element kind to a concrete numeric type.
#[macro_export]
macro_rules! with_numeric_kind {
    ($kind:expr, $T:ident => $body:expr, $bytes:expr) => {
        match $kind {
            $crate::types::ElemKind::Int8 => {
                type $T = i8;
                $body
            }
            $crate::types::ElemKind::Int16 => {
                type $T = i16;
                $body
            }
            $crate::types::ElemKind::Int32 => {
                type $T = i32;
                $body
            }
            $crate::types::ElemKind::Int64 => {
                type $T = i64;
                $body
            }
            $crate::types::ElemKind::Float32 => {
                type $T = f32;
                $body
            }
            $crate::types::ElemKind::Float64 => {
                type $T = f64;
                $body
            }
            $crate::types::ElemKind::Bytes(_) => $bytes,
        }
    };
}
