//! # Arithmetic, Comparison and Logical Operators
//!
//! Lockstep element-wise operators. Binary operators pull both operands
//! through element feeds and end at the shorter input; unary operators map
//! tiles one-to-one. Comparisons produce `i8` masks (nonzero = true), the
//! representation the filtering family consumes.
//!
//! Integer division and remainder by zero are domain errors; float division
//! follows IEEE semantics (infinities and NaN propagate, as they do through
//! every float pipeline stage).

use std::cmp::Ordering;

use eyre::{eyre, Result};

use crate::iter::{BoxedSeries, Cursor, Feed, SeriesIter, Tile};
use crate::types::{convert, Elem};

#[derive(Debug, Clone, Copy)]
enum BinKind {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    MaxOf,
    MinOf,
}

struct Binary<T: Elem> {
    kind: BinKind,
    left: Feed<T>,
    right: Feed<T>,
    tile: Tile<T>,
    cursor: Cursor,
}

impl<T: Elem> Binary<T> {
    fn eval(kind: BinKind, a: T, b: T) -> Result<T> {
        Ok(match kind {
            BinKind::Add => a.add(b),
            BinKind::Sub => a.sub(b),
            BinKind::Mul => a.mul(b),
            BinKind::Div => a
                .checked_div(b)
                .ok_or_else(|| eyre!("division by zero"))?,
            BinKind::Rem => a
                .checked_rem(b)
                .ok_or_else(|| eyre!("remainder by zero"))?,
            BinKind::MaxOf => {
                if a.order(b) == Ordering::Less {
                    b
                } else {
                    a
                }
            }
            BinKind::MinOf => {
                if b.order(a) == Ordering::Less {
                    b
                } else {
                    a
                }
            }
        })
    }
}

impl<T: Elem> SeriesIter<T> for Binary<T> {
    fn next(&mut self) -> Result<bool> {
        self.tile.clear();
        while !self.tile.is_full() {
            let Some(a) = self.left.next_value()? else { break };
            let Some(b) = self.right.next_value()? else { break };
            self.tile.push(Self::eval(self.kind, a, b)?);
        }
        if self.tile.is_empty() {
            return Ok(false);
        }
        self.cursor.next_pos += self.tile.len() as u64;
        Ok(true)
    }

    fn tile(&self) -> &[T] {
        self.tile.as_slice()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn tile_size(&self) -> usize {
        self.tile.cap()
    }

    fn reset(&mut self) -> Result<()> {
        self.left.reset()?;
        self.right.reset()?;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

fn binary<T: Elem>(kind: BinKind, left: BoxedSeries<T>, right: BoxedSeries<T>) -> BoxedSeries<T> {
    let tile_size = left.tile_size();
    let cursor = Cursor::inherit(left.cursor());
    Box::new(Binary {
        kind,
        left: Feed::new(left),
        right: Feed::new(right),
        tile: Tile::new(tile_size),
        cursor,
    })
}

pub fn add<T: Elem>(left: BoxedSeries<T>, right: BoxedSeries<T>) -> BoxedSeries<T> {
    binary(BinKind::Add, left, right)
}

pub fn sub<T: Elem>(left: BoxedSeries<T>, right: BoxedSeries<T>) -> BoxedSeries<T> {
    binary(BinKind::Sub, left, right)
}

pub fn mul<T: Elem>(left: BoxedSeries<T>, right: BoxedSeries<T>) -> BoxedSeries<T> {
    binary(BinKind::Mul, left, right)
}

pub fn div<T: Elem>(left: BoxedSeries<T>, right: BoxedSeries<T>) -> BoxedSeries<T> {
    binary(BinKind::Div, left, right)
}

pub fn rem<T: Elem>(left: BoxedSeries<T>, right: BoxedSeries<T>) -> BoxedSeries<T> {
    binary(BinKind::Rem, left, right)
}

/// Element-wise maximum of two sequences.
pub fn maxof<T: Elem>(left: BoxedSeries<T>, right: BoxedSeries<T>) -> BoxedSeries<T> {
    binary(BinKind::MaxOf, left, right)
}

/// Element-wise minimum of two sequences.
pub fn minof<T: Elem>(left: BoxedSeries<T>, right: BoxedSeries<T>) -> BoxedSeries<T> {
    binary(BinKind::MinOf, left, right)
}

#[derive(Debug, Clone, Copy)]
enum UnKind {
    Neg,
    Abs,
}

struct Unary<T: Elem> {
    kind: UnKind,
    input: BoxedSeries<T>,
    tile: Tile<T>,
    cursor: Cursor,
}

impl<T: Elem> SeriesIter<T> for Unary<T> {
    fn next(&mut self) -> Result<bool> {
        if !self.input.next()? {
            return Ok(false);
        }
        self.tile.clear();
        for &v in self.input.tile() {
            self.tile.push(match self.kind {
                UnKind::Neg => v.neg(),
                UnKind::Abs => v.abs(),
            });
        }
        self.cursor.next_pos += self.tile.len() as u64;
        Ok(true)
    }

    fn tile(&self) -> &[T] {
        self.tile.as_slice()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn tile_size(&self) -> usize {
        self.tile.cap()
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()?;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    fn is_context_free(&self) -> bool {
        self.input.is_context_free()
    }
}

pub fn neg<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<T> {
    let tile_size = input.tile_size();
    let cursor = Cursor::inherit(input.cursor());
    Box::new(Unary {
        kind: UnKind::Neg,
        input,
        tile: Tile::new(tile_size),
        cursor,
    })
}

pub fn abs<T: Elem>(input: BoxedSeries<T>) -> BoxedSeries<T> {
    let tile_size = input.tile_size();
    let cursor = Cursor::inherit(input.cursor());
    Box::new(Unary {
        kind: UnKind::Abs,
        input,
        tile: Tile::new(tile_size),
        cursor,
    })
}

#[derive(Debug, Clone, Copy)]
enum CmpKind {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

struct Compare<T: Elem> {
    kind: CmpKind,
    left: Feed<T>,
    right: Feed<T>,
    tile: Tile<i8>,
    cursor: Cursor,
}

impl<T: Elem> SeriesIter<i8> for Compare<T> {
    fn next(&mut self) -> Result<bool> {
        self.tile.clear();
        while !self.tile.is_full() {
            let Some(a) = self.left.next_value()? else { break };
            let Some(b) = self.right.next_value()? else { break };
            let ord = a.order(b);
            let hit = match self.kind {
                CmpKind::Eq => ord == Ordering::Equal,
                CmpKind::Ne => ord != Ordering::Equal,
                CmpKind::Gt => ord == Ordering::Greater,
                CmpKind::Ge => ord != Ordering::Less,
                CmpKind::Lt => ord == Ordering::Less,
                CmpKind::Le => ord != Ordering::Greater,
            };
            self.tile.push(hit as i8);
        }
        if self.tile.is_empty() {
            return Ok(false);
        }
        self.cursor.next_pos += self.tile.len() as u64;
        Ok(true)
    }

    fn tile(&self) -> &[i8] {
        self.tile.as_slice()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn tile_size(&self) -> usize {
        self.tile.cap()
    }

    fn reset(&mut self) -> Result<()> {
        self.left.reset()?;
        self.right.reset()?;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

fn compare<T: Elem>(kind: CmpKind, left: BoxedSeries<T>, right: BoxedSeries<T>) -> BoxedSeries<i8> {
    let tile_size = left.tile_size();
    let cursor = Cursor::inherit(left.cursor());
    Box::new(Compare {
        kind,
        left: Feed::new(left),
        right: Feed::new(right),
        tile: Tile::new(tile_size),
        cursor,
    })
}

pub fn eq<T: Elem>(left: BoxedSeries<T>, right: BoxedSeries<T>) -> BoxedSeries<i8> {
    compare(CmpKind::Eq, left, right)
}

pub fn ne<T: Elem>(left: BoxedSeries<T>, right: BoxedSeries<T>) -> BoxedSeries<i8> {
    compare(CmpKind::Ne, left, right)
}

pub fn gt<T: Elem>(left: BoxedSeries<T>, right: BoxedSeries<T>) -> BoxedSeries<i8> {
    compare(CmpKind::Gt, left, right)
}

pub fn ge<T: Elem>(left: BoxedSeries<T>, right: BoxedSeries<T>) -> BoxedSeries<i8> {
    compare(CmpKind::Ge, left, right)
}

pub fn lt<T: Elem>(left: BoxedSeries<T>, right: BoxedSeries<T>) -> BoxedSeries<i8> {
    compare(CmpKind::Lt, left, right)
}

pub fn le<T: Elem>(left: BoxedSeries<T>, right: BoxedSeries<T>) -> BoxedSeries<i8> {
    compare(CmpKind::Le, left, right)
}

#[derive(Debug, Clone, Copy)]
enum BoolKind {
    And,
    Or,
    Xor,
}

struct Logical {
    kind: BoolKind,
    left: Feed<i8>,
    right: Feed<i8>,
    tile: Tile<i8>,
    cursor: Cursor,
}

impl SeriesIter<i8> for Logical {
    fn next(&mut self) -> Result<bool> {
        self.tile.clear();
        while !self.tile.is_full() {
            let Some(a) = self.left.next_value()? else { break };
            let Some(b) = self.right.next_value()? else { break };
            let (a, b) = (a != 0, b != 0);
            let v = match self.kind {
                BoolKind::And => a && b,
                BoolKind::Or => a || b,
                BoolKind::Xor => a != b,
            };
            self.tile.push(v as i8);
        }
        if self.tile.is_empty() {
            return Ok(false);
        }
        self.cursor.next_pos += self.tile.len() as u64;
        Ok(true)
    }

    fn tile(&self) -> &[i8] {
        self.tile.as_slice()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn tile_size(&self) -> usize {
        self.tile.cap()
    }

    fn reset(&mut self) -> Result<()> {
        self.left.reset()?;
        self.right.reset()?;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

fn logical(kind: BoolKind, left: BoxedSeries<i8>, right: BoxedSeries<i8>) -> BoxedSeries<i8> {
    let tile_size = left.tile_size();
    let cursor = Cursor::inherit(left.cursor());
    Box::new(Logical {
        kind,
        left: Feed::new(left),
        right: Feed::new(right),
        tile: Tile::new(tile_size),
        cursor,
    })
}

pub fn and(left: BoxedSeries<i8>, right: BoxedSeries<i8>) -> BoxedSeries<i8> {
    logical(BoolKind::And, left, right)
}

pub fn or(left: BoxedSeries<i8>, right: BoxedSeries<i8>) -> BoxedSeries<i8> {
    logical(BoolKind::Or, left, right)
}

pub fn xor(left: BoxedSeries<i8>, right: BoxedSeries<i8>) -> BoxedSeries<i8> {
    logical(BoolKind::Xor, left, right)
}

struct NotIter {
    input: BoxedSeries<i8>,
    tile: Tile<i8>,
    cursor: Cursor,
}

impl SeriesIter<i8> for NotIter {
    fn next(&mut self) -> Result<bool> {
        if !self.input.next()? {
            return Ok(false);
        }
        self.tile.clear();
        for &v in self.input.tile() {
            self.tile.push((v == 0) as i8);
        }
        self.cursor.next_pos += self.tile.len() as u64;
        Ok(true)
    }

    fn tile(&self) -> &[i8] {
        self.tile.as_slice()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn tile_size(&self) -> usize {
        self.tile.cap()
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()?;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

pub fn not(input: BoxedSeries<i8>) -> BoxedSeries<i8> {
    let tile_size = input.tile_size();
    let cursor = Cursor::inherit(input.cursor());
    Box::new(NotIter {
        input,
        tile: Tile::new(tile_size),
        cursor,
    })
}

struct Cast<S: Elem, D: Elem> {
    input: BoxedSeries<S>,
    tile: Tile<D>,
    cursor: Cursor,
}

impl<S: Elem, D: Elem> SeriesIter<D> for Cast<S, D> {
    fn next(&mut self) -> Result<bool> {
        if !self.input.next()? {
            return Ok(false);
        }
        self.tile.clear();
        for &v in self.input.tile() {
            self.tile.push(convert::<S, D>(v));
        }
        self.cursor.next_pos += self.tile.len() as u64;
        Ok(true)
    }

    fn tile(&self) -> &[D] {
        self.tile.as_slice()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn tile_size(&self) -> usize {
        self.tile.cap()
    }

    fn reset(&mut self) -> Result<()> {
        self.input.reset()?;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    fn is_context_free(&self) -> bool {
        self.input.is_context_free()
    }
}

/// Numeric conversion between element kinds.
pub fn cast<S: Elem, D: Elem>(input: BoxedSeries<S>) -> BoxedSeries<D> {
    let tile_size = input.tile_size();
    let cursor = Cursor::inherit(input.cursor());
    Box::new(Cast {
        input,
        tile: Tile::new(tile_size),
        cursor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::to_array;
    use crate::ops::from_vec;

    #[test]
    fn add_ends_at_shorter_input() {
        let l = from_vec(vec![1i32, 2, 3, 4], 2);
        let r = from_vec(vec![10i32, 20, 30], 3);
        let mut out = add(l, r);
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![11, 22, 33]);
    }

    #[test]
    fn integer_division_by_zero_is_a_domain_error() {
        let l = from_vec(vec![1i64, 2], 4);
        let r = from_vec(vec![1i64, 0], 4);
        let mut out = div(l, r);
        assert!(out.next().is_err());
    }

    #[test]
    fn comparisons_emit_masks() {
        let l = from_vec(vec![1i32, 5, 3], 4);
        let r = from_vec(vec![2i32, 5, 1], 4);
        let mut out = le(l, r);
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![1i8, 1, 0]);
    }

    #[test]
    fn logical_ops_normalize_truthiness() {
        let l = from_vec(vec![0i8, 7, 1, 0], 4);
        let r = from_vec(vec![1i8, 1, 0, 0], 4);
        assert_eq!(
            to_array(and(l, r).as_mut()).unwrap(),
            vec![0i8, 1, 0, 0]
        );

        let l = from_vec(vec![0i8, 7], 4);
        assert_eq!(to_array(not(l).as_mut()).unwrap(), vec![1i8, 0]);
    }

    #[test]
    fn cast_widens_and_narrows() {
        let src = from_vec(vec![1i16, -2, 300], 4);
        let wide: Vec<f64> = to_array(cast::<i16, f64>(src).as_mut()).unwrap();
        assert_eq!(wide, vec![1.0, -2.0, 300.0]);

        let src = from_vec(vec![1.9f64, -2.2], 4);
        let ints: Vec<i32> = to_array(cast::<f64, i32>(src).as_mut()).unwrap();
        assert_eq!(ints, vec![1, -2]);
    }

    #[test]
    fn maxof_minof_pick_elementwise_extremes() {
        let l = from_vec(vec![1i32, 9, 5], 4);
        let r = from_vec(vec![3i32, 2, 5], 4);
        assert_eq!(to_array(maxof(l, r).as_mut()).unwrap(), vec![3, 9, 5]);

        let l = from_vec(vec![1i32, 9, 5], 4);
        let r = from_vec(vec![3i32, 2, 5], 4);
        assert_eq!(to_array(minof(l, r).as_mut()).unwrap(), vec![1, 2, 5]);
    }
}
