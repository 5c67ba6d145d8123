//! # Sequence Sources
//!
//! Leaf operators that originate data: in-memory literals, generated
//! constants, and positional gathers through a stored column. B-tree scans
//! (the other, more common source) live with the column implementation in
//! `btree::tree`.

use eyre::{ensure, Result};

use crate::btree::Column;
use crate::iter::{BoxedSeries, Cursor, Feed, SeriesIter, Tile};
use crate::types::Elem;

struct FromVec<T: Elem> {
    data: Vec<T>,
    pos: usize,
    tile: Tile<T>,
    cursor: Cursor,
}

impl<T: Elem> SeriesIter<T> for FromVec<T> {
    fn next(&mut self) -> Result<bool> {
        if self.pos >= self.data.len() {
            return Ok(false);
        }
        let take = self.tile.cap().min(self.data.len() - self.pos);
        self.tile.clear();
        for &v in &self.data[self.pos..self.pos + take] {
            self.tile.push(v);
        }
        self.pos += take;
        self.cursor.next_pos += take as u64;
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
        self.pos = 0;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    fn is_context_free(&self) -> bool {
        true
    }

    fn supports_random_access(&self) -> bool {
        true
    }
}

/// Sequence over an in-memory buffer.
pub fn from_vec<T: Elem>(data: Vec<T>, tile_size: usize) -> BoxedSeries<T> {
    let n = data.len() as u64;
    Box::new(FromVec {
        data,
        pos: 0,
        tile: Tile::new(tile_size),
        cursor: Cursor::sized(n),
    })
}

struct Constant<T: Elem> {
    value: T,
    count: u64,
    tile: Tile<T>,
    cursor: Cursor,
}

impl<T: Elem> SeriesIter<T> for Constant<T> {
    fn next(&mut self) -> Result<bool> {
        let remaining = self.count - self.cursor.next_pos;
        if remaining == 0 {
            return Ok(false);
        }
        let take = (self.tile.cap() as u64).min(remaining) as usize;
        self.tile.clear();
        for _ in 0..take {
            self.tile.push(self.value);
        }
        self.cursor.next_pos += take as u64;
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
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }

    fn is_context_free(&self) -> bool {
        true
    }

    fn supports_random_access(&self) -> bool {
        true
    }
}

/// `count` repetitions of one value.
pub fn constant<T: Elem>(value: T, count: u64, tile_size: usize) -> BoxedSeries<T> {
    Box::new(Constant {
        value,
        count,
        tile: Tile::new(tile_size),
        cursor: Cursor::sized(count),
    })
}

struct MapPositions<T: Elem> {
    column: Column,
    positions: Feed<i64>,
    tile: Tile<T>,
    cursor: Cursor,
}

impl<T: Elem> SeriesIter<T> for MapPositions<T> {
    fn next(&mut self) -> Result<bool> {
        self.tile.clear();
        let count = self.column.count();
        while !self.tile.is_full() {
            let Some(pos) = self.positions.next_value()? else {
                break;
            };
            ensure!(
                pos >= 0 && (pos as u64) < count,
                "gather position {} out of bounds in column '{}' of {} elements",
                pos,
                self.column.name(),
                count
            );
            self.tile.push(self.column.get::<T>(pos as u64)?);
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
        self.positions.reset()?;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

/// Random-access gather: element of `column` at each position produced by
/// `positions` (the positions need not be ordered).
pub fn map_positions<T: Elem>(
    column: &Column,
    positions: BoxedSeries<i64>,
) -> Result<BoxedSeries<T>> {
    ensure!(
        T::KIND == column.kind(),
        "cannot gather {:?} elements from {:?} column '{}'",
        T::KIND,
        column.kind(),
        column.name()
    );
    let tile_size = positions.tile_size();
    Ok(Box::new(MapPositions::<T> {
        column: column.clone(),
        positions: Feed::new(positions),
        tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::to_array;

    #[test]
    fn constant_produces_exact_count() {
        let mut series = constant(7i32, 300, 128);
        let all = to_array(series.as_mut()).unwrap();
        assert_eq!(all.len(), 300);
        assert!(all.iter().all(|&v| v == 7));
    }

    #[test]
    fn from_vec_respects_tile_size() {
        let mut series = from_vec((0..10i64).collect(), 4);
        assert!(series.next().unwrap());
        assert_eq!(series.tile().len(), 4);
        assert!(series.next().unwrap());
        assert!(series.next().unwrap());
        assert_eq!(series.tile().len(), 2);
        assert!(!series.next().unwrap());
    }

    #[test]
    fn empty_source_is_immediately_exhausted() {
        let mut series = from_vec(Vec::<i32>::new(), 8);
        assert!(!series.next().unwrap());
        assert!(!series.next().unwrap());
    }
}
