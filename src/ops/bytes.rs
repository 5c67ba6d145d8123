//! # Fixed-Width Byte-Array Series
//!
//! Columns of kind `Bytes(width)` hold fixed-size byte arrays whose width
//! is a runtime value, so they flow through their own iterator family
//! rather than the type-parameterized numeric pipeline. The family is
//! deliberately narrow: scan, literal source, mask filtering, `LIKE`
//! pattern matching, sorted group counting by `memcmp`, and packing of
//! narrow keys into `i64` for use with the numeric grouping and hashing
//! operators (the canonical 1/2/4/8-byte key fast path).
//!
//! Values shorter than the column width are zero-padded on append; `LIKE`
//! matching ignores the trailing zero padding.

use std::sync::Arc;

use eyre::{ensure, Result};
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::btree::{Column, RawScan};
use crate::iter::{BoxedSeries, Cursor, SeriesIter, Tile};
use crate::types::ElemKind;

/// Pull-based iterator over fixed-width byte elements. `tile()` exposes
/// `len * width` raw bytes.
pub trait ByteSeries: Send {
    fn next(&mut self) -> Result<bool>;
    fn tile(&self) -> &[u8];
    fn width(&self) -> usize;
    fn tile_size(&self) -> usize;
    fn reset(&mut self) -> Result<()>;

    /// Elements in the current tile.
    fn tile_len(&self) -> usize {
        self.tile().len() / self.width()
    }
}

pub type BoxedByteSeries = Box<dyn ByteSeries>;

/// Element-wise reader over a byte series; elements are copied out since
/// widths are small.
struct ByteFeed {
    iter: BoxedByteSeries,
    offs: usize,
    done: bool,
}

impl ByteFeed {
    fn new(iter: BoxedByteSeries) -> Self {
        Self {
            iter,
            offs: usize::MAX,
            done: false,
        }
    }

    fn next_item(&mut self) -> Result<Option<SmallVec<[u8; 16]>>> {
        if self.done {
            return Ok(None);
        }
        let width = self.iter.width();
        while self.offs >= self.iter.tile_len() {
            if !self.iter.next()? {
                self.done = true;
                return Ok(None);
            }
            self.offs = 0;
        }
        let start = self.offs * width;
        let item = SmallVec::from_slice(&self.iter.tile()[start..start + width]);
        self.offs += 1;
        Ok(Some(item))
    }

    fn reset(&mut self) -> Result<()> {
        self.iter.reset()?;
        self.offs = usize::MAX;
        self.done = false;
        Ok(())
    }
}

struct BytesScan {
    raw: RawScan,
    width: usize,
}

impl ByteSeries for BytesScan {
    fn next(&mut self) -> Result<bool> {
        Ok(self.raw.next_chunk()? > 0)
    }

    fn tile(&self) -> &[u8] {
        self.raw.buf()
    }

    fn width(&self) -> usize {
        self.width
    }

    fn tile_size(&self) -> usize {
        self.raw.tile_size()
    }

    fn reset(&mut self) -> Result<()> {
        self.raw.reset();
        Ok(())
    }
}

/// Positional scan over a byte column (same bound semantics as
/// `Column::scan`).
pub fn scan_bytes(column: &Column, from: i64, till: i64) -> Result<BoxedByteSeries> {
    let ElemKind::Bytes(width) = column.kind() else {
        eyre::bail!(
            "byte scan over {:?} column '{}'",
            column.kind(),
            column.name()
        );
    };
    Ok(Box::new(BytesScan {
        raw: column.raw_scan(from, till),
        width: width as usize,
    }))
}

struct BytesFromVec {
    data: Vec<u8>,
    width: usize,
    pos: usize,
    tile_size: usize,
    tile: Vec<u8>,
}

impl ByteSeries for BytesFromVec {
    fn next(&mut self) -> Result<bool> {
        let total = self.data.len() / self.width;
        if self.pos >= total {
            return Ok(false);
        }
        let take = self.tile_size.min(total - self.pos);
        let start = self.pos * self.width;
        self.tile.clear();
        self.tile
            .extend_from_slice(&self.data[start..start + take * self.width]);
        self.pos += take;
        Ok(true)
    }

    fn tile(&self) -> &[u8] {
        &self.tile
    }

    fn width(&self) -> usize {
        self.width
    }

    fn tile_size(&self) -> usize {
        self.tile_size
    }

    fn reset(&mut self) -> Result<()> {
        self.pos = 0;
        self.tile.clear();
        Ok(())
    }
}

/// Byte series over a flat buffer of `width`-sized elements.
pub fn from_vec_bytes(data: Vec<u8>, width: usize, tile_size: usize) -> Result<BoxedByteSeries> {
    ensure!(width > 0, "zero-width byte elements");
    ensure!(
        data.len() % width == 0,
        "byte buffer of {} bytes is not a multiple of width {}",
        data.len(),
        width
    );
    Ok(Box::new(BytesFromVec {
        data,
        width,
        pos: 0,
        tile_size,
        tile: Vec::with_capacity(tile_size * width),
    }))
}

/// SQL-style LIKE: `%` matches any run, `_` any single byte. Classic
/// two-pointer scan with star backtracking.
fn like_match(value: &[u8], pattern: &[u8]) -> bool {
    let (mut v, mut p) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while v < value.len() {
        if p < pattern.len() && (pattern[p] == b'_' || pattern[p] == value[v]) {
            v += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == b'%' {
            star = Some((p, v));
            p += 1;
        } else if let Some((sp, sv)) = star {
            p = sp + 1;
            v = sv + 1;
            star = Some((sp, sv + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == b'%' {
        p += 1;
    }
    p == pattern.len()
}

struct Like {
    input: ByteFeed,
    pattern: Vec<u8>,
    tile: Tile<i8>,
    cursor: Cursor,
}

impl SeriesIter<i8> for Like {
    fn next(&mut self) -> Result<bool> {
        self.tile.clear();
        while !self.tile.is_full() {
            let Some(item) = self.input.next_item()? else {
                break;
            };
            let trimmed_len = item
                .iter()
                .rposition(|&b| b != 0)
                .map_or(0, |i| i + 1);
            self.tile
                .push(like_match(&item[..trimmed_len], &self.pattern) as i8);
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
        self.input.reset()?;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

/// Wildcard match of every element against `pattern`, as an `i8` mask.
pub fn like(input: BoxedByteSeries, pattern: &str) -> BoxedSeries<i8> {
    let tile_size = input.tile_size();
    Box::new(Like {
        input: ByteFeed::new(input),
        pattern: pattern.as_bytes().to_vec(),
        tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    })
}

struct FilterBytes {
    mask: crate::iter::Feed<i8>,
    values: ByteFeed,
    width: usize,
    tile_size: usize,
    tile: Vec<u8>,
}

impl ByteSeries for FilterBytes {
    fn next(&mut self) -> Result<bool> {
        self.tile.clear();
        while self.tile.len() / self.width < self.tile_size {
            let Some(hit) = self.mask.next_value()? else {
                break;
            };
            let Some(item) = self.values.next_item()? else {
                break;
            };
            if hit != 0 {
                self.tile.extend_from_slice(&item);
            }
        }
        Ok(!self.tile.is_empty())
    }

    fn tile(&self) -> &[u8] {
        &self.tile
    }

    fn width(&self) -> usize {
        self.width
    }

    fn tile_size(&self) -> usize {
        self.tile_size
    }

    fn reset(&mut self) -> Result<()> {
        self.mask.reset()?;
        self.values.reset()?;
        self.tile.clear();
        Ok(())
    }
}

/// Mask compaction over a byte series.
pub fn filter_bytes(mask: BoxedSeries<i8>, values: BoxedByteSeries) -> BoxedByteSeries {
    let width = values.width();
    let tile_size = values.tile_size();
    Box::new(FilterBytes {
        mask: crate::iter::Feed::new(mask),
        values: ByteFeed::new(values),
        width,
        tile_size,
        tile: Vec::with_capacity(tile_size * width),
    })
}

struct GroupCountBytes {
    keys: ByteFeed,
    run: Option<(SmallVec<[u8; 16]>, i64)>,
    tile: Tile<i64>,
    cursor: Cursor,
}

impl SeriesIter<i64> for GroupCountBytes {
    fn next(&mut self) -> Result<bool> {
        self.tile.clear();
        while !self.tile.is_full() {
            let Some(key) = self.keys.next_item()? else {
                if let Some((_, n)) = self.run.take() {
                    self.tile.push(n);
                }
                break;
            };
            match &mut self.run {
                Some((run_key, n)) if run_key[..] == key[..] => *n += 1,
                Some((run_key, n)) => {
                    self.tile.push(*n);
                    *run_key = key;
                    *n = 1;
                }
                None => self.run = Some((key, 1)),
            }
        }
        if self.tile.is_empty() {
            return Ok(false);
        }
        self.cursor.next_pos += self.tile.len() as u64;
        Ok(true)
    }

    fn tile(&self) -> &[i64] {
        self.tile.as_slice()
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn tile_size(&self) -> usize {
        self.tile.cap()
    }

    fn reset(&mut self) -> Result<()> {
        self.keys.reset()?;
        self.run = None;
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

/// Elements per run of `memcmp`-equal byte keys (keys must be sorted or
/// run-clustered, as with the numeric grouped aggregates).
pub fn group_count_bytes(keys: BoxedByteSeries) -> BoxedSeries<i64> {
    let tile_size = keys.tile_size();
    Box::new(GroupCountBytes {
        keys: ByteFeed::new(keys),
        run: None,
        tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    })
}

struct PackKeys {
    input: ByteFeed,
    tile: Tile<i64>,
    cursor: Cursor,
}

impl SeriesIter<i64> for PackKeys {
    fn next(&mut self) -> Result<bool> {
        self.tile.clear();
        while !self.tile.is_full() {
            let Some(item) = self.input.next_item()? else {
                break;
            };
            let mut buf = [0u8; 8];
            buf[..item.len()].copy_from_slice(&item);
            self.tile.push(i64::from_le_bytes(buf));
        }
        if self.tile.is_empty() {
            return Ok(false);
        }
        self.cursor.next_pos += self.tile.len() as u64;
        Ok(true)
    }

    fn tile(&self) -> &[i64] {
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

/// Packs byte keys of width ≤ 8 into `i64` (zero-extended little-endian,
/// injective), so they can drive the numeric grouping and hash operators.
pub fn pack_keys(input: BoxedByteSeries) -> Result<BoxedSeries<i64>> {
    ensure!(
        input.width() <= 8,
        "cannot pack {}-byte keys into 8-byte integers",
        input.width()
    );
    let tile_size = input.tile_size();
    Ok(Box::new(PackKeys {
        input: ByteFeed::new(input),
        tile: Tile::new(tile_size),
        cursor: Cursor::unbounded(),
    }))
}

/// Fan-out of one byte series to two consumers, the byte-family analog of
/// `iter::tee`.
pub fn tee_bytes(input: BoxedByteSeries) -> (BoxedByteSeries, BoxedByteSeries) {
    struct Shared {
        input: BoxedByteSeries,
        pending: [std::collections::VecDeque<Vec<u8>>; 2],
        done: bool,
    }

    struct Half {
        shared: Arc<Mutex<Shared>>,
        side: usize,
        width: usize,
        tile_size: usize,
        tile: Vec<u8>,
    }

    impl ByteSeries for Half {
        fn next(&mut self) -> Result<bool> {
            let mut shared = self.shared.lock();
            let tile = if let Some(tile) = shared.pending[self.side].pop_front() {
                tile
            } else if shared.done {
                return Ok(false);
            } else if shared.input.next()? {
                let tile = shared.input.tile().to_vec();
                let other = 1 - self.side;
                shared.pending[other].push_back(tile.clone());
                tile
            } else {
                shared.done = true;
                return Ok(false);
            };
            drop(shared);
            self.tile = tile;
            Ok(true)
        }

        fn tile(&self) -> &[u8] {
            &self.tile
        }

        fn width(&self) -> usize {
            self.width
        }

        fn tile_size(&self) -> usize {
            self.tile_size
        }

        fn reset(&mut self) -> Result<()> {
            let mut shared = self.shared.lock();
            shared.input.reset()?;
            shared.pending[0].clear();
            shared.pending[1].clear();
            shared.done = false;
            drop(shared);
            self.tile.clear();
            Ok(())
        }
    }

    let (width, tile_size) = (input.width(), input.tile_size());
    let shared = Arc::new(Mutex::new(Shared {
        input,
        pending: [Default::default(), Default::default()],
        done: false,
    }));
    let a = Half {
        shared: Arc::clone(&shared),
        side: 0,
        width,
        tile_size,
        tile: Vec::new(),
    };
    let b = Half {
        shared,
        side: 1,
        width,
        tile_size,
        tile: Vec::new(),
    };
    (Box::new(a), Box::new(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::to_array;
    use crate::ops::from_vec;

    #[test]
    fn like_wildcards() {
        assert!(like_match(b"hello", b"h%o"));
        assert!(like_match(b"hello", b"_ello"));
        assert!(like_match(b"hello", b"%"));
        assert!(!like_match(b"hello", b"h_o"));
        assert!(like_match(b"", b"%"));
        assert!(!like_match(b"abc", b"abcd"));
    }

    #[test]
    fn like_mask_over_padded_elements() {
        // Width-6 elements, zero padded.
        let data = b"apple\0banana grape\0".to_vec();
        let input = from_vec_bytes(data, 6, 4).unwrap();
        let mut mask = like(input, "%a%");
        assert_eq!(to_array(mask.as_mut()).unwrap(), vec![1i8, 1, 1]);

        let data = b"apple\0banana grape\0".to_vec();
        let input = from_vec_bytes(data, 6, 4).unwrap();
        let mut mask = like(input, "ba%");
        assert_eq!(to_array(mask.as_mut()).unwrap(), vec![0i8, 1, 0]);
    }

    #[test]
    fn filter_bytes_compacts() {
        let input = from_vec_bytes(b"aabbcc".to_vec(), 2, 4).unwrap();
        let mask = from_vec(vec![1i8, 0, 1], 4);
        let mut out = filter_bytes(mask, input);
        assert!(out.next().unwrap());
        assert_eq!(out.tile(), b"aacc");
        assert!(!out.next().unwrap());
    }

    #[test]
    fn group_count_bytes_detects_runs_by_memcmp() {
        let input = from_vec_bytes(b"xxxxyyzz".to_vec(), 2, 2).unwrap();
        let mut out = group_count_bytes(input);
        assert_eq!(to_array(out.as_mut()).unwrap(), vec![2, 1, 1]);
    }

    #[test]
    fn pack_keys_is_injective_for_narrow_keys() {
        let input = from_vec_bytes(b"abcdabce".to_vec(), 4, 4).unwrap();
        let packed = to_array(pack_keys(input).unwrap().as_mut()).unwrap();
        assert_eq!(packed.len(), 2);
        assert_ne!(packed[0], packed[1]);

        let input = from_vec_bytes(vec![0u8; 32], 16, 4).unwrap();
        assert!(pack_keys(input).is_err());
    }

    #[test]
    fn tee_bytes_feeds_both_consumers() {
        let input = from_vec_bytes(b"aabbccdd".to_vec(), 2, 2).unwrap();
        let (mut x, mut y) = tee_bytes(input);

        let mut got_x = Vec::new();
        while x.next().unwrap() {
            got_x.extend_from_slice(x.tile());
        }
        let mut got_y = Vec::new();
        while y.next().unwrap() {
            got_y.extend_from_slice(y.tile());
        }
        assert_eq!(got_x, b"aabbccdd");
        assert_eq!(got_x, got_y);
    }
}
