//! # Tee — Fan-Out to Two Consumers
//!
//! `tee` splits one producer into two consumers that may be pulled in any
//! interleaving. The two halves share the underlying input; whichever
//! consumer runs ahead drives the input, and the tiles it produces are
//! queued for the consumer that is behind. The input therefore advances
//! exactly once per logical position, which is what makes it safe to share
//! a non-context-free operator between two pipelines.
//!
//! Queued tiles are bounded only by how far the two consumers diverge;
//! pulling the halves in rough alternation keeps at most one tile queued.
//!
//! Resetting either half rewinds the shared input and both queues, so a
//! reset is only meaningful when both consumers restart together.

use std::collections::VecDeque;
use std::sync::Arc;

use eyre::Result;
use parking_lot::Mutex;

use crate::types::Elem;

use super::{BoxedSeries, Cursor, SeriesIter};

struct TeeState<T: Elem> {
    input: BoxedSeries<T>,
    pending: [VecDeque<Vec<T>>; 2],
    done: bool,
}

struct TeeHalf<T: Elem> {
    state: Arc<Mutex<TeeState<T>>>,
    side: usize,
    tile: Vec<T>,
    cursor: Cursor,
    tile_size: usize,
}

impl<T: Elem> SeriesIter<T> for TeeHalf<T> {
    fn next(&mut self) -> Result<bool> {
        let mut state = self.state.lock();
        let tile = if let Some(tile) = state.pending[self.side].pop_front() {
            tile
        } else if state.done {
            return Ok(false);
        } else if state.input.next()? {
            let tile = state.input.tile().to_vec();
            state.pending[1 - self.side].push_back(tile.clone());
            tile
        } else {
            state.done = true;
            return Ok(false);
        };
        drop(state);

        self.cursor.next_pos += tile.len() as u64;
        self.tile = tile;
        Ok(true)
    }

    fn tile(&self) -> &[T] {
        &self.tile
    }

    fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    fn tile_size(&self) -> usize {
        self.tile_size
    }

    fn reset(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.input.reset()?;
        state.pending[0].clear();
        state.pending[1].clear();
        state.done = false;
        drop(state);
        self.tile.clear();
        self.cursor.next_pos = self.cursor.first_pos;
        Ok(())
    }
}

/// Splits `input` into two independently pullable consumers.
pub fn tee<T: Elem>(input: BoxedSeries<T>) -> (BoxedSeries<T>, BoxedSeries<T>) {
    let tile_size = input.tile_size();
    let cursor = Cursor::inherit(input.cursor());
    let state = Arc::new(Mutex::new(TeeState {
        input,
        pending: [VecDeque::new(), VecDeque::new()],
        done: false,
    }));
    let a = TeeHalf {
        state: Arc::clone(&state),
        side: 0,
        tile: Vec::new(),
        cursor,
        tile_size,
    };
    let b = TeeHalf {
        state,
        side: 1,
        tile: Vec::new(),
        cursor,
        tile_size,
    };
    (Box::new(a), Box::new(b))
}
