//! Shared parameter memory for lock-free (Hogwild) training.
//!
//! Parameters live in an anonymous memory map and are only ever accessed as
//! `AtomicU32` cells holding `f32` bits with relaxed ordering. Readers and
//! writers never lock. An `add` is a load followed by a store, so two workers
//! updating the same element at the same time can lose one of the updates.
//! Workers train on disjoint walk shards, which keeps such collisions rare.
//!
//! The cells sit in an anonymous memory map instead of the heap. The kernel
//! hands out the mapping page aligned and zero filled, so a table of any size
//! starts as 0.0 without a write pass, and the arena has a fixed address for
//! as long as any handle lives.

use memmap2::{MmapMut, MmapOptions};
use rand::Rng;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::Result;

struct Arena {
    ptr: NonNull<AtomicU32>,
    len: usize,
    // keeps the mapping alive, only accessed through `ptr`
    _map: MmapMut,
}

// SAFETY: the arena owns the mapping and never moves or unmaps it while
// shared; every access goes through `AtomicU32`.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    fn zeroed(len: usize) -> Result<Self> {
        // anonymous maps are zero filled, and 0u32 is 0.0f32
        let bytes = len.max(1) * std::mem::size_of::<AtomicU32>();
        let mut map = MmapOptions::new().len(bytes).map_anon()?;
        let ptr = NonNull::new(map.as_mut_ptr().cast::<AtomicU32>())
            .ok_or_else(|| std::io::Error::other("anonymous map returned a null pointer"))?;
        Ok(Self {
            ptr,
            len,
            _map: map,
        })
    }

    fn cells(&self) -> &[AtomicU32] {
        // SAFETY: mappings are page aligned, which satisfies the alignment of
        // `AtomicU32`. The map spans at least `len` cells and lives as long as
        // `self`. After construction it is only accessed through this atomic
        // view, so no `&[u8]` to the same bytes exists.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

/// Row major `rows x dim` f32 matrix in shared memory.
///
/// Cloning is cheap and yields a handle to the same memory.
#[derive(Clone)]
pub struct SharedEmbedding {
    arena: Arc<Arena>,
    rows: usize,
    dim: usize,
}

impl std::fmt::Debug for SharedEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedEmbedding")
            .field("rows", &self.rows)
            .field("dim", &self.dim)
            .finish()
    }
}

impl SharedEmbedding {
    pub fn zeros(rows: usize, dim: usize) -> Result<Self> {
        Ok(Self {
            arena: Arc::new(Arena::zeroed(rows * dim)?),
            rows,
            dim,
        })
    }

    /// Matrix with every entry drawn uniformly from `[-bound, bound)`
    pub fn uniform<R: Rng + ?Sized>(
        rows: usize,
        dim: usize,
        bound: f32,
        rng: &mut R,
    ) -> Result<Self> {
        let table = Self::zeros(rows, dim)?;
        for cell in table.arena.cells() {
            let value = rng.random_range(-bound..bound);
            cell.store(value.to_bits(), Ordering::Relaxed);
        }
        Ok(table)
    }

    /// Matrix initialised from row major values
    pub fn from_values(rows: usize, dim: usize, values: &[f32]) -> Result<Self> {
        let table = Self::zeros(rows, dim)?;
        for (cell, value) in table.arena.cells().iter().zip(values) {
            cell.store(value.to_bits(), Ordering::Relaxed);
        }
        Ok(table)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        f32::from_bits(self.arena.cells()[row * self.dim + col].load(Ordering::Relaxed))
    }

    /// Copies the given rows, in order, into one row major buffer
    pub fn gather(&self, rows: &[u32]) -> Vec<f32> {
        let cells = self.arena.cells();
        let mut out = Vec::with_capacity(rows.len() * self.dim);
        for &row in rows {
            let start = row as usize * self.dim;
            out.extend(
                cells[start..start + self.dim]
                    .iter()
                    .map(|c| f32::from_bits(c.load(Ordering::Relaxed))),
            );
        }
        out
    }

    /// Adds `delta[k]` to row `rows[k]`. Repeated rows accumulate.
    pub fn index_add(&self, rows: &[u32], delta: &[f32]) {
        debug_assert_eq!(rows.len() * self.dim, delta.len());
        let cells = self.arena.cells();
        for (&row, update) in rows.iter().zip(delta.chunks_exact(self.dim)) {
            let start = row as usize * self.dim;
            for (cell, d) in cells[start..start + self.dim].iter().zip(update) {
                let value = f32::from_bits(cell.load(Ordering::Relaxed)) + d;
                cell.store(value.to_bits(), Ordering::Relaxed);
            }
        }
    }

    /// Row major copy of the whole matrix
    pub fn to_vec(&self) -> Vec<f32> {
        self.arena
            .cells()
            .iter()
            .map(|c| f32::from_bits(c.load(Ordering::Relaxed)))
            .collect()
    }
}
