//! Fixed-size buffer pool
//!
//! A pre-allocated arena of `capacity` slots, each `chunk_bytes` long. Slots
//! are handed out as owned [`Slot`] values carrying their index, so a slot
//! can only have one live owner at a time: the free list, the capture path,
//! or the transport. Slots are recycled for the lifetime of the pool and
//! never reallocated.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Buffer pool errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("no free slot (all {capacity} slots checked out)")]
    Exhausted { capacity: usize },

    #[error("slot {index} belongs to a different pool")]
    ForeignSlot { index: usize },

    #[error("slot {index} is not checked out")]
    NotOutstanding { index: usize },

    #[error("invalid pool layout: {0}")]
    InvalidLayout(String),
}

/// A release the pool refused
///
/// The slot comes back with the error so it can still be returned to the
/// pool that owns it.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct ReleaseError {
    error: PoolError,
    slot: Slot,
}

impl ReleaseError {
    /// Why the release was refused
    pub fn error(&self) -> &PoolError {
        &self.error
    }

    /// Recover the slot
    pub fn into_slot(self) -> Slot {
        self.slot
    }
}

/// One checked-out buffer
///
/// Owning a `Slot` is the only way to touch its memory. Give it back with
/// [`BufferPool::release`].
pub struct Slot {
    pool_id: u64,
    index: usize,
    offset: usize,
    len: usize,
    storage: Box<[u8]>,
}

impl Slot {
    /// Slot index within its pool
    pub fn index(&self) -> usize {
        self.index
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Payload bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.offset..self.offset + self.len]
    }

    /// Payload bytes, writable
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.storage[self.offset..self.offset + self.len]
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("pool_id", &self.pool_id)
            .field("index", &self.index)
            .field("len", &self.len)
            .finish()
    }
}

struct PoolInner {
    /// `None` while the slot is checked out
    storage: Vec<Option<Box<[u8]>>>,
    free: VecDeque<usize>,
}

/// Arena of fixed-size, aligned slots with a free list
pub struct BufferPool {
    id: u64,
    capacity: usize,
    chunk_bytes: usize,
    alignment: usize,
    inner: Mutex<PoolInner>,
}

impl BufferPool {
    /// Allocate `capacity` slots of `chunk_bytes`, each starting on an
    /// `alignment`-byte boundary
    pub fn new(capacity: usize, chunk_bytes: usize, alignment: usize) -> Result<Self, PoolError> {
        if capacity == 0 || chunk_bytes == 0 {
            return Err(PoolError::InvalidLayout(
                "capacity and chunk size must be non-zero".to_string(),
            ));
        }
        if !alignment.is_power_of_two() {
            return Err(PoolError::InvalidLayout(format!(
                "alignment {} is not a power of two",
                alignment
            )));
        }

        // Over-allocate by the alignment so every slot has an aligned window.
        let slot_bytes = chunk_bytes
            .checked_add(alignment)
            .filter(|slot| slot.checked_mul(capacity).is_some())
            .ok_or_else(|| {
                PoolError::InvalidLayout(format!(
                    "{} slots of {} bytes overflow the address space",
                    capacity, chunk_bytes
                ))
            })?;
        let storage = (0..capacity)
            .map(|_| Some(vec![0u8; slot_bytes].into_boxed_slice()))
            .collect();

        tracing::debug!(
            "Buffer pool allocated: {} slots x {} bytes (align {})",
            capacity,
            chunk_bytes,
            alignment
        );

        Ok(Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            capacity,
            chunk_bytes,
            alignment,
            inner: Mutex::new(PoolInner {
                storage,
                free: (0..capacity).collect(),
            }),
        })
    }

    /// Take a free slot without blocking
    pub fn try_acquire(&self) -> Result<Slot, PoolError> {
        let mut inner = self.inner.lock();
        let index = inner.free.pop_front().ok_or(PoolError::Exhausted {
            capacity: self.capacity,
        })?;

        let storage = inner.storage[index].take().ok_or_else(|| {
            // Free list and storage disagree; the index is already out.
            PoolError::InvalidLayout(format!("free slot {} has no storage", index))
        })?;
        let offset = storage.as_ptr().align_offset(self.alignment);

        Ok(Slot {
            pool_id: self.id,
            index,
            offset,
            len: self.chunk_bytes,
            storage,
        })
    }

    /// Return a slot to the free list
    ///
    /// Fails without panicking if the slot is not one of ours or is not
    /// currently checked out, handing the slot back inside the error.
    pub fn release(&self, slot: Slot) -> Result<(), ReleaseError> {
        let index = slot.index;
        if slot.pool_id != self.id || index >= self.capacity {
            tracing::error!("Rejected release of foreign slot {}", index);
            return Err(ReleaseError {
                error: PoolError::ForeignSlot { index },
                slot,
            });
        }

        let mut inner = self.inner.lock();
        if inner.storage[index].is_some() {
            tracing::error!("Rejected release of slot {} that is not checked out", index);
            return Err(ReleaseError {
                error: PoolError::NotOutstanding { index },
                slot,
            });
        }

        inner.storage[index] = Some(slot.storage);
        inner.free.push_back(index);
        Ok(())
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of every slot in bytes
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    /// Number of slots currently on the free list
    pub fn free_count(&self) -> usize {
        self.inner.lock().free.len()
    }

    /// Number of slots currently checked out
    pub fn outstanding(&self) -> usize {
        self.capacity - self.free_count()
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("chunk_bytes", &self.chunk_bytes)
            .field("free", &self.free_count())
            .finish()
    }
}
