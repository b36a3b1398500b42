// tlab.rs
//
// Thread-local allocation buffers. Arenas store objects in fixed-size chunks;
// each thread keeps a small stash of empty chunks and refills it from the
// process-wide heap in batches, so concurrent analysis of independent units
// takes the heap lock once per batch rather than once per chunk. Discarded
// arenas hand their chunks back to the heap for reuse.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::arena::Object;

/// Objects per chunk.
pub const CHUNK_OBJECTS: usize = 256;

/// Chunks taken from the heap per refill.
const REFILL_BATCH: usize = 8;

/// Upper bound on empty chunks kept in the heap after release.
const HEAP_RETAIN: usize = 4096;

pub(crate) struct Chunk {
    pub(crate) objects: Vec<Object>,
}

impl Chunk {
    fn fresh() -> Chunk {
        CREATED.fetch_add(1, Ordering::Relaxed);
        Chunk {
            objects: Vec::with_capacity(CHUNK_OBJECTS),
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.objects.len() >= CHUNK_OBJECTS
    }
}

static HEAP: Mutex<Vec<Chunk>> = parking_lot::const_mutex(Vec::new());

static REFILLS: AtomicU64 = AtomicU64::new(0);
static CREATED: AtomicU64 = AtomicU64::new(0);
static RECYCLED: AtomicU64 = AtomicU64::new(0);

struct LocalBuffer {
    spare: Vec<Chunk>,
}

impl Drop for LocalBuffer {
    fn drop(&mut self) {
        release(std::mem::take(&mut self.spare));
    }
}

thread_local! {
    static LOCAL: RefCell<LocalBuffer> = const {
        RefCell::new(LocalBuffer { spare: Vec::new() })
    };
}

/// Take an empty chunk from the calling thread's buffer.
pub(crate) fn take_chunk() -> Chunk {
    LOCAL
        .try_with(|local| {
            let mut local = local.borrow_mut();
            if local.spare.is_empty() {
                refill(&mut local.spare);
            }
            local.spare.pop()
        })
        .ok()
        .flatten()
        .unwrap_or_else(Chunk::fresh)
}

fn refill(spare: &mut Vec<Chunk>) {
    REFILLS.fetch_add(1, Ordering::Relaxed);
    {
        let mut heap = HEAP.lock();
        let keep = heap.len().saturating_sub(REFILL_BATCH);
        spare.extend(heap.drain(keep..));
    }
    while spare.len() < REFILL_BATCH {
        spare.push(Chunk::fresh());
    }
    tracing::trace!(chunks = spare.len(), "refilled allocation buffer");
}

/// Return chunks to the process-wide heap. Their contents are dropped.
pub(crate) fn release(chunks: impl IntoIterator<Item = Chunk>) {
    let mut cleared: Vec<Chunk> = chunks
        .into_iter()
        .map(|mut chunk| {
            chunk.objects.clear();
            chunk
        })
        .collect();
    if cleared.is_empty() {
        return;
    }
    let mut heap = HEAP.lock();
    let room = HEAP_RETAIN.saturating_sub(heap.len());
    cleared.truncate(room);
    RECYCLED.fetch_add(cleared.len() as u64, Ordering::Relaxed);
    heap.extend(cleared);
}

/// Process-wide allocator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Batches taken from the shared heap.
    pub refills: u64,
    /// Chunks created from scratch.
    pub chunks_created: u64,
    /// Chunks handed back for reuse.
    pub chunks_recycled: u64,
}

pub fn allocator_stats() -> AllocatorStats {
    AllocatorStats {
        refills: REFILLS.load(Ordering::Relaxed),
        chunks_created: CREATED.load(Ordering::Relaxed),
        chunks_recycled: RECYCLED.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_chunks_come_back_empty() {
        let mut chunk = take_chunk();
        assert!(chunk.objects.is_empty());
        chunk.objects.push(Object::Vacant);
        let before = allocator_stats().chunks_recycled;
        release([chunk]);
        assert!(allocator_stats().chunks_recycled > before);
        let again = take_chunk();
        assert!(again.objects.is_empty());
        assert!(again.objects.capacity() >= CHUNK_OBJECTS);
    }

    #[test]
    fn buffers_are_per_thread() {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(|| {
                    let chunks: Vec<Chunk> = (0..REFILL_BATCH * 2).map(|_| take_chunk()).collect();
                    chunks.len()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), REFILL_BATCH * 2);
        }
        assert!(allocator_stats().refills >= 4);
    }
}
