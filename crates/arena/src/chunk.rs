use std::sync::Arc;

use memtx_core::error::Result;

use crate::allocator::SmallObjectAllocator;

/// An out-of-band buffer allocated alongside a tuple for data that does
/// not live in the tuple's own encoded payload (e.g. an externally
/// stored large field). Never subject to delayed-free: a chunk is never
/// indexed, so no live snapshot iterator can be observing it, and its
/// bytes can be released the moment its owner is done with it.
pub struct TupleChunk {
    allocator: Arc<SmallObjectAllocator>,
    data: Vec<u8>,
}

impl TupleChunk {
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for TupleChunk {
    fn drop(&mut self) {
        self.allocator.free(self.data.len());
    }
}

/// Allocates a chunk holding a copy of `data`, charging its size against
/// `allocator`'s quota. Surfaces `out-of-memory` when the charge fails;
/// unlike tuple allocation this never retries through a reclaim pass,
/// since a chunk is always freed immediately and so never appears on
/// the delayed-free list a reclaim pass would drain.
pub fn tuple_chunk_new(allocator: &Arc<SmallObjectAllocator>, data: &[u8]) -> Result<TupleChunk> {
    allocator.alloc(data.len())?;
    Ok(TupleChunk {
        allocator: allocator.clone(),
        data: data.to_vec(),
    })
}

/// Frees a chunk. Equivalent to dropping it; provided as a named
/// operation to mirror the vtable call the engine exposes externally.
pub fn tuple_chunk_delete(chunk: TupleChunk) {
    drop(chunk);
}
