//! Buffer allocation for connection I/O.

use bytes::BytesMut;

/// Supplies the byte buffers a connection reads into and encodes onto.
pub trait BufferAllocator: Send + Sync {
    /// A buffer with room for at least `capacity` bytes.
    fn allocate(&self, capacity: usize) -> BytesMut;
}

/// Allocates a fresh heap buffer per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn allocate(&self, capacity: usize) -> BytesMut {
        BytesMut::with_capacity(capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_allocator_reserves_capacity() {
        let buf = HeapAllocator.allocate(1024);
        assert!(buf.capacity() >= 1024);
        assert!(buf.is_empty());
    }
}
