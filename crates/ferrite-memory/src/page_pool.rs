//! Per-node page pool.
//!
//! Each NUMA node owns one [`PagePool`]: a fixed-size region of uniform
//! pages handed out in chunks through a circular free list. The free list
//! itself lives in the first pages of the region, so the pool needs no
//! side allocations.
//!
//! # Concurrency
//!
//! A single mutex guards the ring head and count. [`PagePool::resolve`] is
//! lock-free: the memory region is stable after construction, so
//! translating an offset to a page address never races with grab/release.

use std::ptr::NonNull;
use std::slice;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use ferrite_common::constants::PAGE_SIZE;
use ferrite_common::error::{FerriteError, FerriteResult};
use ferrite_common::types::{NodeId, PagePoolOffset};

use crate::aligned::AlignedBuffer;
use crate::chunk::PageOffsetChunk;

/// Free-ring cursor, guarded by the pool mutex.
struct RingState {
    /// Index of the first free offset within the ring.
    head: u64,
    /// Number of free offsets currently in the ring.
    count: u64,
}

/// A snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePoolStat {
    /// Free pages currently in the ring.
    pub free_count: u64,
    /// Total pages the ring can hold.
    pub capacity: u64,
}

/// Fixed-capacity pool of aligned pages for one NUMA node.
///
/// The first `reserved_pages` pages of the region store the circular array
/// of free offsets and are never handed out; every offset the pool serves
/// lies in `[reserved_pages, pool_size)`.
///
/// # Example
///
/// ```rust
/// use ferrite_common::constants::PAGE_SIZE;
/// use ferrite_common::types::NodeId;
/// use ferrite_memory::{PagePool, PageOffsetChunk};
///
/// let pool = PagePool::new(NodeId::new(0), 16 * PAGE_SIZE as u64).unwrap();
/// let mut chunk = PageOffsetChunk::new();
/// pool.grab(5, &mut chunk).unwrap();
/// assert_eq!(chunk.size(), 5);
/// pool.release(5, &mut chunk);
/// assert!(chunk.is_empty());
/// ```
pub struct PagePool {
    node: NodeId,
    /// Backing memory; kept alive for the lifetime of the pool.
    _memory: AlignedBuffer,
    /// Total pages in the region, including the reserved prefix.
    pool_size: u64,
    /// Pages at the start of the region that store the free ring.
    reserved_pages: u64,
    /// Ring capacity: `pool_size - reserved_pages`.
    capacity: u64,
    /// The free ring, overlaid on the reserved prefix of the region.
    ring: NonNull<PagePoolOffset>,
    /// Start of the region.
    base: NonNull<u8>,
    state: Mutex<RingState>,
}

// SAFETY: the ring is only mutated under the pool mutex, and page memory
// handed out through resolve() is owned by exactly one holder at a time.
unsafe impl Send for PagePool {}
unsafe impl Sync for PagePool {}

impl PagePool {
    /// Creates a pool over `size_bytes` of node-local memory.
    ///
    /// `size_bytes` must be a positive multiple of the page size and large
    /// enough that at least one page remains after the free ring claims
    /// its prefix. Engine-level minimums are enforced by configuration
    /// validation, not here, so tests can construct tiny pools.
    pub fn new(node: NodeId, size_bytes: u64) -> FerriteResult<Self> {
        if size_bytes == 0 || size_bytes % PAGE_SIZE as u64 != 0 {
            return Err(FerriteError::invalid_config(format!(
                "page pool size {} is not a positive multiple of the page size",
                size_bytes
            )));
        }

        info!(node = %node, size_bytes, "acquiring memory for page pool");
        let mut memory = AlignedBuffer::on_node(size_bytes as usize, node);

        let pool_size = size_bytes / PAGE_SIZE as u64;
        let pointers_total_size = pool_size * std::mem::size_of::<PagePoolOffset>() as u64;
        let reserved_pages = pointers_total_size.div_ceil(PAGE_SIZE as u64);
        if reserved_pages >= pool_size {
            return Err(FerriteError::invalid_config(format!(
                "page pool of {} pages cannot even hold its own free ring",
                pool_size
            )));
        }
        let capacity = pool_size - reserved_pages;

        // All pages after the reserved prefix start out free.
        let base = NonNull::new(memory.as_mut_ptr()).expect("pool memory is non-null");
        let ring = base.cast::<PagePoolOffset>();
        for i in 0..capacity {
            // SAFETY: slot i lies within the reserved prefix; the region was
            // just allocated and nothing else references it yet.
            unsafe {
                ring.as_ptr()
                    .add(i as usize)
                    .write((reserved_pages + i) as PagePoolOffset);
            }
        }

        info!(
            node = %node,
            pages = pool_size,
            reserved = reserved_pages,
            capacity,
            "constructed circular free pool"
        );

        Ok(Self {
            node,
            _memory: memory,
            pool_size,
            reserved_pages,
            capacity,
            ring,
            base,
            state: Mutex::new(RingState {
                head: 0,
                count: capacity,
            }),
        })
    }

    /// Returns the node this pool belongs to.
    #[inline]
    #[must_use]
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// Ring capacity: the number of pages this pool can hand out.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Pages reserved at the start of the region for the ring itself.
    #[inline]
    #[must_use]
    pub const fn reserved_pages(&self) -> u64 {
        self.reserved_pages
    }

    /// Returns current occupancy.
    #[must_use]
    pub fn stat(&self) -> PagePoolStat {
        let state = self.state.lock();
        PagePoolStat {
            free_count: state.count,
            capacity: self.capacity,
        }
    }

    /// Moves up to `desired` free offsets from the head of the ring into
    /// `chunk`.
    ///
    /// Returns exactly `min(desired, free_count)` offsets on success. When
    /// the ring is empty, returns [`FerriteError::MemoryNoFreePages`] and
    /// leaves `chunk` unchanged.
    ///
    /// # Panics
    ///
    /// Panics if `chunk` cannot hold `desired` more offsets; the caller is
    /// responsible for staying within the chunk capacity.
    pub fn grab(&self, desired: u64, chunk: &mut PageOffsetChunk) -> FerriteResult<()> {
        assert!(
            chunk.size() + desired as usize <= chunk.capacity(),
            "grab would overflow the chunk"
        );
        let mut state = self.state.lock();
        debug!(node = %self.node, desired, free = state.count, "grabbing pages");
        if state.count == 0 {
            warn!(node = %self.node, "no more free pages left in the pool");
            return Err(FerriteError::MemoryNoFreePages);
        }

        // Grab from the head; at most two segment copies when the range
        // wraps around the ring boundary.
        let mut remaining = desired.min(state.count);
        while remaining > 0 {
            let segment = remaining.min(self.capacity - state.head);
            // SAFETY: ring slots [head, head + segment) lie within the
            // reserved prefix and are only accessed under the pool mutex.
            let src = unsafe {
                slice::from_raw_parts(
                    self.ring.as_ptr().add(state.head as usize),
                    segment as usize,
                )
            };
            chunk.push_slice(src);
            state.head = (state.head + segment) % self.capacity;
            state.count -= segment;
            remaining -= segment;
        }
        Ok(())
    }

    /// Moves `min(desired, chunk.size())` offsets from `chunk` to the tail
    /// of the ring.
    ///
    /// Aborts the process if the release would overflow the ring: that
    /// means a page was released twice and the pool is inconsistent, a
    /// state from which no recovery is attempted.
    pub fn release(&self, desired: u64, chunk: &mut PageOffsetChunk) {
        let release = desired.min(chunk.size() as u64);
        let mut state = self.state.lock();
        debug!(node = %self.node, release, free = state.count, "releasing pages");
        if state.count + release > self.capacity {
            // A duplicate page release corrupts ownership tracking for the
            // whole region; continuing would hand the same page to two
            // holders.
            error!(
                node = %self.node,
                count = state.count,
                release,
                capacity = self.capacity,
                "more than full free-pool; page pool is inconsistent"
            );
            std::process::abort();
        }

        // Append at the tail; at most two segment copies on wrap-around.
        let mut remaining = release;
        while remaining > 0 {
            let tail = (state.head + state.count) % self.capacity;
            let segment = remaining.min(self.capacity - tail);
            // SAFETY: ring slots [tail, tail + segment) lie within the
            // reserved prefix and are only accessed under the pool mutex.
            let dest = unsafe {
                slice::from_raw_parts_mut(self.ring.as_ptr().add(tail as usize), segment as usize)
            };
            chunk.move_to(dest);
            state.count += segment;
            remaining -= segment;
        }
    }

    /// Translates a page offset to the page's address. Lock-free.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is outside `[reserved_pages, pool_size)`.
    #[inline]
    #[must_use]
    pub fn resolve(&self, offset: PagePoolOffset) -> NonNull<u8> {
        assert!(
            (offset as u64) >= self.reserved_pages && (offset as u64) < self.pool_size,
            "page offset {} out of pool range",
            offset
        );
        // SAFETY: the offset is within the region (checked above).
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset as usize * PAGE_SIZE)) }
    }

    /// Returns the page at `offset` as a mutable byte slice.
    ///
    /// # Safety
    ///
    /// The caller must be the sole holder of the page: it must have been
    /// grabbed from this pool and not released, and no other reference to
    /// its bytes may exist for the lifetime of the returned slice.
    #[must_use]
    pub unsafe fn page_mut(&self, offset: PagePoolOffset) -> &mut [u8] {
        slice::from_raw_parts_mut(self.resolve(offset).as_ptr(), PAGE_SIZE)
    }

    /// Returns the page at `offset` as a byte slice.
    ///
    /// # Safety
    ///
    /// The caller must hold the page and guarantee no concurrent writer
    /// exists for the lifetime of the returned slice.
    #[must_use]
    pub unsafe fn page(&self, offset: PagePoolOffset) -> &[u8] {
        slice::from_raw_parts(self.resolve(offset).as_ptr(), PAGE_SIZE)
    }
}

impl Drop for PagePool {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.count != self.capacity {
            // Not a leak as the whole region is released either way, but a
            // missing page at teardown is a smell of an ownership bug.
            warn!(
                node = %self.node,
                count = state.count,
                capacity = self.capacity,
                "page pool has not received back all free pages at teardown"
            );
        } else {
            info!(node = %self.node, "page pool received back all free pages");
        }
    }
}

impl std::fmt::Debug for PagePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stat = self.stat();
        f.debug_struct("PagePool")
            .field("node", &self.node)
            .field("pool_size", &self.pool_size)
            .field("reserved_pages", &self.reserved_pages)
            .field("free_count", &stat.free_count)
            .field("capacity", &stat.capacity)
            .finish()
    }
}
