//! Buffer descriptors a request can point at.
//!
//! A request describes its input and output as flat memory, page-granular
//! memory (a folio) or a scatter list. Backends that only understand scatter
//! lists receive a projection built by [`Buffer::to_scatterlist`]; the
//! descriptor itself is never rewritten.

mod walk;

use std::{fmt, sync::Arc};

use parking_lot::Mutex;

pub use walk::AcompWalk;

use crate::error::{AcompError, AcompResult};

/// Size of one memory page.
pub const PAGE_SIZE: usize = 4096;

/// Shared, lock-protected byte region.
///
/// Clones refer to the same bytes, so a caller can keep a handle to a
/// destination while a backend writes into it.
#[derive(Clone, Default)]
pub struct Memory {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl Memory {
    /// Zero-filled region of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self::from(vec![0u8; len])
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    /// Whether the region holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the whole region.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Copy of `len` bytes starting at `offset`, or `None` when out of bounds.
    pub fn read(&self, offset: usize, len: usize) -> Option<Vec<u8>> {
        self.with_range(offset, len, |bytes| bytes.to_vec())
    }

    /// Whether both handles refer to the same region.
    pub fn same(&self, other: &Memory) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }

    pub(crate) fn with_range<R>(
        &self,
        offset: usize,
        len: usize,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Option<R> {
        let guard = self.bytes.lock();
        let end = offset.checked_add(len)?;
        guard.get(offset..end).map(f)
    }

    pub(crate) fn with_range_mut<R>(
        &self,
        offset: usize,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Option<R> {
        let mut guard = self.bytes.lock();
        let end = offset.checked_add(len)?;
        guard.get_mut(offset..end).map(f)
    }
}

impl From<Vec<u8>> for Memory {
    fn from(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(bytes)),
        }
    }
}

impl From<&[u8]> for Memory {
    fn from(bytes: &[u8]) -> Self {
        Self::from(bytes.to_vec())
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory").field("len", &self.len()).finish()
    }
}

/// Physically contiguous run of `PAGE_SIZE << order` bytes.
#[derive(Clone, Debug)]
pub struct Folio {
    memory: Memory,
    order: u32,
}

impl Folio {
    /// Zero-filled folio of `1 << order` pages.
    pub fn alloc(order: u32) -> Self {
        Self {
            memory: Memory::zeroed(PAGE_SIZE << order),
            order,
        }
    }

    /// Smallest folio holding `data`, with `data` copied to its start.
    pub fn from_bytes(data: &[u8]) -> Self {
        let pages = data.len().div_ceil(PAGE_SIZE).max(1);
        let order = pages.next_power_of_two().trailing_zeros();
        let folio = Self::alloc(order);
        folio
            .memory
            .with_range_mut(0, data.len(), |bytes| bytes.copy_from_slice(data));
        folio
    }

    /// Page order the folio was allocated with.
    pub fn order(&self) -> u32 {
        self.order
    }

    /// Number of pages.
    pub fn pages(&self) -> usize {
        1 << self.order
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        PAGE_SIZE << self.order
    }

    /// Whether the folio holds no bytes.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Backing memory.
    pub fn memory(&self) -> &Memory {
        &self.memory
    }
}

/// One entry of a scatter list.
#[derive(Clone, Debug)]
pub struct SgEntry {
    /// Backing memory.
    pub memory: Memory,
    /// Start of the run within `memory`.
    pub offset: usize,
    /// Length of the run.
    pub len: usize,
}

/// Ordered list of contiguous runs forming one logical buffer.
#[derive(Clone, Debug, Default)]
pub struct ScatterList {
    entries: Vec<SgEntry>,
}

impl ScatterList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-entry list covering `len` bytes of `memory` from `offset`.
    pub fn one(memory: Memory, offset: usize, len: usize) -> Self {
        let mut sgl = Self::new();
        sgl.push(memory, offset, len);
        sgl
    }

    /// Append an entry.
    pub fn push(&mut self, memory: Memory, offset: usize, len: usize) -> &mut Self {
        self.entries.push(SgEntry {
            memory,
            offset,
            len,
        });
        self
    }

    /// Entries in order.
    pub fn entries(&self) -> &[SgEntry] {
        &self.entries
    }

    /// Sum of all entry lengths.
    pub fn total_len(&self) -> usize {
        self.entries.iter().map(|e| e.len).sum()
    }
}

/// Where a request's source or destination lives.
#[derive(Clone, Debug)]
pub enum Buffer {
    /// Contiguous memory addressed directly.
    Flat {
        /// Backing region.
        memory: Memory,
        /// Byte offset of the first addressed byte.
        offset: usize,
    },
    /// Memory addressed through a folio and a byte offset into it.
    Paged {
        /// Backing pages.
        folio: Folio,
        /// Byte offset from the start of the folio's first page.
        offset: usize,
    },
    /// Scatter list.
    Scatter(ScatterList),
}

impl Default for Buffer {
    fn default() -> Self {
        Buffer::Scatter(ScatterList::new())
    }
}

impl Buffer {
    /// Whether this is a flat buffer.
    pub fn is_flat(&self) -> bool {
        matches!(self, Buffer::Flat { .. })
    }

    /// Whether this is a paged buffer.
    pub fn is_paged(&self) -> bool {
        matches!(self, Buffer::Paged { .. })
    }

    /// Whether this is a scatter list.
    pub fn is_sg(&self) -> bool {
        matches!(self, Buffer::Scatter(_))
    }

    /// Scatter-list view of the first `len` bytes. Pure: `self` is untouched.
    pub fn to_scatterlist(&self, len: usize) -> ScatterList {
        match self {
            Buffer::Flat { memory, offset } => ScatterList::one(memory.clone(), *offset, len),
            Buffer::Paged { folio, offset } => {
                ScatterList::one(folio.memory().clone(), *offset, len)
            }
            Buffer::Scatter(sgl) => sgl.clone(),
        }
    }

    /// Copy out the first `len` bytes described by this buffer.
    pub fn to_vec(&self, len: usize) -> AcompResult<Vec<u8>> {
        self.validate(len)?;
        let mut out = Vec::with_capacity(len);
        for entry in self.to_scatterlist(len).entries() {
            let take = entry.len.min(len - out.len());
            if take == 0 {
                break;
            }
            entry
                .memory
                .with_range(entry.offset, take, |bytes| out.extend_from_slice(bytes))
                .ok_or(AcompError::InvalidArgument("buffer range out of bounds"))?;
        }
        Ok(out)
    }

    /// Check that `len` bytes are addressable through this descriptor.
    pub(crate) fn validate(&self, len: usize) -> AcompResult<()> {
        let in_bounds = |memory: &Memory, offset: usize, len: usize| {
            offset
                .checked_add(len)
                .is_some_and(|end| end <= memory.len())
        };
        let ok = match self {
            Buffer::Flat { memory, offset } => in_bounds(memory, *offset, len),
            Buffer::Paged { folio, offset } => in_bounds(folio.memory(), *offset, len),
            Buffer::Scatter(sgl) => {
                sgl.total_len() >= len
                    && sgl
                        .entries()
                        .iter()
                        .all(|e| in_bounds(&e.memory, e.offset, e.len))
            }
        };
        if ok {
            Ok(())
        } else {
            Err(AcompError::InvalidArgument("buffer range out of bounds"))
        }
    }
}
