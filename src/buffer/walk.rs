//! Span-by-span traversal of a request's source and destination.

use super::{Buffer, Memory, SgEntry, PAGE_SIZE};
use crate::{
    error::{AcompError, AcompResult},
    executor::Executor,
    request::{ReqFlags, Request},
};

/// Iterates a request's buffers as contiguous spans while tracking how much of
/// each side is left.
///
/// Use `next_*` to get the length of the span at the cursor, `read_src` /
/// `write_dst` to touch it, and `done_*` to consume it.
pub struct AcompWalk<'a, E: Executor> {
    exec: &'a E,
    sleep: bool,
    src: Cursor,
    dst: Cursor,
    slen: usize,
    dlen: usize,
}

enum Cursor {
    Linear { memory: Memory, offset: usize },
    Scatter {
        entries: Vec<SgEntry>,
        index: usize,
        offset: usize,
    },
}

impl<'a, E: Executor> AcompWalk<'a, E> {
    /// Start walking `req`. Fails when either side is empty or out of bounds.
    pub fn begin(req: &Request, exec: &'a E) -> AcompResult<Self> {
        let (src, dst, slen, dlen, flags) = req.walk_parts();
        let (slen, dlen) = (slen as usize, dlen as usize);
        if slen == 0 || dlen == 0 {
            return Err(AcompError::InvalidArgument(
                "zero-length source or destination",
            ));
        }
        src.validate(slen)?;
        dst.validate(dlen)?;

        Ok(Self {
            exec,
            sleep: flags.contains(ReqFlags::MAY_SLEEP),
            src: Cursor::new(src),
            dst: Cursor::new(dst),
            slen,
            dlen,
        })
    }

    /// Source bytes not yet consumed.
    pub fn src_len(&self) -> usize {
        self.slen
    }

    /// Destination bytes not yet consumed.
    pub fn dst_len(&self) -> usize {
        self.dlen
    }

    /// Whether the source is walked as one contiguous region.
    pub fn src_is_linear(&self) -> bool {
        matches!(self.src, Cursor::Linear { .. })
    }

    /// Whether the destination is walked as one contiguous region.
    pub fn dst_is_linear(&self) -> bool {
        matches!(self.dst, Cursor::Linear { .. })
    }

    /// Length of the next source span, 0 once the source is exhausted.
    pub fn next_src(&mut self) -> usize {
        let max = self.max_linear_span();
        self.src.next(self.slen, max)
    }

    /// Length of the next destination span, 0 once the destination is exhausted.
    pub fn next_dst(&mut self) -> usize {
        let max = self.max_linear_span();
        self.dst.next(self.dlen, max)
    }

    /// Consume `used` source bytes.
    pub fn done_src(&mut self, used: usize) {
        self.slen -= used.min(self.slen);
        self.src.advance(used);
        if self.sleep {
            self.exec.yield_now();
        }
    }

    /// Consume `used` destination bytes.
    pub fn done_dst(&mut self, used: usize) {
        self.dlen -= used.min(self.dlen);
        self.dst.advance(used);
        if self.sleep {
            self.exec.yield_now();
        }
    }

    /// Run `f` over the first `len` bytes of the current source span.
    pub fn read_src<R>(&self, len: usize, f: impl FnOnce(&[u8]) -> R) -> AcompResult<R> {
        let (memory, offset) = self.src.position()?;
        memory
            .with_range(offset, len, f)
            .ok_or(AcompError::InvalidArgument("source span out of bounds"))
    }

    /// Run `f` over the first `len` bytes of the current destination span.
    pub fn write_dst<R>(&self, len: usize, f: impl FnOnce(&mut [u8]) -> R) -> AcompResult<R> {
        let (memory, offset) = self.dst.position()?;
        memory
            .with_range_mut(offset, len, f)
            .ok_or(AcompError::InvalidArgument("destination span out of bounds"))
    }

    // Without preemption a sleeping caller only gets a page per call so the
    // work between two yields stays bounded.
    fn max_linear_span(&self) -> usize {
        if self.sleep && !self.exec.is_preemptible() {
            PAGE_SIZE
        } else {
            usize::MAX
        }
    }
}

impl Cursor {
    fn new(buffer: Buffer) -> Self {
        match buffer {
            Buffer::Flat { memory, offset } => Cursor::Linear { memory, offset },
            Buffer::Paged { folio, offset } => Cursor::Scatter {
                entries: vec![SgEntry {
                    memory: folio.memory().clone(),
                    offset,
                    len: folio.len().saturating_sub(offset),
                }],
                index: 0,
                offset: 0,
            },
            Buffer::Scatter(sgl) => Cursor::Scatter {
                entries: sgl.entries().to_vec(),
                index: 0,
                offset: 0,
            },
        }
    }

    fn next(&mut self, remaining: usize, max: usize) -> usize {
        match self {
            Cursor::Linear { .. } => remaining.min(max),
            Cursor::Scatter {
                entries,
                index,
                offset,
            } => {
                if remaining == 0 {
                    return 0;
                }
                while let Some(entry) = entries.get(*index) {
                    if *offset < entry.len {
                        return (entry.len - *offset).min(remaining);
                    }
                    *index += 1;
                    *offset = 0;
                }
                0
            }
        }
    }

    fn advance(&mut self, used: usize) {
        match self {
            Cursor::Linear { offset, .. } => *offset += used,
            Cursor::Scatter { offset, .. } => *offset += used,
        }
    }

    fn position(&self) -> AcompResult<(&Memory, usize)> {
        match self {
            Cursor::Linear { memory, offset } => Ok((memory, *offset)),
            Cursor::Scatter {
                entries,
                index,
                offset,
            } => entries
                .get(*index)
                .map(|entry| (&entry.memory, entry.offset + *offset))
                .ok_or(AcompError::InvalidArgument("walk past end of scatter list")),
        }
    }
}
