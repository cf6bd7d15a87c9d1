//! Adapter presenting a synchronous slice-to-slice compressor as an
//! [`AcompAlgorithm`].
//!
//! The source is gathered into a per-unit scratch buffer, compressed into a
//! second scratch buffer and scattered out to the destination. Scratch space
//! comes from a [`StreamPool`], one stream per execution unit.

use std::sync::Arc;

use super::{AcompAlgorithm, Op, Transform, TransformBuilder};
use crate::{
    buffer::AcompWalk,
    error::{AcompError, AcompResult},
    executor::Executor,
    metrics::StreamMetricsSnapshot,
    observability::log_trace,
    option::StreamOptions,
    request::{Request, Status},
    stream::{StreamAllocator, StreamPool},
};

/// A synchronous compressor working on contiguous slices.
pub trait ScompAlgorithm: Send + Sync + 'static {
    /// Per-stream state, such as a compressor context.
    type Context: Send + 'static;

    /// Algorithm name.
    fn name(&self) -> &str;

    /// Allocate the state for one stream.
    fn alloc_ctx(&self) -> AcompResult<Self::Context>;

    /// Compress `src` into `dst`, returning the number of bytes written.
    fn compress(&self, ctx: &mut Self::Context, src: &[u8], dst: &mut [u8])
        -> AcompResult<usize>;

    /// Decompress `src` into `dst`, returning the number of bytes written.
    fn decompress(
        &self,
        ctx: &mut Self::Context,
        src: &[u8],
        dst: &mut [u8],
    ) -> AcompResult<usize>;

    /// Per-request context the algorithm needs, in bytes.
    fn reqsize(&self) -> usize {
        0
    }
}

/// Scratch stream: the algorithm's context plus one buffer per direction.
pub struct ScompStream<C> {
    ctx: C,
    src: Vec<u8>,
    dst: Vec<u8>,
}

/// Allocates [`ScompStream`]s for a [`StreamPool`].
pub struct ScompStreams<S> {
    alg: Arc<S>,
    scratch_size: usize,
}

impl<S: ScompAlgorithm> StreamAllocator for ScompStreams<S> {
    type Context = ScompStream<S::Context>;

    fn alloc_ctx(&self) -> AcompResult<Self::Context> {
        Ok(ScompStream {
            ctx: self.alg.alloc_ctx()?,
            src: scratch(self.scratch_size)?,
            dst: scratch(self.scratch_size)?,
        })
    }
}

fn scratch(len: usize) -> AcompResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| AcompError::OutOfMemory("scratch buffer"))?;
    buf.resize(len, 0);
    Ok(buf)
}

/// [`AcompAlgorithm`] over a [`ScompAlgorithm`].
pub struct ScompAdapter<S: ScompAlgorithm, E: Executor> {
    alg: Arc<S>,
    pool: StreamPool<ScompStreams<S>, E>,
    scratch_size: usize,
}

impl<S: ScompAlgorithm, E: Executor> ScompAdapter<S, E> {
    /// The stream pool is allocated by `init`, when a transform is built.
    pub fn new(alg: S, exec: Arc<E>, options: StreamOptions) -> Self {
        let alg = Arc::new(alg);
        let scratch_size = options.scratch_size;
        let pool = StreamPool::new(
            ScompStreams {
                alg: Arc::clone(&alg),
                scratch_size,
            },
            exec,
            &options,
        );
        Self {
            alg,
            pool,
            scratch_size,
        }
    }

    /// Per-unit scratch streams.
    pub fn streams(&self) -> &StreamPool<ScompStreams<S>, E> {
        &self.pool
    }

    /// Counter snapshot of the stream pool.
    pub fn stream_metrics(&self) -> StreamMetricsSnapshot {
        self.pool.metrics()
    }

    fn run(&self, op: Op, req: &Request) -> AcompResult<()> {
        let exec = self.pool.executor();
        let mut walk = AcompWalk::begin(req, &**exec)?;
        let slen = walk.src_len();
        if slen > self.scratch_size {
            return Err(AcompError::InvalidArgument("source larger than scratch buffer"));
        }
        let dlen = walk.dst_len().min(self.scratch_size);

        let mut guard = self.pool.lock_current()?;
        let stream: &mut ScompStream<S::Context> = &mut guard;

        let mut filled = 0;
        while filled < slen {
            let n = walk.next_src();
            if n == 0 {
                break;
            }
            let at = filled;
            walk.read_src(n, |bytes| stream.src[at..at + n].copy_from_slice(bytes))?;
            filled += n;
            walk.done_src(n);
        }

        let src = &stream.src[..filled];
        let dst = &mut stream.dst[..dlen];
        let produced = match op {
            Op::Compress => self.alg.compress(&mut stream.ctx, src, dst)?,
            Op::Decompress => self.alg.decompress(&mut stream.ctx, src, dst)?,
        };

        let mut written = 0;
        while written < produced {
            let n = walk.next_dst().min(produced - written);
            if n == 0 {
                return Err(AcompError::NoSpace {
                    needed: produced,
                    available: written,
                });
            }
            let at = written;
            walk.write_dst(n, |bytes| bytes.copy_from_slice(&stream.dst[at..at + n]))?;
            written += n;
            walk.done_dst(n);
        }
        let unit = guard.unit();
        drop(guard);

        req.set_dlen(produced as u32);
        log_trace!(
            component = "transform",
            event = "scomp_done",
            alg = self.alg.name(),
            op = op.name(),
            slen = slen,
            dlen = produced,
            unit = unit,
        );
        Ok(())
    }
}

impl<S: ScompAlgorithm, E: Executor> AcompAlgorithm for ScompAdapter<S, E> {
    fn name(&self) -> &str {
        self.alg.name()
    }

    fn compress(&self, req: &Request) -> Status {
        Status::from(self.run(Op::Compress, req))
    }

    fn decompress(&self, req: &Request) -> Status {
        Status::from(self.run(Op::Decompress, req))
    }

    fn reqsize(&self) -> usize {
        self.alg.reqsize()
    }

    fn init(&self) -> AcompResult<()> {
        self.pool.alloc()
    }

    fn exit(&self) {
        self.pool.free();
    }
}

impl Transform {
    /// Transform over a synchronous compressor, with scratch streams spread
    /// over `exec`'s execution units.
    pub fn from_sync<S, E>(alg: S, exec: Arc<E>, options: StreamOptions) -> AcompResult<Self>
    where
        S: ScompAlgorithm,
        E: Executor,
    {
        TransformBuilder::new(Arc::new(ScompAdapter::new(alg, exec, options))).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::{Folio, Memory, ScatterList},
        executor::ManualExecutor,
        request::ReqFlags,
    };

    /// Reverses its input; decompressing reverses it back.
    struct Reverse;

    impl ScompAlgorithm for Reverse {
        type Context = ();

        fn name(&self) -> &str {
            "reverse"
        }

        fn alloc_ctx(&self) -> AcompResult<()> {
            Ok(())
        }

        fn compress(&self, _ctx: &mut (), src: &[u8], dst: &mut [u8]) -> AcompResult<usize> {
            if dst.len() < src.len() {
                return Err(AcompError::NoSpace {
                    needed: src.len(),
                    available: dst.len(),
                });
            }
            for (out, byte) in dst.iter_mut().zip(src.iter().rev()) {
                *out = *byte;
            }
            Ok(src.len())
        }

        fn decompress(&self, ctx: &mut (), src: &[u8], dst: &mut [u8]) -> AcompResult<usize> {
            self.compress(ctx, src, dst)
        }
    }

    fn adapter(scratch: usize) -> ScompAdapter<Reverse, ManualExecutor> {
        let adapter = ScompAdapter::new(
            Reverse,
            Arc::new(ManualExecutor::new(2)),
            StreamOptions::default().units(2).scratch_size(scratch),
        );
        adapter.init().unwrap();
        adapter
    }

    #[test]
    fn flat_to_paged() {
        let adapter = adapter(64);
        let folio = Folio::alloc(0);
        let req = Request::new();
        req.set_src_flat(Memory::from(vec![1u8, 2, 3]), 3);
        req.set_dst_folio(folio.clone(), 10, 16);

        assert_eq!(adapter.compress(&req), Status::Success);
        assert_eq!(req.dlen(), 3);
        assert_eq!(folio.memory().read(10, 3).unwrap(), vec![3, 2, 1]);
    }

    #[test]
    fn scatter_destination_spans_entries() {
        let adapter = adapter(64);
        let first = Memory::zeroed(2);
        let second = Memory::zeroed(8);
        let mut dst = ScatterList::new();
        dst.push(first.clone(), 0, 2).push(second.clone(), 0, 8);
        let req = Request::new();
        req.set_src_flat(Memory::from(vec![1u8, 2, 3, 4, 5]), 5);
        req.set_dst_sg(dst, 10);
        req.set_flags(ReqFlags::MAY_SLEEP);

        assert_eq!(adapter.compress(&req), Status::Success);
        assert_eq!(first.to_vec(), vec![5, 4]);
        assert_eq!(second.read(0, 3).unwrap(), vec![3, 2, 1]);
    }

    #[test]
    fn oversized_source_is_rejected() {
        let adapter = adapter(4);
        let req = Request::new();
        req.set_src_flat(Memory::zeroed(5), 5);
        req.set_dst_flat(Memory::zeroed(8), 8);
        assert_eq!(
            adapter.compress(&req),
            Status::Failed(AcompError::InvalidArgument(
                "source larger than scratch buffer"
            ))
        );
    }

    #[test]
    fn output_is_capped_at_scratch_size() {
        let adapter = adapter(4);
        let req = Request::new();
        req.set_src_flat(Memory::zeroed(4), 4);
        req.set_dst_flat(Memory::zeroed(64), 64);
        assert_eq!(adapter.compress(&req), Status::Success);

        let small = Request::new();
        small.set_src_flat(Memory::zeroed(4), 4);
        small.set_dst_flat(Memory::zeroed(2), 2);
        assert!(matches!(
            adapter.compress(&small),
            Status::Failed(AcompError::NoSpace { .. })
        ));
    }

    #[test]
    fn uninitialised_adapter_fails_cleanly() {
        let adapter = ScompAdapter::new(
            Reverse,
            Arc::new(ManualExecutor::new(1)),
            StreamOptions::default().units(1),
        );
        let req = Request::new();
        req.set_src_flat(Memory::zeroed(4), 4);
        req.set_dst_flat(Memory::zeroed(4), 4);
        assert_eq!(
            adapter.compress(&req),
            Status::Failed(AcompError::InvalidArgument("stream pool is not allocated"))
        );
    }
}
