//! Zstandard software backend.

use zstd::{
    bulk::{Compressor, Decompressor},
    zstd_safe,
};

use crate::{
    error::{AcompError, AcompResult},
    transform::ScompAlgorithm,
};

/// Zstandard through per-stream `zstd::bulk` contexts.
#[derive(Debug, Clone, Copy)]
pub struct ZstdScomp {
    level: i32,
}

impl ZstdScomp {
    /// Level range: 1-22.
    pub fn new(level: i32) -> AcompResult<Self> {
        if !(1..=22).contains(&level) {
            return Err(AcompError::InvalidArgument("zstd level out of range"));
        }
        Ok(Self { level })
    }

    /// Compression level.
    pub fn level(&self) -> i32 {
        self.level
    }
}

impl Default for ZstdScomp {
    fn default() -> Self {
        Self { level: 3 }
    }
}

/// Compression and decompression contexts owned by one stream.
pub struct ZstdContext {
    compressor: Compressor<'static>,
    decompressor: Decompressor<'static>,
}

impl ScompAlgorithm for ZstdScomp {
    type Context = ZstdContext;

    fn name(&self) -> &str {
        "zstd"
    }

    fn alloc_ctx(&self) -> AcompResult<ZstdContext> {
        let compressor = Compressor::new(self.level)
            .map_err(|_| AcompError::OutOfMemory("zstd compression context"))?;
        let decompressor = Decompressor::new()
            .map_err(|_| AcompError::OutOfMemory("zstd decompression context"))?;
        Ok(ZstdContext {
            compressor,
            decompressor,
        })
    }

    fn compress(&self, ctx: &mut ZstdContext, src: &[u8], dst: &mut [u8]) -> AcompResult<usize> {
        ctx.compressor.compress_to_buffer(src, dst).map_err(|err| {
            let bound = zstd_safe::compress_bound(src.len());
            if dst.len() < bound {
                AcompError::NoSpace {
                    needed: bound,
                    available: dst.len(),
                }
            } else {
                AcompError::Backend(err.to_string())
            }
        })
    }

    fn decompress(&self, ctx: &mut ZstdContext, src: &[u8], dst: &mut [u8]) -> AcompResult<usize> {
        let available = dst.len();
        ctx.decompressor
            .decompress_to_buffer(src, dst)
            .map_err(|err| match zstd_safe::get_frame_content_size(src) {
                // A well-formed frame that declares more content than fits.
                Ok(Some(size)) if size > available as u64 => AcompError::NoSpace {
                    needed: usize::try_from(size).unwrap_or(usize::MAX),
                    available,
                },
                _ => AcompError::Corrupt(err.to_string()),
            })
    }
}
