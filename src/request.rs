//! Job descriptor: buffers, lengths, flags and the completion continuation of
//! one compress or decompress request.

use std::{
    collections::VecDeque,
    fmt,
    ops::{BitAnd, BitOr, BitOrAssign, Not},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::{
    buffer::{Buffer, Folio, Memory, ScatterList},
    error::{AcompError, AcompResult},
};

/// Continuation invoked with a request's status.
pub type Completion = Arc<dyn Fn(Status) + Send + Sync>;

/// Outcome of submitting a request, or of a backend finishing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// The job finished and its destination length is final.
    Success,
    /// Accepted; the completion will be invoked later.
    InProgress,
    /// Queued behind a full backend; the completion will be invoked later.
    Busy,
    /// The job finished with an error.
    Failed(AcompError),
}

impl Status {
    /// `Success` or `Failed`: nothing more will happen for this job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Success | Status::Failed(_))
    }

    /// Whether this is `Success`.
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }

    /// Error view of a terminal status. Pending statuses map to `Ok`.
    pub fn into_result(self) -> AcompResult<()> {
        match self {
            Status::Failed(err) => Err(err),
            _ => Ok(()),
        }
    }
}

impl From<AcompResult<()>> for Status {
    fn from(result: AcompResult<()>) -> Self {
        match result {
            Ok(()) => Status::Success,
            Err(err) => Status::Failed(err),
        }
    }
}

/// Request flag bits.
///
/// `MAY_SLEEP` and `MAY_BACKLOG` describe how the request may be executed;
/// the NONDMA bits describe its buffers. The FLAT and PAGED bits are never
/// stored: [`Request::flags`] derives them from the buffer descriptors.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ReqFlags(u32);

impl ReqFlags {
    /// The caller may sleep; long walks yield.
    pub const MAY_SLEEP: ReqFlags = ReqFlags(1 << 0);
    /// The backend may queue the job behind a full device.
    pub const MAY_BACKLOG: ReqFlags = ReqFlags(1 << 1);
    /// The source is memory a device cannot reach.
    pub const SRC_NONDMA: ReqFlags = ReqFlags(1 << 2);
    /// The destination is memory a device cannot reach.
    pub const DST_NONDMA: ReqFlags = ReqFlags(1 << 3);
    /// The source is a flat buffer.
    pub const SRC_FLAT: ReqFlags = ReqFlags(1 << 4);
    /// The destination is a flat buffer.
    pub const DST_FLAT: ReqFlags = ReqFlags(1 << 5);
    /// The source is a folio.
    pub const SRC_PAGED: ReqFlags = ReqFlags(1 << 6);
    /// The destination is a folio.
    pub const DST_PAGED: ReqFlags = ReqFlags(1 << 7);

    /// Execution-behaviour bits, the only ones a reset mask can clear.
    pub const BEHAVIOUR: ReqFlags = ReqFlags(Self::MAY_SLEEP.0 | Self::MAY_BACKLOG.0);
    /// Either end is device-unreachable.
    pub const NONDMA: ReqFlags = ReqFlags(Self::SRC_NONDMA.0 | Self::DST_NONDMA.0);
    /// Every flag.
    pub const ALL: ReqFlags = ReqFlags(u32::MAX);

    /// No flags.
    pub const fn empty() -> Self {
        ReqFlags(0)
    }

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every flag in `other` is set.
    pub const fn contains(self, other: ReqFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any flag in `other` is set.
    pub const fn intersects(self, other: ReqFlags) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for ReqFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        ReqFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ReqFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ReqFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        ReqFlags(self.0 & rhs.0)
    }
}

impl Not for ReqFlags {
    type Output = Self;

    fn not(self) -> Self {
        ReqFlags(!self.0)
    }
}

impl fmt::Debug for ReqFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(ReqFlags, &str); 8] = [
            (ReqFlags::MAY_SLEEP, "MAY_SLEEP"),
            (ReqFlags::MAY_BACKLOG, "MAY_BACKLOG"),
            (ReqFlags::SRC_NONDMA, "SRC_NONDMA"),
            (ReqFlags::DST_NONDMA, "DST_NONDMA"),
            (ReqFlags::SRC_FLAT, "SRC_FLAT"),
            (ReqFlags::DST_FLAT, "DST_FLAT"),
            (ReqFlags::SRC_PAGED, "SRC_PAGED"),
            (ReqFlags::DST_PAGED, "DST_PAGED"),
        ];
        let mut set = f.debug_set();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

struct RequestData {
    src: Buffer,
    dst: Buffer,
    slen: u32,
    dlen: u32,
    flags: ReqFlags,
    completion: Option<Completion>,
    chain: VecDeque<Request>,
    status: Option<Status>,
}

/// Handle to one compress or decompress job.
///
/// Clones refer to the same job, so a backend can keep one while the job is in
/// flight and the caller can inspect `status()` and `dlen()` once the
/// completion has fired.
#[derive(Clone)]
pub struct Request {
    inner: Arc<Mutex<RequestData>>,
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

impl Request {
    /// Empty request with no buffers, completion or chain.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RequestData {
                src: Buffer::default(),
                dst: Buffer::default(),
                slen: 0,
                dlen: 0,
                flags: ReqFlags::empty(),
                completion: None,
                chain: VecDeque::new(),
                status: None,
            })),
        }
    }

    /// Source is `slen` bytes of contiguous memory.
    pub fn set_src_flat(&self, memory: Memory, slen: u32) {
        self.set_src(Buffer::Flat { memory, offset: 0 }, slen, false);
    }

    /// Source is `slen` bytes of `folio` starting at `offset`.
    pub fn set_src_folio(&self, folio: Folio, offset: usize, slen: u32) {
        self.set_src(Buffer::Paged { folio, offset }, slen, false);
    }

    /// Source is a scatter list of `slen` bytes.
    pub fn set_src_sg(&self, sgl: ScatterList, slen: u32) {
        self.set_src(Buffer::Scatter(sgl), slen, false);
    }

    /// Source is contiguous memory a device cannot reach.
    pub fn set_src_nondma(&self, memory: Memory, slen: u32) {
        self.set_src(Buffer::Flat { memory, offset: 0 }, slen, true);
    }

    /// Destination of `dlen` bytes of contiguous memory.
    pub fn set_dst_flat(&self, memory: Memory, dlen: u32) {
        self.set_dst(Buffer::Flat { memory, offset: 0 }, dlen, false);
    }

    /// Destination is `dlen` bytes of `folio` starting at `offset`.
    pub fn set_dst_folio(&self, folio: Folio, offset: usize, dlen: u32) {
        self.set_dst(Buffer::Paged { folio, offset }, dlen, false);
    }

    /// Destination is a scatter list with room for `dlen` bytes.
    pub fn set_dst_sg(&self, sgl: ScatterList, dlen: u32) {
        self.set_dst(Buffer::Scatter(sgl), dlen, false);
    }

    /// Destination is contiguous memory a device cannot reach.
    pub fn set_dst_nondma(&self, memory: Memory, dlen: u32) {
        self.set_dst(Buffer::Flat { memory, offset: 0 }, dlen, true);
    }

    /// Bind the completion and the behaviour flags. Buffer attributes already
    /// set on the request are kept.
    pub fn set_callback<F>(&self, flags: ReqFlags, completion: F)
    where
        F: Fn(Status) + Send + Sync + 'static,
    {
        let mut data = self.inner.lock();
        data.flags = (data.flags & ReqFlags::NONDMA) | (flags & ReqFlags::BEHAVIOUR);
        data.completion = Some(Arc::new(completion));
    }

    /// Replace the behaviour flags without touching the completion.
    pub fn set_flags(&self, flags: ReqFlags) {
        let mut data = self.inner.lock();
        data.flags = (data.flags & ReqFlags::NONDMA) | (flags & ReqFlags::BEHAVIOUR);
    }

    /// Queue `next` to run after this request and anything already chained to
    /// it.
    pub fn chain(&self, next: &Request) {
        self.inner.lock().chain.push_back(next.clone());
    }

    /// Requests chained to this one, in execution order.
    pub fn chained(&self) -> Vec<Request> {
        self.inner.lock().chain.iter().cloned().collect()
    }

    /// Whether follow-on jobs are chained to this request.
    pub fn is_chained(&self) -> bool {
        !self.inner.lock().chain.is_empty()
    }

    /// Source descriptor.
    pub fn src(&self) -> Buffer {
        self.inner.lock().src.clone()
    }

    /// Destination descriptor.
    pub fn dst(&self) -> Buffer {
        self.inner.lock().dst.clone()
    }

    /// Source length.
    pub fn slen(&self) -> u32 {
        self.inner.lock().slen
    }

    /// Destination capacity before the job runs, produced length after.
    pub fn dlen(&self) -> u32 {
        self.inner.lock().dlen
    }

    /// Record the number of bytes produced. Called by backends.
    pub fn set_dlen(&self, dlen: u32) {
        self.inner.lock().dlen = dlen;
    }

    /// Stored flags plus the FLAT/PAGED bits derived from the descriptors.
    pub fn flags(&self) -> ReqFlags {
        let data = self.inner.lock();
        let mut flags = data.flags;
        match data.src {
            Buffer::Flat { .. } => flags |= ReqFlags::SRC_FLAT,
            Buffer::Paged { .. } => flags |= ReqFlags::SRC_PAGED,
            Buffer::Scatter(_) => {}
        }
        match data.dst {
            Buffer::Flat { .. } => flags |= ReqFlags::DST_FLAT,
            Buffer::Paged { .. } => flags |= ReqFlags::DST_PAGED,
            Buffer::Scatter(_) => {}
        }
        flags
    }

    /// Terminal status of the last run, `None` before it finished.
    pub fn status(&self) -> Option<Status> {
        self.inner.lock().status.clone()
    }

    /// Both ends are already scatter lists.
    pub fn is_sg(&self) -> bool {
        let data = self.inner.lock();
        data.src.is_sg() && data.dst.is_sg()
    }

    /// Either end lives in memory a device cannot reach.
    pub fn is_nondma(&self) -> bool {
        self.inner.lock().flags.intersects(ReqFlags::NONDMA)
    }

    /// Report `status` for this request: records it when terminal, then runs
    /// the completion. Backends call this for every asynchronous outcome.
    pub fn complete(&self, status: Status) {
        let completion = {
            let mut data = self.inner.lock();
            if status.is_terminal() {
                data.status = Some(status.clone());
            }
            data.completion.clone()
        };
        if let Some(completion) = completion {
            completion(status);
        }
    }

    /// Whether both handles refer to the same job.
    pub fn same(&self, other: &Request) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn set_status(&self, status: Status) {
        self.inner.lock().status = Some(status);
    }

    pub(crate) fn take_completion(&self) -> Option<Completion> {
        self.inner.lock().completion.take()
    }

    pub(crate) fn set_completion(&self, completion: Option<Completion>) {
        self.inner.lock().completion = completion;
    }

    pub(crate) fn take_chain(&self) -> VecDeque<Request> {
        std::mem::take(&mut self.inner.lock().chain)
    }

    pub(crate) fn relink(&self, completed: Vec<Request>) {
        self.inner.lock().chain.extend(completed);
    }

    /// Clear behaviour bits outside `mask`. Buffer attributes are kept.
    pub(crate) fn mask_flags(&self, mask: ReqFlags) {
        let mut data = self.inner.lock();
        data.flags = data.flags & (mask | !ReqFlags::BEHAVIOUR);
    }

    /// Fresh request presenting both ends of this one as scatter lists. The
    /// descriptors of `self` are left as they are.
    pub(crate) fn project_sg(&self, completion: Completion) -> Request {
        let data = self.inner.lock();
        let projected = RequestData {
            src: Buffer::Scatter(data.src.to_scatterlist(data.slen as usize)),
            dst: Buffer::Scatter(data.dst.to_scatterlist(data.dlen as usize)),
            slen: data.slen,
            dlen: data.dlen,
            flags: data.flags & ReqFlags::BEHAVIOUR,
            completion: Some(completion),
            chain: VecDeque::new(),
            status: None,
        };
        Request {
            inner: Arc::new(Mutex::new(projected)),
        }
    }

    /// Unchained copy with the same buffers and flags and no completion, for a
    /// one-off synchronous call.
    pub(crate) fn fallback_copy(&self) -> Request {
        let data = self.inner.lock();
        let copy = RequestData {
            src: data.src.clone(),
            dst: data.dst.clone(),
            slen: data.slen,
            dlen: data.dlen,
            flags: data.flags,
            completion: None,
            chain: VecDeque::new(),
            status: None,
        };
        Request {
            inner: Arc::new(Mutex::new(copy)),
        }
    }

    pub(crate) fn walk_parts(&self) -> (Buffer, Buffer, u32, u32, ReqFlags) {
        let data = self.inner.lock();
        (
            data.src.clone(),
            data.dst.clone(),
            data.slen,
            data.dlen,
            data.flags,
        )
    }

    fn set_src(&self, src: Buffer, slen: u32, nondma: bool) {
        let mut data = self.inner.lock();
        data.src = src;
        data.slen = slen;
        data.flags = if nondma {
            data.flags | ReqFlags::SRC_NONDMA
        } else {
            data.flags & !ReqFlags::SRC_NONDMA
        };
    }

    fn set_dst(&self, dst: Buffer, dlen: u32, nondma: bool) {
        let mut data = self.inner.lock();
        data.dst = dst;
        data.dlen = dlen;
        data.flags = if nondma {
            data.flags | ReqFlags::DST_NONDMA
        } else {
            data.flags & !ReqFlags::DST_NONDMA
        };
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.inner.lock();
        f.debug_struct("Request")
            .field("src", &data.src)
            .field("dst", &data.dst)
            .field("slen", &data.slen)
            .field("dlen", &data.dlen)
            .field("flags", &data.flags)
            .field("chained", &data.chain.len())
            .field("status", &data.status)
            .finish()
    }
}
