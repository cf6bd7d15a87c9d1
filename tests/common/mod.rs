//! Test backends shared by the integration tests.
#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use acompress::{AcompAlgorithm, Buffer, Request, Status};
use parking_lot::Mutex;

/// Shape of one buffer as the backend saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Flat,
    Paged,
    Scatter,
}

impl From<&Buffer> for Shape {
    fn from(buffer: &Buffer) -> Self {
        match buffer {
            Buffer::Flat { .. } => Shape::Flat,
            Buffer::Paged { .. } => Shape::Paged,
            Buffer::Scatter(_) => Shape::Scatter,
        }
    }
}

/// One backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub slen: u32,
    pub src: Shape,
    pub dst: Shape,
}

/// Synchronous backend that always succeeds, producing `slen / ratio` bytes.
pub struct Recorder {
    pub name: &'static str,
    pub ratio: u32,
    pub chaining: bool,
    pub calls: Mutex<Vec<Call>>,
}

impl Recorder {
    pub fn new(ratio: u32) -> Self {
        Self {
            name: "recorder",
            ratio: ratio.max(1),
            chaining: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn chaining(self) -> Self {
        Self {
            chaining: true,
            ..self
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn run(&self, req: &Request) -> Status {
        self.calls.lock().push(Call {
            slen: req.slen(),
            src: Shape::from(&req.src()),
            dst: Shape::from(&req.dst()),
        });
        req.set_dlen(req.slen() / self.ratio);
        Status::Success
    }
}

impl AcompAlgorithm for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    fn compress(&self, req: &Request) -> Status {
        self.run(req)
    }

    fn decompress(&self, req: &Request) -> Status {
        self.run(req)
    }

    fn supports_chaining(&self) -> bool {
        self.chaining
    }
}

/// What [`Scripted`] does with its n-th call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Finish synchronously with success.
    Done,
    /// Hold the request and return `InProgress`.
    Defer,
    /// Hold the request and return `Busy`.
    Busy,
    /// Return `Busy` without keeping the request.
    Reject,
}

/// Asynchronous backend following a script. Held requests are completed by
/// the test through [`Scripted::complete_next`].
pub struct Scripted {
    script: Mutex<VecDeque<Reply>>,
    held: Mutex<VecDeque<Request>>,
    pub calls: AtomicUsize,
}

impl Scripted {
    pub fn new(script: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            held: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn held(&self) -> usize {
        self.held.lock().len()
    }

    /// Finish the oldest held request with `status`. Returns `false` when
    /// nothing is held.
    pub fn complete_next(&self, status: Status) -> bool {
        let req = self.held.lock().pop_front();
        match req {
            Some(req) => {
                req.set_dlen(req.slen());
                req.complete(status);
                true
            }
            None => false,
        }
    }

    /// Report `status` for the oldest held request without releasing it.
    pub fn notify_front(&self, status: Status) -> bool {
        let req = self.held.lock().front().cloned();
        match req {
            Some(req) => {
                req.complete(status);
                true
            }
            None => false,
        }
    }

    fn run(&self, req: &Request) -> Status {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.script.lock().pop_front().unwrap_or(Reply::Done);
        match reply {
            Reply::Done => {
                req.set_dlen(req.slen());
                Status::Success
            }
            Reply::Defer => {
                self.held.lock().push_back(req.clone());
                Status::InProgress
            }
            Reply::Busy => {
                self.held.lock().push_back(req.clone());
                Status::Busy
            }
            Reply::Reject => Status::Busy,
        }
    }
}

impl AcompAlgorithm for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn compress(&self, req: &Request) -> Status {
        self.run(req)
    }

    fn decompress(&self, req: &Request) -> Status {
        self.run(req)
    }

    fn is_async(&self) -> bool {
        true
    }
}

/// Completion sink recording every status it receives.
pub fn status_sink() -> (Arc<Mutex<Vec<Status>>>, impl Fn(Status) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |status| sink.lock().push(status))
}
