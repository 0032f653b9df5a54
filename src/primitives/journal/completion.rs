#![forbid(unsafe_code)]

use std::future::Future;
use std::io::IoSlice;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use smallvec::SmallVec;
use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::primitives::io::FileIo;
use crate::types::Result;

/// Terminal state of a journal write that did not fail.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteOutcome {
    /// The bytes were written through to the device.
    Durable,
    /// The write was aborted before reaching the device, because the writer
    /// was disposed while it was queued. Durability is not established.
    Canceled,
}

impl WriteOutcome {
    /// Whether the write reached stable storage.
    pub fn is_durable(self) -> bool {
        matches!(self, WriteOutcome::Durable)
    }
}

pub(crate) enum Payload {
    Gather(Vec<Bytes>),
    Single(Bytes),
}

/// One queued write together with the sender that resolves its ticket.
///
/// The request owns the page buffers for as long as the write is pending and
/// is consumed by [`WriteRequest::complete`]. If it is dropped instead (a
/// worker panicked, the queue was torn down), the sender goes with it and the
/// ticket resolves as [`WriteOutcome::Canceled`].
pub(crate) struct WriteRequest {
    position: u64,
    payload: Payload,
    reply: oneshot::Sender<Result<WriteOutcome>>,
}

impl WriteRequest {
    pub(crate) fn new(position: u64, payload: Payload) -> (Self, WriteTicket) {
        let (reply, rx) = oneshot::channel();
        (
            Self {
                position,
                payload,
                reply,
            },
            WriteTicket { rx },
        )
    }

    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    /// Total bytes covered by the request.
    pub(crate) fn len(&self) -> u64 {
        match &self.payload {
            Payload::Gather(pages) => pages.iter().map(|p| p.len() as u64).sum(),
            Payload::Single(buf) => buf.len() as u64,
        }
    }

    pub(crate) fn descriptor_count(&self) -> usize {
        match &self.payload {
            Payload::Gather(pages) => pages.len(),
            Payload::Single(_) => 1,
        }
    }

    /// Issues the write: one vectored write for a gather request, one
    /// positioned write for a single buffer.
    pub(crate) fn issue(&self, io: &dyn FileIo) -> Result<()> {
        match &self.payload {
            Payload::Gather(pages) => {
                let slices: SmallVec<[IoSlice<'_>; 16]> =
                    pages.iter().map(|page| IoSlice::new(page)).collect();
                io.writev_at(self.position, &slices)
            }
            Payload::Single(buf) => io.write_at(self.position, buf),
        }
    }

    /// Resolves the ticket and releases the buffers.
    pub(crate) fn complete(self, outcome: Result<WriteOutcome>) {
        // The caller may have dropped its ticket; nobody is left to tell.
        let _ = self.reply.send(outcome);
    }
}

/// Completion handle returned for every journal write.
///
/// Await it from async code, or call [`WriteTicket::wait`] from a plain
/// thread. It resolves to `Ok(WriteOutcome::Durable)`,
/// `Ok(WriteOutcome::Canceled)`, or an error carrying the OS error code.
#[must_use = "a journal write is not durable until its ticket resolves"]
#[derive(Debug)]
pub struct WriteTicket {
    rx: oneshot::Receiver<Result<WriteOutcome>>,
}

impl WriteTicket {
    /// Blocks the current thread until the write finishes.
    ///
    /// Must not be called from inside an async runtime; await the ticket there.
    pub fn wait(self) -> Result<WriteOutcome> {
        match self.rx.blocking_recv() {
            Ok(outcome) => outcome,
            Err(_) => Ok(WriteOutcome::Canceled),
        }
    }

    /// Returns the outcome if the write already finished.
    pub fn try_outcome(&mut self) -> Option<Result<WriteOutcome>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Ok(WriteOutcome::Canceled)),
        }
    }
}

impl Future for WriteTicket {
    type Output = Result<WriteOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(outcome) => outcome,
            Err(_) => Ok(WriteOutcome::Canceled),
        })
    }
}
