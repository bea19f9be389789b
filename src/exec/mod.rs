//! Command execution
//!
//! - `channel`: one exec request and its output streams
//! - `coordinator`: drives an invocation through acquire → run → release/invalidate
//! - `result`: invocation state and collected output

mod channel;
mod coordinator;
mod error;
mod result;

pub use channel::{CommandChannel, OutputStream, StreamKind};
pub use coordinator::{ExecRequest, Executor};
pub use error::{ExecError, FailureKind};
pub use result::{InvocationResult, InvocationState};

/// Receives output chunks as they arrive, before the invocation completes
pub trait OutputSink: Send {
    fn on_chunk(&mut self, stream: StreamKind, chunk: &[u8]);
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn on_chunk(&mut self, _stream: StreamKind, _chunk: &[u8]) {}
}

impl<F> OutputSink for F
where
    F: FnMut(StreamKind, &[u8]) + Send,
{
    fn on_chunk(&mut self, stream: StreamKind, chunk: &[u8]) {
        self(stream, chunk)
    }
}
