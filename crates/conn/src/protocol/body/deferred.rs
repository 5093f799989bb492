use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::channel::mpsc;
use futures::{FutureExt, StreamExt};
use http_body::{Body, Frame};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::trace;

use crate::protocol::BodyError;

#[derive(Debug)]
enum BodyEvent {
    Data(Bytes),
    Done,
    Failed(BodyError),
}

/// Creates a deferred body and the writer that feeds it.
///
/// The writer may live on any thread. The body must be told explicitly how it ends:
/// [`BodyWriter::finish`] or [`BodyWriter::fail`]. A writer dropped without either is
/// reported as a failure, so a truncated body never looks complete.
pub fn channel() -> (BodyWriter, DeferredBody) {
    let (sender, receiver) = mpsc::unbounded();
    let abort = CancellationToken::new();

    let writer = BodyWriter { sender, abort: abort.clone() };
    let body = DeferredBody { receiver, aborted: Box::pin(abort.clone().cancelled_owned()), abort, done: false };

    (writer, body)
}

/// Producer side of a [`DeferredBody`].
#[derive(Debug, Clone)]
pub struct BodyWriter {
    sender: mpsc::UnboundedSender<BodyEvent>,
    abort: CancellationToken,
}

impl BodyWriter {
    /// Queues a chunk. Fails with [`BodyError::Aborted`] once the consumer is gone.
    pub fn send(&self, data: impl Into<Bytes>) -> Result<(), BodyError> {
        if self.abort.is_cancelled() {
            return Err(BodyError::Aborted);
        }

        self.sender.unbounded_send(BodyEvent::Data(data.into())).map_err(|_closed| BodyError::Aborted)
    }

    /// Signals successful completion.
    pub fn finish(self) {
        let _ = self.sender.unbounded_send(BodyEvent::Done);
    }

    /// Signals failure; the connection stops sending and closes.
    pub fn fail<S: ToString>(self, reason: S) {
        let _ = self.sender.unbounded_send(BodyEvent::Failed(BodyError::failed(reason)));
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// Resolves once the consumer aborted the body.
    pub async fn aborted(&self) {
        self.abort.cancelled().await;
    }
}

/// Lets the owner of a response fail its deferred body after the body itself has been
/// handed off for streaming.
#[derive(Debug, Clone)]
pub struct AbortHandle(CancellationToken);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// A response body whose chunks are produced later, possibly from another thread.
pub struct DeferredBody {
    receiver: mpsc::UnboundedReceiver<BodyEvent>,
    aborted: Pin<Box<WaitForCancellationFutureOwned>>,
    abort: CancellationToken,
    done: bool,
}

impl DeferredBody {
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(self.abort.clone())
    }

    /// Fails the body from the consumer side. The writer observes [`BodyError::Aborted`].
    pub fn fail(&self) {
        self.abort.cancel();
    }
}

impl fmt::Debug for DeferredBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredBody").field("aborted", &self.abort.is_cancelled()).field("done", &self.done).finish()
    }
}

impl Body for DeferredBody {
    type Data = Bytes;
    type Error = BodyError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(None);
        }

        if this.aborted.poll_unpin(cx).is_ready() {
            this.done = true;
            return Poll::Ready(Some(Err(BodyError::Aborted)));
        }

        match this.receiver.poll_next_unpin(cx) {
            Poll::Ready(Some(BodyEvent::Data(bytes))) => {
                trace!(len = bytes.len(), "deferred body chunk");
                Poll::Ready(Some(Ok(Frame::data(bytes))))
            }
            Poll::Ready(Some(BodyEvent::Done)) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(BodyEvent::Failed(e))) => {
                this.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(Some(Err(BodyError::failed("body writer dropped before finishing"))))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    #[tokio::test]
    async fn chunks_then_finish() {
        let (writer, mut body) = channel();
        writer.send("hello ").unwrap();
        writer.send(Bytes::from_static(b"world")).unwrap();
        writer.finish();

        let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
        let second = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert_eq!(first, Bytes::from_static(b"hello "));
        assert_eq!(second, Bytes::from_static(b"world"));
        assert!(body.frame().await.is_none());
        assert!(body.is_end_stream());
    }

    #[tokio::test]
    async fn writer_failure_reaches_consumer() {
        let (writer, mut body) = channel();
        writer.send("partial").unwrap();
        writer.fail("upstream went away");

        assert!(body.frame().await.unwrap().is_ok());
        let error = body.frame().await.unwrap().unwrap_err();
        assert_eq!(error, BodyError::failed("upstream went away"));
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn dropped_writer_is_a_failure() {
        let (writer, mut body) = channel();
        drop(writer);
        assert!(matches!(body.frame().await, Some(Err(BodyError::Failed { .. }))));
    }

    #[tokio::test]
    async fn consumer_abort_reaches_writer() {
        let (writer, mut body) = channel();
        let handle = body.abort_handle();
        handle.abort();

        assert!(writer.is_aborted());
        assert_eq!(writer.send("late"), Err(BodyError::Aborted));
        writer.aborted().await;
        assert!(matches!(body.frame().await, Some(Err(BodyError::Aborted))));
    }
}
