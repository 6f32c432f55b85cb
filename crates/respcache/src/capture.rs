//! Copies a response body into a side buffer while it streams to the client.

use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// Bounded buffer of the bytes written so far.
///
/// Once the limit would be exceeded, or someone disables it, buffering stops for
/// good and the bytes already held are released.
#[derive(Debug)]
pub struct ResponseCapture {
    buffer: BytesMut,
    max_buffer_size: usize,
    enabled: bool,
}

impl ResponseCapture {
    pub fn new(max_buffer_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_buffer_size,
            enabled: true,
        }
    }

    pub fn buffered_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn buffering_enabled(&self) -> bool {
        self.enabled
    }

    pub fn disable_buffering(&mut self) {
        self.enabled = false;
        self.buffer = BytesMut::new();
    }

    pub fn write(&mut self, chunk: &[u8]) {
        if !self.enabled {
            return;
        }
        if self.buffer.len() + chunk.len() > self.max_buffer_size {
            tracing::debug!(
                max_buffer_size = self.max_buffer_size,
                "response body exceeds capture limit, buffering disabled"
            );
            self.disable_buffering();
            return;
        }
        self.buffer.extend_from_slice(chunk);
    }

    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }
}

type OnComplete = Box<dyn FnOnce(ResponseCapture) -> BoxFuture<'static, ()> + Send>;

/// Runs once the wrapped body has been fully delivered.
///
/// Dropping it without completion (client went away, body errored) simply
/// discards the capture.
pub struct Finalizer {
    on_complete: Option<OnComplete>,
}

impl Finalizer {
    pub fn new<F>(on_complete: F) -> Self
    where
        F: FnOnce(ResponseCapture) -> BoxFuture<'static, ()> + Send + 'static,
    {
        Self {
            on_complete: Some(Box::new(on_complete)),
        }
    }

    fn complete(mut self, capture: ResponseCapture) -> Option<BoxFuture<'static, ()>> {
        self.on_complete.take().map(|f| f(capture))
    }
}

impl Drop for Finalizer {
    fn drop(&mut self) {
        if self.on_complete.is_some() {
            tracing::debug!("response body ended early, captured bytes discarded");
        }
    }
}

impl std::fmt::Debug for Finalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Finalizer")
            .field("pending", &self.on_complete.is_some())
            .finish()
    }
}

/// Completion bookkeeping for a [`CaptureBody`].
///
/// Kept outside the pinned body so dropping it can still hand a finished
/// capture to the runtime when the server stops polling at the last byte.
struct CaptureState {
    capture: ResponseCapture,
    finalizer: Option<Finalizer>,
    finalizing: Option<BoxFuture<'static, ()>>,
    expected_len: Option<u64>,
    written: u64,
    ended: bool,
}

impl CaptureState {
    fn record(&mut self, data: &[u8]) {
        self.capture.write(data);
        self.written += data.len() as u64;
        if self.expected_len.is_some_and(|expected| self.written >= expected) {
            self.ended = true;
        }
    }

    fn start_finalizing(&mut self) -> bool {
        let Some(finalizer) = self.finalizer.take() else {
            return false;
        };
        let capture = std::mem::replace(&mut self.capture, ResponseCapture::new(0));
        self.finalizing = finalizer.complete(capture);
        self.finalizing.is_some()
    }

    fn abandon(&mut self) {
        self.capture.disable_buffering();
        self.finalizer.take();
        self.ended = false;
    }
}

impl Drop for CaptureState {
    fn drop(&mut self) {
        if self.ended && self.finalizing.is_none() {
            self.start_finalizing();
        }
        let Some(finalizing) = self.finalizing.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(finalizing);
            }
            Err(_) => {
                tracing::debug!("no runtime to finish storing the response, capture discarded")
            }
        }
    }
}

pin_project! {
    /// Body wrapper installed on responses that might be cached.
    ///
    /// Frames pass through untouched. Data frames are also copied into the
    /// [`ResponseCapture`]. The body counts as finished once the inner body
    /// reports its end or the declared length has been written. The finalizer
    /// then runs before the last frame is handed on. A finished body dropped
    /// before that point has its finalizer spawned on the current runtime.
    pub struct CaptureBody<B> {
        #[pin]
        inner: B,
        state: CaptureState,
        held: Option<Frame<Bytes>>,
    }
}

impl<B: Body> CaptureBody<B> {
    pub fn new(inner: B, capture: ResponseCapture, finalizer: Finalizer) -> Self {
        let expected_len = inner.size_hint().exact();
        let ended = inner.is_end_stream() || expected_len == Some(0);
        Self {
            inner,
            state: CaptureState {
                capture,
                finalizer: Some(finalizer),
                finalizing: None,
                expected_len,
                written: 0,
                ended,
            },
            held: None,
        }
    }
}

impl<B> Body for CaptureBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();
        let state = this.state;
        loop {
            if let Some(finalizing) = state.finalizing.as_mut() {
                ready!(finalizing.poll_unpin(cx));
                state.finalizing = None;
                return Poll::Ready(this.held.take().map(Ok));
            }

            match ready!(this.inner.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => {
                    if let Some(data) = frame.data_ref() {
                        state.record(data);
                    }
                    if this.inner.is_end_stream() {
                        state.ended = true;
                    }
                    if state.ended && state.start_finalizing() {
                        *this.held = Some(frame);
                        continue;
                    }
                    return Poll::Ready(Some(Ok(frame)));
                }
                Some(Err(err)) => {
                    state.abandon();
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    state.ended = true;
                    if !state.start_finalizing() {
                        return Poll::Ready(None);
                    }
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.state.finalizing.is_none() && self.held.is_none() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
