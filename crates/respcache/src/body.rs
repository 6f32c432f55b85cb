use crate::capture::CaptureBody;
use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use http_body_util::Full;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// Body of every response leaving the caching middleware.
    #[project = ResponseBodyProj]
    pub enum ResponseBody<B> {
        /// Downstream body, untouched.
        Passthrough {
            #[pin]
            inner: B,
        },
        /// Downstream body with a capture buffer attached.
        Capturing {
            #[pin]
            inner: CaptureBody<B>,
        },
        /// Served from the store, or synthesized (304, 504).
        Cached {
            body: Full<Bytes>,
        },
    }
}

impl<B> ResponseBody<B> {
    pub fn passthrough(inner: B) -> Self {
        ResponseBody::Passthrough { inner }
    }

    pub fn capturing(inner: CaptureBody<B>) -> Self {
        ResponseBody::Capturing { inner }
    }

    pub fn cached(bytes: Bytes) -> Self {
        ResponseBody::Cached {
            body: Full::new(bytes),
        }
    }

    pub fn empty() -> Self {
        Self::cached(Bytes::new())
    }
}

impl<B> Body for ResponseBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            ResponseBodyProj::Passthrough { inner } => inner.poll_frame(cx),
            ResponseBodyProj::Capturing { inner } => inner.poll_frame(cx),
            ResponseBodyProj::Cached { body } => Pin::new(body)
                .poll_frame(cx)
                .map_err(|never| match never {}),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            ResponseBody::Passthrough { inner } => inner.is_end_stream(),
            ResponseBody::Capturing { inner } => inner.is_end_stream(),
            ResponseBody::Cached { body } => body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            ResponseBody::Passthrough { inner } => inner.size_hint(),
            ResponseBody::Capturing { inner } => inner.size_hint(),
            ResponseBody::Cached { body } => body.size_hint(),
        }
    }
}
