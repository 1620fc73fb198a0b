//! Request and response body types.
//!
//! Requests travel through the pipeline as a boxed [`RequestBody`] whose
//! error type is [`PipelineError`], so every body transform (idle timeout,
//! aws-chunked decoding, integrity checking) reports failures in the same
//! taxonomy. Responses use [`S3ResponseBody`], which is either buffered or
//! empty.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};

use crate::error::PipelineError;

/// The body every pipeline stage and handler sees.
pub type RequestBody = UnsyncBoxBody<Bytes, PipelineError>;

/// Box any body into a [`RequestBody`].
pub fn into_request_body<B>(body: B) -> RequestBody
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<PipelineError>,
{
    body.map_err(Into::into).boxed_unsync()
}

/// A [`RequestBody`] holding `data`.
#[must_use]
pub fn full_request_body(data: impl Into<Bytes>) -> RequestBody {
    into_request_body(Full::new(data.into()))
}

/// S3 response body supporting buffered and empty modes.
#[derive(Debug, Default)]
pub enum S3ResponseBody {
    /// XML payloads, error bodies, raw object bytes.
    Buffered(Full<Bytes>),
    /// 204 responses, HEAD responses, and the like.
    #[default]
    Empty,
}

impl S3ResponseBody {
    /// Create a buffered body from bytes.
    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::Buffered(Full::new(data.into()))
    }

    /// Create an empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::Empty
    }

    /// Create a buffered body from a UTF-8 string.
    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self::Buffered(Full::new(Bytes::from(s.into())))
    }
}

impl http_body::Body for S3ResponseBody {
    type Data = Bytes;
    type Error = std::io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        match self.get_mut() {
            Self::Buffered(full) => Pin::new(full)
                .poll_frame(cx)
                .map_err(|never| match never {}),
            Self::Empty => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Self::Buffered(full) => full.is_end_stream(),
            Self::Empty => true,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            Self::Buffered(full) => full.size_hint(),
            Self::Empty => http_body::SizeHint::with_exact(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use http_body::Body;

    use super::*;

    #[test]
    fn test_should_report_empty_body_as_end_of_stream() {
        let body = S3ResponseBody::empty();
        assert!(body.is_end_stream());
        assert_eq!(body.size_hint().exact(), Some(0));
    }

    #[test]
    fn test_should_create_buffered_body_from_string() {
        let body = S3ResponseBody::from_string("hello world");
        assert!(!body.is_end_stream());
        assert_eq!(body.size_hint().exact(), Some(11));
    }

    #[tokio::test]
    async fn test_should_box_request_body() {
        let body = full_request_body("payload");
        let collected = body.collect().await.expect("infallible").to_bytes();
        assert_eq!(collected, Bytes::from_static(b"payload"));
    }
}
