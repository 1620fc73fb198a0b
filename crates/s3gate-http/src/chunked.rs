//! Streaming decoder for `Content-Encoding: aws-chunked` request bodies.
//!
//! Signed framing (`STREAMING-AWS4-HMAC-SHA256-PAYLOAD[-TRAILER]`):
//!
//! ```text
//! <hex-size>;chunk-signature=<sig>\r\n
//! <data>\r\n
//! ...
//! 0;chunk-signature=<sig>\r\n
//! [<trailer-name>:<value>\r\n ... x-amz-trailer-signature:<sig>\r\n]
//! \r\n
//! ```
//!
//! Unsigned framing (`STREAMING-UNSIGNED-PAYLOAD-TRAILER`) drops the
//! `;chunk-signature=` extensions and the trailer signature.
//!
//! [`AwsChunkedBody`] is a body transform: it holds at most one chunk, checks
//! its signature against the rolling chain, and only then yields the chunk's
//! bytes. Trailers are yielded as a trailers frame after the last chunk.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Buf, Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use pin_project_lite::pin_project;
use s3gate_auth::ChunkSigner;
use s3gate_auth::chunk::TRAILER_SIGNATURE_HEADER;
use s3gate_auth::payload::hash_payload;
use s3gate_core::GatewayConfig;
use tracing::{debug, warn};

use crate::error::PipelineError;

const MAX_LINE_LEN: usize = 4096;
const MAX_TRAILER_LINES: usize = 64;
const MAX_SIZE_DIGITS: usize = 16;
const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Limits and verification inputs for one chunked body.
#[derive(Debug, Clone)]
pub struct ChunkedOptions {
    /// Largest accepted chunk.
    pub max_chunk_size: u64,
    /// Largest accepted number of chunks, the final empty chunk included.
    pub max_chunk_count: u64,
    /// Largest accepted decoded body.
    pub max_total: u64,
    /// `x-amz-decoded-content-length`, when declared.
    pub decoded_length: Option<u64>,
    /// Whether trailer lines follow the final chunk.
    pub expect_trailer: bool,
    /// Chunk signature chain; `None` for unsigned framing.
    pub signer: Option<ChunkSigner>,
}

impl ChunkedOptions {
    /// Limits taken from the gateway configuration, unsigned, without trailer.
    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            max_chunk_size: config.max_chunk_size,
            max_chunk_count: config.max_chunk_count,
            max_total: config.max_object_size,
            decoded_length: None,
            expect_trailer: false,
            signer: None,
        }
    }

    /// Verify every chunk with `signer`.
    #[must_use]
    pub fn with_signer(mut self, signer: ChunkSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Require the decoded body to be exactly `length` bytes.
    #[must_use]
    pub fn with_decoded_length(mut self, length: u64) -> Self {
        self.decoded_length = Some(length);
        self
    }

    /// Expect trailer lines after the final chunk.
    #[must_use]
    pub fn with_trailer(mut self, expect_trailer: bool) -> Self {
        self.expect_trailer = expect_trailer;
        self
    }
}

#[derive(Debug)]
enum State {
    Header,
    Data {
        len: usize,
        signature: Option<String>,
    },
    FinalLine,
    Trailers,
    Done,
    Failed,
}

enum Step {
    Frame(Frame<Bytes>),
    NeedMore,
    End,
}

/// The framing state machine, independent of the underlying body.
struct Decoder {
    options: ChunkedOptions,
    state: State,
    chunks: u64,
    decoded: u64,
    trailers: Vec<(String, String)>,
    trailer_signature: Option<String>,
}

impl Decoder {
    fn new(options: ChunkedOptions) -> Self {
        Self {
            options,
            state: State::Header,
            chunks: 0,
            decoded: 0,
            trailers: Vec::new(),
            trailer_signature: None,
        }
    }

    fn step(&mut self, buf: &mut BytesMut, eof: bool) -> Result<Step, PipelineError> {
        loop {
            match &self.state {
                State::Header => {
                    let Some(line) = take_line(buf)? else {
                        return Ok(Step::NeedMore);
                    };
                    self.on_header(&line)?;
                }
                State::Data { len, .. } => {
                    let len = *len;
                    if buf.len() < len + 2 {
                        return Ok(Step::NeedMore);
                    }
                    let State::Data { signature, .. } =
                        std::mem::replace(&mut self.state, State::Header)
                    else {
                        unreachable!("state checked above");
                    };
                    let data = buf.split_to(len).freeze();
                    if &buf[..2] != b"\r\n" {
                        return Err(PipelineError::MalformedRequest(
                            "chunk data is not followed by CRLF".to_owned(),
                        ));
                    }
                    buf.advance(2);
                    self.verify_chunk(&hash_payload(&data), signature.as_deref())?;
                    self.decoded += len as u64;
                    return Ok(Step::Frame(Frame::data(data)));
                }
                State::FinalLine => {
                    if eof && buf.is_empty() {
                        self.state = State::Done;
                        continue;
                    }
                    let Some(line) = take_line(buf)? else {
                        return Ok(Step::NeedMore);
                    };
                    if !line.is_empty() {
                        return Err(PipelineError::MalformedRequest(
                            "unexpected data after final chunk".to_owned(),
                        ));
                    }
                    self.state = State::Done;
                }
                State::Trailers => {
                    let Some(line) = take_line(buf)? else {
                        return Ok(Step::NeedMore);
                    };
                    if line.is_empty() {
                        let trailers = self.finish_trailers()?;
                        self.state = State::Done;
                        if !trailers.is_empty() {
                            return Ok(Step::Frame(Frame::trailers(trailers)));
                        }
                    } else {
                        self.on_trailer_line(&line)?;
                    }
                }
                State::Done => {
                    if !buf.is_empty() {
                        return Err(PipelineError::MalformedRequest(
                            "unexpected data after final chunk".to_owned(),
                        ));
                    }
                    return Ok(if eof { Step::End } else { Step::NeedMore });
                }
                State::Failed => return Ok(Step::End),
            }
        }
    }

    fn on_header(&mut self, line: &[u8]) -> Result<(), PipelineError> {
        let line = std::str::from_utf8(line).map_err(|_| {
            PipelineError::MalformedRequest("chunk header is not valid UTF-8".to_owned())
        })?;
        let (size, extension) = match line.split_once(';') {
            Some((size, ext)) => (size.trim(), Some(ext.trim())),
            None => (line.trim(), None),
        };
        if size.is_empty() || size.len() > MAX_SIZE_DIGITS {
            return Err(PipelineError::MalformedRequest(format!(
                "invalid chunk size '{size}'"
            )));
        }
        let len = u64::from_str_radix(size, 16).map_err(|_| {
            PipelineError::MalformedRequest(format!("invalid chunk size '{size}'"))
        })?;

        let signature = if self.options.signer.is_some() {
            let signature = extension
                .and_then(|ext| ext.strip_prefix("chunk-signature="))
                .ok_or_else(|| {
                    PipelineError::MalformedRequest("missing chunk-signature".to_owned())
                })?;
            Some(signature.to_owned())
        } else {
            None
        };

        self.chunks += 1;
        if self.chunks > self.options.max_chunk_count {
            return Err(PipelineError::FrameLimitExceeded(format!(
                "more than {} chunks",
                self.options.max_chunk_count
            )));
        }

        if len == 0 {
            self.verify_chunk(EMPTY_SHA256, signature.as_deref())?;
            if let Some(expected) = self.options.decoded_length {
                if self.decoded != expected {
                    return Err(PipelineError::IncompleteBody(format!(
                        "decoded {} bytes, declared {expected}",
                        self.decoded
                    )));
                }
            }
            debug!(chunks = self.chunks, bytes = self.decoded, "final chunk verified");
            self.state = if self.options.expect_trailer {
                State::Trailers
            } else {
                State::FinalLine
            };
            return Ok(());
        }

        if len > self.options.max_chunk_size {
            return Err(PipelineError::FrameLimitExceeded(format!(
                "chunk of {len} bytes exceeds {}",
                self.options.max_chunk_size
            )));
        }
        let total = self.decoded.saturating_add(len);
        if total > self.options.max_total {
            return Err(PipelineError::BodyTooLarge(format!(
                "decoded body exceeds {} bytes",
                self.options.max_total
            )));
        }
        if self.options.decoded_length.is_some_and(|declared| total > declared) {
            return Err(PipelineError::BodyTooLarge(
                "decoded body exceeds x-amz-decoded-content-length".to_owned(),
            ));
        }
        let len = usize::try_from(len)
            .map_err(|_| PipelineError::FrameLimitExceeded(format!("chunk of {len} bytes")))?;
        self.state = State::Data { len, signature };
        Ok(())
    }

    fn verify_chunk(&mut self, hash: &str, signature: Option<&str>) -> Result<(), PipelineError> {
        let Some(signer) = self.options.signer.as_mut() else {
            return Ok(());
        };
        let index = self.chunks.saturating_sub(1);
        let provided = signature.unwrap_or_default();
        if signer.verify_chunk(hash, provided) {
            Ok(())
        } else {
            warn!(index, "chunk signature mismatch");
            Err(PipelineError::ChunkSignatureMismatch { index })
        }
    }

    fn on_trailer_line(&mut self, line: &[u8]) -> Result<(), PipelineError> {
        let line = std::str::from_utf8(line).map_err(|_| {
            PipelineError::MalformedRequest("trailer is not valid UTF-8".to_owned())
        })?;
        let (name, value) = line.split_once(':').ok_or_else(|| {
            PipelineError::MalformedRequest(format!("malformed trailer line '{line}'"))
        })?;
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim().to_owned();
        if name == TRAILER_SIGNATURE_HEADER {
            self.trailer_signature = Some(value);
            return Ok(());
        }
        if self.trailers.len() >= MAX_TRAILER_LINES {
            return Err(PipelineError::FrameLimitExceeded(
                "too many trailer lines".to_owned(),
            ));
        }
        self.trailers.push((name, value));
        Ok(())
    }

    fn finish_trailers(&mut self) -> Result<HeaderMap, PipelineError> {
        if let Some(signer) = &self.options.signer {
            let provided = self
                .trailer_signature
                .as_deref()
                .ok_or(PipelineError::TrailerSignatureMismatch)?;
            if !signer.verify_trailer(&self.trailers, provided) {
                warn!("trailer signature mismatch");
                return Err(PipelineError::TrailerSignatureMismatch);
            }
        }
        let mut map = HeaderMap::with_capacity(self.trailers.len());
        for (name, value) in &self.trailers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                PipelineError::MalformedRequest(format!("invalid trailer name '{name}'"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                PipelineError::MalformedRequest(format!("invalid value for trailer '{name}'"))
            })?;
            map.append(name, value);
        }
        Ok(map)
    }
}

/// Split off one CRLF-terminated line, without the terminator.
fn take_line(buf: &mut BytesMut) -> Result<Option<Bytes>, PipelineError> {
    match buf.windows(2).position(|w| w == b"\r\n") {
        Some(pos) if pos > MAX_LINE_LEN => Err(PipelineError::MalformedRequest(
            "chunk framing line too long".to_owned(),
        )),
        Some(pos) => {
            let line = buf.split_to(pos).freeze();
            buf.advance(2);
            Ok(Some(line))
        }
        None if buf.len() > MAX_LINE_LEN => Err(PipelineError::MalformedRequest(
            "chunk framing line too long".to_owned(),
        )),
        None => Ok(None),
    }
}

pin_project! {
    /// An `aws-chunked` body decoded on the fly.
    ///
    /// ```
    /// use bytes::Bytes;
    /// use http_body_util::{BodyExt, Full};
    /// use s3gate_auth::chunk::encode_unsigned_chunks;
    /// use s3gate_core::GatewayConfig;
    /// use s3gate_http::chunked::{AwsChunkedBody, ChunkedOptions};
    ///
    /// # tokio_test::block_on(async {
    /// let wire = encode_unsigned_chunks(b"hello world", 4, &[]);
    /// let options = ChunkedOptions::from_config(&GatewayConfig::default()).with_decoded_length(11);
    /// let body = AwsChunkedBody::new(Full::new(Bytes::from(wire)), options);
    /// let decoded = body.collect().await.unwrap().to_bytes();
    /// assert_eq!(decoded, Bytes::from_static(b"hello world"));
    /// # });
    /// ```
    pub struct AwsChunkedBody<B> {
        #[pin]
        inner: B,
        buf: BytesMut,
        decoder: Decoder,
        inner_done: bool,
    }
}

impl<B> fmt::Debug for AwsChunkedBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsChunkedBody")
            .field("state", &self.decoder.state)
            .field("chunks", &self.decoder.chunks)
            .field("decoded", &self.decoder.decoded)
            .field("buffered", &self.buf.len())
            .finish_non_exhaustive()
    }
}

impl<B> AwsChunkedBody<B> {
    /// Wrap `inner`, decoding with `options`.
    pub fn new(inner: B, options: ChunkedOptions) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            decoder: Decoder::new(options),
            inner_done: false,
        }
    }

    /// Decoded payload bytes yielded so far.
    #[must_use]
    pub fn decoded_bytes(&self) -> u64 {
        self.decoder.decoded
    }

    /// Trailers received after the final chunk.
    #[must_use]
    pub fn trailers(&self) -> &[(String, String)] {
        &self.decoder.trailers
    }
}

impl<B> AwsChunkedBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<PipelineError>,
{
    /// Pull the next verified piece of payload.
    ///
    /// Returns `Ok(None)` at end of stream. Trailers are skipped; read them
    /// with [`trailers`](Self::trailers) afterwards.
    pub async fn next_decoded_bytes(&mut self) -> Result<Option<Bytes>, PipelineError> {
        while let Some(frame) = self.frame().await {
            if let Ok(data) = frame?.into_data() {
                return Ok(Some(data));
            }
        }
        Ok(None)
    }
}

impl<B> Body for AwsChunkedBody<B>
where
    B: Body<Data = Bytes>,
    B::Error: Into<PipelineError>,
{
    type Data = Bytes;
    type Error = PipelineError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();
        loop {
            match this.decoder.step(this.buf, *this.inner_done) {
                Ok(Step::Frame(frame)) => return Poll::Ready(Some(Ok(frame))),
                Ok(Step::End) => return Poll::Ready(None),
                Ok(Step::NeedMore) => {}
                Err(err) => {
                    this.decoder.state = State::Failed;
                    this.buf.clear();
                    return Poll::Ready(Some(Err(err)));
                }
            }

            if *this.inner_done {
                this.decoder.state = State::Failed;
                this.buf.clear();
                return Poll::Ready(Some(Err(PipelineError::IncompleteBody(
                    "body ended inside chunk framing".to_owned(),
                ))));
            }

            match ready!(this.inner.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        this.buf.extend_from_slice(&data);
                    }
                }
                Some(Err(err)) => {
                    this.decoder.state = State::Failed;
                    this.buf.clear();
                    return Poll::Ready(Some(Err(err.into())));
                }
                None => *this.inner_done = true,
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match self.decoder.state {
            State::Done => self.inner_done && self.buf.is_empty(),
            State::Failed => true,
            _ => false,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self.decoder.options.decoded_length {
            Some(declared) => SizeHint::with_exact(declared.saturating_sub(self.decoder.decoded)),
            None => SizeHint::default(),
        }
    }
}

/// Whether `Content-Encoding` lists `aws-chunked`.
#[must_use]
pub fn is_aws_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(http::header::CONTENT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim().eq_ignore_ascii_case("aws-chunked"))
}

/// Remove `aws-chunked` from `Content-Encoding`, deleting the header when
/// nothing else remains.
pub fn strip_aws_chunked_encoding(headers: &mut HeaderMap) {
    let Some(value) = headers
        .get(http::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
    else {
        return;
    };

    let remaining: Vec<&str> = value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("aws-chunked"))
        .collect();

    if remaining.is_empty() {
        headers.remove(http::header::CONTENT_ENCODING);
    } else if let Ok(new_val) = HeaderValue::from_str(&remaining.join(", ")) {
        headers.insert(http::header::CONTENT_ENCODING, new_val);
    }
}
