//! Canonical request decoding and construction for AWS Signature Version 4.
//!
//! A [`CanonicalRequest`] is the immutable, decoded view of an incoming
//! request that every later pipeline stage reads. From it the SigV4
//! canonical request string is built:
//!
//! ```text
//! HTTPRequestMethod\n
//! CanonicalURI\n
//! CanonicalQueryString\n
//! CanonicalHeaders\n\n
//! SignedHeaders\n
//! HashedPayload
//! ```
//!
//! The path and query are percent-decoded exactly once when the request is
//! decoded and re-encoded with the SigV4 table when the string is built, so
//! clients that encode reserved characters differently still agree with the
//! server on the canonical form.

use std::borrow::Cow;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

use crate::error::AuthError;

/// Characters left unencoded by SigV4: `A-Z a-z 0-9 - _ . ~`.
const URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Decoded, immutable snapshot of a request as seen by the signing stages.
///
/// Header names are lower-cased; duplicate headers are kept in their
/// original order. Query parameters are decoded and stably sorted by key,
/// so repeated keys keep the order in which the client sent them. Header
/// values that are not UTF-8 are left out and only remembered by name, so
/// signing over one of them fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    method: http::Method,
    raw_path: String,
    path: String,
    raw_query: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    opaque_headers: Vec<String>,
}

impl CanonicalRequest {
    /// Decode the head of an HTTP request.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedRequest`] if the path or query does not
    /// decode to UTF-8.
    pub fn from_parts(parts: &http::request::Parts) -> Result<Self, AuthError> {
        Self::new(&parts.method, &parts.uri, &parts.headers)
    }

    /// Decode a request from its method, URI, and headers.
    pub fn new(
        method: &http::Method,
        uri: &http::Uri,
        headers: &http::HeaderMap,
    ) -> Result<Self, AuthError> {
        let raw_path = if uri.path().is_empty() {
            "/".to_owned()
        } else {
            uri.path().to_owned()
        };
        let path = decode_component(&raw_path)
            .map_err(|_| AuthError::MalformedRequest(format!("undecodable path: {raw_path}")))?
            .into_owned();

        let raw_query = uri.query().unwrap_or_default().to_owned();
        let mut query = Vec::new();
        for pair in raw_query.split('&').filter(|s| !s.is_empty()) {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let key = decode_component(k)
                .map_err(|_| AuthError::MalformedRequest(format!("undecodable query key: {k}")))?;
            let value = decode_component(v).map_err(|_| {
                AuthError::MalformedRequest(format!("undecodable query value for {key}"))
            })?;
            query.push((key.into_owned(), value.into_owned()));
        }
        query.sort_by(|a, b| a.0.cmp(&b.0));

        let mut collected: Vec<(String, String)> = Vec::with_capacity(headers.len());
        let mut opaque_headers = Vec::new();
        for (name, value) in headers {
            match std::str::from_utf8(value.as_bytes()) {
                Ok(v) => collected.push((name.as_str().to_owned(), v.to_owned())),
                Err(_) => opaque_headers.push(name.as_str().to_owned()),
            }
        }
        if !headers.contains_key(http::header::HOST) {
            if let Some(authority) = uri.authority() {
                collected.push(("host".to_owned(), authority.as_str().to_owned()));
            }
        }

        Ok(Self {
            method: method.clone(),
            raw_path,
            path,
            raw_query,
            query,
            headers: collected,
            opaque_headers,
        })
    }

    /// The HTTP method.
    #[must_use]
    pub fn method(&self) -> &http::Method {
        &self.method
    }

    /// The percent-decoded path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The path exactly as received.
    #[must_use]
    pub fn raw_path(&self) -> &str {
        &self.raw_path
    }

    /// The query string exactly as received.
    #[must_use]
    pub fn raw_query(&self) -> &str {
        &self.raw_query
    }

    /// Decoded query parameters, stably sorted by key.
    #[must_use]
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// First value of a query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether a query parameter is present, with or without a value.
    #[must_use]
    pub fn has_query_param(&self, name: &str) -> bool {
        self.query.iter().any(|(k, _)| k == name)
    }

    /// Lower-cased headers in their original order.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First value of a header; `name` must be lower-case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Build the full canonical request string for `request`.
///
/// `exclude_query` names a query parameter left out of the canonical query
/// string (`X-Amz-Signature` for presigned requests).
///
/// # Errors
///
/// Returns [`AuthError::MissingHeader`] if a signed header is absent and
/// [`AuthError::MalformedRequest`] if a signed header value is not UTF-8.
pub fn build_canonical_request(
    request: &CanonicalRequest,
    signed_headers: &[String],
    payload_hash: &str,
    exclude_query: Option<&str>,
) -> Result<String, AuthError> {
    if let Some(name) = signed_headers
        .iter()
        .find(|name| request.opaque_headers.contains(name))
    {
        return Err(AuthError::MalformedRequest(format!(
            "signed header {name} is not valid UTF-8"
        )));
    }

    let canonical_uri = canonical_uri(request.path());
    let canonical_query = canonical_query_string(request.query(), exclude_query);
    let canonical_headers = canonical_headers(request.headers(), signed_headers)?;
    let signed_headers_str = signed_headers_string(signed_headers);

    Ok(format!(
        "{}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n\n{signed_headers_str}\n{payload_hash}",
        request.method()
    ))
}

/// Encode a decoded path segment by segment.
///
/// Slashes are preserved and no dot-segment normalization takes place; an
/// empty path becomes `/`.
///
/// # Examples
///
/// ```
/// use s3gate_auth::canonical::canonical_uri;
///
/// assert_eq!(canonical_uri("/test$file.text"), "/test%24file.text");
/// assert_eq!(canonical_uri("/a b//c"), "/a%20b//c");
/// assert_eq!(canonical_uri(""), "/");
/// ```
#[must_use]
pub fn canonical_uri(decoded_path: &str) -> String {
    if decoded_path.is_empty() {
        return "/".to_owned();
    }
    decoded_path
        .split('/')
        .map(uri_encode)
        .collect::<Vec<_>>()
        .join("/")
}

/// Encode and sort decoded query parameters.
///
/// Each name and value is re-encoded with the SigV4 table, then the pairs
/// are sorted by encoded name and, for repeated names, by encoded value.
#[must_use]
pub fn canonical_query_string(params: &[(String, String)], exclude: Option<&str>) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .filter(|(k, _)| Some(k.as_str()) != exclude)
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    encoded.sort_unstable();

    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Build the canonical headers block for the signed header names.
///
/// Values of repeated headers are joined with commas in arrival order;
/// each value is trimmed and inner whitespace runs collapse to one space.
/// The block has no trailing newline.
///
/// # Errors
///
/// Returns [`AuthError::MissingHeader`] if a signed header is absent.
pub fn canonical_headers(
    headers: &[(String, String)],
    signed_headers: &[String],
) -> Result<String, AuthError> {
    let mut sorted: Vec<&str> = signed_headers.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut lines = Vec::with_capacity(sorted.len());
    for name in sorted {
        let values: Vec<String> = headers
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| collapse_whitespace(v.trim()))
            .collect();
        if values.is_empty() {
            return Err(AuthError::MissingHeader(name.to_owned()));
        }
        lines.push(format!("{name}:{}", values.join(",")));
    }

    Ok(lines.join("\n"))
}

/// Build the semicolon-separated, sorted signed headers list.
///
/// # Examples
///
/// ```
/// use s3gate_auth::canonical::signed_headers_string;
///
/// let names = vec!["x-amz-date".to_owned(), "host".to_owned()];
/// assert_eq!(signed_headers_string(&names), "host;x-amz-date");
/// ```
#[must_use]
pub fn signed_headers_string(signed_headers: &[String]) -> String {
    let mut sorted: Vec<&str> = signed_headers.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join(";")
}

/// Percent-decode once. Invalid escapes are kept literally.
fn decode_component(input: &str) -> Result<Cow<'_, str>, std::str::Utf8Error> {
    percent_decode_str(input).decode_utf8()
}

fn uri_encode(input: &str) -> String {
    utf8_percent_encode(input, URI_ENCODE_SET).to_string()
}

fn collapse_whitespace(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut prev_was_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !prev_was_space {
                result.push(' ');
            }
            prev_was_space = true;
        } else {
            result.push(ch);
            prev_was_space = false;
        }
    }
    result
}
