//! S3-shaped XML error responses and common response headers.

use std::io;

use bytes::Bytes;
use http::HeaderValue;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesText, Event};
use s3gate_model::error::S3Error;

use crate::body::S3ResponseBody;

/// Value of the `Server` header.
pub const SERVER_NAME: &str = "s3gate";

/// Header carrying the gateway request id.
pub const REQUEST_ID_HEADER: &str = "x-amz-request-id";

/// Format an S3 error as XML.
///
/// S3 errors are a flat `<Error>` element without an outer wrapper:
///
/// ```xml
/// <?xml version="1.0" encoding="UTF-8"?>
/// <Error>
///   <Code>SignatureDoesNotMatch</Code>
///   <Message>...</Message>
///   <Resource>/mybucket/key</Resource>
///   <RequestId>5f1c...</RequestId>
/// </Error>
/// ```
#[must_use]
pub fn error_to_xml(code: &str, message: &str, resource: Option<&str>, request_id: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    if let Err(e) = write_error_xml(&mut buf, code, message, resource, request_id) {
        tracing::error!(error = %e, "failed to serialize S3 error XML");
        buf.clear();
    }
    buf
}

fn write_error_xml(
    buf: &mut Vec<u8>,
    code: &str,
    message: &str,
    resource: Option<&str>,
    request_id: &str,
) -> io::Result<()> {
    let mut writer = Writer::new(buf);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.create_element("Error").write_inner_content(|w| {
        w.create_element("Code")
            .write_text_content(BytesText::new(code))?;
        w.create_element("Message")
            .write_text_content(BytesText::new(message))?;
        if let Some(res) = resource {
            w.create_element("Resource")
                .write_text_content(BytesText::new(res))?;
        }
        w.create_element("RequestId")
            .write_text_content(BytesText::new(request_id))?;
        Ok(())
    })?;
    Ok(())
}

/// Convert an [`S3Error`] into an XML error response.
#[must_use]
pub fn error_to_response(err: &S3Error, request_id: &str) -> http::Response<S3ResponseBody> {
    let xml_bytes = error_to_xml(
        err.code.as_str(),
        &err.message,
        err.resource.as_deref(),
        request_id,
    );
    http::Response::builder()
        .status(err.status_code)
        .header(http::header::CONTENT_TYPE, "application/xml")
        .body(S3ResponseBody::from_bytes(Bytes::from(xml_bytes)))
        .unwrap_or_else(|_| {
            http::Response::builder()
                .status(http::StatusCode::INTERNAL_SERVER_ERROR)
                .body(S3ResponseBody::empty())
                .expect("static response should be valid")
        })
}

/// Add the headers every gateway response carries.
pub fn add_common_headers<B>(response: &mut http::Response<B>, request_id: &str) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    headers.insert(http::header::SERVER, HeaderValue::from_static(SERVER_NAME));
}

/// Add permissive CORS headers.
pub fn add_cors_headers<B>(response: &mut http::Response<B>) {
    let headers = response.headers_mut();
    headers.insert(
        http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        http::header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, PUT, POST, DELETE, HEAD, OPTIONS"),
    );
    headers.insert(
        http::header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        http::header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("ETag, x-amz-request-id, x-amz-version-id"),
    );
}

#[cfg(test)]
mod tests {
    use s3gate_model::error::S3ErrorCode;

    use super::*;

    #[test]
    fn test_should_format_error_with_resource() {
        let xml = error_to_xml(
            "SignatureDoesNotMatch",
            "The request signature we calculated does not match",
            Some("/photos/cat.jpg"),
            "req-1",
        );
        let xml = std::str::from_utf8(&xml).expect("valid UTF-8");
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<Code>SignatureDoesNotMatch</Code>"));
        assert!(xml.contains("<Resource>/photos/cat.jpg</Resource>"));
        assert!(xml.contains("<RequestId>req-1</RequestId>"));
    }

    #[test]
    fn test_should_escape_special_characters() {
        let xml = error_to_xml("InvalidArgument", "a < b & c", None, "req-2");
        let xml = std::str::from_utf8(&xml).expect("valid UTF-8");
        assert!(xml.contains("a &lt; b &amp; c"));
        assert!(!xml.contains("<Resource>"));
    }

    #[test]
    fn test_should_build_error_response_with_status() {
        let err = S3Error::new(S3ErrorCode::AccessDenied);
        let mut response = error_to_response(&err, "req-3");
        add_common_headers(&mut response, "req-3");
        assert_eq!(response.status(), http::StatusCode::FORBIDDEN);
        assert_eq!(
            response
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok()),
            Some("req-3")
        );
        assert_eq!(
            response
                .headers()
                .get(http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("application/xml")
        );
    }
}
