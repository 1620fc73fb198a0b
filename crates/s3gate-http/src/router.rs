//! S3 request routing: virtual hosting resolution and action identification.
//!
//! The [`S3Router`] maps a decoded request to the [`S3Action`] the ACL
//! enforcer authorizes, by examining:
//!
//! - The HTTP method (GET, PUT, DELETE, POST, HEAD)
//! - Whether a bucket name is present (from the Host header or path)
//! - Whether an object key is present (from the URI path)
//! - Query parameters naming sub-resources (e.g. `?acl`, `?uploads`)
//! - `x-amz-copy-source`, which turns a PUT into a copy
//!
//! Virtual hosting is supported: the bucket name can come from either the
//! `Host` header (e.g. `mybucket.s3.localhost`) or from the first path
//! segment (path-style).

use http::Method;
use s3gate_auth::CanonicalRequest;
use s3gate_model::S3Action;

use crate::acl::Resource;
use crate::error::PipelineError;

/// Sub-resources that exist in S3 but that the gateway does not serve.
const UNSUPPORTED_SUBRESOURCES: &[&str] = &[
    "accelerate",
    "analytics",
    "attributes",
    "cors",
    "delete",
    "encryption",
    "intelligent-tiering",
    "inventory",
    "legal-hold",
    "lifecycle",
    "location",
    "logging",
    "metrics",
    "notification",
    "object-lock",
    "ownershipControls",
    "policy",
    "policyStatus",
    "publicAccessBlock",
    "replication",
    "requestPayment",
    "restore",
    "retention",
    "select",
    "tagging",
    "torrent",
    "versioning",
    "versions",
    "website",
];

/// Configuration for S3 request routing.
#[derive(Debug, Clone)]
pub struct S3Router {
    /// The base domain for virtual-hosted-style requests (e.g., `s3.localhost`).
    pub domain: String,
    /// Whether to enable virtual-hosted-style bucket addressing.
    pub virtual_hosting: bool,
}

/// Where a request is going and what it wants to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingContext {
    /// The resolved bucket name, if any.
    pub bucket: Option<String>,
    /// The resolved object key, if any.
    pub key: Option<String>,
    /// The identified action.
    pub action: S3Action,
}

impl RoutingContext {
    /// The resource the ACL enforcer evaluates.
    #[must_use]
    pub fn resource(&self) -> Resource {
        Resource {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
        }
    }
}

impl S3Router {
    /// Create a new router with the given domain and virtual hosting setting.
    #[must_use]
    pub fn new(domain: impl Into<String>, virtual_hosting: bool) -> Self {
        Self {
            domain: domain.into(),
            virtual_hosting,
        }
    }

    /// Resolve a decoded request to its bucket, key, and action.
    ///
    /// # Errors
    ///
    /// [`PipelineError::MethodNotAllowed`] for methods S3 does not define on
    /// the addressed resource, and [`PipelineError::NotImplemented`] for
    /// sub-resources and operations the gateway does not serve.
    pub fn resolve(&self, request: &CanonicalRequest) -> Result<RoutingContext, PipelineError> {
        let virtual_bucket = if self.virtual_hosting {
            request
                .header("host")
                .and_then(|host| extract_virtual_host_bucket(host, &self.domain))
        } else {
            None
        };

        let path = request.path();
        let (bucket, key) = match virtual_bucket {
            // Virtual hosting: bucket comes from Host, entire path is the key.
            Some(bucket) => {
                let key = path.strip_prefix('/').unwrap_or(path);
                (Some(bucket), (!key.is_empty()).then(|| key.to_owned()))
            }
            None => parse_path(path),
        };

        let action = identify_action(request, bucket.is_some(), key.is_some())?;
        Ok(RoutingContext {
            bucket,
            key,
            action,
        })
    }
}

/// Extract the bucket name from a virtual-hosted-style Host header.
///
/// With domain `s3.localhost`, `mybucket.s3.localhost:4566` yields
/// `mybucket`.
fn extract_virtual_host_bucket(host: &str, domain: &str) -> Option<String> {
    let host = host.split(':').next().unwrap_or(host);
    let bucket = host.strip_suffix(domain)?.strip_suffix('.')?;
    (!bucket.is_empty()).then(|| bucket.to_owned())
}

/// Split a decoded path into `/{bucket}` and `/{bucket}/{key...}`.
fn parse_path(path: &str) -> (Option<String>, Option<String>) {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return (None, None);
    }
    match trimmed.split_once('/') {
        Some((bucket, key)) => (
            Some(bucket.to_owned()),
            (!key.is_empty()).then(|| key.to_owned()),
        ),
        None => (Some(trimmed.to_owned()), None),
    }
}

fn unsupported_subresource(request: &CanonicalRequest) -> Option<&'static str> {
    UNSUPPORTED_SUBRESOURCES
        .iter()
        .copied()
        .find(|name| request.has_query_param(name))
}

fn identify_action(
    request: &CanonicalRequest,
    has_bucket: bool,
    has_key: bool,
) -> Result<S3Action, PipelineError> {
    let method = request.method();
    match (has_bucket, has_key) {
        (false, false) if *method == Method::GET => Ok(S3Action::ListBuckets),
        (false, _) => Err(PipelineError::MethodNotAllowed(method.to_string())),
        (true, _) => {
            if let Some(name) = unsupported_subresource(request) {
                return Err(PipelineError::NotImplemented(format!("?{name}")));
            }
            if has_key {
                identify_object_action(request)
            } else {
                identify_bucket_action(request)
            }
        }
    }
}

fn identify_bucket_action(request: &CanonicalRequest) -> Result<S3Action, PipelineError> {
    let acl = request.has_query_param("acl");
    match *request.method() {
        Method::GET if acl => Ok(S3Action::GetBucketAcl),
        Method::GET if request.has_query_param("uploads") => Err(PipelineError::NotImplemented(
            "ListMultipartUploads".to_owned(),
        )),
        Method::GET => Ok(S3Action::ListObjects),
        Method::PUT if acl => Ok(S3Action::PutBucketAcl),
        Method::PUT => Ok(S3Action::CreateBucket),
        Method::DELETE => Ok(S3Action::DeleteBucket),
        Method::HEAD => Ok(S3Action::HeadBucket),
        Method::POST => Err(PipelineError::NotImplemented("PostObject".to_owned())),
        ref other => Err(PipelineError::MethodNotAllowed(other.to_string())),
    }
}

fn identify_object_action(request: &CanonicalRequest) -> Result<S3Action, PipelineError> {
    let acl = request.has_query_param("acl");
    let upload_id = request.has_query_param("uploadId");
    match *request.method() {
        Method::GET if acl => Ok(S3Action::GetObjectAcl),
        Method::GET if upload_id => Err(PipelineError::NotImplemented("ListParts".to_owned())),
        Method::GET => Ok(S3Action::GetObject),
        Method::HEAD => Ok(S3Action::HeadObject),
        Method::PUT if acl => Ok(S3Action::PutObjectAcl),
        Method::PUT if request.header("x-amz-copy-source").is_some() => {
            let operation = if upload_id { "UploadPartCopy" } else { "CopyObject" };
            Err(PipelineError::NotImplemented(operation.to_owned()))
        }
        Method::PUT if upload_id && request.has_query_param("partNumber") => {
            Ok(S3Action::UploadPart)
        }
        Method::PUT => Ok(S3Action::PutObject),
        Method::DELETE if upload_id => Ok(S3Action::AbortMultipartUpload),
        Method::DELETE => Ok(S3Action::DeleteObject),
        Method::POST if request.has_query_param("uploads") => Ok(S3Action::CreateMultipartUpload),
        Method::POST if upload_id => Ok(S3Action::CompleteMultipartUpload),
        Method::POST => Err(PipelineError::NotImplemented("POST on object".to_owned())),
        ref other => Err(PipelineError::MethodNotAllowed(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> S3Router {
        S3Router::new("s3.localhost", true)
    }

    fn request(method: &str, uri: &str, headers: &[(&str, &str)]) -> CanonicalRequest {
        let mut builder = http::Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (parts, ()) = builder.body(()).expect("valid request").into_parts();
        CanonicalRequest::from_parts(&parts).expect("decodable request")
    }

    fn route(method: &str, uri: &str) -> Result<RoutingContext, PipelineError> {
        router().resolve(&request(method, uri, &[("host", "localhost:7070")]))
    }

    #[test]
    fn test_should_route_list_buckets() {
        let ctx = route("GET", "/").expect("routed");
        assert_eq!(ctx.action, S3Action::ListBuckets);
        assert_eq!(ctx.resource(), Resource::service());
    }

    #[test]
    fn test_should_extract_bucket_and_key_from_virtual_host() {
        let req = request("GET", "/path/to/key.txt", &[("host", "photos.s3.localhost:7070")]);
        let ctx = router().resolve(&req).expect("routed");
        assert_eq!(ctx.bucket.as_deref(), Some("photos"));
        assert_eq!(ctx.key.as_deref(), Some("path/to/key.txt"));
        assert_eq!(ctx.action, S3Action::GetObject);
    }

    #[test]
    fn test_should_ignore_virtual_host_when_disabled() {
        let req = request("GET", "/photos", &[("host", "other.s3.localhost")]);
        let ctx = S3Router::new("s3.localhost", false)
            .resolve(&req)
            .expect("routed");
        assert_eq!(ctx.bucket.as_deref(), Some("photos"));
        assert_eq!(ctx.action, S3Action::ListObjects);
    }

    #[test]
    fn test_should_route_bucket_actions() {
        let cases = [
            ("GET", "/b", S3Action::ListObjects),
            ("GET", "/b?list-type=2&prefix=a", S3Action::ListObjects),
            ("GET", "/b?acl", S3Action::GetBucketAcl),
            ("PUT", "/b", S3Action::CreateBucket),
            ("PUT", "/b?acl", S3Action::PutBucketAcl),
            ("DELETE", "/b", S3Action::DeleteBucket),
            ("HEAD", "/b", S3Action::HeadBucket),
        ];
        for (method, uri, expected) in cases {
            assert_eq!(route(method, uri).expect("routed").action, expected, "{method} {uri}");
        }
    }

    #[test]
    fn test_should_route_object_actions() {
        let cases = [
            ("GET", "/b/k", S3Action::GetObject),
            ("GET", "/b/k?acl", S3Action::GetObjectAcl),
            ("HEAD", "/b/k", S3Action::HeadObject),
            ("PUT", "/b/k", S3Action::PutObject),
            ("PUT", "/b/k?acl", S3Action::PutObjectAcl),
            ("PUT", "/b/k?partNumber=1&uploadId=u", S3Action::UploadPart),
            ("DELETE", "/b/k", S3Action::DeleteObject),
            ("DELETE", "/b/k?uploadId=u", S3Action::AbortMultipartUpload),
            ("POST", "/b/k?uploads", S3Action::CreateMultipartUpload),
            ("POST", "/b/k?uploadId=u", S3Action::CompleteMultipartUpload),
        ];
        for (method, uri, expected) in cases {
            assert_eq!(route(method, uri).expect("routed").action, expected, "{method} {uri}");
        }
    }

    #[test]
    fn test_should_decode_percent_encoded_key() {
        let ctx = route("GET", "/b/my%20file%2B1.txt").expect("routed");
        assert_eq!(ctx.key.as_deref(), Some("my file+1.txt"));
    }

    #[test]
    fn test_should_reject_copy_and_unknown_subresources() {
        let copy = request(
            "PUT",
            "/b/k",
            &[("host", "localhost"), ("x-amz-copy-source", "/b/other")],
        );
        assert!(matches!(
            router().resolve(&copy),
            Err(PipelineError::NotImplemented(_))
        ));
        assert!(matches!(
            route("GET", "/b?versioning"),
            Err(PipelineError::NotImplemented(_))
        ));
        assert!(matches!(
            route("PUT", "/b/k?tagging"),
            Err(PipelineError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_should_reject_methods_outside_s3() {
        assert!(matches!(
            route("PATCH", "/b/k"),
            Err(PipelineError::MethodNotAllowed(_))
        ));
        assert!(matches!(
            route("PUT", "/"),
            Err(PipelineError::MethodNotAllowed(_))
        ));
    }
}
