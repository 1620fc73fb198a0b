//! In-memory bucket and object store served behind the gateway.
//!
//! [`MemoryStore`] is both the ACL [`Backend`] the pipeline consults and,
//! through [`MemoryHandler`], the [`S3Handler`] the pipeline dispatches to.
//! Every handler reads the request body to its end before touching state,
//! so a body that fails verification never changes the store.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use http::request::Parts;
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use http_body_util::BodyExt;
use md5::{Digest, Md5};
use percent_encoding::percent_decode_str;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesText, Event};
use s3gate_auth::Identity;
use s3gate_http::backend::{Backend, BackendError};
use s3gate_http::body::{RequestBody, S3ResponseBody};
use s3gate_http::dispatch::{DispatchContext, DispatchError, HandlerFuture, S3Handler};
use s3gate_model::{AclMetadata, CannedAcl, GrantEffect, Grantee, Owner, S3Action, S3Error, S3ErrorCode};
use tracing::debug;

const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    content_type: Option<String>,
    last_modified: DateTime<Utc>,
    acl: AclMetadata,
}

#[derive(Debug)]
struct Bucket {
    acl: AclMetadata,
    created: DateTime<Utc>,
    objects: BTreeMap<String, StoredObject>,
}

/// Buckets and objects kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: DashMap<String, Bucket>,
}

#[async_trait]
impl Backend for MemoryStore {
    async fn get_bucket_acl(&self, bucket: &str) -> Result<AclMetadata, BackendError> {
        self.buckets
            .get(bucket)
            .map(|b| b.acl.clone())
            .ok_or_else(|| BackendError::NoSuchBucket(bucket.to_owned()))
    }

    async fn get_object_acl(&self, bucket: &str, key: &str) -> Result<AclMetadata, BackendError> {
        let entry = self
            .buckets
            .get(bucket)
            .ok_or_else(|| BackendError::NoSuchBucket(bucket.to_owned()))?;
        entry
            .objects
            .get(key)
            .map(|o| o.acl.clone())
            .ok_or_else(|| BackendError::NoSuchKey {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            })
    }
}

impl MemoryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn execute(
        &self,
        request: Request<RequestBody>,
        ctx: DispatchContext,
    ) -> Result<Response<S3ResponseBody>, DispatchError> {
        let (parts, body) = request.into_parts();
        let body = body.collect().await?.to_bytes();

        let routing = &ctx.routing;
        let bucket = routing.bucket.as_deref().unwrap_or_default();
        let key = routing.key.as_deref().unwrap_or_default();
        let owner = owner_of(&ctx.identity);
        debug!(request_id = %ctx.request_id, action = %routing.action, bucket, key, "memory store");

        let response = match routing.action {
            S3Action::ListBuckets => self.list_buckets(&owner)?,
            S3Action::CreateBucket => self.create_bucket(bucket, owner, &parts.headers)?,
            S3Action::DeleteBucket => self.delete_bucket(bucket)?,
            S3Action::HeadBucket => {
                self.with_bucket(bucket, |_| ())?;
                empty(StatusCode::OK)
            }
            S3Action::ListObjects => self.list_objects(bucket, &parts)?,
            S3Action::GetBucketAcl => {
                let acl = self.with_bucket(bucket, |b| b.acl.clone())?;
                xml_response(&acl_xml(&acl)?)
            }
            S3Action::PutBucketAcl => {
                let canned = required_canned_acl(&parts.headers)?;
                self.with_bucket_mut(bucket, |b| {
                    b.acl = AclMetadata::canned(b.acl.owner.clone(), canned);
                })?;
                empty(StatusCode::OK)
            }
            S3Action::GetObject => {
                let object = self.object(bucket, key)?;
                let mut response = object_response(&object);
                *response.body_mut() = S3ResponseBody::from_bytes(object.data);
                response
            }
            S3Action::HeadObject => object_response(&self.object(bucket, key)?),
            S3Action::PutObject => self.put_object(bucket, key, owner, &parts.headers, body)?,
            S3Action::DeleteObject => {
                self.with_bucket_mut(bucket, |b| {
                    b.objects.remove(key);
                })?;
                empty(StatusCode::NO_CONTENT)
            }
            S3Action::GetObjectAcl => xml_response(&acl_xml(&self.object(bucket, key)?.acl)?),
            S3Action::PutObjectAcl => {
                let canned = required_canned_acl(&parts.headers)?;
                self.with_bucket_mut(bucket, |b| {
                    b.objects.get_mut(key).map(|o| {
                        o.acl = AclMetadata::canned(o.acl.owner.clone(), canned);
                    })
                })?
                .ok_or_else(|| S3Error::no_such_key(key))?;
                empty(StatusCode::OK)
            }
            S3Action::CreateMultipartUpload
            | S3Action::UploadPart
            | S3Action::CompleteMultipartUpload
            | S3Action::AbortMultipartUpload => {
                return Err(S3Error::not_implemented(routing.action.as_str()).into());
            }
        };
        Ok(response)
    }

    fn with_bucket<T>(&self, bucket: &str, f: impl FnOnce(&Bucket) -> T) -> Result<T, S3Error> {
        self.buckets
            .get(bucket)
            .map(|b| f(&b))
            .ok_or_else(|| S3Error::no_such_bucket(bucket))
    }

    fn with_bucket_mut<T>(
        &self,
        bucket: &str,
        f: impl FnOnce(&mut Bucket) -> T,
    ) -> Result<T, S3Error> {
        self.buckets
            .get_mut(bucket)
            .map(|mut b| f(&mut b))
            .ok_or_else(|| S3Error::no_such_bucket(bucket))
    }

    fn object(&self, bucket: &str, key: &str) -> Result<StoredObject, S3Error> {
        self.with_bucket(bucket, |b| b.objects.get(key).cloned())?
            .ok_or_else(|| S3Error::no_such_key(key))
    }

    fn create_bucket(
        &self,
        bucket: &str,
        owner: Owner,
        headers: &HeaderMap,
    ) -> Result<Response<S3ResponseBody>, S3Error> {
        let canned = canned_acl(headers)?.unwrap_or_default();
        match self.buckets.entry(bucket.to_owned()) {
            Entry::Occupied(_) => Err(S3Error::new(S3ErrorCode::BucketAlreadyOwnedByYou)
                .with_resource(bucket)),
            Entry::Vacant(slot) => {
                slot.insert(Bucket {
                    acl: AclMetadata::canned(owner, canned),
                    created: Utc::now(),
                    objects: BTreeMap::new(),
                });
                let mut response = empty(StatusCode::OK);
                if let Ok(location) = HeaderValue::from_str(&format!("/{bucket}")) {
                    response.headers_mut().insert(http::header::LOCATION, location);
                }
                Ok(response)
            }
        }
    }

    fn delete_bucket(&self, bucket: &str) -> Result<Response<S3ResponseBody>, S3Error> {
        match self.buckets.entry(bucket.to_owned()) {
            Entry::Vacant(_) => Err(S3Error::no_such_bucket(bucket)),
            Entry::Occupied(entry) if !entry.get().objects.is_empty() => {
                Err(S3Error::new(S3ErrorCode::BucketNotEmpty).with_resource(bucket))
            }
            Entry::Occupied(entry) => {
                entry.remove();
                Ok(empty(StatusCode::NO_CONTENT))
            }
        }
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        owner: Owner,
        headers: &HeaderMap,
        data: Bytes,
    ) -> Result<Response<S3ResponseBody>, S3Error> {
        let canned = canned_acl(headers)?.unwrap_or_default();
        let etag = format!("\"{}\"", hex::encode(Md5::digest(&data)));
        let object = StoredObject {
            data,
            etag: etag.clone(),
            content_type: headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
            last_modified: Utc::now(),
            acl: AclMetadata::canned(owner, canned),
        };
        self.with_bucket_mut(bucket, |b| {
            b.objects.insert(key.to_owned(), object);
        })?;

        let mut response = empty(StatusCode::OK);
        if let Ok(value) = HeaderValue::from_str(&etag) {
            response.headers_mut().insert(ETAG, value);
        }
        Ok(response)
    }

    fn list_buckets(&self, owner: &Owner) -> Result<Response<S3ResponseBody>, S3Error> {
        let mut buckets: Vec<(String, DateTime<Utc>)> = self
            .buckets
            .iter()
            .filter(|b| b.acl.owner.id == owner.id)
            .map(|b| (b.key().clone(), b.created))
            .collect();
        buckets.sort();

        let xml = to_xml(|w| {
            w.create_element("ListAllMyBucketsResult")
                .with_attribute(("xmlns", S3_XMLNS))
                .write_inner_content(|w| {
                    write_owner(w, owner)?;
                    w.create_element("Buckets").write_inner_content(|w| {
                        for (name, created) in &buckets {
                            w.create_element("Bucket").write_inner_content(|w| {
                                text(w, "Name", name)?;
                                text(w, "CreationDate", &timestamp(created))
                            })?;
                        }
                        Ok(())
                    })?;
                    Ok(())
                })?;
            Ok(())
        })?;
        Ok(xml_response(&xml))
    }

    fn list_objects(&self, bucket: &str, parts: &Parts) -> Result<Response<S3ResponseBody>, S3Error> {
        let prefix = query_value(parts, "prefix").unwrap_or_default();
        let max_keys = query_value(parts, "max-keys")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(1000);
        let v2 = query_value(parts, "list-type").as_deref() == Some("2");

        let (objects, truncated) = self.with_bucket(bucket, |b| {
            let mut matching = b
                .objects
                .iter()
                .filter(|(k, _)| k.starts_with(&prefix))
                .map(|(k, o)| (k.clone(), o.etag.clone(), o.data.len(), o.last_modified));
            let page: Vec<_> = matching.by_ref().take(max_keys).collect();
            let truncated = matching.next().is_some();
            (page, truncated)
        })?;

        let xml = to_xml(|w| {
            w.create_element("ListBucketResult")
                .with_attribute(("xmlns", S3_XMLNS))
                .write_inner_content(|w| {
                    text(w, "Name", bucket)?;
                    text(w, "Prefix", &prefix)?;
                    if v2 {
                        text(w, "KeyCount", &objects.len().to_string())?;
                    }
                    text(w, "MaxKeys", &max_keys.to_string())?;
                    text(w, "IsTruncated", if truncated { "true" } else { "false" })?;
                    for (key, etag, size, modified) in &objects {
                        w.create_element("Contents").write_inner_content(|w| {
                            text(w, "Key", key)?;
                            text(w, "LastModified", &timestamp(modified))?;
                            text(w, "ETag", etag)?;
                            text(w, "Size", &size.to_string())?;
                            text(w, "StorageClass", "STANDARD")
                        })?;
                    }
                    Ok(())
                })?;
            Ok(())
        })?;
        Ok(xml_response(&xml))
    }
}

/// [`S3Handler`] over a shared [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryHandler {
    store: Arc<MemoryStore>,
}

impl MemoryHandler {
    /// Serve requests from `store`.
    #[must_use]
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

impl S3Handler for MemoryHandler {
    fn handle(&self, request: Request<RequestBody>, ctx: DispatchContext) -> HandlerFuture {
        let store = Arc::clone(&self.store);
        Box::pin(async move { store.execute(request, ctx).await })
    }
}

fn owner_of(identity: &Identity) -> Owner {
    match identity.principal() {
        Some(principal) => Owner::new(principal.canonical_id.clone(), principal.display_name.clone()),
        None => Owner::new(identity.canonical_id(), identity.canonical_id()),
    }
}

fn canned_acl(headers: &HeaderMap) -> Result<Option<CannedAcl>, S3Error> {
    headers
        .get("x-amz-acl")
        .map(|value| {
            value
                .to_str()
                .ok()
                .and_then(|v| v.parse::<CannedAcl>().ok())
                .ok_or_else(|| S3Error::invalid_argument("unsupported x-amz-acl value"))
        })
        .transpose()
}

fn required_canned_acl(headers: &HeaderMap) -> Result<CannedAcl, S3Error> {
    canned_acl(headers)?.ok_or_else(|| S3Error::not_implemented("ACL documents; use x-amz-acl"))
}

fn query_value(parts: &Parts, name: &str) -> Option<String> {
    parts.uri.query()?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        (k == name).then(|| percent_decode_str(v).decode_utf8_lossy().into_owned())
    })
}

fn timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn empty(status: StatusCode) -> Response<S3ResponseBody> {
    let mut response = Response::new(S3ResponseBody::empty());
    *response.status_mut() = status;
    response
}

fn object_response(object: &StoredObject) -> Response<S3ResponseBody> {
    let mut response = empty(StatusCode::OK);
    let headers = response.headers_mut();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(object.data.len()));
    if let Ok(etag) = HeaderValue::from_str(&object.etag) {
        headers.insert(ETAG, etag);
    }
    let modified = object.last_modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    if let Ok(modified) = HeaderValue::from_str(&modified) {
        headers.insert(LAST_MODIFIED, modified);
    }
    let content_type = object
        .content_type
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(CONTENT_TYPE, content_type);
    response
}

fn xml_response(xml: &[u8]) -> Response<S3ResponseBody> {
    let mut response = empty(StatusCode::OK);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/xml"));
    *response.body_mut() = S3ResponseBody::from_bytes(Bytes::copy_from_slice(xml));
    response
}

type XmlWriter<'a> = Writer<&'a mut Vec<u8>>;

fn to_xml(write: impl FnOnce(&mut XmlWriter<'_>) -> io::Result<()>) -> Result<Vec<u8>, S3Error> {
    let mut buf = Vec::with_capacity(512);
    {
        let mut writer = Writer::new(&mut buf);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .and_then(|()| write(&mut writer))
            .map_err(|e| S3Error::internal_error(format!("failed to write XML: {e}")))?;
    }
    Ok(buf)
}

fn text(w: &mut XmlWriter<'_>, name: &str, value: &str) -> io::Result<()> {
    w.create_element(name)
        .write_text_content(BytesText::new(value))?;
    Ok(())
}

fn write_owner(w: &mut XmlWriter<'_>, owner: &Owner) -> io::Result<()> {
    w.create_element("Owner").write_inner_content(|w| {
        text(w, "ID", &owner.id)?;
        text(w, "DisplayName", &owner.display_name)
    })?;
    Ok(())
}

fn acl_xml(acl: &AclMetadata) -> Result<Vec<u8>, S3Error> {
    to_xml(|w| {
        w.create_element("AccessControlPolicy")
            .with_attribute(("xmlns", S3_XMLNS))
            .write_inner_content(|w| {
                write_owner(w, &acl.owner)?;
                w.create_element("AccessControlList").write_inner_content(|w| {
                    for grant in acl.grants.iter().filter(|g| g.effect == GrantEffect::Allow) {
                        w.create_element("Grant").write_inner_content(|w| {
                            w.create_element("Grantee").write_inner_content(|w| match &grant.grantee {
                                Grantee::CanonicalUser { id } => text(w, "ID", id),
                                Grantee::Group { uri } => text(w, "URI", uri),
                            })?;
                            text(w, "Permission", grant.permission.as_str())
                        })?;
                    }
                    Ok(())
                })?;
                Ok(())
            })?;
        Ok(())
    })
}
