//! ACL enforcement.
//!
//! [`AclEnforcer::decide`] turns the caller's identity, the target resource
//! and the requested action into an [`AccessDecision`]. Evaluation order:
//!
//! 1. read-only mode denies every mutating action;
//! 2. root and admin principals bypass ACLs;
//! 3. service-level actions only require an authenticated caller;
//! 4. the resource owner is always allowed;
//! 5. an explicit deny beats an explicit allow, and no match is a deny.
//!
//! Grants to the `AllUsers` group (or to the canonical id `anyone`) match
//! only the anonymous caller, and are ignored when the resource blocks
//! public access.

use std::sync::Arc;

use s3gate_auth::credentials::ANONYMOUS_PRINCIPAL;
use s3gate_auth::{Identity, IdentityService};
use s3gate_core::{GatewayConfig, TtlCache};
use s3gate_model::acl::AUTHENTICATED_USERS_GROUP;
use s3gate_model::{AclMetadata, ActionTarget, Grant, GrantEffect, Grantee, Permission, S3Action};
use tracing::debug;

use crate::backend::{Backend, BackendError};
use crate::error::PipelineError;

/// The bucket and key a request addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Resource {
    /// Bucket name, absent for service-level requests.
    pub bucket: Option<String>,
    /// Object key, absent for bucket-level requests.
    pub key: Option<String>,
}

impl Resource {
    /// The service root.
    #[must_use]
    pub fn service() -> Self {
        Self::default()
    }

    /// A bucket.
    #[must_use]
    pub fn bucket(bucket: impl Into<String>) -> Self {
        Self {
            bucket: Some(bucket.into()),
            key: None,
        }
    }

    /// An object.
    #[must_use]
    pub fn object(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: Some(bucket.into()),
            key: Some(key.into()),
        }
    }
}

/// Outcome of an ACL evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// The rule that decided, for audit.
    pub matched_rule: Option<String>,
    /// Why the request was denied.
    pub deny_reason: Option<String>,
}

impl AccessDecision {
    fn allow(rule: impl Into<String>) -> Self {
        Self {
            allowed: true,
            matched_rule: Some(rule.into()),
            deny_reason: None,
        }
    }

    fn deny(rule: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            matched_rule: rule,
            deny_reason: Some(reason.into()),
        }
    }
}

type AclCacheKey = (String, Option<String>);

/// Evaluates ACLs against backend metadata.
pub struct AclEnforcer {
    backend: Arc<dyn Backend>,
    identities: Arc<dyn IdentityService>,
    cache: TtlCache<AclCacheKey, AclMetadata>,
    read_only: bool,
}

impl std::fmt::Debug for AclEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AclEnforcer")
            .field("cache", &self.cache)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl AclEnforcer {
    /// Create an enforcer whose metadata cache follows `config`.
    pub fn new(
        backend: Arc<dyn Backend>,
        identities: Arc<dyn IdentityService>,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            backend,
            identities,
            cache: TtlCache::new(config.acl_cache_ttl()),
            read_only: config.read_only,
        }
    }

    /// Decide whether `identity` may perform `action` on `resource`.
    ///
    /// # Errors
    ///
    /// Fails when the metadata cannot be fetched: a missing bucket, or an
    /// unreachable backend or identity service. A denial is an `Ok` decision.
    pub async fn decide(
        &self,
        identity: &Identity,
        resource: &Resource,
        action: S3Action,
    ) -> Result<AccessDecision, PipelineError> {
        if self.read_only && action.is_mutating() {
            return Ok(AccessDecision::deny(
                Some("read-only".to_owned()),
                format!("{action} is not allowed in read-only mode"),
            ));
        }

        if identity.principal().is_some_and(|p| p.bypasses_acl()) {
            return Ok(AccessDecision::allow("admin"));
        }

        let target = action.target();
        if target == ActionTarget::Service {
            return Ok(if identity.is_anonymous() {
                AccessDecision::deny(None, format!("{action} requires authentication"))
            } else {
                AccessDecision::allow("authenticated")
            });
        }

        let bucket = resource.bucket.as_deref().ok_or_else(|| {
            PipelineError::MalformedRequest(format!("{action} requires a bucket"))
        })?;

        let (metadata, required) = match (target, resource.key.as_deref()) {
            (ActionTarget::Object, Some(key)) => match self.metadata(bucket, Some(key)).await {
                Ok(metadata) => (metadata, action.required_permission()),
                // A missing key is decided by the bucket. Reads need bucket
                // READ so the backend can answer NoSuchKey; writes need the
                // action's own permission on the bucket.
                Err(BackendError::NoSuchKey { .. }) => (
                    self.metadata(bucket, None).await.map_err(backend_error)?,
                    missing_key_permission(action),
                ),
                Err(err) => return Err(backend_error(err)),
            },
            _ => (
                self.metadata(bucket, None).await.map_err(backend_error)?,
                action.required_permission(),
            ),
        };

        self.evaluate(identity, &metadata, required, action).await
    }

    /// Drop cached metadata for `resource`.
    pub fn invalidate(&self, resource: &Resource) {
        if let Some(bucket) = &resource.bucket {
            self.cache.invalidate(&(bucket.clone(), resource.key.clone()));
        }
    }

    async fn metadata(&self, bucket: &str, key: Option<&str>) -> Result<AclMetadata, BackendError> {
        let cache_key = (bucket.to_owned(), key.map(str::to_owned));
        if let Some(cached) = self.cache.get(&cache_key) {
            return Ok(cached);
        }

        let metadata = match key {
            Some(key) => self.backend.get_object_acl(bucket, key).await?,
            None => self.backend.get_bucket_acl(bucket).await?,
        };
        self.cache.insert(cache_key, metadata.clone());
        Ok(metadata)
    }

    async fn evaluate(
        &self,
        identity: &Identity,
        metadata: &AclMetadata,
        required: Permission,
        action: S3Action,
    ) -> Result<AccessDecision, PipelineError> {
        if !identity.is_anonymous() && metadata.owner.id == identity.canonical_id() {
            return Ok(AccessDecision::allow("owner"));
        }

        let groups = self.groups_for(identity, metadata).await?;
        let applicable = metadata.grants.iter().filter(|grant| {
            grant.permission.covers(required)
                && grantee_matches(&grant.grantee, identity, &groups, metadata.block_public_access)
        });

        let mut allowed_by: Option<&Grant> = None;
        for grant in applicable {
            match grant.effect {
                GrantEffect::Deny => {
                    debug!(%grant, %action, "explicit deny");
                    return Ok(AccessDecision::deny(
                        Some(grant.to_string()),
                        format!("{action} explicitly denied"),
                    ));
                }
                GrantEffect::Allow => {
                    allowed_by.get_or_insert(grant);
                }
            }
        }

        Ok(match allowed_by {
            Some(grant) => AccessDecision::allow(grant.to_string()),
            None => AccessDecision::deny(None, format!("no grant allows {action}")),
        })
    }

    async fn groups_for(
        &self,
        identity: &Identity,
        metadata: &AclMetadata,
    ) -> Result<Vec<String>, PipelineError> {
        let Some(principal) = identity.principal() else {
            return Ok(Vec::new());
        };
        let needs_lookup = metadata.grants.iter().any(|grant| {
            matches!(&grant.grantee, Grantee::Group { uri }
                if !grant.grantee.is_public() && uri != AUTHENTICATED_USERS_GROUP)
        });
        if !needs_lookup {
            return Ok(Vec::new());
        }
        self.identities
            .list_principal_groups(principal)
            .await
            .map_err(|err| PipelineError::ServiceUnavailable(err.to_string()))
    }
}

fn missing_key_permission(action: S3Action) -> Permission {
    if action.is_mutating() {
        action.required_permission()
    } else {
        Permission::Read
    }
}

fn backend_error(err: BackendError) -> PipelineError {
    match err {
        BackendError::NoSuchBucket(bucket) => PipelineError::NoSuchBucket(bucket),
        BackendError::NoSuchKey { bucket, key } => PipelineError::NoSuchKey(format!("{bucket}/{key}")),
        BackendError::Unavailable(msg) => PipelineError::ServiceUnavailable(msg),
    }
}

fn grantee_matches(
    grantee: &Grantee,
    identity: &Identity,
    groups: &[String],
    block_public_access: bool,
) -> bool {
    match grantee {
        Grantee::CanonicalUser { id } if id == ANONYMOUS_PRINCIPAL => {
            identity.is_anonymous() && !block_public_access
        }
        Grantee::CanonicalUser { id } => {
            !identity.is_anonymous() && id == identity.canonical_id()
        }
        g if g.is_public() => identity.is_anonymous() && !block_public_access,
        Grantee::Group { uri } if uri == AUTHENTICATED_USERS_GROUP => !identity.is_anonymous(),
        Grantee::Group { uri } => groups.iter().any(|g| g == uri),
    }
}

#[cfg(test)]
mod tests {
    use s3gate_auth::{Principal, Role};
    use s3gate_model::{CannedAcl, Owner};

    use super::*;
    use crate::testing::{TestBackend, test_config, test_identities};

    fn user(id: &str) -> Identity {
        Identity::Authenticated {
            access_key_id: format!("AK-{id}"),
            principal: Principal::user(id, id),
        }
    }

    fn enforcer(backend: TestBackend) -> AclEnforcer {
        AclEnforcer::new(Arc::new(backend), test_identities(), &test_config())
    }

    #[tokio::test]
    async fn test_should_allow_owner_regardless_of_grants() {
        let mut acl = AclMetadata::private(Owner::new("alice", "alice"));
        acl.grants.clear();
        let enforcer = enforcer(TestBackend::default().with_bucket("photos", acl));
        let decision = enforcer
            .decide(&user("alice"), &Resource::bucket("photos"), S3Action::DeleteBucket)
            .await
            .expect("decision");
        assert!(decision.allowed);
        assert_eq!(decision.matched_rule.as_deref(), Some("owner"));
    }

    #[tokio::test]
    async fn test_should_prefer_explicit_deny_over_allow() {
        let mut acl = AclMetadata::private(Owner::new("alice", "alice"));
        acl.grants.push(Grant::allow(Grantee::user("bob"), Permission::Write));
        acl.grants.push(Grant::deny(Grantee::user("bob"), Permission::Write));
        let enforcer = enforcer(TestBackend::default().with_bucket("photos", acl));
        let decision = enforcer
            .decide(&user("bob"), &Resource::object("photos", "a.jpg"), S3Action::PutObject)
            .await
            .expect("decision");
        assert!(!decision.allowed);
        assert!(decision.matched_rule.is_some_and(|r| r.starts_with("deny")));
    }

    #[tokio::test]
    async fn test_should_deny_without_matching_grant() {
        let acl = AclMetadata::private(Owner::new("alice", "alice"));
        let enforcer = enforcer(TestBackend::default().with_bucket("photos", acl));
        let decision = enforcer
            .decide(&user("bob"), &Resource::bucket("photos"), S3Action::ListObjects)
            .await
            .expect("decision");
        assert!(!decision.allowed);
        assert!(decision.matched_rule.is_none());
    }

    #[tokio::test]
    async fn test_should_apply_public_grants_only_to_anonymous() {
        let acl = AclMetadata::canned(Owner::new("alice", "alice"), CannedAcl::PublicRead);
        let enforcer = enforcer(TestBackend::default().with_bucket("site", acl));
        let resource = Resource::bucket("site");

        let anonymous = enforcer
            .decide(&Identity::Anonymous, &resource, S3Action::ListObjects)
            .await
            .expect("decision");
        assert!(anonymous.allowed);

        let bob = enforcer
            .decide(&user("bob"), &resource, S3Action::ListObjects)
            .await
            .expect("decision");
        assert!(!bob.allowed);
    }

    #[tokio::test]
    async fn test_should_ignore_public_grants_when_blocked() {
        let mut acl = AclMetadata::canned(Owner::new("alice", "alice"), CannedAcl::PublicRead);
        acl.block_public_access = true;
        let enforcer = enforcer(TestBackend::default().with_bucket("site", acl));
        let decision = enforcer
            .decide(&Identity::Anonymous, &Resource::bucket("site"), S3Action::ListObjects)
            .await
            .expect("decision");
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn test_should_match_authenticated_users_group() {
        let acl = AclMetadata::canned(Owner::new("alice", "alice"), CannedAcl::AuthenticatedRead);
        let enforcer = enforcer(TestBackend::default().with_bucket("docs", acl));
        let resource = Resource::bucket("docs");
        assert!(
            enforcer
                .decide(&user("bob"), &resource, S3Action::ListObjects)
                .await
                .expect("decision")
                .allowed
        );
        assert!(
            !enforcer
                .decide(&Identity::Anonymous, &resource, S3Action::ListObjects)
                .await
                .expect("decision")
                .allowed
        );
    }

    #[tokio::test]
    async fn test_should_match_custom_group_membership() {
        let mut acl = AclMetadata::private(Owner::new("alice", "alice"));
        acl.grants.push(Grant::allow(
            Grantee::group("urn:s3gate:group:auditors"),
            Permission::ReadAcp,
        ));
        let enforcer = enforcer(TestBackend::default().with_bucket("docs", acl));
        let decision = enforcer
            .decide(&user("carol"), &Resource::bucket("docs"), S3Action::GetBucketAcl)
            .await
            .expect("decision");
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_should_deny_mutations_in_read_only_mode_even_for_admin() {
        let acl = AclMetadata::private(Owner::new("alice", "alice"));
        let backend = TestBackend::default().with_bucket("photos", acl);
        let mut config = test_config();
        config.read_only = true;
        let enforcer = AclEnforcer::new(Arc::new(backend), test_identities(), &config);
        let admin = Identity::Authenticated {
            access_key_id: "root".to_owned(),
            principal: Principal::user("root", "root").with_role(Role::Root),
        };
        let decision = enforcer
            .decide(&admin, &Resource::object("photos", "x"), S3Action::PutObject)
            .await
            .expect("decision");
        assert!(!decision.allowed);

        let read = enforcer
            .decide(&admin, &Resource::object("photos", "x"), S3Action::GetObject)
            .await
            .expect("decision");
        assert!(read.allowed);
    }

    #[tokio::test]
    async fn test_should_require_authentication_for_service_actions() {
        let enforcer = enforcer(TestBackend::default());
        let anonymous = enforcer
            .decide(&Identity::Anonymous, &Resource::service(), S3Action::ListBuckets)
            .await
            .expect("decision");
        assert!(!anonymous.allowed);
        let bob = enforcer
            .decide(&user("bob"), &Resource::service(), S3Action::ListBuckets)
            .await
            .expect("decision");
        assert!(bob.allowed);
    }

    #[tokio::test]
    async fn test_should_use_object_acl_for_object_reads() {
        let bucket = AclMetadata::private(Owner::new("alice", "alice"));
        let object = AclMetadata::canned(Owner::new("alice", "alice"), CannedAcl::PublicRead);
        let enforcer = enforcer(
            TestBackend::default()
                .with_bucket("photos", bucket)
                .with_object("photos", "cat.jpg", object),
        );
        let decision = enforcer
            .decide(
                &Identity::Anonymous,
                &Resource::object("photos", "cat.jpg"),
                S3Action::GetObject,
            )
            .await
            .expect("decision");
        assert!(decision.allowed);

        let missing = enforcer
            .decide(
                &Identity::Anonymous,
                &Resource::object("photos", "dog.jpg"),
                S3Action::GetObject,
            )
            .await
            .expect("decision");
        assert!(!missing.allowed);
    }

    #[tokio::test]
    async fn test_should_decide_missing_key_reads_by_bucket_read() {
        let acl = AclMetadata::canned(Owner::new("alice", "alice"), CannedAcl::PublicRead);
        let enforcer = enforcer(TestBackend::default().with_bucket("site", acl));
        let resource = Resource::object("site", "missing.html");

        for action in [S3Action::GetObject, S3Action::HeadObject] {
            let decision = enforcer
                .decide(&Identity::Anonymous, &resource, action)
                .await
                .expect("decision");
            assert!(decision.allowed, "{action} should fall back to bucket READ");
        }
    }

    #[tokio::test]
    async fn test_should_deny_acl_write_on_missing_key_without_bucket_write_acp() {
        let acl = AclMetadata::canned(Owner::new("alice", "alice"), CannedAcl::PublicReadWrite);
        let enforcer = enforcer(TestBackend::default().with_bucket("site", acl));
        let resource = Resource::object("site", "missing.html");

        let anonymous = enforcer
            .decide(&Identity::Anonymous, &resource, S3Action::PutObjectAcl)
            .await
            .expect("decision");
        assert!(!anonymous.allowed);
        assert!(anonymous.matched_rule.is_none());

        let owner = enforcer
            .decide(&user("alice"), &resource, S3Action::PutObjectAcl)
            .await
            .expect("decision");
        assert!(owner.allowed);
    }

    #[tokio::test]
    async fn test_should_allow_acl_write_on_missing_key_with_bucket_write_acp() {
        let mut acl = AclMetadata::private(Owner::new("alice", "alice"));
        acl.grants.push(Grant::allow(Grantee::user("bob"), Permission::WriteAcp));
        let enforcer = enforcer(TestBackend::default().with_bucket("docs", acl));
        let decision = enforcer
            .decide(&user("bob"), &Resource::object("docs", "new.txt"), S3Action::PutObjectAcl)
            .await
            .expect("decision");
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_should_report_missing_bucket_and_outage() {
        let enforcer = enforcer(TestBackend::default().with_unavailable_bucket("broken"));
        let missing = enforcer
            .decide(&user("bob"), &Resource::bucket("nope"), S3Action::ListObjects)
            .await
            .expect_err("missing bucket");
        assert!(matches!(missing, PipelineError::NoSuchBucket(_)));

        let outage = enforcer
            .decide(&user("bob"), &Resource::bucket("broken"), S3Action::ListObjects)
            .await
            .expect_err("outage");
        assert!(matches!(outage, PipelineError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_should_serve_cached_metadata_until_invalidated() {
        let backend = TestBackend::default()
            .with_bucket("photos", AclMetadata::private(Owner::new("alice", "alice")));
        let lookups = backend.lookups();
        let enforcer = enforcer(backend);
        let resource = Resource::bucket("photos");
        for _ in 0..3 {
            let _ = enforcer
                .decide(&user("bob"), &resource, S3Action::ListObjects)
                .await
                .expect("decision");
        }
        assert_eq!(lookups.load(std::sync::atomic::Ordering::SeqCst), 1);

        enforcer.invalidate(&resource);
        let _ = enforcer
            .decide(&user("bob"), &resource, S3Action::ListObjects)
            .await
            .expect("decision");
        assert_eq!(lookups.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
