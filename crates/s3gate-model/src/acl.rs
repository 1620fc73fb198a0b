//! Access-control metadata for buckets and objects.
//!
//! An [`AclMetadata`] is what the backend hands back for a bucket or an
//! object: the owner, the list of grants, and whether public grants are
//! blocked. Grants carry an explicit [`GrantEffect`], so a list may contain
//! both allow and deny entries for the same grantee.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Group URI matched only by the anonymous principal.
pub const ALL_USERS_GROUP: &str = "http://acs.amazonaws.com/groups/global/AllUsers";

/// Group URI matched by every caller that presented a valid signature.
pub const AUTHENTICATED_USERS_GROUP: &str =
    "http://acs.amazonaws.com/groups/global/AuthenticatedUsers";

// ---------------------------------------------------------------------------
// Owner
// ---------------------------------------------------------------------------

/// The owner of a bucket or object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    /// The canonical user ID of the owner.
    pub id: String,
    /// The display name of the owner.
    pub display_name: String,
}

impl Owner {
    /// Create an owner from its canonical id and display name.
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.display_name, self.id)
    }
}

// ---------------------------------------------------------------------------
// Permission
// ---------------------------------------------------------------------------

/// A permission that can be granted to (or denied from) a grantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    /// READ, WRITE, READ_ACP and WRITE_ACP together.
    FullControl,
    /// List a bucket or read an object.
    Read,
    /// Create, overwrite and delete objects in a bucket.
    Write,
    /// Read the ACL.
    ReadAcp,
    /// Replace the ACL.
    WriteAcp,
}

impl Permission {
    /// Whether holding `self` satisfies a requirement for `required`.
    #[must_use]
    pub fn covers(self, required: Self) -> bool {
        self == Self::FullControl || self == required
    }

    /// Wire name of the permission.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullControl => "FULL_CONTROL",
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::ReadAcp => "READ_ACP",
            Self::WriteAcp => "WRITE_ACP",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Grant / Grantee
// ---------------------------------------------------------------------------

/// The principal side of a grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Grantee {
    /// A single principal, identified by canonical id.
    CanonicalUser {
        /// The canonical user ID.
        id: String,
    },
    /// A group of principals, identified by URI.
    Group {
        /// The URI of the group.
        uri: String,
    },
}

impl Grantee {
    /// Grantee for a single canonical user.
    #[must_use]
    pub fn user(id: impl Into<String>) -> Self {
        Self::CanonicalUser { id: id.into() }
    }

    /// Grantee for a group URI.
    #[must_use]
    pub fn group(uri: impl Into<String>) -> Self {
        Self::Group { uri: uri.into() }
    }

    /// The public `AllUsers` group.
    #[must_use]
    pub fn all_users() -> Self {
        Self::group(ALL_USERS_GROUP)
    }

    /// The `AuthenticatedUsers` group.
    #[must_use]
    pub fn authenticated_users() -> Self {
        Self::group(AUTHENTICATED_USERS_GROUP)
    }

    /// Whether this grantee is the public `AllUsers` group.
    #[must_use]
    pub fn is_public(&self) -> bool {
        matches!(self, Self::Group { uri } if uri == ALL_USERS_GROUP)
    }
}

impl fmt::Display for Grantee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CanonicalUser { id } => write!(f, "user:{id}"),
            Self::Group { uri } => write!(f, "group:{uri}"),
        }
    }
}

/// Whether a grant allows or denies its permission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GrantEffect {
    /// The grant allows the permission.
    #[default]
    Allow,
    /// The grant denies the permission and wins over any allow.
    Deny,
}

/// An ACL entry pairing a grantee with a permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    /// The entity receiving the permission.
    pub grantee: Grantee,
    /// The permission granted or denied.
    pub permission: Permission,
    /// Allow or deny.
    #[serde(default)]
    pub effect: GrantEffect,
}

impl Grant {
    /// An allowing grant.
    #[must_use]
    pub fn allow(grantee: Grantee, permission: Permission) -> Self {
        Self {
            grantee,
            permission,
            effect: GrantEffect::Allow,
        }
    }

    /// A denying grant.
    #[must_use]
    pub fn deny(grantee: Grantee, permission: Permission) -> Self {
        Self {
            grantee,
            permission,
            effect: GrantEffect::Deny,
        }
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let effect = match self.effect {
            GrantEffect::Allow => "allow",
            GrantEffect::Deny => "deny",
        };
        write!(f, "{effect} {} {}", self.permission, self.grantee)
    }
}

// ---------------------------------------------------------------------------
// CannedAcl
// ---------------------------------------------------------------------------

/// Predefined grant sets accepted through the `x-amz-acl` header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CannedAcl {
    /// Owner only.
    #[default]
    Private,
    /// `AllUsers` may read.
    PublicRead,
    /// `AllUsers` may read and write.
    PublicReadWrite,
    /// `AuthenticatedUsers` may read.
    AuthenticatedRead,
}

impl CannedAcl {
    /// Return the header value of the canned ACL.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::PublicRead => "public-read",
            Self::PublicReadWrite => "public-read-write",
            Self::AuthenticatedRead => "authenticated-read",
        }
    }

    /// Expand into the grant list for `owner`.
    #[must_use]
    pub fn grants(&self, owner: &Owner) -> Vec<Grant> {
        let mut grants = vec![Grant::allow(
            Grantee::user(owner.id.clone()),
            Permission::FullControl,
        )];
        match self {
            Self::Private => {}
            Self::PublicRead => grants.push(Grant::allow(Grantee::all_users(), Permission::Read)),
            Self::PublicReadWrite => {
                grants.push(Grant::allow(Grantee::all_users(), Permission::Read));
                grants.push(Grant::allow(Grantee::all_users(), Permission::Write));
            }
            Self::AuthenticatedRead => {
                grants.push(Grant::allow(
                    Grantee::authenticated_users(),
                    Permission::Read,
                ));
            }
        }
        grants
    }
}

impl fmt::Display for CannedAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`CannedAcl`] from a string fails.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown canned ACL: {0}")]
pub struct ParseCannedAclError(String);

impl FromStr for CannedAcl {
    type Err = ParseCannedAclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "public-read" => Ok(Self::PublicRead),
            "public-read-write" => Ok(Self::PublicReadWrite),
            "authenticated-read" => Ok(Self::AuthenticatedRead),
            _ => Err(ParseCannedAclError(s.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// AclMetadata
// ---------------------------------------------------------------------------

/// Access-control metadata of one bucket or object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclMetadata {
    /// The resource owner, who always holds full control.
    pub owner: Owner,
    /// Explicit grants, evaluated deny-first.
    pub grants: Vec<Grant>,
    /// When set, grants to the `AllUsers` group are ignored.
    #[serde(default)]
    pub block_public_access: bool,
}

impl AclMetadata {
    /// Metadata with the grants of a canned ACL.
    #[must_use]
    pub fn canned(owner: Owner, acl: CannedAcl) -> Self {
        let grants = acl.grants(&owner);
        Self {
            owner,
            grants,
            block_public_access: false,
        }
    }

    /// Metadata that grants nothing beyond ownership.
    #[must_use]
    pub fn private(owner: Owner) -> Self {
        Self::canned(owner, CannedAcl::Private)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_cover_every_permission_with_full_control() {
        for p in [
            Permission::Read,
            Permission::Write,
            Permission::ReadAcp,
            Permission::WriteAcp,
        ] {
            assert!(Permission::FullControl.covers(p));
            assert!(p.covers(p));
        }
        assert!(!Permission::Read.covers(Permission::Write));
    }

    #[test]
    fn test_should_expand_public_read_canned_acl() {
        let owner = Owner::new("owner-id", "owner");
        let acl = AclMetadata::canned(owner, CannedAcl::PublicRead);
        assert_eq!(acl.grants.len(), 2);
        assert!(acl.grants[1].grantee.is_public());
        assert_eq!(acl.grants[1].permission, Permission::Read);
    }

    #[test]
    fn test_should_parse_canned_acl() {
        assert_eq!(
            "authenticated-read".parse::<CannedAcl>().ok(),
            Some(CannedAcl::AuthenticatedRead)
        );
        assert!("log-delivery-write".parse::<CannedAcl>().is_err());
    }

    #[test]
    fn test_should_default_grant_effect_to_allow_when_deserializing() {
        let json = r#"{"grantee":{"type":"canonicalUser","id":"u1"},"permission":"READ"}"#;
        let grant: Grant = serde_json::from_str(json).expect("valid grant");
        assert_eq!(grant.effect, GrantEffect::Allow);
        assert_eq!(grant.grantee, Grantee::user("u1"));
    }

    #[test]
    fn test_should_display_grant() {
        let grant = Grant::deny(Grantee::user("u1"), Permission::Write);
        assert_eq!(grant.to_string(), "deny WRITE user:u1");
    }
}
