//! S3 actions recognized by the gateway.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::acl::Permission;

/// Which resource's ACL an action is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionTarget {
    /// No bucket is involved; only the caller's identity matters.
    Service,
    /// The bucket ACL decides.
    Bucket,
    /// The object ACL decides.
    Object,
}

/// All S3 actions the gateway can route and authorize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum S3Action {
    /// The ListBuckets action.
    ListBuckets,
    /// The CreateBucket action.
    CreateBucket,
    /// The DeleteBucket action.
    DeleteBucket,
    /// The HeadBucket action.
    HeadBucket,
    /// The ListObjects action (v1 and v2).
    ListObjects,
    /// The GetBucketAcl action.
    GetBucketAcl,
    /// The PutBucketAcl action.
    PutBucketAcl,
    /// The GetObject action.
    GetObject,
    /// The HeadObject action.
    HeadObject,
    /// The PutObject action.
    PutObject,
    /// The DeleteObject action.
    DeleteObject,
    /// The GetObjectAcl action.
    GetObjectAcl,
    /// The PutObjectAcl action.
    PutObjectAcl,
    /// The CreateMultipartUpload action.
    CreateMultipartUpload,
    /// The UploadPart action.
    UploadPart,
    /// The CompleteMultipartUpload action.
    CompleteMultipartUpload,
    /// The AbortMultipartUpload action.
    AbortMultipartUpload,
}

impl S3Action {
    /// Returns the action name as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ListBuckets => "ListBuckets",
            Self::CreateBucket => "CreateBucket",
            Self::DeleteBucket => "DeleteBucket",
            Self::HeadBucket => "HeadBucket",
            Self::ListObjects => "ListObjects",
            Self::GetBucketAcl => "GetBucketAcl",
            Self::PutBucketAcl => "PutBucketAcl",
            Self::GetObject => "GetObject",
            Self::HeadObject => "HeadObject",
            Self::PutObject => "PutObject",
            Self::DeleteObject => "DeleteObject",
            Self::GetObjectAcl => "GetObjectAcl",
            Self::PutObjectAcl => "PutObjectAcl",
            Self::CreateMultipartUpload => "CreateMultipartUpload",
            Self::UploadPart => "UploadPart",
            Self::CompleteMultipartUpload => "CompleteMultipartUpload",
            Self::AbortMultipartUpload => "AbortMultipartUpload",
        }
    }

    /// Whether the action changes bucket, object, or ACL state.
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::CreateBucket
                | Self::DeleteBucket
                | Self::PutBucketAcl
                | Self::PutObject
                | Self::DeleteObject
                | Self::PutObjectAcl
                | Self::CreateMultipartUpload
                | Self::UploadPart
                | Self::CompleteMultipartUpload
                | Self::AbortMultipartUpload
        )
    }

    /// The resource whose ACL decides this action.
    ///
    /// Object writes and deletes are governed by the bucket ACL, as in S3.
    #[must_use]
    pub fn target(&self) -> ActionTarget {
        match self {
            Self::ListBuckets | Self::CreateBucket => ActionTarget::Service,
            Self::GetObject | Self::HeadObject | Self::GetObjectAcl | Self::PutObjectAcl => {
                ActionTarget::Object
            }
            _ => ActionTarget::Bucket,
        }
    }

    /// The permission a grant must carry to allow this action.
    #[must_use]
    #[allow(clippy::match_same_arms)]
    pub fn required_permission(&self) -> Permission {
        match self {
            Self::ListBuckets
            | Self::HeadBucket
            | Self::ListObjects
            | Self::GetObject
            | Self::HeadObject => Permission::Read,
            Self::CreateBucket
            | Self::PutObject
            | Self::DeleteObject
            | Self::CreateMultipartUpload
            | Self::UploadPart
            | Self::CompleteMultipartUpload
            | Self::AbortMultipartUpload => Permission::Write,
            Self::GetBucketAcl | Self::GetObjectAcl => Permission::ReadAcp,
            Self::PutBucketAcl | Self::PutObjectAcl => Permission::WriteAcp,
            Self::DeleteBucket => Permission::FullControl,
        }
    }

    /// Event name reported to notification sinks for a mutating action.
    #[must_use]
    pub fn event_name(&self) -> Option<&'static str> {
        match self {
            Self::PutObject | Self::CompleteMultipartUpload => Some("s3:ObjectCreated:Put"),
            Self::DeleteObject => Some("s3:ObjectRemoved:Delete"),
            Self::PutObjectAcl => Some("s3:ObjectAcl:Put"),
            Self::CreateBucket => Some("s3:BucketCreated"),
            Self::DeleteBucket => Some("s3:BucketRemoved"),
            _ => None,
        }
    }
}

impl fmt::Display for S3Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_classify_mutating_actions() {
        assert!(S3Action::PutObject.is_mutating());
        assert!(S3Action::PutBucketAcl.is_mutating());
        assert!(!S3Action::GetObject.is_mutating());
        assert!(!S3Action::ListBuckets.is_mutating());
    }

    #[test]
    fn test_should_check_object_reads_against_object_acl() {
        assert_eq!(S3Action::GetObject.target(), ActionTarget::Object);
        assert_eq!(S3Action::PutObject.target(), ActionTarget::Bucket);
        assert_eq!(S3Action::CreateBucket.target(), ActionTarget::Service);
    }

    #[test]
    fn test_should_require_acp_permissions_for_acl_actions() {
        assert_eq!(
            S3Action::GetObjectAcl.required_permission(),
            Permission::ReadAcp
        );
        assert_eq!(
            S3Action::PutBucketAcl.required_permission(),
            Permission::WriteAcp
        );
    }

    #[test]
    fn test_should_name_events_only_for_mutations() {
        assert_eq!(S3Action::PutObject.event_name(), Some("s3:ObjectCreated:Put"));
        assert!(S3Action::GetObject.event_name().is_none());
    }
}
