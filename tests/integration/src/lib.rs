//! Integration tests for s3gate, driven by the AWS SDK.
//!
//! These tests require a running gateway at `localhost:7070`, started with
//! two users and a health path:
//!
//! ```text
//! S3GATE_USERS=AKIDINTEGRATION:integration-secret:tester,AKIDOTHER:other-secret:other \
//! S3GATE_HEALTH_PATH=/_health s3gate-server
//! ```
//!
//! They are marked `#[ignore]` so they don't run during normal `cargo test`.
//! Run them with:
//! ```text
//! cargo test -p s3gate-integration -- --ignored
//! ```

use std::sync::Once;

use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Region};

static INIT: Once = Once::new();

/// Access key of the primary test user.
pub const ACCESS_KEY: &str = "AKIDINTEGRATION";
/// Secret of the primary test user.
pub const SECRET_KEY: &str = "integration-secret";
/// Access key of a second user who owns nothing.
pub const OTHER_ACCESS_KEY: &str = "AKIDOTHER";
/// Secret of the second user.
pub const OTHER_SECRET_KEY: &str = "other-secret";

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Endpoint URL for the gateway.
#[must_use]
pub fn endpoint_url() -> String {
    std::env::var("S3GATE_ENDPOINT_URL").unwrap_or_else(|_| "http://localhost:7070".to_owned())
}

/// An S3 client signing with the given key pair.
#[must_use]
pub fn s3_client_with(access_key: &str, secret_key: &str) -> aws_sdk_s3::Client {
    init_tracing();

    let creds = Credentials::new(access_key, secret_key, None, None, "integration-test");

    let config = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(creds)
        .endpoint_url(endpoint_url())
        .force_path_style(true)
        .build();

    aws_sdk_s3::Client::from_conf(config)
}

/// An S3 client signing as the primary test user.
#[must_use]
pub fn s3_client() -> aws_sdk_s3::Client {
    s3_client_with(ACCESS_KEY, SECRET_KEY)
}

/// Generate a unique bucket name for a test.
#[must_use]
pub fn test_bucket_name(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string()[..8].to_owned();
    format!("test-{prefix}-{id}")
}

/// Create a bucket and return its name. Caller is responsible for cleanup.
pub async fn create_test_bucket(client: &aws_sdk_s3::Client, prefix: &str) -> String {
    let name = test_bucket_name(prefix);
    client
        .create_bucket()
        .bucket(&name)
        .send()
        .await
        .unwrap_or_else(|e| panic!("failed to create bucket {name}: {e}"));
    name
}

/// Delete all objects in a bucket, then delete the bucket.
pub async fn cleanup_bucket(client: &aws_sdk_s3::Client, bucket: &str) {
    let Ok(resp) = client.list_objects_v2().bucket(bucket).send().await else {
        return;
    };
    for obj in resp.contents() {
        if let Some(key) = obj.key() {
            let _ = client.delete_object().bucket(bucket).key(key).send().await;
        }
    }
    let _ = client.delete_bucket().bucket(bucket).send().await;
}

mod test_acl;
mod test_auth;
mod test_object;
