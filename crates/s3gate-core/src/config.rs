//! Gateway configuration.
//!
//! [`GatewayConfig`] is built once at startup (from the environment or the
//! typed builder) and then shared read-only with every request. Nothing in
//! the pipeline mutates it, so concurrent requests always observe the same
//! read-only/debug/limit settings for their whole lifetime.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::{GatewayError, GatewayResult};

/// Immutable configuration for the gateway and its request pipeline.
///
/// # Examples
///
/// ```
/// use s3gate_core::GatewayConfig;
///
/// let config = GatewayConfig::builder().read_only(true).build();
/// assert!(config.read_only);
/// assert_eq!(config.clock_skew().as_secs(), 900);
/// ```
#[derive(Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Bind address (e.g. `"0.0.0.0:7070"`).
    #[builder(default = String::from("0.0.0.0:7070"))]
    pub gateway_listen: String,

    /// Region every signature scope must name.
    #[builder(default = String::from("us-east-1"))]
    pub region: String,

    /// Base domain for virtual-hosted-style bucket addressing.
    #[builder(default = String::from("s3.localhost"))]
    pub domain: String,

    /// Whether virtual-hosted-style bucket addressing is enabled.
    #[builder(default = true)]
    pub virtual_hosting: bool,

    /// Access key of the statically configured root user.
    #[builder(default, setter(strip_option))]
    pub root_access_key: Option<String>,

    /// Secret key of the statically configured root user.
    #[serde(skip_serializing)]
    #[builder(default, setter(strip_option))]
    pub root_secret_key: Option<String>,

    /// Deny every mutating action regardless of ACLs.
    #[builder(default = false)]
    pub read_only: bool,

    /// Emit canonical requests and strings-to-sign at `info` level.
    #[builder(default = false)]
    pub debug: bool,

    /// Suppress the per-request access log line.
    #[builder(default = false)]
    pub quiet: bool,

    /// Optional path answered with `200 OK` to `GET` before authentication.
    #[builder(default, setter(strip_option))]
    pub health_path: Option<String>,

    /// Allowed distance in seconds between a signature timestamp and now.
    #[builder(default = 900)]
    pub clock_skew_secs: u64,

    /// Largest accepted `X-Amz-Expires` value in seconds.
    #[builder(default = 604_800)]
    pub max_presign_expires_secs: u64,

    /// Largest accepted size of a single aws-chunked frame.
    #[builder(default = 16 * 1024 * 1024)]
    pub max_chunk_size: u64,

    /// Largest accepted number of aws-chunked frames in one body.
    #[builder(default = 100_000)]
    pub max_chunk_count: u64,

    /// Largest accepted decoded body.
    #[builder(default = 5 * 1024 * 1024 * 1024)]
    pub max_object_size: u64,

    /// Longest allowed pause between two reads of the request body.
    #[builder(default = 30)]
    pub body_idle_timeout_secs: u64,

    /// Deadline for the whole request.
    #[builder(default = 3600)]
    pub request_timeout_secs: u64,

    /// Staleness bound of the credential cache; `0` disables it.
    #[builder(default = 60)]
    pub credential_cache_ttl_secs: u64,

    /// Staleness bound of the ACL metadata cache; `0` disables it.
    #[builder(default = 5)]
    pub acl_cache_ttl_secs: u64,

    /// Log level filter string (e.g. `"info"`, `"debug"`).
    #[builder(default = String::from("info"))]
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("gateway_listen", &self.gateway_listen)
            .field("region", &self.region)
            .field("domain", &self.domain)
            .field("virtual_hosting", &self.virtual_hosting)
            .field("root_access_key", &self.root_access_key)
            .field("root_secret_key", &self.root_secret_key.as_ref().map(|_| "***"))
            .field("read_only", &self.read_only)
            .field("debug", &self.debug)
            .field("quiet", &self.quiet)
            .field("health_path", &self.health_path)
            .field("clock_skew_secs", &self.clock_skew_secs)
            .field("max_presign_expires_secs", &self.max_presign_expires_secs)
            .field("max_chunk_size", &self.max_chunk_size)
            .field("max_chunk_count", &self.max_chunk_count)
            .field("max_object_size", &self.max_object_size)
            .field("body_idle_timeout_secs", &self.body_idle_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("credential_cache_ttl_secs", &self.credential_cache_ttl_secs)
            .field("acl_cache_ttl_secs", &self.acl_cache_ttl_secs)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `GATEWAY_LISTEN` | `0.0.0.0:7070` |
    /// | `S3GATE_REGION` | `us-east-1` |
    /// | `S3GATE_DOMAIN` | `s3.localhost` |
    /// | `S3GATE_VIRTUAL_HOSTING` | `true` |
    /// | `S3GATE_ROOT_ACCESS_KEY` | *(unset)* |
    /// | `S3GATE_ROOT_SECRET_KEY` | *(unset)* |
    /// | `S3GATE_READ_ONLY` | `false` |
    /// | `S3GATE_DEBUG` | `false` |
    /// | `S3GATE_QUIET` | `false` |
    /// | `S3GATE_HEALTH_PATH` | *(unset)* |
    /// | `S3GATE_CLOCK_SKEW_SECS` | `900` |
    /// | `S3GATE_MAX_PRESIGN_EXPIRES_SECS` | `604800` |
    /// | `S3GATE_MAX_CHUNK_SIZE` | `16777216` |
    /// | `S3GATE_MAX_CHUNK_COUNT` | `100000` |
    /// | `S3GATE_MAX_OBJECT_SIZE` | `5368709120` |
    /// | `S3GATE_BODY_IDLE_TIMEOUT_SECS` | `30` |
    /// | `S3GATE_REQUEST_TIMEOUT_SECS` | `3600` |
    /// | `S3GATE_CREDENTIAL_CACHE_TTL_SECS` | `60` |
    /// | `S3GATE_ACL_CACHE_TTL_SECS` | `5` |
    /// | `LOG_LEVEL` | `info` |
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if a numeric variable does not parse or
    /// the resulting configuration fails [`GatewayConfig::validate`].
    pub fn from_env() -> GatewayResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> GatewayResult<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("GATEWAY_LISTEN") {
            config.gateway_listen = v;
        }
        if let Some(v) = lookup("S3GATE_REGION") {
            config.region = v;
        }
        if let Some(v) = lookup("S3GATE_DOMAIN") {
            config.domain = v;
        }
        if let Some(v) = lookup("S3GATE_VIRTUAL_HOSTING") {
            config.virtual_hosting = parse_bool(&v);
        }
        config.root_access_key = lookup("S3GATE_ROOT_ACCESS_KEY").filter(|v| !v.is_empty());
        config.root_secret_key = lookup("S3GATE_ROOT_SECRET_KEY").filter(|v| !v.is_empty());
        if let Some(v) = lookup("S3GATE_READ_ONLY") {
            config.read_only = parse_bool(&v);
        }
        if let Some(v) = lookup("S3GATE_DEBUG") {
            config.debug = parse_bool(&v);
        }
        if let Some(v) = lookup("S3GATE_QUIET") {
            config.quiet = parse_bool(&v);
        }
        config.health_path = lookup("S3GATE_HEALTH_PATH").filter(|v| !v.is_empty());

        let numeric: [(&str, &mut u64); 9] = [
            ("S3GATE_CLOCK_SKEW_SECS", &mut config.clock_skew_secs),
            (
                "S3GATE_MAX_PRESIGN_EXPIRES_SECS",
                &mut config.max_presign_expires_secs,
            ),
            ("S3GATE_MAX_CHUNK_SIZE", &mut config.max_chunk_size),
            ("S3GATE_MAX_CHUNK_COUNT", &mut config.max_chunk_count),
            ("S3GATE_MAX_OBJECT_SIZE", &mut config.max_object_size),
            (
                "S3GATE_BODY_IDLE_TIMEOUT_SECS",
                &mut config.body_idle_timeout_secs,
            ),
            ("S3GATE_REQUEST_TIMEOUT_SECS", &mut config.request_timeout_secs),
            (
                "S3GATE_CREDENTIAL_CACHE_TTL_SECS",
                &mut config.credential_cache_ttl_secs,
            ),
            ("S3GATE_ACL_CACHE_TTL_SECS", &mut config.acl_cache_ttl_secs),
        ];
        for (name, slot) in numeric {
            if let Some(v) = lookup(name) {
                *slot = v.trim().parse().map_err(|_| {
                    GatewayError::Config(format!("{name} must be an unsigned integer, got {v:?}"))
                })?;
            }
        }

        if let Some(v) = lookup("LOG_LEVEL") {
            config.log_level = v;
        }

        config.validate()?;
        tracing::debug!(
            region = %config.region,
            read_only = config.read_only,
            root_user = config.root_access_key.is_some(),
            "loaded gateway configuration"
        );
        Ok(config)
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.root_access_key.is_some() != self.root_secret_key.is_some() {
            return Err(GatewayError::Config(
                "root access key and root secret key must be set together".to_owned(),
            ));
        }
        if self.region.is_empty() {
            return Err(GatewayError::Config("region must not be empty".to_owned()));
        }
        if self.max_chunk_size == 0 || self.max_chunk_count == 0 {
            return Err(GatewayError::Config(
                "chunk limits must be greater than zero".to_owned(),
            ));
        }
        if self.body_idle_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(GatewayError::Config(
                "timeouts must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }

    /// Allowed clock skew for signature timestamps.
    #[must_use]
    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }

    /// Longest allowed pause between two body reads.
    #[must_use]
    pub fn body_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.body_idle_timeout_secs)
    }

    /// Deadline for the whole request.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Staleness bound of the credential cache.
    #[must_use]
    pub fn credential_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.credential_cache_ttl_secs)
    }

    /// Staleness bound of the ACL metadata cache.
    #[must_use]
    pub fn acl_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.acl_cache_ttl_secs)
    }
}

/// Parse a string as a boolean, accepting `"1"` and `"true"` (case-insensitive).
fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_should_create_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.gateway_listen, "0.0.0.0:7070");
        assert_eq!(config.region, "us-east-1");
        assert!(config.virtual_hosting);
        assert!(!config.read_only);
        assert_eq!(config.clock_skew(), Duration::from_secs(900));
        assert_eq!(config.max_chunk_size, 16 * 1024 * 1024);
        assert!(config.root_access_key.is_none());
    }

    #[test]
    fn test_should_load_from_lookup() {
        let config = GatewayConfig::from_lookup(lookup_from(&[
            ("S3GATE_REGION", "eu-west-1"),
            ("S3GATE_READ_ONLY", "true"),
            ("S3GATE_ROOT_ACCESS_KEY", "root"),
            ("S3GATE_ROOT_SECRET_KEY", "rootsecret"),
            ("S3GATE_CLOCK_SKEW_SECS", "60"),
            ("S3GATE_HEALTH_PATH", "/health"),
        ]))
        .expect("valid config");

        assert_eq!(config.region, "eu-west-1");
        assert!(config.read_only);
        assert_eq!(config.root_access_key.as_deref(), Some("root"));
        assert_eq!(config.clock_skew_secs, 60);
        assert_eq!(config.health_path.as_deref(), Some("/health"));
    }

    #[test]
    fn test_should_reject_unparsable_number() {
        let result = GatewayConfig::from_lookup(lookup_from(&[("S3GATE_MAX_CHUNK_SIZE", "lots")]));
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }

    #[test]
    fn test_should_reject_half_configured_root_user() {
        let result =
            GatewayConfig::from_lookup(lookup_from(&[("S3GATE_ROOT_ACCESS_KEY", "root")]));
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }

    #[test]
    fn test_should_reject_zero_chunk_limit() {
        let config = GatewayConfig::builder().max_chunk_count(0).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_should_redact_root_secret_in_debug_output() {
        let config = GatewayConfig::builder()
            .root_access_key("root".to_owned())
            .root_secret_key("topsecret".to_owned())
            .build();
        let debug_str = format!("{config:?}");
        assert!(debug_str.contains("GatewayConfig"));
        assert!(!debug_str.contains("topsecret"));
    }

    #[test]
    fn test_should_not_serialize_root_secret() {
        let config = GatewayConfig::builder()
            .root_access_key("root".to_owned())
            .root_secret_key("topsecret".to_owned())
            .build();
        let json = serde_json::to_string(&config).expect("test serialization");
        assert!(json.contains("gatewayListen"));
        assert!(!json.contains("topsecret"));
    }

    #[test]
    fn test_should_parse_bool_values() {
        assert!(parse_bool("1"));
        assert!(parse_bool("TRUE"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool(""));
    }
}
