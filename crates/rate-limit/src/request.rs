//! Request information for rate limiting.

use std::net::IpAddr;

use config::PartitionBy;

/// Identity used when a request carries nothing to partition on.
pub const ANONYMOUS: &str = "anonymous";

/// Information about a request that needs to be rate limited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitRequest {
    /// IP address of the request origin.
    pub ip: Option<IpAddr>,
    /// Authenticated user of the request.
    pub user: Option<String>,
    /// Caller provided partition key, such as an API key or tenant.
    pub custom: Option<String>,
}

impl RateLimitRequest {
    /// Create a new builder for a rate limit request.
    pub fn builder() -> RateLimitRequestBuilder {
        RateLimitRequestBuilder::default()
    }

    /// The identity a limit partitioned by `partition` is counted against.
    ///
    /// Users and custom keys fall back to the client IP when absent, and everything falls back to
    /// [`ANONYMOUS`]. The identity is prefixed with what it was taken from, so a user named like an
    /// address never shares a counter with that address.
    pub fn discriminator(&self, partition: PartitionBy) -> String {
        let chosen = match partition {
            PartitionBy::Ip => None,
            PartitionBy::User => self.user.as_deref().map(|user| format!("user:{user}")),
            PartitionBy::Custom => self.custom.as_deref().map(|custom| format!("custom:{custom}")),
        };

        chosen
            .or_else(|| self.ip.map(|ip| format!("ip:{ip}")))
            .unwrap_or_else(|| ANONYMOUS.to_string())
    }
}

/// Builder for creating rate limit requests.
#[derive(Debug, Default)]
pub struct RateLimitRequestBuilder {
    ip: Option<IpAddr>,
    user: Option<String>,
    custom: Option<String>,
}

impl RateLimitRequestBuilder {
    /// Set the IP address.
    pub fn ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    /// Set the IP address from a string.
    pub fn ip_str(mut self, ip: &str) -> Result<Self, std::net::AddrParseError> {
        self.ip = Some(ip.parse()?);
        Ok(self)
    }

    /// Set the authenticated user.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the custom partition key.
    pub fn custom(mut self, key: impl Into<String>) -> Self {
        self.custom = Some(key.into());
        self
    }

    /// Build the rate limit request.
    pub fn build(self) -> RateLimitRequest {
        RateLimitRequest {
            ip: self.ip,
            user: self.user,
            custom: self.custom,
        }
    }
}
