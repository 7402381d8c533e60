use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Secret;

/// Connection parameters for one device session.
///
/// Built once before connecting and never mutated afterwards; the
/// `with_*` methods consume the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    endpoint: String,
    user: String,
    password: Secret,
    https_port: u16,
    ssh_port: u16,
    validate_certs: bool,
    #[serde(with = "secs")]
    timeout: Duration,
}

impl ConnectionConfig {
    pub const DEFAULT_HTTPS_PORT: u16 = 443;
    pub const DEFAULT_SSH_PORT: u16 = 22;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

    pub fn new(endpoint: impl Into<String>, user: impl Into<String>, password: impl Into<Secret>) -> Self {
        Self {
            endpoint: endpoint.into(),
            user: user.into(),
            password: password.into(),
            https_port: Self::DEFAULT_HTTPS_PORT,
            ssh_port: Self::DEFAULT_SSH_PORT,
            validate_certs: true,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_https_port(mut self, port: u16) -> Self { self.https_port = port; self }
    pub fn with_ssh_port(mut self, port: u16) -> Self { self.ssh_port = port; self }
    pub fn with_validate_certs(mut self, on: bool) -> Self { self.validate_certs = on; self }
    pub fn with_timeout(mut self, timeout: Duration) -> Self { self.timeout = timeout; self }

    pub fn endpoint(&self) -> &str { &self.endpoint }
    pub fn user(&self) -> &str { &self.user }
    pub fn password(&self) -> &Secret { &self.password }
    pub fn https_port(&self) -> u16 { self.https_port }
    pub fn ssh_port(&self) -> u16 { self.ssh_port }
    pub fn validate_certs(&self) -> bool { self.validate_certs }
    pub fn timeout(&self) -> Duration { self.timeout }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> { s.serialize_u64(d.as_secs()) }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
