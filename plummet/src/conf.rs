//! The system's configured nameservers.

use std::io;
use std::net::IpAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read the resolver configuration.")]
    Read(#[from] io::Error),

    #[error("Could not parse the resolver configuration: {0}")]
    Parse(String),
}

/// Somewhere to get default nameservers from.
pub trait NameserverSource {
    fn nameservers(&self) -> Result<Vec<IpAddr>, ConfigError>;
}

/// The nameservers from `/etc/resolv.conf`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemConfig;

#[cfg(unix)]
const RESOLV_CONF: &str = "/etc/resolv.conf";

impl NameserverSource for SystemConfig {
    #[cfg(unix)]
    fn nameservers(&self) -> Result<Vec<IpAddr>, ConfigError> {
        let contents = std::fs::read(RESOLV_CONF)?;
        let config =
            resolv_conf::Config::parse(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config
            .nameservers
            .into_iter()
            .map(|ip| match ip {
                resolv_conf::ScopedIp::V4(v4) => IpAddr::V4(v4),
                resolv_conf::ScopedIp::V6(v6, _) => IpAddr::V6(v6),
            })
            .collect())
    }

    #[cfg(not(unix))]
    fn nameservers(&self) -> Result<Vec<IpAddr>, ConfigError> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "no resolver configuration on this platform").into())
    }
}

/// A fixed list, mostly for tests.
impl NameserverSource for Vec<IpAddr> {
    fn nameservers(&self) -> Result<Vec<IpAddr>, ConfigError> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use super::NameserverSource;

    #[test]
    fn fixed_list_is_returned_as_is() {
        let list: Vec<IpAddr> = vec!["192.0.2.53".parse().unwrap(), "2001:db8::53".parse().unwrap()];
        assert_eq!(list.nameservers().unwrap(), list);
    }
}
