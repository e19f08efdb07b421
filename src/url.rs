use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

/// Endpoint address of the form `scheme://host:port`.
///
/// The host must be a dotted-quad IPv4 address; hostnames and IPv6 are
/// rejected. Port 0 parses, but is only meaningful when binding a server,
/// where it requests an ephemeral port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    scheme: String,
    host: Ipv4Addr,
    port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("missing scheme separator in \"{0}\"")]
    MissingScheme(String),

    #[error("missing port in \"{0}\"")]
    MissingPort(String),

    #[error("host \"{0}\" is not a dotted-quad IPv4 address")]
    InvalidHost(String),

    #[error("invalid port \"{0}\"")]
    InvalidPort(String),
}

impl Url {
    pub fn parse(text: &str) -> Result<Url, UrlError> {
        let (scheme, rest) = text
            .split_once("://")
            .ok_or_else(|| UrlError::MissingScheme(text.to_owned()))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| UrlError::MissingPort(text.to_owned()))?;
        let host = Ipv4Addr::from_str(host).map_err(|_| UrlError::InvalidHost(host.to_owned()))?;
        let port = port.parse().map_err(|_| UrlError::InvalidPort(port.to_owned()))?;
        Ok(Url {
            scheme: scheme.to_owned(),
            host,
            port,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> Ipv4Addr {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Url {
    type Err = UrlError;

    fn from_str(text: &str) -> Result<Url, UrlError> {
        Url::parse(text)
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}
