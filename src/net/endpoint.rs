//! Bind endpoint parsing and preparation.
//!
//! # Grammar
//! ```text
//! [<protocol>://]<address>
//! ```
//! A bare address (no `://`) is a unix socket path.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Error type for endpoint parsing and preparation.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// The address string was empty.
    #[error("endpoint address is empty")]
    Empty,
    /// The protocol prefix is not a stream protocol we can listen on.
    #[error("unsupported endpoint protocol: {0}")]
    UnsupportedProtocol(String),
    /// Creating the socket's parent directory failed.
    #[error("failed to create socket directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    /// Removing a stale socket file failed.
    #[error("failed to remove stale socket {path}: {source}")]
    RemoveStale { path: PathBuf, source: io::Error },
}

/// Transport protocol of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Unix domain stream socket.
    Unix,
    /// TCP, any address family.
    Tcp,
    /// TCP, IPv4 only.
    Tcp4,
    /// TCP, IPv6 only.
    Tcp6,
}

impl Protocol {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "unix" => Some(Protocol::Unix),
            "tcp" => Some(Protocol::Tcp),
            "tcp4" => Some(Protocol::Tcp4),
            "tcp6" => Some(Protocol::Tcp6),
            _ => None,
        }
    }

    /// Canonical protocol name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Unix => "unix",
            Protocol::Tcp => "tcp",
            Protocol::Tcp4 => "tcp4",
            Protocol::Tcp6 => "tcp6",
        }
    }
}

/// A parsed bind address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    protocol: Protocol,
    address: String,
}

impl Endpoint {
    /// Parse `[<protocol>://]<address>`.
    pub fn parse(s: &str) -> Result<Self, EndpointError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EndpointError::Empty);
        }

        let (protocol, address) = match s.split_once("://") {
            Some((proto, addr)) => {
                let protocol = Protocol::parse(proto)
                    .ok_or_else(|| EndpointError::UnsupportedProtocol(proto.to_string()))?;
                (protocol, addr)
            }
            None => (Protocol::Unix, s),
        };

        if address.is_empty() {
            return Err(EndpointError::Empty);
        }

        Ok(Self {
            protocol,
            address: address.to_string(),
        })
    }

    /// The endpoint's protocol.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// The address part (a path for unix sockets, `host:port` otherwise).
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Socket file path, for unix endpoints.
    pub fn socket_path(&self) -> Option<&Path> {
        match self.protocol {
            Protocol::Unix => Some(Path::new(&self.address)),
            _ => None,
        }
    }

    /// Make the filesystem ready for binding.
    ///
    /// For unix endpoints the parent directory is created (mode 0755) and any
    /// file already at the socket path is removed. No-op for TCP.
    pub fn prepare(&self) -> Result<(), EndpointError> {
        let Some(path) = self.socket_path() else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_socket_dir(parent).map_err(|source| EndpointError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        remove_socket_file(path).map_err(|source| EndpointError::RemoveStale {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(())
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol.as_str(), self.address)
    }
}

#[cfg(unix)]
fn create_socket_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(dir)
}

#[cfg(not(unix))]
fn create_socket_dir(dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dir)
}

/// Remove a socket file, treating "already gone" as success.
pub(crate) fn remove_socket_file(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
