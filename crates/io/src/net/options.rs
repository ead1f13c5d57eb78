use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

/// Backlog used when [`ListenOptions::backlog`] is not called.
pub const DEFAULT_BACKLOG: u32 = 511;

/// Host used by [`ConnectTarget`] conversions that only carry a port.
pub const DEFAULT_CONNECT_HOST: &str = "localhost";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketOptions {
    /// Keep the writable side open after the peer ended its side.
    pub allow_half_open: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerOptions {
    /// Passed to every accepted [`Socket`](super::Socket).
    pub allow_half_open: bool,
}

/// Where a server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenTarget {
    Tcp { host: Option<String>, port: u16 },
    Pipe(PathBuf),
}

/// Listen configuration, built like
///
/// ```
/// use micro_io::net::ListenOptions;
///
/// let options = ListenOptions::tcp(8080).host("127.0.0.1").backlog(128);
/// assert_eq!(options.backlog_size(), 128);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenOptions {
    target: ListenTarget,
    backlog: u32,
}

impl ListenOptions {
    pub fn tcp(port: u16) -> Self {
        Self { target: ListenTarget::Tcp { host: None, port }, backlog: DEFAULT_BACKLOG }
    }

    pub fn pipe<P: Into<PathBuf>>(path: P) -> Self {
        Self { target: ListenTarget::Pipe(path.into()), backlog: DEFAULT_BACKLOG }
    }

    /// Sets the bind host of a TCP target; ignored for pipes.
    #[must_use]
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        if let ListenTarget::Tcp { host: current, .. } = &mut self.target {
            *current = Some(host.into());
        }
        self
    }

    #[must_use]
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn target(&self) -> &ListenTarget {
        &self.target
    }

    pub fn backlog_size(&self) -> u32 {
        self.backlog
    }

    /// Resolves a TCP target to the address to bind; any IPv4 address when no host is set.
    pub(crate) fn resolve(host: Option<&str>, port: u16) -> io::Result<SocketAddr> {
        let Some(host) = host else {
            return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
        };
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }
        (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address found for host {host}")))
    }
}

impl From<u16> for ListenOptions {
    fn from(port: u16) -> Self {
        Self::tcp(port)
    }
}

impl From<SocketAddr> for ListenOptions {
    fn from(addr: SocketAddr) -> Self {
        Self::tcp(addr.port()).host(addr.ip().to_string())
    }
}

impl From<(&str, u16)> for ListenOptions {
    fn from((host, port): (&str, u16)) -> Self {
        Self::tcp(port).host(host)
    }
}

impl From<&Path> for ListenOptions {
    fn from(path: &Path) -> Self {
        Self::pipe(path)
    }
}

impl From<PathBuf> for ListenOptions {
    fn from(path: PathBuf) -> Self {
        Self::pipe(path)
    }
}

/// Where a socket connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    Tcp { host: String, port: u16 },
    Pipe(PathBuf),
}

impl ConnectTarget {
    pub fn tcp<S: Into<String>>(host: S, port: u16) -> Self {
        Self::Tcp { host: host.into(), port }
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
            Self::Pipe(path) => write!(f, "{}", path.display()),
        }
    }
}

impl From<u16> for ConnectTarget {
    fn from(port: u16) -> Self {
        Self::tcp(DEFAULT_CONNECT_HOST, port)
    }
}

impl From<(&str, u16)> for ConnectTarget {
    fn from((host, port): (&str, u16)) -> Self {
        Self::tcp(host, port)
    }
}

impl From<SocketAddr> for ConnectTarget {
    fn from(addr: SocketAddr) -> Self {
        Self::tcp(addr.ip().to_string(), addr.port())
    }
}

impl From<&Path> for ConnectTarget {
    fn from(path: &Path) -> Self {
        Self::Pipe(path.to_path_buf())
    }
}

impl From<PathBuf> for ConnectTarget {
    fn from(path: PathBuf) -> Self {
        Self::Pipe(path)
    }
}

/// A bound server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Tcp(SocketAddr),
    Pipe(PathBuf),
}

impl Address {
    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Tcp(addr) => Some(addr.port()),
            Self::Pipe(_) => None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => addr.fmt(f),
            Self::Pipe(path) => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_options_builder() {
        let options = ListenOptions::tcp(80).host("::1").backlog(16);
        assert_eq!(options.target(), &ListenTarget::Tcp { host: Some("::1".to_string()), port: 80 });
        assert_eq!(options.backlog_size(), 16);

        let options = ListenOptions::pipe("/tmp/server.sock").host("ignored");
        assert_eq!(options.target(), &ListenTarget::Pipe(PathBuf::from("/tmp/server.sock")));
        assert_eq!(options.backlog_size(), DEFAULT_BACKLOG);
    }

    #[test]
    fn resolve_defaults_to_any_address() {
        assert_eq!(ListenOptions::resolve(None, 8080).unwrap(), "0.0.0.0:8080".parse().unwrap());
        assert_eq!(ListenOptions::resolve(Some("127.0.0.1"), 1).unwrap(), "127.0.0.1:1".parse().unwrap());
    }

    #[test]
    fn connect_target_conversions() {
        assert_eq!(ConnectTarget::from(3000), ConnectTarget::tcp("localhost", 3000));
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert_eq!(ConnectTarget::from(addr).to_string(), "127.0.0.1:9");
        assert_eq!(ConnectTarget::from(Path::new("/tmp/a.sock")), ConnectTarget::Pipe(PathBuf::from("/tmp/a.sock")));
    }
}
