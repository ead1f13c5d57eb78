use std::io;

use thiserror::Error;

/// A handle level failure, reported through the `error` event of a socket or server.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("bind error: {source}")]
    Bind { source: io::Error },

    #[error("listen error: {source}")]
    Listen { source: io::Error },

    #[error("accept error: {source}")]
    Accept { source: io::Error },

    #[error("connect error: {source}")]
    Connect { source: io::Error },

    #[error("read error: {source}")]
    Read { source: io::Error },

    #[error("write error: {source}")]
    Write { source: io::Error },

    #[error("shutdown error: {source}")]
    Shutdown { source: io::Error },
}

impl NetError {
    pub fn bind(source: io::Error) -> Self {
        Self::Bind { source }
    }

    pub fn listen(source: io::Error) -> Self {
        Self::Listen { source }
    }

    pub fn accept(source: io::Error) -> Self {
        Self::Accept { source }
    }

    pub fn connect(source: io::Error) -> Self {
        Self::Connect { source }
    }

    pub fn read(source: io::Error) -> Self {
        Self::Read { source }
    }

    pub fn write(source: io::Error) -> Self {
        Self::Write { source }
    }

    pub fn shutdown(source: io::Error) -> Self {
        Self::Shutdown { source }
    }

    pub fn io_error(&self) -> &io::Error {
        match self {
            Self::Bind { source }
            | Self::Listen { source }
            | Self::Accept { source }
            | Self::Connect { source }
            | Self::Read { source }
            | Self::Write { source }
            | Self::Shutdown { source } => source,
        }
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.io_error().kind()
    }

    /// The operation that failed, named after the system call.
    pub fn syscall(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "bind",
            Self::Listen { .. } => "listen",
            Self::Accept { .. } => "accept",
            Self::Connect { .. } => "connect",
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::Shutdown { .. } => "shutdown",
        }
    }

    /// Errno style code such as `ECONNREFUSED`, or `UNKNOWN`.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            io::ErrorKind::ConnectionRefused => "ECONNREFUSED",
            io::ErrorKind::ConnectionReset => "ECONNRESET",
            io::ErrorKind::ConnectionAborted => "ECONNABORTED",
            io::ErrorKind::NotConnected => "ENOTCONN",
            io::ErrorKind::AddrInUse => "EADDRINUSE",
            io::ErrorKind::AddrNotAvailable => "EADDRNOTAVAIL",
            io::ErrorKind::BrokenPipe => "EPIPE",
            io::ErrorKind::NotFound => "ENOENT",
            io::ErrorKind::PermissionDenied => "EACCES",
            io::ErrorKind::TimedOut => "ETIMEDOUT",
            io::ErrorKind::InvalidInput => "EINVAL",
            io::ErrorKind::HostUnreachable => "EHOSTUNREACH",
            io::ErrorKind::NetworkUnreachable => "ENETUNREACH",
            _ => "UNKNOWN",
        }
    }
}

/// Copies the OS error code when there is one, otherwise the kind and the message.
impl Clone for NetError {
    fn clone(&self) -> Self {
        let source = self.io_error();
        let source = match source.raw_os_error() {
            Some(code) => io::Error::from_raw_os_error(code),
            None => io::Error::new(source.kind(), source.to_string()),
        };
        match self {
            Self::Bind { .. } => Self::bind(source),
            Self::Listen { .. } => Self::listen(source),
            Self::Accept { .. } => Self::accept(source),
            Self::Connect { .. } => Self::connect(source),
            Self::Read { .. } => Self::read(source),
            Self::Write { .. } => Self::write(source),
            Self::Shutdown { .. } => Self::shutdown(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_and_syscall() {
        let error = NetError::connect(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(error.code(), "ECONNREFUSED");
        assert_eq!(error.syscall(), "connect");
        assert!(error.to_string().starts_with("connect error"));

        let error = NetError::bind(io::Error::from(io::ErrorKind::AddrInUse));
        assert_eq!(error.code(), "EADDRINUSE");
        assert_eq!(error.kind(), io::ErrorKind::AddrInUse);
    }

    #[test]
    fn clone_keeps_kind_and_syscall() {
        let error = NetError::read(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
        let copy = error.clone();
        assert_eq!(copy.syscall(), "read");
        assert_eq!(copy.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(copy.to_string(), error.to_string());
    }
}
