use std::io;
use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, tcp};
#[cfg(unix)]
use tokio::net::{UnixStream, unix};

use super::HandleKind;

pub(super) enum ReadHalf {
    Tcp(tcp::OwnedReadHalf),
    #[cfg(unix)]
    Pipe(unix::OwnedReadHalf),
}

pub(super) enum WriteHalf {
    Tcp(tcp::OwnedWriteHalf),
    #[cfg(unix)]
    Pipe(unix::OwnedWriteHalf),
}

pub(super) struct Split {
    pub(super) kind: HandleKind,
    pub(super) reader: ReadHalf,
    pub(super) writer: WriteHalf,
    pub(super) local_addr: Option<SocketAddr>,
    pub(super) peer_addr: Option<SocketAddr>,
}

pub(super) fn split_tcp(stream: TcpStream) -> Split {
    let local_addr = stream.local_addr().ok();
    let peer_addr = stream.peer_addr().ok();
    let (reader, writer) = stream.into_split();
    Split { kind: HandleKind::Tcp, reader: ReadHalf::Tcp(reader), writer: WriteHalf::Tcp(writer), local_addr, peer_addr }
}

#[cfg(unix)]
pub(super) fn split_pipe(stream: UnixStream) -> Split {
    let (reader, writer) = stream.into_split();
    Split { kind: HandleKind::Pipe, reader: ReadHalf::Pipe(reader), writer: WriteHalf::Pipe(writer), local_addr: None, peer_addr: None }
}

impl ReadHalf {
    pub(super) async fn read_buf(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        match self {
            ReadHalf::Tcp(reader) => reader.read_buf(buf).await,
            #[cfg(unix)]
            ReadHalf::Pipe(reader) => reader.read_buf(buf).await,
        }
    }
}

impl WriteHalf {
    pub(super) fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        match self {
            WriteHalf::Tcp(writer) => writer.try_write(buf),
            #[cfg(unix)]
            WriteHalf::Pipe(writer) => writer.try_write(buf),
        }
    }

    pub(super) async fn writable(&self) -> io::Result<()> {
        match self {
            WriteHalf::Tcp(writer) => writer.writable().await,
            #[cfg(unix)]
            WriteHalf::Pipe(writer) => writer.writable().await,
        }
    }

    pub(super) async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            WriteHalf::Tcp(writer) => writer.shutdown().await,
            #[cfg(unix)]
            WriteHalf::Pipe(writer) => writer.shutdown().await,
        }
    }

    pub(super) fn set_no_delay(&self, no_delay: bool) -> io::Result<()> {
        match self {
            WriteHalf::Tcp(writer) => writer.as_ref().set_nodelay(no_delay),
            #[cfg(unix)]
            WriteHalf::Pipe(_) => Ok(()),
        }
    }
}
