//! Raw byte tunnel from a hijacked client connection to the container engine
//! socket.
use std::{fmt, io, path::PathBuf, str::FromStr};

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};

/// Errors that terminate a single tunnelled connection.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TunnelError {
    #[error("failed to connect to {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to forward buffered request: {0}")]
    Write(#[source] io::Error),

    #[error("tunnel copy failed: {0}")]
    Copy(#[source] io::Error),

    #[error("request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },

    #[error("malformed request head: {0}")]
    Malformed(String),

    #[error("connection closed before a request head arrived")]
    Closed,
}

/// Where passthrough traffic is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendAddr {
    /// A unix domain socket path, e.g. `/var/run/docker.sock`.
    Unix(PathBuf),
    /// A `host:port` TCP endpoint.
    Tcp(String),
}

impl BackendAddr {
    async fn dial(&self) -> io::Result<Box<dyn BackendIo>> {
        match self {
            #[cfg(unix)]
            BackendAddr::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                Ok(Box::new(stream))
            }
            #[cfg(not(unix))]
            BackendAddr::Unix(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are unsupported on this platform",
            )),
            BackendAddr::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str()).await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
        }
    }
}

impl FromStr for BackendAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("passthrough target is empty".to_string());
        }

        if let Some(path) = s
            .strip_prefix("unix://")
            .or_else(|| s.strip_prefix("unix:"))
        {
            if path.is_empty() {
                return Err(format!("'{s}' has no socket path"));
            }
            return Ok(BackendAddr::Unix(PathBuf::from(path)));
        }
        if s.starts_with('/') {
            return Ok(BackendAddr::Unix(PathBuf::from(s)));
        }

        let addr = s.strip_prefix("tcp://").unwrap_or(s);
        match addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(BackendAddr::Tcp(addr.to_string()))
            }
            _ => Err(format!("'{s}' is neither a socket path nor host:port")),
        }
    }
}

impl fmt::Display for BackendAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendAddr::Unix(path) => write!(f, "unix:{}", path.display()),
            BackendAddr::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

trait BackendIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> BackendIo for T {}

/// Which end of a tunnel finished first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelSide {
    Client,
    Backend,
}

impl fmt::Display for TunnelSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelSide::Client => f.write_str("client"),
            TunnelSide::Backend => f.write_str("backend"),
        }
    }
}

/// How a tunnel ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelStats {
    pub closed_by: TunnelSide,
    /// Bytes copied in the direction that finished. When the client closed
    /// first this includes the replayed request head.
    pub bytes: u64,
}

/// Forwards hijacked connections to a fixed backend.
#[derive(Debug, Clone)]
pub struct Passthrough {
    target: BackendAddr,
}

impl Passthrough {
    pub fn new(target: BackendAddr) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &BackendAddr {
        &self.target
    }

    /// Dial the backend, replay `buffered` verbatim, then copy in both
    /// directions until either side closes or fails. The other side is shut
    /// down as soon as that happens.
    pub async fn run<C>(&self, client: C, buffered: &[u8]) -> Result<TunnelStats, TunnelError>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let mut backend = self.target.dial().await.map_err(|source| TunnelError::Dial {
            target: self.target.to_string(),
            source,
        })?;
        tracing::debug!(target = %self.target, "Tunnel opened");

        backend.write_all(buffered).await.map_err(TunnelError::Write)?;

        let mut stats = splice(client, backend).await?;
        if stats.closed_by == TunnelSide::Client {
            stats.bytes += buffered.len() as u64;
        }

        tracing::debug!(
            target = %self.target,
            closed_by = %stats.closed_by,
            bytes = stats.bytes,
            "Tunnel closed"
        );
        Ok(stats)
    }
}

async fn splice<C, B>(client: C, backend: B) -> Result<TunnelStats, TunnelError>
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut backend_rd, mut backend_wr) = tokio::io::split(backend);

    let upstream = async {
        let n = tokio::io::copy(&mut client_rd, &mut backend_wr).await?;
        backend_wr.shutdown().await?;
        Ok::<_, io::Error>(n)
    };
    let downstream = tokio::io::copy(&mut backend_rd, &mut client_wr);

    // First direction to finish ends the tunnel; the other copy is dropped.
    let outcome = tokio::select! {
        res = upstream => res.map(|bytes| TunnelStats { closed_by: TunnelSide::Client, bytes }),
        res = downstream => res.map(|bytes| TunnelStats { closed_by: TunnelSide::Backend, bytes }),
    };

    // The peer may already be gone; nothing useful to report.
    let _ = client_wr.shutdown().await;

    outcome.map_err(TunnelError::Copy)
}
