//! Accept loop shared by the control API and the passthrough tunnel.
//!
//! Each connection's first request head is buffered and inspected before any
//! protocol handling happens. Requests under the API prefix are replayed into
//! hyper with keep-alive disabled, so every API connection carries exactly one
//! request. Anything else is hijacked: the raw socket and the bytes read so
//! far go to the passthrough tunnel untouched.
use std::{
    convert::Infallible,
    io,
    net::SocketAddr,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
};

use axum::body::Body as AxumBody;
use bytes::{Bytes, BytesMut};
use eyre::{Result, WrapErr};
use hyper::{Request, Response, StatusCode, body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf},
    net::{TcpListener, TcpStream},
};
use tracing::Instrument;

use crate::{
    adapters::{
        api::ApiHandler,
        passthrough::{Passthrough, TunnelError},
    },
    tracing_setup::create_connection_span,
    utils::graceful_shutdown::ShutdownToken,
};

/// Upper bound on a buffered request head.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

const MAX_HEADERS: usize = 100;

/// The parts of the first request line needed to classify a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    /// Origin-form path, including any query string.
    pub path: String,
    /// Length of the head in bytes, including the blank line.
    pub len: usize,
}

/// Read from `stream` into `buf` until a complete HTTP/1 request head is
/// buffered. Bytes past the head (an early body, a pipelined request) stay in
/// `buf`.
pub async fn read_head<S>(stream: &mut S, buf: &mut BytesMut) -> Result<RequestHead, TunnelError>
where
    S: AsyncRead + Unpin,
{
    loop {
        if !buf.is_empty() {
            if let Some(head) = parse_head(buf)? {
                return Ok(head);
            }
        }
        if buf.len() >= MAX_HEAD_BYTES {
            return Err(TunnelError::HeadTooLarge {
                limit: MAX_HEAD_BYTES,
            });
        }

        buf.reserve(4096);
        let n = stream.read_buf(buf).await.map_err(TunnelError::Copy)?;
        if n == 0 {
            return Err(TunnelError::Closed);
        }
    }
}

fn parse_head(buf: &[u8]) -> Result<Option<RequestHead>, TunnelError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => {
            if len > MAX_HEAD_BYTES {
                return Err(TunnelError::HeadTooLarge {
                    limit: MAX_HEAD_BYTES,
                });
            }
            Ok(Some(RequestHead {
                method: req.method.unwrap_or_default().to_string(),
                path: origin_path(req.path.unwrap_or("/")),
                len,
            }))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(TunnelError::Malformed(e.to_string())),
    }
}

/// Reduce an absolute-form request target (`http://host/p`) to its path.
fn origin_path(target: &str) -> String {
    if target.starts_with('/') {
        return target.to_string();
    }
    match target.split_once("://") {
        Some((_, rest)) => match rest.find('/') {
            Some(ix) => rest[ix..].to_string(),
            None => "/".to_string(),
        },
        None => target.to_string(),
    }
}

/// A stream that first yields previously-read bytes, then reads from the
/// wrapped stream.
#[derive(Debug)]
pub struct Rewind<T> {
    prefix: Option<Bytes>,
    inner: T,
}

impl<T> Rewind<T> {
    pub fn new(inner: T, prefix: Bytes) -> Self {
        Self {
            prefix: (!prefix.is_empty()).then_some(prefix),
            inner,
        }
    }

    pub fn into_inner(self) -> (T, Bytes) {
        (self.inner, self.prefix.unwrap_or_default())
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for Rewind<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(mut prefix) = this.prefix.take() {
            let n = prefix.len().min(buf.remaining());
            buf.put_slice(&prefix.split_to(n));
            if !prefix.is_empty() {
                this.prefix = Some(prefix);
            }
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for Rewind<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

struct ConnectionContext {
    api: Arc<ApiHandler>,
    passthrough: Passthrough,
    api_prefix: String,
}

/// Listener dispatching each connection to the control API or the tunnel.
pub struct IngressListener {
    listener: TcpListener,
    context: Arc<ConnectionContext>,
    next_id: AtomicU64,
}

impl IngressListener {
    pub async fn bind(
        addr: &str,
        api: Arc<ApiHandler>,
        passthrough: Passthrough,
        api_prefix: impl Into<String>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .wrap_err_with(|| format!("Failed to bind listener on {addr}"))?;
        Ok(Self {
            listener,
            context: Arc::new(ConnectionContext {
                api,
                passthrough,
                api_prefix: api_prefix.into(),
            }),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .wrap_err("Failed to read listener address")
    }

    /// Accept connections until shutdown is requested. Connections already
    /// in flight keep running on their own tasks.
    pub async fn run(self, mut shutdown: ShutdownToken) -> Result<()> {
        tracing::info!(
            addr = %self.local_addr()?,
            api_prefix = %self.context.api_prefix,
            passthrough = %self.context.passthrough.target(),
            "Listening"
        );

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let span = create_connection_span(id, peer);
                    let context = Arc::clone(&self.context);
                    tokio::spawn(
                        async move { context.handle(stream).await }.instrument(span),
                    );
                }
                reason = shutdown.wait_for_shutdown() => {
                    tracing::info!(?reason, "Listener stopping");
                    break;
                }
            }
        }
        Ok(())
    }
}

impl ConnectionContext {
    async fn handle(&self, mut stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let mut buf = BytesMut::with_capacity(4096);
        let head = match read_head(&mut stream, &mut buf).await {
            Ok(head) => head,
            Err(TunnelError::Closed) => {
                tracing::debug!("Connection closed before sending a request");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Rejecting connection");
                let status = match e {
                    TunnelError::HeadTooLarge { .. } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
                    _ => StatusCode::BAD_REQUEST,
                };
                let reply = format!(
                    "HTTP/1.1 {status}\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
                );
                let _ = stream.write_all(reply.as_bytes()).await;
                let _ = stream.shutdown().await;
                return;
            }
        };

        let span = tracing::Span::current();
        if head.path.starts_with(&self.api_prefix) {
            span.record("kind", "api");
            self.serve_api(stream, buf.freeze()).await;
        } else {
            span.record("kind", "passthrough");
            tracing::debug!(method = %head.method, path = %head.path, "Hijacking connection");
            match self.passthrough.run(stream, &buf).await {
                Ok(stats) => tracing::debug!(
                    closed_by = %stats.closed_by,
                    bytes = stats.bytes,
                    "Passthrough finished"
                ),
                Err(e) => tracing::warn!(error = %e, "Passthrough failed"),
            }
        }
    }

    async fn serve_api(&self, stream: TcpStream, buffered: Bytes) {
        let api = Arc::clone(&self.api);
        let service = service_fn(move |req: Request<Incoming>| {
            let api = Arc::clone(&api);
            async move {
                let req = req.map(AxumBody::new);
                match api.handle_request(req).await {
                    Ok(response) => Ok::<_, Infallible>(response),
                    Err(e) => {
                        tracing::error!(error = ?e, "Failed to build API response");
                        let mut response = Response::new(AxumBody::empty());
                        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                        Ok(response)
                    }
                }
            }
        });

        let io = TokioIo::new(Rewind::new(stream, buffered));
        if let Err(e) = http1::Builder::new()
            .keep_alive(false)
            .serve_connection(io, service)
            .await
        {
            tracing::debug!(error = %e, "API connection ended with error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_head_keeps_trailing_bytes() {
        let raw = b"POST /api/v1/routes HTTP/1.1\r\nHost: q\r\nContent-Length: 2\r\n\r\n{}";
        let mut reader: &[u8] = raw;
        let mut buf = BytesMut::new();

        let head = read_head(&mut reader, &mut buf).await.unwrap();
        assert_eq!(head.method, "POST");
        assert_eq!(head.path, "/api/v1/routes");
        assert_eq!(head.len, raw.len() - 2);
        assert_eq!(&buf[..], &raw[..]);
    }

    #[tokio::test]
    async fn test_read_head_across_partial_reads() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            client.write_all(b"GET /containers/js").await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(b"on HTTP/1.1\r\n\r\n").await.unwrap();
            client
        });

        let mut buf = BytesMut::new();
        let head = read_head(&mut server, &mut buf).await.unwrap();
        assert_eq!(head.path, "/containers/json");
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_read_head_errors() {
        let mut empty: &[u8] = b"";
        let err = read_head(&mut empty, &mut BytesMut::new()).await.unwrap_err();
        assert!(matches!(err, TunnelError::Closed));

        let mut garbage: &[u8] = b"\x16\x03\x01 not http\r\n\r\n";
        let err = read_head(&mut garbage, &mut BytesMut::new()).await.unwrap_err();
        assert!(matches!(err, TunnelError::Malformed(_)));

        let mut huge = b"GET / HTTP/1.1\r\nX-Pad: ".to_vec();
        huge.extend(std::iter::repeat_n(b'a', MAX_HEAD_BYTES));
        let mut reader: &[u8] = &huge;
        let err = read_head(&mut reader, &mut BytesMut::new()).await.unwrap_err();
        assert!(matches!(err, TunnelError::HeadTooLarge { .. }));
    }

    #[test]
    fn test_absolute_form_target_is_reduced_to_path() {
        assert_eq!(origin_path("/api/v1/routes"), "/api/v1/routes");
        assert_eq!(origin_path("http://quay:6660/api/v1/status"), "/api/v1/status");
        assert_eq!(origin_path("http://quay:6660"), "/");
    }

    #[tokio::test]
    async fn test_rewind_replays_prefix_then_inner() {
        let inner: &[u8] = b" world";
        let mut rewind = Rewind::new(inner, Bytes::from_static(b"hello"));

        let mut out = String::new();
        rewind.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");
    }
}
