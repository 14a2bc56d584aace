//! TCP server speaking the line-delimited protocol in [`crate::rpc`].
//!
//! Each connection is its own task; each request runs on the blocking pool
//! because project sections may wait on a lock or on SQLite.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{LeaseError, Result};
use crate::reaper;
use crate::rpc::{self, Response};
use crate::service::LeaseService;
use crate::store::LeaseStore;

/// Accept connections until `shutdown` resolves.
pub async fn serve<S, F>(service: Arc<LeaseService<S>>, listener: TcpListener, shutdown: F) -> Result<()>
where
    S: LeaseStore + 'static,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutting down");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "accepted connection");
                    let service = Arc::clone(&service);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(service, stream, peer).await {
                            tracing::debug!(%peer, error = %e, "connection closed with error");
                        }
                    });
                }
                Err(e) => tracing::error!(error = %e, "failed to accept connection"),
            }
        }
    }
}

/// Longest request line accepted; longer lines are answered and skipped.
pub const MAX_LINE_BYTES: usize = 1 << 20;

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    /// `buf` holds one line without its terminator.
    Line,
    TooLong,
    Eof,
}

/// Read one `\n`-terminated line into `buf`, never buffering more than
/// `max + 1` bytes. An oversized line is drained up to its newline.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    let limit = max as u64 + 1;
    buf.clear();
    if (&mut *reader).take(limit).read_until(b'\n', buf).await? == 0 {
        return Ok(Frame::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        return Ok(Frame::Line);
    }
    if buf.len() <= max {
        return Ok(Frame::Line);
    }
    loop {
        buf.clear();
        let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
        if n == 0 || buf.last() == Some(&b'\n') {
            break;
        }
    }
    buf.clear();
    Ok(Frame::TooLong)
}

async fn handle_connection<S>(service: Arc<LeaseService<S>>, stream: TcpStream, peer: SocketAddr) -> Result<()>
where
    S: LeaseStore + 'static,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        let response = match read_frame(&mut reader, &mut buf, MAX_LINE_BYTES).await? {
            Frame::Eof => break,
            Frame::TooLong => {
                tracing::debug!(%peer, "oversized request line");
                Response::invalid(None, format!("request line exceeds {MAX_LINE_BYTES} bytes"))
            }
            Frame::Line => match String::from_utf8(std::mem::take(&mut buf)) {
                Err(_) => Response::invalid(None, "request line is not valid UTF-8"),
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => {
                    let svc = Arc::clone(&service);
                    match tokio::task::spawn_blocking(move || rpc::handle_line(&svc, &line)).await {
                        Ok(response) => response,
                        Err(e) => {
                            tracing::error!(%peer, error = %e, "request worker failed");
                            Response::failure(None, &LeaseError::Io(std::io::Error::other(e.to_string())))
                        }
                    }
                }
            },
        };
        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
    }
    tracing::debug!(%peer, "connection closed");
    Ok(())
}

/// Bind `config.listen`, start the reaper, and serve until Ctrl-C.
pub async fn run<S>(service: Arc<LeaseService<S>>) -> Result<()>
where
    S: LeaseStore + 'static,
{
    let config = service.config().clone();
    let listener = TcpListener::bind(&config.listen).await.map_err(|e| {
        LeaseError::Config(format!("cannot listen on {}: {e}", config.listen))
    })?;
    tracing::info!(
        addr = %listener.local_addr()?,
        version = env!("CARGO_PKG_VERSION"),
        "pathlease listening"
    );

    let mut reaper = reaper::spawn(Arc::clone(&service), config.reaper_interval())?;
    let result = serve(service, listener, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    })
    .await;
    reaper.stop();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::store::MemoryLeaseStore;
    use serde_json::Value;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::sync::oneshot;

    async fn start() -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<Result<()>>) {
        let service = Arc::new(LeaseService::new(MemoryLeaseStore::new(), ServiceConfig::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(serve(service, listener, async move {
            let _ = rx.await;
        }));
        (addr, tx, task)
    }

    async fn roundtrip(
        lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
        writer: &mut tokio::net::tcp::OwnedWriteHalf,
        request: &str,
    ) -> Value {
        writer.write_all(request.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn serves_requests_over_tcp() {
        let (addr, shutdown, task) = start().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let pong = roundtrip(&mut lines, &mut writer, r#"{"id": 1, "method": "ping"}"#).await;
        assert_eq!(pong["id"], 1);
        assert_eq!(pong["ok"], true);
        assert_eq!(pong["result"]["pong"], true);

        let grant = roundtrip(
            &mut lines,
            &mut writer,
            r#"{"id": 2, "method": "reserve", "params": {"project_id": "p", "holder": "a", "patterns": ["src/**"]}}"#,
        )
        .await;
        assert_eq!(grant["ok"], true);
        let lease_id = grant["result"]["lease_id"].as_str().unwrap().to_string();

        let bad = roundtrip(&mut lines, &mut writer, "this is not json").await;
        assert_eq!(bad["ok"], false);
        assert_eq!(bad["error"]["code"], "invalid_request");

        let release = roundtrip(
            &mut lines,
            &mut writer,
            &format!(r#"{{"id": 4, "method": "release", "params": {{"lease_id": "{lease_id}", "holder": "a"}}}}"#),
        )
        .await;
        assert_eq!(release["id"], 4);
        assert_eq!(release["result"]["ok"], true);

        shutdown.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invalid_utf8_is_answered_and_connection_stays_open() {
        let (addr, shutdown, task) = start().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"\xff\xfe garbage\n").await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let bad: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(bad["ok"], false);
        assert_eq!(bad["error"]["code"], "invalid_request");

        let pong = roundtrip(&mut lines, &mut writer, r#"{"id": 2, "method": "ping"}"#).await;
        assert_eq!(pong["id"], 2);
        assert_eq!(pong["ok"], true);

        shutdown.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn oversized_lines_are_skipped_whole() {
        let input = b"0123456789abcdef\nshort\r\ntail".to_vec();
        let mut reader: &[u8] = &input;
        let mut buf = Vec::new();

        assert_eq!(read_frame(&mut reader, &mut buf, 8).await.unwrap(), Frame::TooLong);
        assert!(buf.is_empty());
        assert_eq!(read_frame(&mut reader, &mut buf, 8).await.unwrap(), Frame::Line);
        assert_eq!(buf, b"short");
        assert_eq!(read_frame(&mut reader, &mut buf, 8).await.unwrap(), Frame::Line);
        assert_eq!(buf, b"tail");
        assert_eq!(read_frame(&mut reader, &mut buf, 8).await.unwrap(), Frame::Eof);
    }
}
