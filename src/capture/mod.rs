//! Capture endpoint: an SMTP sink that logs every message and delivers nothing.

mod handler;
mod reply;
mod session;

pub use handler::{InboundEnvelope, LoggingHandler, MessageHandler, SessionInfo};
pub use reply::Reply;
pub use session::{Session, SessionState, Step};

use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::config::CaptureConfig;

/// Pause after a failed `accept` (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Binds the capture socket on `config.host:config.port`
pub async fn bind(config: &CaptureConfig) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    log::info!("SMTP server running on {}", listener.local_addr()?);
    Ok(listener)
}

/// Accepts SMTP sessions and passes each finished message to a [`MessageHandler`]
pub struct CaptureListener<H> {
    handler: Arc<H>,
    hostname: Arc<str>,
    idle_timeout: Duration,
}

impl<H: MessageHandler + 'static> CaptureListener<H> {
    pub fn new(handler: H, config: &CaptureConfig) -> Self {
        Self {
            handler: Arc::new(handler),
            hostname: Arc::from(config.hostname.as_str()),
            idle_timeout: config.idle_timeout,
        }
    }

    /// Serves sessions until `shutdown` resolves, then aborts the ones still open
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Shutting down capture listener");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        log::debug!("Accepted connection from {}", peer);
                        let handler = self.handler.clone();
                        let hostname = self.hostname.clone();
                        let idle_timeout = self.idle_timeout;
                        sessions.spawn(async move {
                            if let Err(e) = serve_session(stream, peer, handler, hostname, idle_timeout).await {
                                log::warn!("Session with {} ended with error: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        log::error!("Error accepting connection: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                // Reap finished sessions so the set does not grow without bound.
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }

        sessions.shutdown().await;
        Ok(())
    }

    /// Serves until the process is terminated
    pub async fn serve_forever(&self, listener: TcpListener) -> std::io::Result<()> {
        self.serve(listener, std::future::pending()).await
    }
}

async fn serve_session<H: MessageHandler>(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<H>,
    hostname: Arc<str>,
    idle_timeout: Duration,
) -> std::io::Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut session = Session::new(peer, &hostname);

    send(&mut writer, &Reply::greeting(&hostname)).await?;

    let mut line = Vec::new();
    loop {
        line.clear();
        match timeout(idle_timeout, reader.read_until(b'\n', &mut line)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                log::debug!("Session with {} timed out", peer);
                send(&mut writer, &Reply::timeout()).await?;
                break;
            }
        }

        match session.handle_command(&line) {
            Step::Reply(reply) => send(&mut writer, &reply).await?,
            Step::Quit(reply) => {
                send(&mut writer, &reply).await?;
                break;
            }
            Step::BeginData(reply) => {
                send(&mut writer, &reply).await?;
                let content = match read_body(&mut reader, idle_timeout).await {
                    Ok(Some(content)) => content,
                    Ok(None) => {
                        log::debug!("Connection from {} closed during DATA", peer);
                        break;
                    }
                    Err(e) if e.kind() == ErrorKind::TimedOut => {
                        log::debug!("Session with {} timed out during DATA", peer);
                        send(&mut writer, &Reply::timeout()).await?;
                        break;
                    }
                    Err(e) => return Err(e),
                };
                let envelope = session.finish_data(content);
                let reply = handler.handle_data(session.info(), &envelope).await;
                send(&mut writer, &reply).await?;
            }
        }
    }

    Ok(())
}

/// Reads a message body up to the lone `.` line, undoing dot-stuffing.
/// Returns `None` if the peer hangs up first. `idle_timeout` bounds the wait
/// for each line, not the whole body; silence yields `ErrorKind::TimedOut`.
async fn read_body<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    idle_timeout: Duration,
) -> std::io::Result<Option<Vec<u8>>> {
    let mut content = Vec::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = timeout(idle_timeout, reader.read_until(b'\n', &mut line))
            .await
            .map_err(|_| std::io::Error::from(ErrorKind::TimedOut))??;
        if read == 0 {
            return Ok(None);
        }
        if line == b".\r\n" || line == b".\n" {
            return Ok(Some(content));
        }
        let unstuffed = if line.starts_with(b"..") { &line[1..] } else { &line[..] };
        content.extend_from_slice(unstuffed);
    }
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, reply: &Reply) -> std::io::Result<()> {
    writer.write_all(reply.to_string().as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::read_body;
    use std::io::ErrorKind;
    use std::time::Duration;

    const IDLE: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_read_body_unstuffs_and_stops_at_dot() {
        let mut input: &[u8] = b"Subject: x\r\n\r\n..leading dot\r\nplain\r\n.\r\nMAIL FROM:<a@x.com>\r\n";
        let body = read_body(&mut input, IDLE).await.unwrap().unwrap();
        assert_eq!(body, b"Subject: x\r\n\r\n.leading dot\r\nplain\r\n");
        // The command after the body stays unread.
        assert_eq!(input, b"MAIL FROM:<a@x.com>\r\n");
    }

    #[tokio::test]
    async fn test_read_body_keeps_invalid_bytes() {
        let mut input: &[u8] = b"\xff\xfe\x00binary\r\n.\r\n";
        let body = read_body(&mut input, IDLE).await.unwrap().unwrap();
        assert_eq!(body, b"\xff\xfe\x00binary\r\n");
    }

    #[tokio::test]
    async fn test_read_body_eof_before_terminator() {
        let mut input: &[u8] = b"partial message\r\n";
        assert_eq!(read_body(&mut input, IDLE).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_body_times_out_on_silence() {
        let (client, server) = tokio::io::duplex(64);
        let mut reader = tokio::io::BufReader::new(server);
        let _keep_open = client;

        let err = read_body(&mut reader, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }
}
