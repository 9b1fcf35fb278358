use std::borrow::Cow;
use std::net::SocketAddr;

use async_trait::async_trait;
use mailparse::{MailHeaderMap, parse_headers};

use super::reply::Reply;

/// What the listener knows about the client side of a session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub peer: SocketAddr,
    /// Argument of the last HELO/EHLO
    pub helo_name: Option<String>,
}

/// One completed DATA transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEnvelope {
    pub mail_from: String,
    pub rcpt_tos: Vec<String>,
    /// Raw message bytes, dot-unstuffed, without the terminating `.` line
    pub content: Vec<u8>,
}

impl InboundEnvelope {
    /// Best-effort text view of the content; invalid sequences become U+FFFD
    pub fn decoded_content(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    /// Subject header, if the content has a parseable header block
    pub fn subject(&self) -> Option<String> {
        let (headers, _) = parse_headers(&self.content).ok()?;
        headers.get_first_value("Subject")
    }
}

/// Called by the listener once the body of a message has been read.
/// The returned reply is sent to the client as the answer to DATA.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_data(&self, session: &SessionInfo, envelope: &InboundEnvelope) -> Reply;
}

/// Logs every message and accepts it
#[derive(Debug, Default, Clone)]
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle_data(&self, session: &SessionInfo, envelope: &InboundEnvelope) -> Reply {
        log::info!("Message from: {} (peer {})", envelope.mail_from, session.peer);
        log::info!("Message to: {:?}", envelope.rcpt_tos);
        if let Some(subject) = envelope.subject() {
            log::info!("Message subject: {}", subject);
        }
        log::debug!("Message data: {}", envelope.decoded_content());

        Reply::accepted()
    }
}
