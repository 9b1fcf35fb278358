use std::time::Duration;

use lettre::address::Envelope;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, Message};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{SmtpConnection, TlsParameters};
use lettre::transport::smtp::commands::{Data, Mail, Rcpt, Rset};
use lettre::transport::smtp::extension::ClientId;
use lettre::transport::smtp::response::Response;
use lettre::Address;

use crate::config::SendConfig;
use crate::dispatch::{DispatchError, MailConnector, MailSession, OutboundMessage};

const AUTH_MECHANISMS: [Mechanism; 2] = [Mechanism::Plain, Mechanism::Login];

/// Opens real SMTP sessions with lettre's low-level client
#[derive(Debug, Clone)]
pub struct SmtpConnector {
    hello_name: ClientId,
    timeout: Duration,
    accept_invalid_certs: bool,
}

impl SmtpConnector {
    pub fn new(config: &SendConfig) -> Self {
        let hello_name = match &config.hello_name {
            Some(name) => ClientId::Domain(name.clone()),
            None => ClientId::default(),
        };
        Self {
            hello_name,
            timeout: config.timeout,
            accept_invalid_certs: config.accept_invalid_certs,
        }
    }
}

impl MailConnector for SmtpConnector {
    type Session = SmtpSession;

    fn connect(&self, server: &str, port: u16) -> Result<SmtpSession, DispatchError> {
        // Plain connection; the upgrade happens in `starttls`.
        let conn = SmtpConnection::connect(
            (server, port),
            Some(self.timeout),
            &self.hello_name,
            None,
            None,
        )
        .map_err(|e| DispatchError::Connect {
            server: server.to_string(),
            port,
            reason: e.to_string(),
        })?;

        Ok(SmtpSession {
            conn,
            server: server.to_string(),
            hello_name: self.hello_name.clone(),
            accept_invalid_certs: self.accept_invalid_certs,
        })
    }
}

pub struct SmtpSession {
    conn: SmtpConnection,
    server: String,
    hello_name: ClientId,
    accept_invalid_certs: bool,
}

impl SmtpSession {
    fn transaction(
        &mut self,
        envelope: &Envelope,
        email: &[u8],
    ) -> Result<Response, lettre::transport::smtp::Error> {
        self.conn.command(Mail::new(envelope.from().cloned(), vec![]))?;
        for to in envelope.to() {
            self.conn.command(Rcpt::new(to.clone(), vec![]))?;
        }
        self.conn.command(Data)?;
        self.conn.message(email)
    }
}

impl MailSession for SmtpSession {
    fn starttls(&mut self) -> Result<(), DispatchError> {
        let params = TlsParameters::builder(self.server.clone())
            .dangerous_accept_invalid_certs(self.accept_invalid_certs)
            .build()
            .map_err(|e| DispatchError::StartTls(e.to_string()))?;

        self.conn
            .starttls(&params, &self.hello_name)
            .map_err(|e| DispatchError::StartTls(e.to_string()))
    }

    fn authenticate(&mut self, user: &str, password: &str) -> Result<(), DispatchError> {
        let credentials = Credentials::new(user.to_string(), password.to_string());
        self.conn
            .auth(&AUTH_MECHANISMS, &credentials)
            .map(|_| ())
            .map_err(|e| DispatchError::Authenticate(e.to_string()))
    }

    fn send(&mut self, message: &OutboundMessage, recipient: &str) -> Result<(), DispatchError> {
        let email = render(message, recipient)?;

        match self.transaction(email.envelope(), &email.formatted()) {
            Ok(response) => {
                log::debug!("Server accepted message: {:?}", response.code());
                Ok(())
            }
            Err(e) => {
                // Clear the half-finished transaction so the next recipient starts clean.
                if !self.conn.has_broken() {
                    let _ = self.conn.command(Rset);
                }
                Err(DispatchError::Send(e.to_string()))
            }
        }
    }

    fn close(&mut self) {
        if self.conn.quit().is_err() {
            self.conn.abort();
        }
    }
}

/// Builds the wire form of `message` addressed to `recipient`.
/// The recipient only goes into the envelope; the headers carry no To.
pub fn render(message: &OutboundMessage, recipient: &str) -> Result<Message, DispatchError> {
    let from: Mailbox = message
        .from
        .parse()
        .map_err(|e| DispatchError::Send(format!("invalid sender {}: {}", message.from, e)))?;
    let to: Address = recipient
        .parse()
        .map_err(|e| DispatchError::Send(format!("invalid recipient {}: {}", recipient, e)))?;

    let envelope = Envelope::new(Some(from.email.clone()), vec![to])
        .map_err(|e| DispatchError::Send(e.to_string()))?;

    Message::builder()
        .from(from)
        .subject(message.subject.clone())
        .header(ContentType::TEXT_PLAIN)
        .envelope(envelope)
        .body(message.body.clone())
        .map_err(|e| DispatchError::Send(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::render;
    use crate::dispatch::{DispatchError, OutboundMessage};

    #[test]
    fn test_render_uses_sender_and_recipient_in_envelope() {
        let message = OutboundMessage::spoofed("a@x.com");
        let email = render(&message, "abcdefgh@y.com").unwrap();

        let envelope = email.envelope();
        assert_eq!(envelope.from().map(|a| a.to_string()).as_deref(), Some("a@x.com"));
        assert_eq!(
            envelope.to().iter().map(|a| a.to_string()).collect::<Vec<_>>(),
            vec!["abcdefgh@y.com".to_string()]
        );

        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("From: a@x.com"));
        assert!(raw.contains("Subject: Test Email"));
        assert!(raw.contains("This is a test email to a non-existent address."));
        assert!(!raw.contains("To:"));
    }

    #[test]
    fn test_render_rejects_bad_sender() {
        let message = OutboundMessage::spoofed("not an address");
        let err = render(&message, "abcdefgh@y.com").unwrap_err();
        assert!(matches!(err, DispatchError::Send(_)));
    }
}
