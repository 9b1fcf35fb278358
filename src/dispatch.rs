use std::ops::{Deref, DerefMut};

use rand::Rng;
use rand::rngs::StdRng;
use serde::Serialize;
use thiserror::Error;

use crate::address::AddressGenerator;
use crate::config::SendConfig;

pub const TEST_SUBJECT: &str = "Test Email";
pub const TEST_BODY: &str = "This is a test email to a non-existent address.";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Failed to connect to SMTP server {server}:{port}: {reason}")]
    Connect {
        server: String,
        port: u16,
        reason: String,
    },

    #[error("STARTTLS upgrade failed: {0}")]
    StartTls(String),

    #[error("Authentication failed: {0}")]
    Authenticate(String),

    #[error("{0}")]
    Send(String),
}

/// Opens outbound sessions. One session is opened per dispatch run.
pub trait MailConnector {
    type Session: MailSession;

    fn connect(&self, server: &str, port: u16) -> Result<Self::Session, DispatchError>;
}

/// An open SMTP client session
pub trait MailSession {
    fn starttls(&mut self) -> Result<(), DispatchError>;

    fn authenticate(&mut self, user: &str, password: &str) -> Result<(), DispatchError>;

    /// One transaction: envelope-from is `message.from`, envelope-to is `recipient`.
    /// A failure must leave the session usable for the next recipient
    /// whenever the connection itself is still up.
    fn send(&mut self, message: &OutboundMessage, recipient: &str) -> Result<(), DispatchError>;

    /// Ends the session. Called exactly once, on every exit path.
    fn close(&mut self);
}

/// Closes the wrapped session when dropped
struct SessionGuard<S: MailSession>(S);

impl<S: MailSession> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.0
    }
}

impl<S: MailSession> DerefMut for SessionGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.0
    }
}

impl<S: MailSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// The forged message; built once per (sender, domain) and reused for every recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub from: String,
    pub subject: String,
    pub body: String,
}

impl OutboundMessage {
    pub fn spoofed(from: &str) -> Self {
        Self {
            from: from.to_string(),
            subject: TEST_SUBJECT.to_string(),
            body: TEST_BODY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Sent,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendAttempt {
    pub sender: String,
    pub recipient: String,
    pub outcome: Outcome,
}

impl SendAttempt {
    pub fn is_sent(&self) -> bool {
        self.outcome == Outcome::Sent
    }
}

/// Every attempt of a run, in the order they were made
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub attempts: Vec<SendAttempt>,
}

impl DispatchReport {
    pub fn sent(&self) -> usize {
        self.attempts.iter().filter(|a| a.is_sent()).count()
    }

    pub fn failed(&self) -> usize {
        self.attempts.len() - self.sent()
    }
}

/// Sends spoofed test messages over a single authenticated session
pub struct SpoofedMailDispatcher<C, R = StdRng> {
    connector: C,
    generator: AddressGenerator<R>,
}

impl<C: MailConnector> SpoofedMailDispatcher<C, StdRng> {
    pub fn new(connector: C) -> Self {
        Self::with_generator(connector, AddressGenerator::new())
    }
}

impl<C: MailConnector, R: Rng> SpoofedMailDispatcher<C, R> {
    pub fn with_generator(connector: C, generator: AddressGenerator<R>) -> Self {
        Self {
            connector,
            generator,
        }
    }

    /// Runs one dispatch to completion.
    ///
    /// Connect, STARTTLS and authentication failures abort the run and are
    /// returned as the error. Individual send failures are recorded in the
    /// report and never stop the loop.
    pub fn run(&mut self, config: &SendConfig) -> Result<DispatchReport, DispatchError> {
        let result = self.dispatch(config);
        if let Err(e) = &result {
            log::error!("{}", e);
        }
        result
    }

    fn dispatch(&mut self, config: &SendConfig) -> Result<DispatchReport, DispatchError> {
        log::info!("Connecting to SMTP server {}:{}", config.server, config.port);
        let mut session = SessionGuard(self.connector.connect(&config.server, config.port)?);

        session.starttls()?;
        log::debug!("Starting TLS");

        session.authenticate(&config.user, &config.password)?;
        log::info!("Logged in as {}", config.user);

        let mut report = DispatchReport::default();

        for domain in &config.domains {
            let recipients = self.generator.generate(domain, config.per_domain_count);

            for sender in &config.spoofed_senders {
                let message = OutboundMessage::spoofed(sender);

                for recipient in &recipients {
                    let outcome = match session.send(&message, recipient) {
                        Ok(()) => {
                            log::info!("Email from {} sent to {}", sender, recipient);
                            Outcome::Sent
                        }
                        Err(e) => {
                            log::error!(
                                "Failed to send email from {} to {}: {}",
                                sender,
                                recipient,
                                e
                            );
                            Outcome::Failed {
                                reason: e.to_string(),
                            }
                        }
                    };

                    report.attempts.push(SendAttempt {
                        sender: sender.clone(),
                        recipient: recipient.clone(),
                        outcome,
                    });
                }
            }
        }

        log::info!(
            "Dispatch finished: {} sent, {} failed",
            report.sent(),
            report.failed()
        );
        Ok(report)
    }
}
