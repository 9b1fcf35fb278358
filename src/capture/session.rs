//! Per-connection SMTP state machine for the capture listener.
//!
//! The machine only sees decoded command lines and produces replies; socket
//! I/O and body collection live in the listener.

use std::net::SocketAddr;

use super::handler::{InboundEnvelope, SessionInfo};
use super::reply::Reply;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Greeting sent, no HELO/EHLO yet
    Connected,
    /// HELO/EHLO received, no transaction open
    Greeted,
    MailFrom,
    /// At least one recipient accepted
    RcptTo,
    /// 354 sent, body being collected
    Data,
    /// Last message handed to the handler; a new transaction may start
    Accepted,
    Closed,
}

/// What the listener should do after a command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Reply(Reply),
    /// Send the reply, then read the message body
    BeginData(Reply),
    /// Send the reply, then close the connection
    Quit(Reply),
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    hostname: String,
    info: SessionInfo,
    mail_from: Option<String>,
    rcpt_tos: Vec<String>,
}

impl Session {
    pub fn new(peer: SocketAddr, hostname: &str) -> Self {
        Self {
            state: SessionState::Connected,
            hostname: hostname.to_string(),
            info: SessionInfo {
                peer,
                helo_name: None,
            },
            mail_from: None,
            rcpt_tos: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Feeds one command line (with or without its line ending)
    pub fn handle_command(&mut self, line: &[u8]) -> Step {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches(['\r', '\n']);

        let (verb, arg) = match line.split_once(' ') {
            Some((verb, arg)) => (verb, arg.trim()),
            None => (line, ""),
        };

        match verb.to_ascii_uppercase().as_str() {
            "HELO" => self.helo(arg, false),
            "EHLO" => self.helo(arg, true),
            "MAIL" => Step::Reply(self.mail(arg)),
            "RCPT" => Step::Reply(self.rcpt(arg)),
            "DATA" => self.data(arg),
            "RSET" => {
                self.reset();
                Step::Reply(Reply::ok())
            }
            "NOOP" => Step::Reply(Reply::ok()),
            "VRFY" => Step::Reply(Reply::new(
                252,
                "Cannot VRFY user, but will accept message and attempt delivery",
            )),
            "QUIT" => {
                self.state = SessionState::Closed;
                Step::Quit(Reply::closing())
            }
            "STARTTLS" => Step::Reply(Reply::new(454, "TLS not available")),
            "AUTH" => Step::Reply(Reply::new(502, "Error: command not implemented")),
            "" => Step::Reply(Reply::new(500, "Error: bad syntax")),
            other => Step::Reply(Reply::new(
                500,
                format!("Error: command \"{}\" not recognized", other),
            )),
        }
    }

    /// Closes the DATA phase and hands back the collected transaction
    pub fn finish_data(&mut self, content: Vec<u8>) -> InboundEnvelope {
        let envelope = InboundEnvelope {
            mail_from: self.mail_from.take().unwrap_or_default(),
            rcpt_tos: std::mem::take(&mut self.rcpt_tos),
            content,
        };
        self.state = SessionState::Accepted;
        envelope
    }

    fn helo(&mut self, arg: &str, extended: bool) -> Step {
        if arg.is_empty() {
            let verb = if extended { "EHLO" } else { "HELO" };
            return Step::Reply(Reply::new(501, format!("Syntax: {} hostname", verb)));
        }

        self.info.helo_name = Some(arg.to_string());
        self.clear_transaction();
        self.state = SessionState::Greeted;

        if extended {
            Step::Reply(Reply::multiline(
                250,
                vec![
                    self.hostname.clone(),
                    "8BITMIME".to_string(),
                    "SMTPUTF8".to_string(),
                ],
            ))
        } else {
            Step::Reply(Reply::new(250, self.hostname.clone()))
        }
    }

    fn mail(&mut self, arg: &str) -> Reply {
        match self.state {
            SessionState::Connected => return Reply::new(503, "Error: send HELO first"),
            SessionState::MailFrom | SessionState::RcptTo => {
                return Reply::new(503, "Error: nested MAIL command");
            }
            _ => {}
        }

        match parse_path(arg, "FROM:") {
            Some(address) => {
                self.mail_from = Some(address);
                self.state = SessionState::MailFrom;
                Reply::ok()
            }
            None => Reply::new(501, "Syntax: MAIL FROM: <address>"),
        }
    }

    fn rcpt(&mut self, arg: &str) -> Reply {
        if !matches!(self.state, SessionState::MailFrom | SessionState::RcptTo) {
            return Reply::new(503, "Error: need MAIL command");
        }

        match parse_path(arg, "TO:").filter(|a| !a.is_empty()) {
            Some(address) => {
                self.rcpt_tos.push(address);
                self.state = SessionState::RcptTo;
                Reply::ok()
            }
            None => Reply::new(501, "Syntax: RCPT TO: <address>"),
        }
    }

    fn data(&mut self, arg: &str) -> Step {
        if !arg.is_empty() {
            return Step::Reply(Reply::new(501, "Syntax: DATA"));
        }
        if self.state != SessionState::RcptTo {
            return Step::Reply(Reply::new(503, "Error: need RCPT command"));
        }
        self.state = SessionState::Data;
        Step::BeginData(Reply::start_data())
    }

    fn reset(&mut self) {
        self.clear_transaction();
        if self.state != SessionState::Connected {
            self.state = SessionState::Greeted;
        }
    }

    fn clear_transaction(&mut self) {
        self.mail_from = None;
        self.rcpt_tos.clear();
    }
}

/// Extracts the address from `FROM:<a@b> PARAMS` / `TO:<a@b>`.
/// `<>` yields an empty string; a bare address without brackets is accepted.
fn parse_path(arg: &str, keyword: &str) -> Option<String> {
    let prefix = arg.get(..keyword.len())?;
    if !prefix.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = arg[keyword.len()..].trim_start();

    if let Some(bracketed) = rest.strip_prefix('<') {
        let end = bracketed.find('>')?;
        return Some(bracketed[..end].to_string());
    }

    rest.split_whitespace().next().map(str::to_string)
}
