use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_EMAILS_PER_DOMAIN: usize = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CAPTURE_HOST: &str = "127.0.0.1";
pub const DEFAULT_CAPTURE_PORT: u16 = 1025;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required send parameter: --{0}")]
    Missing(&'static str),
}

/// Raw, unvalidated send parameters as they come off the command line
#[derive(Debug, Default, Clone)]
pub struct SendOptions {
    pub smtp_server: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub spoofed_senders: Vec<String>,
    pub domain_list: Vec<String>,
    pub num_emails_per_domain: Option<usize>,
    pub timeout: Option<Duration>,
    pub hello_name: Option<String>,
    pub accept_invalid_certs: bool,
}

/// Validated parameters for one dispatch run
#[derive(Clone)]
pub struct SendConfig {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub spoofed_senders: Vec<String>,
    pub domains: Vec<String>,
    pub per_domain_count: usize,
    /// Applied to connect and to every read/write on the session
    pub timeout: Duration,
    /// Name sent with EHLO; `None` lets the client pick the local hostname
    pub hello_name: Option<String>,
    pub accept_invalid_certs: bool,
}

impl SendConfig {
    /// Checks that every field required for sending is present and non-empty.
    /// Fields are checked in command-line order so the first gap is reported.
    pub fn validate(options: SendOptions) -> Result<Self, ConfigError> {
        let server = required(options.smtp_server, "smtp-server")?;
        let user = required(options.smtp_user, "smtp-user")?;
        let password = required(options.smtp_password, "smtp-password")?;

        if options.spoofed_senders.is_empty() {
            return Err(ConfigError::Missing("spoofed-senders"));
        }
        if options.domain_list.is_empty() {
            return Err(ConfigError::Missing("domain-list"));
        }

        Ok(Self {
            server,
            port: options.smtp_port.unwrap_or(DEFAULT_SMTP_PORT),
            user,
            password,
            spoofed_senders: options.spoofed_senders,
            domains: options.domain_list,
            per_domain_count: options
                .num_emails_per_domain
                .unwrap_or(DEFAULT_EMAILS_PER_DOMAIN),
            timeout: options.timeout.unwrap_or(DEFAULT_TIMEOUT),
            hello_name: options.hello_name.filter(|h| !h.is_empty()),
            accept_invalid_certs: options.accept_invalid_certs,
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(field))
}

// Keep the password out of logs.
impl fmt::Debug for SendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("spoofed_senders", &self.spoofed_senders)
            .field("domains", &self.domains)
            .field("per_domain_count", &self.per_domain_count)
            .field("timeout", &self.timeout)
            .field("hello_name", &self.hello_name)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}

/// Settings for the capture listener
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub host: String,
    pub port: u16,
    /// Name announced in the greeting and EHLO reply
    pub hostname: String,
    pub idle_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_CAPTURE_HOST.to_string(),
            port: DEFAULT_CAPTURE_PORT,
            hostname: "localhost".to_string(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}
