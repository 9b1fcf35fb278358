pub mod address;
pub mod capture;
pub mod config;
pub mod dispatch;
pub mod logging;
pub mod transport;

pub use address::AddressGenerator;
pub use capture::{CaptureListener, InboundEnvelope, LoggingHandler, MessageHandler, Reply};
pub use config::{CaptureConfig, ConfigError, SendConfig, SendOptions};
pub use dispatch::{DispatchError, DispatchReport, Outcome, SendAttempt, SpoofedMailDispatcher};
pub use transport::SmtpConnector;
