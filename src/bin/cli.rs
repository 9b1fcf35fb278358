use std::time::Duration;

use backsender::capture::{self, CaptureListener, LoggingHandler};
use backsender::config::{CaptureConfig, DEFAULT_CAPTURE_HOST, SendConfig, SendOptions};
use backsender::dispatch::SpoofedMailDispatcher;
use backsender::logging;
use backsender::transport::SmtpConnector;
use clap::{Parser, ValueEnum};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// Send spoofed emails to generated addresses
    Send,
    /// Run a local SMTP server that logs what it receives
    Simulate,
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Send spoofed emails or run a simulated SMTP server for testing purposes."
)]
struct Cli {
    /// Mode to operate in
    #[arg(long, value_enum)]
    mode: Mode,

    /// SMTP server address
    #[arg(long)]
    smtp_server: Option<String>,

    /// SMTP server port
    #[arg(long, default_value_t = 587)]
    smtp_port: u16,

    /// SMTP user for login
    #[arg(long)]
    smtp_user: Option<String>,

    /// SMTP password for login
    #[arg(long, env = "SMTP_PASSWORD", hide_env_values = true)]
    smtp_password: Option<String>,

    /// Email addresses to spoof as the senders
    #[arg(long, num_args = 1..)]
    spoofed_senders: Vec<String>,

    /// Target domains
    #[arg(long, num_args = 1..)]
    domain_list: Vec<String>,

    /// Number of random addresses to generate per domain
    #[arg(long, default_value_t = 10)]
    num_emails_per_domain: usize,

    /// Connect and I/O timeout for the outbound session, in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Name to send with EHLO (defaults to the local hostname)
    #[arg(long)]
    hello_name: Option<String>,

    /// Skip certificate verification during STARTTLS
    #[arg(long)]
    accept_invalid_certs: bool,

    /// Print the dispatch report as JSON
    #[arg(long)]
    json: bool,

    /// Port for the simulated SMTP server
    #[arg(long, default_value_t = 1025)]
    server_port: u16,

    /// Address the simulated SMTP server binds to
    #[arg(long, default_value = DEFAULT_CAPTURE_HOST)]
    server_host: String,

    /// Name the simulated server announces
    #[arg(long, default_value = "localhost")]
    server_hostname: String,

    /// Seconds of client silence before the simulated server hangs up
    #[arg(long, default_value_t = 300)]
    idle_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(logging::DEFAULT_FILTER)?;

    match cli.mode {
        Mode::Simulate => simulate(&cli).await,
        Mode::Send => send(cli).await,
    }
}

async fn simulate(cli: &Cli) -> anyhow::Result<()> {
    let config = CaptureConfig {
        host: cli.server_host.clone(),
        port: cli.server_port,
        hostname: cli.server_hostname.clone(),
        idle_timeout: Duration::from_secs(cli.idle_timeout_secs),
    };

    let listener = capture::bind(&config).await?;
    let server = CaptureListener::new(LoggingHandler, &config);

    server
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}

async fn send(cli: Cli) -> anyhow::Result<()> {
    let options = SendOptions {
        smtp_server: cli.smtp_server,
        smtp_port: Some(cli.smtp_port),
        smtp_user: cli.smtp_user,
        smtp_password: cli.smtp_password,
        spoofed_senders: cli.spoofed_senders,
        domain_list: cli.domain_list,
        num_emails_per_domain: Some(cli.num_emails_per_domain),
        timeout: Some(Duration::from_secs(cli.timeout_secs)),
        hello_name: cli.hello_name,
        accept_invalid_certs: cli.accept_invalid_certs,
    };

    let config = match SendConfig::validate(options) {
        Ok(config) => config,
        Err(e) => {
            log::error!("All email sending parameters must be provided in send mode: {}", e);
            std::process::exit(1);
        }
    };
    log::debug!("Send configuration: {:?}", config);

    // The SMTP client blocks; keep it off the async workers.
    let result = tokio::task::spawn_blocking(move || {
        let mut dispatcher = SpoofedMailDispatcher::new(SmtpConnector::new(&config));
        dispatcher.run(&config)
    })
    .await?;

    // Connection-level failures were already logged by the dispatcher.
    let Ok(report) = result else {
        std::process::exit(1);
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Dispatch finished: {} attempted, {} sent, {} failed",
            report.attempts.len(),
            report.sent(),
            report.failed()
        );
    }

    Ok(())
}
