//! mailrelay MCP server entry point.

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use mailrelay::{EmailOperations, SmtpConfig, SmtpMailer};
use mailrelay_mcp::config::{ConfigOverrides, ServerConfig};
use mailrelay_mcp::protocol::Dispatcher;
use mailrelay_mcp::tools::MailToolExecutor;
use mailrelay_mcp::transport::HttpTransport;

#[derive(Parser)]
#[command(
    name = "mailrelay-mcp",
    about = "MCP server for sending mail through an SMTP relay over streamable HTTP",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Default)]
struct ServeArgs {
    /// Listen address (host:port). Also reads MCP_ADDR.
    #[arg(long)]
    addr: Option<String>,

    /// Seconds without activity before a session expires. Also reads MCP_IDLE_TIMEOUT_SECS.
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Seconds between idle-session sweeps. Also reads MCP_SWEEP_INTERVAL_SECS.
    #[arg(long)]
    sweep_interval: Option<u64>,

    /// Events retained per session for resumption. Also reads MCP_EVENT_CAPACITY.
    #[arg(long)]
    event_capacity: Option<usize>,

    /// Per-call tool timeout in seconds. Also reads MCP_TOOL_TIMEOUT_SECS.
    #[arg(long)]
    tool_timeout: Option<u64>,
}

impl From<ServeArgs> for ConfigOverrides {
    fn from(args: ServeArgs) -> Self {
        Self {
            addr: args.addr,
            idle_timeout_secs: args.idle_timeout,
            sweep_interval_secs: args.sweep_interval,
            event_capacity: args.event_capacity,
            tool_timeout_secs: args.tool_timeout,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server over streamable HTTP (default).
    Serve(ServeArgs),

    /// Print server capabilities and tools as JSON.
    Info,

    /// Check the SMTP relay connection and exit.
    Verify {
        /// Connection timeout in seconds.
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   mailrelay-mcp completions bash > ~/.local/share/bash-completion/completions/mailrelay-mcp
    ///   mailrelay-mcp completions zsh > ~/.zfunc/_mailrelay-mcp
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

fn mail_executor() -> anyhow::Result<MailToolExecutor<SmtpMailer>> {
    let smtp = SmtpConfig::from_env()?;
    if smtp.defaulted {
        tracing::warn!(
            "SMTP_HOST not set; using {}:{} ({:?}) without authentication",
            smtp.host,
            smtp.port,
            smtp.tls
        );
    }
    let mailer = SmtpMailer::new(smtp.clone());
    Ok(MailToolExecutor::new(EmailOperations::new(mailer, smtp)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Commands::Serve(ServeArgs::default())) {
        Commands::Serve(args) => {
            let config = ServerConfig::resolve(args.into())?;
            let executor = Arc::new(mail_executor()?);
            let dispatcher = Dispatcher::new(executor, config.tool_timeout);

            tracing::info!("mailrelay MCP server");
            tracing::info!(
                "Idle timeout {:?}, sweep every {:?}, {} events per session, tool timeout {:?}",
                config.idle_timeout,
                config.sweep_interval,
                config.event_capacity,
                config.tool_timeout
            );

            let transport = HttpTransport::new(dispatcher, config);
            transport.run().await?;
        }

        Commands::Info => {
            let capabilities = mailrelay_mcp::types::InitializeResult::default_result();
            let tools = MailToolExecutor::<SmtpMailer>::definitions();
            let info = serde_json::json!({
                "server": capabilities.server_info,
                "protocol_version": capabilities.protocol_version,
                "supported_versions": mailrelay_mcp::protocol::SUPPORTED_VERSIONS,
                "capabilities": capabilities.capabilities,
                "tools": tools.iter().map(|t| &t.name).collect::<Vec<_>>(),
                "tool_count": tools.len(),
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Verify { timeout } => {
            let executor = mail_executor()?;
            match executor
                .operations()
                .verify_connection(Duration::from_secs(timeout))
                .await
            {
                Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                Err(e) => {
                    eprintln!("SMTP verification failed: {e}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "mailrelay-mcp", &mut std::io::stdout());
        }
    }

    Ok(())
}
