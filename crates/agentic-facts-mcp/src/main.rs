//! AgenticFacts MCP Server — entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use agentic_facts_mcp::config::{check_rule_file, engine_config, resolve_capacity, resolve_schema_path};
use agentic_facts_mcp::protocol::ProtocolHandler;
use agentic_facts_mcp::session::FactSession;
use agentic_facts_mcp::tools::ToolRegistry;
use agentic_facts_mcp::transport::StdioTransport;

#[derive(Parser)]
#[command(
    name = "agentic-facts-mcp",
    about = "MCP server for AgenticFacts — live facts, Datalog rules, and blocking waits for LLM agents",
    version
)]
struct Cli {
    /// Rule file (.mg) installed as built-in at startup.
    #[arg(short, long)]
    schema: Option<String>,

    /// Maximum stored facts per predicate.
    #[arg(long)]
    capacity: Option<usize>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server over stdio (default).
    Serve {
        /// Rule file (.mg) installed as built-in at startup.
        #[arg(short, long)]
        schema: Option<String>,

        /// Maximum stored facts per predicate.
        #[arg(long)]
        capacity: Option<usize>,
    },

    /// Start MCP server over HTTP.
    #[cfg(feature = "sse")]
    ServeHttp {
        /// Listen address (host:port).
        #[arg(long, default_value = "127.0.0.1:3100")]
        addr: String,

        /// Rule file (.mg) installed as built-in at startup.
        #[arg(short, long)]
        schema: Option<String>,

        /// Maximum stored facts per predicate.
        #[arg(long)]
        capacity: Option<usize>,

        /// Bearer token for authentication.
        /// Also reads from AGENTIC_TOKEN env var.
        #[arg(long)]
        token: Option<String>,
    },

    /// Validate a rule file without starting the server.
    Check {
        /// Path to the .mg file.
        file: PathBuf,
    },

    /// Print server capabilities as JSON.
    Info,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   agentic-facts-mcp completions bash > ~/.local/share/bash-completion/completions/agentic-facts-mcp
    ///   agentic-facts-mcp completions zsh > ~/.zfunc/_agentic-facts-mcp
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },

    /// Launch interactive REPL mode.
    Repl,
}

fn open_session(schema: Option<&str>, capacity: Option<usize>) -> anyhow::Result<Arc<FactSession>> {
    let config = engine_config(resolve_schema_path(schema), resolve_capacity(capacity));
    Ok(Arc::new(FactSession::open(config)?))
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

    match cli.command.unwrap_or(Commands::Serve {
        schema: None,
        capacity: None,
    }) {
        Commands::Serve { schema, capacity } => {
            let session = open_session(
                schema.or(cli.schema).as_deref(),
                capacity.or(cli.capacity),
            )?;
            let handler = ProtocolHandler::new(session.clone());
            let transport = StdioTransport::new(handler);
            transport.run().await?;
            session.shutdown().await;
        }

        #[cfg(feature = "sse")]
        Commands::ServeHttp {
            addr,
            schema,
            capacity,
            token,
        } => {
            use agentic_facts_mcp::transport::SseTransport;

            // Resolve token: CLI flag > env var
            let effective_token = token.or_else(|| std::env::var("AGENTIC_TOKEN").ok());

            let session = open_session(
                schema.or(cli.schema).as_deref(),
                capacity.or(cli.capacity),
            )?;
            tracing::info!("AgenticFacts MCP server");
            if effective_token.is_some() {
                tracing::info!("Auth: bearer token required");
            }

            let transport = SseTransport::new(ProtocolHandler::new(session), effective_token);
            transport.run(&addr).await?;
        }

        Commands::Check { file } => match check_rule_file(&file) {
            Ok(summary) => {
                println!("Valid rule file: {}", file.display());
                println!("  Rules:        {}", summary.rules);
                println!("  Declarations: {}", summary.declarations);
                if !summary.derived.is_empty() {
                    let derived: Vec<_> = summary.derived.iter().map(String::as_str).collect();
                    println!("  Derives:      {}", derived.join(", "));
                }
            }
            Err(e) => {
                eprintln!("Invalid rule file {}: {e}", file.display());
                std::process::exit(1);
            }
        },

        Commands::Info => {
            let capabilities = agentic_facts_mcp::types::InitializeResult::default_result();
            let tools = ToolRegistry::list_tools();
            let info = serde_json::json!({
                "server": capabilities.server_info,
                "protocol_version": capabilities.protocol_version,
                "capabilities": capabilities.capabilities,
                "tools": tools.iter().map(|t| &t.name).collect::<Vec<_>>(),
                "tool_count": tools.len(),
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(
                shell,
                &mut cmd,
                "agentic-facts-mcp",
                &mut std::io::stdout(),
            );
        }

        Commands::Repl => {
            agentic_facts_mcp::repl::run(cli.schema.as_deref(), cli.capacity)?;
        }
    }

    Ok(())
}
