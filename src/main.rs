use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use chathdi::{ChatOrchestrator, GatewayConfig, GeminiClient, SessionStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "ChatHDI: local web chat client for the Gemini API")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the ChatHDI web UI.
    Serve {
        #[arg(long, default_value_t = 9300, help = "Port for the web server.")]
        port: u16,
    },
    /// Delete all locally stored chat history.
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for GEMINI_API_KEY and friends)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG (e.g. RUST_LOG=info,chathdi=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            info!("Starting ChatHDI on port {}...", port);

            let store = SessionStore::open(chathdi::config::data_dir());
            let gateway = GeminiClient::new(GatewayConfig::from_env());
            let media_dir = chathdi::config::media_dir();
            let orchestrator = Arc::new(ChatOrchestrator::new(store, gateway));

            let mut server_handle = tokio::spawn(async move {
                if let Err(e) = chathdi::web::start_web_server(port, orchestrator, media_dir).await
                {
                    error!("Web server failed: {:?}", e);
                }
            });

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, shutting down...");
                }
                res = &mut server_handle => {
                    match res {
                        Ok(_) => info!("Web server task completed unexpectedly."),
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }

            if !server_handle.is_finished() {
                server_handle.abort();
            }
            info!("Shutdown complete.");
        }
        Commands::Clear => {
            let mut store = SessionStore::open(chathdi::config::data_dir());
            let count = store.sessions().len();
            store.clear_all();
            println!("Cleared {count} session(s).");
        }
    }

    Ok(())
}
