use std::sync::Arc;

use tracing::{error, info};

use parley::{ChatServer, Config, ProtocolDispatcher, UserDirectory};

#[tokio::main]
async fn main() {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    // Load configuration
    let config = match Config::load_with_env(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {path}: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = parley::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        parley::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = run(config).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> parley::Result<()> {
    config.validate()?;

    info!("parley chat server");
    info!(
        "Server configured on {}:{}",
        config.server.host, config.server.port
    );

    let directory = UserDirectory::from_config(&config).await?;

    let dispatcher = Arc::new(ProtocolDispatcher::new(Arc::new(directory)));
    let server = ChatServer::bind(&config.server).await?;
    server.run_until_ctrl_c(dispatcher).await?;

    info!("Server stopped");
    Ok(())
}
