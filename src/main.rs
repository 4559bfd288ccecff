use hook_gateway::interpreter::{Interpreter, InterpreterPool, LuaInterpreter, PoolConfig};
use hook_gateway::server::HookServer;
use hook_gateway::{HookConfig, load_config};
use std::sync::Arc;
use tracing::{self, error, info};

const DEFAULT_CONFIG_PATH: &str = "hook_config.toml";

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config_path =
        std::env::var("HOOK_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let mut config: HookConfig = match load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    config.apply_env_overrides();

    let _log_guard = match hook_gateway::logging::setup_logging(config.log.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to set up logging: {}", e);
            std::process::exit(1);
        }
    };
    info!("Using config at {:?}", config_path);

    let pool = InterpreterPool::new(PoolConfig::new(config.script_root.clone(), || {
        Ok(Box::new(LuaInterpreter::new()) as Box<dyn Interpreter>)
    }));

    let tls = config.tls.clone();
    let mut server = HookServer::new(config, pool);
    if let Some(tls) = tls {
        if let Err(e) = server.set_tls(&tls.cert, &tls.key) {
            error!("{}", e);
            std::process::exit(1);
        }
    }

    let server = Arc::new(server);
    let closer = Arc::clone(&server);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        if let Err(e) = closer.close() {
            error!("{}", e);
        }
    });

    if let Err(e) = server.serve().await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
