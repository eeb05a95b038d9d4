mod cli;
mod config;
mod http;
mod logging;

pub use config::ConfigFile;
pub use http::{AppState, router};

pub async fn run(args: Vec<String>) -> anyhow::Result<()> {
    let cmd = cli::parse_args(&args)?;
    match cmd {
        cli::Command::Help => {
            cli::print_help();
            Ok(())
        }
        cli::Command::Version => {
            println!("pggate {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        cli::Command::Serve(args) => serve(args).await,
    }
}

async fn serve(args: cli::ServeArgs) -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let mut file = ConfigFile::load(&args.config, args.config_explicit)?;
    file.apply_args(&args)?;
    logging::init(file.server.json_logs);

    let pool = pggate::create_pool_with_wait_timeout(
        &file.database.url,
        file.database.pool_max_size,
        file.pool_wait_timeout(),
    )
    .map_err(|e| anyhow::anyhow!("failed to create connection pool: {e}"))?;
    let proxy = pggate::QueryProxy::new(file.proxy_config());

    tracing::info!(
        listen = %file.server.listen,
        schema = %file.database.schema,
        allowed_tables = proxy.registry().len(),
        pool_max_size = file.database.pool_max_size,
        "starting pggate"
    );

    let listener = tokio::net::TcpListener::bind(&file.server.listen)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {e}", file.server.listen))?;

    let app = router(AppState::new(proxy, pool));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("pggate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
