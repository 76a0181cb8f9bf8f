use pair_diary::{AppState, DiaryStore, Settings, router};
use std::net::SocketAddr;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            error!("invalid configuration: {err}");
            return Err(err.into());
        }
    };
    info!(
        time_zone = %settings.time_zone,
        cutoff_hour = settings.late_night_cutoff_hour,
        "settings loaded"
    );

    let store = DiaryStore::open(settings.data_path.clone()).await?;
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let state = AppState::new(settings, store)?;
    let app = router(state);

    info!("listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}
