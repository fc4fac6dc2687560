use std::sync::Arc;
use std::time::Duration;

use driver_tracker::api;
use driver_tracker::auth::credentials::FileCredentialStore;
use driver_tracker::auth::http::ReqwestTransport;
use driver_tracker::auth::{AuthError, AuthSession};
use driver_tracker::config::Config;
use driver_tracker::engine::tracker::{spawn_tracker, TrackerDeps};
use driver_tracker::error::AppError;
use driver_tracker::geolocation::push::PushLocationProvider;
use driver_tracker::geolocation::replay::ReplayProvider;
use driver_tracker::geolocation::LocationProvider;
use driver_tracker::models::driver::Driver;
use driver_tracker::observability::metrics::Metrics;
use driver_tracker::platform::headless::HeadlessPlatform;
use driver_tracker::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let transport = ReqwestTransport::new(config.api_base_url.clone()).map_err(AuthError::from)?;
    let credentials = Arc::new(FileCredentialStore::new(config.credentials_path.clone()));
    let session = AuthSession::new(Arc::new(transport), credentials);

    let driver = sign_in(&session, &config).await?;
    let token = session.token().await?;

    let locations = location_provider(&config).await?;
    let platform = Arc::new(HeadlessPlatform);
    let deps = TrackerDeps {
        notifier: platform.clone(),
        foreground: platform,
        locations,
        metrics: Metrics::new(),
    };

    let (tracker, tracker_task) = spawn_tracker(driver, config.tracker_settings(token), deps);
    tracker.go_online().await?;

    let app = api::rest::router(Arc::new(AppState::new(tracker.clone())));

    let bind_addr = format!("0.0.0.0:{}", config.status_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(status_port = config.status_port, "status api started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    tracker.go_offline().await?;
    drop(tracker);
    if let Err(err) = tracker_task.await {
        tracing::error!(error = %err, "tracker task failed");
    }

    Ok(())
}

async fn sign_in(session: &AuthSession, config: &Config) -> Result<Driver, AppError> {
    if let Some(driver) = session.restore().await? {
        return Ok(driver);
    }

    match (&config.driver_phone, &config.driver_password) {
        (Some(phone), Some(password)) => Ok(session.login(phone, password).await?),
        _ => Err(AuthError::MissingCredentials.into()),
    }
}

async fn location_provider(config: &Config) -> Result<Arc<dyn LocationProvider>, AppError> {
    match &config.location_track_file {
        Some(path) => {
            let provider =
                ReplayProvider::from_file(path, Duration::from_millis(config.location_replay_ms))
                    .await
                    .map_err(|err| AppError::Internal(format!("failed to load track: {err}")))?;
            tracing::info!(path = %path.display(), "replaying recorded track");
            Ok(Arc::new(provider))
        }
        None => {
            tracing::warn!("no location track configured; waiting for pushed fixes");
            Ok(Arc::new(PushLocationProvider::new(config.event_buffer_size)))
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
