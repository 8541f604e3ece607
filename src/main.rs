use std::time::Duration;

mod app;
mod assets;
mod auth;
mod config;
mod error;
mod profile;
mod state;
mod storage;
mod users;

#[cfg(test)]
mod test_support;

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "jobboard=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let (app_state, db) = state::AppState::init().await?;

    sqlx::migrate!("./migrations").run(&db).await?;

    let sessions = app_state.sessions.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SESSION_PURGE_INTERVAL);
        loop {
            tick.tick().await;
            match sessions.purge_expired().await {
                Ok(0) => {}
                Ok(n) => tracing::debug!(purged = n, "expired sessions removed"),
                Err(e) => tracing::warn!(error = %e, "session purge failed"),
            }
        }
    });

    let app = app::build_app(app_state)?;
    app::serve(app).await
}
