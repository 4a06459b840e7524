use auth_service::app;
use auth_service::config::AppConfig;
use auth_service::state::AppState;

// Exit codes surfaced to the process supervisor; no internal retry on any
// of these, restart policy lives outside the process.
const EXIT_DB_UNREACHABLE: i32 = 1;
const EXIT_BAD_CONFIG: i32 = 2;
const EXIT_SERVE_FAILED: i32 = 3;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(EXIT_BAD_CONFIG);
        }
    };
    let addr = config.listen_addr;

    // No requests are served until the database connection resolves.
    let state = match AppState::init(config).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "database connection failed");
            std::process::exit(EXIT_DB_UNREACHABLE);
        }
    };
    tracing::info!("database connected");

    // Run migrations if present
    if let Err(e) = sqlx::migrate!("./migrations").run(&state.db).await {
        tracing::warn!(error = %e, "migrations folder not found or migration failed; continuing");
    }

    let db = state.db.clone();
    let app = app::build_app(state);
    if let Err(e) = app::serve(app, addr).await {
        tracing::error!(error = %e, "server error");
        db.close().await;
        std::process::exit(EXIT_SERVE_FAILED);
    }

    db.close().await;
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "auth_service=debug,axum=info,tower_http=info".to_string());
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
}
