use std::net::SocketAddr;

use tokio::net::TcpListener;

use chatwire_server::auth::jwt;
use chatwire_server::config::{generate_config_template, Config};
use chatwire_server::notifications::retention::spawn_notification_cleanup;
use chatwire_server::state::AppState;
use chatwire_server::{db, routes};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chatwire_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(env_filter).init();
    }

    // Load or generate JWT signing key (256-bit random, stored in data_dir)
    let jwt_secret = jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // Handle --issue-token: print a token for local clients and exit
    if let Some(user_id) = &config.issue_token {
        let name = config.token_name.as_deref().unwrap_or(user_id);
        let token = jwt::issue_access_token(&jwt_secret, user_id, name, config.access_token_ttl_secs)?;
        println!("{}", token);
        return Ok(());
    }

    tracing::info!("Chatwire server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    let app_state = AppState::new(db, jwt_secret, config.chat_settings());

    spawn_notification_cleanup(
        app_state.notifications.clone(),
        config.notification_retention_days,
        config.notification_cleanup_interval_secs,
    );

    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
