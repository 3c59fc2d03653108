use std::net::SocketAddr;
use tokio::net::TcpListener;

use parley_server::config::{generate_config_template, Config};
use parley_server::db::{self, ChatStore, SqliteStore};
use parley_server::{auth, routes, state};

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
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("parley_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(env_filter).init();
    }

    let hub_config = config.hub();
    hub_config.validate()?;

    tracing::info!("Parley server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Load or generate JWT signing key (256-bit random, stored in data_dir)
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // Handle --issue-token: print a bearer token for an existing user and exit
    if let Some(user_id) = config.issue_token {
        let store = SqliteStore::new(db);
        let user = store
            .get_user_by_id(user_id)
            .await?
            .ok_or_else(|| format!("user {user_id} not found"))?;
        println!("{}", auth::jwt::issue_access_token(&jwt_secret, &user)?);
        return Ok(());
    }

    tracing::info!(
        queue_capacity = hub_config.outbound_queue_capacity,
        ping_interval_secs = hub_config.ping_interval_secs,
        read_timeout_secs = hub_config.read_timeout_secs,
        "Hub configured"
    );

    // Build application state; this spawns the hub event loop
    let app_state = state::AppState::new(db, jwt_secret, hub_config);

    // Build router
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
