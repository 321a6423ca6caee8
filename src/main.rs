use smartchat::{
    auth,
    config::{Backend, Config},
    session::SessionHub,
    store::{FirestoreStore, MemoryStore, SqliteStore, Store},
    AppResult, AppState,
};
use tower_http::trace::TraceLayer;
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore as SessionStore, SessionManagerLayer};
use tracing::info;

#[tokio::main]
async fn main() -> AppResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smartchat=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let session_store = SessionStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(config.public_url.starts_with("https://"))
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(config.session_inactivity));

    let secrets: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&config.client_secret_path)?)?;
    let clients = auth::Clients::from_json(&secrets, &config.public_url)?;

    let store = match &config.backend {
        Backend::Memory => Store::Memory(MemoryStore::new()),
        Backend::Sqlite { database_url } => Store::Sqlite(SqliteStore::connect(database_url).await?),
        Backend::Firestore { project_id, endpoint, poll_interval } => Store::Firestore(
            FirestoreStore::new(endpoint, project_id, clients.firebase_apikey(), *poll_interval),
        ),
    };
    info!(backend = ?config.backend, "message store ready");

    let app_state = AppState {
        store,
        clients,
        sessions: SessionHub::default(),
    };

    let app = smartchat::router()
        .with_state(app_state)
        .layer(session_layer)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
