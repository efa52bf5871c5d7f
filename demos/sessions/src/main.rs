use axum::Router;
use axum::extract::Query;
use axum::response::Redirect;
use axum::routing::get;
use serde::Deserialize;
use sidkit::config::{SessionConfig, StoreConfig};
use sidkit::{Session, SessionLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "SIDKIT_CONFIG";
const LISTEN_ADDR: &str = "127.0.0.1:8000";

#[derive(Debug, Deserialize)]
struct NameQuery {
    name: String,
}

async fn hello(session: Session) -> sidkit::Result<String> {
    let visits = session.get_as::<u64>("visits").await?.unwrap_or(0) + 1;
    session.set("visits", visits).await?;

    let greeting = match session.get_as::<String>("user_name").await? {
        Some(name) => format!("Hello, {name}! This is your visit number {visits}."),
        None => format!(
            "Hello, stranger! This is your visit number {visits}. \
             Visit /name?name=... to introduce yourself."
        ),
    };
    Ok(greeting)
}

async fn name(session: Session, Query(query): Query<NameQuery>) -> sidkit::Result<Redirect> {
    session.set("user_name", query.name).await?;
    Ok(Redirect::to("/"))
}

async fn logout(session: Session) -> Redirect {
    session.destroy();
    Redirect::to("/")
}

async fn load_config() -> Result<SessionConfig, Box<dyn std::error::Error>> {
    match std::env::var(CONFIG_ENV) {
        Ok(path) => {
            let content = tokio::fs::read_to_string(&path).await?;
            Ok(SessionConfig::from_toml(&content)?)
        }
        Err(_) => Ok(SessionConfig::builder()
            .store(StoreConfig::SqliteWorker {
                path: "sessions.sqlite3".into(),
            })
            .build()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sidkit=debug")),
        )
        .init();

    let config = load_config().await?;
    let app = Router::new()
        .route("/", get(hello))
        .route("/name", get(name))
        .route("/logout", get(logout))
        .layer(SessionLayer::from_config(config).await?);

    let listener = tokio::net::TcpListener::bind(LISTEN_ADDR).await?;
    info!("Listening on http://{LISTEN_ADDR}");
    axum::serve(listener, app).await?;

    Ok(())
}
