use ads_connector::ad_creation::AdCreationOrchestrator;
use ads_connector::ads::AdsService;
use ads_connector::audit::AuditLog;
use ads_connector::config::Config;
use ads_connector::db::Database;
use ads_connector::facebook::FacebookAPI;
use ads_connector::graph::GraphClient;
use ads_connector::memory::MemoryStore;
use ads_connector::oauth::{OAuthFlow, OAuthSettings};
use ads_connector::retry::RetryPolicy;
use ads_connector::server::{build_router, AppState};
use ads_connector::store::{ActionLogStore, ConnectionStore, CreatedAdStore};
use ads_connector::worker::{RefreshSettings, TokenRefreshWorker};
use std::error::Error;
use std::sync::Arc;
use tokio::net::TcpListener;

type Stores = (
    Arc<dyn ConnectionStore>,
    Arc<dyn ActionLogStore>,
    Arc<dyn CreatedAdStore>,
);

fn shared<S>(store: Arc<S>) -> Stores
where
    S: ConnectionStore + ActionLogStore + CreatedAdStore + 'static,
{
    (store.clone(), store.clone(), store)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(?config, "configuration loaded");

    // Initialize storage
    let (connections, action_logs, created_ads): Stores = match config.database {
        Some(database) => {
            let db = Arc::new(
                Database::new(&database.url, database.accept_invalid_certs, database.cipher).await?,
            );
            db.migrate().await?;
            tracing::info!("connected to database");
            shared(db)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, connections are kept in memory only");
            shared(Arc::new(MemoryStore::new()))
        }
    };

    let facebook = Arc::new(FacebookAPI::new(
        GraphClient::with_options(
            config.facebook.graph_base_url(),
            RetryPolicy::default(),
            config.facebook.request_timeout,
        ),
        config.facebook.app_id.clone(),
        config.facebook.app_secret.clone(),
    ));
    let audit = AuditLog::new(action_logs);

    // Token refresh runs in the background for the life of the process
    let worker = TokenRefreshWorker::new(
        connections.clone(),
        facebook.clone(),
        RefreshSettings::default(),
    );
    tokio::spawn(async move { worker.run().await });

    let state = Arc::new(AppState {
        oauth: OAuthFlow::new(
            facebook.clone(),
            facebook.clone(),
            connections.clone(),
            OAuthSettings {
                app_id: config.facebook.app_id.clone(),
                redirect_uri: config.facebook.redirect_uri.clone(),
                dialog_base_url: config.facebook.dialog_base_url(),
            },
        ),
        ads: AdsService::new(facebook.clone(), connections.clone(), audit.clone()),
        ad_creation: AdCreationOrchestrator::new(facebook, connections, audit, created_ads),
        app_base_url: config.app_base_url.clone(),
    });

    let listener = TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}
