use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use piazza_slack::chat::SlackClient;
use piazza_slack::config::{AppConfig, TenantRegistry};
use piazza_slack::forum::PiazzaClient;
use piazza_slack::openapi::ApiDoc;
use piazza_slack::session::SessionCache;
use piazza_slack::store::{inmem::InMemStore, pg::PgStore, KvStore};
use piazza_slack::{config, AppState, Bridge};

async fn build_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn KvStore>> {
    if let Some(url) = &cfg.database_url {
        use sqlx::postgres::PgPoolOptions;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .context("connecting to DATABASE_URL")?;
        let store = PgStore::new(pool);
        store.migrate().await.context("running migrations")?;
        info!("Using Postgres store");
        return Ok(Arc::new(store));
    }
    match &cfg.data_dir {
        Some(dir) => {
            info!("Using in-memory store with snapshots in {dir}");
            Ok(Arc::new(InMemStore::with_snapshot_dir(dir)))
        }
        None => {
            info!("Using in-memory store (not persisted)");
            Ok(Arc::new(InMemStore::new()))
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds; production sets the environment itself.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = AppConfig::from_env()?;
    info!("Bootstrapping forum/chat bridge");
    info!("Forum: {}", cfg.forum_base_url);
    info!("Chat API: {}", cfg.chat_api_base_url);
    info!("Trigger token required: {}", cfg.trigger_token.is_some());

    let store = build_store(&cfg).await?;
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("building HTTP client")?;
    let forum = Arc::new(PiazzaClient::new(http.clone(), cfg.forum_base_url.clone()));
    let chat = Arc::new(SlackClient::new(http, cfg.chat_api_base_url.clone()));

    let state = AppState {
        bridge: Bridge {
            forum: forum.clone(),
            chat,
            store: store.clone(),
            sessions: SessionCache::new(forum),
            tenants: TenantRegistry::new(store),
            forum_url: cfg.forum_base_url.clone(),
        },
        trigger_token: cfg.trigger_token.clone(),
    };
    let openapi = ApiDoc::openapi();

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(cfg.bind_addr.as_str())?;

    info!("Listening on http://{}", cfg.bind_addr);
    server.run().await?;
    Ok(())
}
