use skyledger_api::{app, auth::AuthConfig, metrics::ApiMetrics, AppState};
use skyledger_core::payment::BalanceBook;
use skyledger_store::{app_config::Config, DbClient, EventProducer, RedisClient, SnapshotStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skyledger_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!("Starting SkyLedger API on port {}", config.server.port);

    let auth = AuthConfig {
        secret: config.auth.jwt_secret.clone(),
        expiration: config.auth.jwt_expiration_seconds,
        issue_tokens: config.auth.issue_tokens,
    };
    let admin = config.ledger.admin();
    let settings = config.ledger.settings();

    let mut state = match &config.database {
        Some(database) => {
            let db = DbClient::new(&database.url).await?;
            db.migrate().await?;
            // Stored balances win over the configured opening ones.
            let stored = db.load_balances().await?;
            let rail = Arc::new(BalanceBook::with_balances(config.payments.balances().chain(stored)));
            AppState::restore(admin, rail, settings, auth, ApiMetrics::new()?, Arc::new(db)).await?
        }
        None => {
            tracing::warn!("No database configured, ledger state lives in memory only");
            let rail = Arc::new(BalanceBook::with_balances(config.payments.balances()));
            AppState::new(admin, rail, settings, auth, ApiMetrics::new()?)
        }
    };

    if let Some(redis) = &config.redis {
        let client = RedisClient::new(&redis.url)?;
        state = state.with_rate_limit(Arc::new(client), config.rate_limit.clone());
    }

    if let Some(kafka) = &config.kafka {
        let producer = EventProducer::new(&kafka.brokers, &kafka.topic)?;
        tokio::spawn(producer.forward(state.events.subscribe()));
        tracing::info!(topic = %kafka.topic, "Exporting events to Kafka");
    }

    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
