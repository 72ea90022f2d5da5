use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{signal, sync::mpsc};
use tower_http::{compression::CompressionLayer, cors::CorsLayer};
use tracing::{error, info};

use servicebook_api as api;
use api::{events::EventHandler, payments::PaymentProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = api::events::EventSender::new(event_tx);
    let handlers: Vec<Arc<dyn EventHandler>> = vec![Arc::new(api::events::LoggingNotifier)];
    tokio::spawn(api::events::process_events(event_rx, handlers));

    // Outbox worker relays committed booking events to the channel
    api::events::outbox::start_worker(
        db_arc.clone(),
        event_sender,
        cfg.outbox_poll_interval(),
        cfg.outbox_batch_size,
    );

    // Payment provider
    let provider: Arc<dyn PaymentProvider> = Arc::new(api::payments::stripe::StripeClient::new(
        cfg.payment_provider_base_url.clone(),
        cfg.payment_provider_secret_key.clone(),
        Duration::from_secs(cfg.payment_provider_timeout_secs),
    )?);
    if cfg.payment_provider_secret_key.is_none() {
        info!("Payment provider key not configured; payment intents will fail until it is set");
    }

    let services = api::handlers::AppServices::new(db_arc.clone(), provider, &cfg);

    let app_state = api::AppState {
        db: db_arc.clone(),
        auth: api::auth::AuthConfig::from(&cfg),
        config: Arc::new(cfg.clone()),
        services,
    };

    let cors_layer = if cfg.is_development() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };

    let app = api::build_router(app_state)
        .layer(CompressionLayer::new())
        .layer(cors_layer);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!("servicebook-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
