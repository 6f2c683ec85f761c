use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_actix_web::TracingLogger;

use item_relay_service::{
    config::Config,
    handlers, logging, metrics,
    queue::{InMemoryQueue, MessageQueue, RedisQueue},
    registry::{ConnectionRegistry, InMemoryConnectionRegistry, PgConnectionRegistry},
    store::{InMemoryItemStore, ItemStore, PgItemStore},
    websocket::{relay, RedisRelay},
    AppState, ConnectionHub, CreateProcessor, NotificationDispatcher, QueueWorker,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    logging::init_tracing(&config.logging);

    tracing::info!(env = %config.app.env, "Starting item relay service");

    let (store, registry) = build_storage(&config).await?;
    let redis = match &config.queues.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str()).context("Invalid REDIS_URL")?;
            let conn = client
                .get_connection_manager()
                .await
                .context("Failed to connect to Redis")?;
            tracing::info!("Successfully connected to Redis");
            Some((client, conn))
        }
        None => {
            tracing::warn!("REDIS_URL not set; using in-process queues");
            None
        }
    };

    let conn = redis.as_ref().map(|(_, conn)| conn);
    let operations = build_queue(conn, &config.queues.operation_queue).await?;
    let notifications = match &config.queues.notification_queue {
        Some(name) => Some(build_queue(conn, name).await?),
        None => None,
    };
    let dead_letter = match &config.queues.dead_letter_queue {
        Some(name) => Some(build_queue(conn, name).await?),
        None => None,
    };

    let ws = &config.websocket;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = Vec::new();

    let hub = match &redis {
        Some((client, conn)) => {
            let hub = Arc::new(
                ConnectionHub::with_instance_id(ws.instance_id.clone()).with_relay(Arc::new(
                    RedisRelay::new(conn.clone(), ws.relay_channel_prefix.clone()),
                )),
            );

            // Subscribe before serving sockets; a channel without subscribers reads as a dead owner.
            let channel = relay::instance_channel(&ws.relay_channel_prefix, &ws.instance_id);
            let pubsub = relay::subscribe(client, &channel)
                .await
                .with_context(|| format!("Failed to subscribe to {}", channel))?;
            tracing::info!(channel = %channel, "Subscribed to relay channel");

            workers.push(tokio::spawn(relay::run_listener(
                client.clone(),
                channel,
                pubsub,
                hub.clone(),
                registry.clone(),
                shutdown_rx.clone(),
            )));
            hub
        }
        None => Arc::new(ConnectionHub::with_instance_id(ws.instance_id.clone())),
    };
    tracing::info!(instance_id = %hub.instance_id(), "Connection hub ready");

    let create_worker = QueueWorker::new(
        operations.clone(),
        Arc::new(CreateProcessor::new(store.clone(), notifications.clone())),
        dead_letter.clone(),
        config
            .queues
            .worker_settings(config.queues.create_batch_size),
    );
    let rx = shutdown_rx.clone();
    workers.push(tokio::spawn(async move { create_worker.run(rx).await }));

    if let Some(notifications) = notifications {
        let notify_worker = QueueWorker::new(
            notifications,
            Arc::new(NotificationDispatcher::new(registry.clone(), hub.clone())),
            dead_letter.clone(),
            config
                .queues
                .worker_settings(config.queues.notify_batch_size),
        );
        let rx = shutdown_rx.clone();
        workers.push(tokio::spawn(async move { notify_worker.run(rx).await }));
    } else {
        tracing::warn!("NOTIFICATION_QUEUE not set; notification worker disabled");
    }

    let state = AppState::new(store, operations, registry, hub)
        .with_heartbeat(ws.heartbeat_interval, ws.client_timeout);

    let addr = format!("0.0.0.0:{}", config.app.port);
    tracing::info!("Starting HTTP server on {}", addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .configure(handlers::register_routes)
    })
    .bind(&addr)
    .with_context(|| format!("Failed to bind {}", addr))?
    .run()
    .await;

    tracing::info!("HTTP server stopped; shutting down workers");
    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!("Worker task failed: {}", e);
        }
    }

    server.context("HTTP server error")
}

async fn build_storage(
    config: &Config,
) -> anyhow::Result<(Arc<dyn ItemStore>, Arc<dyn ConnectionRegistry>)> {
    let db = &config.database;
    let Some(url) = &db.url else {
        tracing::warn!("DATABASE_URL not set; using in-memory store and registry");
        return Ok((
            Arc::new(InMemoryItemStore::new()),
            Arc::new(InMemoryConnectionRegistry::new()),
        ));
    };

    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .connect(url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Successfully connected to database");

    let store = PgItemStore::new(pool.clone(), db.table_name.clone());
    store
        .ensure_schema()
        .await
        .with_context(|| format!("Failed to prepare table {}", db.table_name))?;

    let registry = PgConnectionRegistry::new(pool, db.connections_table_name.clone());
    registry
        .ensure_schema()
        .await
        .with_context(|| format!("Failed to prepare table {}", db.connections_table_name))?;

    Ok((Arc::new(store), Arc::new(registry)))
}

async fn build_queue(
    redis: Option<&ConnectionManager>,
    name: &str,
) -> anyhow::Result<Arc<dyn MessageQueue>> {
    match redis {
        Some(conn) => {
            let queue = RedisQueue::new(conn.clone(), name);
            let recovered = queue
                .recover_in_flight()
                .await
                .with_context(|| format!("Failed to recover in-flight records of {}", name))?;
            if recovered > 0 {
                tracing::warn!(queue = %name, recovered, "Requeued records left in flight");
            }
            Ok(Arc::new(queue))
        }
        None => Ok(Arc::new(InMemoryQueue::new(name))),
    }
}
