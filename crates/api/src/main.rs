//! Node entry point.

use api::AppState;
use api::config::{Config, LogFormat};
use api::node::Node;
use broker::{Broker, InMemoryBroker};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT, starting graceful shutdown"),
        () = terminate => tracing::info!("received SIGTERM, starting graceful shutdown"),
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn serve<B>(broker: B, config: Config, metrics_handle: PrometheusHandle)
where
    B: Broker + Clone + 'static,
{
    let node = Node::start(broker, &config)
        .await
        .expect("failed to start node");
    let app = api::create_app(AppState::for_node(&node), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting gateway");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    node.shutdown().await;
    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    init_tracing(&config);

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    match config.amqp_url.clone() {
        #[cfg(feature = "amqp")]
        Some(url) => {
            let broker = broker::AmqpBroker::connect(&url)
                .await
                .expect("failed to connect to AMQP broker");
            serve(broker, config, metrics_handle).await;
        }
        #[cfg(not(feature = "amqp"))]
        Some(_) => {
            tracing::warn!("AMQP_URL is set but the amqp feature is off; using the in-process broker");
            serve(InMemoryBroker::new(), config, metrics_handle).await;
        }
        None => serve(InMemoryBroker::new(), config, metrics_handle).await,
    }
}
