use std::hash::Hash;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::error_handling::HandleErrorLayer;
use axum::extract::Request;
use axum::response::IntoResponse;
use axum::routing::get;
use clap::Parser;
use clap::ValueEnum;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_turnstile::AdmissionLayer;
use tower_turnstile::KeyExtractor;
use tower_turnstile::Message;
use tower_turnstile::Quota;
use tower_turnstile::handle_admission_error;
use tracing::error;
use tracing::info;
use tracing_subscriber::EnvFilter;
use turnstile::EvictionSweeper;
use turnstile::SweepConfig;
use turnstile::SweeperHandle;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// One bucket per client IP (4 burst, 2/s)
    PerClient,
    /// One bucket for everyone (40 burst, 20/s)
    Global,
    /// One request per second per client IP
    Strict,
}

impl Mode {
    fn preset(self) -> Quota {
        match self {
            Mode::PerClient => Quota::per_client_default(),
            Mode::Global => Quota::global_default(),
            Mode::Strict => Quota::strict_default(),
        }
    }
}

/// Serve a rate-limited `/ping` endpoint.
#[derive(Debug, Parser)]
struct Args {
    #[arg(long, value_enum, default_value_t = Mode::PerClient)]
    mode: Mode,

    #[arg(long, default_value = "127.0.0.1:8000")]
    listen: SocketAddr,

    /// Bucket capacity; defaults to the mode's preset
    #[arg(long)]
    capacity: Option<NonZeroUsize>,

    /// Tokens refilled per second; defaults to the mode's preset
    #[arg(long)]
    rate: Option<f64>,

    #[arg(long, value_parser = humantime::parse_duration, default_value = "60s")]
    sweep_interval: Duration,

    #[arg(long, value_parser = humantime::parse_duration, default_value = "3m")]
    idle_threshold: Duration,
}

async fn ping() -> impl IntoResponse {
    Json(Message::new(
        "Success",
        "Hi there, this is a rate-limited endpoint.",
    ))
}

fn app<X, K>(layer: AdmissionLayer<X, K>) -> Router
where
    X: KeyExtractor<Request<Body>, Key = K> + Send + Sync + 'static,
    K: Hash + Eq + Clone + std::fmt::Debug + Send + Sync + 'static,
{
    Router::new().route("/ping", get(ping)).layer(
        ServiceBuilder::new()
            // 1. The outermost layer: turns admission errors into responses
            .layer(HandleErrorLayer::new(handle_admission_error))
            // 2. The middle layer: admits or rejects
            .layer(layer)
            // 3. Converts the Route's Infallible to BoxError
            .map_err(BoxError::from),
    )
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to listen for ctrl-c");
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let preset = args.mode.preset();
    let quota = match (args.capacity, args.rate) {
        (None, None) => preset,
        (capacity, rate) => {
            let capacity = match capacity {
                Some(capacity) => capacity,
                None => NonZeroUsize::new(preset.capacity()).ok_or("preset capacity is zero")?,
            };
            Quota::new(capacity, rate.unwrap_or(preset.refill_per_second()))?
        }
    };

    let sweep = SweepConfig {
        interval: args.sweep_interval,
        idle_threshold: args.idle_threshold,
    };
    let mut sweeper: Option<SweeperHandle> = None;

    let router = match args.mode {
        Mode::Global => app(AdmissionLayer::global(quota)),
        Mode::PerClient | Mode::Strict => {
            let layer = AdmissionLayer::per_client(quota);
            sweeper = Some(EvictionSweeper::new(layer.registry().clone(), sweep).spawn());
            app(layer)
        }
    };

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    info!(
        listen = %args.listen,
        mode = ?args.mode,
        capacity = quota.capacity(),
        rate = quota.refill_per_second(),
        "serving /ping"
    );

    let served = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }
    if let Err(err) = served {
        error!(%err, listen = %args.listen, "there was an error serving /ping");
        return Err(err.into());
    }
    Ok(())
}
