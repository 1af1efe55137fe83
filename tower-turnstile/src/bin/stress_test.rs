use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use hdrhistogram::Histogram;
use rand::Rng;
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceExt;
use tower::service_fn;
use tower_turnstile::AdmissionError;
use tower_turnstile::AdmissionLayer;
use tower_turnstile::ClientRegistry;
use tower_turnstile::ExtractionError;
use tower_turnstile::GlobalKey;
use tower_turnstile::Quota;
use tower_turnstile::key_fn;
use turnstile::EvictionSweeper;
use turnstile::SweepConfig;

async fn mock_db_call(_req: IpAddr) -> Result<&'static str, BoxError> {
    // Simulate real-world work (5ms of DB latency)
    sleep(Duration::from_millis(5)).await;
    Ok("success")
}

#[derive(Default)]
struct RejectionCounter {
    rate_limited: usize,
    unidentified: usize,
    inner: usize,
    unknown: usize,
}

async fn run_load_test<S>(name: &str, svc: S, clients: u32, total_reqs: usize)
where
    S: Service<IpAddr, Response = &'static str, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send,
{
    let mut hist_elapsed = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3).unwrap();

    let mut tasks = JoinSet::new();
    let mut rejections = RejectionCounter::default();

    let start = Instant::now();

    let barrier = Arc::new(Barrier::new(total_reqs));

    for _ in 0..total_reqs {
        let local_svc = svc.clone();
        let bar = barrier.clone();
        // Pick a client at random so that some clients burst and others idle
        let client = rand::rng().random_range(0..clients);
        let ip = IpAddr::V4(Ipv4Addr::from(0x0a00_0000 + client));
        tasks.spawn(async move {
            bar.wait().await;
            let req_start = Instant::now();
            let res = local_svc.oneshot(ip).await;
            (res, req_start.elapsed())
        });
    }

    let mut success_count = 0;

    while let Some(task) = tasks.join_next().await {
        let (res, elapsed) = task.expect("Task panicked");
        match res {
            Ok(_) => {
                success_count += 1;
                hist_elapsed.record(elapsed.as_micros() as u64).unwrap();
            }
            Err(e) => match e.downcast_ref::<AdmissionError>() {
                Some(AdmissionError::RateLimited { .. }) => rejections.rate_limited += 1,
                Some(AdmissionError::Extraction(_)) => rejections.unidentified += 1,
                Some(AdmissionError::Inner(_)) => rejections.inner += 1,
                None => rejections.unknown += 1,
            },
        }
    }

    let total_duration = start.elapsed();
    let throughput = total_reqs as f64 / total_duration.as_secs_f64();
    let goodput = success_count as f64 / total_duration.as_secs_f64();

    println!("--- {} ---", name);
    println!("Clients:         {}", clients);
    println!("Total Duration:  {:.2?}", total_duration);
    println!("Success/Total:   {}/{}", success_count, total_reqs);
    println!("Total Rate:      {:.2} req/sec", throughput);
    println!("Success Rate:    {:.2} req/sec (Goodput)", goodput);

    if success_count > 0 {
        println!("P50 (Elapsed):   {}µs", hist_elapsed.value_at_quantile(0.5));
        println!(
            "P99 (Elapsed):   {}µs",
            hist_elapsed.value_at_quantile(0.99)
        );
    }

    let total_errors =
        rejections.rate_limited + rejections.unidentified + rejections.inner + rejections.unknown;
    println!("Errors:          {}", total_errors);
    if total_errors > 0 {
        println!("  └─ RateLimited:  {}", rejections.rate_limited);
        if rejections.unidentified > 0 {
            println!("  └─ Unidentified: {}", rejections.unidentified);
        }
        if rejections.inner > 0 {
            println!("  └─ Inner:        {}", rejections.inner);
        }
        if rejections.unknown > 0 {
            println!("  └─ Unknown:      {}", rejections.unknown);
        }
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let total_reqs = 50_000;
    let by_ip = key_fn(|ip: &IpAddr| Ok::<_, ExtractionError>(*ip));

    // 1. Per-client buckets, few clients: most requests are rejected
    let registry = Arc::new(ClientRegistry::new(Quota::per_client_default()));
    let svc = AdmissionLayer::new(registry.clone(), by_ip).layer(service_fn(mock_db_call));
    run_load_test("Per-Client (100 clients)", svc, 100, total_reqs).await;

    // 2. Per-client buckets, many clients: registry grows, sweeper keeps it bounded
    let registry = Arc::new(ClientRegistry::new(Quota::per_client_default()));
    let sweeper = EvictionSweeper::new(
        registry.clone(),
        SweepConfig {
            interval: Duration::from_millis(100),
            idle_threshold: Duration::from_millis(200),
        },
    )
    .spawn();
    let svc = AdmissionLayer::new(registry.clone(), by_ip).layer(service_fn(mock_db_call));
    run_load_test("Per-Client (20000 clients)", svc, 20_000, total_reqs).await;
    println!("Tracked clients after run: {}", registry.len());
    sleep(Duration::from_millis(500)).await;
    println!("Tracked clients after sweep: {}\n", registry.len());
    sweeper.shutdown().await;

    // 3. One global bucket sized for the whole run
    let capacity = NonZeroUsize::new(10_000).ok_or("capacity must be non-zero")?;
    let quota = Quota::new(capacity, 10_000.0)?;
    let registry = Arc::new(ClientRegistry::new(quota));
    let svc = AdmissionLayer::new(registry, GlobalKey).layer(service_fn(mock_db_call));
    run_load_test("Global", svc, 1_000, total_reqs).await;

    Ok(())
}
