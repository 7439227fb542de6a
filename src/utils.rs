use std::future::Future;
use std::time::Instant;
use tracing::{error, info};

/// Runs a pipeline stage, logging how long it took and whether it failed.
pub async fn timed<T, E, F>(stage: &str, fut: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: Future<Output = Result<T, E>>,
{
    info!("Starting {}", stage);
    let started = Instant::now();
    let result = fut.await;
    let elapsed = started.elapsed().as_secs_f64();
    match &result {
        Ok(_) => info!("{} completed in {:.2} seconds", stage, elapsed),
        Err(e) => error!("{} failed after {:.2} seconds: {}", stage, elapsed, e),
    }
    result
}
