use anyhow::{Context, Result};

/// Worker process configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Sleep between polls when the queue is empty, and the backoff after
    /// a transient store error.
    pub poll_interval_secs: f64,
    /// Logged with every claim so concurrent workers are distinguishable.
    pub worker_name: String,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("missing env var DATABASE_URL")?;

        let poll_interval_secs = match std::env::var("POLL_INTERVAL_SECS") {
            Ok(raw) => raw
                .parse::<f64>()
                .with_context(|| format!("POLL_INTERVAL_SECS is not a number: {raw}"))?,
            Err(_) => 1.0,
        };

        let worker_name =
            std::env::var("WORKER_NAME").unwrap_or_else(|_| "worker-1".to_string());

        Ok(Self {
            database_url,
            poll_interval_secs,
            worker_name,
        })
    }
}
