use crate::config::Config;
use reqwest::Client;
use std::time::Duration;

/// Shared HTTP client. Both outbound calls (georef fetch, embedding
/// inference) are fatal on failure, so the request timeout doubles as the
/// run's upper bound per call.
pub fn build_client(config: &Config) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .connect_timeout(Duration::from_secs(config.http_connect_timeout_secs))
        .build()
        .unwrap_or_else(|_| Client::new())
}
