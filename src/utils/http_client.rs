use reqwest::Client;
use std::time::Duration;

/// Shared client for control-plane calls (vector store, embedding APIs,
/// batch status). Short timeouts so a stuck endpoint fails fast and the
/// retry policy can take over.
pub fn new_api_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Some(Duration::from_secs(240)))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .expect("Failed to build HTTP client")
}

/// Client for batch file uploads/downloads, which can carry hundreds of
/// megabytes of request lines.
pub fn new_upload_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(300))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to build HTTP upload client")
}
