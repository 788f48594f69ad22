//! Input definitions over HTTP
//!
//! The backend serves its raw-name → generic-id table as a flat JSON object
//! next to the Socket.IO endpoint.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::debug;

/// Route of the definitions table on the backend
pub const DEFINITIONS_PATH: &str = "/api/input-mapping-definitions";

/// HTTP client with the timeouts used for backend calls
pub fn build_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(2))
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")
}

/// Fetch the backend's definitions table
pub async fn fetch_input_definitions(
    client: &Client,
    url: &str,
) -> Result<HashMap<String, String>> {
    debug!("GET {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?
        .error_for_status()
        .with_context(|| format!("Backend refused {}", url))?;

    response
        .json::<HashMap<String, String>>()
        .await
        .with_context(|| format!("Malformed definitions table from {}", url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_definitions_table() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", DEFINITIONS_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"BTN_SOUTH": "A", "STICK_LX": "LEFT_STICK_X"}"#)
            .create_async()
            .await;

        let client = build_client().unwrap();
        let url = format!("{}{}", server.url(), DEFINITIONS_PATH);
        let table = fetch_input_definitions(&client, &url).await.unwrap();

        mock.assert_async().await;
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("STICK_LX").map(String::as_str), Some("LEFT_STICK_X"));
    }

    #[tokio::test]
    async fn test_fetch_definitions_errors() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server
            .mock("GET", DEFINITIONS_PATH)
            .with_status(404)
            .with_body(r#"{"error": "Input mapping definitions not found"}"#)
            .create_async()
            .await;

        let client = build_client().unwrap();
        let url = format!("{}{}", server.url(), DEFINITIONS_PATH);
        assert!(fetch_input_definitions(&client, &url).await.is_err());

        let _garbled = server
            .mock("GET", "/garbled")
            .with_status(200)
            .with_body(r#"["not", "a", "table"]"#)
            .create_async()
            .await;
        let url = format!("{}/garbled", server.url());
        assert!(fetch_input_definitions(&client, &url).await.is_err());
    }
}
