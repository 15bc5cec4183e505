//! Environment-based authentication helpers for direct API access

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Exchange API credentials, loaded from the environment
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl ApiCredentials {
    /// Load credentials from `ORDERTOOLS_API_KEY` / `ORDERTOOLS_API_SECRET`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ORDERTOOLS_API_KEY")
            .map_err(|_| anyhow!("ORDERTOOLS_API_KEY not set"))?;
        let api_secret = std::env::var("ORDERTOOLS_API_SECRET")
            .map_err(|_| anyhow!("ORDERTOOLS_API_SECRET not set"))?;
        if api_key.is_empty() || api_secret.is_empty() {
            return Err(anyhow!("Exchange API credentials cannot be empty"));
        }
        Ok(Self {
            api_key,
            api_secret,
        })
    }
}

/// Generate the request signature for REST API authentication.
///
/// The signed message is `timestamp + method + path + body`, keyed with the
/// base64-decoded API secret, and the signature is returned base64-encoded.
pub fn generate_signature(
    api_secret: &str,
    timestamp: u64,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> Result<String> {
    let mut message = format!("{}{}{}", timestamp, method, path);
    if let Some(body_str) = body {
        message.push_str(body_str);
    }

    let secret_bytes = general_purpose::STANDARD
        .decode(api_secret)
        .map_err(|e| anyhow!("Failed to decode API secret: {}", e))?;

    let mut mac = HmacSha256::new_from_slice(&secret_bytes)
        .map_err(|e| anyhow!("Invalid key length: {}", e))?;
    mac.update(message.as_bytes());

    let result = mac.finalize();
    Ok(general_purpose::STANDARD.encode(result.into_bytes()))
}

/// Build the signed header set for a REST request
pub fn build_signed_headers(
    credentials: &ApiCredentials,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> Result<Vec<(String, String)>> {
    let timestamp = Utc::now().timestamp() as u64;
    let signature = generate_signature(&credentials.api_secret, timestamp, method, path, body)?;

    Ok(vec![
        ("CB-ACCESS-KEY".to_string(), credentials.api_key.clone()),
        ("CB-ACCESS-SIGN".to_string(), signature),
        ("CB-ACCESS-TIMESTAMP".to_string(), timestamp.to_string()),
    ])
}

/// Sign a WebSocket channel subscription.
///
/// Returns `(timestamp, signature)`; the signed message is
/// `timestamp + channel`.
pub fn sign_channel(credentials: &ApiCredentials, channel: &str) -> Result<(String, String)> {
    let timestamp = Utc::now().timestamp().to_string();

    let secret_bytes = general_purpose::STANDARD
        .decode(&credentials.api_secret)
        .map_err(|e| anyhow!("Failed to decode API secret: {}", e))?;

    let mut mac = HmacSha256::new_from_slice(&secret_bytes)
        .map_err(|e| anyhow!("Invalid key length: {}", e))?;
    mac.update(timestamp.as_bytes());
    mac.update(channel.as_bytes());

    let result = mac.finalize();
    let signature = general_purpose::STANDARD.encode(result.into_bytes());
    Ok((timestamp, signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const TEST_SECRET: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

    #[test]
    fn test_signature_is_deterministic() {
        let timestamp = 1000000;
        let body = r#"{"product_id":"BTC-USD"}"#;

        let signature =
            generate_signature(TEST_SECRET, timestamp, "POST", "/orders", Some(body)).unwrap();

        // The signature should be a valid base64 string
        assert!(!signature.is_empty());
        assert!(general_purpose::STANDARD.decode(&signature).is_ok());

        // Test that the signature is consistent
        let signature2 =
            generate_signature(TEST_SECRET, timestamp, "POST", "/orders", Some(body)).unwrap();
        assert_eq!(signature, signature2);
    }

    #[test]
    fn test_signature_depends_on_body() {
        let with_body =
            generate_signature(TEST_SECRET, 1000000, "POST", "/orders", Some("{}")).unwrap();
        let without_body = generate_signature(TEST_SECRET, 1000000, "POST", "/orders", None).unwrap();
        assert_ne!(with_body, without_body);
    }

    #[test]
    fn test_build_signed_headers() {
        let credentials = ApiCredentials {
            api_key: "test_key".to_string(),
            api_secret: TEST_SECRET.to_string(),
        };

        let headers = build_signed_headers(&credentials, "GET", "/accounts", None).unwrap();
        let header_map: HashMap<String, String> = headers.into_iter().collect();

        assert!(header_map.contains_key("CB-ACCESS-KEY"));
        assert!(header_map.contains_key("CB-ACCESS-SIGN"));
        assert!(header_map.contains_key("CB-ACCESS-TIMESTAMP"));
        assert_eq!(header_map["CB-ACCESS-KEY"], "test_key");
    }

    #[test]
    fn test_sign_channel() {
        let credentials = ApiCredentials {
            api_key: "test_key".to_string(),
            api_secret: TEST_SECRET.to_string(),
        };

        let (timestamp, signature) = sign_channel(&credentials, "user").unwrap();
        assert!(!timestamp.is_empty());
        assert!(general_purpose::STANDARD.decode(&signature).is_ok());
    }
}
