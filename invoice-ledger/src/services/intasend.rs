//! IntaSend mobile-money gateway client.
//!
//! Starts STK-push collections for an invoice and verifies the signature
//! on webhook deliveries.

use crate::config::GatewayConfig;
use crate::models::{Currency, Invoice};
use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::observability::TracedClientExt;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

pub const SIGNATURE_HEADER: &str = "x-intasend-signature";

#[derive(Clone)]
pub struct IntasendClient {
    client: Client,
    config: GatewayConfig,
}

/// Request body for `POST /api/v1/collection/`.
#[derive(Debug, Serialize)]
pub struct CollectionRequest {
    pub amount: Decimal,
    pub currency: Currency,
    pub phone_number: String,
    pub api_ref: String,
    pub callback_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    pub customer_name: String,
    pub invoice_number: String,
    pub host: &'static str,
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    id: Option<String>,
    #[serde(default)]
    checkout: Option<CheckoutLink>,
}

#[derive(Debug, Deserialize)]
struct CheckoutLink {
    url: Option<String>,
}

/// Handle returned by the gateway for a started collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionStarted {
    pub checkout_id: Option<String>,
    pub checkout_url: Option<String>,
}

impl IntasendClient {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.api_url.is_empty() && !self.config.secret_key.expose_secret().is_empty()
    }

    /// Ask the client's phone to approve payment of the invoice balance.
    pub async fn initiate_collection(
        &self,
        invoice: &Invoice,
        customer_name: &str,
        customer_email: Option<&str>,
        phone: &str,
    ) -> Result<CollectionStarted> {
        if !self.is_configured() {
            return Err(anyhow!("IntaSend gateway is not configured"));
        }

        let request = CollectionRequest {
            amount: invoice.balance_due(),
            currency: invoice.currency,
            phone_number: normalize_phone_number(phone),
            api_ref: invoice.invoice_number.clone(),
            callback_url: self.config.callback_url.clone(),
            customer_email: customer_email.map(str::to_string),
            customer_name: customer_name.to_string(),
            invoice_number: invoice.invoice_number.clone(),
            host: "browser",
        };

        let url = format!(
            "{}/api/v1/collection/",
            self.config.api_url.trim_end_matches('/')
        );
        let response = self
            .client
            .traced_post(&url)
            .bearer_auth(self.config.secret_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(anyhow!("IntaSend API error (status {}): {}", status, body));
        }

        let parsed: CollectionResponse = serde_json::from_str(&body)?;
        info!(
            invoice_number = %invoice.invoice_number,
            checkout_id = ?parsed.id,
            "Collection initiated"
        );

        Ok(CollectionStarted {
            checkout_id: parsed.id,
            checkout_url: parsed.checkout.and_then(|c| c.url),
        })
    }

    /// Check a webhook body against its hex HMAC-SHA256 signature.
    /// Always true when no webhook secret is configured.
    pub fn verify_webhook_signature(&self, body: &[u8], signature: Option<&str>) -> Result<bool> {
        let Some(secret) = &self.config.webhook_secret else {
            return Ok(true);
        };
        let Some(signature) = signature else {
            warn!("Webhook signature missing");
            return Ok(false);
        };

        let expected = compute_signature(body, secret.expose_secret())?;
        let provided = signature.trim().to_ascii_lowercase();
        let is_valid: bool = expected.as_bytes().ct_eq(provided.as_bytes()).into();

        if !is_valid {
            warn!("Webhook signature verification failed");
        }

        Ok(is_valid)
    }
}

/// Hex HMAC-SHA256 of `payload` under `secret`.
pub fn compute_signature(payload: &[u8], secret: &str) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| anyhow!("Invalid key length"))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Convert a Kenyan phone number to the 254XXXXXXXXX form the gateway expects.
pub fn normalize_phone_number(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();

    match digits.len() {
        10 if digits.starts_with('0') => format!("254{}", &digits[1..]),
        9 => format!("254{}", digits),
        12 => digits,
        _ => format!("254{}", digits),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;
    use std::time::Duration;

    fn test_config(webhook_secret: Option<&str>) -> GatewayConfig {
        GatewayConfig {
            api_url: "https://sandbox.intasend.com".to_string(),
            secret_key: Secret::new("ISSecretKey_test".to_string()),
            webhook_secret: webhook_secret.map(|s| Secret::new(s.to_string())),
            callback_url: "http://localhost/webhooks/intasend".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn phone_numbers_normalize_to_254() {
        assert_eq!(normalize_phone_number("0712 345 678"), "254712345678");
        assert_eq!(normalize_phone_number("712345678"), "254712345678");
        assert_eq!(normalize_phone_number("+254712345678"), "254712345678");
    }

    #[test]
    fn signature_round_trip() {
        let client = IntasendClient::new(test_config(Some("whsec"))).unwrap();
        let body = br#"{"invoice_number":"INV-1"}"#;
        let signature = compute_signature(body, "whsec").unwrap();

        assert!(client.verify_webhook_signature(body, Some(&signature)).unwrap());
        assert!(client
            .verify_webhook_signature(body, Some(&signature.to_uppercase()))
            .unwrap());
        assert!(!client.verify_webhook_signature(body, Some("deadbeef")).unwrap());
        assert!(!client.verify_webhook_signature(body, None).unwrap());
    }

    #[test]
    fn unsigned_webhooks_pass_without_a_secret() {
        let client = IntasendClient::new(test_config(None)).unwrap();
        assert!(client.verify_webhook_signature(b"{}", None).unwrap());
    }

    #[test]
    fn unconfigured_without_secret_key() {
        let mut config = test_config(None);
        config.secret_key = Secret::new(String::new());
        let client = IntasendClient::new(config).unwrap();
        assert!(!client.is_configured());
    }
}
