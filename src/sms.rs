//! # SMS Transport
//!
//! Shared SMS delivery abstraction for OTP codes and signing links. The
//! engine only ever sees the [`SmsTransport`] trait; the default
//! implementation posts to an HTTP gateway. Delivery is always treated as
//! unconfirmed until the gateway acknowledges it, and a `false`/error result
//! makes the caller expire whatever the message was supposed to authorize.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{error, info, warn};

use crate::config::SmsConfig;

/// Outcome-oriented SMS sender. Implementations must never assume delivery
/// succeeded: `Ok(false)` and `Err` both mean "not delivered".
#[async_trait]
pub trait SmsTransport: Send + Sync {
    /// Send `message` to `phone`. Returns whether the gateway accepted it.
    async fn send(&self, phone: &str, message: &str) -> Result<bool, SmsError>;
}

/// Errors surfaced by SMS transports.
#[derive(Debug, thiserror::Error)]
pub enum SmsError {
    #[error("invalid phone number")]
    InvalidPhone,
    #[error("sms gateway is not configured")]
    NotConfigured,
    #[error("sms gateway request failed: {0}")]
    Request(String),
}

/// Phone number normalization and masking helpers.
///
/// Centralizes the formatting rules so logs never carry a raw phone number.
pub struct PhoneFormatter;

impl PhoneFormatter {
    /// Normalize a phone number to international `+{country}{subscriber}`
    /// form. Local numbers starting with `0` get the default country code.
    pub fn to_international(phone: &str, default_country_code: &str) -> String {
        let cleaned: String = phone
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect();

        if cleaned.starts_with('+') && cleaned.len() >= 10 {
            return cleaned;
        }

        let digits = cleaned.trim_start_matches('+');

        let normalized = if let Some(rest) = digits.strip_prefix('0') {
            format!("{default_country_code}{rest}")
        } else if digits.starts_with(default_country_code) {
            digits.to_string()
        } else {
            format!("{default_country_code}{digits}")
        };

        format!("+{normalized}")
    }

    /// Whether the number has enough digits to be routable.
    pub fn is_valid(phone: &str) -> bool {
        let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
        (9..=15).contains(&digits)
    }

    /// Mask for logs: keep the country code and the last three digits.
    pub fn mask(phone: &str, default_country_code: &str) -> String {
        let formatted = Self::to_international(phone, default_country_code);

        if formatted.len() < 8 {
            return "*".repeat(formatted.len());
        }

        let prefix = &formatted[..4];
        let suffix = &formatted[formatted.len() - 3..];
        format!("{prefix}****{suffix}")
    }
}

/// HTTP SMS gateway client.
///
/// Speaks the form-encoded bulk-messaging dialect common to regional
/// gateways: `username`/`to`/`message`/`from` fields, JSON response carrying
/// a per-recipient status.
pub struct HttpSmsTransport {
    client: Client,
    config: SmsConfig,
}

impl HttpSmsTransport {
    /// Create a new transport from gateway configuration
    pub fn new(config: SmsConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    /// Whether the gateway credentials are present.
    pub fn is_configured(&self) -> bool {
        self.config.api_url.is_some()
            && self.config.api_key.is_some()
            && self.config.username.is_some()
    }
}

#[async_trait]
impl SmsTransport for HttpSmsTransport {
    async fn send(&self, phone: &str, message: &str) -> Result<bool, SmsError> {
        let masked = PhoneFormatter::mask(phone, &self.config.default_country_code);

        if !PhoneFormatter::is_valid(phone) {
            warn!(phone_masked = %masked, "Invalid phone number for SMS");
            return Err(SmsError::InvalidPhone);
        }

        // Development mode: no gateway configured, nothing is dispatched
        let (Some(api_url), Some(api_key), Some(username)) = (
            self.config.api_url.as_deref(),
            self.config.api_key.as_deref(),
            self.config.username.as_deref(),
        ) else {
            warn!(
                phone_masked = %masked,
                message_length = message.len(),
                "SMS gateway not configured - message not sent"
            );
            return Err(SmsError::NotConfigured);
        };

        let formatted = PhoneFormatter::to_international(phone, &self.config.default_country_code);

        let mut form = HashMap::new();
        form.insert("username", username.to_string());
        form.insert("to", formatted);
        form.insert("message", message.to_string());
        form.insert("from", self.config.sender_id.clone());

        let response = self
            .client
            .post(api_url)
            .header("apiKey", api_key)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|err| {
                error!(phone_masked = %masked, error = %err, "SMS gateway request error");
                SmsError::Request(err.to_string())
            })?;

        if !response.status().is_success() {
            warn!(
                phone_masked = %masked,
                status_code = response.status().as_u16(),
                "SMS gateway request failed"
            );
            return Ok(false);
        }

        let body: serde_json::Value = response.json().await.map_err(|err| {
            error!(phone_masked = %masked, error = %err, "SMS gateway returned invalid JSON");
            SmsError::Request(err.to_string())
        })?;

        let status = body
            .pointer("/SMSMessageData/Recipients/0/status")
            .and_then(|v| v.as_str());

        if status == Some("Success") {
            info!(
                phone_masked = %masked,
                message_id = body
                    .pointer("/SMSMessageData/Recipients/0/messageId")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown"),
                "SMS sent successfully"
            );
            metrics::counter!("lease_sms_sent_total").increment(1);
            Ok(true)
        } else {
            warn!(
                phone_masked = %masked,
                status = status.unwrap_or("missing"),
                "SMS not accepted by gateway"
            );
            Ok(false)
        }
    }
}

/// Message body for an OTP code.
pub fn otp_message(code: &str, reference_number: &str, expiry_minutes: i64) -> String {
    format!(
        "Your verification code for lease {reference_number} is {code}. It expires in {expiry_minutes} minutes. Do not share this code."
    )
}

/// Message body for a signing link.
pub fn signing_link_message(reference_number: &str, link: &str) -> String {
    format!("Your lease {reference_number} is ready to sign: {link}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_international_normalizes_local_numbers() {
        assert_eq!(
            PhoneFormatter::to_international("0712 345 678", "254"),
            "+254712345678"
        );
        assert_eq!(
            PhoneFormatter::to_international("+254712345678", "254"),
            "+254712345678"
        );
        assert_eq!(
            PhoneFormatter::to_international("254712345678", "254"),
            "+254712345678"
        );
        assert_eq!(
            PhoneFormatter::to_international("712345678", "254"),
            "+254712345678"
        );
    }

    #[test]
    fn test_is_valid_bounds() {
        assert!(PhoneFormatter::is_valid("+254712345678"));
        assert!(PhoneFormatter::is_valid("0712345678"));
        assert!(!PhoneFormatter::is_valid("12345"));
        assert!(!PhoneFormatter::is_valid(""));
        assert!(!PhoneFormatter::is_valid("+1234567890123456789"));
    }

    #[test]
    fn test_mask_hides_subscriber_digits() {
        let masked = PhoneFormatter::mask("0712345678", "254");
        assert_eq!(masked, "+254****678");
        assert!(!masked.contains("12345"));
    }

    #[test]
    fn test_unconfigured_transport_reports_failure() {
        let transport = HttpSmsTransport::new(SmsConfig::default());
        assert!(!transport.is_configured());

        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(transport.send("0712345678", "hello"));

        assert!(matches!(result, Err(SmsError::NotConfigured)));
    }

    #[test]
    fn test_message_bodies_include_context() {
        let otp = otp_message("0421", "LSE-COM-A-00001-2026", 10);
        assert!(otp.contains("0421"));
        assert!(otp.contains("LSE-COM-A-00001-2026"));
        assert!(otp.contains("10 minutes"));

        let link = signing_link_message("LSE-COM-A-00001-2026", "https://sign.example/abc");
        assert!(link.contains("https://sign.example/abc"));
    }
}
