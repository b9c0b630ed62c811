//! # Signed Link Issuance & Verification
//!
//! Tamper-evident signing URLs using HMAC-SHA256 with constant-time
//! comparison to prevent timing attacks. A link binds the lease and the
//! recipient tenant together with an expiry instant; any change to the
//! triple invalidates the signature. Expired or forged links are rejected
//! before the engine is ever invoked.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;
use uuid::Uuid;

use crate::clock::{Clock, SharedClock};

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur during signing-link verification
#[derive(Debug, thiserror::Error)]
pub enum SignedLinkError {
    #[error("signing link has expired")]
    Expired,

    #[error("signing link signature is invalid")]
    InvalidSignature,

    #[error("signing link token is malformed")]
    MalformedToken,

    #[error("signing link base URL is invalid: {0}")]
    InvalidBaseUrl(String),
}

/// A freshly issued signing link.
#[derive(Debug, Clone)]
pub struct SigningLink {
    /// Absolute URL to hand to the transport
    pub url: String,
    /// Instant the link stops being accepted
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies recipient-bound signing links.
pub struct SignedLinkIssuer {
    secret: Vec<u8>,
    base_url: String,
    clock: SharedClock,
}

impl SignedLinkIssuer {
    /// Create a new issuer from the configured secret and public base URL
    pub fn new(secret: impl Into<Vec<u8>>, base_url: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            secret: secret.into(),
            base_url: base_url.into(),
            clock,
        }
    }

    /// Issue a link for `(lease_id, tenant_id)` valid for `ttl`.
    pub fn issue(
        &self,
        lease_id: Uuid,
        tenant_id: Uuid,
        ttl: Duration,
    ) -> Result<SigningLink, SignedLinkError> {
        let expires_at = self.clock.now() + ttl;
        let token = self.sign(lease_id, tenant_id, expires_at.timestamp());

        let mut url = Url::parse(&self.base_url)
            .map_err(|err| SignedLinkError::InvalidBaseUrl(err.to_string()))?;
        url.set_path(&format!("/api/v1/sign/{lease_id}"));
        url.query_pairs_mut()
            .append_pair("tenant", &tenant_id.to_string())
            .append_pair("expires", &expires_at.timestamp().to_string())
            .append_pair("token", &token);

        Ok(SigningLink {
            url: url.to_string(),
            expires_at,
        })
    }

    /// Verify a presented link token. Expiry is checked before the
    /// signature so expired links report as expired rather than forged.
    pub fn verify(
        &self,
        lease_id: Uuid,
        tenant_id: Uuid,
        expires_ts: i64,
        token: &str,
    ) -> Result<(), SignedLinkError> {
        if token.is_empty() || token.len() > 128 {
            return Err(SignedLinkError::MalformedToken);
        }

        if self.clock.now().timestamp() > expires_ts {
            return Err(SignedLinkError::Expired);
        }

        let expected = self.sign(lease_id, tenant_id, expires_ts);

        let provided = hex::decode(token).map_err(|_| SignedLinkError::MalformedToken)?;
        let expected_bytes = hex::decode(&expected).map_err(|_| SignedLinkError::MalformedToken)?;

        if subtle::ConstantTimeEq::ct_eq(&expected_bytes[..], &provided[..]).into() {
            Ok(())
        } else {
            Err(SignedLinkError::InvalidSignature)
        }
    }

    fn sign(&self, lease_id: Uuid, tenant_id: Uuid, expires_ts: i64) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(format!("{lease_id}.{tenant_id}.{expires_ts}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn issuer_at(clock: std::sync::Arc<ManualClock>) -> SignedLinkIssuer {
        SignedLinkIssuer::new(
            b"test-link-secret".to_vec(),
            "https://leases.example.com",
            clock,
        )
    }

    fn extract_token(url: &str) -> (i64, String) {
        let parsed = Url::parse(url).expect("valid url");
        let mut expires = 0;
        let mut token = String::new();
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "expires" => expires = value.parse().expect("numeric expiry"),
                "token" => token = value.to_string(),
                _ => {}
            }
        }
        (expires, token)
    }

    #[test]
    fn test_issued_link_verifies() {
        let clock = ManualClock::starting_at(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap());
        let issuer = issuer_at(clock);

        let lease_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();

        let link = issuer
            .issue(lease_id, tenant_id, Duration::hours(72))
            .expect("issues");
        assert!(link.url.contains(&lease_id.to_string()));

        let (expires, token) = extract_token(&link.url);
        assert!(issuer.verify(lease_id, tenant_id, expires, &token).is_ok());
    }

    #[test]
    fn test_expired_link_rejected() {
        let clock = ManualClock::starting_at(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap());
        let issuer = issuer_at(clock.clone());

        let lease_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();
        let link = issuer
            .issue(lease_id, tenant_id, Duration::hours(72))
            .expect("issues");
        let (expires, token) = extract_token(&link.url);

        clock.advance(Duration::hours(73));

        assert!(matches!(
            issuer.verify(lease_id, tenant_id, expires, &token),
            Err(SignedLinkError::Expired)
        ));
    }

    #[test]
    fn test_recipient_binding() {
        let clock = ManualClock::starting_at(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap());
        let issuer = issuer_at(clock);

        let lease_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();
        let link = issuer
            .issue(lease_id, tenant_id, Duration::hours(72))
            .expect("issues");
        let (expires, token) = extract_token(&link.url);

        // Same token presented for a different tenant or lease must fail
        assert!(matches!(
            issuer.verify(lease_id, Uuid::new_v4(), expires, &token),
            Err(SignedLinkError::InvalidSignature)
        ));
        assert!(matches!(
            issuer.verify(Uuid::new_v4(), tenant_id, expires, &token),
            Err(SignedLinkError::InvalidSignature)
        ));
    }

    #[test]
    fn test_tampered_expiry_rejected() {
        let clock = ManualClock::starting_at(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap());
        let issuer = issuer_at(clock);

        let lease_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();
        let link = issuer
            .issue(lease_id, tenant_id, Duration::hours(1))
            .expect("issues");
        let (expires, token) = extract_token(&link.url);

        // Pushing the expiry forward invalidates the signature
        assert!(matches!(
            issuer.verify(lease_id, tenant_id, expires + 86_400, &token),
            Err(SignedLinkError::InvalidSignature)
        ));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let clock = ManualClock::starting_at(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap());
        let issuer = issuer_at(clock);

        let lease_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();
        let expires = 4_102_444_800; // far future

        for bad in ["", "zz-not-hex", &"a".repeat(200)] {
            assert!(issuer.verify(lease_id, tenant_id, expires, bad).is_err());
        }
    }
}
