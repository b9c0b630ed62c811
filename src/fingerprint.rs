//! # Device Fingerprinting & Risk Scoring
//!
//! Server-side device fingerprinting for the OTP verification path. A
//! fingerprint hashes only the stable request attributes, so the same device
//! is recognized across minor network changes; risk scoring layers additive
//! heuristics (velocity, proxy ranges, bot markers) on top, with a handful
//! of conditions that force the suspicious verdict regardless of the total.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use axum::http::HeaderMap;
use chrono::Duration;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use crate::clock::{Clock, SharedClock};

/// Suspicion threshold for the additive score.
const SUSPICIOUS_SCORE_THRESHOLD: u32 = 50;

/// Velocity counter window.
const VELOCITY_WINDOW_MINUTES: i64 = 60;

/// Bounded size of the in-memory velocity map.
const VELOCITY_CACHE_CAPACITY: usize = 16_384;

/// UA substrings that mark automation tooling.
const SUSPICIOUS_UA_PATTERNS: &[&str] = &[
    "curl",
    "wget",
    "python",
    "java/",
    "libwww",
    "httpclient",
    "bot",
    "crawler",
    "spider",
    "scraper",
    "headless",
    "phantom",
    "selenium",
    "puppeteer",
];

/// Raw per-request signals the scorer consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSignals {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub accept_encoding: Option<String>,
    pub sec_ch_ua: Option<String>,
    pub sec_ch_ua_mobile: Option<String>,
    pub sec_ch_ua_platform: Option<String>,
}

impl RequestSignals {
    /// Collect signals from request headers plus the peer address.
    pub fn from_headers(headers: &HeaderMap, ip_address: Option<String>) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.to_string())
        };

        Self {
            ip_address,
            user_agent: header("user-agent"),
            accept_language: header("accept-language"),
            accept_encoding: header("accept-encoding"),
            sec_ch_ua: header("sec-ch-ua"),
            sec_ch_ua_mobile: header("sec-ch-ua-mobile"),
            sec_ch_ua_platform: header("sec-ch-ua-platform"),
        }
    }
}

/// Parsed user-agent summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device: String,
    pub os: String,
    pub browser: String,
}

/// Stable device fingerprint derived from request signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fingerprint {
    /// SHA-256 over the stable attributes
    pub hash: String,
    /// The raw signals the hash was derived from
    pub signals: RequestSignals,
    /// Parsed user-agent summary
    pub device_info: DeviceInfo,
}

impl Fingerprint {
    /// JSON stored alongside an OTP challenge for later comparison.
    pub fn to_stored_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Rebuild a fingerprint from its stored JSON form.
    pub fn from_stored_json(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Outcome of scoring a fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RiskAssessment {
    /// Whether the request should be treated as suspicious
    pub is_suspicious: bool,
    /// Additive risk score, capped at 100
    pub risk_score: u32,
    /// Human-readable reasons behind the score
    pub reasons: Vec<String>,
    /// Requests seen from this IP inside the window (including this one)
    pub ip_velocity: u32,
    /// Requests seen from this device hash inside the window
    pub device_velocity: u32,
}

/// Shared sliding-window counters keyed by `(context, ip)` and
/// `(context, device_hash)`.
///
/// Implementations must increment atomically: a racy read-then-write could
/// lose a rate-limit observation entirely, which degrades security
/// catastrophically rather than gracefully.
pub trait VelocityStore: Send + Sync {
    /// Increment the counter for `key` and return the count within the
    /// current window, including this observation.
    fn increment(&self, key: &str) -> u32;

    /// Read the counter without incrementing.
    fn peek(&self, key: &str) -> u32;
}

/// Bounded in-memory velocity store with per-key TTL windows.
///
/// Counters are fixed-window: the first observation opens the window and
/// the count resets once it lapses. Eviction of cold keys under memory
/// pressure undercounts slightly, which is the accepted trade-off.
pub struct InMemoryVelocityStore {
    entries: Mutex<LruCache<String, (chrono::DateTime<chrono::Utc>, u32)>>,
    clock: SharedClock,
    window: Duration,
}

impl InMemoryVelocityStore {
    /// Create a store with the default 1-hour window.
    pub fn new(clock: SharedClock) -> Self {
        Self::with_window(clock, Duration::minutes(VELOCITY_WINDOW_MINUTES))
    }

    /// Create a store with a custom window (tests).
    pub fn with_window(clock: SharedClock, window: Duration) -> Self {
        let capacity = NonZeroUsize::new(VELOCITY_CACHE_CAPACITY).expect("capacity is non-zero");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            clock,
            window,
        }
    }
}

impl VelocityStore for InMemoryVelocityStore {
    fn increment(&self, key: &str) -> u32 {
        let now = self.clock.now();
        let mut entries = self.entries.lock().expect("velocity store mutex poisoned");

        let (window_start, count) = match entries.get(key) {
            Some((window_start, count)) if now - *window_start < self.window => {
                (*window_start, count + 1)
            }
            _ => (now, 1),
        };

        entries.put(key.to_string(), (window_start, count));
        count
    }

    fn peek(&self, key: &str) -> u32 {
        let now = self.clock.now();
        let mut entries = self.entries.lock().expect("velocity store mutex poisoned");

        match entries.get(key) {
            Some((window_start, count)) if now - *window_start < self.window => *count,
            _ => 0,
        }
    }
}

/// Computes fingerprints and risk assessments from request signals.
pub struct DeviceRiskScorer {
    velocity: Arc<dyn VelocityStore>,
}

impl DeviceRiskScorer {
    /// Create a new scorer backed by the given velocity store
    pub fn new(velocity: Arc<dyn VelocityStore>) -> Self {
        Self { velocity }
    }

    /// Derive the stable fingerprint for a request.
    pub fn fingerprint(&self, signals: &RequestSignals) -> Fingerprint {
        Fingerprint {
            hash: fingerprint_hash(signals),
            signals: signals.clone(),
            device_info: parse_user_agent(signals.user_agent.as_deref()),
        }
    }

    /// Score a fingerprint in the given context ("otp", "signing", ...).
    ///
    /// Increments the shared velocity counters as a side effect, so each
    /// request should be scored exactly once.
    pub fn score(&self, fingerprint: &Fingerprint, context: &str) -> RiskAssessment {
        let mut forced = false;
        let mut score: u32 = 0;
        let mut reasons = Vec::new();

        let ip = fingerprint.signals.ip_address.as_deref().unwrap_or("");
        let ip_velocity = self
            .velocity
            .increment(&format!("fingerprint:ip:{context}:{ip}"));

        // Velocity thresholds exclude the current observation
        let prior_ip = ip_velocity.saturating_sub(1);
        if prior_ip > 10 {
            forced = true;
            reasons.push("High velocity from same IP".to_string());
            score += 30;
        } else if prior_ip > 5 {
            reasons.push("Moderate velocity from same IP".to_string());
            score += 15;
        }

        let device_velocity = self
            .velocity
            .increment(&format!("fingerprint:device:{context}:{}", fingerprint.hash));

        let prior_device = device_velocity.saturating_sub(1);
        if prior_device > 15 {
            forced = true;
            reasons.push("High velocity from same device".to_string());
            score += 25;
        } else if prior_device > 8 {
            reasons.push("Moderate velocity from same device".to_string());
            score += 10;
        }

        if is_private_range(ip) {
            reasons.push("Possible proxy or VPN detected".to_string());
            score += 20;
        }

        match fingerprint.signals.user_agent.as_deref() {
            None | Some("") => {
                forced = true;
                reasons.push("Missing user agent".to_string());
                score += 40;
            }
            Some(ua) => {
                if is_suspicious_user_agent(&ua.to_lowercase()) {
                    forced = true;
                    reasons.push("Suspicious user agent pattern".to_string());
                    score += 35;
                }
            }
        }

        if fingerprint
            .signals
            .accept_language
            .as_deref()
            .unwrap_or("")
            .is_empty()
        {
            reasons.push("Missing accept-language header".to_string());
            score += 10;
        }

        let risk_score = score.min(100);
        let is_suspicious = forced || risk_score >= SUSPICIOUS_SCORE_THRESHOLD;

        if is_suspicious {
            metrics::counter!("lease_risk_suspicious_total", "context" => context.to_string())
                .increment(1);
        }

        RiskAssessment {
            is_suspicious,
            risk_score,
            reasons,
            ip_velocity,
            device_velocity,
        }
    }
}

/// SHA-256 over the ordered stable attributes. Volatile attributes (IP,
/// timestamps) are excluded so the hash survives network changes.
pub fn fingerprint_hash(signals: &RequestSignals) -> String {
    let stable = [
        signals.user_agent.as_deref().unwrap_or(""),
        signals.accept_language.as_deref().unwrap_or(""),
        signals.accept_encoding.as_deref().unwrap_or(""),
        signals.sec_ch_ua.as_deref().unwrap_or(""),
        signals.sec_ch_ua_platform.as_deref().unwrap_or(""),
    ];

    let mut hasher = Sha256::new();
    hasher.update(stable.join("|").as_bytes());
    hex::encode(hasher.finalize())
}

/// Similarity between two fingerprints, 0-100. Used at verification time to
/// notice a device change between issuance and verification.
pub fn similarity(a: &Fingerprint, b: &Fingerprint) -> u32 {
    let mut score = 0;

    let a_signals = &a.signals;
    let b_signals = &b.signals;

    if a_signals.ip_address.is_some() && a_signals.ip_address == b_signals.ip_address {
        score += 30;
    } else if is_same_subnet(
        a_signals.ip_address.as_deref().unwrap_or(""),
        b_signals.ip_address.as_deref().unwrap_or(""),
    ) {
        score += 15;
    }

    if a_signals.user_agent.is_some() && a_signals.user_agent == b_signals.user_agent {
        score += 25;
    } else if a.device_info.browser == b.device_info.browser
        && a.device_info.os == b.device_info.os
        && a.device_info.browser != "unknown"
    {
        score += 10;
    }

    if a_signals.accept_language.is_some() && a_signals.accept_language == b_signals.accept_language
    {
        score += 10;
    }

    if a_signals.sec_ch_ua_platform.is_some()
        && a_signals.sec_ch_ua_platform == b_signals.sec_ch_ua_platform
    {
        score += 15;
    }

    if a_signals.sec_ch_ua.is_some() && a_signals.sec_ch_ua == b_signals.sec_ch_ua {
        score += 10;
    }

    if a_signals.sec_ch_ua_mobile.is_some()
        && a_signals.sec_ch_ua_mobile == b_signals.sec_ch_ua_mobile
    {
        score += 5;
    }

    if a.hash == b.hash {
        score += 5;
    }

    score.min(100)
}

/// Parse the user-agent into a coarse device/os/browser summary.
pub fn parse_user_agent(user_agent: Option<&str>) -> DeviceInfo {
    let Some(user_agent) = user_agent.filter(|ua| !ua.is_empty()) else {
        return DeviceInfo {
            device: "unknown".to_string(),
            os: "unknown".to_string(),
            browser: "unknown".to_string(),
        };
    };

    let ua = user_agent.to_lowercase();

    let device = if ua.contains("tablet") || ua.contains("ipad") {
        "tablet"
    } else if ua.contains("mobile") || ua.contains("android") {
        "mobile"
    } else {
        "desktop"
    };

    let os = if ua.contains("windows") {
        "windows"
    } else if ua.contains("mac os") || ua.contains("macintosh") {
        "macos"
    } else if ua.contains("android") {
        "android"
    } else if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ios") {
        "ios"
    } else if ua.contains("linux") {
        "linux"
    } else {
        "unknown"
    };

    let browser = if ua.contains("edg") {
        "edge"
    } else if ua.contains("opera") || ua.contains("opr") {
        "opera"
    } else if ua.contains("chrome") {
        "chrome"
    } else if ua.contains("firefox") {
        "firefox"
    } else if ua.contains("safari") {
        "safari"
    } else {
        "unknown"
    };

    DeviceInfo {
        device: device.to_string(),
        os: os.to_string(),
        browser: browser.to_string(),
    }
}

fn is_suspicious_user_agent(ua: &str) -> bool {
    SUSPICIOUS_UA_PATTERNS
        .iter()
        .any(|pattern| ua.contains(pattern))
}

/// RFC 1918 private ranges, a cheap stand-in for proxy/VPN intelligence.
fn is_private_range(ip: &str) -> bool {
    if ip.starts_with("10.") || ip.starts_with("192.168.") {
        return true;
    }

    if let Some(rest) = ip.strip_prefix("172.")
        && let Some((second, _)) = rest.split_once('.')
        && let Ok(octet) = second.parse::<u8>()
    {
        return (16..=31).contains(&octet);
    }

    false
}

fn is_same_subnet(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }

    let a_parts: Vec<&str> = a.split('.').collect();
    let b_parts: Vec<&str> = b.split('.').collect();

    a_parts.len() == 4 && b_parts.len() == 4 && a_parts[..3] == b_parts[..3]
}
