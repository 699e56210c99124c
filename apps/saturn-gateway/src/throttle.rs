//! Sliding-window request throttling for the unauthenticated signup/login
//! endpoints. Grounded in the teacher's `ThrottleState`/
//! `consume_throttle_token` pattern: a per-key `VecDeque` of request
//! timestamps, pruned to the window on every call.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::Utc;
use tokio::sync::Mutex;

pub const SIGNUP_LIMIT: usize = 5;
pub const SIGNUP_WINDOW_SECONDS: i64 = 15 * 60;
pub const LOGIN_LIMIT: usize = 10;
pub const LOGIN_WINDOW_SECONDS: i64 = 15 * 60;

#[derive(Clone, Default)]
pub struct ThrottleState {
    buckets: Arc<Mutex<HashMap<String, VecDeque<i64>>>>,
}

/// Returns `Ok(())` if the bucket has room, `Err(retry_after_seconds)`
/// otherwise.
pub async fn consume_throttle_token(
    throttle_state: &ThrottleState,
    bucket_key: &str,
    max_requests: usize,
    window_seconds: i64,
) -> Result<(), i64> {
    let now_epoch = Utc::now().timestamp();
    let window_start = now_epoch - window_seconds;

    let mut buckets = throttle_state.buckets.lock().await;
    let bucket = buckets.entry(bucket_key.to_string()).or_default();

    while let Some(oldest) = bucket.front() {
        if *oldest < window_start {
            bucket.pop_front();
        } else {
            break;
        }
    }

    if bucket.len() >= max_requests {
        let retry_after = bucket
            .front()
            .map(|oldest| ((*oldest + window_seconds) - now_epoch).max(1))
            .unwrap_or(1);
        return Err(retry_after);
    }

    bucket.push_back(now_epoch);
    Ok(())
}

/// `ip:<addr>` derived from `X-Forwarded-For`/`X-Real-Ip`, falling back to
/// a constant bucket so throttling still degrades gracefully with no
/// proxy in front of the gateway.
#[must_use]
pub fn request_identity_key(headers: &HeaderMap) -> String {
    if let Some(value) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        let first_ip = value.split(',').next().unwrap_or_default().trim();
        if !first_ip.is_empty() {
            return format!("ip:{first_ip}");
        }
    }

    if let Some(value) = headers.get("x-real-ip").and_then(|value| value.to_str().ok()) {
        let ip = value.trim();
        if !ip.is_empty() {
            return format!("ip:{ip}");
        }
    }

    "ip:unknown".to_string()
}
