//! Login rate limiting.
//!
//! Each client IP gets a bucket of tokens that refills over the configured
//! window, so bursts of password guesses are cut off while a staff member
//! retyping a password is not.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;
use crate::AppState;

use super::error::ApiError;

#[derive(Debug, Clone)]
struct RateLimitEntry {
    tokens: u32,
    window_start: Instant,
    last_request: Instant,
}

impl RateLimitEntry {
    fn new(max_tokens: u32) -> Self {
        let now = Instant::now();
        Self {
            tokens: max_tokens,
            window_start: now,
            last_request: now,
        }
    }
}

/// Thread-safe rate limiter using dashmap
#[derive(Debug)]
pub struct RateLimiter {
    entries: DashMap<IpAddr, RateLimitEntry>,
    config: RateLimitConfig,
    window_duration: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            entries: DashMap::new(),
            window_duration: Duration::from_secs(config.window_seconds.max(1)),
            config,
        }
    }

    /// Consume a token for `ip`.
    /// Returns Ok(remaining_tokens) if allowed, Err(retry_after_seconds) if limited.
    pub fn check(&self, ip: IpAddr) -> Result<u32, u64> {
        if !self.config.enabled {
            return Ok(u32::MAX);
        }

        let max_tokens = self.config.login_requests_per_window;
        let now = Instant::now();

        let mut entry = self
            .entries
            .entry(ip)
            .or_insert_with(|| RateLimitEntry::new(max_tokens));

        let elapsed = now.duration_since(entry.window_start);
        if elapsed >= self.window_duration {
            entry.tokens = max_tokens;
            entry.window_start = now;
        } else {
            // Replenish gradually based on time since the last request
            let since_last = now.duration_since(entry.last_request);
            let replenish_rate = max_tokens as f64 / self.window_duration.as_secs_f64();
            let replenished = (since_last.as_secs_f64() * replenish_rate) as u32;
            entry.tokens = entry.tokens.saturating_add(replenished).min(max_tokens);
        }

        entry.last_request = now;

        if entry.tokens > 0 {
            entry.tokens -= 1;
            Ok(entry.tokens)
        } else {
            let elapsed = now.duration_since(entry.window_start);
            Err(self.window_duration.saturating_sub(elapsed).as_secs().max(1))
        }
    }

    /// Drop entries whose window is long gone
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let expiry = self.window_duration * 2;
        self.entries
            .retain(|_, entry| now.duration_since(entry.window_start) < expiry);
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Client IP from proxy headers, falling back to loopback
pub fn client_ip(headers: &axum::http::HeaderMap) -> IpAddr {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(ip) = forwarded
            .split(',')
            .next()
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
        {
            return ip;
        }
    }

    if let Some(ip) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
    {
        return ip;
    }

    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Rate limiting middleware for the login endpoint
pub async fn rate_limit_login(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(request.headers());

    match state.rate_limiter.check(ip) {
        Ok(_) => next.run(request).await,
        Err(retry_after) => {
            tracing::warn!(ip = %ip, retry_after, "Login rate limit exceeded");
            let mut response = ApiError::rate_limited(format!(
                "Too many login attempts. Try again in {} seconds.",
                retry_after
            ))
            .into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
            response
        }
    }
}

/// Spawn a task that periodically forgets idle clients
pub fn spawn_cleanup_task(limiter: Arc<RateLimiter>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(300));
        loop {
            tick.tick().await;
            limiter.cleanup_expired();
            tracing::trace!(entries = limiter.entry_count(), "Rate limiter cleanup");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    fn config(requests: u32) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            window_seconds: 60,
            login_requests_per_window: requests,
        }
    }

    #[test]
    fn test_limits_per_ip() {
        let limiter = RateLimiter::new(config(3));
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert_eq!(limiter.check(a), Ok(2));
        assert_eq!(limiter.check(a), Ok(1));
        assert_eq!(limiter.check(a), Ok(0));
        assert!(limiter.check(a).is_err());

        assert!(limiter.check(b).is_ok());
        assert_eq!(limiter.entry_count(), 2);
    }

    #[test]
    fn test_disabled_never_limits() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            ..config(1)
        });
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        for _ in 0..10 {
            assert!(limiter.check(ip).is_ok());
        }
    }

    #[test]
    fn test_client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), IpAddr::V4(Ipv4Addr::LOCALHOST));

        headers.insert("x-real-ip", "192.168.1.9".parse().unwrap());
        assert_eq!(client_ip(&headers).to_string(), "192.168.1.9");

        headers.insert("x-forwarded-for", "203.0.113.4, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers).to_string(), "203.0.113.4");
    }
}
