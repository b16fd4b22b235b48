// middleware/rate_limit.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::{error::HttpError, middleware::main_middleware::JWTAuthMiddleware, service::error::ServiceError};

/// In-memory sliding window limiter, keyed by user id or client address.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    requests: Arc<Mutex<HashMap<String, Vec<Instant>>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            requests: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window,
        }
    }

    pub fn is_allowed(&self, key: &str) -> bool {
        // A poisoned lock only means another request panicked mid-update.
        let mut requests = self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();

        let entry = requests.entry(key.to_string()).or_default();
        entry.retain(|&timestamp| now.duration_since(timestamp) < self.window);

        if entry.len() < self.max_requests {
            entry.push(now);
            true
        } else {
            false
        }
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, HttpError> {
    let client_id = get_client_id(&request);

    if !limiter.is_allowed(&client_id) {
        tracing::warn!(client = %client_id, path = %request.uri().path(), "Rate limit exceeded");
        return Err(ServiceError::RateLimited.into());
    }

    Ok(next.run(request).await)
}

fn get_client_id(request: &Request) -> String {
    if let Some(auth) = request.extensions().get::<JWTAuthMiddleware>() {
        return format!("user:{}", auth.user.id);
    }

    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| format!("ip:{}", s.trim()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn payment_rate_limiter() -> RateLimiter {
    RateLimiter::new(10, Duration::from_secs(60)) // 10 payments per minute
}

pub fn webhook_rate_limiter() -> RateLimiter {
    RateLimiter::new(100, Duration::from_secs(60)) // 100 webhooks per minute
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_limit_within_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.is_allowed("user:a"));
        assert!(limiter.is_allowed("user:a"));
        assert!(!limiter.is_allowed("user:a"));
        assert!(limiter.is_allowed("user:b"));
    }

    #[test]
    fn window_expiry_frees_capacity() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        assert!(limiter.is_allowed("ip:1"));
        assert!(!limiter.is_allowed("ip:1"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.is_allowed("ip:1"));
    }
}
