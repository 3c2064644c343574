//! Rate & quota limiter (`spec.md` §4.8, C8): a sliding-window counter keyed by
//! `(namespace, client_ip, session_id)`, backed by Redis when configured and an in-process
//! fallback otherwise.
//!
//! The Redis path issues `ZREMRANGEBYSCORE + ZCARD + ZADD + EXPIRE` as one pipeline so the
//! window check stays atomic under concurrent callers; the fallback uses a `parking_lot`-guarded
//! `BTreeMap<key, VecDeque<Instant>>`, mirroring the teacher's "global mutable state behind an
//! interface" shared-map idiom (`src/error_handler/mod.rs`).

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct QuotaSpec {
    pub window: Duration,
    pub max_requests: u32,
}

/// The two named quotas `spec.md` §4.8 requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quota {
    Chat,
    ContactLead,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub chat: QuotaSpec,
    pub contact_lead: QuotaSpec,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            chat: QuotaSpec {
                window: Duration::from_secs(60),
                max_requests: 30,
            },
            contact_lead: QuotaSpec {
                window: Duration::from_secs(3600),
                max_requests: 5,
            },
        }
    }
}

impl RateLimitConfig {
    fn spec(&self, quota: Quota) -> QuotaSpec {
        match quota {
            Quota::Chat => self.chat,
            Quota::ContactLead => self.contact_lead,
        }
    }
}

/// In-process sliding-window fallback, used when no Redis URL is configured.
struct LocalWindow {
    hits: Mutex<BTreeMap<String, VecDeque<Instant>>>,
}

impl LocalWindow {
    fn new() -> Self {
        Self {
            hits: Mutex::new(BTreeMap::new()),
        }
    }

    fn check(&self, key: &str, spec: QuotaSpec) -> bool {
        let now = Instant::now();
        let mut guard = self.hits.lock();
        let entry = guard.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) > spec.window {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() as u32 >= spec.max_requests {
            return false;
        }
        entry.push_back(now);
        true
    }
}

enum Backend {
    Redis(redis::aio::ConnectionManager),
    Local(LocalWindow),
}

pub struct RateLimiter {
    backend: Backend,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn with_redis(conn: redis::aio::ConnectionManager, config: RateLimitConfig) -> Self {
        Self {
            backend: Backend::Redis(conn),
            config,
        }
    }

    pub fn local(config: RateLimitConfig) -> Self {
        Self {
            backend: Backend::Local(LocalWindow::new()),
            config,
        }
    }

    fn key(namespace: &str, client_ip: &str, session_id: &str) -> String {
        format!("ratelimit:{namespace}:{client_ip}:{session_id}")
    }

    /// Returns `true` when the caller is within quota (and the hit is recorded), `false` when
    /// the request should be rejected.
    pub async fn check(
        &self,
        quota: Quota,
        client_ip: &str,
        session_id: &str,
    ) -> Result<bool, crate::error::PipelineError> {
        let spec = self.config.spec(quota);
        let namespace = match quota {
            Quota::Chat => "chat",
            Quota::ContactLead => "contact_lead",
        };
        let key = Self::key(namespace, client_ip, session_id);

        match &self.backend {
            Backend::Local(window) => Ok(window.check(&key, spec)),
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let now_ms = chrono::Utc::now().timestamp_millis();
                let window_start = now_ms - spec.window.as_millis() as i64;
                let member = format!("{now_ms}-{}", uuid::Uuid::new_v4());

                let mut pipe = redis::pipe();
                pipe.atomic()
                    .cmd("ZREMRANGEBYSCORE")
                    .arg(&key)
                    .arg(0)
                    .arg(window_start)
                    .ignore()
                    .cmd("ZCARD")
                    .arg(&key)
                    .cmd("ZADD")
                    .arg(&key)
                    .arg(now_ms)
                    .arg(&member)
                    .ignore()
                    .cmd("EXPIRE")
                    .arg(&key)
                    .arg(spec.window.as_secs())
                    .ignore();

                let (count,): (i64,) = pipe.query_async(&mut conn).await.map_err(|e| {
                    crate::error::PipelineError::StoreTransient {
                        store: "ratelimit",
                        message: e.to_string(),
                    }
                })?;

                Ok((count as u32) < spec.max_requests)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_fallback_allows_within_quota_and_blocks_over() {
        let config = RateLimitConfig {
            chat: QuotaSpec {
                window: Duration::from_secs(60),
                max_requests: 2,
            },
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::local(config);
        assert!(limiter.check(Quota::Chat, "1.2.3.4", "s1").await.unwrap());
        assert!(limiter.check(Quota::Chat, "1.2.3.4", "s1").await.unwrap());
        assert!(!limiter.check(Quota::Chat, "1.2.3.4", "s1").await.unwrap());
    }

    #[tokio::test]
    async fn local_fallback_scopes_by_session() {
        let config = RateLimitConfig {
            chat: QuotaSpec {
                window: Duration::from_secs(60),
                max_requests: 1,
            },
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::local(config);
        assert!(limiter.check(Quota::Chat, "1.2.3.4", "s1").await.unwrap());
        assert!(limiter.check(Quota::Chat, "1.2.3.4", "s2").await.unwrap());
    }
}
