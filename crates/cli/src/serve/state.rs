//! Application state and rate limiting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use coa_approval::{
    Clock, HttpMailer, LogMailer, MailError, Mailer, Reconciler, SystemClock, TokenBroker,
};
use coa_storage::{
    CertificateStore, MemoryCertificateStore, MemoryTestRecordStore, MemoryTokenStore,
    TestRecordStore,
};
use tokio::sync::Mutex;

use crate::config::Config;

/// Trackers older than this many windows are dropped on the next prune.
const PRUNE_AFTER_WINDOWS: u32 = 2;

/// Tracker map size that triggers a prune.
const PRUNE_THRESHOLD: usize = 1024;

/// Request count and window start for one client.
type IpTracker = HashMap<IpAddr, (u64, Instant)>;

/// In-memory fixed-window per-IP rate limiter. Zero disables it.
pub(crate) struct RateLimiter {
    tracker: Mutex<IpTracker>,
    max_requests: u64,
    window: Duration,
}

impl RateLimiter {
    pub(crate) fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            tracker: Mutex::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    /// Ok(()) if allowed, Err(retry_after_secs) if limited.
    pub(crate) async fn check(&self, ip: IpAddr) -> Result<(), u64> {
        if self.max_requests == 0 {
            return Ok(());
        }
        let mut tracker = self.tracker.lock().await;
        let now = Instant::now();

        if tracker.len() >= PRUNE_THRESHOLD {
            let stale = self.window * PRUNE_AFTER_WINDOWS;
            tracker.retain(|_, (_, started)| now.duration_since(*started) < stale);
        }

        let entry = tracker.entry(ip).or_insert((0, now));
        let elapsed = now.duration_since(entry.1);
        if elapsed >= self.window {
            *entry = (0, now);
        }

        entry.0 += 1;
        if entry.0 > self.max_requests {
            let retry_after = self.window.saturating_sub(now.duration_since(entry.1));
            Err(retry_after.as_secs().max(1))
        } else {
            Ok(())
        }
    }
}

/// Application state shared across request handlers.
pub(crate) struct AppState {
    pub(crate) broker: Arc<TokenBroker>,
    pub(crate) reconciler: Reconciler,
    pub(crate) certificates: Arc<dyn CertificateStore>,
    pub(crate) records: Arc<dyn TestRecordStore>,
    /// Serializes read-modify-write cycles on test records.
    pub(crate) record_writes: Mutex<()>,
    pub(crate) mailer: Arc<dyn Mailer>,
    pub(crate) clock: Arc<dyn Clock>,
    /// Public base for emailed links.
    pub(crate) base_url: String,
    /// Base the preview route redirects to.
    pub(crate) preview_base_url: String,
    pub(crate) approver_email: Option<String>,
    pub(crate) rate_limiter: RateLimiter,
    /// None = no auth required.
    pub(crate) api_key: Option<String>,
}

impl AppState {
    /// Wire in-memory stores, the system clock and the configured mailer.
    pub(crate) fn in_memory(config: &Config) -> Result<Self, MailError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let certificates: Arc<dyn CertificateStore> = Arc::new(MemoryCertificateStore::new());
        let broker = Arc::new(TokenBroker::new(
            Arc::new(MemoryTokenStore::new()),
            clock.clone(),
            time::Duration::hours(config.approval.token_ttl_hours),
        ));
        let reconciler = Reconciler::new(broker.clone(), certificates.clone());

        let mailer: Arc<dyn Mailer> = match &config.mail.relay_url {
            Some(relay) => Arc::new(HttpMailer::new(
                relay.clone(),
                config.mail.api_key.clone(),
                config.mail.from.clone(),
            )?),
            None => Arc::new(LogMailer::new()),
        };

        Ok(AppState {
            broker,
            reconciler,
            certificates,
            records: Arc::new(MemoryTestRecordStore::new()),
            record_writes: Mutex::new(()),
            mailer,
            clock,
            base_url: config.base_url(),
            preview_base_url: config.preview_base_url(),
            approver_email: config.approval.approver_email.clone(),
            rate_limiter: RateLimiter::new(config.server.rate_limit, Duration::from_secs(60)),
            api_key: config.api_key().map(str::to_string),
        })
    }
}
