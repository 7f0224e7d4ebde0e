//! Admission control.
//!
//! Two gates per owner, checked in order: a rate limiter over a sliding
//! window, then a cap on concurrently running jobs. Check-then-act is
//! atomic per owner — the owner map lock is held across both gates so two
//! concurrent requests from the same user cannot both observe capacity.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use batchclip_models::OwnerId;

use crate::config::PipelineConfig;
use crate::error::AdmissionRejected;

/// Per-owner rate limiter.
type OwnerRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Maximum owners tracked before stale entries are cleaned up. Bounds
/// memory growth from many distinct identities.
const MAX_TRACKED_OWNERS: usize = 10_000;

/// Idle owners older than this are dropped during cleanup.
const OWNER_TTL: Duration = Duration::from_secs(3600);

/// Per-owner admission limits.
///
/// Resolved through the policy function, so capability tiers (the
/// premium/free distinction of the original service) become data instead
/// of hard-coded identity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerLimits {
    /// Maximum concurrently running jobs
    pub max_active_jobs: u32,
    /// Maximum admitted requests per rate window
    pub max_requests: u32,
}

/// Policy function mapping an owner to their limits.
pub type AdmissionPolicy = Arc<dyn Fn(&OwnerId) -> OwnerLimits + Send + Sync>;

struct OwnerState {
    limiter: Arc<OwnerRateLimiter>,
    active: u32,
    last_seen: Instant,
}

/// Per-user rate/concurrency limiter gating new jobs.
pub struct AdmissionController {
    owners: Mutex<HashMap<OwnerId, OwnerState>>,
    window: Duration,
    policy: AdmissionPolicy,
}

impl AdmissionController {
    /// Create a controller with limits taken from the config for every owner.
    pub fn new(config: &PipelineConfig) -> Self {
        let defaults = OwnerLimits {
            max_active_jobs: config.max_active_jobs,
            max_requests: config.rate_limit_max_requests,
        };
        Self::with_policy(config.rate_limit_window, Arc::new(move |_| defaults))
    }

    /// Create a controller with a custom per-owner policy.
    pub fn with_policy(window: Duration, policy: AdmissionPolicy) -> Self {
        Self {
            owners: Mutex::new(HashMap::new()),
            window,
            policy,
        }
    }

    /// Try to admit a request from `owner`.
    ///
    /// On success both the request window and the active-job counter have
    /// been consumed; the caller must pair it with exactly one
    /// [`release`](Self::release) when the job terminates, or capacity
    /// leaks permanently for that owner.
    pub async fn try_admit(&self, owner: &OwnerId) -> Result<(), AdmissionRejected> {
        let limits = (self.policy)(owner);

        let mut owners = self.owners.lock().await;
        if owners.len() >= MAX_TRACKED_OWNERS && !owners.contains_key(owner) {
            cleanup_stale(&mut owners);
        }

        let state = owners.entry(owner.clone()).or_insert_with(|| OwnerState {
            limiter: Arc::new(RateLimiter::direct(request_quota(
                self.window,
                limits.max_requests,
            ))),
            active: 0,
            last_seen: Instant::now(),
        });
        state.last_seen = Instant::now();

        if state.limiter.check().is_err() {
            debug!(owner = %owner, "Admission rejected: rate limited");
            return Err(AdmissionRejected::RateLimited {
                max_requests: limits.max_requests,
            });
        }

        if state.active >= limits.max_active_jobs {
            debug!(
                owner = %owner,
                active = state.active,
                "Admission rejected: too many active jobs"
            );
            return Err(AdmissionRejected::TooManyActiveJobs {
                active: state.active,
                limit: limits.max_active_jobs,
            });
        }

        state.active += 1;
        Ok(())
    }

    /// Release one admission slot for `owner`.
    pub async fn release(&self, owner: &OwnerId) {
        let mut owners = self.owners.lock().await;
        if let Some(state) = owners.get_mut(owner) {
            state.active = state.active.saturating_sub(1);
            state.last_seen = Instant::now();
        }
    }

    /// Current active-job count for `owner`.
    pub async fn active_jobs(&self, owner: &OwnerId) -> u32 {
        self.owners
            .lock()
            .await
            .get(owner)
            .map(|s| s.active)
            .unwrap_or(0)
    }
}

/// Drop idle owners. Owners with running jobs are always retained.
fn cleanup_stale(owners: &mut HashMap<OwnerId, OwnerState>) {
    let before = owners.len();
    let now = Instant::now();
    owners.retain(|_, state| state.active > 0 || now.duration_since(state.last_seen) < OWNER_TTL);
    let removed = before - owners.len();
    if removed > 0 {
        warn!(removed, "Admission owner map at capacity, dropped stale entries");
    }
}

/// Quota approximating "at most `max_requests` per `window`": full burst
/// capacity, replenished one cell per `window / max_requests`.
fn request_quota(window: Duration, max_requests: u32) -> Quota {
    let burst = NonZeroU32::new(max_requests.max(1)).unwrap_or(NonZeroU32::MIN);
    let period = window
        .checked_div(burst.get())
        .filter(|p| !p.is_zero())
        .unwrap_or(Duration::from_millis(1));

    match Quota::with_period(period) {
        Some(quota) => quota.allow_burst(burst),
        None => Quota::per_second(burst),
    }
}
