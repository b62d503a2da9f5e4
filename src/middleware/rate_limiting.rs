use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, error, warn};
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::api_contract::ErrorCode;
use crate::config::settings::{RateLimitConfig, TierLimit};
use crate::middleware::rate_limit_storage::{CounterSpec, CounterStore};
use crate::models::Principal;

/// One independent quota dimension. Declaration order is the tie-break order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    User,
    ApiKey,
    Origin,
    Burst,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::User => "user",
            Tier::ApiKey => "api_key",
            Tier::Origin => "origin",
            Tier::Burst => "burst",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one tier after this request's increment.
#[derive(Debug, Clone, PartialEq)]
pub struct TierStatus {
    pub tier: Tier,
    pub limit: u64,
    pub count: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

impl TierStatus {
    pub fn is_exceeded(&self) -> bool {
        self.count > self.limit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    LimitExceeded,
    Blocked,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub reason: RejectionReason,
    pub tier: Option<Tier>,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

impl Rejection {
    pub fn error_code(&self) -> ErrorCode {
        match self.reason {
            RejectionReason::LimitExceeded => ErrorCode::RateLimitExceeded,
            RejectionReason::Blocked => ErrorCode::TemporarilyBlocked,
            RejectionReason::Unavailable => ErrorCode::RateLimiterUnavailable,
        }
    }

    pub fn message(&self) -> String {
        match (self.reason, self.tier) {
            (RejectionReason::LimitExceeded, Some(tier)) => format!("Rate limit exceeded for {} tier", tier),
            (RejectionReason::LimitExceeded, None) => "Rate limit exceeded".to_string(),
            (RejectionReason::Blocked, _) => "Temporarily blocked after repeated rate limit violations".to_string(),
            (RejectionReason::Unavailable, _) => "Rate limiting is temporarily unavailable".to_string(),
        }
    }

    /// Envelope `details`: `resetAt` (ISO-8601), `remaining`, and the tier when known.
    pub fn details(&self) -> Value {
        let mut details = json!({
            "resetAt": self.reset_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "remaining": self.remaining,
        });
        if let Some(tier) = self.tier {
            details["tier"] = json!(tier.as_str());
        }
        details
    }

    /// Whole seconds until the reset, rounded up.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionDecision {
    /// Carries the tightest tier, used for the `X-RateLimit-*` headers.
    Admitted(TierStatus),
    Rejected(Rejection),
}

struct PlannedTier {
    tier: Tier,
    subject: String,
    limit: TierLimit,
}

/// Layered admission control over a shared counter store.
///
/// Every applicable tier is incremented in one store round trip. A request
/// over any limit is rejected and the increment stays: rejected attempts cost
/// quota too. Store failures reject with [`RejectionReason::Unavailable`].
pub struct AdmissionController {
    store: Arc<dyn CounterStore>,
    config: RateLimitConfig,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    fn counter_key(&self, tier: Tier, subject: &str) -> String {
        format!("cn_gateway:{}:rl:{}:{}", self.config.key_prefix, tier.as_str(), subject)
    }

    fn block_key(&self, tier: Tier, subject: &str) -> String {
        format!("cn_gateway:{}:rl:block:{}:{}", self.config.key_prefix, tier.as_str(), subject)
    }

    fn plan(&self, principal: &Principal, client_ip: &str) -> Vec<PlannedTier> {
        let mut tiers = vec![PlannedTier {
            tier: Tier::User,
            subject: principal.user_id.to_string(),
            limit: self.config.per_user,
        }];

        if let Some(api_key) = &principal.api_key {
            tiers.push(PlannedTier {
                tier: Tier::ApiKey,
                subject: api_key.api_key_id.to_string(),
                limit: TierLimit {
                    max_requests: api_key.rate_limit.unwrap_or(self.config.per_api_key.max_requests),
                    window_secs: self.config.per_api_key.window_secs,
                },
            });
        }

        tiers.push(PlannedTier {
            tier: Tier::Origin,
            subject: client_ip.to_string(),
            limit: self.config.per_origin,
        });

        let burst_subject = match principal.api_key_id() {
            Some(id) => format!("key:{}", id),
            None => format!("user:{}", principal.user_id),
        };
        tiers.push(PlannedTier {
            tier: Tier::Burst,
            subject: burst_subject,
            limit: self.config.burst,
        });

        tiers
    }

    pub async fn check(&self, principal: &Principal, client_ip: &str) -> AdmissionDecision {
        let plan = self.plan(principal, client_ip);
        let counters: Vec<CounterSpec> = plan
            .iter()
            .map(|p| CounterSpec {
                key: self.counter_key(p.tier, &p.subject),
                window: Duration::from_secs(p.limit.window_secs),
            })
            .collect();
        let block_keys: Vec<String> = if self.config.violation_block_secs > 0 {
            plan.iter().map(|p| self.block_key(p.tier, &p.subject)).collect()
        } else {
            Vec::new()
        };

        let outcome = match self.store.increment(&counters, &block_keys).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    "Rate limit store failed for user {}: {}. Denying request (fail closed).",
                    principal.user_id, e
                );
                return AdmissionDecision::Rejected(self.unavailable(&plan));
            }
        };

        let now = Utc::now();
        let statuses: Vec<TierStatus> = plan
            .iter()
            .zip(outcome.counters.iter())
            .map(|(p, reading)| TierStatus {
                tier: p.tier,
                limit: p.limit.max_requests,
                count: reading.count,
                remaining: p.limit.max_requests.saturating_sub(reading.count),
                reset_at: now + chrono::Duration::milliseconds(reading.ttl.as_millis() as i64),
            })
            .collect();

        let blocked = plan
            .iter()
            .zip(outcome.blocks.iter())
            .filter_map(|(p, ttl)| ttl.map(|ttl| (p.tier, ttl)))
            .max_by_key(|(_, ttl)| *ttl);
        if let Some((tier, ttl)) = blocked {
            debug!("Subject for {} tier is blocked for {:?}", tier, ttl);
            let limit = statuses.iter().find(|s| s.tier == tier).map(|s| s.limit).unwrap_or(0);
            return AdmissionDecision::Rejected(Rejection {
                reason: RejectionReason::Blocked,
                tier: Some(tier),
                limit,
                remaining: 0,
                reset_at: now + chrono::Duration::milliseconds(ttl.as_millis() as i64),
            });
        }

        let violated: Vec<&TierStatus> = statuses.iter().filter(|s| s.is_exceeded()).collect();
        if let Some(worst) = most_restrictive_violation(&violated) {
            warn!(
                "Rate limit exceeded for user {} on {} tier ({}/{})",
                principal.user_id, worst.tier, worst.count, worst.limit
            );
            self.apply_violation_blocks(&plan, &violated).await;
            return AdmissionDecision::Rejected(Rejection {
                reason: RejectionReason::LimitExceeded,
                tier: Some(worst.tier),
                limit: worst.limit,
                remaining: 0,
                reset_at: worst.reset_at,
            });
        }

        match tightest_tier(&statuses) {
            Some(status) => AdmissionDecision::Admitted(status.clone()),
            // The user tier always applies, so this only guards a short store reply.
            None => AdmissionDecision::Rejected(self.unavailable(&plan)),
        }
    }

    async fn apply_violation_blocks(&self, plan: &[PlannedTier], violated: &[&TierStatus]) {
        if self.config.violation_block_secs == 0 {
            return;
        }
        let duration = Duration::from_secs(self.config.violation_block_secs);
        for status in violated {
            if let Some(p) = plan.iter().find(|p| p.tier == status.tier) {
                if let Err(e) = self.store.block(&self.block_key(p.tier, &p.subject), duration).await {
                    warn!("Failed to block subject on {} tier: {}", p.tier, e);
                }
            }
        }
    }

    fn unavailable(&self, plan: &[PlannedTier]) -> Rejection {
        let window = plan.iter().map(|p| p.limit.window_secs).min().unwrap_or(60);
        Rejection {
            reason: RejectionReason::Unavailable,
            tier: None,
            limit: 0,
            remaining: 0,
            reset_at: Utc::now() + chrono::Duration::seconds(window as i64),
        }
    }
}

/// Soonest reset, then smallest remaining, then tier order.
fn most_restrictive_violation<'a>(violated: &[&'a TierStatus]) -> Option<&'a TierStatus> {
    violated
        .iter()
        .copied()
        .min_by(|a, b| {
            a.reset_at
                .cmp(&b.reset_at)
                .then(a.remaining.cmp(&b.remaining))
                .then(a.tier.cmp(&b.tier))
        })
}

/// Smallest remaining, then soonest reset, then tier order.
fn tightest_tier(statuses: &[TierStatus]) -> Option<&TierStatus> {
    statuses.iter().min_by(|a, b| {
        a.remaining
            .cmp(&b.remaining)
            .then(a.reset_at.cmp(&b.reset_at))
            .then(a.tier.cmp(&b.tier))
    })
}
