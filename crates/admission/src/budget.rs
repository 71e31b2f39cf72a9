//! Execution Budget (SPEC_FULL.md §4.3): a concurrency cap plus a token-bucket
//! rate limiter, with an optional per-job cost deduction.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDenial {
    ConcurrencyLimit,
    RateLimit,
    BudgetExhausted,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutionBudgetConfig {
    pub max_concurrency: u32,
    pub max_rps: u32,
    /// Total cost units available across the budget's lifetime, if costed.
    pub cost_budget: Option<u64>,
}

struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate: u32) -> Self {
        let capacity = (rate.max(1)) as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Tracks live concurrency and request rate against configured maximums.
pub struct ExecutionBudget {
    max_concurrency: u32,
    active: AtomicU32,
    bucket: Mutex<TokenBucket>,
    cost_remaining: Option<AtomicU64>,
}

impl ExecutionBudget {
    pub fn new(config: ExecutionBudgetConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            active: AtomicU32::new(0),
            bucket: Mutex::new(TokenBucket::new(config.max_rps)),
            cost_remaining: config.cost_budget.map(AtomicU64::new),
        }
    }

    /// Attempts to reserve one concurrency slot, one rate-limit token, and
    /// (if costed) `cost` units. On denial nothing is reserved.
    pub async fn try_acquire(&self, cost: Option<u64>) -> Result<(), BudgetDenial> {
        loop {
            let current = self.active.load(Ordering::SeqCst);
            if current >= self.max_concurrency {
                return Err(BudgetDenial::ConcurrencyLimit);
            }
            if self
                .active
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }

        if !self.bucket.lock().await.try_take() {
            self.active.fetch_sub(1, Ordering::SeqCst);
            return Err(BudgetDenial::RateLimit);
        }

        if let (Some(remaining), Some(cost)) = (&self.cost_remaining, cost) {
            loop {
                let current = remaining.load(Ordering::SeqCst);
                if current < cost {
                    self.active.fetch_sub(1, Ordering::SeqCst);
                    return Err(BudgetDenial::BudgetExhausted);
                }
                if remaining
                    .compare_exchange(current, current - cost, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    break;
                }
            }
        }

        Ok(())
    }

    pub fn release(&self) {
        self.active.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
            Some(v.saturating_sub(1))
        })
        .ok();
    }

    pub fn active_count(&self) -> u32 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> u32 {
        self.max_concurrency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn denies_beyond_max_concurrency() {
        let budget = ExecutionBudget::new(ExecutionBudgetConfig {
            max_concurrency: 1,
            max_rps: 100,
            cost_budget: None,
        });
        budget.try_acquire(None).await.unwrap();
        assert_eq!(
            budget.try_acquire(None).await.unwrap_err(),
            BudgetDenial::ConcurrencyLimit
        );
        budget.release();
        budget.try_acquire(None).await.unwrap();
    }

    #[tokio::test]
    async fn denies_beyond_rate_limit() {
        let budget = ExecutionBudget::new(ExecutionBudgetConfig {
            max_concurrency: 100,
            max_rps: 1,
            cost_budget: None,
        });
        budget.try_acquire(None).await.unwrap();
        assert_eq!(
            budget.try_acquire(None).await.unwrap_err(),
            BudgetDenial::RateLimit
        );
    }

    #[tokio::test]
    async fn exhausts_cost_budget() {
        let budget = ExecutionBudget::new(ExecutionBudgetConfig {
            max_concurrency: 100,
            max_rps: 100,
            cost_budget: Some(5),
        });
        budget.try_acquire(Some(5)).await.unwrap();
        assert_eq!(
            budget.try_acquire(Some(1)).await.unwrap_err(),
            BudgetDenial::BudgetExhausted
        );
    }
}
