use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as GovernorRateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// # Summary
/// 外部行情请求限流器 (令牌桶)。
///
/// # Invariants
/// - 克隆体共享同一个桶，多个 Provider 共用时总速率不超过配额。
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl RateLimiter {
    /// # Summary
    /// 按每分钟请求数与突发容量创建限流器。
    ///
    /// # Logic
    /// 1. 参数为 0 时按 1 处理。
    /// 2. `Quota::per_minute` 匀速补充令牌，`allow_burst` 决定桶容量。
    pub fn per_minute(requests_per_minute: u32, burst: u32) -> Self {
        let rate = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(rate).allow_burst(burst);
        Self {
            limiter: Arc::new(GovernorRateLimiter::direct(quota)),
        }
    }

    /// 不实际限流的实例，用于测试
    pub fn unlimited() -> Self {
        Self::per_minute(u32::MAX, u32::MAX)
    }

    /// 等待直到允许发出下一个请求
    pub async fn wait(&self) {
        while self.limiter.check().is_err() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// 当前是否可以立即发出请求 (会消耗一个令牌)
    pub fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_is_exhausted() {
        let limiter = RateLimiter::per_minute(60, 3);
        for _ in 0..3 {
            assert!(limiter.check());
        }
        assert!(!limiter.check());
    }

    #[tokio::test]
    async fn test_clones_share_bucket() {
        let a = RateLimiter::per_minute(60, 2);
        let b = a.clone();
        assert!(a.check());
        assert!(b.check());
        assert!(!a.check());
    }

    #[tokio::test]
    async fn test_wait_refills() {
        // 6000/min 即每 10ms 一个令牌
        let limiter = RateLimiter::per_minute(6_000, 1);
        assert!(limiter.check());
        let started = std::time::Instant::now();
        limiter.wait().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_zero_config_falls_back_to_one() {
        let limiter = RateLimiter::per_minute(0, 0);
        assert!(limiter.check());
        assert!(!limiter.check());
    }
}
