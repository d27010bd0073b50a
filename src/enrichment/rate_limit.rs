use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Sliding-window request budget: at most `limit` grants in any `window`.
///
/// `acquire` never fails; once the budget is spent it suspends the caller
/// until the oldest grant leaves the window.
#[derive(Debug)]
pub struct RequestBudget {
    limit: usize,
    window: Duration,
    granted: Mutex<VecDeque<Instant>>,
}

impl RequestBudget {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            granted: Mutex::new(VecDeque::with_capacity(limit.max(1))),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn acquire(&self) {
        // Held across the sleep so waiters are served in arrival order.
        let mut granted = self.granted.lock().await;
        loop {
            let now = Instant::now();
            while granted
                .front()
                .is_some_and(|t| now.duration_since(*t) >= self.window)
            {
                granted.pop_front();
            }
            if granted.len() < self.limit {
                granted.push_back(now);
                return;
            }
            let Some(oldest) = granted.front().copied() else {
                continue;
            };
            let resume_at = oldest + self.window;
            debug!(
                wait_ms = resume_at.duration_since(now).as_millis() as u64,
                "request budget exhausted; waiting for window"
            );
            sleep_until(resume_at).await;
        }
    }

    /// Grants currently counted against the window.
    pub async fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.granted
            .lock()
            .await
            .iter()
            .filter(|t| now.duration_since(**t) < self.window)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn forty_first_request_waits_for_the_window() {
        let budget = RequestBudget::new(40, Duration::from_secs(10));
        let start = Instant::now();
        for _ in 0..40 {
            budget.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(budget.in_flight().await, 40);

        budget.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides_with_the_oldest_grant() {
        let budget = RequestBudget::new(2, Duration::from_secs(10));
        let start = Instant::now();
        budget.acquire().await;
        tokio::time::sleep(Duration::from_secs(4)).await;
        budget.acquire().await;

        // Third grant waits only until the first one ages out.
        budget.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(10));

        // Fourth waits for the second (granted at t=4).
        budget.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(14));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_budget() {
        let budget = std::sync::Arc::new(RequestBudget::new(3, Duration::from_secs(1)));
        let start = Instant::now();
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let b = budget.clone();
                tokio::spawn(async move {
                    b.acquire().await;
                    Instant::now()
                })
            })
            .collect();
        let mut done = Vec::new();
        for h in handles {
            done.push(h.await.unwrap().duration_since(start));
        }
        done.sort();
        assert_eq!(done[..3], [Duration::ZERO; 3]);
        assert_eq!(done[3..], [Duration::from_secs(1); 3]);
    }
}
