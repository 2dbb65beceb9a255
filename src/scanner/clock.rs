use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Interval, MissedTickBehavior, interval};

use super::FrameClock;

/// 以固定刷新率模拟显示帧回调；处理不过来的帧直接跳过
pub struct IntervalFrameClock {
    period: Duration,
    interval: Option<Interval>,
}

impl IntervalFrameClock {
    pub fn new(rate_hz: u32) -> Self {
        Self {
            period: Duration::from_secs_f64(1.0 / f64::from(rate_hz.max(1))),
            interval: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

#[async_trait]
impl FrameClock for IntervalFrameClock {
    async fn next_frame(&mut self) {
        // Interval 必须在运行时内创建，首次取帧时再初始化
        let period = self.period;
        let ticker = self.interval.get_or_insert_with(|| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        ticker.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_from_rate() {
        assert_eq!(IntervalFrameClock::new(50).period(), Duration::from_millis(20));
        assert_eq!(IntervalFrameClock::new(0).period(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_follow_rate() {
        let mut clock = IntervalFrameClock::new(10);
        let start = tokio::time::Instant::now();
        for _ in 0..4 {
            clock.next_frame().await;
        }
        // 首帧立即触发，之后每 100ms 一帧
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }
}
