//! Per-ad timing decisions. Pure and stateless.

use std::time::Duration;

use crate::Ad;

pub const MIN_DURATION: Duration = Duration::from_secs(5);
pub const MAX_DURATION: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    default_duration: Duration,
    transition_delay: Duration,
    min_duration: Duration,
    max_duration: Duration,
}

impl Scheduler {
    pub fn new(default_duration_secs: u64, transition_delay_secs: u64) -> Self {
        Self {
            default_duration: Duration::from_secs(default_duration_secs),
            transition_delay: Duration::from_secs(transition_delay_secs),
            min_duration: MIN_DURATION,
            max_duration: MAX_DURATION,
        }
    }

    /// The ad's own duration when positive, else the default, clamped into
    /// `[min, max]`.
    pub fn duration_for(&self, ad: &Ad) -> Duration {
        let duration = match ad.duration {
            Some(secs) if secs > 0 => Duration::from_secs(u64::from(secs)),
            _ => self.default_duration,
        };
        duration.clamp(self.min_duration, self.max_duration)
    }

    /// Whether an ad that has been on screen for `elapsed` should yield.
    pub fn should_transition(&self, ad: &Ad, elapsed: Duration) -> bool {
        elapsed >= self.duration_for(ad)
    }

    /// Pause between back-to-back ads.
    pub fn transition_delay(&self) -> Duration {
        self.transition_delay
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(30, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ad_with_duration(duration: Option<u32>) -> Ad {
        Ad {
            id: "ad-1".into(),
            title: None,
            kind: "image".into(),
            content_url: "http://cdn/x.jpg".into(),
            duration,
            start_time: None,
            end_time: None,
            priority: None,
            metadata: None,
        }
    }

    #[test]
    fn missing_duration_uses_default() {
        let scheduler = Scheduler::default();
        assert_eq!(
            scheduler.duration_for(&ad_with_duration(None)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn zero_duration_uses_default() {
        let scheduler = Scheduler::default();
        assert_eq!(
            scheduler.duration_for(&ad_with_duration(Some(0))),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn short_duration_clamped_up() {
        let scheduler = Scheduler::default();
        assert_eq!(
            scheduler.duration_for(&ad_with_duration(Some(4))),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn long_duration_clamped_down() {
        let scheduler = Scheduler::default();
        assert_eq!(
            scheduler.duration_for(&ad_with_duration(Some(10_000))),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn in_range_duration_used_exactly() {
        let scheduler = Scheduler::default();
        assert_eq!(
            scheduler.duration_for(&ad_with_duration(Some(10))),
            Duration::from_secs(10)
        );
        assert_eq!(
            scheduler.duration_for(&ad_with_duration(Some(5))),
            Duration::from_secs(5)
        );
        assert_eq!(
            scheduler.duration_for(&ad_with_duration(Some(300))),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn transition_fires_exactly_at_duration() {
        let scheduler = Scheduler::default();
        let ad = ad_with_duration(Some(10));
        assert!(!scheduler.should_transition(&ad, Duration::from_secs(9)));
        assert!(scheduler.should_transition(&ad, Duration::from_secs(10)));
        assert!(scheduler.should_transition(&ad, Duration::from_secs(11)));
    }
}
