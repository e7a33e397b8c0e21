//! Re-check delays while a tick run is overrunning

use std::time::Duration;

/// Geometric backoff that holds at the last delay below `cap`.
///
/// Yields `initial`, `initial * factor`, ... and, once the next step would
/// exceed `cap`, keeps yielding the last value that did not. Never ends.
#[derive(Debug, Clone)]
pub struct OverrunBackoff {
    next: Duration,
    factor: f64,
    cap: Duration,
}

impl OverrunBackoff {
    pub fn new(initial: Duration, factor: f64, cap: Duration) -> Self {
        let factor = if factor.is_finite() && factor >= 1.0 {
            factor
        } else {
            1.0
        };
        Self {
            next: initial.min(cap),
            factor,
            cap,
        }
    }
}

impl Iterator for OverrunBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        let grown = Duration::try_from_secs_f64(current.as_secs_f64() * self.factor)
            .unwrap_or(Duration::MAX);
        if grown <= self.cap {
            self.next = grown;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard() -> OverrunBackoff {
        OverrunBackoff::new(Duration::from_secs(1), 1.1, Duration::from_secs(60))
    }

    #[test]
    fn grows_by_factor() {
        let delays: Vec<u128> = standard().take(3).map(|d| d.as_millis()).collect();
        assert_eq!(delays, vec![1000, 1100, 1210]);
    }

    #[test]
    fn non_decreasing_and_capped() {
        let delays: Vec<Duration> = standard().take(200).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(60)));

        // Holds at the last sub-cap value, not at the cap itself
        let last = *delays.last().unwrap();
        assert!(last > Duration::from_secs(54));
        assert!(last < Duration::from_secs(60));
        assert_eq!(delays[150], last);
    }

    #[test]
    fn initial_above_cap_is_clamped() {
        let mut backoff =
            OverrunBackoff::new(Duration::from_secs(90), 1.1, Duration::from_secs(60));
        assert_eq!(backoff.next(), Some(Duration::from_secs(60)));
        assert_eq!(backoff.next(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn bad_factor_means_constant_delay() {
        let delays: Vec<Duration> =
            OverrunBackoff::new(Duration::from_millis(5), 0.5, Duration::from_secs(1))
                .take(4)
                .collect();
        assert!(delays.iter().all(|d| *d == Duration::from_millis(5)));
    }
}
