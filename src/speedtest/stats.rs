use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch. Only differences between two calls in the
/// same process are meaningful.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Arithmetic mean. Undefined for zero samples: returns `NaN`.
pub fn average(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// RFC 1889 interarrival jitter estimate, `J = J + (|D(i-1,i)| - J) / 16`,
/// over consecutive samples in arrival order.
pub fn jitter(values: &[f64]) -> f64 {
    values
        .windows(2)
        .fold(0.0, |j, pair| j + ((pair[1] - pair[0]).abs() - j) / 16.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_of_nothing_is_nan() {
        assert!(average(&[]).is_nan());
    }

    #[test]
    fn average_of_one_sample() {
        assert_eq!(average(&[42.5]), 42.5);
        assert_eq!(average(&[10.0, 20.0, 30.0]), 20.0);
    }

    #[test]
    fn jitter_needs_two_samples() {
        assert_eq!(jitter(&[]), 0.0);
        assert_eq!(jitter(&[17.0]), 0.0);
    }

    #[test]
    fn jitter_is_zero_for_constant_latency() {
        assert_eq!(jitter(&[20.0; 8]), 0.0);
    }

    #[test]
    fn jitter_smooths_each_difference() {
        // 0 + (16 - 0) / 16 = 1, then 1 + (0 - 1) / 16
        let j = jitter(&[10.0, 26.0, 26.0]);
        assert!((j - (1.0 - 1.0 / 16.0)).abs() < 1e-12);
    }

    #[test]
    fn jitter_depends_on_arrival_order() {
        let arrival = [10.0, 30.0, 10.0, 30.0];
        let sorted = [10.0, 10.0, 30.0, 30.0];
        assert_ne!(jitter(&arrival), jitter(&sorted));
        assert_eq!(jitter(&arrival), jitter(&arrival));
    }

    #[test]
    fn timestamps_move_forward() {
        let a = now_millis();
        let b = now_millis();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000);
    }
}
