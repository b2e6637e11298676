use std::time::Duration;

use crate::util::random::Random;


/// How long a sender waits after a ping before sending the next one
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SendCadence {
    Fixed(Duration),
    /// uniformly distributed in `[0, max_interval)`, drawn independently for every ping
    Random { max_interval: Duration },
}

impl SendCadence {
    pub fn next_delay<R: Random>(&self) -> Duration {
        match *self {
            SendCadence::Fixed(interval) => interval,
            SendCadence::Random { max_interval } => {
                let max_nanos = u64::try_from(max_interval.as_nanos()).unwrap_or(u64::MAX);
                if max_nanos == 0 {
                    return Duration::ZERO;
                }
                Duration::from_nanos(R::gen_u64_range(0..max_nanos))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PingConfig {
    pub cadence: SendCadence,
    /// number of trailing node id characters used to identify sender and receiver in a ping
    pub token_len: usize,
    /// a received line longer than this is treated as a fatal read error
    pub max_line_len: usize,
}

impl PingConfig {
    pub fn new() -> PingConfig {
        PingConfig {
            cadence: SendCadence::Random { max_interval: Duration::from_secs(2) },
            token_len: 2,
            max_line_len: 1024,
        }
    }
}

impl Default for PingConfig {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use crate::util::random::{MockRandom, RngRandom, MOCK_RANDOM_MUTEX};
    use super::*;

    #[test]
    fn test_fixed_cadence() {
        let cadence = SendCadence::Fixed(Duration::from_millis(250));
        for _ in 0..10 {
            assert_eq!(cadence.next_delay::<RngRandom>(), Duration::from_millis(250));
        }
    }

    #[rstest]
    #[case::zero(0, Duration::ZERO)]
    #[case::some(1_500_000_000, Duration::from_millis(1500))]
    #[case::max_minus_one(1_999_999_999, Duration::from_nanos(1_999_999_999))]
    fn test_random_cadence_mocked(#[case] random_nanos: u64, #[case] expected: Duration) {
        let _lock = MOCK_RANDOM_MUTEX.lock(); // automock expectations for static methods are global, so we avoid races by locking

        let ctx = MockRandom::gen_u64_range_context();
        ctx.expect()
            .withf(|range| range == &(0..2_000_000_000))
            .returning(move |_| random_nanos);

        let cadence = SendCadence::Random { max_interval: Duration::from_secs(2) };
        assert_eq!(cadence.next_delay::<MockRandom>(), expected);
    }

    #[test]
    fn test_random_cadence_bounds() {
        let max_interval = Duration::from_millis(10);
        let cadence = SendCadence::Random { max_interval };
        for _ in 0..1000 {
            assert!(cadence.next_delay::<RngRandom>() < max_interval);
        }
    }

    #[test]
    fn test_random_cadence_zero_interval() {
        let cadence = SendCadence::Random { max_interval: Duration::ZERO };
        assert_eq!(cadence.next_delay::<RngRandom>(), Duration::ZERO);
    }
}
