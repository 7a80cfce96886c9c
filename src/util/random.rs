use rand::Rng;
#[cfg(test)] use std::sync::Mutex;


#[cfg(test)]
/// automock expectations for static methods are global - hold this lock to avoid races
pub static MOCK_RANDOM_MUTEX: Mutex<()> = Mutex::new(());

/// Source of randomness for jitter and initial counters. All draws go through the thread-local
///  generator, so concurrent callers never share (or synchronize on) generator state.
#[cfg_attr(test, mockall::automock)]
pub trait Random {
    /// uniformly distributed in `[0, 1)`
    fn unit_interval() -> f64;
    fn next_u16() -> u16;
}

pub struct RngRandom {}
impl Random for RngRandom {
    fn unit_interval() -> f64 {
        rand::thread_rng().gen::<f64>()
    }

    fn next_u16() -> u16 {
        rand::thread_rng().gen()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_interval_bounds() {
        for _ in 0..10_000 {
            let u = RngRandom::unit_interval();
            assert!((0.0..1.0).contains(&u), "{}", u);
        }
    }

    #[test]
    fn test_unit_interval_draws_differ() {
        let first = RngRandom::unit_interval();
        assert!((0..100).any(|_| RngRandom::unit_interval() != first));
    }
}
