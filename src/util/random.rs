use rand::Rng;
use std::ops::Range;
#[cfg(test)] use std::sync::Mutex;



#[cfg(test)]
/// automock expectations for static methods are global - hold this lock to avoid races
pub static MOCK_RANDOM_MUTEX: Mutex<()> = Mutex::new(());

#[cfg_attr(test, mockall::automock)]
pub trait Random {
    /// uniformly distributed in the given (non-empty) range
    fn gen_u64_range(range: Range<u64>) -> u64;
}
pub struct RngRandom {}
impl Random for RngRandom {
    fn gen_u64_range(range: Range<u64>) -> u64 {
        rand::thread_rng().gen_range(range)
    }
}
