pub mod random;
pub mod shutdown;
