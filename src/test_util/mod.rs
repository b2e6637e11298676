//! Utilities that are useful for testing mesh formation and the ping protocol: deterministic node
//!  ids, an in-memory network of hosts, and handlers / observers that record what they see. They
//!  are used for testing this crate itself, but they are also exported for application testing,
//!  so they are part of the crate's regular (non-#[cfg(test)]) code.

pub mod handler;
pub mod in_memory;
pub mod node;
pub mod observer;


#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::DEBUG)
            // .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
