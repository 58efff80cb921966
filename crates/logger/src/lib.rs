//! Process-wide tracing setup shared by the workspace binaries

mod tracing;

pub use self::tracing::{init as init_tracing, init_with_level};
