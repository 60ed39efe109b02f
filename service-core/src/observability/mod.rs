pub mod logging;

pub use logging::{LogFormat, init_tracing};
