//! Easy timing in Rust modules.

mod duration;
mod error;
mod sink;
mod template;
mod timer;
mod value;

pub use error::Error;
pub use sink::{ReportSink, Stdout};
pub use timer::{Scope, Timer, DEFAULT_MESSAGE};
pub use value::Value;
