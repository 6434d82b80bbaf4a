//! The speculative loop runtime: conflict context, user-facing iteration
//! handle, abort handling and the `for_each` executor.

mod abort;
mod context;
mod for_each;
mod stats;
mod user;

pub use abort::{AbortHandler, AbortPolicy, Retry};
pub use context::{acquire, Conflict, IterationContext, Lockable};
pub use for_each::{LoopOptions, Runtime};
pub use stats::LoopReport;
pub use user::UserContext;
