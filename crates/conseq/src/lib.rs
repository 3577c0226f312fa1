mod bucket;
mod error;
mod executor;
mod handle;
mod job;
mod ledger;
mod lifecycle;
mod pool;

pub use crate::bucket::*;
pub use crate::error::*;
pub use crate::executor::*;
pub use crate::handle::{Outcome, ResultHandle, TaskError};
pub use crate::job::Job;
pub use crate::lifecycle::*;
pub use crate::pool::*;
