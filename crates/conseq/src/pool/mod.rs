mod fixed;
mod interface;
mod occupancy;
#[cfg(feature = "async-smol")]
mod smol;
mod thread_per_task;
#[cfg(feature = "async-tokio")]
mod tokio;

pub use fixed::*;
pub use interface::*;
pub(crate) use occupancy::*;
#[cfg_attr(docsrs, doc(cfg(feature = "async-smol")))]
#[cfg(feature = "async-smol")]
pub use smol::*;
pub use thread_per_task::*;
#[cfg_attr(docsrs, doc(cfg(feature = "async-tokio")))]
#[cfg(feature = "async-tokio")]
pub use tokio::*;
