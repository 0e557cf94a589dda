//! Pod-lifecycle recovery observation: selection semantics, the watch-loop
//! session state machine, and the pool that aggregates many independent
//! sessions into one merged `RecoveryReport`.

#![forbid(unsafe_code)]

mod observer;
mod pool;
mod selection;
mod session;

pub use observer::PodObserver;
pub use pool::ObserverPool;
pub use selection::{Selection, SelectionError};
pub use session::SessionHandle;
