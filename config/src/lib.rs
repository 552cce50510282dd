//! Configuration types shared between the reprise crates.
//!
//! Both the worker-side coordinator and the outer relay need to agree on
//! where the PID record lives and how checkpoint paths are derived, so those
//! types live here rather than in either crate.

mod checkpoint;
mod relay;
mod scheduler;

pub use checkpoint::*;
pub use relay::*;
pub use scheduler::*;
