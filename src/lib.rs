mod barrier;

pub use barrier::{Barrier, BarrierCancelled, BarrierWaitResult};
