//! Buffer pool for the MSE-style backend.

mod pool;
mod slot;

pub use pool::{AppendOutcome, BufferPool, PoolStats};
pub use slot::{SlotId, WriteTicket};
