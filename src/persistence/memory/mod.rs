mod core;
mod queue;
mod store;

pub use self::core::{CascadeMode, FaultKind, MemoryPersistence, StoreOp};
