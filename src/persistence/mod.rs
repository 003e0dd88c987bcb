pub mod memory;
pub mod model;
pub mod traits;

pub use memory::{CascadeMode, FaultKind, MemoryPersistence, StoreOp};
pub use model::{ListFilter, StoreEvent, WatchEventType};
pub use traits::{ObjectStore, WorkQueue};
