pub mod concurrency;
pub mod expbackoff;
pub mod fixed;
pub mod ratelimit;
pub mod wait;

pub use concurrency::{Action, decide};
pub use expbackoff::ExponentialBackoff;
pub use fixed::FixedWait;
pub use ratelimit::ItemBackoff;
pub use wait::{WaitContext, WaitDecision, WaitStrategy};
