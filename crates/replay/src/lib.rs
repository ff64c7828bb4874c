pub mod adapters;
pub mod engine;
pub mod policy;

pub use adapters::{Adapter, AdapterRegistry};
pub use engine::{run_replay, MAX_RESPONSE_BYTES};
pub use policy::{DenyRule, ReplayPolicy};
