pub mod controller;
pub mod dedup;
pub mod document;
pub mod errors;
pub mod graph;
pub mod material_library;
pub mod materialize;
pub mod persist;
pub mod recovery;
pub mod session;
pub mod snapshot;

pub use controller::{DeferredTask, OverrideController};
pub use errors::{OverrideError, Result};
pub use session::{MoveDirection, OverrideSession, OverrideSettings, OverrideStatus};
