pub mod engine;
pub mod state;
pub mod traits;

pub use engine::{SyncEngine, SyncPhase, SyncReport};
pub use state::{FailureTracker, SyncOptions, SyncState};
pub use traits::{LocalEvent, LocalEventProvider, SyncResultHandler};
