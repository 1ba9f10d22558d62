pub mod pipeline;
pub mod queue;

pub use pipeline::{
    ConflictOutcome, ConflictRecord, ConflictStrategy, PushOptions, PushPipeline, PushReport,
};
pub use queue::{
    CoalesceOutcome, MemoryPendingStore, PendingOperation, PendingRecord, PendingStore, coalesce,
};
