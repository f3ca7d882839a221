//! Activity values: records, the id<->name registry and per-kind buckets.

pub mod bucket;
pub mod names;
pub mod record;

pub use bucket::ActivityBucket;
pub use names::ActivityNameRegistry;
pub use record::ActivityRecord;
