pub mod bucket;
pub mod bucket_registry;
pub mod limits;

pub use bucket::TokenBucket;
pub use bucket_registry::BucketRegistry;
pub use limits::{LimitStore, RateLimit};
