//! Domain entities - pure data and the token-bucket algorithm.

mod bucket;
mod key;

pub use bucket::{BUCKET_TTL, BucketParams, BucketState, Decision, step};
pub use key::{BucketKey, Caller};
