pub mod cache;
pub mod dedup;
pub mod mutation;
pub mod prefetch;
pub mod query;
pub mod retry;
