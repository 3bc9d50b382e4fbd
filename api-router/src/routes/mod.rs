pub mod liveness;
pub mod query;
pub mod query_stream;
pub mod readiness;
