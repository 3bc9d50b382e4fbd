pub mod error;
pub mod jobs;
pub mod storage;
pub mod utils;
