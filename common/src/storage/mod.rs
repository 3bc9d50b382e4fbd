pub mod db;
pub mod kv;
pub mod types;
