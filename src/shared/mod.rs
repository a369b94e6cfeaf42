pub mod credential_store;
pub mod kv_store;
pub mod latency;
