mod client;
mod pool;
mod resp;

pub use client::{ClientConfig, ClientError, ClientResult, ClientTtl, KVClient};
