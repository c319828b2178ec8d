// Exchange REST access: signing, rate limiting, retries
pub mod client;
pub mod market;
pub mod rate_limit;
pub mod responses;
pub mod signing;

pub use client::{BitgetClient, Params};
pub use rate_limit::TokenBucket;
pub use signing::Credentials;
