// Market data ingestion: candle stream, OI/ratio polling, observer fan-out

pub mod backoff;
pub mod message;
pub mod observers;
pub mod refresh;
pub mod stream;

pub use backoff::ReconnectBackoff;
pub use observers::{MarketObserver, ObserverSet};
pub use refresh::{MarketRefresher, PollResult, PollSchedule};
pub use stream::{StreamIngester, StreamState};
