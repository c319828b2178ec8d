// Order execution: live exchange and paper venues
pub mod bitget;
pub mod executor;
pub mod paper;

pub use bitget::BitgetExecutor;
pub use executor::{stop_loss_price, OpenOrder, OrderExecutor};
pub use paper::PaperExecutor;
