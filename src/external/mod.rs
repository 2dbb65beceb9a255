pub mod redemption_api;

pub use redemption_api::*;
