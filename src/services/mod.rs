pub mod redemption_service;

pub use redemption_service::*;
