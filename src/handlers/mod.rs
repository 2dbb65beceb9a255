pub mod health;
pub mod redemption;

pub use health::health_config;
pub use redemption::redemption_config;
