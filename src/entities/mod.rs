pub mod redemptions;

pub use redemptions as redemption_entity;
