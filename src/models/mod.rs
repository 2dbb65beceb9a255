pub mod common;
pub mod pagination;
pub mod redemption;

pub use common::*;
pub use pagination::*;
pub use redemption::*;
