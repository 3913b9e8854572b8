//! Wire-level protocol building blocks: topic grammar and property bags.

pub mod property_bag;
pub mod topics;

pub use property_bag::PropertyBag;
pub use topics::{dps, hub};
