pub mod collector;
pub mod reporter;

pub use collector::*;
pub use reporter::*;
