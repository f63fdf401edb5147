#[macro_use]
pub mod macros;

pub mod data_structures;
pub mod error;
pub mod ids;
pub mod time;
pub mod wrapped;

pub use data_structures::{Map, Set};
pub use wrapped::WrappedRcRefCell;
