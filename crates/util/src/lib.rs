//! Small helpers shared by the testbed crates.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod discovery_port;
pub mod name_value;

pub use discovery_port::resolve_discovery_port;
pub use name_value::parse_name_values;
