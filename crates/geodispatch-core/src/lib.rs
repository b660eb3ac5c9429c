mod address;
mod error;
mod item;

pub use address::{format_address, AddressRow};
pub use error::{CoreError, Result};
pub use item::{Coordinates, ResultRecord, RowIndex, WorkItem};

/// Country suffix appended to every formatted address.
pub const COUNTRY: &str = "Brasil";
