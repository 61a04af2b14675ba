mod audit;
mod error;
mod schedule;
mod types;

pub use audit::*;
pub use error::*;
pub use schedule::*;
pub use types::*;
