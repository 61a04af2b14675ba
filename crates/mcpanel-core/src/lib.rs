mod errors;
pub mod proto;

pub use errors::CoreError;
