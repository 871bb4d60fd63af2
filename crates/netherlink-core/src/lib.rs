pub mod errors;
pub mod ids;
pub mod models;
pub mod protocol;

pub use errors::RelayError;
