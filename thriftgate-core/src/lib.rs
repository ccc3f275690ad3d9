#[macro_use]
mod error;
pub use error::{AnyError, AnyResult};

pub mod connection;
pub mod filter;
pub mod route;
pub mod thrift;
pub mod upstream;
