pub type AnyError = anyhow::Error;

pub mod thrift;
