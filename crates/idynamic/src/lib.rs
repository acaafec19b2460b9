#![deny(clippy::await_holding_refcell_ref)]

pub mod common;
pub mod pool;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::IdynError;
pub type Result<T> = std::result::Result<T, Error>;

pub type Map<K, V> = hashbrown::HashMap<K, V>;
pub type Set<T> = hashbrown::HashSet<T>;

pub const IDYNAMIC_VERSION: &str = env!("CARGO_PKG_VERSION");
