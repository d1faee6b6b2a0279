#![doc = include_str!("RUSTDOC.md")]

pub mod database;
pub mod logger;
pub mod platform;

pub(crate) mod util;

#[cfg(test)]
pub(crate) mod test_support;
