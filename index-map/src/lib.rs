#![deny(clippy::future_not_send)]

mod header;
mod map;

pub use map::{IndexMap, IndexMapError};
