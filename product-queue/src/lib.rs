#![deny(clippy::future_not_send)]

pub mod memory;
pub mod prod_index_queue;
pub mod queue;

pub use memory::InMemoryProductQueue;
pub use prod_index_queue::{Cancelled, ProdIndexQueue};
pub use queue::{ProductQueue, QueueError, Reservation, ReservationToken};
