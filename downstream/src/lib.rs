//! The downstream session controller (C6): subscribes, then races
//! UcastRecv/Request/McastRecv for as long as the session stays up,
//! napping and resubscribing on soft failures (§4.6).

mod controller;
mod state;

pub use controller::Controller;
pub use state::SessionState;
