//! The per-product FMTP notifier (C4): the callback surface between the
//! transport and the product queue. See [`Notifier`] for the BOP/EOP/MISSED
//! entry points a receiver drives.

mod codec;
mod notifier;
mod session;

pub use codec::{decode_prod_info, encode_prod_info, CodecError};
pub use notifier::{BopOutcome, Notifier, NotifierError};
pub use session::SessionHandle;
