use crate::Signature;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// "Send me everything after `after` (or after `now - time_offset` if
/// `after` is `None` or not found) up to but not including `before`."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogSpec {
    pub after: Option<Signature>,
    pub before: Signature,
    pub time_offset: Duration,
}
