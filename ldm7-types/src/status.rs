use serde::{Deserialize, Serialize};

/// The single error/result tag threaded through the LDM7 control protocol
/// and the component APIs built on top of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum Ldm7Status {
    #[error("ok")]
    Ok,
    #[error("invalid argument")]
    Inval,
    #[error("multicast transport error")]
    Mcast,
    #[error("RPC error")]
    Rpc,
    #[error("system error")]
    System,
    #[error("timed out")]
    Timedout,
    #[error("connection refused")]
    Refused,
    #[error("unauthorized")]
    Unauth,
    #[error("no such product")]
    Noent,
    #[error("duplicate product")]
    Dup,
    #[error("shut down")]
    Shutdown,
    #[error("already exists")]
    Exists,
    #[error("IPv6 not supported")]
    Ipv6,
    #[error("internal logic error")]
    Logic,
}

impl Ldm7Status {
    pub fn is_ok(self) -> bool {
        matches!(self, Ldm7Status::Ok)
    }

    /// Soft failures: the session loop naps and retries rather than giving
    /// up, per §4.6.5 of the session-loop design. Only `{FATAL, INVALID,
    /// MULTICAST_FATAL, SHUTDOWN}` (§4.6.2) end the loop; everything else,
    /// including an ordinary peer-close or a reset forced by an
    /// out-of-order unicast reply (both surfaced as `Rpc`), is soft.
    /// `System` is deliberately excluded: it is how a fatal product-queue
    /// insert error (anything other than DUP/TOO_BIG, §4.6.5) is reported,
    /// and that must break the loop, not retry it forever.
    pub fn is_soft(self) -> bool {
        matches!(
            self,
            Ldm7Status::Timedout | Ldm7Status::Refused | Ldm7Status::Unauth | Ldm7Status::Rpc | Ldm7Status::Noent
        )
    }
}
