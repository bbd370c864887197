use serde::{Deserialize, Serialize};

/// The tolerated on-disk shape (§6): only these two keys are read back, and
/// either may be absent from a file written by an older or newer version.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Persisted {
    #[serde(rename = "Last Multicast Product Signature", default, skip_serializing_if = "Option::is_none")]
    pub last_multicast_product_signature: Option<String>,

    #[serde(rename = "Missed Multicast File Identifiers", default)]
    pub missed_multicast_file_identifiers: Vec<u32>,
}
