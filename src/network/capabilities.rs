//! Capability negotiation: lets a client discover which optional operations a server supports
//! before relying on them, and fall back to legacy equivalents when they're absent.

use serde::{Deserialize, Serialize};

/// Current protocol version advertised by this crate's server adapter.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub protocol_version: u32,
    pub supports_cursor_scan: bool,
    pub supports_bloom: bool,
    pub supports_compaction_status: bool,
}

impl Capabilities {
    /// The capability set advertised by every server adapter in this crate; every operation in
    /// the abstract protocol is implemented, so all flags are unconditionally `true`.
    pub fn current() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            supports_cursor_scan: true,
            supports_bloom: true,
            supports_compaction_status: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_capabilities_advertise_everything() {
        let caps = Capabilities::current();
        assert_eq!(caps.protocol_version, PROTOCOL_VERSION);
        assert!(caps.supports_cursor_scan);
        assert!(caps.supports_bloom);
        assert!(caps.supports_compaction_status);
    }

    #[test]
    fn round_trips_through_json() {
        let caps = Capabilities::current();
        let json = serde_json::to_string(&caps).unwrap();
        let back: Capabilities = serde_json::from_str(&json).unwrap();
        assert_eq!(caps, back);
    }
}
