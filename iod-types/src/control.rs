//! JSON payloads carried on the control channel.
//!
//! `ROOTS_CHANGED` and `EVENT` frames carry UTF-8 JSON payloads rather than a
//! binary-packed structure, since both are broadcast, low-frequency, and consumed by the
//! same JavaScript engine that renders the extension's UI.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of the root set broadcast by `ROOTS_CHANGED`.
///
/// Mirrors the external `RootStore`'s view of a granted storage root; the daemon core
/// passes these through without interpreting `uri` itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootDescriptor {
    /// Stable key identifying the root across daemon restarts.
    pub key: String,
    /// Host-platform URI of the granted location, opaque to the daemon.
    pub uri: String,
    /// Human-readable name shown in the extension UI.
    pub display_name: String,
    /// Whether the underlying storage is removable (e.g. a USB volume).
    pub removable: bool,
    /// Result of the most recent availability check.
    pub last_stat_ok: bool,
    /// Unix-epoch milliseconds of the most recent availability check.
    pub last_checked: i64,
}

/// The payload of an `EVENT` frame: an opaque, application-defined event the daemon core
/// does not interpret beyond routing it to every registered `/control` session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// The event name.
    pub event: String,
    /// Arbitrary event-specific data.
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_descriptor_uses_expected_json_keys() {
        let root = RootDescriptor {
            key: "k1".into(),
            uri: "file:///home/user/Downloads".into(),
            display_name: "Downloads".into(),
            removable: false,
            last_stat_ok: true,
            last_checked: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&root).unwrap();
        assert_eq!(json["displayName"], "Downloads");
        assert_eq!(json["lastStatOk"], true);
        assert_eq!(json["lastChecked"], 1_700_000_000_000i64);
    }
}
