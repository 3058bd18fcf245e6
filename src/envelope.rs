//! Shared glue (component G): typed IPC envelopes between the
//! site-injected bridge, the background dispatcher, and the approval
//! surface, plus origin parsing/allow-listing.
//!
//! `spec.md` §4.G: "Typed envelopes (`{type, ...}`) are the only
//! permitted IPC between isolated contexts; any message failing a
//! discriminant or shape check is dropped silently (logged as a drop
//! counter)." The `#[serde(tag = "type")]` discriminant plus a catch-all
//! `Unknown` variant implement exactly that: unrecognised types parse
//! into `Unknown` instead of failing, and the dispatcher counts and logs
//! the drop rather than propagating a parse error.

use serde::{Deserialize, Serialize};
use url::Url;

/// Messages sent from the site-injected bridge to the background worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum SiteToBackground {
    #[serde(rename = "FORGEOS_OPEN_FOR_CONNECT")]
    OpenForConnect { request_id: String },
    #[serde(rename = "FORGEOS_OPEN_FOR_SIGN")]
    OpenForSign { request_id: String, message: String },
    #[serde(rename = "FORGEOS_SYNC")]
    Sync {
        #[serde(default)]
        wallet: Option<String>,
        #[serde(default)]
        agents: Option<serde_json::Value>,
    },
    #[serde(rename = "FORGEOS_SYNC_AGENTS")]
    SyncAgents { agents: serde_json::Value },
    #[serde(rename = "FORGEOS_OPEN_POPUP")]
    OpenPopup,
    #[serde(rename = "FORGEOS_PREFETCH_KRC")]
    PrefetchKrc,
    /// Any discriminant not named above. `spec.md` §4.G: dropped
    /// silently, logged as a drop counter — never surfaced as a parse
    /// error to the caller.
    #[serde(other)]
    Unknown,
}

/// Messages sent from the background worker back to a site tab.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum BackgroundToSite {
    #[serde(rename = "FORGEOS_CONNECT_RESULT")]
    ConnectResult {
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<ConnectResult>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename = "FORGEOS_SIGN_RESULT")]
    SignResult {
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Option<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectResult {
    pub address: String,
    pub network: String,
}

/// Messages sent from the approval surface back to the background worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ApprovalToBackground {
    #[serde(rename = "FORGEOS_CONNECT_APPROVE")]
    ConnectApprove {
        request_id: String,
        address: String,
        network: String,
    },
    #[serde(rename = "FORGEOS_CONNECT_REJECT")]
    ConnectReject {
        request_id: String,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename = "FORGEOS_SIGN_APPROVE")]
    SignApprove {
        request_id: String,
        signature: String,
    },
    #[serde(rename = "FORGEOS_SIGN_REJECT")]
    SignReject {
        request_id: String,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename = "SCHEDULE_AUTOLOCK")]
    ScheduleAutolock { minutes: u32 },
    #[serde(rename = "CANCEL_AUTOLOCK")]
    CancelAutolock,
    #[serde(other)]
    Unknown,
}

/// An origin string, normalised by URL parsing. Malformed origins map to
/// the `unknown` sentinel bucket, which still counts against the
/// per-origin quota (`spec.md` §4.G).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OriginKey {
    Known(String),
    Unknown,
}

impl OriginKey {
    pub const UNKNOWN_BUCKET: &'static str = "unknown";

    pub fn parse(raw: Option<&str>) -> Self {
        match raw.and_then(|s| Url::parse(s).ok()) {
            Some(url) if url.scheme() == "http" || url.scheme() == "https" => {
                Self::Known(url.origin().ascii_serialization())
            }
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Known(s) => s.as_str(),
            Self::Unknown => Self::UNKNOWN_BUCKET,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_discriminant_parses_as_unknown_not_an_error() {
        let msg: SiteToBackground =
            serde_json::from_str(r#"{"type":"FORGEOS_SOMETHING_NEW","foo":1}"#).unwrap();
        assert!(matches!(msg, SiteToBackground::Unknown));
    }

    #[test]
    fn known_discriminant_coerces_unknown_extra_fields() {
        let msg: SiteToBackground = serde_json::from_str(
            r#"{"type":"FORGEOS_OPEN_FOR_CONNECT","requestId":"r1","extra":"ignored"}"#,
        )
        .unwrap();
        match msg {
            SiteToBackground::OpenForConnect { request_id } => assert_eq!(request_id, "r1"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn origin_parse_valid_https() {
        let key = OriginKey::parse(Some("https://a.test/page?x=1"));
        assert_eq!(key, OriginKey::Known("https://a.test".to_string()));
    }

    #[test]
    fn origin_parse_malformed_maps_to_unknown_bucket() {
        let key = OriginKey::parse(Some("not a url"));
        assert_eq!(key, OriginKey::Unknown);
        assert_eq!(key.as_str(), "unknown");
    }

    #[test]
    fn origin_parse_missing_maps_to_unknown_bucket() {
        assert_eq!(OriginKey::parse(None), OriginKey::Unknown);
    }
}
