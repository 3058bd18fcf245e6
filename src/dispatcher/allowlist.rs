//! Connected-site allow-list (`spec.md` §6.4 "connected-site
//! allow-list") consulted on the dispatcher's fast path: a connect from
//! an already-approved origin resolves immediately without enqueueing.

use crate::envelope::ConnectResult;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct AllowList {
    entries: RwLock<HashMap<String, ConnectResult>>,
}

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    /// `spec.md` §9 Open Question: the fast path honours the allow-list
    /// even when the origin resolves to the `unknown` sentinel bucket.
    /// We resolve that question explicitly: `unknown` is never looked up
    /// here, because every distinct malformed origin would otherwise
    /// collide on one shared allow-list entry and leak one approved
    /// account to every such origin. See DESIGN.md.
    pub fn lookup(&self, origin: &crate::envelope::OriginKey) -> Option<ConnectResult> {
        match origin {
            crate::envelope::OriginKey::Unknown => None,
            crate::envelope::OriginKey::Known(o) => {
                self.entries.read().expect("allow-list lock poisoned").get(o).cloned()
            }
        }
    }

    pub fn approve(&self, origin: String, result: ConnectResult) {
        self.entries.write().expect("allow-list lock poisoned").insert(origin, result);
    }

    pub fn revoke(&self, origin: &str) {
        self.entries.write().expect("allow-list lock poisoned").remove(origin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::OriginKey;

    #[test]
    fn approved_origin_resolves_on_fast_path() {
        let list = AllowList::new();
        list.approve(
            "https://a.test".to_string(),
            ConnectResult {
                address: "kaspa:q1".to_string(),
                network: "mainnet".to_string(),
            },
        );
        let key = OriginKey::parse(Some("https://a.test"));
        assert!(list.lookup(&key).is_some());
    }

    #[test]
    fn unknown_bucket_never_fast_paths() {
        let list = AllowList::new();
        list.approve(
            crate::envelope::OriginKey::UNKNOWN_BUCKET.to_string(),
            ConnectResult {
                address: "kaspa:q1".to_string(),
                network: "mainnet".to_string(),
            },
        );
        let key = OriginKey::parse(Some("not a url"));
        assert!(list.lookup(&key).is_none());
    }
}
