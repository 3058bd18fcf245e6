//! Pure operations over [`PendingRequestState`] (`spec.md` §4.A).
//!
//! Every function here is infallible and free of I/O, exactly as
//! `spec.md` requires: "All operations are infallible on in-memory
//! data." Persistence and quota enforcement before admission are the
//! dispatcher's job ([`crate::dispatcher`]).

use super::model::{PendingConnectRequest, PendingRequestState, PendingSignRequest};

pub struct PruneResult {
    pub state: PendingRequestState,
    pub expired_connect: Vec<PendingConnectRequest>,
    pub expired_sign: Vec<PendingSignRequest>,
}

pub struct DropForTabResult {
    pub state: PendingRequestState,
    pub removed_connect: Vec<PendingConnectRequest>,
    pub removed_sign: Vec<PendingSignRequest>,
}

pub struct ResolveResult<T> {
    pub resolved: Option<T>,
    pub stale: bool,
    pub state: PendingRequestState,
}

/// Drop malformed/duplicate entries and cap per-origin/total counts.
/// `spec.md` §4.A `read()`: "drop malformed entries, drop duplicates
/// (keep first by createdAt), coerce unknown fields, cap per-origin and
/// total counts by dropping tails."
pub fn normalize(
    mut state: PendingRequestState,
    max_total_pending: usize,
    max_per_origin: usize,
) -> PendingRequestState {
    let unknown = crate::envelope::OriginKey::UNKNOWN_BUCKET;
    let origin_of = |o: &Option<String>| -> String {
        o.clone().unwrap_or_else(|| unknown.to_string())
    };

    let mut seen_ids = std::collections::HashSet::new();
    let mut per_origin: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut total = 0usize;

    if let Some(r) = &state.active_connect {
        seen_ids.insert(r.request_id.clone());
        *per_origin.entry(origin_of(&r.origin)).or_insert(0) += 1;
        total += 1;
    }
    if let Some(r) = &state.active_sign {
        seen_ids.insert(r.request_id.clone());
        *per_origin.entry(origin_of(&r.origin)).or_insert(0) += 1;
        total += 1;
    }

    let mut connect_sorted: Vec<_> = state.connect_queue.drain(..).collect();
    connect_sorted.sort_by_key(|r| r.created_at);
    let mut kept_connect = std::collections::VecDeque::new();
    for req in connect_sorted {
        if seen_ids.contains(&req.request_id) || total >= max_total_pending {
            continue;
        }
        let origin = origin_of(&req.origin);
        let count = per_origin.entry(origin).or_insert(0);
        if *count >= max_per_origin {
            continue;
        }
        *count += 1;
        total += 1;
        seen_ids.insert(req.request_id.clone());
        kept_connect.push_back(req);
    }

    let mut sign_sorted: Vec<_> = state.sign_queue.drain(..).collect();
    sign_sorted.sort_by_key(|r| r.created_at);
    let mut kept_sign = std::collections::VecDeque::new();
    for req in sign_sorted {
        if seen_ids.contains(&req.request_id) || total >= max_total_pending {
            continue;
        }
        let origin = origin_of(&req.origin);
        let count = per_origin.entry(origin).or_insert(0);
        if *count >= max_per_origin {
            continue;
        }
        *count += 1;
        total += 1;
        seen_ids.insert(req.request_id.clone());
        kept_sign.push_back(req);
    }

    state.connect_queue = kept_connect;
    state.sign_queue = kept_sign;
    reconcile_strict_global(state, false)
}

/// Remove entries older than `ttl_ms` relative to `now`. `spec.md`
/// §8: "no surviving entry has `now - createdAt > ttl`, and every
/// expired entry is reported exactly once."
pub fn prune_expired(mut state: PendingRequestState, now: u64, ttl_ms: u64) -> PruneResult {
    let mut expired_connect = Vec::new();
    let mut expired_sign = Vec::new();

    let is_expired = |created_at: u64| now.saturating_sub(created_at) > ttl_ms;

    if let Some(r) = &state.active_connect {
        if is_expired(r.created_at) {
            expired_connect.push(state.active_connect.take().unwrap());
        }
    }
    if let Some(r) = &state.active_sign {
        if is_expired(r.created_at) {
            expired_sign.push(state.active_sign.take().unwrap());
        }
    }

    let mut kept_connect = std::collections::VecDeque::new();
    for req in state.connect_queue.drain(..) {
        if is_expired(req.created_at) {
            expired_connect.push(req);
        } else {
            kept_connect.push_back(req);
        }
    }
    state.connect_queue = kept_connect;

    let mut kept_sign = std::collections::VecDeque::new();
    for req in state.sign_queue.drain(..) {
        if is_expired(req.created_at) {
            expired_sign.push(req);
        } else {
            kept_sign.push_back(req);
        }
    }
    state.sign_queue = kept_sign;

    let state = promote_if_idle(state);
    PruneResult {
        state,
        expired_connect,
        expired_sign,
    }
}

/// Remove every pending entry (active or queued) belonging to `tab_id`.
pub fn drop_for_tab(mut state: PendingRequestState, tab_id: u64) -> DropForTabResult {
    let mut removed_connect = Vec::new();
    let mut removed_sign = Vec::new();

    if state.active_connect.as_ref().is_some_and(|r| r.tab_id == tab_id) {
        removed_connect.push(state.active_connect.take().unwrap());
    }
    if state.active_sign.as_ref().is_some_and(|r| r.tab_id == tab_id) {
        removed_sign.push(state.active_sign.take().unwrap());
    }

    let mut kept_connect = std::collections::VecDeque::new();
    for req in state.connect_queue.drain(..) {
        if req.tab_id == tab_id {
            removed_connect.push(req);
        } else {
            kept_connect.push_back(req);
        }
    }
    state.connect_queue = kept_connect;

    let mut kept_sign = std::collections::VecDeque::new();
    for req in state.sign_queue.drain(..) {
        if req.tab_id == tab_id {
            removed_sign.push(req);
        } else {
            kept_sign.push_back(req);
        }
    }
    state.sign_queue = kept_sign;

    let state = promote_if_idle(state);
    DropForTabResult {
        state,
        removed_connect,
        removed_sign,
    }
}

/// Remove a single connect request by id, whether active or queued.
/// Used when the approval surface fails to open for a just-admitted
/// request (`spec.md` §4.B step 8).
pub fn remove_connect_by_id(
    mut state: PendingRequestState,
    request_id: &str,
) -> (PendingRequestState, Option<PendingConnectRequest>) {
    if state.active_connect.as_ref().is_some_and(|r| r.request_id == request_id) {
        let removed = state.active_connect.take();
        let state = promote_if_idle(state);
        return (state, removed);
    }
    if let Some(pos) = state.connect_queue.iter().position(|r| r.request_id == request_id) {
        let removed = state.connect_queue.remove(pos);
        return (state, removed);
    }
    (state, None)
}

pub fn remove_sign_by_id(
    mut state: PendingRequestState,
    request_id: &str,
) -> (PendingRequestState, Option<PendingSignRequest>) {
    if state.active_sign.as_ref().is_some_and(|r| r.request_id == request_id) {
        let removed = state.active_sign.take();
        let state = promote_if_idle(state);
        return (state, removed);
    }
    if let Some(pos) = state.sign_queue.iter().position(|r| r.request_id == request_id) {
        let removed = state.sign_queue.remove(pos);
        return (state, removed);
    }
    (state, None)
}

/// Append `req` to the connect queue; promote to `active_connect` if no
/// active connect exists (or nothing is active at all, under strict
/// global order).
pub fn enqueue_connect(
    mut state: PendingRequestState,
    req: PendingConnectRequest,
    strict_global_order: bool,
) -> PendingRequestState {
    state.connect_queue.push_back(req);
    promote_if_eligible(state, strict_global_order)
}

pub fn enqueue_sign(
    mut state: PendingRequestState,
    req: PendingSignRequest,
    strict_global_order: bool,
) -> PendingRequestState {
    state.sign_queue.push_back(req);
    promote_if_eligible(state, strict_global_order)
}

/// Resolve the active connect request. `stale = true` iff the active
/// head's `requestId` does not match `request_id` (or there is no
/// active head), per `spec.md` §8.
pub fn resolve_active_connect(
    mut state: PendingRequestState,
    request_id: Option<&str>,
) -> ResolveResult<PendingConnectRequest> {
    match (&state.active_connect, request_id) {
        (Some(active), Some(id)) if active.request_id == id => {
            let resolved = state.active_connect.take();
            let state = promote_if_idle(state);
            ResolveResult {
                resolved,
                stale: false,
                state,
            }
        }
        (Some(_), None) => {
            let resolved = state.active_connect.take();
            let state = promote_if_idle(state);
            ResolveResult {
                resolved,
                stale: false,
                state,
            }
        }
        _ => ResolveResult {
            resolved: None,
            stale: true,
            state,
        },
    }
}

pub fn resolve_active_sign(
    mut state: PendingRequestState,
    request_id: Option<&str>,
) -> ResolveResult<PendingSignRequest> {
    match (&state.active_sign, request_id) {
        (Some(active), Some(id)) if active.request_id == id => {
            let resolved = state.active_sign.take();
            let state = promote_if_idle(state);
            ResolveResult {
                resolved,
                stale: false,
                state,
            }
        }
        (Some(_), None) => {
            let resolved = state.active_sign.take();
            let state = promote_if_idle(state);
            ResolveResult {
                resolved,
                stale: false,
                state,
            }
        }
        _ => ResolveResult {
            resolved: None,
            stale: true,
            state,
        },
    }
}

/// After any mutation in strict-global-order mode: if both actives are
/// present, demote the younger to the head of its queue; if neither is
/// present, promote the older queue head (`spec.md` §4.A).
fn reconcile_strict_global(mut state: PendingRequestState, strict: bool) -> PendingRequestState {
    if !strict {
        return state;
    }
    if state.active_connect.is_some() && state.active_sign.is_some() {
        let demote_connect = match (&state.active_connect, &state.active_sign) {
            (Some(c), Some(s)) => c.created_at > s.created_at,
            _ => unreachable!(),
        };
        if demote_connect {
            let c = state.active_connect.take().unwrap();
            state.connect_queue.push_front(c);
        } else {
            let s = state.active_sign.take().unwrap();
            state.sign_queue.push_front(s);
        }
    } else if state.active_connect.is_none() && state.active_sign.is_none() {
        let next_connect_at = state.connect_queue.front().map(|r| r.created_at);
        let next_sign_at = state.sign_queue.front().map(|r| r.created_at);
        match (next_connect_at, next_sign_at) {
            (Some(c), Some(s)) if c <= s => {
                state.active_connect = state.connect_queue.pop_front();
            }
            (Some(_), Some(_)) => {
                state.active_sign = state.sign_queue.pop_front();
            }
            (Some(_), None) => {
                state.active_connect = state.connect_queue.pop_front();
            }
            (None, Some(_)) => {
                state.active_sign = state.sign_queue.pop_front();
            }
            (None, None) => {}
        }
    }
    state
}

fn promote_if_eligible(
    mut state: PendingRequestState,
    strict_global_order: bool,
) -> PendingRequestState {
    if strict_global_order {
        if state.active_connect.is_none() && state.active_sign.is_none() {
            return reconcile_strict_global(state, true);
        }
        return state;
    }
    if state.active_connect.is_none() {
        state.active_connect = state.connect_queue.pop_front();
    }
    if state.active_sign.is_none() {
        state.active_sign = state.sign_queue.pop_front();
    }
    state
}

fn promote_if_idle(state: PendingRequestState) -> PendingRequestState {
    // A resolved/expired/dropped active slot is now empty; promote the
    // next queued entry of that kind (non-strict), or reconcile (strict).
    promote_if_eligible(state, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(id: &str, tab: u64, origin: &str, created_at: u64) -> PendingConnectRequest {
        PendingConnectRequest {
            request_id: id.to_string(),
            tab_id: tab,
            origin: Some(origin.to_string()),
            created_at,
        }
    }

    #[test]
    fn enqueue_promotes_first_to_active() {
        let state = PendingRequestState::default();
        let state = enqueue_connect(state, connect("r1", 1, "https://a.test", 0), false);
        assert_eq!(state.active_connect.as_ref().unwrap().request_id, "r1");
        assert!(state.connect_queue.is_empty());
    }

    #[test]
    fn second_enqueue_queues_behind_active() {
        let state = PendingRequestState::default();
        let state = enqueue_connect(state, connect("r1", 1, "https://a.test", 0), false);
        let state = enqueue_connect(state, connect("r2", 1, "https://a.test", 1), false);
        assert_eq!(state.active_connect.as_ref().unwrap().request_id, "r1");
        assert_eq!(state.connect_queue.front().unwrap().request_id, "r2");
    }

    #[test]
    fn resolve_active_promotes_next_queued() {
        let state = PendingRequestState::default();
        let state = enqueue_connect(state, connect("r1", 1, "https://a.test", 0), false);
        let state = enqueue_connect(state, connect("r2", 1, "https://a.test", 1), false);
        let result = resolve_active_connect(state, Some("r1"));
        assert!(!result.stale);
        assert_eq!(result.resolved.unwrap().request_id, "r1");
        assert_eq!(result.state.active_connect.unwrap().request_id, "r2");
    }

    #[test]
    fn resolve_mismatched_id_is_stale_with_no_effect() {
        let state = PendingRequestState::default();
        let state = enqueue_connect(state, connect("r1", 1, "https://a.test", 0), false);
        let before = state.clone();
        let result = resolve_active_connect(state, Some("not-r1"));
        assert!(result.stale);
        assert!(result.resolved.is_none());
        assert_eq!(result.state.active_connect, before.active_connect);
    }

    #[test]
    fn prune_expired_removes_and_reports_each_once() {
        let state = PendingRequestState::default();
        let state = enqueue_connect(state, connect("r1", 1, "https://a.test", 1_000), false);
        let result = prune_expired(state, 1_000 + 60_001, 60_000);
        assert_eq!(result.expired_connect.len(), 1);
        assert_eq!(result.expired_connect[0].request_id, "r1");
        assert!(result.state.active_connect.is_none());
    }

    #[test]
    fn drop_for_tab_removes_only_that_tabs_entries() {
        let state = PendingRequestState::default();
        let state = enqueue_connect(state, connect("r1", 1, "https://a.test", 0), false);
        let state = enqueue_connect(state, connect("r2", 2, "https://a.test", 1), false);
        let result = drop_for_tab(state, 1);
        assert_eq!(result.removed_connect.len(), 1);
        assert_eq!(result.removed_connect[0].request_id, "r1");
        assert_eq!(result.state.active_connect.unwrap().request_id, "r2");
    }

    #[test]
    fn normalize_caps_per_origin_by_dropping_tails() {
        let mut state = PendingRequestState::default();
        for i in 0..5 {
            state
                .connect_queue
                .push_back(connect(&format!("r{i}"), 1, "https://a.test", i as u64));
        }
        let normalized = normalize(state, 100, 2);
        assert_eq!(normalized.total_pending(), 2);
    }

    #[test]
    fn normalize_drops_duplicate_request_ids_keeping_first() {
        let mut state = PendingRequestState::default();
        state.connect_queue.push_back(connect("dup", 1, "https://a.test", 0));
        state.connect_queue.push_back(connect("dup", 1, "https://a.test", 1));
        let normalized = normalize(state, 100, 100);
        assert_eq!(normalized.total_pending(), 1);
    }

    #[test]
    fn strict_global_order_keeps_only_one_active() {
        let state = PendingRequestState::default();
        let state = enqueue_connect(state, connect("r1", 1, "https://a.test", 0), true);
        assert!(state.active_connect.is_some());
        let state = enqueue_sign(
            state,
            PendingSignRequest {
                request_id: "s1".to_string(),
                tab_id: 1,
                origin: Some("https://a.test".to_string()),
                created_at: 1,
                message: "hello".to_string(),
            },
            true,
        );
        assert!(state.active_connect.is_some());
        assert!(state.active_sign.is_none());
        assert_eq!(state.sign_queue.len(), 1);
    }
}
