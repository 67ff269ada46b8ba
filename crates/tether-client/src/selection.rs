//! Proxy selection policies.
//!
//! Both policies work on a slice of candidates ordered by proxy id and only
//! ever return an available one. Blocking when nothing is available is the
//! pool's job; these functions just report `None`.

use std::sync::Arc;

use crate::config::SelectionPolicy;
use crate::proxy::{ConnectionProxy, ProxyId};

/// What a selection policy needs to know about a proxy.
pub trait Candidate {
    fn id(&self) -> ProxyId;
    fn is_available(&self) -> bool;
    fn pending_count(&self) -> usize;
}

impl Candidate for Arc<ConnectionProxy> {
    fn id(&self) -> ProxyId {
        ConnectionProxy::id(self)
    }

    fn is_available(&self) -> bool {
        ConnectionProxy::is_available(self)
    }

    fn pending_count(&self) -> usize {
        ConnectionProxy::pending_count(self)
    }
}

impl SelectionPolicy {
    /// Index of the candidate this policy picks, if any is available.
    pub fn pick<C: Candidate>(&self, candidates: &[C], cursor: &mut usize) -> Option<usize> {
        match self {
            SelectionPolicy::RoundRobin => round_robin(candidates, cursor),
            SelectionPolicy::Workload => least_workload(candidates),
        }
    }
}

/// Round-robin over `candidates` starting at `cursor`.
///
/// Visits each candidate at most once, skipping unavailable ones. The cursor
/// always ends up in `[0, candidates.len())`, one past the returned index.
pub fn round_robin<C: Candidate>(candidates: &[C], cursor: &mut usize) -> Option<usize> {
    let n = candidates.len();
    if n == 0 {
        return None;
    }
    if *cursor >= n {
        *cursor %= n;
    }

    for _ in 0..n {
        let idx = *cursor;
        *cursor = (idx + 1) % n;
        if candidates[idx].is_available() {
            return Some(idx);
        }
    }
    None
}

/// Index of the available candidate with the fewest pending requests,
/// lowest id on ties.
pub fn least_workload<C: Candidate>(candidates: &[C]) -> Option<usize> {
    let mut ranked: Vec<(usize, ProxyId, usize)> = candidates
        .iter()
        .enumerate()
        .map(|(idx, c)| (c.pending_count(), c.id(), idx))
        .collect();
    ranked.sort_unstable();

    ranked
        .into_iter()
        .map(|(_, _, idx)| idx)
        .find(|idx| candidates[*idx].is_available())
}
