//! Driver registry keeping track of active pages, their targets and sessions.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::ids::{PageId, SessionId};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetContext {
    pub session_id: SessionId,
    pub target_id: Option<String>,
    pub cdp_session: Option<String>,
    pub recent_url: Option<String>,
    /// Monotonic open order; lets callers address windows by index.
    pub opened_seq: u64,
}

/// Concurrent registry for pages and sessions.
pub struct Registry {
    pages: DashMap<PageId, TargetContext>,
    next_seq: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            pages: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn insert_page(
        &self,
        page: PageId,
        session: SessionId,
        target_id: Option<String>,
        cdp_session: Option<String>,
    ) {
        let ctx = TargetContext {
            session_id: session,
            target_id,
            cdp_session,
            recent_url: None,
            opened_seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        self.pages.insert(page, ctx);
    }

    pub fn remove_page(&self, page: &PageId) {
        self.pages.remove(page);
    }

    pub fn get(&self, page: &PageId) -> Option<TargetContext> {
        self.pages.get(page).map(|entry| entry.value().clone())
    }

    pub fn iter(&self) -> Vec<(PageId, TargetContext)> {
        self.pages
            .iter()
            .map(|kv| (*kv.key(), kv.value().clone()))
            .collect()
    }

    /// Pages sorted by open order, oldest first.
    pub fn pages_in_order(&self) -> Vec<PageId> {
        let mut entries = self.iter();
        entries.sort_by_key(|(_, ctx)| ctx.opened_seq);
        entries.into_iter().map(|(page, _)| page).collect()
    }

    pub fn set_recent_url(&self, page: &PageId, url: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.recent_url = Some(url);
        }
    }

    pub fn set_cdp_session(&self, page: &PageId, session: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.cdp_session = Some(session);
        }
    }

    pub fn get_cdp_session(&self, page: &PageId) -> Option<String> {
        self.pages
            .get(page)
            .and_then(|entry| entry.cdp_session.clone())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_in_order_follows_insertion() {
        let registry = Registry::new();
        let first = PageId::new();
        let second = PageId::new();
        registry.insert_page(first, SessionId::new(), None, None);
        registry.insert_page(second, SessionId::new(), None, None);
        assert_eq!(registry.pages_in_order(), vec![first, second]);

        registry.remove_page(&first);
        assert_eq!(registry.pages_in_order(), vec![second]);
    }
}
