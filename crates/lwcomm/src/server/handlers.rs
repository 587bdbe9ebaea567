// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! URL routing table for RPC handlers.
//!
//! Three tiers: exact match, prefix match (registered URL ends in `/`),
//! and a single default handler for `/`. Lookup tries them in that
//! order. The source keyed exact matches by a character-sum hash
//! bucket; a `HashMap` gives the same match semantics without the
//! fixed 32-bucket array.

use std::collections::HashMap;
use std::sync::Arc;

use crate::protocol::Status;

/// An RPC handler: client id, request payload -> (status, response payload).
pub type RpcHandler = Arc<dyn Fn(u32, &[u8]) -> (Status, Vec<u8>) + Send + Sync>;

#[derive(Default)]
pub struct UrlTable {
    exact: HashMap<String, RpcHandler>,
    /// Insertion-ordered; first whose prefix matches wins.
    prefixes: Vec<(String, RpcHandler)>,
    default: Option<RpcHandler>,
}

impl UrlTable {
    pub fn new() -> Self {
        UrlTable::default()
    }

    /// Register a handler at `url`. URLs ending in `/` (other than the
    /// bare root) become prefix handlers keyed by the URL minus its
    /// trailing slash; `/` becomes the default handler; anything else
    /// is an exact match. Duplicate registrations replace the prior one.
    pub fn register(&mut self, url: &str, handler: RpcHandler) {
        if url == "/" {
            self.default = Some(handler);
        } else if let Some(prefix) = url.strip_suffix('/') {
            if let Some(slot) = self.prefixes.iter_mut().find(|(k, _)| k == prefix) {
                slot.1 = handler;
            } else {
                self.prefixes.push((prefix.to_string(), handler));
            }
        } else {
            self.exact.insert(url.to_string(), handler);
        }
    }

    /// Remove the handler previously registered at `url`, if any.
    pub fn unregister(&mut self, url: &str) {
        if url == "/" {
            self.default = None;
        } else if let Some(prefix) = url.strip_suffix('/') {
            self.prefixes.retain(|(k, _)| k != prefix);
        } else {
            self.exact.remove(url);
        }
    }

    /// Find the handler that should serve `url`: exact, then the first
    /// matching prefix in insertion order, then the default handler.
    pub fn lookup(&self, url: &str) -> Option<&RpcHandler> {
        if let Some(h) = self.exact.get(url) {
            return Some(h);
        }
        for (prefix, handler) in &self.prefixes {
            if let Some(rest) = url.strip_prefix(prefix.as_str()) {
                if rest.is_empty() || rest.starts_with('/') {
                    return Some(handler);
                }
            }
        }
        self.default.as_ref()
    }
}

/// Subscription-matching rule used both by publish fan-out and by the
/// server's own tests: a subscription of `"/"` matches everything, an
/// equal-length subscription must be bytewise equal, and a subscription
/// ending in `/` matches the URL if its prefix (minus the trailing
/// slash) is followed by end-of-string or `/`.
pub fn subscription_matches(subscription: &str, url: &str) -> bool {
    if subscription == "/" {
        return true;
    }
    if subscription.len() == url.len() {
        return subscription == url;
    }
    if let Some(prefix) = subscription.strip_suffix('/') {
        if let Some(rest) = url.strip_prefix(prefix) {
            return rest.is_empty() || rest.starts_with('/');
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> RpcHandler {
        Arc::new(|_id, _payload| (Status::Success, Vec::new()))
    }

    #[test]
    fn exact_matches_only_itself() {
        let mut t = UrlTable::new();
        t.register("/a/b", handler());
        assert!(t.lookup("/a/b").is_some());
        assert!(t.lookup("/a/bc").is_none());
    }

    #[test]
    fn prefix_matches_descendants_not_siblings() {
        let mut t = UrlTable::new();
        t.register("/a/", handler());
        assert!(t.lookup("/a").is_some());
        assert!(t.lookup("/a/x").is_some());
        assert!(t.lookup("/a/x/y").is_some());
        assert!(t.lookup("/abc").is_none());
    }

    #[test]
    fn root_is_default() {
        let mut t = UrlTable::new();
        t.register("/", handler());
        assert!(t.lookup("/anything/at/all").is_some());
        assert!(t.lookup("/").is_some());
    }

    #[test]
    fn exact_beats_prefix() {
        let mut t = UrlTable::new();
        t.register("/a/", handler());
        let called = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = called.clone();
        t.register(
            "/a/b",
            Arc::new(move |_id, _p| {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                (Status::Success, Vec::new())
            }),
        );
        let h = t.lookup("/a/b").unwrap();
        h(0, b"");
        assert!(called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn subscription_matching_rules() {
        assert!(subscription_matches("/", "/anything"));
        assert!(subscription_matches("/a/b", "/a/b"));
        assert!(!subscription_matches("/a/b", "/a/bc"));
        assert!(subscription_matches("/a/", "/a"));
        assert!(subscription_matches("/a/", "/a/x"));
        assert!(!subscription_matches("/a/", "/abc"));
    }
}
