//! Response-retrieval cache.
//!
//! Maps an opaque `response_id` to the final canonical reply that produced
//! it, for `previous_response_id` continuity and `GET`/`DELETE
//! /v1/responses/{id}`. An unbounded mapping would be acceptable, but an
//! insertion-order eviction bound (default 10,000) keeps process memory
//! from growing without limit under sustained traffic.

use std::collections::HashMap;
use std::sync::Arc;

use gateway_core::message::CanonicalReply;
use tokio::sync::RwLock;

const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub model: String,
    pub reply: CanonicalReply,
    pub previous_response_id: Option<String>,
}

struct Inner {
    entries: HashMap<String, CachedResponse>,
    order: Vec<String>,
    capacity: usize,
}

/// Process-lifetime, in-memory only. Shared via `Arc` across handlers.
pub struct ResponseCache {
    inner: RwLock<Inner>,
}

impl ResponseCache {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                order: Vec::new(),
                capacity,
            }),
        })
    }

    pub async fn insert(&self, id: String, value: CachedResponse) {
        let mut inner = self.inner.write().await;
        if !inner.entries.contains_key(&id) {
            inner.order.push(id.clone());
        }
        inner.entries.insert(id, value);

        while inner.order.len() > inner.capacity {
            let oldest = inner.order.remove(0);
            inner.entries.remove(&oldest);
        }
    }

    pub async fn get(&self, id: &str) -> Option<CachedResponse> {
        self.inner.read().await.entries.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<CachedResponse> {
        let mut inner = self.inner.write().await;
        let removed = inner.entries.remove(id);
        if removed.is_some() {
            inner.order.retain(|x| x != id);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::message::FinishReason;

    fn reply() -> CachedResponse {
        CachedResponse {
            model: "m".into(),
            reply: CanonicalReply {
                text: Some("hi".into()),
                tool_calls: vec![],
                finish_reason: FinishReason::Stop,
                usage: None,
            },
            previous_response_id: None,
        }
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let cache = ResponseCache::new();
        cache.insert("resp_1".into(), reply()).await;
        assert!(cache.get("resp_1").await.is_some());
        assert!(cache.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn remove_deletes_entry() {
        let cache = ResponseCache::new();
        cache.insert("resp_1".into(), reply()).await;
        let removed = cache.remove("resp_1").await;
        assert!(removed.is_some());
        assert!(cache.get("resp_1").await.is_none());
    }

    #[tokio::test]
    async fn eviction_drops_oldest_past_capacity() {
        let cache = ResponseCache::with_capacity(2);
        cache.insert("a".into(), reply()).await;
        cache.insert("b".into(), reply()).await;
        cache.insert("c".into(), reply()).await;
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_some());
        assert!(cache.get("c").await.is_some());
    }
}
