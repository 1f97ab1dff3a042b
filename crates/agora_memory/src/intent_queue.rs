//! Bounded, TTL-expiring priority queue of deferred actions.
//!
//! Ordering is `(priority desc, insertion asc)`. Overflow drops the lowest
//! priority entries, newest first among equals. Expired entries are purged
//! before every read.

use agora_core::ActionCandidate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

const MIN_DEFAULT_TTL_MS: i64 = 5_000;
const MIN_ITEM_TTL_MS: i64 = 1_000;

static NO_META: Value = Value::Null;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub action: ActionCandidate,
    pub priority: f64,
    pub source: String,
    pub attempts: u32,
    pub created_at: i64,
    pub ttl_ms: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueMetrics {
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped: u64,
    pub expired: u64,
    pub last_enqueue_at: Option<i64>,
    pub last_dequeue_at: Option<i64>,
    pub max_depth: usize,
}

#[derive(Debug, Clone)]
struct Entry {
    item: QueueItem,
    seq: u64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Greater = served first: higher priority, then older.
    fn cmp(&self, other: &Self) -> Ordering {
        self.item
            .priority
            .total_cmp(&other.item.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone)]
pub struct IntentQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    max_size: usize,
    default_ttl_ms: i64,
    metrics: QueueMetrics,
}

impl IntentQueue {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            max_size: max_size.max(1),
            default_ttl_ms: (default_ttl.as_millis() as i64).max(MIN_DEFAULT_TTL_MS),
            metrics: QueueMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &QueueMetrics {
        &self.metrics
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn push(&mut self, item: QueueItem) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { item, seq });
    }

    fn trim_overflow(&mut self) -> usize {
        let overflow = self.heap.len().saturating_sub(self.max_size);
        if overflow > 0 {
            // Ascending order: lowest priority (and newest among ties) first.
            let mut sorted = std::mem::take(&mut self.heap).into_sorted_vec();
            sorted.drain(..overflow);
            self.heap = BinaryHeap::from(sorted);
        }
        overflow
    }

    fn purge_expired(&mut self, now_ms: i64) {
        let before = self.heap.len();
        self.heap.retain(|e| now_ms <= e.item.expires_at);
        let expired = before - self.heap.len();
        if expired > 0 {
            self.metrics.expired += expired as u64;
            tracing::debug!(expired, "intent queue purged expired items");
        }
    }

    /// Insert `action`. `ttl` falls back to the queue default.
    pub fn enqueue(
        &mut self,
        action: ActionCandidate,
        source: &str,
        priority: f64,
        ttl: Option<Duration>,
        now_ms: i64,
    ) {
        let ttl_ms = ttl
            .map(|t| t.as_millis() as i64)
            .unwrap_or(self.default_ttl_ms)
            .max(MIN_ITEM_TTL_MS);
        let kind = action.kind();
        self.push(QueueItem {
            action,
            priority,
            source: source.to_string(),
            attempts: 0,
            created_at: now_ms,
            ttl_ms,
            expires_at: now_ms + ttl_ms,
        });
        let dropped = self.trim_overflow();
        self.metrics.dropped += dropped as u64;
        self.metrics.enqueued += 1;
        self.metrics.last_enqueue_at = Some(now_ms);
        self.metrics.max_depth = self.metrics.max_depth.max(self.heap.len());
        tracing::debug!(
            stage = "action_enqueued",
            source,
            action = kind,
            priority,
            depth = self.heap.len(),
            "queued action"
        );
    }

    /// Pop the highest-priority live item.
    pub fn dequeue(&mut self, now_ms: i64) -> Option<QueueItem> {
        self.purge_expired(now_ms);
        let entry = self.heap.pop()?;
        self.metrics.dequeued += 1;
        self.metrics.last_dequeue_at = Some(now_ms);
        tracing::debug!(
            stage = "action_dequeued",
            source = %entry.item.source,
            action = entry.item.action.kind(),
            depth = self.heap.len(),
            "dequeued action"
        );
        Some(entry.item)
    }

    pub fn depth(&mut self, now_ms: i64) -> usize {
        self.purge_expired(now_ms);
        self.heap.len()
    }

    /// Live items in service order.
    pub fn snapshot(&mut self, now_ms: i64) -> Vec<QueueItem> {
        self.purge_expired(now_ms);
        let mut entries: Vec<&Entry> = self.heap.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries
            .into_iter()
            .take(self.max_size)
            .map(|e| e.item.clone())
            .collect()
    }

    /// Reload persisted items, normalizing entries written without TTL
    /// metadata or as bare actions. Unparseable entries are skipped.
    pub fn restore(&mut self, raw: &[Value], now_ms: i64) -> usize {
        let mut restored = 0;
        for value in raw {
            match self.normalize(value, now_ms) {
                Some(item) => {
                    self.push(item);
                    restored += 1;
                }
                None => tracing::warn!("Skipping unreadable pending action: {}", value),
            }
        }
        self.trim_overflow();
        self.metrics.max_depth = self.metrics.max_depth.max(self.heap.len());
        restored
    }

    fn normalize(&self, value: &Value, now_ms: i64) -> Option<QueueItem> {
        let (action_value, meta, legacy) = match value.get("action") {
            Some(action) if action.is_object() => (action.clone(), value, false),
            _ => (value.clone(), &NO_META, true),
        };
        let action: ActionCandidate = serde_json::from_value(action_value).ok()?;

        let int = |key: &str| meta.get(key).and_then(Value::as_i64).filter(|v| *v > 0);
        let created_at = int("createdAt").unwrap_or(now_ms);
        let ttl_ms = int("ttlMs")
            .unwrap_or(self.default_ttl_ms)
            .max(MIN_ITEM_TTL_MS);
        let expires_at = int("expiresAt").unwrap_or(created_at + ttl_ms);
        let source = if legacy {
            "legacy".to_string()
        } else {
            meta.get("source")
                .and_then(Value::as_str)
                .unwrap_or("plan")
                .to_string()
        };

        Some(QueueItem {
            action,
            priority: meta.get("priority").and_then(Value::as_f64).unwrap_or(1.0),
            source,
            attempts: meta.get("attempts").and_then(Value::as_u64).unwrap_or(0) as u32,
            created_at,
            ttl_ms,
            expires_at,
        })
    }
}
