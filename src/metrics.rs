use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    documents_processed: AtomicU64,
    documents_failed: AtomicU64,
    chunks_persisted: AtomicU64,
    rollbacks: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a committed document and the number of chunks persisted for it.
    pub fn record_document(&self, chunk_count: u64) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
        self.chunks_persisted
            .fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record a document that failed processing.
    pub fn record_failure(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed rollback.
    pub fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            chunks_persisted: self.chunks_persisted.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents committed since startup.
    pub documents_processed: u64,
    /// Documents that failed processing.
    pub documents_failed: u64,
    /// Chunks committed across all documents.
    pub chunks_persisted: u64,
    /// Rollbacks that completed.
    pub rollbacks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_documents_and_chunks() {
        let metrics = PipelineMetrics::new();
        metrics.record_document(2);
        metrics.record_document(3);
        metrics.record_failure();
        metrics.record_rollback();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_processed, 2);
        assert_eq!(snapshot.chunks_persisted, 5);
        assert_eq!(snapshot.documents_failed, 1);
        assert_eq!(snapshot.rollbacks, 1);
    }

    #[test]
    fn snapshot_serializes() {
        let snapshot = PipelineMetrics::new().snapshot();
        let json = serde_json::to_value(snapshot).expect("json");
        assert_eq!(json["documents_processed"], 0);
        assert_eq!(json["rollbacks"], 0);
    }
}
