//! Concurrent fan-out of one job's records to every configured sink

use citydex_common::NormalizedRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

use super::chunked::SinkReport;
use super::sinks::RecordSink;

/// Per-sink outcomes of one fan-out, in sink order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutReport {
    pub sinks: Vec<SinkReport>,
}

impl FanoutReport {
    pub fn is_complete_success(&self) -> bool {
        self.sinks.iter().all(SinkReport::is_success)
    }

    pub fn failed_chunks(&self) -> usize {
        self.sinks.iter().map(|s| s.chunks_failed).sum()
    }

    pub fn skipped_chunks(&self) -> usize {
        self.sinks.iter().map(|s| s.chunks_skipped).sum()
    }

    pub fn records_written(&self) -> usize {
        self.sinks.iter().map(|s| s.records_written).sum()
    }

    pub fn report(&self, sink: &str) -> Option<&SinkReport> {
        self.sinks.iter().find(|s| s.sink == sink)
    }
}

/// Document and search pipelines, plus the optional wide-column pipeline
#[derive(Clone)]
pub struct DualSinkFanout {
    document: Arc<dyn RecordSink>,
    search: Arc<dyn RecordSink>,
    wide_column: Option<Arc<dyn RecordSink>>,
}

impl DualSinkFanout {
    pub fn new(
        document: Arc<dyn RecordSink>,
        search: Arc<dyn RecordSink>,
        wide_column: Option<Arc<dyn RecordSink>>,
    ) -> Self {
        Self {
            document,
            search,
            wide_column,
        }
    }

    fn sinks(&self) -> Vec<Arc<dyn RecordSink>> {
        let mut sinks = vec![Arc::clone(&self.document), Arc::clone(&self.search)];
        sinks.extend(self.wide_column.iter().cloned());
        sinks
    }

    /// Start every pipeline, then wait for all of them.
    ///
    /// A pipeline that panics is reported as a failed sink. If this future is
    /// dropped, the pipelines are aborted with it.
    #[tracing::instrument(skip_all, fields(records = records.len()))]
    pub async fn run(&self, records: Arc<[NormalizedRecord]>, cancel: &CancellationToken) -> FanoutReport {
        let handles: Vec<(&'static str, AbortOnDropHandle<SinkReport>)> = self
            .sinks()
            .into_iter()
            .map(|sink| {
                let name = sink.name();
                let records = Arc::clone(&records);
                let cancel = cancel.child_token();
                let handle = tokio::spawn(async move { sink.write_all(records, cancel).await });
                (name, AbortOnDropHandle::new(handle))
            })
            .collect();

        let mut report = FanoutReport::default();
        for (name, handle) in handles {
            let sink_report = match handle.await {
                Ok(sink_report) => sink_report,
                Err(e) => {
                    tracing::error!(sink = name, error = %e, "Sink pipeline died");
                    SinkReport::aborted(name, records.len(), format!("{name} pipeline died: {e}"))
                }
            };
            report.sinks.push(sink_report);
        }

        report
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    struct CountingSink {
        name: &'static str,
        seen: AtomicUsize,
        barrier: Option<Arc<Barrier>>,
    }

    #[async_trait]
    impl RecordSink for CountingSink {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn write_all(&self, records: Arc<[NormalizedRecord]>, _cancel: CancellationToken) -> SinkReport {
            // Both pipelines must be running at once to get past this
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
            self.seen.fetch_add(records.len(), Ordering::SeqCst);
            let mut report = SinkReport::new(self.name);
            report.records_written = records.len();
            report
        }
    }

    struct PanickingSink;

    #[async_trait]
    impl RecordSink for PanickingSink {
        fn name(&self) -> &'static str {
            "search"
        }

        async fn write_all(&self, _records: Arc<[NormalizedRecord]>, _cancel: CancellationToken) -> SinkReport {
            panic!("index mapping exploded");
        }
    }

    fn records(n: u64) -> Arc<[NormalizedRecord]> {
        (1..=n)
            .map(|id| NormalizedRecord::new(id, Map::new()).unwrap())
            .collect::<Vec<_>>()
            .into()
    }

    fn counting(name: &'static str, barrier: Option<Arc<Barrier>>) -> Arc<CountingSink> {
        Arc::new(CountingSink {
            name,
            seen: AtomicUsize::new(0),
            barrier,
        })
    }

    #[tokio::test]
    async fn test_pipelines_run_concurrently() {
        let barrier = Arc::new(Barrier::new(2));
        let document = counting("document", Some(barrier.clone()));
        let search = counting("search", Some(barrier));
        let fanout = DualSinkFanout::new(document.clone(), search.clone(), None);

        let report = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            fanout.run(records(10), &CancellationToken::new()),
        )
        .await
        .unwrap();

        assert_eq!(report.sinks.len(), 2);
        assert_eq!(report.sinks[0].sink, "document");
        assert_eq!(report.sinks[1].sink, "search");
        assert_eq!(document.seen.load(Ordering::SeqCst), 10);
        assert_eq!(search.seen.load(Ordering::SeqCst), 10);
        assert!(report.is_complete_success());
    }

    #[tokio::test]
    async fn test_optional_wide_column_pipeline_included() {
        let wide = counting("wide_column", None);
        let fanout = DualSinkFanout::new(
            counting("document", None),
            counting("search", None),
            Some(wide.clone()),
        );

        let report = fanout.run(records(3), &CancellationToken::new()).await;

        assert_eq!(report.sinks.len(), 3);
        assert_eq!(report.records_written(), 9);
        assert!(report.report("wide_column").is_some());
    }

    #[tokio::test]
    async fn test_panicking_pipeline_is_reported_not_propagated() {
        let document = counting("document", None);
        let fanout = DualSinkFanout::new(document.clone(), Arc::new(PanickingSink), None);

        let report = fanout.run(records(4), &CancellationToken::new()).await;

        assert_eq!(document.seen.load(Ordering::SeqCst), 4);
        let search = report.report("search").unwrap();
        assert_eq!(search.records_failed, 4);
        assert!(search.errors[0].contains("search pipeline died"));
        assert_eq!(report.failed_chunks(), 1);
        assert!(!report.is_complete_success());
    }
}
