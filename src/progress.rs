// Copyright (c) 2025 ADBC Drivers Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Header-driven progress tracking and cooperative abort.
//!
//! A [`ProgressTracker`] lives for exactly one request. It is installed as
//! the transport's [`HeaderHook`], so it runs on the transport task while
//! the statement waits for the response. Aborting cancels the request's
//! token; the statement observes that, kills the query on the server and
//! fails with [`Error::QueryAborted`](crate::Error::QueryAborted).

use crate::client::{HeaderHook, HEADER_PROGRESS};
use crate::types::{ProgressCallback, QueryProgress};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A progress report delivered to a [`QueryHandle`](crate::QueryHandle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Intermediate report from a progress header.
    Progress(QueryProgress),
    /// Final report from the summary header, sent once the query finished.
    Summary(QueryProgress),
}

impl ProgressEvent {
    pub fn progress(&self) -> &QueryProgress {
        match self {
            ProgressEvent::Progress(p) | ProgressEvent::Summary(p) => p,
        }
    }

    pub fn is_summary(&self) -> bool {
        matches!(self, ProgressEvent::Summary(_))
    }
}

/// Per-request progress state.
pub(crate) struct ProgressTracker {
    query_id: String,
    callback: Option<ProgressCallback>,
    events: Option<UnboundedSender<ProgressEvent>>,
    last: Mutex<Option<QueryProgress>>,
    killed: AtomicBool,
    token: CancellationToken,
}

impl ProgressTracker {
    pub(crate) fn new(
        query_id: impl Into<String>,
        callback: Option<ProgressCallback>,
        events: Option<UnboundedSender<ProgressEvent>>,
        token: CancellationToken,
    ) -> Self {
        Self {
            query_id: query_id.into(),
            callback,
            events,
            last: Mutex::new(None),
            killed: AtomicBool::new(false),
            token,
        }
    }

    /// Deliver one intermediate report.
    ///
    /// Reports equal to the previous one are dropped. Nothing is delivered
    /// once the request was aborted.
    pub(crate) fn report(&self, progress: QueryProgress) {
        if self.is_killed() || !self.replace_last(progress) {
            return;
        }

        if let Some(ref events) = self.events {
            // The receiver may be gone; the query still runs to completion.
            let _ = events.send(ProgressEvent::Progress(progress));
        }

        if let Some(ref callback) = self.callback {
            if !callback(&progress) {
                info!(
                    "Progress callback requested abort of query {} at {}",
                    self.query_id, progress
                );
                self.abort();
            }
        }
    }

    /// Deliver the final summary, unless the request was aborted.
    ///
    /// The callback's return value is ignored here: the query has already
    /// finished.
    pub(crate) fn finish(&self, summary: Option<QueryProgress>) {
        let Some(summary) = summary else {
            return;
        };
        if self.is_killed() || !self.replace_last(summary) {
            return;
        }

        if let Some(ref events) = self.events {
            let _ = events.send(ProgressEvent::Summary(summary));
        }
        if let Some(ref callback) = self.callback {
            callback(&summary);
        }
    }

    /// Mark the request as killed and cancel its token.
    ///
    /// Returns `true` only for the call that flipped the flag.
    pub(crate) fn abort(&self) -> bool {
        let first = self
            .killed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.token.cancel();
        }
        first
    }

    pub(crate) fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    /// Most recent delivered report.
    pub(crate) fn last(&self) -> Option<QueryProgress> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `progress` as the latest report. Returns `false` if it equals
    /// the previous one.
    fn replace_last(&self, progress: QueryProgress) -> bool {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if *last == Some(progress) {
            return false;
        }
        *last = Some(progress);
        true
    }
}

impl HeaderHook for ProgressTracker {
    fn on_header(&self, name: &str, value: &str) {
        if !name.eq_ignore_ascii_case(HEADER_PROGRESS) {
            return;
        }
        match QueryProgress::from_header(value) {
            Ok(progress) => self.report(progress),
            Err(e) => debug!("Ignoring malformed progress header '{}': {}", value, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::sync::mpsc::unbounded_channel;

    fn header(read_rows: u64) -> String {
        format!(
            r#"{{"read_rows":"{}","read_bytes":"{}","total_rows_to_read":"100"}}"#,
            read_rows,
            read_rows * 8
        )
    }

    fn counting_tracker(abort_at: usize) -> (ProgressTracker, Arc<AtomicUsize>, CancellationToken) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let callback: ProgressCallback =
            Arc::new(move |_: &QueryProgress| seen.fetch_add(1, Ordering::SeqCst) + 1 < abort_at);
        let token = CancellationToken::new();
        let tracker = ProgressTracker::new("q-1", Some(callback), None, token.clone());
        (tracker, calls, token)
    }

    #[test]
    fn test_duplicate_reports_suppressed() {
        let (tracker, calls, _) = counting_tracker(usize::MAX);
        tracker.on_header(HEADER_PROGRESS, &header(10));
        tracker.on_header(HEADER_PROGRESS, &header(10));
        tracker.on_header("x-clickhouse-progress", &header(20));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.last(), Some(QueryProgress::new(20, 160, 100)));
    }

    #[test]
    fn test_other_headers_and_garbage_ignored() {
        let (tracker, calls, _) = counting_tracker(usize::MAX);
        tracker.on_header("Content-Type", "application/json");
        tracker.on_header(HEADER_PROGRESS, "not json");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(tracker.last().is_none());
    }

    #[test]
    fn test_abort_on_nth_report_fires_once() {
        let (tracker, calls, token) = counting_tracker(3);
        for rows in 1..=6 {
            tracker.on_header(HEADER_PROGRESS, &header(rows));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(tracker.is_killed());
        assert!(token.is_cancelled());
        assert!(!tracker.abort());
    }

    #[test]
    fn test_summary_suppressed_after_abort() {
        let (tracker, calls, _) = counting_tracker(1);
        tracker.on_header(HEADER_PROGRESS, &header(1));
        tracker.finish(Some(QueryProgress::new(100, 800, 100)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_summary_goes_through_dedup() {
        let (tracker, calls, token) = counting_tracker(usize::MAX);
        tracker.on_header(HEADER_PROGRESS, &header(100));
        tracker.finish(Some(QueryProgress::new(100, 800, 100)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        tracker.finish(Some(QueryProgress::new(100, 900, 100)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_events_stream_ends_with_summary() {
        let (tx, mut rx) = unbounded_channel();
        let tracker = ProgressTracker::new("q-2", None, Some(tx), CancellationToken::new());
        tracker.on_header(HEADER_PROGRESS, &header(5));
        tracker.finish(Some(QueryProgress::new(9, 72, 9)));
        drop(tracker);

        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::Progress(QueryProgress::new(5, 40, 100))
        );
        let last = rx.try_recv().unwrap();
        assert!(last.is_summary());
        assert_eq!(last.progress().read_rows(), 9);
        assert!(rx.try_recv().is_err());
    }
}
