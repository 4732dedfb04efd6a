//! Background owner of the search index.
//!
//! The worker runs on a blocking thread and owns its index outright.  Docs
//! go in and ranked indices come out as copies over channels; nothing is
//! shared with the engine.

use iptv_proto::protocol::{WorkerRequest, WorkerResponse};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::index::SearchIndex;
use super::RenderError;

pub struct SearchWorker {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    responses: mpsc::UnboundedReceiver<WorkerResponse>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SearchWorker {
    /// Start a worker on the current tokio runtime.  Returns `None` outside
    /// a runtime; callers then search inline.
    pub fn spawn() -> Option<Self> {
        let runtime = Handle::try_current().ok()?;
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let handle = runtime.spawn_blocking(move || run(req_rx, resp_tx, child));
        debug!("search worker started");
        Some(Self {
            requests: req_tx,
            responses: resp_rx,
            cancel,
            handle: Some(handle),
        })
    }

    pub fn send(&self, request: WorkerRequest) -> Result<(), RenderError> {
        self.requests
            .send(request)
            .map_err(|_| RenderError::WorkerGone)
    }

    /// A response if one is already waiting.
    pub fn try_recv(&mut self) -> Option<WorkerResponse> {
        self.responses.try_recv().ok()
    }

    /// Wait for the next response.  `None` once the worker has stopped.
    pub async fn recv(&mut self) -> Option<WorkerResponse> {
        self.responses.recv().await
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ask the worker to stop.  Pending requests are discarded.
    pub fn shutdown(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        let _ = self.requests.send(WorkerRequest::Shutdown);
        self.handle.take();
        debug!("search worker stopped");
    }
}

impl Drop for SearchWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
    responses: mpsc::UnboundedSender<WorkerResponse>,
    cancel: CancellationToken,
) {
    let mut index: Option<SearchIndex> = None;
    let mut batch = Vec::new();

    while let Some(first) = requests.blocking_recv() {
        batch.push(first);
        while let Ok(next) = requests.try_recv() {
            batch.push(next);
        }

        // Only the newest query in a burst can still be wanted; older ones
        // would be dropped by the engine on arrival anyway.
        let newest_query = batch.iter().rposition(is_query);
        for (i, request) in batch.drain(..).enumerate() {
            if cancel.is_cancelled() {
                return;
            }
            if matches!(request, WorkerRequest::Shutdown) {
                return;
            }
            if is_query(&request) && Some(i) != newest_query {
                debug!("search worker skipped superseded query");
                continue;
            }
            if let Some(reply) = SearchIndex::handle(&mut index, request) {
                if responses.send(reply).is_err() {
                    warn!("search worker has no receiver, stopping");
                    return;
                }
            }
        }
    }
}

fn is_query(request: &WorkerRequest) -> bool {
    matches!(
        request,
        WorkerRequest::Search { .. } | WorkerRequest::ByGroup { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use iptv_proto::protocol::IndexDoc;

    fn docs() -> Vec<IndexDoc> {
        ["Alpha", "Beta", "Gamma"]
            .iter()
            .map(|n| IndexDoc {
                name: n.to_string(),
                group: "G".into(),
            })
            .collect()
    }

    #[test]
    fn test_spawn_without_runtime_is_none() {
        assert!(SearchWorker::spawn().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_build_then_search() {
        let mut worker = SearchWorker::spawn().unwrap();
        worker
            .send(WorkerRequest::BuildIndex {
                generation: 1,
                docs: docs(),
            })
            .unwrap();
        match worker.recv().await.unwrap() {
            WorkerResponse::IndexReady { doc_count, .. } => assert_eq!(doc_count, 3),
            other => panic!("unexpected {other:?}"),
        }

        worker
            .send(WorkerRequest::Search {
                token: 5,
                query: "gam".into(),
                limit: 10,
            })
            .unwrap();
        match worker.recv().await.unwrap() {
            WorkerResponse::Results { token, indices, .. } => {
                assert_eq!(token, 5);
                assert_eq!(indices, vec![2]);
            }
            other => panic!("unexpected {other:?}"),
        }

        worker.shutdown();
        assert!(!worker.is_running());
    }
}
