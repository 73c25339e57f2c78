use futures::future::BoxFuture;
use parking_lot::Mutex;
use reqwest::Url;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use xnat_uploader_lib::{
    DisplayState, FileHandle, OverwritePrompt, ProgressReporter, QueueError, ServerResponse,
    TransportError, UploadConfig, UploadEvents, UploadItem, UploadQueueManager, UploadRequest,
    UploadStatus, UploadTransport,
};

const DESTINATION: &str = "/data/projects/P1/resources/RAW/files/##FILENAME_REPLACE##";

#[derive(Default)]
struct ServerLog {
    submissions: Vec<(String, bool)>,
    exists_checks: Vec<String>,
    active: usize,
    peak: usize,
}

struct ActiveGuard(Arc<Mutex<ServerLog>>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.lock().active -= 1;
    }
}

#[derive(Clone, Default)]
struct MockServer {
    log: Arc<Mutex<ServerLog>>,
    gate: Option<Arc<Semaphore>>,
    existing: HashSet<String>,
    // existing files the listing does not show; only the upload notices them
    unlisted: HashSet<String>,
    failing: HashSet<String>,
    delay: Duration,
}

impl MockServer {
    fn new() -> Self {
        Self {
            delay: Duration::from_millis(5),
            ..Self::default()
        }
    }

    fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    fn with_existing(mut self, names: &[&str]) -> Self {
        self.existing.extend(names.iter().map(|n| n.to_string()));
        self
    }

    fn with_unlisted(mut self, names: &[&str]) -> Self {
        self.unlisted.extend(names.iter().map(|n| n.to_string()));
        self
    }

    fn with_failing(mut self, names: &[&str]) -> Self {
        self.failing.extend(names.iter().map(|n| n.to_string()));
        self
    }

    fn submissions(&self) -> Vec<(String, bool)> {
        self.log.lock().submissions.clone()
    }

    fn submitted_names(&self) -> Vec<String> {
        self.submissions().into_iter().map(|(name, _)| name).collect()
    }
}

impl UploadTransport for MockServer {
    async fn submit(
        &self,
        request: UploadRequest,
        progress: ProgressReporter,
    ) -> Result<ServerResponse, TransportError> {
        let name = request.file.name.clone();
        {
            let mut log = self.log.lock();
            log.submissions.push((name.clone(), request.overwrite));
            log.active += 1;
            log.peak = log.peak.max(log.active);
        }
        let _active = ActiveGuard(self.log.clone());

        progress.report(50);
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        tokio::time::sleep(self.delay).await;
        progress.report(100);

        if self.failing.contains(&name) {
            return Err(TransportError::Rejected {
                status: 500,
                body: format!("disk full while writing {}", name),
            });
        }
        let exists = self.existing.contains(&name) || self.unlisted.contains(&name);
        if exists && !request.overwrite {
            return Err(TransportError::Duplicate {
                body: format!("File {} already exists", name),
            });
        }
        Ok(ServerResponse {
            status: 200,
            body: format!("stored {}", name),
        })
    }

    async fn exists(&self, listing_url: Url, file_name: String) -> Result<bool, TransportError> {
        assert_eq!(listing_url.query(), Some("format=json"));
        self.log.lock().exists_checks.push(file_name.clone());
        Ok(self.existing.contains(&file_name))
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Event {
    Started,
    Completed(bool, bool),
    Done(bool),
    Item(usize, UploadStatus, DisplayState),
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    fn completions(&self) -> Vec<(bool, bool)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Completed(failed, succeeded) => Some((failed, succeeded)),
                _ => None,
            })
            .collect()
    }

    fn count(&self, wanted: &Event) -> usize {
        self.events().iter().filter(|e| *e == wanted).count()
    }

    /// Checks per-item lifecycles and the concurrency cap over the whole log.
    fn assert_invariants(&self, max_concurrent: usize) {
        let mut last: HashMap<usize, UploadStatus> = HashMap::new();
        let mut running: HashSet<usize> = HashSet::new();

        for event in self.events() {
            let Event::Item(index, status, _) = event else {
                continue;
            };
            if let Some(previous) = last.insert(index, status) {
                assert!(
                    previous == status || previous.can_transition_to(status),
                    "item {index} moved from {previous} to {status}"
                );
            }
            if status == UploadStatus::InProgress {
                running.insert(index);
            } else {
                running.remove(&index);
            }
            assert!(
                running.len() <= max_concurrent,
                "{} uploads in progress, limit {}",
                running.len(),
                max_concurrent
            );
        }
    }
}

impl UploadEvents for Recorder {
    fn upload_started(&self) {
        self.events.lock().push(Event::Started);
    }

    fn upload_completed(&self, any_failed: bool, any_succeeded: bool) {
        self.events
            .lock()
            .push(Event::Completed(any_failed, any_succeeded));
    }

    fn done(&self, any_succeeded: bool) {
        self.events.lock().push(Event::Done(any_succeeded));
    }

    fn item_changed(&self, item: &UploadItem) {
        self.events
            .lock()
            .push(Event::Item(item.index, item.status, item.display_state()));
    }
}

struct CountingPrompt {
    answer: bool,
    delay: Duration,
    // each answer waits for a permit when set
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
}

impl CountingPrompt {
    fn answering(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            answer,
            delay: Duration::from_millis(0),
            gate: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn slow(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            answer,
            delay: Duration::from_millis(30),
            gate: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn held(answer: bool) -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let prompt = Arc::new(Self {
            answer,
            delay: Duration::from_millis(0),
            gate: Some(gate.clone()),
            calls: AtomicUsize::new(0),
        });
        (prompt, gate)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OverwritePrompt for CountingPrompt {
    fn confirm_overwrite(&self, _file_name: &str) -> BoxFuture<'static, bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (answer, delay, gate) = (self.answer, self.delay, self.gate.clone());
        Box::pin(async move {
            if let Some(gate) = gate {
                gate.acquire().await.expect("gate closed").forget();
            }
            tokio::time::sleep(delay).await;
            answer
        })
    }
}

fn config(max_concurrent_uploads: usize) -> UploadConfig {
    UploadConfig {
        server_url: "https://xnat.example.org".into(),
        destination: DESTINATION.into(),
        max_concurrent_uploads,
        ..UploadConfig::default()
    }
}

fn files(names: &[&str]) -> Vec<FileHandle> {
    names
        .iter()
        .map(|name| FileHandle::from_bytes(*name, format!("content of {}", name)))
        .collect()
}

fn start(
    config: UploadConfig,
    server: &MockServer,
    prompt: Arc<CountingPrompt>,
) -> (UploadQueueManager, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let queue = UploadQueueManager::new(config, server.clone(), recorder.clone(), prompt)
        .expect("valid configuration");
    (queue, recorder)
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn statuses(items: &[UploadItem]) -> Vec<UploadStatus> {
    items.iter().map(|item| item.status).collect()
}

#[tokio::test]
async fn uploads_one_at_a_time_in_submission_order() {
    let server = MockServer::new();
    let (queue, recorder) = start(config(1), &server, CountingPrompt::answering(false));

    let indices = queue.enqueue(files(&["a.dcm", "b.dcm", "c.dcm"])).await.unwrap();
    assert_eq!(indices, vec![0, 1, 2]);

    let status = queue.wait_until_settled().await.unwrap();
    assert_eq!(server.submitted_names(), vec!["a.dcm", "b.dcm", "c.dcm"]);
    assert_eq!(server.log.lock().peak, 1);
    recorder.assert_invariants(1);

    assert_eq!(recorder.count(&Event::Started), 1);
    assert_eq!(recorder.completions(), vec![(false, true)]);
    assert_eq!(status.uploads_started, 3);
    assert!(status.ready_for_processing);
    assert!(queue.ready_for_processing());

    let items = queue.items().await.unwrap();
    assert_eq!(statuses(&items), vec![UploadStatus::Succeeded; 3]);
    assert_eq!(items[1].response.as_ref().unwrap().body, "stored b.dcm");
}

#[tokio::test]
async fn concurrency_never_exceeds_the_limit() {
    let mut server = MockServer::new();
    server.delay = Duration::from_millis(20);
    let (queue, recorder) = start(config(2), &server, CountingPrompt::answering(false));

    queue
        .enqueue(files(&["1.zip", "2.zip", "3.zip", "4.zip", "5.zip"]))
        .await
        .unwrap();
    queue.wait_until_settled().await.unwrap();

    assert_eq!(server.submissions().len(), 5);
    assert!(server.log.lock().peak <= 2);
    recorder.assert_invariants(2);
    assert_eq!(recorder.completions(), vec![(false, true)]);
}

#[tokio::test]
async fn illegal_file_name_fails_without_a_request() {
    let server = MockServer::new();
    let (queue, recorder) = start(config(1), &server, CountingPrompt::answering(false));

    queue
        .enqueue(files(&["bad#name.txt", "good.txt"]))
        .await
        .unwrap();
    let status = queue.wait_until_settled().await.unwrap();

    assert_eq!(server.submitted_names(), vec!["good.txt"]);
    let items = queue.items().await.unwrap();
    assert_eq!(items[0].status, UploadStatus::Failed);
    assert!(items[0].message.as_deref().unwrap().contains("'#'"));
    assert_eq!(items[1].status, UploadStatus::Succeeded);

    assert!(status.any_failed_uploads);
    assert_eq!(recorder.completions(), vec![(true, true)]);
}

#[tokio::test]
async fn cancel_all_skips_items_that_never_started() {
    let (server, _gate) = MockServer::new().gated();
    let (queue, recorder) = start(config(1), &server, CountingPrompt::answering(false));

    queue
        .enqueue(files(&["a.txt", "b.txt", "c.txt"]))
        .await
        .unwrap();
    eventually(|| server.submissions().len() == 1).await;

    assert_eq!(queue.cancel_all().await.unwrap(), 3);
    let status = queue.wait_until_settled().await.unwrap();

    // only the admitted item ever reached the transport
    assert_eq!(server.submitted_names(), vec!["a.txt"]);
    assert_eq!(
        statuses(&queue.items().await.unwrap()),
        vec![UploadStatus::Canceled; 3]
    );
    eventually(|| server.log.lock().active == 0).await;

    assert_eq!(status.uploads_started, 0);
    assert_eq!(status.uploads_in_progress, 0);
    assert!(!status.any_failed_uploads);
    assert!(!status.ready_for_processing);
    assert_eq!(recorder.completions(), vec![(false, false)]);
    recorder.assert_invariants(1);
}

#[tokio::test]
async fn canceled_waiting_item_is_never_admitted() {
    let (server, gate) = MockServer::new().gated();
    let (queue, recorder) = start(config(1), &server, CountingPrompt::answering(false));

    queue
        .enqueue(files(&["a.txt", "b.txt", "c.txt"]))
        .await
        .unwrap();
    eventually(|| server.submissions().len() == 1).await;

    assert!(queue.cancel(2).await.unwrap());
    assert!(!queue.cancel(2).await.unwrap(), "already terminal");
    gate.add_permits(2);
    queue.wait_until_settled().await.unwrap();

    assert_eq!(server.submitted_names(), vec!["a.txt", "b.txt"]);
    let items = queue.items().await.unwrap();
    assert_eq!(
        statuses(&items),
        vec![
            UploadStatus::Succeeded,
            UploadStatus::Succeeded,
            UploadStatus::Canceled
        ]
    );
    assert_eq!(recorder.completions(), vec![(false, true)]);
    recorder.assert_invariants(1);
}

#[tokio::test]
async fn canceling_in_flight_upload_backfills_the_slot() {
    let (server, gate) = MockServer::new().gated();
    let (queue, recorder) = start(config(1), &server, CountingPrompt::answering(false));

    queue.enqueue(files(&["a.txt", "b.txt"])).await.unwrap();
    eventually(|| server.submissions().len() == 1).await;

    assert!(queue.cancel(0).await.unwrap());
    eventually(|| server.submissions().len() == 2).await;
    gate.add_permits(1);
    let status = queue.wait_until_settled().await.unwrap();

    let items = queue.items().await.unwrap();
    assert_eq!(
        statuses(&items),
        vec![UploadStatus::Canceled, UploadStatus::Succeeded]
    );
    assert_eq!(status.uploads_started, 1);
    assert!(status.ready_for_processing);
    assert_eq!(recorder.completions(), vec![(false, true)]);
    recorder.assert_invariants(1);
}

#[tokio::test]
async fn overwrite_prompt_is_shown_once_per_batch() {
    let names = ["s1.dcm", "s2.dcm", "s3.dcm", "s4.dcm", "s5.dcm"];
    let server = MockServer::new().with_existing(&names);
    let prompt = CountingPrompt::answering(true);
    let mut config = config(1);
    config.allow_overwrite = true;
    let (queue, recorder) = start(config, &server, prompt.clone());

    queue.enqueue(files(&names)).await.unwrap();
    queue.wait_until_settled().await.unwrap();

    assert_eq!(prompt.calls(), 1);
    assert_eq!(server.log.lock().exists_checks.len(), 5);
    assert!(server.submissions().iter().all(|(_, overwrite)| *overwrite));

    let items = queue.items().await.unwrap();
    assert!(items
        .iter()
        .all(|item| item.status == UploadStatus::Succeeded && item.overwrite));
    assert_eq!(recorder.completions(), vec![(false, true)]);
}

#[tokio::test]
async fn concurrent_collisions_still_prompt_once() {
    let names = ["a.txt", "b.txt", "c.txt"];
    let server = MockServer::new().with_existing(&names);
    let prompt = CountingPrompt::slow(true);
    let mut config = config(3);
    config.allow_overwrite = true;
    let (queue, _recorder) = start(config, &server, prompt.clone());

    queue.enqueue(files(&names)).await.unwrap();
    queue.wait_until_settled().await.unwrap();

    assert_eq!(prompt.calls(), 1);
    assert_eq!(server.submissions().len(), 3);
}

#[tokio::test]
async fn canceling_the_prompting_upload_keeps_the_single_prompt() {
    let server = MockServer::new().with_existing(&["a.txt", "b.txt"]);
    let (prompt, answer) = CountingPrompt::held(true);
    let mut config = config(2);
    config.allow_overwrite = true;
    let (queue, recorder) = start(config, &server, prompt.clone());

    queue.enqueue(files(&["a.txt", "b.txt"])).await.unwrap();
    eventually(|| prompt.calls() == 1 && server.log.lock().exists_checks.len() == 2).await;

    assert!(queue.cancel(0).await.unwrap());
    // give a second prompt the chance to show up before answering
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(prompt.calls(), 1);

    answer.add_permits(1);
    queue.wait_until_settled().await.unwrap();

    assert_eq!(prompt.calls(), 1);
    assert_eq!(server.submissions(), vec![("b.txt".to_string(), true)]);
    let items = queue.items().await.unwrap();
    assert_eq!(
        statuses(&items),
        vec![UploadStatus::Canceled, UploadStatus::Succeeded]
    );
    assert!(items[1].overwrite);
    assert_eq!(recorder.completions(), vec![(false, true)]);
    recorder.assert_invariants(2);
}

#[tokio::test]
async fn cancel_all_during_prompt_completes_once_and_next_batch_asks_again() {
    let server = MockServer::new().with_existing(&["a.txt", "b.txt", "c.txt"]);
    let (prompt, answer) = CountingPrompt::held(true);
    let mut config = config(2);
    config.allow_overwrite = true;
    let (queue, recorder) = start(config, &server, prompt.clone());

    queue.enqueue(files(&["a.txt", "b.txt"])).await.unwrap();
    eventually(|| prompt.calls() == 1 && server.log.lock().exists_checks.len() == 2).await;

    assert_eq!(queue.cancel_all().await.unwrap(), 2);
    let first = queue.wait_until_settled().await.unwrap();
    assert_eq!(first.uploads_started, 0);
    assert!(!first.ready_for_processing);
    assert_eq!(prompt.calls(), 1);
    assert_eq!(recorder.completions(), vec![(false, false)]);

    answer.add_permits(2);
    queue.enqueue(files(&["c.txt"])).await.unwrap();
    eventually(|| queue.status().batches_completed == 2).await;

    assert_eq!(prompt.calls(), 2);
    assert_eq!(server.submissions(), vec![("c.txt".to_string(), true)]);
    assert_eq!(recorder.completions(), vec![(false, false), (false, true)]);
}

#[tokio::test]
async fn declined_overwrite_leaves_existing_files_alone() {
    let server = MockServer::new().with_existing(&["old1.txt", "old2.txt"]);
    let prompt = CountingPrompt::answering(false);
    let mut config = config(1);
    config.allow_overwrite = true;
    let (queue, recorder) = start(config, &server, prompt.clone());

    queue
        .enqueue(files(&["old1.txt", "new.txt", "old2.txt"]))
        .await
        .unwrap();
    let status = queue.wait_until_settled().await.unwrap();

    assert_eq!(prompt.calls(), 1);
    assert_eq!(server.submitted_names(), vec!["new.txt"]);

    let items = queue.items().await.unwrap();
    assert_eq!(
        statuses(&items),
        vec![
            UploadStatus::Canceled,
            UploadStatus::Succeeded,
            UploadStatus::Canceled
        ]
    );
    assert!(items[0].message.as_deref().unwrap().contains("declined"));
    assert_eq!(status.uploads_started, 1);
    assert_eq!(recorder.completions(), vec![(false, true)]);
}

#[tokio::test]
async fn confirmed_collision_is_uploaded_with_overwrite() {
    let server = MockServer::new().with_existing(&["scan.zip"]);
    let prompt = CountingPrompt::answering(true);
    let mut config = config(1);
    config.allow_overwrite = true;
    let (queue, _recorder) = start(config, &server, prompt.clone());

    queue.enqueue(files(&["scan.zip"])).await.unwrap();
    queue.wait_until_settled().await.unwrap();

    assert_eq!(prompt.calls(), 1);
    assert_eq!(server.submissions(), vec![("scan.zip".to_string(), true)]);
    let item = &queue.items().await.unwrap()[0];
    assert_eq!(item.status, UploadStatus::Succeeded);
    assert!(item.overwrite);
}

#[tokio::test]
async fn server_duplicate_rejection_is_resubmitted_after_confirmation() {
    let server = MockServer::new().with_unlisted(&["scan.zip"]);
    let prompt = CountingPrompt::answering(true);
    let mut config = config(1);
    config.allow_overwrite = true;
    let (queue, recorder) = start(config, &server, prompt.clone());

    queue.enqueue(files(&["scan.zip"])).await.unwrap();
    queue.wait_until_settled().await.unwrap();

    assert_eq!(prompt.calls(), 1);
    assert_eq!(
        server.submissions(),
        vec![("scan.zip".to_string(), false), ("scan.zip".to_string(), true)]
    );
    let item = &queue.items().await.unwrap()[0];
    assert_eq!(item.status, UploadStatus::Succeeded);
    assert!(item.overwrite);
    assert_eq!(recorder.completions(), vec![(false, true)]);
}

#[tokio::test]
async fn duplicates_fail_when_destination_does_not_allow_overwrite() {
    let server = MockServer::new().with_existing(&["scan.zip"]);
    let prompt = CountingPrompt::answering(true);
    let (queue, recorder) = start(config(1), &server, prompt.clone());

    queue.enqueue(files(&["scan.zip"])).await.unwrap();
    queue.wait_until_settled().await.unwrap();

    assert_eq!(prompt.calls(), 0);
    assert!(server.log.lock().exists_checks.is_empty());
    assert_eq!(queue.items().await.unwrap()[0].status, UploadStatus::Failed);
    assert_eq!(recorder.completions(), vec![(true, false)]);
}

#[tokio::test]
async fn server_failure_keeps_response_for_inspection() {
    let server = MockServer::new().with_failing(&["big.zip"]);
    let (queue, recorder) = start(config(1), &server, CountingPrompt::answering(false));

    queue.enqueue(files(&["big.zip", "small.zip"])).await.unwrap();
    let status = queue.wait_until_settled().await.unwrap();

    let items = queue.items().await.unwrap();
    assert_eq!(items[0].status, UploadStatus::Failed);
    let response = items[0].response.as_ref().unwrap();
    assert_eq!(response.status, 500);
    assert!(items[0].response_summary().unwrap().contains("disk full"));
    assert_eq!(items[1].status, UploadStatus::Succeeded);

    assert!(status.any_failed_uploads);
    assert!(status.ready_for_processing);
    assert_eq!(recorder.completions(), vec![(true, true)]);
}

#[tokio::test]
async fn full_transfer_shows_saving_before_complete() {
    let server = MockServer::new();
    let (queue, recorder) = start(config(1), &server, CountingPrompt::answering(false));

    queue.enqueue(files(&["a.txt"])).await.unwrap();
    queue.wait_until_settled().await.unwrap();

    let states: Vec<DisplayState> = recorder
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::Item(0, _, state) => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            DisplayState::Waiting,
            DisplayState::Uploading(0),
            DisplayState::Uploading(50),
            DisplayState::Saving,
            DisplayState::Complete,
        ]
    );
}

#[tokio::test]
async fn each_batch_completes_and_prompts_independently() {
    let server = MockServer::new().with_existing(&["a.txt", "b.txt"]);
    let prompt = CountingPrompt::answering(true);
    let mut config = config(1);
    config.allow_overwrite = true;
    let (queue, recorder) = start(config, &server, prompt.clone());

    queue.enqueue(files(&["a.txt"])).await.unwrap();
    let first = queue.wait_until_settled().await.unwrap();
    queue.enqueue(files(&["b.txt"])).await.unwrap();
    let second = queue.wait_until_settled().await.unwrap();

    assert_eq!(first.batches_completed, 1);
    assert_eq!(second.batches_completed, 2);
    assert_ne!(first.batch_id, second.batch_id);
    assert_eq!(prompt.calls(), 2);
    assert_eq!(recorder.count(&Event::Started), 2);
    assert_eq!(recorder.completions(), vec![(false, true), (false, true)]);
    // indices keep counting across batches
    assert_eq!(queue.items().await.unwrap()[1].index, 1);
}

#[tokio::test]
async fn close_reports_done_and_releases_items() {
    let server = MockServer::new();
    let (queue, recorder) = start(config(1), &server, CountingPrompt::answering(false));

    queue.enqueue(files(&["a.txt"])).await.unwrap();
    queue.wait_until_settled().await.unwrap();
    queue.close().await.unwrap();

    assert_eq!(recorder.count(&Event::Done(true)), 1);
    assert!(queue.status().closed);
    assert!(matches!(queue.items().await, Err(QueueError::Closed)));
}

#[tokio::test]
async fn closing_mid_batch_cancels_and_completes_once() {
    let (server, _gate) = MockServer::new().gated();
    let (queue, recorder) = start(config(1), &server, CountingPrompt::answering(false));

    queue.enqueue(files(&["a.txt", "b.txt"])).await.unwrap();
    eventually(|| server.submissions().len() == 1).await;
    queue.close().await.unwrap();

    assert_eq!(recorder.completions(), vec![(false, false)]);
    assert_eq!(recorder.count(&Event::Done(false)), 1);
    assert_eq!(server.submissions().len(), 1);
}
