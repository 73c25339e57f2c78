use futures::future::{AbortHandle, Abortable, Aborted};
use log::{debug, error, info, warn};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{ConfigError, UploadConfig, UploadOptions};
use crate::destination::{validate_file_name, Destination};
use crate::events::{OverwritePrompt, UploadEvents};
use crate::item::{FileHandle, ServerResponse, UploadItem, UploadStatus};
use crate::transport::{ProgressReporter, TransportError, UploadRequest, UploadTransport};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("upload queue is closed")]
    Closed,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Snapshot of the queue counters, published after every change.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub batch_id: Option<Uuid>,
    pub uploads_started: usize,
    pub uploads_in_progress: usize,
    pub waiting: usize,
    pub any_failed_uploads: bool,
    pub any_successful_uploads: bool,
    pub batches_completed: usize,
    pub ready_for_processing: bool,
    pub closed: bool,
}

impl QueueStatus {
    pub fn is_settled(&self) -> bool {
        self.waiting == 0 && self.uploads_in_progress == 0
    }
}

#[derive(Debug)]
enum Outcome {
    Succeeded {
        response: ServerResponse,
        overwrite: bool,
    },
    Failed {
        message: String,
        response: Option<ServerResponse>,
    },
    Declined {
        message: String,
    },
    Aborted,
}

impl Outcome {
    fn from_result(result: Result<ServerResponse, TransportError>, overwrite: bool) -> Self {
        match result {
            Ok(response) => Outcome::Succeeded {
                response,
                overwrite,
            },
            Err(e) => Outcome::Failed {
                response: e.response(),
                message: e.to_string(),
            },
        }
    }
}

enum Command {
    Enqueue {
        files: Vec<FileHandle>,
        reply: oneshot::Sender<Vec<usize>>,
    },
    Progress {
        index: usize,
        percent: u8,
    },
    Settled {
        index: usize,
        outcome: Outcome,
    },
    ResolveOverwrite {
        file_name: String,
        reply: oneshot::Sender<bool>,
    },
    OverwriteDecided {
        batch_id: Option<Uuid>,
        decision: bool,
    },
    Cancel {
        index: usize,
        reply: oneshot::Sender<bool>,
    },
    CancelAll {
        reply: oneshot::Sender<usize>,
    },
    Items {
        reply: oneshot::Sender<Vec<UploadItem>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

struct QueueState {
    uploads_started: usize,
    uploads_in_progress: usize,
    waiting: VecDeque<usize>,
    in_flight: HashMap<usize, AbortHandle>,
    // the batch's answer to the overwrite question; asked at most once per batch
    do_overwrite: Option<bool>,
    overwrite_asked: bool,
    overwrite_waiters: Vec<oneshot::Sender<bool>>,
    overwrite_file: Option<String>,
    any_failed_uploads: bool,
    any_successful_uploads: bool,
    batch_open: bool,
    started_notified: bool,
}

impl QueueState {
    fn new() -> Self {
        Self {
            uploads_started: 0,
            uploads_in_progress: 0,
            waiting: VecDeque::new(),
            in_flight: HashMap::new(),
            do_overwrite: None,
            overwrite_asked: false,
            overwrite_waiters: Vec::new(),
            overwrite_file: None,
            any_failed_uploads: false,
            any_successful_uploads: false,
            batch_open: false,
            started_notified: false,
        }
    }
}

/// One admitted upload, run in its own task.
struct UploadJob<T: UploadTransport> {
    index: usize,
    file: FileHandle,
    base_url: Url,
    destination: Destination,
    options: UploadOptions,
    allow_overwrite: bool,
    transport: Arc<T>,
    commands: mpsc::UnboundedSender<Command>,
    progress: ProgressReporter,
}

impl<T: UploadTransport> UploadJob<T> {
    async fn run(self) -> Outcome {
        let mut overwrite = self.options.overwrite;

        if self.allow_overwrite && !overwrite {
            match self.destination.listing_url(&self.base_url) {
                Ok(listing_url) => match self
                    .transport
                    .exists(listing_url, self.file.name.clone())
                    .await
                {
                    Ok(true) => {
                        if !self.confirm_overwrite().await {
                            return self.declined();
                        }
                        overwrite = true;
                    }
                    Ok(false) => {}
                    Err(e) => warn!(
                        "Existence check for '{}' failed, uploading without it: {}",
                        self.file.name, e
                    ),
                },
                Err(e) => warn!("No listing url for '{}': {}", self.file.name, e),
            }
        }

        match self.submit(overwrite).await {
            Err(TransportError::Duplicate { .. }) if self.allow_overwrite && !overwrite => {
                if !self.confirm_overwrite().await {
                    return self.declined();
                }
                info!("Resubmitting '{}' with overwrite=true", self.file.name);
                Outcome::from_result(self.submit(true).await, true)
            }
            result => Outcome::from_result(result, overwrite),
        }
    }

    async fn submit(&self, overwrite: bool) -> Result<ServerResponse, TransportError> {
        let url = self.destination.upload_url(
            &self.base_url,
            &self.file.name,
            &self.options,
            overwrite,
        )?;
        let request = UploadRequest {
            index: self.index,
            url,
            file: self.file.clone(),
            overwrite,
        };
        self.transport.submit(request, self.progress.clone()).await
    }

    /// Asks the dispatcher for the batch's overwrite decision. The prompt
    /// runs outside this job, so aborting the job never cancels it.
    async fn confirm_overwrite(&self) -> bool {
        let (reply, decision) = oneshot::channel();
        let request = Command::ResolveOverwrite {
            file_name: self.file.name.clone(),
            reply,
        };
        if self.commands.send(request).is_err() {
            return false;
        }
        decision.await.unwrap_or(false)
    }

    fn declined(&self) -> Outcome {
        Outcome::Declined {
            message: format!(
                "'{}' already exists on the server and overwrite was declined",
                self.file.name
            ),
        }
    }
}

struct Dispatcher<T: UploadTransport> {
    config: UploadConfig,
    base_url: Url,
    destination: Destination,
    options: UploadOptions,
    transport: Arc<T>,
    events: Arc<dyn UploadEvents>,
    prompt: Arc<dyn OverwritePrompt>,
    prompt_open: bool,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Sender<QueueStatus>,
    items: Vec<UploadItem>,
    pending_files: HashMap<usize, FileHandle>,
    state: QueueState,
    batch_id: Option<Uuid>,
    batches_completed: usize,
    ready_for_processing: bool,
    any_succeeded_overall: bool,
    closed: bool,
}

impl<T: UploadTransport> Dispatcher<T> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Enqueue { files, reply } => {
                    let indices = self.enqueue(files);
                    self.publish();
                    let _ = reply.send(indices);
                }
                Command::Progress { index, percent } => self.progress(index, percent),
                Command::Settled { index, outcome } => {
                    self.settle(index, outcome);
                    self.publish();
                }
                Command::ResolveOverwrite { file_name, reply } => {
                    self.resolve_overwrite(file_name, reply);
                }
                Command::OverwriteDecided { batch_id, decision } => {
                    self.overwrite_decided(batch_id, decision);
                }
                Command::Cancel { index, reply } => {
                    let canceled = self.cancel(index);
                    self.publish();
                    let _ = reply.send(canceled);
                }
                Command::CancelAll { reply } => {
                    let canceled = self.cancel_all();
                    self.publish();
                    let _ = reply.send(canceled);
                }
                Command::Items { reply } => {
                    let _ = reply.send(self.items.clone());
                }
                Command::Close { reply } => {
                    self.close();
                    self.publish();
                    let _ = reply.send(());
                    break;
                }
            }
        }
        debug!("Upload queue dispatcher stopped");
    }

    fn publish(&self) {
        self.status.send_replace(QueueStatus {
            batch_id: self.batch_id,
            uploads_started: self.state.uploads_started,
            uploads_in_progress: self.state.uploads_in_progress,
            waiting: self.state.waiting.len(),
            any_failed_uploads: self.state.any_failed_uploads,
            any_successful_uploads: self.state.any_successful_uploads,
            batches_completed: self.batches_completed,
            ready_for_processing: self.ready_for_processing,
            closed: self.closed,
        });
    }

    fn begin_batch(&mut self) {
        let batch_id = Uuid::new_v4();
        info!("Starting upload batch {}", batch_id);
        self.batch_id = Some(batch_id);
        self.ready_for_processing = false;
        self.state.uploads_started = 0;
        self.state.any_failed_uploads = false;
        self.state.any_successful_uploads = false;
        self.state.do_overwrite = None;
        self.state.overwrite_asked = false;
        self.state.overwrite_waiters.clear();
        self.state.overwrite_file = None;
        self.state.started_notified = false;
        self.state.batch_open = true;
    }

    fn rejection(&self, file: &FileHandle) -> Option<String> {
        if let Err(e) = validate_file_name(&file.name) {
            return Some(e.to_string());
        }
        if !self.config.accepts(&file.mime_type) {
            return Some(format!(
                "file type '{}' of '{}' is not accepted for this upload",
                file.mime_type, file.name
            ));
        }
        None
    }

    fn enqueue(&mut self, files: Vec<FileHandle>) -> Vec<usize> {
        if !self.state.batch_open {
            self.begin_batch();
        }

        let mut indices = Vec::with_capacity(files.len());
        for file in files {
            let index = self.items.len();
            let rejection = self.rejection(&file);
            self.items
                .push(UploadItem::new(index, file.info(), self.destination.template()));
            indices.push(index);

            match rejection {
                Some(message) => {
                    warn!("Rejected '{}' before upload: {}", file.name, message);
                    self.state.any_failed_uploads = true;
                    self.finish_item(index, UploadStatus::Failed, Some(message), None);
                }
                None => {
                    debug!(
                        "Queued '{}' (queue size: {})",
                        file.name,
                        self.state.waiting.len() + 1
                    );
                    self.events.item_changed(&self.items[index]);
                    self.pending_files.insert(index, file);
                    self.state.waiting.push_back(index);
                }
            }
        }

        self.admit();
        self.check_completion();
        indices
    }

    fn admit(&mut self) {
        while self.state.uploads_in_progress < self.config.max_concurrent_uploads {
            let Some(index) = self.state.waiting.pop_front() else {
                break;
            };
            self.start(index);
        }
    }

    fn start(&mut self, index: usize) {
        let Some(file) = self.pending_files.remove(&index) else {
            error!("No file handle for queued item {}", index);
            return;
        };
        if let Err(e) = self.items[index].transition(UploadStatus::InProgress) {
            error!("{}", e);
            return;
        }

        self.state.uploads_in_progress += 1;
        self.state.uploads_started += 1;
        if !self.state.started_notified {
            self.state.started_notified = true;
            self.events.upload_started();
        }
        self.events.item_changed(&self.items[index]);
        info!(
            "Uploading '{}' ({} in progress, {} waiting)",
            file.name,
            self.state.uploads_in_progress,
            self.state.waiting.len()
        );

        let progress_commands = self.commands.clone();
        let job = UploadJob {
            index,
            file,
            base_url: self.base_url.clone(),
            destination: self.destination.clone(),
            options: self.options.clone(),
            allow_overwrite: self.config.allow_overwrite,
            transport: self.transport.clone(),
            commands: self.commands.clone(),
            progress: ProgressReporter::new(move |percent| {
                let _ = progress_commands.send(Command::Progress { index, percent });
            }),
        };

        let (handle, registration) = AbortHandle::new_pair();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let outcome = match Abortable::new(job.run(), registration).await {
                Ok(outcome) => outcome,
                Err(Aborted) => Outcome::Aborted,
            };
            let _ = commands.send(Command::Settled { index, outcome });
        });
        self.state.in_flight.insert(index, handle);
    }

    fn resolve_overwrite(&mut self, file_name: String, reply: oneshot::Sender<bool>) {
        if let Some(decision) = self.state.do_overwrite {
            let _ = reply.send(decision);
            return;
        }

        self.state.overwrite_waiters.push(reply);
        if !self.state.overwrite_asked {
            self.state.overwrite_asked = true;
            self.state.overwrite_file = Some(file_name);
            self.ask_overwrite();
        }
    }

    /// Shows the prompt in a detached task. Only one prompt is ever on
    /// screen; a batch that asks while an earlier batch's prompt is still
    /// open is asked again once that one is answered.
    fn ask_overwrite(&mut self) {
        if self.prompt_open {
            debug!("Overwrite prompt already open, waiting for it");
            return;
        }
        let Some(name) = self.state.overwrite_file.clone() else {
            return;
        };

        let batch_id = self.batch_id;
        self.prompt_open = true;
        let prompt = self.prompt.clone();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            info!(
                "'{}' already exists on the server, asking whether to overwrite",
                name
            );
            let decision = prompt.confirm_overwrite(&name).await;
            let _ = commands.send(Command::OverwriteDecided { batch_id, decision });
        });
    }

    fn overwrite_decided(&mut self, batch_id: Option<Uuid>, decision: bool) {
        self.prompt_open = false;
        if batch_id != self.batch_id {
            debug!("Overwrite answer for an earlier batch ignored");
            if self.state.overwrite_asked && self.state.do_overwrite.is_none() {
                self.ask_overwrite();
            }
            return;
        }

        info!(
            "Overwrite {} for this batch",
            if decision { "confirmed" } else { "declined" }
        );
        self.state.do_overwrite = Some(decision);
        for waiter in self.state.overwrite_waiters.drain(..) {
            let _ = waiter.send(decision);
        }
    }

    fn progress(&mut self, index: usize, percent: u8) {
        if !self.state.in_flight.contains_key(&index) {
            return;
        }
        if let Some(item) = self.items.get_mut(index) {
            let before = item.progress;
            item.set_progress(percent);
            if item.progress != before {
                self.events.item_changed(item);
            }
        }
    }

    fn finish_item(
        &mut self,
        index: usize,
        next: UploadStatus,
        message: Option<String>,
        response: Option<ServerResponse>,
    ) {
        let Some(item) = self.items.get_mut(index) else {
            return;
        };
        if let Err(e) = item.transition(next) {
            error!("{}", e);
            return;
        }
        if message.is_some() {
            item.message = message;
        }
        if response.is_some() {
            item.response = response;
        }
        self.events.item_changed(item);
    }

    fn settle(&mut self, index: usize, outcome: Outcome) {
        if self.state.in_flight.remove(&index).is_none() {
            debug!("Ignoring late result for item {}", index);
            return;
        }
        self.state.uploads_in_progress -= 1;

        match outcome {
            Outcome::Succeeded {
                response,
                overwrite,
            } => {
                self.state.any_successful_uploads = true;
                self.any_succeeded_overall = true;
                if let Some(item) = self.items.get_mut(index) {
                    item.overwrite = overwrite;
                }
                self.finish_item(index, UploadStatus::Succeeded, None, Some(response));
            }
            Outcome::Failed { message, response } => {
                error!("Upload of item {} failed: {}", index, message);
                self.state.any_failed_uploads = true;
                self.finish_item(index, UploadStatus::Failed, Some(message), response);
            }
            Outcome::Declined { message } => {
                info!("{}", message);
                self.state.uploads_started = self.state.uploads_started.saturating_sub(1);
                self.finish_item(index, UploadStatus::Canceled, Some(message), None);
            }
            Outcome::Aborted => {
                self.state.uploads_started = self.state.uploads_started.saturating_sub(1);
                self.finish_item(
                    index,
                    UploadStatus::Canceled,
                    Some("upload canceled".to_string()),
                    None,
                );
            }
        }

        self.admit();
        self.check_completion();
    }

    fn abort_in_flight(&mut self, index: usize, handle: AbortHandle) {
        handle.abort();
        self.state.uploads_in_progress -= 1;
        // an aborted upload counts as neither started nor failed
        self.state.uploads_started = self.state.uploads_started.saturating_sub(1);
        self.finish_item(
            index,
            UploadStatus::Canceled,
            Some("upload canceled".to_string()),
            None,
        );
    }

    fn cancel_waiting(&mut self, index: usize) {
        self.pending_files.remove(&index);
        self.finish_item(
            index,
            UploadStatus::Canceled,
            Some("upload canceled before it started".to_string()),
            None,
        );
    }

    fn cancel(&mut self, index: usize) -> bool {
        if let Some(pos) = self.state.waiting.iter().position(|&i| i == index) {
            self.state.waiting.remove(pos);
            self.cancel_waiting(index);
        } else if let Some(handle) = self.state.in_flight.remove(&index) {
            self.abort_in_flight(index, handle);
            self.admit();
        } else {
            return false;
        }

        info!("Canceled item {}", index);
        self.check_completion();
        true
    }

    fn cancel_all(&mut self) -> usize {
        let mut in_flight: Vec<(usize, AbortHandle)> =
            self.state.in_flight.drain().collect();
        in_flight.sort_by_key(|(index, _)| *index);
        let mut canceled = in_flight.len();
        for (index, handle) in in_flight {
            self.abort_in_flight(index, handle);
        }

        while let Some(index) = self.state.waiting.pop_front() {
            self.cancel_waiting(index);
            canceled += 1;
        }

        if canceled > 0 {
            info!("Canceled {} uploads", canceled);
        }
        self.check_completion();
        canceled
    }

    fn check_completion(&mut self) {
        if !self.state.batch_open
            || !self.state.waiting.is_empty()
            || self.state.uploads_in_progress > 0
        {
            return;
        }

        self.state.batch_open = false;
        self.batches_completed += 1;
        self.ready_for_processing = self.state.uploads_started > 0;

        let batch = self.batch_id.map(|id| id.to_string()).unwrap_or_default();
        if self.state.any_failed_uploads {
            warn!("Upload batch {} finished, some uploads failed", batch);
        } else {
            info!(
                "Upload batch {} finished ({} uploads started)",
                batch, self.state.uploads_started
            );
        }
        self.events.upload_completed(
            self.state.any_failed_uploads,
            self.state.any_successful_uploads,
        );
    }

    fn close(&mut self) {
        self.cancel_all();
        self.events.done(self.any_succeeded_overall);
        self.items.clear();
        self.pending_files.clear();
        self.closed = true;
        info!("Upload queue closed");
    }
}

impl<T: UploadTransport> Drop for Dispatcher<T> {
    fn drop(&mut self) {
        for handle in self.state.in_flight.values() {
            handle.abort();
        }
    }
}

/// Handle to one upload queue. Each instance owns its own state; there is
/// no process-wide uploader.
pub struct UploadQueueManager {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<QueueStatus>,
    dispatcher: JoinHandle<()>,
    concurrency_warning: Option<String>,
}

impl UploadQueueManager {
    /// Validates the configuration and starts the dispatcher. Must be
    /// called from within a tokio runtime.
    pub fn new<T: UploadTransport>(
        config: UploadConfig,
        transport: T,
        events: Arc<dyn UploadEvents>,
        prompt: Arc<dyn OverwritePrompt>,
    ) -> Result<Self, QueueError> {
        config.validate()?;
        let base_url =
            Url::parse(&config.server_url).map_err(|e| ConfigError::InvalidServerUrl {
                url: config.server_url.clone(),
                reason: e.to_string(),
            })?;

        let (commands, receiver) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(QueueStatus::default());
        let concurrency_warning = config.concurrency_warning();

        let dispatcher = Dispatcher {
            base_url,
            destination: Destination::new(config.destination.clone()),
            options: config.effective_options(),
            config,
            transport: Arc::new(transport),
            events,
            prompt,
            prompt_open: false,
            commands: commands.clone(),
            status: status_tx,
            items: Vec::new(),
            pending_files: HashMap::new(),
            state: QueueState::new(),
            batch_id: None,
            batches_completed: 0,
            ready_for_processing: false,
            any_succeeded_overall: false,
            closed: false,
        };
        let dispatcher = tokio::spawn(dispatcher.run(receiver));

        Ok(Self {
            commands,
            status,
            dispatcher,
            concurrency_warning,
        })
    }

    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, QueueError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| QueueError::Closed)?;
        response.await.map_err(|_| QueueError::Closed)
    }

    /// Adds files to the current batch, or opens a new one. Returns the
    /// index assigned to each file, in order.
    pub async fn enqueue(&self, files: Vec<FileHandle>) -> Result<Vec<usize>, QueueError> {
        self.request(|reply| Command::Enqueue { files, reply }).await
    }

    pub async fn cancel(&self, index: usize) -> Result<bool, QueueError> {
        self.request(|reply| Command::Cancel { index, reply }).await
    }

    /// Aborts every in-flight upload and drops everything still waiting.
    pub async fn cancel_all(&self) -> Result<usize, QueueError> {
        self.request(|reply| Command::CancelAll { reply }).await
    }

    pub async fn items(&self) -> Result<Vec<UploadItem>, QueueError> {
        self.request(|reply| Command::Items { reply }).await
    }

    pub fn status(&self) -> QueueStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueStatus> {
        self.status.clone()
    }

    pub fn ready_for_processing(&self) -> bool {
        self.status.borrow().ready_for_processing
    }

    pub fn concurrency_warning(&self) -> Option<&str> {
        self.concurrency_warning.as_deref()
    }

    pub async fn wait_until_settled(&self) -> Result<QueueStatus, QueueError> {
        let mut status = self.status.clone();
        loop {
            {
                let current = status.borrow_and_update();
                if current.is_settled() {
                    return Ok(current.clone());
                }
            }
            status.changed().await.map_err(|_| QueueError::Closed)?;
        }
    }

    /// Tears the queue down: aborts what is running, fires `done` and
    /// releases the retained responses.
    pub async fn close(&self) -> Result<(), QueueError> {
        self.request(|reply| Command::Close { reply }).await
    }
}

impl Drop for UploadQueueManager {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}
