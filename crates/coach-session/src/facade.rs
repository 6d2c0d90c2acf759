//! Async service object around a [`ModelSession`].
//!
//! The session lives on a dedicated OS thread so blocking loads and decodes
//! never stall the caller's runtime.
//!
//! ```text
//!  caller (async)                          "coach-inference" thread
//!  ──────────────   Command (mpsc, FIFO)   ─────────────────────────
//!  generate()    ───────────────────────>  ModelSession::generate
//!                <─── oneshot reply ─────
//!  status()      <─── watch<FacadeStatus>  load progress, flags, errors
//! ```

use std::any::Any;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use coach_model::{GgufLoader, ModelLoader};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::SessionConfig;
use crate::error::{InferenceError, Result};
use crate::prompt::PromptBuilder;
use crate::session::{FinishReason, Generation, ModelSession};

/// Shown to the user when no reply can be produced.
pub const UNAVAILABLE_MESSAGE: &str = "AI is unavailable right now. Please try again.";

/// Observable state published by the worker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacadeStatus {
    pub is_model_loaded: bool,
    pub is_generating: bool,
    pub loading_progress: f32,
    pub loading_status: String,
    /// Message of the most recent failure; cleared by a successful load.
    pub last_error: Option<String>,
}

enum Command {
    Load {
        reply: oneshot::Sender<Result<()>>,
    },
    Generate {
        prompt: String,
        cancel: CancellationToken,
        reply: oneshot::Sender<Result<Generation>>,
    },
    Unload {
        reply: oneshot::Sender<()>,
    },
}

/// Generations queued or running; decremented when the caller is done
/// waiting, even if its future is dropped.
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Explicitly constructed inference service. One per application.
pub struct InferenceFacade {
    commands: Option<mpsc::UnboundedSender<Command>>,
    status: watch::Receiver<FacadeStatus>,
    /// Token of the generation currently running on the worker.
    active: Arc<Mutex<Option<CancellationToken>>>,
    pending: Arc<AtomicUsize>,
    system_instruction: String,
    worker: Option<thread::JoinHandle<()>>,
}

impl InferenceFacade {
    /// Starts the worker with the GGUF loader.
    pub fn spawn(config: SessionConfig) -> io::Result<Self> {
        Self::spawn_with_loader(config, Arc::new(GgufLoader))
    }

    pub fn spawn_with_loader(config: SessionConfig, loader: Arc<dyn ModelLoader>) -> io::Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(FacadeStatus::default());
        let active = Arc::new(Mutex::new(None));
        let system_instruction = config.system_instruction.clone();

        let session = ModelSession::with_loader(config, loader);
        let worker_active = Arc::clone(&active);
        let worker = thread::Builder::new()
            .name("coach-inference".into())
            .spawn(move || worker_loop(session, cmd_rx, status_tx, worker_active))?;

        Ok(Self {
            commands: Some(cmd_tx),
            status: status_rx,
            active,
            pending: Arc::new(AtomicUsize::new(0)),
            system_instruction,
            worker: Some(worker),
        })
    }

    /// Loads the model unless it is already loaded.
    pub async fn load_if_needed(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Load { reply })?;
        rx.await.map_err(|_| InferenceError::WorkerGone)?
    }

    /// Builds the coaching prompt and generates a reply, loading the model
    /// first if needed. Queues behind any call already in flight.
    pub async fn generate(&self, user_text: &str, health_context: &str) -> Result<Generation> {
        self.generate_with(user_text, health_context, CancellationToken::new())
            .await
    }

    /// Like [`generate`](Self::generate) with a caller-owned token.
    ///
    /// Dropping the returned future cancels `cancel`, so an abandoned call
    /// stops at its next token boundary instead of holding up the queue.
    pub async fn generate_with(
        &self,
        user_text: &str,
        health_context: &str,
        cancel: CancellationToken,
    ) -> Result<Generation> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let guard = PendingGuard(Arc::clone(&self.pending));
        self.submit(user_text, health_context, cancel, guard).await
    }

    /// Rejects with [`InferenceError::Busy`] instead of queueing.
    pub async fn try_generate(&self, user_text: &str, health_context: &str) -> Result<Generation> {
        if self
            .pending
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(InferenceError::Busy);
        }
        let guard = PendingGuard(Arc::clone(&self.pending));
        self.submit(user_text, health_context, CancellationToken::new(), guard)
            .await
    }

    async fn submit(
        &self,
        user_text: &str,
        health_context: &str,
        cancel: CancellationToken,
        _guard: PendingGuard,
    ) -> Result<Generation> {
        let prompt = PromptBuilder::build(&self.system_instruction, health_context, user_text);
        let (reply, rx) = oneshot::channel();
        let token = cancel.clone();
        self.send(Command::Generate {
            prompt,
            cancel,
            reply,
        })?;
        let abandon = token.drop_guard();
        let result = rx.await.map_err(|_| InferenceError::WorkerGone);
        abandon.disarm();
        result?
    }

    /// Reply text for the UI. Failures become [`UNAVAILABLE_MESSAGE`],
    /// cancellation an empty string.
    pub async fn reply(&self, user_text: &str, health_context: &str) -> String {
        match self.generate(user_text, health_context).await {
            Ok(g) if g.text.is_empty() && matches!(g.finish, FinishReason::Aborted(_)) => {
                UNAVAILABLE_MESSAGE.to_string()
            }
            Ok(g) => g.text,
            Err(InferenceError::Cancelled) => String::new(),
            Err(_) => UNAVAILABLE_MESSAGE.to_string(),
        }
    }

    /// Stops the running generation at its next token boundary.
    pub fn cancel(&self) {
        if let Ok(active) = self.active.lock() {
            if let Some(token) = active.as_ref() {
                token.cancel();
            }
        }
    }

    /// Releases the model. Queued behind in-flight work.
    pub async fn unload(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Unload { reply })?;
        rx.await.map_err(|_| InferenceError::WorkerGone)
    }

    pub fn status(&self) -> FacadeStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FacadeStatus> {
        self.status.clone()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .as_ref()
            .ok_or(InferenceError::WorkerGone)?
            .send(command)
            .map_err(|_| InferenceError::WorkerGone)
    }
}

impl Drop for InferenceFacade {
    fn drop(&mut self) {
        self.cancel();
        // Closing the channel ends the worker loop once queued work drains.
        self.commands.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    mut session: ModelSession,
    mut commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<FacadeStatus>,
    active: Arc<Mutex<Option<CancellationToken>>>,
) {
    info!("inference worker started");
    while let Some(command) = commands.blocking_recv() {
        match command {
            Command::Load { reply } => {
                let result = load(&mut session, &status);
                let _ = reply.send(result);
            }
            Command::Generate { reply, .. } if reply.is_closed() => {
                debug!("skipping abandoned generation");
            }
            Command::Generate {
                prompt,
                cancel,
                reply,
            } => {
                set_active(&active, Some(cancel.clone()));
                status.send_modify(|s| s.is_generating = true);

                let result = load(&mut session, &status).and_then(|()| {
                    guarded(&mut session, InferenceError::DecodeStep, |session| {
                        session.generate(&prompt, &cancel)
                    })
                });

                set_active(&active, None);
                let is_loaded = session.is_loaded();
                status.send_modify(|s| {
                    s.is_generating = false;
                    s.is_model_loaded = is_loaded;
                    if let Err(e) = &result {
                        if *e != InferenceError::Cancelled {
                            s.last_error = Some(e.to_string());
                        }
                    }
                });
                let _ = reply.send(result);
            }
            Command::Unload { reply } => {
                session.unload();
                status.send_modify(|s| {
                    s.is_model_loaded = false;
                    s.loading_progress = 0.0;
                    s.loading_status.clear();
                });
                let _ = reply.send(());
            }
        }
    }

    session.unload();
    debug!("inference worker stopped");
}

fn load(session: &mut ModelSession, status: &watch::Sender<FacadeStatus>) -> Result<()> {
    if session.is_loaded() {
        return Ok(());
    }

    let result = guarded(session, InferenceError::ModelLoad, |session| {
        session.load_if_needed(&mut |progress, message| {
            status.send_modify(|s| {
                s.loading_progress = progress;
                s.loading_status = message.to_string();
            });
        })
    });
    status.send_modify(|s| match &result {
        Ok(()) => {
            s.is_model_loaded = true;
            s.last_error = None;
        }
        Err(e) => {
            s.is_model_loaded = false;
            s.last_error = Some(e.to_string());
            s.loading_status = "Failed".to_string();
        }
    });
    result
}

/// Runs `f` on the session, turning a panic into `to_error(message)`. The
/// session is unloaded afterwards since its state is unknown; the next call
/// loads again.
fn guarded<T>(
    session: &mut ModelSession,
    to_error: fn(String) -> InferenceError,
    f: impl FnOnce(&mut ModelSession) -> Result<T>,
) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(|| f(&mut *session))) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(&*payload);
            error!(%message, "inference worker recovered from a panic");
            session.unload();
            Err(to_error(format!("internal error: {message}")))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

fn set_active(active: &Mutex<Option<CancellationToken>>, token: Option<CancellationToken>) {
    if let Ok(mut slot) = active.lock() {
        *slot = token;
    }
}
