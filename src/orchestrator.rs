//! Background conversion orchestration.
//!
//! The conversion engine is an external collaborator reached through one
//! blocking call. The orchestrator runs that call on a dedicated worker
//! thread, wires a [`ProgressInterceptor`] in as the call's text sink, and
//! forwards lifecycle events over the session's [`EventChannel`]. One
//! session at a time; cancellation is cooperative and never interrupts the
//! engine call itself.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use serde::Serialize;
use thiserror::Error;

use crate::events::{EventChannel, EventSender, FailureDetail, OrchestrationEvent};
use crate::progress::{ProgressInterceptor, TextSink};

/// Bounds of the speed multiplier exposed to the user.
pub const SPEED_MIN: f64 = 0.5;
pub const SPEED_MAX: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutputFormat {
    Mp3,
    Wav,
    M4a,
    M4b,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::M4a => "m4a",
            Self::M4b => "m4b",
        }
    }
}

/// Per-character voice assignment options.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CharacterVoiceOptions {
    /// Optional mapping file; omitted when voices are assigned automatically.
    pub config: Option<PathBuf>,
    pub auto_assign: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProgressStyle {
    None,
    Simple,
    Timeseries,
}

/// Immutable description of one conversion. Built once by the caller and
/// consumed exactly once by [`Orchestrator::submit`].
#[derive(Debug, Clone, Serialize)]
pub struct ConversionRequest {
    input: PathBuf,
    output_dir: PathBuf,
    voice: String,
    speed: f64,
    format: OutputFormat,
    character_voices: Option<CharacterVoiceOptions>,
    progress_style: ProgressStyle,
    debug: bool,
}

impl ConversionRequest {
    pub fn new(
        input: PathBuf,
        output_dir: PathBuf,
        voice: impl Into<String>,
        speed: f64,
        format: OutputFormat,
    ) -> Self {
        Self {
            input,
            output_dir,
            voice: voice.into(),
            speed: speed.clamp(SPEED_MIN, SPEED_MAX),
            format,
            character_voices: None,
            progress_style: ProgressStyle::None,
            debug: false,
        }
    }

    pub fn with_character_voices(mut self, options: CharacterVoiceOptions) -> Self {
        self.character_voices = Some(options);
        self
    }

    pub fn with_progress_style(mut self, style: ProgressStyle) -> Self {
        self.progress_style = style;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn input(&self) -> &PathBuf {
        &self.input
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn debug(&self) -> bool {
        self.debug
    }
}

/// The exact option set handed to the engine's blocking entry point,
/// carried over from the request verbatim.
#[derive(Debug, Clone, Serialize)]
pub struct EngineInvocation {
    pub file_path: PathBuf,
    pub voice: String,
    pub speed: f64,
    pub output_format: OutputFormat,
    pub output_dir: PathBuf,
    pub character_voices: bool,
    pub character_config: Option<PathBuf>,
    pub auto_assign: bool,
    pub progress_style: ProgressStyle,
}

impl EngineInvocation {
    fn from_request(request: &ConversionRequest) -> Self {
        let (character_voices, character_config, auto_assign) = match &request.character_voices {
            Some(options) => (true, options.config.clone(), options.auto_assign),
            None => (false, None, false),
        };
        // Timeseries output interleaves badly with sink capture; anything
        // beyond "none" is downgraded to the simple style.
        let progress_style = match request.progress_style {
            ProgressStyle::None => ProgressStyle::None,
            _ => ProgressStyle::Simple,
        };
        Self {
            file_path: request.input.clone(),
            voice: request.voice.clone(),
            speed: request.speed,
            output_format: request.format,
            output_dir: request.output_dir.clone(),
            character_voices,
            character_config,
            auto_assign,
            progress_style,
        }
    }
}

/// Failure raised by the engine call.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
    pub trace: Option<String>,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

/// The external engine's single blocking entry point. Its only observable
/// side effect relevant here is the text it writes to `output`.
pub trait ConversionEngine: Send + Sync {
    fn convert(
        &self,
        invocation: &EngineInvocation,
        output: &mut dyn TextSink,
    ) -> Result<PathBuf, EngineError>;
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("a conversion is already running")]
    AlreadyRunning,
}

impl OrchestratorError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "A conversion is already running. Wait for it to finish.",
        }
    }
}

/// Owns at most one background worker per session.
pub struct Orchestrator {
    engine: Arc<dyn ConversionEngine>,
    active: Arc<AtomicBool>,
    cancel_requested: Arc<AtomicBool>,
    /// Publish slot for `cancel`. The worker empties it before its terminal
    /// event, so nothing can be published into a session after
    /// `Complete`/`Failed`.
    sender: Arc<Mutex<Option<EventSender>>>,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn ConversionEngine>) -> Self {
        Self {
            engine,
            active: Arc::new(AtomicBool::new(false)),
            cancel_requested: Arc::new(AtomicBool::new(false)),
            sender: Arc::new(Mutex::new(None)),
        }
    }

    /// `true` from the moment a submit is accepted until the worker has
    /// published that session's terminal event.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Starts a worker for `request` and returns the session's event
    /// channel. Rejected without starting anything while a session is
    /// still active.
    pub fn submit(&self, request: ConversionRequest) -> Result<EventChannel, OrchestratorError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(OrchestratorError::AlreadyRunning);
        }
        self.cancel_requested.store(false, Ordering::SeqCst);

        let channel = EventChannel::new();
        let sender = channel.sender();
        if let Ok(mut guard) = self.sender.lock() {
            *guard = Some(sender.clone());
        }

        let engine = Arc::clone(&self.engine);
        let active = Arc::clone(&self.active);
        let cancel = Arc::clone(&self.cancel_requested);
        let slot = Arc::clone(&self.sender);
        thread::spawn(move || run_worker(engine, request, sender, slot, active, cancel));

        Ok(channel)
    }

    /// Cooperative pause. The in-flight engine call is opaque and keeps
    /// running; the guarantee is that no further submits are accepted
    /// until it terminates naturally and that the consumer is told.
    pub fn cancel(&self) {
        if !self.is_active() {
            return;
        }
        if self.cancel_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("Pause requested for the active conversion");
        // Only while the slot is occupied; once the worker has claimed it
        // the session belongs to the terminal event alone.
        if let Ok(guard) = self.sender.lock() {
            if let Some(sender) = guard.as_ref() {
                sender.publish(OrchestrationEvent::Debug(
                    "Pause requested. The conversion will stop after the engine finishes its current run."
                        .to_string(),
                ));
            }
        }
    }
}

fn run_worker(
    engine: Arc<dyn ConversionEngine>,
    request: ConversionRequest,
    sender: EventSender,
    slot: Arc<Mutex<Option<EventSender>>>,
    active: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
) {
    let invocation = EngineInvocation::from_request(&request);
    log::info!(
        "Conversion started: {} (voice {}, {:.1}x, {})",
        invocation.file_path.display(),
        invocation.voice,
        invocation.speed,
        invocation.output_format.as_str()
    );
    sender.publish(OrchestrationEvent::Debug(format!(
        "Converting {} with voice {} at {:.1}x to {}",
        invocation.file_path.display(),
        invocation.voice,
        invocation.speed,
        invocation.output_format.as_str()
    )));

    let mut interceptor = ProgressInterceptor::new(sender.clone());
    let result = engine.convert(&invocation, &mut interceptor);

    if cancel.load(Ordering::SeqCst) {
        log::info!("Engine call returned after a pause request");
    }

    // Claim the publish slot before the terminal event. A cancel arriving
    // from here on finds the slot empty and publishes nothing.
    if let Ok(mut guard) = slot.lock() {
        guard.take();
    }

    match result {
        Ok(output) => {
            log::info!("Conversion complete: {}", output.display());
            sender.publish(OrchestrationEvent::Progress(interceptor.snapshot()));
            sender.publish(OrchestrationEvent::Complete(output));
        }
        Err(err) => {
            log::error!("Conversion failed: {err}");
            let trace = if request.debug() { err.trace.clone() } else { None };
            sender.publish(OrchestrationEvent::Failed(FailureDetail {
                summary: err.message.clone(),
                trace,
            }));
        }
    }

    // Re-arm only once the terminal event is on the channel, so a consumer
    // observing `is_active() == false` can always drain the full session.
    active.store(false, Ordering::SeqCst);
}
