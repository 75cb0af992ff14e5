use crate::config::{Config, ScorerKind};
use chrono::{Local, NaiveDateTime};
use image::RgbImage;
use rollcall_core::detector::DetectorError;
use rollcall_core::store::memory::{MemorySamples, MemoryStore};
use rollcall_core::{
    AttendanceController, AttendanceEvent, AttendanceLog, Cooldown, DetectionPipeline, EmbeddingScorer,
    EnrollError, EnrollRequest, EventQuery, FaceLocator, FaceSample, FaceScorer, Gallery, GalleryStore,
    HistogramScorer, Identity, Matcher, Outcome, SampleStore, ScorerError, ScrfdLocator, State, StoreError,
};
use rollcall_hw::{Camera, CameraError, FrameStream};
use rollcall_store::{FsSampleStore, SqliteStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("scorer error: {0}")]
    Scorer(#[from] ScorerError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error("no usable frame from camera")]
    NoFrame,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Identity and attendance tables behind one shared handle.
pub trait Records: GalleryStore + AttendanceLog + Send + Sync {}
impl<T: GalleryStore + AttendanceLog + Send + Sync> Records for T {}

type SharedRecords = Arc<dyn Records>;

/// Snapshot of engine state for `Status`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub version: &'static str,
    pub state: State,
    pub camera: String,
    pub scorer: String,
    pub threshold: f32,
    pub enrolled: usize,
    pub cooldown_scope: rollcall_core::CooldownScope,
    pub cooldown_secs: i64,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Start,
    Stop,
    Enroll {
        request: EnrollRequest,
        reply: oneshot::Sender<Result<Identity, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    Records {
        query: EventQuery,
        reply: oneshot::Sender<Result<Vec<AttendanceEvent>, EngineError>>,
    },
    Identities {
        reply: oneshot::Sender<Result<Vec<Identity>, EngineError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Option<RgbImage>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    outcomes: broadcast::Sender<Outcome>,
}

impl EngineHandle {
    /// Receive every outcome produced from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Outcome> {
        self.outcomes.subscribe()
    }

    pub async fn start(&self) -> Result<(), EngineError> {
        self.send(EngineRequest::Start).await
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        self.send(EngineRequest::Stop).await
    }

    /// Enroll from the next usable camera frame.
    pub async fn enroll(&self, request: EnrollRequest) -> Result<Identity, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Enroll { request, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Status { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn records(&self, query: EventQuery) -> Result<Vec<AttendanceEvent>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Records { query, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn identities(&self) -> Result<Vec<Identity>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Identities { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Latest annotated frame, if any frame has been processed yet.
    pub async fn snapshot(&self) -> Result<Option<RgbImage>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Snapshot { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    async fn send(&self, request: EngineRequest) -> Result<(), EngineError> {
        self.tx.send(request).await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Where the engine pulls frames from. `None` is an empty tick.
trait FrameSource {
    fn grab(&mut self) -> Option<FaceSample>;
}

impl FrameSource for FrameStream<'_> {
    fn grab(&mut self) -> Option<FaceSample> {
        match self.next_frame() {
            Ok(frame) if frame.is_dark => None,
            Ok(frame) => frame.into_image(),
            Err(err) => {
                tracing::warn!(error = %err, "frame acquisition failed");
                None
            }
        }
    }
}

/// Everything the engine thread owns.
struct Engine<D: FaceLocator> {
    pipeline: DetectionPipeline<D, SharedRecords>,
    records: SharedRecords,
    samples: Box<dyn SampleStore + Send>,
    outcomes: broadcast::Sender<Outcome>,
    latest: Option<RgbImage>,
    camera: String,
}

impl<D: FaceLocator> Engine<D> {
    fn new(
        locator: D,
        mut matcher: Matcher,
        cooldown: Cooldown,
        records: SharedRecords,
        samples: Box<dyn SampleStore + Send>,
        outcomes: broadcast::Sender<Outcome>,
        camera: String,
    ) -> Result<Self, EngineError> {
        let gallery = Gallery::load(&records, &*samples, matcher.scorer_mut())?;
        tracing::info!(enrolled = gallery.len(), scorer = matcher.scorer_name(), "gallery loaded");
        let controller = AttendanceController::new(records.clone(), cooldown);
        Ok(Self {
            pipeline: DetectionPipeline::new(locator, matcher, controller, gallery),
            records,
            samples,
            outcomes,
            latest: None,
            camera,
        })
    }

    /// Apply one control request.
    fn handle(&mut self, request: EngineRequest, source: &mut dyn FrameSource) {
        match request {
            EngineRequest::Start => self.pipeline.start(),
            EngineRequest::Stop => self.pipeline.stop(),
            EngineRequest::Enroll { request, reply } => {
                let result = match source.grab() {
                    Some(frame) => self.enroll(request, &frame),
                    None => Err(EngineError::NoFrame),
                };
                let _ = reply.send(result);
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
            EngineRequest::Records { query, reply } => {
                let _ = reply.send(self.records.events(&query).map_err(EngineError::from));
            }
            EngineRequest::Identities { reply } => {
                let _ = reply.send(self.records.identities().map_err(EngineError::from));
            }
            EngineRequest::Snapshot { reply } => {
                let _ = reply.send(self.latest.clone());
            }
        }
    }

    /// Enroll from `frame`, then swap in a rebuilt gallery.
    fn enroll(&mut self, request: EnrollRequest, frame: &FaceSample) -> Result<Identity, EngineError> {
        let (locator, matcher) = self.pipeline.parts_mut();
        let identity = rollcall_core::enroll(locator, &self.records, &*self.samples, request, frame)?;

        match Gallery::load(&self.records, &*self.samples, matcher.scorer_mut()) {
            Ok(gallery) => self.pipeline.set_gallery(gallery),
            Err(err) => {
                tracing::warn!(error = %err, "gallery reload failed; keeping previous snapshot");
            }
        }
        Ok(identity)
    }

    fn status(&self) -> EngineStatus {
        let cooldown = self.pipeline.controller().cooldown();
        EngineStatus {
            version: env!("CARGO_PKG_VERSION"),
            state: self.pipeline.state(),
            camera: self.camera.clone(),
            scorer: self.pipeline.matcher().scorer_name().to_string(),
            threshold: self.pipeline.matcher().threshold(),
            enrolled: self.pipeline.gallery().len(),
            cooldown_scope: cooldown.scope(),
            cooldown_secs: cooldown.interval().num_seconds(),
        }
    }

    /// Run one frame through the pipeline and publish what it produced.
    fn tick(&mut self, frame: Option<&FaceSample>, now: NaiveDateTime) {
        let Some(tick) = self.pipeline.on_frame(frame, now) else {
            return;
        };
        for outcome in tick.outcomes {
            match &outcome {
                Outcome::Recorded(event) => {
                    tracing::info!(employee_id = %event.employee_id, name = %event.name, "attendance recorded")
                }
                Outcome::LogFailed { employee_id, reason } => {
                    tracing::warn!(%employee_id, %reason, "attendance write failed")
                }
                other => tracing::debug!(outcome = ?other, "face processed"),
            }
            // No subscribers is fine.
            let _ = self.outcomes.send(outcome);
        }
        self.latest = Some(tick.annotated);
    }

    /// Drain queued requests. Returns false once every handle is gone.
    fn drain(&mut self, rx: &mut mpsc::Receiver<EngineRequest>, source: &mut dyn FrameSource) -> bool {
        loop {
            match rx.try_recv() {
                Ok(request) => self.handle(request, source),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }
}

fn load_scorer(config: &Config) -> Result<Box<dyn FaceScorer>, EngineError> {
    Ok(match config.scorer {
        ScorerKind::Histogram => Box::new(HistogramScorer),
        ScorerKind::Embedding => {
            let path = config.arcface_model_path();
            let scorer = EmbeddingScorer::load(&path)?;
            tracing::info!(path = %path, "ArcFace recognizer loaded");
            Box::new(scorer)
        }
    })
}

fn open_stores(config: &Config) -> Result<(SharedRecords, Box<dyn SampleStore + Send>), EngineError> {
    if config.ephemeral {
        tracing::warn!("ephemeral mode: identities and attendance are kept in memory only");
        return Ok((Arc::new(MemoryStore::new()), Box::new(MemorySamples::new())));
    }
    let records = SqliteStore::open(&config.db_path)?;
    let samples = FsSampleStore::open(&config.samples_dir)?;
    Ok((Arc::new(records), Box::new(samples)))
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the camera, loads the models and stores, and builds the gallery
/// before returning, so startup fails fast if any resource is unavailable.
/// The thread then discards warmup frames and runs the tick loop until
/// every handle is dropped.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let camera = Camera::open(&config.camera_device)?;

    let scrfd_path = config.scrfd_model_path();
    let locator = ScrfdLocator::load(&scrfd_path)?;
    tracing::info!(path = %scrfd_path, "SCRFD detector loaded");

    let scorer = load_scorer(config)?;
    let matcher = match config.match_threshold {
        Some(threshold) => Matcher::with_threshold(scorer, threshold),
        None => Matcher::new(scorer),
    };
    let cooldown = Cooldown::new(config.cooldown_scope, chrono::Duration::seconds(config.cooldown_secs));

    let (records, samples) = open_stores(config)?;
    let (outcomes, _) = broadcast::channel(64);
    let mut engine = Engine::new(
        locator,
        matcher,
        cooldown,
        records,
        samples,
        outcomes.clone(),
        config.camera_device.clone(),
    )?;

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);
    let tick = Duration::from_millis(config.tick_ms);
    let warmup_frames = config.warmup_frames;

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            let mut stream = match camera.stream() {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::error!(error = %err, "failed to start capture; engine exiting");
                    return;
                }
            };

            if warmup_frames > 0 {
                tracing::info!(count = warmup_frames, "discarding warmup frames");
                for _ in 0..warmup_frames {
                    let _ = stream.next_frame();
                }
            }

            tracing::info!(tick_ms = tick.as_millis() as u64, "engine loop started");
            loop {
                let started = Instant::now();
                if !engine.drain(&mut rx, &mut stream) {
                    break;
                }
                let frame = stream.grab();
                engine.tick(frame.as_ref(), Local::now().naive_local());

                if let Some(rest) = tick.checked_sub(started.elapsed()) {
                    std::thread::sleep(rest);
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, outcomes })
}
