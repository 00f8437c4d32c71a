//! Media Streamer
//!
//! Acquires the camera, picks an encoding format and forwards encoded chunks
//! to one consumer in production order. Empty chunks are never forwarded.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::lock;
use crate::error::CaptureError;

/// Encoding preferences, best first.
pub const DEFAULT_FORMATS: [&str; 4] = [
    "video/webm;codecs=vp9",
    "video/webm;codecs=vp8",
    "video/webm",
    "video/mp4",
];

/// Streamer configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaConfig {
    /// Ideal capture width.
    pub width: u32,
    /// Ideal capture height.
    pub height: u32,
    /// Chunk cadence.
    pub timeslice: Duration,
    /// Ordered container/codec preferences.
    pub formats: Vec<String>,
    /// Capacity of the chunk queue. Producers wait when it is full.
    pub queue_capacity: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            timeslice: Duration::from_millis(250),
            formats: DEFAULT_FORMATS.iter().map(|f| f.to_string()).collect(),
            queue_capacity: 64,
        }
    }
}

/// What to ask the camera for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    /// Ideal width.
    pub width: u32,
    /// Ideal height.
    pub height: u32,
    /// Capture audio as well. Always `false` here.
    pub audio: bool,
}

/// One encoded chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    /// Encoded bytes.
    pub data: Vec<u8>,
    /// Wall-clock production time (epoch ms).
    pub produced_at: i64,
}

impl MediaChunk {
    /// Byte length.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Read-only handle to the live feed for local preview.
#[derive(Debug, Clone)]
pub struct PreviewStream {
    label: String,
    width: u32,
    height: u32,
    live: Arc<AtomicBool>,
}

impl PreviewStream {
    /// Create a preview handle. `live` is cleared when the feed is released.
    pub fn new(label: impl Into<String>, width: u32, height: u32, live: Arc<AtomicBool>) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            live,
        }
    }

    /// Device label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Actual resolution.
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Whether the underlying tracks are still running.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// An acquired camera feed.
pub trait CameraFeed: Send {
    /// Preview side channel.
    fn preview(&self) -> PreviewStream;

    /// Start encoding. The receiver yields one chunk per `timeslice`, possibly
    /// empty, each stamped when the encoder produced it.
    fn record(&mut self, format: Option<&str>, timeslice: Duration) -> mpsc::Receiver<MediaChunk>;

    /// Stop encoding and release the device and its tracks. Idempotent.
    fn release(&mut self);
}

/// Platform camera.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    /// Whether the encoder supports `mime`.
    fn is_format_supported(&self, mime: &str) -> bool;

    /// Acquire the camera. Errors carry the platform's reason.
    async fn acquire(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<Box<dyn CameraFeed>, CaptureError>;
}

/// First supported format from `preferences`, or `None` for the platform default.
pub fn select_format<F>(preferences: &[String], supported: F) -> Option<String>
where
    F: Fn(&str) -> bool,
{
    preferences.iter().find(|f| supported(f.as_str())).cloned()
}

/// Camera capture and chunked encoding.
pub struct MediaStreamer {
    device: Arc<dyn CameraDevice>,
    config: MediaConfig,
    feed: Option<Box<dyn CameraFeed>>,
    format: Option<String>,
    consumer: Arc<Mutex<Option<mpsc::Sender<MediaChunk>>>>,
    task: Option<JoinHandle<()>>,
}

impl MediaStreamer {
    /// Create a streamer over `device`.
    pub fn new(device: Arc<dyn CameraDevice>, config: MediaConfig) -> Self {
        Self {
            device,
            config,
            feed: None,
            format: None,
            consumer: Arc::new(Mutex::new(None)),
            task: None,
        }
    }

    /// Acquire the camera at the configured resolution, without audio.
    pub async fn initialize(&mut self) -> Result<(), CaptureError> {
        if self.feed.is_some() {
            return Ok(());
        }

        let constraints = CaptureConstraints {
            width: self.config.width,
            height: self.config.height,
            audio: false,
        };

        let feed = match self.device.acquire(constraints).await {
            Ok(feed) => feed,
            Err(CaptureError::CameraUnavailable { reason }) => {
                warn!("Camera unavailable: {}", reason);
                return Err(CaptureError::CameraUnavailable { reason });
            }
            Err(other) => {
                warn!("Camera unavailable: {}", other);
                return Err(CaptureError::CameraUnavailable {
                    reason: other.to_string(),
                });
            }
        };

        let device = self.device.clone();
        self.format = select_format(&self.config.formats, |f| device.is_format_supported(f));
        match &self.format {
            Some(format) => info!("Camera ready, encoding as {}", format),
            None => info!("Camera ready, no preferred format supported; using platform default"),
        }

        self.feed = Some(feed);
        Ok(())
    }

    /// Selected encoding format. `None` means platform default.
    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    /// Whether [`initialize`](Self::initialize) succeeded and the feed is held.
    pub fn is_initialized(&self) -> bool {
        self.feed.is_some()
    }

    /// Whether chunks are being produced.
    pub fn is_streaming(&self) -> bool {
        self.task.is_some()
    }

    /// Register the chunk consumer, replacing any previous one.
    pub fn on_chunk(&mut self) -> mpsc::Receiver<MediaChunk> {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        *lock(&self.consumer) = Some(tx);
        rx
    }

    /// Live feed for local preview.
    pub fn get_stream(&self) -> Option<PreviewStream> {
        self.feed.as_ref().map(|feed| feed.preview())
    }

    /// Begin producing chunks.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.task.is_some() {
            return Ok(());
        }

        let Some(feed) = self.feed.as_mut() else {
            return Err(CaptureError::NotInitialized("start"));
        };

        let encoded = feed.record(self.format.as_deref(), self.config.timeslice);
        self.task = Some(tokio::spawn(forward_chunks(encoded, self.consumer.clone())));

        info!("Media streaming started ({:?} chunks)", self.config.timeslice);
        Ok(())
    }

    /// Stop producing and release the camera. Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Media streaming stopped");
        }
        if let Some(mut feed) = self.feed.take() {
            feed.release();
            debug!("Camera released");
        }
    }
}

impl Drop for MediaStreamer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn forward_chunks(
    mut encoded: mpsc::Receiver<MediaChunk>,
    consumer: Arc<Mutex<Option<mpsc::Sender<MediaChunk>>>>,
) {
    while let Some(chunk) = encoded.recv().await {
        if chunk.data.is_empty() {
            continue;
        }

        let tx = lock(&consumer).clone();
        match tx {
            Some(tx) => {
                if tx.send(chunk).await.is_err() {
                    debug!("Chunk consumer went away");
                }
            }
            None => debug!("No chunk consumer, dropping {} bytes", chunk.size()),
        }
    }
    debug!("Encoder finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeFeed {
        live: Arc<AtomicBool>,
        encoder: Arc<Mutex<Option<mpsc::Sender<MediaChunk>>>>,
        recorded_format: Arc<Mutex<Option<Option<String>>>>,
    }

    impl CameraFeed for FakeFeed {
        fn preview(&self) -> PreviewStream {
            PreviewStream::new("fake camera", 1280, 720, self.live.clone())
        }

        fn record(
            &mut self,
            format: Option<&str>,
            _timeslice: Duration,
        ) -> mpsc::Receiver<MediaChunk> {
            let (tx, rx) = mpsc::channel(64);
            *self.encoder.lock().unwrap() = Some(tx);
            *self.recorded_format.lock().unwrap() = Some(format.map(str::to_string));
            rx
        }

        fn release(&mut self) {
            self.live.store(false, Ordering::SeqCst);
            self.encoder.lock().unwrap().take();
        }
    }

    #[derive(Default)]
    struct FakeCamera {
        supported: Vec<&'static str>,
        refuse: Option<CaptureError>,
        live: Arc<AtomicBool>,
        encoder: Arc<Mutex<Option<mpsc::Sender<MediaChunk>>>>,
        recorded_format: Arc<Mutex<Option<Option<String>>>>,
        constraints: Mutex<Option<CaptureConstraints>>,
    }

    impl FakeCamera {
        async fn emit(&self, data: Vec<u8>) {
            self.emit_at(data, 0).await;
        }

        async fn emit_at(&self, data: Vec<u8>, produced_at: i64) {
            let tx = self.encoder.lock().unwrap().clone();
            tx.unwrap().send(MediaChunk { data, produced_at }).await.unwrap();
        }
    }

    #[async_trait]
    impl CameraDevice for FakeCamera {
        fn is_format_supported(&self, mime: &str) -> bool {
            self.supported.contains(&mime)
        }

        async fn acquire(
            &self,
            constraints: CaptureConstraints,
        ) -> Result<Box<dyn CameraFeed>, CaptureError> {
            *self.constraints.lock().unwrap() = Some(constraints);
            if let Some(err) = &self.refuse {
                return Err(err.clone());
            }
            self.live.store(true, Ordering::SeqCst);
            Ok(Box::new(FakeFeed {
                live: self.live.clone(),
                encoder: self.encoder.clone(),
                recorded_format: self.recorded_format.clone(),
            }))
        }
    }

    fn prefs() -> Vec<String> {
        MediaConfig::default().formats
    }

    #[test]
    fn test_select_format_in_preference_order() {
        assert_eq!(
            select_format(&prefs(), |f| f == "video/webm" || f == "video/mp4"),
            Some("video/webm".to_string())
        );
        assert_eq!(
            select_format(&prefs(), |_| true),
            Some("video/webm;codecs=vp9".to_string())
        );
        assert_eq!(select_format(&prefs(), |_| false), None);
    }

    #[tokio::test]
    async fn test_initialize_requests_720p_without_audio() {
        let camera = Arc::new(FakeCamera {
            supported: vec!["video/webm;codecs=vp8"],
            ..Default::default()
        });
        let mut streamer = MediaStreamer::new(camera.clone(), MediaConfig::default());
        streamer.initialize().await.unwrap();

        assert_eq!(
            *camera.constraints.lock().unwrap(),
            Some(CaptureConstraints {
                width: 1280,
                height: 720,
                audio: false
            })
        );
        assert_eq!(streamer.format(), Some("video/webm;codecs=vp8"));
        assert!(streamer.get_stream().unwrap().is_live());
    }

    #[tokio::test]
    async fn test_unsupported_formats_fall_back_to_default() {
        let camera = Arc::new(FakeCamera::default());
        let mut streamer = MediaStreamer::new(camera.clone(), MediaConfig::default());
        streamer.initialize().await.unwrap();
        assert_eq!(streamer.format(), None);

        streamer.start().unwrap();
        assert_eq!(*camera.recorded_format.lock().unwrap(), Some(None));
    }

    #[tokio::test]
    async fn test_denied_camera_is_unavailable_with_reason() {
        let camera = Arc::new(FakeCamera {
            refuse: Some(CaptureError::CameraUnavailable {
                reason: "NotAllowedError: permission denied".into(),
            }),
            ..Default::default()
        });
        let mut streamer = MediaStreamer::new(camera, MediaConfig::default());

        let err = streamer.initialize().await.unwrap_err();
        assert_eq!(
            err,
            CaptureError::CameraUnavailable {
                reason: "NotAllowedError: permission denied".into()
            }
        );
        assert!(streamer.get_stream().is_none());
    }

    #[tokio::test]
    async fn test_start_before_initialize_fails() {
        let camera = Arc::new(FakeCamera::default());
        let mut streamer = MediaStreamer::new(camera, MediaConfig::default());
        assert_eq!(streamer.start(), Err(CaptureError::NotInitialized("start")));
    }

    #[tokio::test]
    async fn test_chunks_forwarded_in_order_without_empties() {
        let camera = Arc::new(FakeCamera::default());
        let mut streamer = MediaStreamer::new(camera.clone(), MediaConfig::default());
        let mut chunks = streamer.on_chunk();
        streamer.initialize().await.unwrap();
        streamer.start().unwrap();

        camera.emit(vec![1]).await;
        camera.emit(Vec::new()).await;
        camera.emit(vec![2, 2]).await;
        camera.emit(Vec::new()).await;
        camera.emit(vec![3, 3, 3]).await;

        let mut sizes = Vec::new();
        for _ in 0..3 {
            sizes.push(chunks.recv().await.unwrap().size());
        }
        assert_eq!(sizes, vec![1, 2, 3]);
        assert!(chunks.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_chunks_keep_encoder_timestamps() {
        let camera = Arc::new(FakeCamera::default());
        let mut streamer = MediaStreamer::new(camera.clone(), MediaConfig::default());
        let mut chunks = streamer.on_chunk();
        streamer.initialize().await.unwrap();
        streamer.start().unwrap();

        camera.emit_at(vec![1; 8], 1_700_000_000_250).await;
        camera.emit_at(vec![2; 8], 1_700_000_000_500).await;

        assert_eq!(chunks.recv().await.unwrap().produced_at, 1_700_000_000_250);
        assert_eq!(chunks.recv().await.unwrap().produced_at, 1_700_000_000_500);
    }

    #[tokio::test]
    async fn test_stop_releases_camera_and_is_idempotent() {
        let camera = Arc::new(FakeCamera::default());
        let mut streamer = MediaStreamer::new(camera.clone(), MediaConfig::default());
        streamer.stop();

        streamer.initialize().await.unwrap();
        streamer.start().unwrap();
        let preview = streamer.get_stream().unwrap();
        assert!(preview.is_live());

        streamer.stop();
        streamer.stop();
        assert!(!preview.is_live());
        assert!(!streamer.is_streaming());
        assert!(camera.encoder.lock().unwrap().is_none());
        assert_eq!(streamer.start(), Err(CaptureError::NotInitialized("start")));
    }
}
