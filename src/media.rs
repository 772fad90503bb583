//! Локальное и удалённое медиа.
//!
//! Захват устройств здесь не реализуется: `TrackMediaSource` создаёт
//! локальные дорожки, в которые хост пишет кадры захвата. Дескриптор живёт
//! до конца процесса и переиспользуется между сессиями.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{MediaError, UnavailableReason};
use crate::utils::random_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    pub video: Option<VideoConstraints>,
    pub audio: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: Some(VideoConstraints {
                width: 1280,
                height: 720,
            }),
            audio: true,
        }
    }
}

/// Разделяемый дескриптор локального потока. Клонирование дёшево,
/// владельцем остаётся MediaSource.
#[derive(Clone)]
pub struct MediaHandle {
    stream_id: String,
    tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
}

impl MediaHandle {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn with_track(mut self, track: Arc<dyn TrackLocal + Send + Sync>) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn tracks(&self) -> &[Arc<dyn TrackLocal + Send + Sync>] {
        &self.tracks
    }
}

impl PartialEq for MediaHandle {
    fn eq(&self, other: &Self) -> bool {
        self.stream_id == other.stream_id
    }
}

impl fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaHandle")
            .field("stream_id", &self.stream_id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// Удалённый поток. Принадлежит координатору, пока сессия Active.
/// Дорожки, пришедшие после первой, попадают в тот же дескриптор.
#[derive(Clone)]
pub struct RemoteMedia {
    stream_id: String,
    tracks: Arc<Mutex<Vec<Arc<TrackRemote>>>>,
}

impl RemoteMedia {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn from_track(track: Arc<TrackRemote>) -> Self {
        let media = Self::new(track.stream_id());
        media.add_track(track);
        media
    }

    pub fn add_track(&self, track: Arc<TrackRemote>) {
        self.tracks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(track);
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn tracks(&self) -> Vec<Arc<TrackRemote>> {
        self.tracks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl PartialEq for RemoteMedia {
    fn eq(&self, other: &Self) -> bool {
        self.stream_id == other.stream_id
    }
}

impl fmt::Debug for RemoteMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMedia")
            .field("stream_id", &self.stream_id)
            .field("tracks", &self.tracks().len())
            .finish()
    }
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Повторный вызов при живом дескрипторе возвращает его же
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaHandle, MediaError>;

    fn release(&self);
}

/// Источник на основе `TrackLocalStaticSample`: VP8 для видео, Opus для звука
#[derive(Default)]
pub struct TrackMediaSource {
    handle: Mutex<Option<MediaHandle>>,
}

impl TrackMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn build(constraints: &MediaConstraints) -> Result<MediaHandle, MediaError> {
        if constraints.video.is_none() && !constraints.audio {
            return Err(MediaError::Unavailable(UnavailableReason::NotFound));
        }

        let stream_id = format!("ssc-{}", random_id());
        let mut handle = MediaHandle::new(stream_id.clone());

        if let Some(video) = constraints.video {
            debug!(width = video.width, height = video.height, "creating local video track");
            let track: Arc<dyn TrackLocal + Send + Sync> = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: 90000,
                    ..Default::default()
                },
                "video".to_owned(),
                stream_id.clone(),
            ));
            handle = handle.with_track(track);
        }

        if constraints.audio {
            debug!("creating local audio track");
            let track: Arc<dyn TrackLocal + Send + Sync> = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48000,
                    channels: 2,
                    ..Default::default()
                },
                "audio".to_owned(),
                stream_id,
            ));
            handle = handle.with_track(track);
        }

        Ok(handle)
    }
}

#[async_trait]
impl MediaSource for TrackMediaSource {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaHandle, MediaError> {
        let mut slot = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = slot.as_ref() {
            debug!(stream_id = existing.stream_id(), "reusing live media handle");
            return Ok(existing.clone());
        }

        let handle = Self::build(constraints)?;
        info!(
            stream_id = handle.stream_id(),
            tracks = handle.tracks().len(),
            "local media acquired"
        );
        *slot = Some(handle.clone());
        Ok(handle)
    }

    fn release(&self) {
        if let Some(handle) = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
            info!(stream_id = handle.stream_id(), "local media released");
        }
    }
}
