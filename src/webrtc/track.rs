//! Local media: the stream handed to a session, and an IVF file source

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::MIME_TYPE_VP8;
use webrtc::media::io::ivf_reader::{IVFFileHeader, IVFReader};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::{AppError, Result};

/// Any local track webrtc-rs can send
pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// A set of local tracks sent over one session
#[derive(Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: vec![],
        }
    }

    pub fn with_track(mut self, track: LocalTrack) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn add_track(&mut self, track: LocalTrack) {
        self.tracks.push(track);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn video_tracks(&self) -> Vec<LocalTrack> {
        self.tracks
            .iter()
            .filter(|t| t.kind() == RTPCodecType::Video)
            .cloned()
            .collect()
    }

    pub fn first_video_track(&self) -> Option<LocalTrack> {
        self.tracks
            .iter()
            .find(|t| t.kind() == RTPCodecType::Video)
            .cloned()
    }
}

impl std::fmt::Debug for LocalStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStream")
            .field("id", &self.id)
            .field(
                "tracks",
                &self.tracks.iter().map(|t| t.id().to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Random media stream id for locally produced tracks
pub fn new_stream_id() -> String {
    format!("rtgen-{}", uuid::Uuid::new_v4().simple())
}

/// VP8 track fed from an IVF file
///
/// Frames are written at the file's own timebase. Playback loops until the
/// cancellation token fires when `looped` is set.
pub struct IvfVideoSource {
    path: PathBuf,
    track: Arc<TrackLocalStaticSample>,
    frame_duration: Duration,
    width: u16,
    height: u16,
    looped: bool,
}

impl IvfVideoSource {
    /// Open `path` and validate its header
    pub fn open(path: impl AsRef<Path>, stream_id: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (_, header) = open_reader(&path)?;

        if &header.four_cc != b"VP80" {
            return Err(AppError::Config(format!(
                "{}: unsupported IVF codec {:?}, only VP8 is supported",
                path.display(),
                String::from_utf8_lossy(&header.four_cc)
            )));
        }
        let frame_duration = frame_duration(&header)?;

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            "video".to_owned(),
            stream_id.to_owned(),
        ));

        info!(
            "Opened {} ({}x{}, {:?} per frame)",
            path.display(),
            header.width,
            header.height,
            frame_duration
        );

        Ok(Self {
            path,
            track,
            frame_duration,
            width: header.width,
            height: header.height,
            looped: true,
        })
    }

    pub fn looped(mut self, looped: bool) -> Self {
        self.looped = looped;
        self
    }

    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    /// A one-track [`LocalStream`] carrying this source
    pub fn local_stream(&self) -> LocalStream {
        LocalStream::new(self.track.stream_id()).with_track(self.track.clone())
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    pub fn dimensions(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    /// Write frames into the track until EOF (or forever when looping)
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.frame_duration);
        let mut frames = 0u64;

        'file: loop {
            let (mut reader, _) = open_reader(&self.path)?;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break 'file,
                    _ = ticker.tick() => {}
                }

                let frame = match reader.parse_next_frame() {
                    Ok((frame, _)) => frame,
                    Err(e) => {
                        debug!("{}: end of frames ({})", self.path.display(), e);
                        break;
                    }
                };

                let sample = Sample {
                    data: frame.freeze(),
                    duration: self.frame_duration,
                    ..Default::default()
                };
                if let Err(e) = self.track.write_sample(&sample).await {
                    warn!("Failed to write video sample: {}", e);
                }
                frames += 1;
            }

            if !self.looped {
                break;
            }
        }

        debug!("IVF source stopped after {} frames", frames);
        Ok(())
    }
}

fn open_reader(path: &Path) -> Result<(IVFReader<BufReader<File>>, IVFFileHeader)> {
    let file = File::open(path)?;
    IVFReader::new(BufReader::new(file))
        .map_err(|e| AppError::Config(format!("{}: invalid IVF file: {}", path.display(), e)))
}

fn frame_duration(header: &IVFFileHeader) -> Result<Duration> {
    if header.timebase_denominator == 0 {
        return Err(AppError::Config("IVF timebase denominator is zero".to_string()));
    }
    let ms = 1000 * header.timebase_numerator as u64 / header.timebase_denominator as u64;
    Ok(Duration::from_millis(ms.max(1)))
}
