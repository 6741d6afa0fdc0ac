//! # Encoder Interface Module
//!
//! Questo modulo definisce il trait `Encoder`, l'unica interfaccia che il
//! transform engine usa per produrre nuovi file.
//!
//! ## Responsabilità:
//! - `EncodeProfile`: formato di destinazione, qualità, alpha, animazione, audio
//! - `ToolEncoder`: implementazione che delega a image processor e video processor
//! - Report dei tool esterni disponibili
//!
//! Nei test l'encoder si sostituisce con uno stub.

use crate::error::{OptimizeError, OptimizeResult};
use crate::image_processor::ImageProcessor;
use crate::platform::PlatformCommands;
use crate::video_processor::VideoProcessor;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Container or image format produced by an encode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Jpeg,
    Png,
    WebP,
    Avif,
    Mp4,
    Mov,
    WebM,
}

impl TargetFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::WebP),
            "avif" => Some(Self::Avif),
            "mp4" | "m4v" => Some(Self::Mp4),
            "mov" => Some(Self::Mov),
            "webm" => Some(Self::WebM),
            _ => None,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Mp4 | Self::Mov | Self::WebM)
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::WebP => "WebP",
            Self::Avif => "AVIF",
            Self::Mp4 => "MP4",
            Self::Mov => "MOV",
            Self::WebM => "WebM",
        };
        f.write_str(name)
    }
}

/// Quality knob handed to the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Image quality, 1..=100
    Image(u8),
    /// Constant rate factor for video encoders
    Crf(u8),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodeProfile {
    pub target: TargetFormat,
    pub quality: Quality,
    /// Never rescale beyond what the codec requires
    pub preserve_resolution: bool,
    /// Source has an alpha channel that must survive
    pub preserve_alpha: bool,
    /// Source is animated (animated WebP/PNG, GIF)
    pub animated: bool,
    /// Keep the audio track out of the output (GIF conversions)
    pub strip_audio: bool,
    pub audio_bitrate: String,
    /// Upper bound for the video bitrate, usually the source bitrate
    pub max_bitrate_bps: Option<u64>,
}

impl EncodeProfile {
    pub fn new(target: TargetFormat, quality: Quality) -> Self {
        Self {
            target,
            quality,
            preserve_resolution: true,
            preserve_alpha: false,
            animated: false,
            strip_audio: false,
            audio_bitrate: "128k".to_string(),
            max_bitrate_bps: None,
        }
    }
}

/// Narrow interface over the external transcoding service
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Write an encoded version of `input` to `output`. On failure the caller
    /// discards whatever `output` holds.
    async fn encode(&self, input: &Path, output: &Path, profile: &EncodeProfile)
        -> OptimizeResult<()>;

    /// Average video bitrate of `input`, when the backing tools can tell
    async fn probe_bitrate(&self, _input: &Path) -> Option<u64> {
        None
    }
}

/// Encoder backed by installed command-line tools
pub struct ToolEncoder {
    images: ImageProcessor,
    videos: VideoProcessor,
}

impl ToolEncoder {
    pub fn new(timeout: Duration) -> Self {
        Self {
            images: ImageProcessor::new(timeout),
            videos: VideoProcessor::new(timeout),
        }
    }

    /// Fail early when the video toolchain is missing and videos are pending
    pub fn check_video_support() -> OptimizeResult<()> {
        let platform = PlatformCommands::instance();
        if platform.is_available("ffmpeg") {
            Ok(())
        } else {
            Err(OptimizeError::MissingDependency(
                "ffmpeg is required for video compression and GIF conversion".to_string(),
            ))
        }
    }

    pub fn tools_report() -> String {
        PlatformCommands::instance().tools_report()
    }
}

#[async_trait]
impl Encoder for ToolEncoder {
    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        profile: &EncodeProfile,
    ) -> OptimizeResult<()> {
        if profile.target.is_video() {
            self.videos.encode(input, output, profile).await
        } else {
            self.images.encode(input, output, profile).await
        }
    }

    async fn probe_bitrate(&self, input: &Path) -> Option<u64> {
        self.videos.probe_bitrate(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_from_extension() {
        assert_eq!(TargetFormat::from_extension("JPG"), Some(TargetFormat::Jpeg));
        assert_eq!(TargetFormat::from_extension("m4v"), Some(TargetFormat::Mp4));
        assert_eq!(TargetFormat::from_extension("gif"), None);
        assert!(TargetFormat::WebM.is_video());
        assert!(!TargetFormat::Avif.is_video());
    }

    #[test]
    fn test_profile_defaults_preserve_resolution() {
        let profile = EncodeProfile::new(TargetFormat::Png, Quality::Image(85));
        assert!(profile.preserve_resolution);
        assert!(!profile.preserve_alpha);
        assert_eq!(profile.max_bitrate_bps, None);
    }
}
