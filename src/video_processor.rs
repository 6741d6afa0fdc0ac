//! # Video Processing Module
//!
//! Questo modulo usa `ffmpeg` per ricomprimere i video e convertire le GIF, e
//! `ffprobe` per leggere il bitrate di origine.
//!
//! ## Profili di encoding:
//! - **MP4 / MOV**: libx264, `-preset slow`, CRF, audio AAC, `+faststart`
//! - **WebM**: libvpx-vp9 a qualità costante (`-b:v 0 -crf N`), audio Opus
//! - **GIF**: stessi codec, nessuna traccia audio, `yuv420p` per i browser
//!
//! La risoluzione non aumenta mai: l'unico scaling arrotonda per difetto le
//! dimensioni dispari, come richiede il chroma 4:2:0. Se il bitrate di origine
//! è noto diventa il limite `-maxrate`.

use crate::encoder::{EncodeProfile, Quality, TargetFormat};
use crate::error::{OptimizeError, OptimizeResult};
use crate::platform::PlatformCommands;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

const EVEN_DIMENSIONS: &str = "scale=trunc(iw/2)*2:trunc(ih/2)*2";

/// Handles video encodes through ffmpeg
pub struct VideoProcessor {
    timeout: Duration,
}

impl VideoProcessor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Encode `input` into `output` following `profile`
    pub async fn encode(
        &self,
        input: &Path,
        output: &Path,
        profile: &EncodeProfile,
    ) -> OptimizeResult<()> {
        let ffmpeg = self.tool("ffmpeg")?;
        let args = Self::build_args(input, output, profile)?;
        debug!("ffmpeg {:?}", args);

        let start_time = Instant::now();
        let mut cmd = Command::new(&ffmpeg);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                OptimizeError::Encode(format!(
                    "ffmpeg timed out after {}s on {}",
                    self.timeout.as_secs(),
                    input.display()
                ))
            })??;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let last_line = stderr.lines().last().unwrap_or_default();
            return Err(OptimizeError::Encode(format!(
                "ffmpeg exited with {}: {}",
                result.status, last_line
            )));
        }

        debug!(
            "ffmpeg finished {} in {:.1}s",
            input.display(),
            start_time.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Build the ffmpeg argument list for one encode
    pub fn build_args(
        input: &Path,
        output: &Path,
        profile: &EncodeProfile,
    ) -> OptimizeResult<Vec<OsString>> {
        let crf = match profile.quality {
            Quality::Crf(crf) => crf,
            Quality::Image(_) => {
                return Err(OptimizeError::Encode(
                    "video encode requested with an image quality".to_string(),
                ))
            }
        };

        let mut args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            input.into(),
            "-map".into(),
            "0:v:0".into(),
        ];
        if !profile.strip_audio {
            args.push("-map".into());
            args.push("0:a?".into());
        }

        let (container, video_codec, audio_codec) = match profile.target {
            TargetFormat::Mp4 => ("mp4", "libx264", "aac"),
            TargetFormat::Mov => ("mov", "libx264", "aac"),
            TargetFormat::WebM => ("webm", "libvpx-vp9", "libopus"),
            other => {
                return Err(OptimizeError::Encode(format!(
                    "{} is not a video container",
                    other
                )))
            }
        };

        args.push("-c:v".into());
        args.push(video_codec.into());
        if video_codec == "libx264" {
            args.extend([OsString::from("-preset"), OsString::from("slow")]);
        } else {
            args.extend([
                OsString::from("-row-mt"),
                OsString::from("1"),
                OsString::from("-deadline"),
                OsString::from("good"),
            ]);
        }
        args.push("-crf".into());
        args.push(crf.to_string().into());

        match (video_codec, profile.max_bitrate_bps) {
            // Constrained quality: the cap doubles as the VP9 target bitrate
            ("libvpx-vp9", Some(cap)) => {
                args.extend([OsString::from("-b:v"), OsString::from(cap.to_string())]);
            }
            ("libvpx-vp9", None) => {
                args.extend([OsString::from("-b:v"), OsString::from("0")]);
            }
            (_, Some(cap)) => {
                args.extend([
                    OsString::from("-maxrate"),
                    OsString::from(cap.to_string()),
                    OsString::from("-bufsize"),
                    OsString::from((cap * 2).to_string()),
                ]);
            }
            (_, None) => {}
        }

        args.extend([
            OsString::from("-pix_fmt"),
            OsString::from("yuv420p"),
            OsString::from("-vf"),
            OsString::from(EVEN_DIMENSIONS),
        ]);

        if profile.strip_audio {
            args.push("-an".into());
        } else {
            args.extend([
                OsString::from("-c:a"),
                OsString::from(audio_codec),
                OsString::from("-b:a"),
                OsString::from(profile.audio_bitrate.clone()),
            ]);
        }

        if container != "webm" {
            args.extend([OsString::from("-movflags"), OsString::from("+faststart")]);
        }
        args.extend([
            OsString::from("-map_metadata"),
            OsString::from("0"),
            OsString::from("-f"),
            OsString::from(container),
            OsString::from(output),
        ]);
        Ok(args)
    }

    /// Video bitrate of `input` in bits per second
    pub async fn probe_bitrate(&self, input: &Path) -> Option<u64> {
        match self.get_video_info(input).await {
            Ok(info) if info.bitrate > 0 => Some(info.bitrate),
            Ok(_) => None,
            Err(e) => {
                debug!("ffprobe could not read {}: {}", input.display(), e);
                None
            }
        }
    }

    /// Get video information using ffprobe
    pub async fn get_video_info(&self, video_path: &Path) -> OptimizeResult<VideoInfo> {
        let ffprobe = self.tool("ffprobe")?;
        let mut cmd = Command::new(&ffprobe);
        cmd.args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(video_path)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| OptimizeError::Encode("ffprobe timed out".to_string()))??;

        if !output.status.success() {
            return Err(OptimizeError::Encode(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        VideoInfo::from_ffprobe_json(&String::from_utf8_lossy(&output.stdout))
    }

    fn tool(&self, name: &str) -> OptimizeResult<PathBuf> {
        PlatformCommands::instance().resolve(name).ok_or_else(|| {
            OptimizeError::MissingDependency(format!(
                "{} is required for video processing",
                name
            ))
        })
    }
}

/// Video file information
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub duration: f64,
    /// Video stream bitrate, falling back to the container's overall bitrate
    pub bitrate: u64,
    pub width: u32,
    pub height: u32,
    pub codec: String,
}

impl VideoInfo {
    pub fn from_ffprobe_json(json: &str) -> OptimizeResult<Self> {
        let info: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| OptimizeError::Encode(format!("unreadable ffprobe output: {}", e)))?;

        let parse_u64 = |value: &serde_json::Value| {
            value.as_str().and_then(|s| s.parse::<u64>().ok())
        };

        let format = &info["format"];
        let duration = format["duration"]
            .as_str()
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0);

        let video_stream = info["streams"]
            .as_array()
            .and_then(|streams| streams.iter().find(|s| s["codec_type"] == "video"))
            .unwrap_or(&serde_json::Value::Null);

        let bitrate = parse_u64(&video_stream["bit_rate"])
            .or_else(|| parse_u64(&format["bit_rate"]))
            .unwrap_or(0);

        Ok(Self {
            duration,
            bitrate,
            width: video_stream["width"].as_u64().unwrap_or(0) as u32,
            height: video_stream["height"].as_u64().unwrap_or(0) as u32,
            codec: video_stream["codec_name"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    fn window(args: &[String], pair: [&str; 2]) -> bool {
        args.windows(2).any(|w| w[0] == pair[0] && w[1] == pair[1])
    }

    #[test]
    fn test_mp4_compress_args_cap_bitrate() {
        let mut profile = EncodeProfile::new(TargetFormat::Mp4, Quality::Crf(22));
        profile.max_bitrate_bps = Some(4_000_000);
        let args = strings(
            &VideoProcessor::build_args(Path::new("in.mp4"), Path::new("out.mp4"), &profile)
                .unwrap(),
        );

        assert!(window(&args, ["-c:v", "libx264"]));
        assert!(window(&args, ["-crf", "22"]));
        assert!(window(&args, ["-maxrate", "4000000"]));
        assert!(window(&args, ["-bufsize", "8000000"]));
        assert!(window(&args, ["-c:a", "aac"]));
        assert!(window(&args, ["-movflags", "+faststart"]));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_gif_to_webm_args() {
        let mut profile = EncodeProfile::new(TargetFormat::WebM, Quality::Crf(32));
        profile.strip_audio = true;
        profile.animated = true;
        let args = strings(
            &VideoProcessor::build_args(Path::new("a.gif"), Path::new("a.webm"), &profile)
                .unwrap(),
        );

        assert!(window(&args, ["-c:v", "libvpx-vp9"]));
        assert!(window(&args, ["-b:v", "0"]));
        assert!(window(&args, ["-crf", "32"]));
        assert!(args.contains(&"-an".to_string()));
        assert!(!args.contains(&"0:a?".to_string()));
        assert!(!args.contains(&"+faststart".to_string()));
    }

    #[test]
    fn test_image_targets_are_rejected() {
        let profile = EncodeProfile::new(TargetFormat::Png, Quality::Crf(23));
        assert!(VideoProcessor::build_args(Path::new("a"), Path::new("b"), &profile).is_err());

        let profile = EncodeProfile::new(TargetFormat::Mp4, Quality::Image(80));
        assert!(VideoProcessor::build_args(Path::new("a"), Path::new("b"), &profile).is_err());
    }

    #[test]
    fn test_ffprobe_parsing_prefers_stream_bitrate() {
        let json = r#"{
            "streams": [
                {"codec_type": "audio", "bit_rate": "128000"},
                {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080, "bit_rate": "3500000"}
            ],
            "format": {"duration": "12.5", "bit_rate": "3700000"}
        }"#;
        let info = VideoInfo::from_ffprobe_json(json).unwrap();
        assert_eq!(info.bitrate, 3_500_000);
        assert_eq!(info.width, 1920);
        assert_eq!(info.codec, "h264");
        assert_eq!(info.duration, 12.5);
    }

    #[test]
    fn test_ffprobe_parsing_falls_back_to_format_bitrate() {
        let json = r#"{"streams": [{"codec_type": "video"}], "format": {"bit_rate": "900000"}}"#;
        assert_eq!(VideoInfo::from_ffprobe_json(json).unwrap().bitrate, 900_000);
    }
}
