//! # Image Processing Module
//!
//! Questo modulo ricomprime le immagini statiche con tool esterni,
//! mantenendo il formato di origine. Per ogni formato c'è una catena di tool
//! provati in ordine; vince il primo che riesce.
//!
//! | Formato | Tool (in ordine)               | Qualità               |
//! |---------|--------------------------------|-----------------------|
//! | JPEG    | jpegoptim, mozjpeg, jpegtran   | `--max` / `-quality`  |
//! | PNG     | oxipng, optipng, pngcrush      | lossless              |
//! | WebP    | cwebp                          | `-q`                  |
//! | AVIF    | magick, convert                | `-quality`            |
//!
//! Ogni tool scrive sul percorso scelto dal chiamante, che è sempre un file
//! temporaneo: l'originale viene solo letto.

use crate::encoder::{EncodeProfile, Quality, TargetFormat};
use crate::error::{OptimizeError, OptimizeResult};
use crate::platform::PlatformCommands;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// Argument builder for one tool in a chain
type ArgsBuilder = fn(&Path, &Path, u8, &EncodeProfile) -> Vec<OsString>;

/// How a tool delivers its result
#[derive(Clone, Copy)]
enum Delivery {
    /// The tool writes the output path itself
    File,
    /// The tool writes the encoded image to stdout
    Stdout,
}

/// Image encoder driving external command-line tools
pub struct ImageProcessor {
    timeout: Duration,
}

impl ImageProcessor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Encode `input` into `output` in the profile's target format.
    pub async fn encode(
        &self,
        input: &Path,
        output: &Path,
        profile: &EncodeProfile,
    ) -> OptimizeResult<()> {
        let quality = match profile.quality {
            Quality::Image(q) => q.clamp(1, 100),
            Quality::Crf(_) => {
                return Err(OptimizeError::Encode(
                    "image encode requested with a video CRF".to_string(),
                ))
            }
        };

        match profile.target {
            TargetFormat::Jpeg => self.optimize_jpeg(input, output, quality, profile).await,
            TargetFormat::Png => self.optimize_png(input, output, quality, profile).await,
            TargetFormat::WebP => {
                if profile.animated {
                    return Err(OptimizeError::Encode(
                        "animated WebP re-encoding is not supported".to_string(),
                    ));
                }
                self.optimize_webp(input, output, quality, profile).await
            }
            TargetFormat::Avif => self.optimize_avif(input, output, quality, profile).await,
            other => Err(OptimizeError::Encode(format!(
                "{} is not an image format",
                other
            ))),
        }
    }

    async fn optimize_jpeg(
        &self,
        input: &Path,
        output: &Path,
        quality: u8,
        profile: &EncodeProfile,
    ) -> OptimizeResult<()> {
        let tools: &[(&str, Delivery, ArgsBuilder)] = &[
            ("jpegoptim", Delivery::Stdout, |input, _output, quality, _profile| {
                vec![
                    format!("--max={}", quality).into(),
                    "--strip-all".into(),
                    "--all-progressive".into(),
                    "--stdout".into(),
                    input.into(),
                ]
            }),
            ("mozjpeg", Delivery::File, |input, output, quality, _profile| {
                vec![
                    "-quality".into(),
                    quality.to_string().into(),
                    "-optimize".into(),
                    "-progressive".into(),
                    "-outfile".into(),
                    output.into(),
                    input.into(),
                ]
            }),
            ("jpegtran", Delivery::File, |input, output, _quality, _profile| {
                vec![
                    "-copy".into(),
                    "none".into(),
                    "-optimize".into(),
                    "-progressive".into(),
                    "-outfile".into(),
                    output.into(),
                    input.into(),
                ]
            }),
        ];

        self.try_tools(input, output, quality, profile, tools).await
    }

    async fn optimize_png(
        &self,
        input: &Path,
        output: &Path,
        quality: u8,
        profile: &EncodeProfile,
    ) -> OptimizeResult<()> {
        // All three are lossless, so alpha and APNG frames survive untouched
        let tools: &[(&str, Delivery, ArgsBuilder)] = &[
            ("oxipng", Delivery::File, |input, output, _quality, _profile| {
                vec![
                    "-o".into(),
                    "4".into(),
                    "--strip".into(),
                    "safe".into(),
                    "--out".into(),
                    output.into(),
                    input.into(),
                ]
            }),
            ("optipng", Delivery::File, |input, output, _quality, _profile| {
                vec![
                    "-o5".into(),
                    "-strip".into(),
                    "all".into(),
                    "-clobber".into(),
                    "-out".into(),
                    output.into(),
                    input.into(),
                ]
            }),
            ("pngcrush", Delivery::File, |input, output, _quality, _profile| {
                vec![
                    "-rem".into(),
                    "alla".into(),
                    "-brute".into(),
                    input.into(),
                    output.into(),
                ]
            }),
        ];

        self.try_tools(input, output, quality, profile, tools).await
    }

    async fn optimize_webp(
        &self,
        input: &Path,
        output: &Path,
        quality: u8,
        profile: &EncodeProfile,
    ) -> OptimizeResult<()> {
        let tools: &[(&str, Delivery, ArgsBuilder)] = &[(
            "cwebp",
            Delivery::File,
            |input, output, quality, profile| {
                let mut args: Vec<OsString> = vec![
                    "-q".into(),
                    quality.to_string().into(),
                    "-m".into(),
                    "6".into(),
                    "-mt".into(),
                    "-metadata".into(),
                    "none".into(),
                ];
                if profile.preserve_alpha {
                    args.push("-exact".into());
                    args.push("-alpha_q".into());
                    args.push("100".into());
                }
                args.push(input.into());
                args.push("-o".into());
                args.push(output.into());
                args
            },
        )];

        self.try_tools(input, output, quality, profile, tools).await
    }

    async fn optimize_avif(
        &self,
        input: &Path,
        output: &Path,
        quality: u8,
        profile: &EncodeProfile,
    ) -> OptimizeResult<()> {
        let convert: ArgsBuilder = |input, output, quality, _profile| {
            vec![
                input.into(),
                "-strip".into(),
                "-quality".into(),
                quality.to_string().into(),
                output.into(),
            ]
        };
        let tools: &[(&str, Delivery, ArgsBuilder)] = &[
            ("magick", Delivery::File, convert),
            ("convert", Delivery::File, convert),
        ];

        self.try_tools(input, output, quality, profile, tools).await
    }

    /// Try each available tool in order until one produces the output.
    async fn try_tools(
        &self,
        input: &Path,
        output: &Path,
        quality: u8,
        profile: &EncodeProfile,
        tools: &[(&str, Delivery, ArgsBuilder)],
    ) -> OptimizeResult<()> {
        let platform = PlatformCommands::instance();
        let mut last_error = None;

        for (tool_name, delivery, args_builder) in tools {
            let Some(tool_path) = platform.resolve(tool_name) else {
                continue;
            };

            let args = args_builder(input, output, quality, profile);
            debug!("Encoding {} with {} {:?}", profile.target, tool_name, args);

            match self.run_tool(&tool_path, &args, *delivery, output).await {
                Ok(elapsed) => {
                    debug!("{} finished in {:?}", tool_name, elapsed);
                    return Ok(());
                }
                Err(e) => {
                    warn!("{} failed on {}: {}, trying next tool", tool_name, input.display(), e);
                    last_error = Some(e);
                }
            }
        }

        let names: Vec<&str> = tools.iter().map(|(name, _, _)| *name).collect();
        Err(last_error.unwrap_or_else(|| {
            OptimizeError::MissingDependency(format!(
                "no {} encoder installed, install one of: {}",
                profile.target,
                names.join(", ")
            ))
        }))
    }

    async fn run_tool(
        &self,
        tool_path: &PathBuf,
        args: &[OsString],
        delivery: Delivery,
        output: &Path,
    ) -> OptimizeResult<Duration> {
        let start_time = Instant::now();
        let child = Command::new(tool_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(match delivery {
                Delivery::Stdout => Stdio::piped(),
                Delivery::File => Stdio::null(),
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let result = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                OptimizeError::Encode(format!("timed out after {}s", self.timeout.as_secs()))
            })??;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(OptimizeError::Encode(format!(
                "exited with {}: {}",
                result.status,
                stderr.trim()
            )));
        }

        if let Delivery::Stdout = delivery {
            tokio::fs::write(output, &result.stdout).await?;
        }
        Ok(start_time.elapsed())
    }
}

/// Properties of the source file that the re-encode must carry over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceTraits {
    pub has_alpha: bool,
    pub animated: bool,
}

impl SourceTraits {
    /// Sniff alpha and animation from the file header. Unknown formats and
    /// unreadable files report neither.
    pub async fn probe(path: &Path) -> Self {
        match tokio::fs::read(path).await {
            Ok(bytes) => Self::from_bytes(&bytes),
            Err(e) => {
                debug!("Could not probe {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        match image::guess_format(bytes) {
            Ok(image::ImageFormat::Png) => Self {
                // IHDR colour type 4 (grey + alpha) or 6 (RGBA), or a tRNS chunk
                has_alpha: matches!(bytes.get(25), Some(4) | Some(6))
                    || contains(bytes, b"tRNS"),
                animated: contains(bytes, b"acTL"),
            },
            Ok(image::ImageFormat::WebP) => {
                // VP8X extended header carries the alpha and animation flags
                let extended = bytes.get(12..16) == Some(b"VP8X".as_slice());
                let flags = if extended { bytes.get(20).copied().unwrap_or(0) } else { 0 };
                Self {
                    has_alpha: flags & 0x10 != 0 || bytes.get(12..16) == Some(b"VP8L".as_slice()),
                    animated: flags & 0x02 != 0,
                }
            }
            Ok(image::ImageFormat::Gif) => Self {
                has_alpha: false,
                animated: contains(bytes, b"NETSCAPE2.0"),
            },
            _ => Self::default(),
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_header(color_type: u8) -> Vec<u8> {
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend_from_slice(&[0, 0, 0, 13]);
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 1, 8, color_type, 0, 0, 0]);
        bytes
    }

    #[test]
    fn test_png_alpha_detection() {
        assert!(SourceTraits::from_bytes(&png_header(6)).has_alpha);
        assert!(!SourceTraits::from_bytes(&png_header(2)).has_alpha);

        let mut apng = png_header(2);
        apng.extend_from_slice(b"\0\0\0\x08acTL");
        assert!(SourceTraits::from_bytes(&apng).animated);
    }

    #[test]
    fn test_webp_flags() {
        let mut bytes = b"RIFF\0\0\0\0WEBPVP8X".to_vec();
        bytes.extend_from_slice(&[10, 0, 0, 0, 0x12, 0, 0, 0]);
        let traits = SourceTraits::from_bytes(&bytes);
        assert!(traits.has_alpha);
        assert!(traits.animated);
    }

    #[test]
    fn test_unknown_format_has_no_traits() {
        assert_eq!(SourceTraits::from_bytes(b"hello"), SourceTraits::default());
    }

    #[tokio::test]
    async fn test_video_target_is_rejected() {
        let processor = ImageProcessor::new(Duration::from_secs(5));
        let profile = EncodeProfile::new(TargetFormat::Mp4, Quality::Image(80));
        let result = processor
            .encode(Path::new("in.mp4"), Path::new("out.mp4"), &profile)
            .await;
        assert!(matches!(result, Err(OptimizeError::Encode(_))));
    }

    #[tokio::test]
    async fn test_crf_for_image_is_rejected() {
        let processor = ImageProcessor::new(Duration::from_secs(5));
        let profile = EncodeProfile::new(TargetFormat::Png, Quality::Crf(23));
        let result = processor
            .encode(Path::new("in.png"), Path::new("out.png"), &profile)
            .await;
        assert!(result.is_err());
    }
}
