//! # Transform Engine Module
//!
//! Questo modulo trasforma una `Decision` in un `TransformResult`. L'encoder
//! scrive sempre in un file temporaneo accanto al percorso finale; solo un
//! output completo, non vuoto e (per la compressione) più piccolo viene
//! rinominato al suo posto. In ogni altro caso l'originale resta com'era.
//!
//! ## Risultati:
//! - Compress: stesso formato, qualità derivata dall'intensity. Un risultato
//!   non più piccolo viene scartato ("already optimal")
//! - ConvertToMp4 / ConvertToWebM: nuovo file accanto alla GIF, che resta al
//!   suo posto. Un file già presente sul percorso di destinazione non viene mai
//!   sovrascritto: se non è vuoto conta come conversione precedente, se è
//!   vuoto come errore

use crate::asset::{AssetRecord, Category};
use crate::classifier::{Action, Decision, GifFormat};
use crate::config::Config;
use crate::encoder::{EncodeProfile, Encoder, Quality, TargetFormat};
use crate::error::{OptimizeError, OptimizeResult};
use crate::file_manager::FileManager;
use crate::image_processor::SourceTraits;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a transform ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformOutcome {
    Compressed,
    Converted(GifFormat),
    /// The converted file was already there from an earlier run
    AlreadyConverted(GifFormat),
    /// The re-encode was not smaller, original kept
    AlreadyOptimal,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TransformResult {
    pub decision: Decision,
    pub success: bool,
    pub before_size: u64,
    pub after_size: u64,
    /// File holding the final bytes: the original path, or the converted file
    pub output_path: PathBuf,
    pub error: Option<String>,
    pub outcome: TransformOutcome,
}

impl TransformResult {
    pub fn saved(&self) -> u64 {
        self.before_size.saturating_sub(self.after_size)
    }

    fn failed(decision: &Decision, before_size: u64, error: OptimizeError) -> Self {
        Self {
            decision: decision.clone(),
            success: false,
            before_size,
            after_size: before_size,
            output_path: decision.asset.absolute_path.clone(),
            error: Some(error.to_string()),
            outcome: TransformOutcome::Failed,
        }
    }
}

/// Image quality for a given intensity (1 gentlest .. 5 strongest).
/// Sources far above the ideal target get one extra step at intensity 3+.
pub fn image_quality(intensity: u8, size: u64, ideal: Option<u64>) -> u8 {
    let base: i32 = match intensity {
        0 | 1 => 95,
        2 => 90,
        3 => 85,
        4 => 80,
        _ => 75,
    };
    let adjusted = if far_above_ideal(size, ideal) && intensity >= 3 {
        base - 5
    } else {
        base
    };
    adjusted.clamp(70, 95) as u8
}

/// x264/VP9 CRF for a given intensity, same shape as `image_quality`
pub fn video_crf(intensity: u8, size: u64, ideal: Option<u64>) -> u8 {
    let base: i32 = match intensity {
        0 | 1 => 18,
        2 => 20,
        3 => 22,
        4 => 24,
        _ => 26,
    };
    let adjusted = if far_above_ideal(size, ideal) && intensity >= 3 {
        base + 2
    } else {
        base
    };
    adjusted.clamp(16, 30) as u8
}

fn far_above_ideal(size: u64, ideal: Option<u64>) -> bool {
    ideal.map_or(false, |ideal| size > ideal.saturating_mul(3))
}

/// Path a GIF is converted to: same stem, new extension
pub fn conversion_path(asset: &AssetRecord, format: GifFormat) -> PathBuf {
    asset.absolute_path.with_extension(format.extension())
}

pub struct TransformEngine {
    encoder: Arc<dyn Encoder>,
    config: Arc<Config>,
}

impl TransformEngine {
    pub fn new(encoder: Arc<dyn Encoder>, config: Arc<Config>) -> Self {
        Self { encoder, config }
    }

    /// Run the transform for one mutating decision. Never returns an error:
    /// failures are captured in the result, with the original untouched.
    pub async fn transform(&self, decision: &Decision) -> TransformResult {
        let asset = &decision.asset;
        let before_size = match FileManager::file_size(&asset.absolute_path).await {
            Ok(size) => size,
            Err(e) => {
                return TransformResult::failed(
                    decision,
                    asset.size,
                    OptimizeError::transform(&asset.absolute_path, e),
                )
            }
        };

        let result = match decision.action {
            Action::Compress => self.compress(decision, before_size).await,
            Action::ConvertToMp4 | Action::ConvertToWebM => {
                self.convert(decision, before_size).await
            }
            other => Err(OptimizeError::transform(
                &asset.absolute_path,
                format!("{:?} is not a transform", other),
            )),
        };

        match result {
            Ok(result) => result,
            Err(e) => {
                warn!("{}", e);
                TransformResult::failed(decision, before_size, e)
            }
        }
    }

    /// Encode profile for a decision, probing the source where it matters
    pub async fn profile_for(&self, decision: &Decision) -> OptimizeResult<EncodeProfile> {
        let asset = &decision.asset;
        let ideal = self
            .config
            .thresholds
            .rule(asset.category)
            .and_then(|rule| rule.ideal_target);

        let mut profile = match decision.action {
            Action::ConvertToMp4 => {
                EncodeProfile::new(TargetFormat::Mp4, Quality::Crf(self.config.gif_mp4_crf))
            }
            Action::ConvertToWebM => {
                EncodeProfile::new(TargetFormat::WebM, Quality::Crf(self.config.gif_webm_crf))
            }
            Action::Compress => {
                let target = TargetFormat::from_extension(&asset.extension).ok_or_else(|| {
                    OptimizeError::transform(
                        &asset.absolute_path,
                        format!("no encoder for .{} files", asset.extension),
                    )
                })?;
                let quality = if asset.category == Category::Video {
                    Quality::Crf(video_crf(self.config.intensity, asset.size, ideal))
                } else {
                    Quality::Image(image_quality(self.config.intensity, asset.size, ideal))
                };
                EncodeProfile::new(target, quality)
            }
            other => {
                return Err(OptimizeError::transform(
                    &asset.absolute_path,
                    format!("{:?} has no encode profile", other),
                ))
            }
        };
        profile.audio_bitrate = self.config.audio_bitrate.clone();

        match asset.category {
            Category::Gif => {
                profile.animated = true;
                profile.strip_audio = true;
            }
            Category::Video => {
                profile.max_bitrate_bps = self.encoder.probe_bitrate(&asset.absolute_path).await;
            }
            _ => {
                let traits = SourceTraits::probe(&asset.absolute_path).await;
                profile.preserve_alpha = traits.has_alpha;
                profile.animated = traits.animated;
            }
        }
        Ok(profile)
    }

    async fn compress(&self, decision: &Decision, before_size: u64) -> OptimizeResult<TransformResult> {
        let asset = &decision.asset;
        let target = asset.absolute_path.as_path();
        let profile = self.profile_for(decision).await?;

        let temp = FileManager::temp_sibling(target, &asset.extension)
            .map_err(|e| OptimizeError::transform(target, e))?;
        let after_size = self.encode_into(asset, temp.path(), &profile).await?;

        if after_size >= before_size {
            debug!(
                "{} re-encoded to {} bytes, not smaller than {}, keeping original",
                asset.display_path(),
                after_size,
                before_size
            );
            return Ok(TransformResult {
                decision: decision.clone(),
                success: true,
                before_size,
                after_size: before_size,
                output_path: target.to_path_buf(),
                error: None,
                outcome: TransformOutcome::AlreadyOptimal,
            });
        }

        FileManager::commit_replacement(temp, target, true)
            .map_err(|e| OptimizeError::transform(target, e))?;
        info!(
            "Compressed {}: {} -> {} ({:.1}% smaller)",
            asset.display_path(),
            FileManager::format_size(before_size),
            FileManager::format_size(after_size),
            FileManager::calculate_reduction(before_size, after_size)
        );

        Ok(TransformResult {
            decision: decision.clone(),
            success: true,
            before_size,
            after_size,
            output_path: target.to_path_buf(),
            error: None,
            outcome: TransformOutcome::Compressed,
        })
    }

    async fn convert(&self, decision: &Decision, before_size: u64) -> OptimizeResult<TransformResult> {
        let asset = &decision.asset;
        let format = decision.action.conversion_target().ok_or_else(|| {
            OptimizeError::transform(&asset.absolute_path, "not a conversion")
        })?;
        let target = conversion_path(asset, format);
        match tokio::fs::metadata(&target).await {
            Ok(metadata) if metadata.len() > 0 => {
                info!(
                    "{} already converted to {}, leaving it as is",
                    asset.display_path(),
                    format.extension()
                );
                return Ok(TransformResult {
                    decision: decision.clone(),
                    success: true,
                    before_size,
                    after_size: before_size,
                    output_path: target,
                    error: None,
                    outcome: TransformOutcome::AlreadyConverted(format),
                });
            }
            Ok(_) => {
                return Err(OptimizeError::transform(
                    &asset.absolute_path,
                    format!("output already exists and is empty: {}", target.display()),
                ));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(OptimizeError::transform(&target, e)),
        }

        let profile = self.profile_for(decision).await?;
        let temp = FileManager::temp_sibling(&target, format.extension())
            .map_err(|e| OptimizeError::transform(&target, e))?;
        let after_size = self.encode_into(asset, temp.path(), &profile).await?;

        if after_size >= before_size {
            warn!(
                "{} converted to {} is not smaller than the GIF ({} >= {})",
                asset.display_path(),
                format.extension(),
                after_size,
                before_size
            );
        }

        FileManager::commit_replacement(temp, &target, false)
            .map_err(|e| OptimizeError::transform(&target, e))?;
        info!(
            "Converted {} -> {} ({} -> {})",
            asset.display_path(),
            format.extension(),
            FileManager::format_size(before_size),
            FileManager::format_size(after_size)
        );

        Ok(TransformResult {
            decision: decision.clone(),
            success: true,
            before_size,
            after_size,
            output_path: target,
            error: None,
            outcome: TransformOutcome::Converted(format),
        })
    }

    /// Run the encoder into `temp_path` and return the size it produced
    async fn encode_into(
        &self,
        asset: &AssetRecord,
        temp_path: &Path,
        profile: &EncodeProfile,
    ) -> OptimizeResult<u64> {
        self.encoder
            .encode(&asset.absolute_path, temp_path, profile)
            .await
            .map_err(|e| OptimizeError::transform(&asset.absolute_path, e))?;

        let size = FileManager::file_size(temp_path)
            .await
            .map_err(|e| OptimizeError::transform(&asset.absolute_path, e))?;
        if size == 0 {
            return Err(OptimizeError::transform(
                &asset.absolute_path,
                "encoder produced an empty file",
            ));
        }
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Writes `output_len` bytes, then optionally fails
    struct StubEncoder {
        output_len: usize,
        fail_after_write: bool,
        profiles: Mutex<Vec<EncodeProfile>>,
    }

    impl StubEncoder {
        fn new(output_len: usize) -> Self {
            Self {
                output_len,
                fail_after_write: false,
                profiles: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Encoder for StubEncoder {
        async fn encode(
            &self,
            _input: &Path,
            output: &Path,
            profile: &EncodeProfile,
        ) -> OptimizeResult<()> {
            self.profiles.lock().unwrap().push(profile.clone());
            tokio::fs::write(output, vec![7u8; self.output_len]).await?;
            if self.fail_after_write {
                return Err(OptimizeError::Encode("encoder crashed".to_string()));
            }
            Ok(())
        }
    }

    fn setup(name: &str, size: usize) -> (TempDir, Decision) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, vec![1u8; size]).unwrap();
        let asset = AssetRecord::new(dir.path(), &path, size as u64).unwrap();
        let decision = classify(
            &asset,
            &Config::default().thresholds,
            Some(GifFormat::WebM),
        );
        (dir, decision)
    }

    fn engine(encoder: StubEncoder) -> (Arc<StubEncoder>, TransformEngine) {
        let encoder = Arc::new(encoder);
        let engine = TransformEngine::new(encoder.clone(), Arc::new(Config::default()));
        (encoder, engine)
    }

    fn leftover_temp_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with(crate::file_manager::TEMP_PREFIX)
            })
            .count()
    }

    #[test]
    fn test_intensity_mapping() {
        assert_eq!(image_quality(1, 1_000_000, Some(250_000)), 95);
        assert_eq!(image_quality(3, 700_000, Some(250_000)), 85);
        assert_eq!(image_quality(3, 900_000, Some(250_000)), 80);
        assert_eq!(image_quality(5, 900_000, Some(250_000)), 70);
        assert_eq!(image_quality(2, 9_000_000, Some(250_000)), 90);

        assert_eq!(video_crf(3, 9_000_000, Some(5_000_000)), 22);
        assert_eq!(video_crf(3, 16_000_000, Some(5_000_000)), 24);
        assert_eq!(video_crf(5, 16_000_000, Some(5_000_000)), 28);
        assert_eq!(video_crf(1, 16_000_000, None), 18);
    }

    #[tokio::test]
    async fn test_compress_replaces_original() {
        let (dir, decision) = setup("hero.jpg", 900_000);
        let (encoder, engine) = engine(StubEncoder::new(200_000));

        let result = engine.transform(&decision).await;
        assert!(result.success);
        assert_eq!(result.outcome, TransformOutcome::Compressed);
        assert_eq!(result.before_size, 900_000);
        assert_eq!(result.after_size, 200_000);
        assert_eq!(result.saved(), 700_000);
        assert_eq!(std::fs::metadata(dir.path().join("hero.jpg")).unwrap().len(), 200_000);
        assert_eq!(leftover_temp_files(dir.path()), 0);

        let profiles = encoder.profiles.lock().unwrap();
        assert_eq!(profiles[0].target, TargetFormat::Jpeg);
        assert_eq!(profiles[0].quality, Quality::Image(80));
        assert!(profiles[0].preserve_resolution);
    }

    #[tokio::test]
    async fn test_larger_output_keeps_original() {
        let (dir, decision) = setup("hero.png", 900_000);
        let (_encoder, engine) = engine(StubEncoder::new(1_000_000));

        let result = engine.transform(&decision).await;
        assert!(result.success);
        assert_eq!(result.outcome, TransformOutcome::AlreadyOptimal);
        assert_eq!(result.after_size, 900_000);
        assert_eq!(
            std::fs::read(dir.path().join("hero.png")).unwrap(),
            vec![1u8; 900_000]
        );
        assert_eq!(leftover_temp_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_encoder_failure_leaves_original_untouched() {
        let (dir, decision) = setup("hero.jpg", 900_000);
        let mut stub = StubEncoder::new(10);
        stub.fail_after_write = true;
        let (_encoder, engine) = engine(stub);

        let result = engine.transform(&decision).await;
        assert!(!result.success);
        assert_eq!(result.outcome, TransformOutcome::Failed);
        assert!(result.error.unwrap().contains("encoder crashed"));
        assert_eq!(
            std::fs::read(dir.path().join("hero.jpg")).unwrap(),
            vec![1u8; 900_000]
        );
        assert_eq!(leftover_temp_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_empty_output_is_failure() {
        let (_dir, decision) = setup("hero.jpg", 900_000);
        let (_encoder, engine) = engine(StubEncoder::new(0));
        let result = engine.transform(&decision).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_gif_conversion_creates_new_file() {
        let (dir, decision) = setup("anim.gif", 3_000_000);
        assert_eq!(decision.action, Action::ConvertToWebM);
        let (encoder, engine) = engine(StubEncoder::new(400_000));

        let result = engine.transform(&decision).await;
        assert!(result.success);
        assert_eq!(result.outcome, TransformOutcome::Converted(GifFormat::WebM));
        assert_eq!(result.output_path, dir.path().join("anim.webm"));
        assert_eq!(std::fs::metadata(dir.path().join("anim.webm")).unwrap().len(), 400_000);
        assert!(dir.path().join("anim.gif").exists());

        let profiles = encoder.profiles.lock().unwrap();
        assert_eq!(profiles[0].quality, Quality::Crf(32));
        assert!(profiles[0].strip_audio);
    }

    #[tokio::test]
    async fn test_existing_conversion_is_kept_and_not_a_failure() {
        let (dir, decision) = setup("anim.gif", 3_000_000);
        std::fs::write(dir.path().join("anim.webm"), b"hand made").unwrap();
        let (encoder, engine) = engine(StubEncoder::new(400_000));

        let result = engine.transform(&decision).await;
        assert!(result.success);
        assert_eq!(result.outcome, TransformOutcome::AlreadyConverted(GifFormat::WebM));
        assert_eq!(result.saved(), 0);
        assert_eq!(result.output_path, dir.path().join("anim.webm"));
        assert_eq!(std::fs::read(dir.path().join("anim.webm")).unwrap(), b"hand made");
        assert!(encoder.profiles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_existing_target_is_failure() {
        let (dir, decision) = setup("anim.gif", 3_000_000);
        std::fs::write(dir.path().join("anim.webm"), b"").unwrap();
        let (encoder, engine) = engine(StubEncoder::new(400_000));

        let result = engine.transform(&decision).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("output already exists"));
        assert_eq!(std::fs::metadata(dir.path().join("anim.webm")).unwrap().len(), 0);
        assert!(encoder.profiles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_skip_decision_is_not_transformed() {
        let (_dir, decision) = setup("small.jpg", 1_000);
        assert_eq!(decision.action, Action::Skip);
        let (encoder, engine) = engine(StubEncoder::new(10));
        let result = engine.transform(&decision).await;
        assert!(!result.success);
        assert!(encoder.profiles.lock().unwrap().is_empty());
    }
}
