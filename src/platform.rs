//! # Platform-specific utilities
//!
//! Questo modulo trova i binari dei tool esterni. Prima controlla
//! `SITE_OPTIMIZER_TOOLS_DIR`, poi ogni directory del `PATH`. Le ricerche
//! restano in cache per tutta la vita del processo.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tracing::debug;

/// Override directory searched before `PATH`
pub const TOOLS_DIR_ENV: &str = "SITE_OPTIMIZER_TOOLS_DIR";

/// Tools reported by `tools_report`, grouped by what they encode
const KNOWN_TOOLS: &[(&str, &[&str])] = &[
    ("JPEG", &["jpegoptim", "mozjpeg", "jpegtran"]),
    ("PNG", &["oxipng", "optipng", "pngcrush"]),
    ("WebP", &["cwebp"]),
    ("AVIF", &["magick", "convert"]),
    ("Video / GIF", &["ffmpeg", "ffprobe"]),
];

/// Platform-specific tool locator with a lookup cache
pub struct PlatformCommands {
    tools_dir: Option<PathBuf>,
    cache: Mutex<HashMap<String, Option<PathBuf>>>,
}

impl PlatformCommands {
    /// Get the singleton instance
    pub fn instance() -> &'static Self {
        static INSTANCE: OnceLock<PlatformCommands> = OnceLock::new();
        INSTANCE.get_or_init(|| Self::new(env::var_os(TOOLS_DIR_ENV).map(PathBuf::from)))
    }

    pub fn new(tools_dir: Option<PathBuf>) -> Self {
        Self {
            tools_dir,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Platform-specific executable name
    pub fn executable_name(base_name: &str) -> String {
        if cfg!(windows) {
            format!("{}.exe", base_name)
        } else {
            base_name.to_string()
        }
    }

    /// Resolve the full path to a tool, if installed
    pub fn resolve(&self, base_name: &str) -> Option<PathBuf> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(hit) = cache.get(base_name) {
                return hit.clone();
            }
        }

        let found = self.search(base_name);
        debug!("Resolved tool {} -> {:?}", base_name, found);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(base_name.to_string(), found.clone());
        }
        found
    }

    pub fn is_available(&self, base_name: &str) -> bool {
        self.resolve(base_name).is_some()
    }

    fn search(&self, base_name: &str) -> Option<PathBuf> {
        let executable = Self::executable_name(base_name);

        if let Some(dir) = &self.tools_dir {
            let candidate = dir.join(&executable);
            if is_executable(&candidate) {
                return Some(candidate);
            }
        }

        let path_var = env::var_os("PATH")?;
        env::split_paths(&path_var)
            .map(|dir| dir.join(&executable))
            .find(|candidate| is_executable(candidate))
    }

    /// Human-readable availability report, with install hints for missing tools
    pub fn tools_report(&self) -> String {
        let mut report = String::from("External tools:\n");
        if let Some(dir) = &self.tools_dir {
            report.push_str(&format!("Override directory: {}\n", dir.display()));
        }

        for (group, tools) in KNOWN_TOOLS {
            report.push_str(&format!("\n{}:\n", group));
            for tool in *tools {
                match self.resolve(tool) {
                    Some(path) => report.push_str(&format!("  ✅ {} -> {}\n", tool, path.display())),
                    None => report.push_str(&format!(
                        "  ❌ {} (install with: {})\n",
                        tool,
                        install_hint(tool)
                    )),
                }
            }
        }
        report
    }

    /// Get system information for debugging
    pub fn system_info() -> SystemInfo {
        SystemInfo {
            os: env::consts::OS,
            arch: env::consts::ARCH,
            family: env::consts::FAMILY,
        }
    }
}

fn is_executable(path: &Path) -> bool {
    match std::fs::metadata(path) {
        #[cfg(unix)]
        Ok(metadata) => {
            use std::os::unix::fs::PermissionsExt;
            metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
        }
        #[cfg(not(unix))]
        Ok(metadata) => metadata.is_file(),
        Err(_) => false,
    }
}

/// Installation hint for a missing tool
pub fn install_hint(tool: &str) -> &'static str {
    match tool {
        "cwebp" => "apt-get install webp / brew install webp",
        "mozjpeg" | "jpegtran" => "apt-get install libjpeg-turbo-progs / brew install mozjpeg",
        "jpegoptim" => "apt-get install jpegoptim / brew install jpegoptim",
        "oxipng" => "cargo install oxipng / brew install oxipng",
        "optipng" => "apt-get install optipng / brew install optipng",
        "pngcrush" => "apt-get install pngcrush / brew install pngcrush",
        "magick" | "convert" => "apt-get install imagemagick / brew install imagemagick",
        "ffmpeg" | "ffprobe" => "apt-get install ffmpeg / brew install ffmpeg",
        _ => "see your package manager",
    }
}

/// System information structure
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub os: &'static str,
    pub arch: &'static str,
    pub family: &'static str,
}

impl std::fmt::Display for SystemInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.os, self.arch, self.family)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn fake_tool(dir: &Path, name: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_override_dir_wins() {
        let dir = TempDir::new().unwrap();
        fake_tool(dir.path(), "cwebp");
        let platform = PlatformCommands::new(Some(dir.path().to_path_buf()));
        assert_eq!(platform.resolve("cwebp"), Some(dir.path().join("cwebp")));
    }

    #[test]
    fn test_missing_tool() {
        let platform = PlatformCommands::new(None);
        assert!(!platform.is_available("smo-definitely-missing-tool"));
        assert!(platform.tools_report().contains("ffmpeg"));
    }

    #[test]
    fn test_system_info() {
        let info = PlatformCommands::system_info();
        assert!(!info.os.is_empty());
        assert!(!info.arch.is_empty());
    }
}
