//! # Reference Rewriter Module
//!
//! Questo modulo aggiorna HTML, script e fogli di stile dopo la conversione
//! di una GIF, sostituendo il vecchio nome con il nuovo.
//!
//! ## Regole:
//! - Il nome deve stare da solo: prima e dopo ci vuole un separatore di
//!   percorso, un apice, uno spazio, uno tra `( ) = ? # , ; < >`, un backtick
//!   o l'inizio/fine del file. `barfoo.gif` non si tocca quando si riscrive `foo.gif`
//! - Se la menzione ha una parte di directory (`img/foo.gif`, `../img/foo.gif`,
//!   `https://site/img/foo.gif`), deve essere compatibile con la posizione
//!   dell'asset: un file omonimo altrove resta com'è
//! - I file modificati passano da un file temporaneo e un rename, con i permessi originali
//! - File binari o non UTF-8 vengono saltati con un warning

use crate::asset::to_web_path;
use crate::error::OptimizeError;
use crate::file_manager::{FileManager, PathLocks};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The rename being propagated into text files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTarget {
    old_name: String,
    new_name: String,
    /// Directory components of the asset, relative to the project root
    dirs: Vec<String>,
}

impl ReferenceTarget {
    pub fn new(old_relative: &Path, new_relative: &Path) -> Self {
        let name = |path: &Path| {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        let dirs = old_relative
            .parent()
            .map(|parent| {
                to_web_path(parent)
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            old_name: name(old_relative),
            new_name: name(new_relative),
            dirs,
        }
    }

    /// A mention whose directory part is `prefix` refers to this asset when
    /// one directory list is a suffix of the other. For an asset at the
    /// project root only `./`, `../`, `/` or a bare `scheme://host/` qualify.
    fn directory_matches(&self, prefix: &str) -> bool {
        let path = match prefix.find("://") {
            Some(i) => {
                let rest = &prefix[i + 3..];
                rest.find('/').map_or("", |j| &rest[j..])
            }
            None => prefix,
        };
        let segments: Vec<&str> = path
            .split(|c| c == '/' || c == '\\')
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .collect();
        if segments.is_empty() {
            return true;
        }
        if self.dirs.is_empty() {
            return false;
        }
        let dirs: Vec<&str> = self.dirs.iter().map(String::as_str).collect();
        segments.ends_with(&dirs) || dirs.ends_with(&segments)
    }
}

fn is_boundary(c: char) -> bool {
    c.is_whitespace()
        || matches!(
            c,
            '"' | '\'' | '`' | '(' | ')' | '=' | '?' | '#' | ',' | ';' | '<' | '>'
        )
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Replace every standalone mention of the old file name. Returns the new
/// content and the number of replacements.
pub fn rewrite_text(content: &str, target: &ReferenceTarget) -> (String, usize) {
    if target.old_name.is_empty() {
        return (content.to_string(), 0);
    }

    let mut output = String::with_capacity(content.len());
    let mut last = 0;
    let mut count = 0;

    for (start, matched) in content.match_indices(target.old_name.as_str()) {
        let end = start + matched.len();
        let before = content[..start].chars().next_back();
        let after = content[end..].chars().next();

        let standalone_before = before.map_or(true, |c| is_boundary(c) || is_separator(c));
        let standalone_after = after.map_or(true, |c| is_boundary(c) || is_separator(c));
        if !standalone_before || !standalone_after {
            continue;
        }

        let token_start = content[..start]
            .char_indices()
            .rev()
            .find(|(_, c)| is_boundary(*c))
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        if !target.directory_matches(&content[token_start..start]) {
            continue;
        }

        output.push_str(&content[last..start]);
        output.push_str(&target.new_name);
        last = end;
        count += 1;
    }

    output.push_str(&content[last..]);
    (output, count)
}

/// Result of propagating one rename across the candidate text files
#[derive(Debug, Clone, Default, Serialize)]
pub struct RewriteReport {
    /// Mentions replaced, or found when not applying
    pub edits: usize,
    pub files_changed: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

pub struct ReferenceRewriter {
    locks: PathLocks,
}

impl ReferenceRewriter {
    pub fn new(locks: PathLocks) -> Self {
        Self { locks }
    }

    /// Rewrite mentions of `old_relative` to `new_relative` in `candidates`.
    /// With `apply = false` the mentions are only counted.
    pub async fn rewrite_references(
        &self,
        old_relative: &Path,
        new_relative: &Path,
        candidates: &[PathBuf],
        apply: bool,
    ) -> RewriteReport {
        let target = ReferenceTarget::new(old_relative, new_relative);
        let mut report = RewriteReport::default();

        for candidate in candidates {
            match self.rewrite_file(candidate, &target, apply).await {
                Ok(0) => {}
                Ok(edits) => {
                    debug!("{} mention(s) of {} in {}", edits, target.old_name, candidate.display());
                    report.edits += edits;
                    if apply {
                        report.files_changed.push(candidate.clone());
                    }
                }
                Err(e) => {
                    warn!("{}", e);
                    report.warnings.push(e.to_string());
                }
            }
        }

        if apply && report.edits > 0 {
            info!(
                "Rewrote {} reference(s) to {} in {} file(s)",
                report.edits,
                target.old_name,
                report.files_changed.len()
            );
        }
        report
    }

    async fn rewrite_file(
        &self,
        path: &Path,
        target: &ReferenceTarget,
        apply: bool,
    ) -> Result<usize, OptimizeError> {
        let _guard = self.locks.lock(path).await;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| OptimizeError::rewrite(path, e))?;
        if bytes.contains(&0) {
            return Err(OptimizeError::rewrite(path, "binary content, skipped"));
        }
        let content = String::from_utf8(bytes)
            .map_err(|_| OptimizeError::rewrite(path, "not valid UTF-8, skipped"))?;

        let (rewritten, edits) = rewrite_text(&content, target);
        if edits == 0 || !apply {
            return Ok(edits);
        }

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut temp = FileManager::temp_sibling(path, &extension)
            .map_err(|e| OptimizeError::rewrite(path, e))?;
        temp.write_all(rewritten.as_bytes())
            .and_then(|_| temp.flush())
            .map_err(|e| OptimizeError::rewrite(path, e))?;
        FileManager::commit_replacement(temp, path, true)
            .map_err(|e| OptimizeError::rewrite(path, e))?;
        Ok(edits)
    }
}
