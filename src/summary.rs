//! # Run Summary Module
//!
//! Questo modulo costruisce il resoconto finale: una `SummaryRow` per asset,
//! in ordine di scoperta, con le colonne `path, category, before, after, saved, status`.
//!
//! ## Responsabilità:
//! - Tabella testuale con colonna di riduzione e footer dei totali
//! - Report JSON con le colonne e l'oggetto `totals`
//! - Il `saved` del footer è la somma della colonna `saved`

use crate::asset::{AssetRecord, Category};
use crate::classifier::{Action, GifFormat};
use crate::file_manager::FileManager;
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

/// Final state of one asset, rendered as the human-readable status column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Compressed,
    Converted {
        format: GifFormat,
        /// The converted file came from an earlier run
        existing: bool,
        references_rewritten: usize,
        references_left: usize,
        source_removed: bool,
    },
    AlreadyOptimal,
    BelowHeavyThreshold,
    ReportOnly,
    SkippedByUser,
    DryRun(Action),
    BackupFailed,
    TransformFailed,
    Cancelled,
}

impl Status {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::BackupFailed | Self::TransformFailed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compressed => f.write_str("compressed"),
            Self::Converted {
                format,
                existing,
                references_rewritten,
                references_left,
                source_removed,
            } => {
                if *existing {
                    f.write_str("already ")?;
                }
                write!(f, "converted to {}", format.extension())?;
                if *references_rewritten > 0 {
                    write!(f, "; {} references rewritten", references_rewritten)?;
                }
                if *references_left > 0 {
                    write!(f, "; {} references left unrewritten", references_left)?;
                }
                if *source_removed {
                    f.write_str("; gif removed")?;
                }
                Ok(())
            }
            Self::AlreadyOptimal => f.write_str("already optimal"),
            Self::BelowHeavyThreshold => f.write_str("below heavy threshold"),
            Self::ReportOnly => f.write_str("report only"),
            Self::SkippedByUser => f.write_str("skipped by user"),
            Self::DryRun(action) => match action.conversion_target() {
                Some(format) => write!(f, "dry run: would convert to {}", format.extension()),
                None => f.write_str("dry run: would compress"),
            },
            Self::BackupFailed => f.write_str("backup failed - not transformed"),
            Self::TransformFailed => f.write_str("failed - original preserved"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    /// Relative path with forward slashes
    pub path: String,
    pub category: Category,
    pub before: u64,
    pub after: u64,
    pub saved: u64,
    pub status: Status,
    /// Error text for failed rows, shown under the table
    #[serde(skip)]
    pub detail: Option<String>,
}

impl SummaryRow {
    /// Row for an asset whose bytes did not change
    pub fn unchanged(asset: &AssetRecord, status: Status) -> Self {
        Self {
            path: asset.display_path(),
            category: asset.category,
            before: asset.size,
            after: asset.size,
            saved: 0,
            status,
            detail: None,
        }
    }

    pub fn changed(asset: &AssetRecord, before: u64, after: u64, status: Status) -> Self {
        Self {
            path: asset.display_path(),
            category: asset.category,
            before,
            after,
            saved: before.saturating_sub(after),
            status,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }

    pub fn reduction_percent(&self) -> f64 {
        FileManager::calculate_reduction(self.before, self.after)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Totals {
    pub files: usize,
    pub before: u64,
    pub after: u64,
    pub saved: u64,
    pub reduction_percent: f64,
    pub failures: usize,
    pub text_files_updated: usize,
    pub references_unrewritten: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub rows: Vec<SummaryRow>,
    pub backup_root: Option<PathBuf>,
    pub text_files_updated: usize,
    pub references_unrewritten: usize,
    pub dry_run: bool,
}

impl Summary {
    pub fn totals(&self) -> Totals {
        let before: u64 = self.rows.iter().map(|r| r.before).sum();
        let after: u64 = self.rows.iter().map(|r| r.after).sum();
        // Rows that grew count as zero saved, same as their own column
        let saved: u64 = self.rows.iter().map(|r| r.saved).sum();
        Totals {
            files: self.rows.len(),
            before,
            after,
            saved,
            reduction_percent: FileManager::calculate_reduction(before, before - saved),
            failures: self.rows.iter().filter(|r| r.status.is_failure()).count(),
            text_files_updated: self.text_files_updated,
            references_unrewritten: self.references_unrewritten,
        }
    }

    pub fn row(&self, path: &str) -> Option<&SummaryRow> {
        self.rows.iter().find(|r| r.path == path)
    }

    /// Pretty JSON for `--report`
    pub fn to_report_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Report<'a> {
            rows: &'a [SummaryRow],
            totals: Totals,
            backup_root: Option<&'a PathBuf>,
            dry_run: bool,
        }
        serde_json::to_string_pretty(&Report {
            rows: &self.rows,
            totals: self.totals(),
            backup_root: self.backup_root.as_ref(),
            dry_run: self.dry_run,
        })
    }

    /// Text table with a totals footer
    pub fn render_table(&self) -> String {
        let headers = ["path", "category", "before", "after", "saved", "reduction", "status"];
        let cells: Vec<[String; 7]> = self
            .rows
            .iter()
            .map(|row| {
                [
                    row.path.clone(),
                    row.category.to_string(),
                    FileManager::format_size(row.before),
                    FileManager::format_size(row.after),
                    FileManager::format_size(row.saved),
                    format!("{:.1}%", row.reduction_percent()),
                    row.status.to_string(),
                ]
            })
            .collect();

        let mut widths = headers.map(str::len);
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row.iter()) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let mut out = String::new();
        let line = |cols: &[String], out: &mut String| {
            let padded: Vec<String> = cols
                .iter()
                .zip(widths.iter())
                .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
                .collect();
            out.push_str(padded.join("  ").trim_end());
            out.push('\n');
        };

        line(&headers.map(str::to_string), &mut out);
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        line(&rule, &mut out);
        for row in &cells {
            line(row, &mut out);
        }

        for row in self.rows.iter().filter(|r| r.detail.is_some()) {
            if let Some(detail) = &row.detail {
                out.push_str(&format!("  ! {}: {}\n", row.path, detail));
            }
        }

        let totals = self.totals();
        out.push('\n');
        out.push_str(&format!("Files: {}\n", totals.files));
        out.push_str(&format!(
            "Total: {} -> {}, saved {} ({:.1}%)\n",
            FileManager::format_size(totals.before),
            FileManager::format_size(totals.after),
            FileManager::format_size(totals.saved),
            totals.reduction_percent
        ));
        if totals.failures > 0 {
            out.push_str(&format!("Failures: {} (originals intact)\n", totals.failures));
        }
        if let Some(root) = &self.backup_root {
            out.push_str(&format!("Backups: {}\n", root.display()));
        }
        if totals.text_files_updated > 0 {
            out.push_str(&format!("Text files updated: {}\n", totals.text_files_updated));
        }
        if totals.references_unrewritten > 0 {
            out.push_str(&format!(
                "{} references left unrewritten\n",
                totals.references_unrewritten
            ));
        }
        if self.dry_run {
            out.push_str("Dry run: nothing was changed\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn asset(name: &str, size: u64) -> AssetRecord {
        AssetRecord::new(Path::new("/site"), &Path::new("/site").join(name), size).unwrap()
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(Status::Compressed.to_string(), "compressed");
        assert_eq!(
            Status::Converted {
                format: GifFormat::WebM,
                existing: false,
                references_rewritten: 2,
                references_left: 0,
                source_removed: false,
            }
            .to_string(),
            "converted to webm; 2 references rewritten"
        );
        assert_eq!(
            Status::Converted {
                format: GifFormat::Mp4,
                existing: false,
                references_rewritten: 0,
                references_left: 3,
                source_removed: false,
            }
            .to_string(),
            "converted to mp4; 3 references left unrewritten"
        );
        assert_eq!(
            Status::Converted {
                format: GifFormat::WebM,
                existing: true,
                references_rewritten: 0,
                references_left: 0,
                source_removed: false,
            }
            .to_string(),
            "already converted to webm"
        );
        assert_eq!(
            Status::DryRun(Action::ConvertToWebM).to_string(),
            "dry run: would convert to webm"
        );
        assert_eq!(Status::DryRun(Action::Compress).to_string(), "dry run: would compress");
        assert_eq!(Status::TransformFailed.to_string(), "failed - original preserved");
    }

    #[test]
    fn test_totals_and_reduction() {
        let summary = Summary {
            rows: vec![
                SummaryRow::changed(&asset("a.jpg", 900_000), 900_000, 200_000, Status::Compressed),
                SummaryRow::unchanged(&asset("b.png", 100_000), Status::AlreadyOptimal),
                SummaryRow::unchanged(&asset("c.jpg", 900_000), Status::TransformFailed),
            ],
            ..Default::default()
        };
        let totals = summary.totals();
        assert_eq!(totals.files, 3);
        assert_eq!(totals.before, 1_900_000);
        assert_eq!(totals.after, 1_200_000);
        assert_eq!(totals.saved, 700_000);
        assert_eq!(totals.failures, 1);
        assert_eq!(summary.row("a.jpg").unwrap().saved, 700_000);
    }

    #[test]
    fn test_footer_saved_matches_saved_column() {
        let summary = Summary {
            rows: vec![
                SummaryRow::changed(&asset("hero.jpg", 900_000), 900_000, 200_000, Status::Compressed),
                SummaryRow::changed(
                    &asset("anim.gif", 2_000_000),
                    2_000_000,
                    2_500_000,
                    Status::Converted {
                        format: GifFormat::WebM,
                        existing: false,
                        references_rewritten: 0,
                        references_left: 0,
                        source_removed: false,
                    },
                ),
            ],
            ..Default::default()
        };
        let column: u64 = summary.rows.iter().map(|r| r.saved).sum();
        let totals = summary.totals();
        assert_eq!(column, 700_000);
        assert_eq!(totals.saved, column);
        assert_eq!(totals.before, 2_900_000);
        assert_eq!(totals.after, 2_700_000);
        assert!(summary.render_table().contains(&format!(
            "saved {}",
            FileManager::format_size(700_000)
        )));
    }

    #[test]
    fn test_render_table_columns_and_footer() {
        let summary = Summary {
            rows: vec![SummaryRow::changed(
                &asset("img/hero.jpg", 1000),
                1000,
                250,
                Status::Compressed,
            )],
            backup_root: Some(PathBuf::from("/site/backup_originals")),
            references_unrewritten: 2,
            ..Default::default()
        };
        let table = summary.render_table();
        let mut lines = table.lines();
        assert!(lines.next().unwrap().starts_with("path"));
        assert!(table.contains("img/hero.jpg"));
        assert!(table.contains("75.0%"));
        assert!(table.contains("Backups: /site/backup_originals"));
        assert!(table.contains("2 references left unrewritten"));
    }

    #[test]
    fn test_report_json_columns() {
        let summary = Summary {
            rows: vec![SummaryRow::unchanged(&asset("doc.pdf", 6_000_000), Status::ReportOnly)
                .with_detail(Some("ignored".to_string()))],
            ..Default::default()
        };
        let json: serde_json::Value =
            serde_json::from_str(&summary.to_report_json().unwrap()).unwrap();
        let row = &json["rows"][0];
        assert_eq!(row["path"], "doc.pdf");
        assert_eq!(row["category"], "document");
        assert_eq!(row["saved"], 0);
        assert_eq!(row["status"], "report only");
        assert!(row.get("detail").is_none());
        assert_eq!(json["totals"]["files"], 1);
    }
}
