//! # Classifier Module
//!
//! Questo modulo decide cosa fare di ogni asset. Nessun I/O: ogni regola si
//! testa senza disco e senza terminale.
//!
//! ## Regole, in ordine:
//! 1. dimensione < ideal target (se la categoria ne ha uno): skip, già ottimale
//! 2. dimensione < heavy threshold: skip, sotto la soglia
//! 3. altrimenti per categoria: immagini e video si comprimono, le GIF si
//!    convertono nel contenitore scelto, documenti e bundle si segnalano soltanto
//!
//! Le soglie sono inclusive: una dimensione uguale alla heavy threshold è pesante.

use crate::asset::{AssetRecord, Category};
use crate::config::ThresholdTable;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Container a heavy GIF is converted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GifFormat {
    Mp4,
    WebM,
}

impl GifFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::WebM => "webm",
        }
    }

    pub fn action(&self) -> Action {
        match self {
            Self::Mp4 => Action::ConvertToMp4,
            Self::WebM => Action::ConvertToWebM,
        }
    }
}

impl std::str::FromStr for GifFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" => Ok(Self::Mp4),
            "webm" => Ok(Self::WebM),
            other => Err(format!("unknown GIF target format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Skip,
    Compress,
    ConvertToMp4,
    ConvertToWebM,
    ReportOnly,
}

impl Action {
    /// Actions that go through backup and transform
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Compress | Self::ConvertToMp4 | Self::ConvertToWebM)
    }

    /// Target container when the action changes the file extension
    pub fn conversion_target(&self) -> Option<GifFormat> {
        match self {
            Self::ConvertToMp4 => Some(GifFormat::Mp4),
            Self::ConvertToWebM => Some(GifFormat::WebM),
            _ => None,
        }
    }
}

/// Why the classifier reached its decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    AlreadyOptimal,
    BelowHeavyThreshold,
    Heavy,
    /// Heavy GIF, but no container was chosen for it
    NoFormatChosen,
    /// Heavy, but the category has no eligible mutating action
    NoEligibleAction,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::AlreadyOptimal => "already optimal",
            Self::BelowHeavyThreshold => "below heavy threshold",
            Self::Heavy => "heavy",
            Self::NoFormatChosen => "no target format chosen",
            Self::NoEligibleAction => "heavy, no eligible action",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub asset: AssetRecord,
    pub action: Action,
    pub reason: Reason,
}

impl Decision {
    /// Bytes above the ideal target, the savings shown when asking for confirmation
    pub fn expected_savings(&self, table: &ThresholdTable) -> Option<u64> {
        if !self.action.is_mutating() {
            return None;
        }
        table
            .rule(self.asset.category)
            .and_then(|rule| rule.ideal_target)
            .map(|ideal| self.asset.size.saturating_sub(ideal))
    }

    pub fn is_heavy(&self) -> bool {
        !matches!(self.reason, Reason::AlreadyOptimal | Reason::BelowHeavyThreshold)
    }
}

/// Classify one asset. `gif_format` is the user's container choice for heavy
/// GIFs; size alone never decides a GIF conversion.
pub fn classify(
    asset: &AssetRecord,
    table: &ThresholdTable,
    gif_format: Option<GifFormat>,
) -> Decision {
    let decide = |action, reason| Decision {
        asset: asset.clone(),
        action,
        reason,
    };

    let Some(rule) = table.rule(asset.category) else {
        return decide(Action::ReportOnly, Reason::NoEligibleAction);
    };

    if let Some(ideal) = rule.ideal_target {
        if asset.size < ideal {
            return decide(Action::Skip, Reason::AlreadyOptimal);
        }
    }

    if asset.size < rule.heavy_threshold_for(&asset.extension) {
        return decide(Action::Skip, Reason::BelowHeavyThreshold);
    }

    let wanted = match asset.category {
        Category::Image | Category::Video => Some(Action::Compress),
        Category::Gif => match gif_format {
            Some(format) => Some(format.action()),
            None => return decide(Action::Skip, Reason::NoFormatChosen),
        },
        Category::Document | Category::Bundle => None,
    };

    match wanted {
        Some(action) if rule.allows(action) => decide(action, Reason::Heavy),
        _ => decide(Action::ReportOnly, Reason::NoEligibleAction),
    }
}
