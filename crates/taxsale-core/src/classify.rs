use crate::models::{RawRow, SaleType};
use crate::profile::{FormatProfile, ProfileRegistry};

/// How many leading rows are sampled when a document has no page text.
pub const SAMPLE_ROWS: usize = 15;

#[derive(Debug, Clone, Copy)]
pub enum Classification<'a> {
    Matched {
        profile: &'a FormatProfile,
        score: usize,
    },
    Unknown,
}

impl<'a> Classification<'a> {
    pub fn profile(&self) -> Option<&'a FormatProfile> {
        match self {
            Classification::Matched { profile, .. } => Some(profile),
            Classification::Unknown => None,
        }
    }
}

/// Picks the profile whose signature tokens occur most often in `text`.
///
/// Ties go to the profile named after the declared sale type, then to the
/// one registered first. Profiles without a signature never match.
pub fn classify<'a>(
    registry: &'a ProfileRegistry,
    text: &str,
    sale_type_hint: Option<SaleType>,
) -> Classification<'a> {
    let upper = text.to_uppercase();
    let hint_name = sale_type_hint.map(|h| h.as_str());

    let mut best: Option<(&FormatProfile, usize)> = None;
    for profile in registry.iter().filter(|p| !p.signature.is_empty()) {
        let score = profile.signature_score(&upper);
        if score == 0 {
            continue;
        }
        let better = match best {
            None => true,
            Some((current, current_score)) => {
                score > current_score
                    || (score == current_score
                        && hint_name == Some(profile.name.as_str())
                        && hint_name != Some(current.name.as_str()))
            }
        };
        if better {
            best = Some((profile, score));
        }
    }

    match best {
        Some((profile, score)) => Classification::Matched { profile, score },
        None => Classification::Unknown,
    }
}

/// Builds classifier input from the first rows of a table.
pub fn sample_text(rows: &[RawRow]) -> String {
    rows.iter()
        .take(SAMPLE_ROWS)
        .map(|r| r.join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}
