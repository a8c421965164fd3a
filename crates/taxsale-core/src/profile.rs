use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::SaleType;

/// Profile used for collaborator output that already follows the canonical column order.
pub const CANONICAL_PROFILE: &str = "canonical";
/// Profile used when nothing matched but the document declares its sale type.
pub const GENERIC_PROFILE: &str = "generic";

const MUNICIPALITY_TOKENS: &[&str] = &["TOWNSHIP", "BOROUGH", "CITY OF"];
const ENTITY_TOKENS: &[&str] = &["LLC", "INC", "CORP", "TRUST"];

/// A record field a profile can map a column onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    ParcelId,
    OwnerName,
    Address,
    TaxAmount,
    PenaltyAmount,
    TotalDue,
    SaleDate,
}

/// Where a field lives in a row. `fallbacks` are tried in order when the
/// primary column is empty or unparseable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub field: Field,
    pub column: usize,
    #[serde(default)]
    pub fallbacks: Vec<usize>,
}

impl ColumnSpec {
    fn new(field: Field, column: usize) -> Self {
        Self {
            field,
            column,
            fallbacks: Vec::new(),
        }
    }

    fn with_fallbacks(mut self, fallbacks: &[usize]) -> Self {
        self.fallbacks = fallbacks.to_vec();
        self
    }
}

/// Row predicates that exclude a row from extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowFilter {
    /// Every cell is empty.
    Blank,
    /// Fewer than `min` cells.
    TooFewCells { min: usize },
    /// The first non-empty cell contains one of `tokens`.
    FirstCellContains { tokens: Vec<String> },
    /// Any cell contains one of `tokens` (column titles, repeated page headers).
    AnyCellContains { tokens: Vec<String> },
    /// A township/borough/city heading. The heading text becomes the
    /// municipality of the rows that follow.
    SectionHeader { tokens: Vec<String> },
    /// First cell is a capitalized label with no digits, longer than
    /// `min_len`, and none of the `except` tokens.
    CapsLabel { min_len: usize, except: Vec<String> },
}

fn upper_contains_any(haystack: &str, tokens: &[String]) -> bool {
    let upper = haystack.to_uppercase();
    tokens.iter().any(|t| upper.contains(&t.to_uppercase()))
}

/// First non-empty cell of a row, trimmed.
pub fn first_cell(row: &[String]) -> &str {
    row.iter()
        .map(|c| c.trim())
        .find(|c| !c.is_empty())
        .unwrap_or("")
}

impl RowFilter {
    pub fn matches(&self, row: &[String]) -> bool {
        match self {
            RowFilter::Blank => row.iter().all(|c| c.trim().is_empty()),
            RowFilter::TooFewCells { min } => row.len() < *min,
            RowFilter::FirstCellContains { tokens } | RowFilter::SectionHeader { tokens } => {
                upper_contains_any(first_cell(row), tokens)
            }
            RowFilter::AnyCellContains { tokens } => {
                row.iter().any(|c| upper_contains_any(c, tokens))
            }
            RowFilter::CapsLabel { min_len, except } => {
                let cell = first_cell(row);
                cell.len() > *min_len
                    && cell
                        .chars()
                        .all(|c| c.is_ascii_uppercase() || c.is_whitespace())
                    && !upper_contains_any(cell, except)
            }
        }
    }

    pub fn is_section_header(&self) -> bool {
        matches!(self, RowFilter::SectionHeader { .. })
    }
}

/// Column whose value must match `pattern` for a row to be a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordKey {
    pub column: usize,
    pub pattern: String,
    #[serde(skip)]
    compiled: OnceLock<Regex>,
}

impl RecordKey {
    pub fn new(column: usize, pattern: &str) -> Self {
        Self {
            column,
            pattern: pattern.to_string(),
            compiled: OnceLock::new(),
        }
    }

    pub fn regex(&self) -> Result<&Regex, AppError> {
        if let Some(re) = self.compiled.get() {
            return Ok(re);
        }
        let re = Regex::new(&self.pattern).map_err(|e| {
            AppError::ProfileError(format!("Invalid record key pattern '{}': {e}", self.pattern))
        })?;
        Ok(self.compiled.get_or_init(|| re))
    }

    pub fn accepts(&self, row: &[String]) -> bool {
        let cell = row.get(self.column).map(|c| c.trim()).unwrap_or("");
        self.regex().map(|re| re.is_match(cell)).unwrap_or(false)
    }
}

/// A declarative description of one family of property-list layouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatProfile {
    pub name: String,
    #[serde(default)]
    pub sale_type: Option<SaleType>,
    /// Tokens whose presence in the opening text identifies this layout.
    #[serde(default)]
    pub signature: Vec<String>,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub exclusions: Vec<RowFilter>,
    #[serde(default)]
    pub record_key: Option<RecordKey>,
    /// Scan every cell for each field instead of using fixed columns.
    #[serde(default)]
    pub scan_cells: bool,
}

impl FormatProfile {
    pub fn column(&self, field: Field) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.field == field)
    }

    /// Checks the profile can be used for extraction.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::ProfileError("Profile name is empty".into()));
        }
        if !self.scan_cells && self.column(Field::ParcelId).is_none() {
            return Err(AppError::ProfileError(format!(
                "Profile '{}' maps no parcel_id column",
                self.name
            )));
        }
        if let Some(key) = &self.record_key {
            key.regex()?;
        }
        Ok(())
    }

    /// Counts how many signature tokens occur in `upper_text`, which must
    /// already be uppercased.
    pub fn signature_score(&self, upper_text: &str) -> usize {
        self.signature
            .iter()
            .filter(|t| upper_text.contains(&t.to_uppercase()))
            .count()
    }

    /// The sheriff/tax-claim repository list: CAMA number, owner, address, map number, land use.
    pub fn repository() -> Self {
        Self {
            name: "repository".into(),
            sale_type: Some(SaleType::Repository),
            signature: tokens(&["CAMA", "REPUTED OWNER", "REPOSITORY", "LAND USE"]),
            columns: vec![
                ColumnSpec::new(Field::ParcelId, 3).with_fallbacks(&[0]),
                ColumnSpec::new(Field::OwnerName, 1),
                ColumnSpec::new(Field::Address, 2),
            ],
            exclusions: standard_exclusions(4, &["CAMA", "REPUTED OWNER", "PROPERTY DESC"]),
            record_key: Some(RecordKey::new(0, r"^\d{7,8}$")),
            scan_cells: false,
        }
    }

    /// Judicial sale list: control number, owner, map number, description, winning bid.
    pub fn judicial() -> Self {
        Self {
            name: "judicial".into(),
            sale_type: Some(SaleType::Judicial),
            signature: tokens(&["JUDICIAL", "WINNING BID", "CONTROL", "MAP NUMBER"]),
            columns: vec![
                ColumnSpec::new(Field::ParcelId, 3),
                ColumnSpec::new(Field::OwnerName, 2),
                ColumnSpec::new(Field::Address, 4),
                ColumnSpec::new(Field::TotalDue, 6),
            ],
            exclusions: standard_exclusions(5, &["CONTROL NO", "REPUTED OWNER", "WINNING BID"]),
            record_key: Some(RecordKey::new(1, r"^\d{3}-\d{6}$")),
            scan_cells: false,
        }
    }

    /// Upset sale list: control number, owner, map number, description, upset amount.
    pub fn upset() -> Self {
        Self {
            name: "upset".into(),
            sale_type: Some(SaleType::Upset),
            signature: tokens(&["UPSET", "APPROXIMATE", "CONTROL NO"]),
            columns: vec![
                ColumnSpec::new(Field::ParcelId, 3),
                ColumnSpec::new(Field::OwnerName, 2),
                ColumnSpec::new(Field::Address, 4),
                ColumnSpec::new(Field::TotalDue, 5),
            ],
            exclusions: standard_exclusions(6, &["CONTROL NO", "REPUTED OWNER", "UPSET AMOUNT"]),
            record_key: Some(RecordKey::new(1, r"^\d{3}-\d{6}$")),
            scan_cells: false,
        }
    }

    /// Fixed column order produced by the scripted and assisted collaborators:
    /// parcel, owner, address, tax, penalty, total due, sale date.
    pub fn canonical() -> Self {
        Self {
            name: CANONICAL_PROFILE.into(),
            sale_type: None,
            signature: Vec::new(),
            columns: vec![
                ColumnSpec::new(Field::ParcelId, 0),
                ColumnSpec::new(Field::OwnerName, 1),
                ColumnSpec::new(Field::Address, 2),
                ColumnSpec::new(Field::TaxAmount, 3),
                ColumnSpec::new(Field::PenaltyAmount, 4),
                ColumnSpec::new(Field::TotalDue, 5),
                ColumnSpec::new(Field::SaleDate, 6),
            ],
            exclusions: vec![RowFilter::Blank],
            record_key: None,
            scan_cells: false,
        }
    }

    /// Best-effort profile: every field is guessed by scanning the row.
    pub fn generic() -> Self {
        Self {
            name: GENERIC_PROFILE.into(),
            sale_type: None,
            signature: Vec::new(),
            columns: Vec::new(),
            exclusions: vec![
                RowFilter::Blank,
                RowFilter::TooFewCells { min: 2 },
                RowFilter::SectionHeader {
                    tokens: tokens(MUNICIPALITY_TOKENS),
                },
                RowFilter::AnyCellContains {
                    tokens: tokens(&["PARCEL ID", "PARCEL NO", "OWNER NAME", "REPUTED OWNER"]),
                },
            ],
            record_key: None,
            scan_cells: true,
        }
    }
}

fn tokens(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn standard_exclusions(min_cells: usize, column_titles: &[&str]) -> Vec<RowFilter> {
    vec![
        RowFilter::Blank,
        RowFilter::SectionHeader {
            tokens: tokens(MUNICIPALITY_TOKENS),
        },
        RowFilter::AnyCellContains {
            tokens: tokens(column_titles),
        },
        RowFilter::TooFewCells { min: min_cells },
        RowFilter::CapsLabel {
            min_len: 5,
            except: tokens(ENTITY_TOKENS),
        },
    ]
}

/// Ordered set of format profiles. Registration order breaks classification ties.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: Vec<FormatProfile>,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProfileRegistry {
    pub fn builtin() -> Self {
        Self {
            profiles: vec![
                FormatProfile::repository(),
                FormatProfile::judicial(),
                FormatProfile::upset(),
                FormatProfile::canonical(),
                FormatProfile::generic(),
            ],
        }
    }

    /// Adds a profile after validating it. A profile with an existing name
    /// replaces the old one in place.
    pub fn register(&mut self, profile: FormatProfile) -> Result<(), AppError> {
        profile.validate()?;
        match self.profiles.iter_mut().find(|p| p.name == profile.name) {
            Some(existing) => *existing = profile,
            None => self.profiles.push(profile),
        }
        Ok(())
    }

    /// Loads every `*.json` file in `dir` as a profile, in file-name order.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, AppError> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            AppError::ConfigError(format!("Cannot read profiles dir {}: {e}", dir.display()))
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        for path in &paths {
            let content = std::fs::read_to_string(path).map_err(|e| {
                AppError::ProfileError(format!("Failed to read {}: {e}", path.display()))
            })?;
            let profile: FormatProfile = serde_json::from_str(&content).map_err(|e| {
                AppError::ProfileError(format!("Invalid profile {}: {e}", path.display()))
            })?;
            self.register(profile)?;
        }

        Ok(paths.len())
    }

    pub fn get(&self, name: &str) -> Option<&FormatProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FormatProfile> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
