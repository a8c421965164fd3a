use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// One table row as a list of cell strings, before any field mapping.
pub type RawRow = Vec<String>;

/// Kind of sale a property list announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleType {
    Upset,
    Judicial,
    Repository,
    TaxDeed,
    TaxLien,
    /// No hint on the document and no profile-declared sale type.
    Unknown,
}

impl SaleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleType::Upset => "upset",
            SaleType::Judicial => "judicial",
            SaleType::Repository => "repository",
            SaleType::TaxDeed => "tax_deed",
            SaleType::TaxLien => "tax_lien",
            SaleType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SaleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SaleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "upset" => Ok(SaleType::Upset),
            "judicial" => Ok(SaleType::Judicial),
            "repository" => Ok(SaleType::Repository),
            "tax_deed" => Ok(SaleType::TaxDeed),
            "tax_lien" => Ok(SaleType::TaxLien),
            "unknown" => Ok(SaleType::Unknown),
            _ => Err(format!("Unknown sale type: {}", s)),
        }
    }
}

/// Outcome of the most recent attempt to obtain a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Pending,
    Extracted,
    Denied,
    NotFound,
    Failed,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Pending => "pending",
            FetchStatus::Extracted => "extracted",
            FetchStatus::Denied => "denied",
            FetchStatus::NotFound => "not_found",
            FetchStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FetchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FetchStatus::Pending),
            "extracted" => Ok(FetchStatus::Extracted),
            "denied" => Ok(FetchStatus::Denied),
            "not_found" => Ok(FetchStatus::NotFound),
            "failed" => Ok(FetchStatus::Failed),
            _ => Err(format!("Unknown fetch status: {}", s)),
        }
    }
}

/// A registered property-list document awaiting or having undergone extraction.
///
/// Documents are produced upstream by discovery; the pipeline only reads them
/// and updates `fetch_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: Uuid,
    /// Stable jurisdiction identifier, e.g. `pa-blair`.
    pub jurisdiction_id: String,
    /// Two-letter state code; selects the parcel-number pattern family.
    pub state_code: String,
    pub title: Option<String>,
    /// URL or filesystem path of the document.
    pub location: String,
    pub sale_type_hint: Option<SaleType>,
    pub sale_date: Option<NaiveDate>,
    pub fetch_status: FetchStatus,
    pub registered_at: DateTime<Utc>,
}

/// DTO for registering a new document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSourceDocument {
    pub jurisdiction_id: String,
    pub state_code: String,
    pub title: Option<String>,
    pub location: String,
    pub sale_type_hint: Option<SaleType>,
    pub sale_date: Option<NaiveDate>,
}

impl NewSourceDocument {
    /// Materializes the DTO into a pending document with a fresh id.
    pub fn into_document(self) -> SourceDocument {
        SourceDocument {
            id: Uuid::new_v4(),
            jurisdiction_id: self.jurisdiction_id,
            state_code: self.state_code.to_uppercase(),
            title: self.title,
            location: self.location,
            sale_type_hint: self.sale_type_hint,
            sale_date: self.sale_date,
            fetch_status: FetchStatus::Pending,
            registered_at: Utc::now(),
        }
    }
}

/// What the scripted and assisted collaborators are told about a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentHints {
    pub document_id: Uuid,
    pub location: String,
    pub jurisdiction_id: String,
    pub state_code: String,
    pub title: Option<String>,
    pub sale_type: Option<SaleType>,
}

impl From<&SourceDocument> for DocumentHints {
    fn from(doc: &SourceDocument) -> Self {
        Self {
            document_id: doc.id,
            location: doc.location.clone(),
            jurisdiction_id: doc.jurisdiction_id.clone(),
            state_code: doc.state_code.clone(),
            title: doc.title.clone(),
            sale_type: doc.sale_type_hint,
        }
    }
}

/// Text read from a document's own text layer.
#[derive(Debug, Clone, Default)]
pub struct DocumentContent {
    pub rows: Vec<RawRow>,
    /// Text of the first page, for classification. Empty for row-only formats.
    pub first_page: String,
    pub content_hash: String,
}

/// Natural key of a property record: one parcel per jurisdiction per sale type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyKey {
    pub jurisdiction_id: String,
    pub parcel_id: String,
    pub sale_type: SaleType,
}

/// One extracted property listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub jurisdiction_id: String,
    pub parcel_id: String,
    pub sale_type: SaleType,
    /// Owner cell exactly as it appeared in the source.
    pub owner_raw: Option<String>,
    pub owner_name: Option<String>,
    pub address_raw: Option<String>,
    pub address: Option<String>,
    /// Township/borough/city section the row appeared under.
    pub municipality: Option<String>,
    pub tax_amount: Option<f64>,
    pub penalty_amount: Option<f64>,
    pub total_due: Option<f64>,
    pub sale_date: Option<NaiveDate>,
    pub tax_year: Option<i32>,
    /// Source row cells joined with ` | `.
    pub raw_text: String,
    pub document_id: Uuid,
    pub job_id: Uuid,
    pub confidence: f64,
    pub extracted_at: DateTime<Utc>,
}

impl PropertyRecord {
    pub fn key(&self) -> PropertyKey {
        PropertyKey {
            jurisdiction_id: self.jurisdiction_id.clone(),
            parcel_id: self.parcel_id.clone(),
            sale_type: self.sale_type,
        }
    }
}

/// A property record as held by the store.
#[derive(Debug, Clone, Serialize)]
pub struct StoredProperty {
    pub id: Uuid,
    #[serde(flatten)]
    pub record: PropertyRecord,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What an upsert did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// An existing record with higher confidence was left untouched.
    Skipped,
}

/// Compute a SHA-256 hash of raw bytes, returned as 64-char hex.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
