//! Row-level field extraction: maps table cells onto record fields using a
//! format profile, with parcel-number validation and currency parsing.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::models::RawRow;
use crate::normalize::{GivenNames, normalize_address, normalize_name};
use crate::profile::{Field, FormatProfile, first_cell};

/// Cells containing any of these are headings or column titles, never parcel numbers.
const PARCEL_REJECT_TOKENS: &[&str] = &[
    "TOWNSHIP",
    "BOROUGH",
    "CITY OF",
    "CAMA",
    "MAP NUMBER",
    "CONTROL",
    "OWNER",
    "DESCRIPTION",
    "LAND USE",
];

const MUNICIPALITY_TOKENS: &[&str] = &["TOWNSHIP", "BOROUGH", "CITY OF"];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("valid parcel regex"))
        .collect()
}

static FAMILY_PATTERNS: LazyLock<Vec<(&'static str, Vec<Regex>)>> = LazyLock::new(|| {
    vec![
        (
            "PA",
            compile(&[
                r"\d{2}\.\d{2}-\d{2}\.+-\d{3}\.\d{2}-\d{3}",
                r"\d{2,3}-\d{2,3}-\d{3,4}\.?\d?",
            ]),
        ),
        ("FL", compile(&[r"\d{2}-\d{2}-\d{2}-\d{4}-\d{3}-\d{4}"])),
        ("TX", compile(&[r"\d{5,10}"])),
    ]
});

static DEFAULT_PATTERNS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r"\d{2,3}[-\.]\d{2,3}[-\.]\d{3,4}", r"\d{8,12}"]));

static STREET_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+.*\b(ST|AVE|RD|DR|LN|CT|WAY|BLVD|ALY|PIKE|HWY)\b").expect("valid address regex")
});

static OWNER_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z\s&,\.']+$").expect("valid owner regex"));

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y", "%B %d, %Y", "%b %d, %Y"];

/// A parcel number pulled out of a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParcelMatch {
    pub value: String,
    /// Matched only a jurisdiction-agnostic pattern.
    pub best_effort: bool,
}

/// Finds a parcel number in `cell`, trying the state's pattern family before
/// the generic patterns. Whitespace inside the cell is ignored.
pub fn parse_parcel_id(cell: &str, state_code: &str) -> Option<ParcelMatch> {
    let upper = cell.to_uppercase();
    if PARCEL_REJECT_TOKENS.iter().any(|t| upper.contains(t)) {
        return None;
    }

    let compact: String = cell.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }

    let state = state_code.trim().to_uppercase();
    if let Some((_, patterns)) = FAMILY_PATTERNS.iter().find(|(family, _)| *family == state)
        && let Some(m) = patterns.iter().find_map(|re| re.find(&compact))
    {
        return Some(ParcelMatch {
            value: m.as_str().to_string(),
            best_effort: false,
        });
    }

    DEFAULT_PATTERNS
        .iter()
        .find_map(|re| re.find(&compact))
        .map(|m| ParcelMatch {
            value: m.as_str().to_string(),
            best_effort: true,
        })
}

/// Parses a money cell. `$` and `,` are stripped and parentheses mean a
/// negative amount. Markers like `Not Sold` yield `None`.
pub fn parse_currency(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    let (negative, body) = match trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
    {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };

    let clean: String = body
        .chars()
        .filter(|c| !matches!(c, '$' | ',') && !c.is_whitespace())
        .collect();
    if clean.is_empty() {
        return None;
    }

    let value: f64 = clean.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

pub fn parse_date(cell: &str) -> Option<NaiveDate> {
    let trimmed = cell.trim();
    // Timestamps like "2026-03-11 10:00:00" keep only the date.
    let date_part = trimmed.split_whitespace().next().unwrap_or("");
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(trimmed, fmt)
            .or_else(|_| NaiveDate::parse_from_str(date_part, fmt))
            .ok()
    })
}

/// Splits plain text into rows. Cells are separated by tabs, or by runs of
/// two or more spaces when a line has no tabs. Blank lines are dropped.
pub fn split_rows(text: &str) -> Vec<RawRow> {
    static CELL_GAP: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\s{2,}").expect("valid gap regex"));

    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let cells: Vec<&str> = if line.contains('\t') {
                line.split('\t').collect()
            } else {
                CELL_GAP.split(line.trim()).collect()
            };
            cells.into_iter().map(|c| c.trim().to_string()).collect()
        })
        .collect()
}

/// Joins the non-empty cells of a row the way provenance text is stored.
pub fn raw_text(row: &[String]) -> String {
    row.iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Field values recovered from one row, before job and document context is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    pub parcel_id: String,
    pub owner_raw: Option<String>,
    pub owner_name: Option<String>,
    pub address_raw: Option<String>,
    pub address: Option<String>,
    pub municipality: Option<String>,
    pub tax_amount: Option<f64>,
    pub penalty_amount: Option<f64>,
    pub total_due: Option<f64>,
    pub sale_date: Option<NaiveDate>,
    pub raw_text: String,
    /// Fields that came from a fallback column or a best-effort pattern.
    pub fallbacks: u32,
}

/// What happened to one row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Record(CandidateRecord),
    /// A municipality heading; applies to the rows below it.
    Section(String),
    Excluded,
    Failed(String),
}

/// Result of running a profile over a whole table.
#[derive(Debug, Clone, Default)]
pub struct ExtractedRows {
    pub records: Vec<CandidateRecord>,
    pub excluded: u32,
    pub failed: u32,
}

/// Applies one format profile to rows.
pub struct RowExtractor<'a> {
    profile: &'a FormatProfile,
    given_names: &'a GivenNames,
    state_code: &'a str,
}

struct FieldValue<T> {
    value: Option<T>,
    degraded: bool,
}

impl<'a> RowExtractor<'a> {
    pub fn new(profile: &'a FormatProfile, given_names: &'a GivenNames, state_code: &'a str) -> Self {
        Self {
            profile,
            given_names,
            state_code,
        }
    }

    pub fn profile(&self) -> &FormatProfile {
        self.profile
    }

    /// Runs every row through the profile, carrying municipality headings
    /// forward onto the records that follow them.
    pub fn extract_all(&self, rows: &[RawRow]) -> ExtractedRows {
        let mut result = ExtractedRows::default();
        let mut municipality: Option<String> = None;

        for row in rows {
            match self.extract_row(row) {
                RowOutcome::Record(mut record) => {
                    record.municipality = municipality.clone();
                    result.records.push(record);
                }
                RowOutcome::Section(name) => {
                    municipality = Some(name);
                    result.excluded += 1;
                }
                RowOutcome::Excluded => result.excluded += 1,
                RowOutcome::Failed(reason) => {
                    tracing::debug!(profile = %self.profile.name, %reason, "Row failed");
                    result.failed += 1;
                }
            }
        }

        result
    }

    pub fn extract_row(&self, row: &[String]) -> RowOutcome {
        if let Some(filter) = self.profile.exclusions.iter().find(|f| f.matches(row)) {
            if filter.is_section_header() {
                return RowOutcome::Section(first_cell(row).to_string());
            }
            return RowOutcome::Excluded;
        }

        if let Some(key) = &self.profile.record_key
            && !key.accepts(row)
        {
            return RowOutcome::Failed(format!(
                "record key column {} does not match {}",
                key.column, key.pattern
            ));
        }

        let candidate = if self.profile.scan_cells {
            self.scan_row(row)
        } else {
            self.map_columns(row)
        };

        match candidate {
            Some(record) => RowOutcome::Record(record),
            None => RowOutcome::Failed("no parcel identifier".into()),
        }
    }

    fn map_columns(&self, row: &[String]) -> Option<CandidateRecord> {
        let parcel = self.read(row, Field::ParcelId, |c| parse_parcel_id(c, self.state_code));
        let parcel_match = parcel.value?;

        let owner = self.read(row, Field::OwnerName, non_empty);
        let address = self.read(row, Field::Address, non_empty);
        let tax = self.read(row, Field::TaxAmount, parse_currency);
        let penalty = self.read(row, Field::PenaltyAmount, parse_currency);
        let total = self.read(row, Field::TotalDue, parse_currency);
        let sale_date = self.read(row, Field::SaleDate, parse_date);

        let fallbacks = [
            parcel.degraded || parcel_match.best_effort,
            owner.degraded,
            address.degraded,
            tax.degraded,
            penalty.degraded,
            total.degraded,
            sale_date.degraded,
        ]
        .iter()
        .filter(|d| **d)
        .count() as u32;

        Some(CandidateRecord {
            parcel_id: parcel_match.value,
            owner_name: owner.value.as_deref().map(|o| normalize_name(o, self.given_names)),
            owner_raw: owner.value,
            address: address.value.as_deref().map(normalize_address),
            address_raw: address.value,
            municipality: None,
            tax_amount: tax.value,
            penalty_amount: penalty.value,
            total_due: total.value,
            sale_date: sale_date.value,
            raw_text: raw_text(row),
            fallbacks,
        })
    }

    fn read<T>(&self, row: &[String], field: Field, parse: impl Fn(&str) -> Option<T>) -> FieldValue<T> {
        let Some(spec) = self.profile.column(field) else {
            return FieldValue {
                value: None,
                degraded: false,
            };
        };

        let cell_value = |idx: usize| row.get(idx).and_then(|c| parse(c.trim()));

        if let Some(value) = cell_value(spec.column) {
            return FieldValue {
                value: Some(value),
                degraded: false,
            };
        }
        match spec.fallbacks.iter().find_map(|idx| cell_value(*idx)) {
            Some(value) => FieldValue {
                value: Some(value),
                degraded: true,
            },
            None => FieldValue {
                value: None,
                degraded: false,
            },
        }
    }

    /// Guesses every field from cell content. Each field found this way
    /// counts as a fallback.
    fn scan_row(&self, row: &[String]) -> Option<CandidateRecord> {
        let mut parcel: Option<ParcelMatch> = None;
        let mut owner: Option<String> = None;
        let mut address: Option<String> = None;
        let mut amount: Option<f64> = None;

        for cell in row.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
            let upper = cell.to_uppercase();
            if parcel.is_none() {
                parcel = parse_parcel_id(cell, self.state_code);
                if parcel.is_some() {
                    continue;
                }
            }
            if amount.is_none() && cell.contains('$') {
                amount = parse_currency(cell);
            }
            if address.is_none() && STREET_ADDRESS.is_match(&upper) {
                address = Some(cell.to_string());
            } else if owner.is_none()
                && cell.len() > 5
                && OWNER_LIKE.is_match(cell)
                && !MUNICIPALITY_TOKENS.iter().any(|t| upper.contains(t))
            {
                owner = Some(cell.to_string());
            }
        }

        let parcel = parcel?;
        let fallbacks = 1 + [owner.is_some(), address.is_some(), amount.is_some()]
            .iter()
            .filter(|f| **f)
            .count() as u32;

        Some(CandidateRecord {
            parcel_id: parcel.value,
            owner_name: owner.as_deref().map(|o| normalize_name(o, self.given_names)),
            owner_raw: owner,
            address: address.as_deref().map(normalize_address),
            address_raw: address,
            municipality: None,
            tax_amount: None,
            penalty_amount: None,
            total_due: amount,
            sale_date: None,
            raw_text: raw_text(row),
            fallbacks,
        })
    }
}

fn non_empty(cell: &str) -> Option<String> {
    let trimmed = cell.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> RawRow {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_parse_currency() {
        assert_eq!(parse_currency("$1,234.56"), Some(1234.56));
        assert_eq!(parse_currency(" 2,000 "), Some(2000.0));
        assert_eq!(parse_currency("($12.50)"), Some(-12.5));
        assert_eq!(parse_currency("Not Sold"), None);
        assert_eq!(parse_currency(""), None);
        assert_eq!(parse_currency("$"), None);
        assert_eq!(parse_currency("inf"), None);
    }

    #[test]
    fn test_parse_date() {
        let expected = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
        assert_eq!(parse_date("2026-03-11"), Some(expected));
        assert_eq!(parse_date("03/11/2026"), Some(expected));
        assert_eq!(parse_date("March 11, 2026"), Some(expected));
        assert_eq!(parse_date("2026-03-11 10:00:00"), Some(expected));
        assert_eq!(parse_date("soon"), None);
    }

    #[test]
    fn test_parcel_family_patterns() {
        let blair = parse_parcel_id("0 1 . 05-16..-093.00-000", "PA").unwrap();
        assert_eq!(blair.value, "01.05-16..-093.00-000");
        assert!(!blair.best_effort);

        let florida = parse_parcel_id("12-34-56-7890-123-4567", "fl").unwrap();
        assert_eq!(florida.value, "12-34-56-7890-123-4567");
        assert!(!florida.best_effort);

        let texas = parse_parcel_id("R 123456", "TX").unwrap();
        assert_eq!(texas.value, "123456");
    }

    #[test]
    fn test_parcel_falls_back_to_default_patterns() {
        let parcel = parse_parcel_id("123.456.7890", "OH").unwrap();
        assert_eq!(parcel.value, "123.456.7890");
        assert!(parcel.best_effort);

        let cama = parse_parcel_id("01234567", "PA").unwrap();
        assert!(cama.best_effort);
    }

    #[test]
    fn test_parcel_rejects_headings() {
        assert_eq!(parse_parcel_id("CITY OF ALTOONA 2024", "PA"), None);
        assert_eq!(parse_parcel_id("MAP NUMBER", "PA"), None);
        assert_eq!(parse_parcel_id("Control No 101-000123", "PA"), None);
        assert_eq!(parse_parcel_id("", "PA"), None);
        assert_eq!(parse_parcel_id("VACANT LOT", "PA"), None);
    }

    #[test]
    fn test_split_rows() {
        let text = "101-000123\tB A R N ER DAVID W\t01.05-16..-093.00-000\n\n\
                    *   101-000124   NOLAND TRAVIS   01.02-07..-034.00-000\n";
        let rows = split_rows(text);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1], "B A R N ER DAVID W");
        assert_eq!(rows[1], row(&["*", "101-000124", "NOLAND TRAVIS", "01.02-07..-034.00-000"]));
    }

    #[test]
    fn test_row_filtering_municipality() {
        let profile = FormatProfile::judicial();
        let names = GivenNames::default();
        let extractor = RowExtractor::new(&profile, &names, "PA");
        assert_eq!(
            extractor.extract_row(&row(&["CITY OF ALTOONA"])),
            RowOutcome::Section("CITY OF ALTOONA".into())
        );
        assert_eq!(extractor.extract_row(&row(&["", "", ""])), RowOutcome::Excluded);
        assert_eq!(
            extractor.extract_row(&row(&[
                "*",
                "CONTROL NO",
                "REPUTED OWNER",
                "MAP NUMBER",
                "DESCRIPTION",
                "LAND USE",
                "WINNING BID"
            ])),
            RowOutcome::Excluded
        );
    }

    #[test]
    fn test_judicial_row_maps_columns() {
        let profile = FormatProfile::judicial();
        let names = GivenNames::default();
        let extractor = RowExtractor::new(&profile, &names, "PA");

        let outcome = extractor.extract_row(&row(&[
            "*",
            "101-000123",
            "B A R N ER DAVID W",
            "01.05-16..-093.00-000",
            "8 1 5 3RD AVE",
            "R",
            "$1,250.00",
            "SMITH JOHN",
        ]));
        let RowOutcome::Record(record) = outcome else {
            panic!("expected record, got {outcome:?}");
        };
        assert_eq!(record.parcel_id, "01.05-16..-093.00-000");
        assert_eq!(record.owner_raw.as_deref(), Some("B A R N ER DAVID W"));
        assert_eq!(record.owner_name.as_deref(), Some("BARNER DAVID W"));
        assert_eq!(record.address.as_deref(), Some("815 3RD AVE"));
        assert_eq!(record.total_due, Some(1250.0));
        assert_eq!(record.fallbacks, 0);
        assert!(record.raw_text.starts_with("* | 101-000123 | B A R N ER"));
    }

    #[test]
    fn test_not_sold_leaves_amount_empty() {
        let profile = FormatProfile::judicial();
        let names = GivenNames::default();
        let extractor = RowExtractor::new(&profile, &names, "PA");
        let outcome = extractor.extract_row(&row(&[
            "*",
            "101-000125",
            "NOLAND TRAVIS",
            "01.02-07..-034.00-000",
            "12 MAIN ST",
            "R",
            "Not Sold",
        ]));
        let RowOutcome::Record(record) = outcome else {
            panic!("expected record");
        };
        assert_eq!(record.total_due, None);
    }

    #[test]
    fn test_bad_control_number_fails_row() {
        let profile = FormatProfile::upset();
        let names = GivenNames::default();
        let extractor = RowExtractor::new(&profile, &names, "PA");
        let outcome = extractor.extract_row(&row(&[
            "",
            "continued",
            "NOLAND TRAVIS",
            "01.02-07..-034.00-000",
            "12 MAIN ST",
            "$100.00",
        ]));
        assert!(matches!(outcome, RowOutcome::Failed(_)));
    }

    #[test]
    fn test_fallback_column_counts() {
        let profile = FormatProfile::repository();
        let names = GivenNames::default();
        let extractor = RowExtractor::new(&profile, &names, "PA");
        let outcome = extractor.extract_row(&row(&[
            "01234567",
            "KELLY ROBERT",
            "44 ELM ST",
            "",
            "R",
        ]));
        let RowOutcome::Record(record) = outcome else {
            panic!("expected record");
        };
        assert_eq!(record.parcel_id, "01234567");
        // Fallback column and a best-effort pattern are one degraded field.
        assert_eq!(record.fallbacks, 1);
    }

    #[test]
    fn test_generic_scan() {
        let profile = FormatProfile::generic();
        let names = GivenNames::default();
        let extractor = RowExtractor::new(&profile, &names, "PA");
        let outcome = extractor.extract_row(&row(&[
            "12-345-6789",
            "HOLLOWAY MARGARET",
            "1 5 08 13TH ALY",
            "$410.22",
        ]));
        let RowOutcome::Record(record) = outcome else {
            panic!("expected record");
        };
        assert_eq!(record.parcel_id, "12-345-6789");
        assert_eq!(record.owner_name.as_deref(), Some("HOLLOWAY MARGARET"));
        assert_eq!(record.address.as_deref(), Some("1508 13TH ALY"));
        assert_eq!(record.total_due, Some(410.22));
        assert_eq!(record.fallbacks, 4);
    }

    #[test]
    fn test_extract_all_tracks_municipality() {
        let profile = FormatProfile::upset();
        let names = GivenNames::default();
        let extractor = RowExtractor::new(&profile, &names, "PA");
        let rows = vec![
            row(&["", "CONTROL NO", "REPUTED OWNER", "MAP NUMBER", "DESCRIPTION", "UPSET AMOUNT"]),
            row(&["ANTIS TOWNSHIP"]),
            row(&["", "101-000001", "DOE JANE", "01.05-16..-093.00-000", "RD 1", "$1,000.00"]),
            row(&["CITY OF ALTOONA"]),
            row(&["", "101-000002", "ROE RICHARD", "01.05-16..-094.00-000", "8 1 5 3RD AVE", "$2,000.00"]),
            row(&["", "bad", "ROE RICHARD", "01.05-16..-095.00-000", "X", "$3.00"]),
        ];

        let result = extractor.extract_all(&rows);
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.excluded, 3);
        assert_eq!(result.failed, 1);
        assert_eq!(result.records[0].municipality.as_deref(), Some("ANTIS TOWNSHIP"));
        assert_eq!(result.records[1].municipality.as_deref(), Some("CITY OF ALTOONA"));
    }
}
