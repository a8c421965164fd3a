//! Repairs for text that PDF layout engines spread out one letter at a time.

use std::collections::HashSet;
use std::path::Path;

use crate::error::AppError;

const DEFAULT_GIVEN_NAMES: &[&str] = &[
    "ANDREA", "ANNE", "BRUNHILDE", "CARL", "CHARLOTTE", "CONNIE", "DAVID", "DAWNA", "DEBRA",
    "EDWARD", "ELAINE", "EUGENE", "EVELYN", "GERTRUDE", "GREGORY", "HERBERT", "IRENE", "JACK",
    "JAMES", "JANE", "JERE", "JODY", "JOHN", "KENNETH", "KIRSTEN", "KRISTOPHER", "LEE", "LEO",
    "LINDA", "LORIE", "LOUIS", "LYNN", "MARGARET", "MARI", "MARK", "MARTIN", "MARY", "MATTHEW",
    "MICHAEL", "NAOMI", "PATRICIA", "PAUL", "RANDALL", "RICHARD", "ROBERT", "ROBIN", "RUTH",
    "SHIRLEY", "SOPHIE", "TARA", "TERRY", "THELMA", "THOMAS", "TRAVIS", "VINCENT", "WENDY",
    "WILLIAM",
];

/// Longest trailing fragment that may be glued onto a merged run.
const MAX_SUFFIX_LEN: usize = 10;

/// Common given names. A run of spaced letters never absorbs one of these.
#[derive(Debug, Clone)]
pub struct GivenNames {
    names: HashSet<String>,
}

impl Default for GivenNames {
    fn default() -> Self {
        Self::from_names(DEFAULT_GIVEN_NAMES.iter().copied())
    }
}

impl GivenNames {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().trim().to_uppercase())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    /// Loads a dictionary with one name per line. Blank lines and `#` comments
    /// are ignored. The built-in names are always included.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Cannot read names file {}: {e}", path.display()))
        })?;
        let mut dictionary = Self::default();
        dictionary.names.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_uppercase),
        );
        Ok(dictionary)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.names.contains(token)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn is_spaced_letter(token: &str) -> bool {
    let mut chars = token.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if c.is_ascii_uppercase())
}

fn is_suffix_fragment(token: &str) -> bool {
    (2..=MAX_SUFFIX_LEN).contains(&token.len()) && token.chars().all(|c| c.is_ascii_uppercase())
}

/// Merges runs of spaced-out capital letters back into words.
///
/// `B A R N ER DAVID W` becomes `BARNER DAVID W`: the run `B A R N` merges,
/// the trailing fragment `ER` is glued on, and `DAVID` stays separate because
/// it is a known given name. Runs of whitespace, tabs included, collapse to
/// single spaces and the ends are trimmed; otherwise clean text comes back
/// unchanged.
pub fn normalize_name(text: &str, given_names: &GivenNames) -> String {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    let mut i = 0;

    while i < tokens.len() {
        if !is_spaced_letter(tokens[i]) {
            out.push(tokens[i].to_string());
            i += 1;
            continue;
        }

        let start = i;
        while i < tokens.len() && is_spaced_letter(tokens[i]) {
            i += 1;
        }
        if i - start < 2 {
            out.push(tokens[start].to_string());
            continue;
        }

        let mut word: String = tokens[start..i].concat();
        if let Some(next) = tokens.get(i)
            && is_suffix_fragment(next)
            && !given_names.contains(next)
        {
            word.push_str(next);
            i += 1;
        }
        out.push(word);
    }

    out.join(" ")
}

fn is_digit_run_token(token: &str) -> bool {
    (1..=2).contains(&token.len()) && token.chars().all(|c| c.is_ascii_digit())
}

/// Collapses a spaced-out leading house number: `8 1 5 3RD AVE` becomes
/// `815 3RD AVE`. Whitespace collapses as in [`normalize_name`]; the words
/// after the number are otherwise left alone.
pub fn normalize_address(text: &str) -> String {
    let tokens: Vec<&str> = text.split_whitespace().collect();

    let mut end = 0;
    while end < tokens.len() && is_digit_run_token(tokens[end]) {
        let two_digit = tokens[end].len() == 2;
        if two_digit && end == 0 {
            break;
        }
        end += 1;
        // A two-digit group closes the number.
        if two_digit {
            break;
        }
    }

    if end < 2 {
        return tokens.join(" ");
    }

    let mut out = Vec::with_capacity(tokens.len() - end + 1);
    out.push(tokens[..end].concat());
    out.extend(tokens[end..].iter().map(|t| t.to_string()));
    out.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> GivenNames {
        GivenNames::default()
    }

    #[test]
    fn test_spaced_surname_with_given_name() {
        assert_eq!(
            normalize_name("B A R N ER DAVID W", &names()),
            "BARNER DAVID W"
        );
    }

    #[test]
    fn test_run_does_not_absorb_given_name() {
        assert_eq!(normalize_name("S M I T H JOHN", &names()), "SMITH JOHN");
        assert_eq!(normalize_name("D O E JANE M", &names()), "DOE JANE M");
    }

    #[test]
    fn test_clean_names_unchanged() {
        for clean in ["NOLAND TRAVIS", "BARNER DAVID W", "SMITH & JONES LLC", "O'BRIEN MARY"] {
            assert_eq!(normalize_name(clean, &names()), clean);
        }
    }

    #[test]
    fn test_name_normalization_idempotent() {
        for input in ["B A R N ER DAVID W", "K E L L Y ROBERT", "A B C", "H O L L ISTER"] {
            let once = normalize_name(input, &names());
            assert_eq!(normalize_name(&once, &names()), once);
        }
    }

    #[test]
    fn test_custom_dictionary_blocks_suffix() {
        let custom = GivenNames::from_names(["ER"]);
        assert_eq!(normalize_name("B A R N ER", &custom), "BARN ER");
    }

    #[test]
    fn test_load_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.txt");
        std::fs::write(&path, "# extra names\nbrunhilde\n\nzelda\n").unwrap();
        let dictionary = GivenNames::load(&path).unwrap();
        assert!(dictionary.contains("ZELDA"));
        assert!(dictionary.contains("DAVID"));
        assert_eq!(normalize_name("F O X ZELDA", &dictionary), "FOX ZELDA");
    }

    #[test]
    fn test_whitespace_runs_collapse() {
        assert_eq!(
            normalize_name("  B  A R N\tER   DAVID W ", &names()),
            "BARNER DAVID W"
        );
        assert_eq!(normalize_name("SMITH\t\tJOHN", &names()), "SMITH JOHN");
        assert_eq!(normalize_address("8 1\t5  3RD   AVE "), "815 3RD AVE");
        assert_eq!(normalize_address("12  MAIN\tST"), "12 MAIN ST");
    }

    #[test]
    fn test_spaced_house_number() {
        assert_eq!(normalize_address("8 1 5 3RD AVE"), "815 3RD AVE");
        assert_eq!(normalize_address("1 5 08 13TH ALY"), "1508 13TH ALY");
        assert_eq!(normalize_address("2 2 09 1/2 8TH AVE"), "2209 1/2 8TH AVE");
    }

    #[test]
    fn test_clean_addresses_unchanged() {
        for clean in ["815 3RD AVE", "12 MAIN ST", "1 2ND ST", "PO BOX 44", "RR 2 BOX 9"] {
            assert_eq!(normalize_address(clean), clean);
        }
    }

    #[test]
    fn test_address_normalization_idempotent() {
        for input in ["8 1 5 3RD AVE", "1 5 08 13TH ALY", "4 5", "7 7 7 LOGAN BLVD"] {
            let once = normalize_address(input);
            assert_eq!(normalize_address(&once), once);
        }
    }
}
