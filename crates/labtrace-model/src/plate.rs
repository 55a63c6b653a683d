//! Well addressing for rectangular labware.
//!
//! LIMS records address wells two ways: alphanumeric labels (`"B2"`) and
//! zero-based `(row, column)` pairs. Legacy protocols additionally encode a
//! well as a bracketed numeric pair (`"[[1, 1]]"`). Every conversion and
//! every parse of a source-reference string goes through this module so all
//! callers normalize identically.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Rows above `Z` would need multi-letter labels, which no supported plate
/// geometry uses.
pub const MAX_ROWS: usize = 26;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlateError {
    #[error("`{0}` is not a recognized well address")]
    BadWell(String),
    #[error("row {0} is outside the supported plate geometry")]
    BadRow(usize),
    #[error("unrecognized source reference `{0}`")]
    BadSourceRef(String),
}

/// Alphanumeric well label for a zero-based `(row, column)` pair: `(1, 1)`
/// becomes `"B2"`.
pub fn well_coordinates(row: usize, column: usize) -> Result<String, PlateError> {
    if row >= MAX_ROWS {
        return Err(PlateError::BadRow(row));
    }
    let letter = (b'A' + row as u8) as char;
    Ok(format!("{}{}", letter, column + 1))
}

/// Zero-based `(row, column)` pair for an alphanumeric well label.
pub fn coordinates_for(well: &str) -> Result<(usize, usize), PlateError> {
    let mut chars = well.chars();
    let letter = chars
        .next()
        .ok_or_else(|| PlateError::BadWell(well.to_string()))?;
    if !letter.is_ascii_uppercase() {
        return Err(PlateError::BadWell(well.to_string()));
    }
    let column: usize = chars
        .as_str()
        .parse::<usize>()
        .ok()
        .filter(|c| *c > 0)
        .ok_or_else(|| PlateError::BadWell(well.to_string()))?;
    Ok(((letter as u8 - b'A') as usize, column - 1))
}

fn bracketed_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\[\[([0-9]+),[ \t]*([0-9]+)\]\]$").expect("static regex"))
}

/// Canonicalize a well written either as an alphanumeric label or as the
/// legacy bracketed pair `[[row, column]]`.
pub fn normalize_well(text: &str) -> Result<String, PlateError> {
    if let Some(caps) = bracketed_pattern().captures(text) {
        let row: usize = caps[1].parse().expect("digits");
        let column: usize = caps[2].parse().expect("digits");
        return well_coordinates(row, column);
    }
    coordinates_for(text)?;
    Ok(text.to_string())
}

/// Reference string for one well of a collection.
pub fn part_ref(collection_id: &str, well: &str) -> String {
    format!("{}/{}", collection_id, well)
}

/// Inverse of [`part_ref`]; `None` when the string has no separator.
pub fn split_part_ref(reference: &str) -> Option<(&str, &str)> {
    reference.split_once('/')
}

/// A parsed source-reference string from collection routing metadata.
///
/// Recognized forms:
/// - `item_id`
/// - `item_id/well` (well may use the legacy bracketed encoding)
/// - `object_type_name/item_id/sample_id/well` — used where the item is not
///   a collection but consists of sub-parts that are not explicitly modeled
///   (a plate with colonies); the well component is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    Item { item_id: String },
    Part { item_id: String, well: String },
}

impl SourceRef {
    pub fn item_id(&self) -> &str {
        match self {
            SourceRef::Item { item_id } => item_id,
            SourceRef::Part { item_id, .. } => item_id,
        }
    }
}

/// Parse a source-reference string. Malformed references are an error for
/// the caller to log; no edge should be added for them.
pub fn parse_source_ref(text: &str) -> Result<SourceRef, PlateError> {
    let components: Vec<&str> = text.split('/').collect();
    let digit_led = text.chars().next().is_some_and(|c| c.is_ascii_digit());
    if digit_led {
        let item_id = components[0].to_string();
        if components.len() == 2 {
            let well = normalize_well(components[1])?;
            return Ok(SourceRef::Part { item_id, well });
        }
        return Ok(SourceRef::Item { item_id });
    }
    if components.len() == 4 {
        return Ok(SourceRef::Part {
            item_id: components[1].to_string(),
            well: components[3].to_string(),
        });
    }
    Err(PlateError::BadSourceRef(text.to_string()))
}
