//! Raw source rows and their parsing into catalog records.

use std::collections::HashMap;

use super::errors::RowParseError;
use super::phase::Phase;
use super::record::{CatalogRecord, ColorRecord, ElementRecord, PartRecord};

/// Header names accepted for each column, first match wins.
pub mod columns {
    pub const COLOR_ID: &[&str] = &["id", "color_id"];
    pub const PART_NUM: &[&str] = &["part_num"];
    pub const ELEMENT_ID: &[&str] = &["element_id", "id"];
    pub const ELEMENT_PART: &[&str] = &["part_num", "part", "part_id"];
    pub const ELEMENT_COLOR: &[&str] = &["color_id", "color", "colorid"];
}

/// Column groups a source header must cover, one alternative per group.
pub fn required_columns(phase: Phase) -> &'static [&'static [&'static str]] {
    match phase {
        Phase::Colors => &[columns::COLOR_ID],
        Phase::Parts => &[columns::PART_NUM],
        Phase::Elements => &[
            columns::ELEMENT_ID,
            columns::ELEMENT_PART,
            columns::ELEMENT_COLOR,
        ],
    }
}

/// Lower-cases, trims and replaces spaces with underscores; drops a BOM.
pub fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .trim()
        .to_lowercase()
        .replace(' ', "_")
}

/// One data row, keyed by normalized header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based data row number (header excluded).
    pub row: u64,
    fields: HashMap<String, String>,
}

impl RawRow {
    pub fn new(row: u64, fields: HashMap<String, String>) -> Self {
        Self { row, fields }
    }

    /// Build from parallel header/value slices.
    pub fn from_pairs<'a>(
        row: u64,
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let fields = pairs
            .into_iter()
            .map(|(k, v)| (normalize_header(k), v.to_string()))
            .collect();
        Self { row, fields }
    }

    /// First non-blank value among `names`, trimmed.
    pub fn get(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .filter_map(|name| self.fields.get(*name))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }

    fn text(&self, names: &[&str]) -> String {
        self.get(names).unwrap_or_default().to_string()
    }

    fn required(&self, names: &[&str], field: &'static str) -> Result<&str, RowParseError> {
        self.get(names).ok_or(RowParseError::MissingField {
            row: self.row,
            field,
        })
    }

    fn integer(&self, value: &str, field: &'static str) -> Result<i32, RowParseError> {
        value
            .parse::<i32>()
            .map_err(|_| RowParseError::InvalidInteger {
                row: self.row,
                field,
                value: value.to_string(),
            })
    }
}

/// Parse a raw row into the canonical record of `phase`.
pub fn parse_row(phase: Phase, row: &RawRow) -> Result<CatalogRecord, RowParseError> {
    match phase {
        Phase::Colors => parse_color(row).map(CatalogRecord::Color),
        Phase::Parts => parse_part(row).map(CatalogRecord::Part),
        Phase::Elements => parse_element(row).map(CatalogRecord::Element),
    }
}

fn parse_color(row: &RawRow) -> Result<ColorRecord, RowParseError> {
    let id = row.integer(row.required(columns::COLOR_ID, "id")?, "id")?;

    let rgb = row
        .get(&["rgb"])
        .unwrap_or_default()
        .trim_start_matches('#')
        .to_ascii_uppercase();
    if !rgb.is_empty() && (rgb.len() != 6 || !rgb.chars().all(|c| c.is_ascii_hexdigit())) {
        return Err(RowParseError::InvalidRgb {
            row: row.row,
            value: rgb,
        });
    }

    let is_trans = matches!(
        row.get(&["is_trans"])
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "t" | "true" | "1" | "yes"
    );

    Ok(ColorRecord {
        id,
        name: row.text(&["name"]),
        rgb,
        is_trans,
    })
}

fn parse_part(row: &RawRow) -> Result<PartRecord, RowParseError> {
    let part_num = row.required(columns::PART_NUM, "part_num")?.to_string();
    let part_cat_id = match row.get(&["part_cat_id"]) {
        Some(v) => Some(row.integer(v, "part_cat_id")?),
        None => None,
    };
    Ok(PartRecord {
        part_num,
        name: row.text(&["name"]),
        part_cat_id,
    })
}

fn parse_element(row: &RawRow) -> Result<ElementRecord, RowParseError> {
    let element_id = row.required(columns::ELEMENT_ID, "element_id")?.to_string();
    let part_num = row.required(columns::ELEMENT_PART, "part_num")?.to_string();
    let color_id = row.integer(row.required(columns::ELEMENT_COLOR, "color_id")?, "color_id")?;
    Ok(ElementRecord {
        element_id,
        part_num,
        color_id,
    })
}
