//! Catalog records and their natural keys.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::phase::Phase;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorRecord {
    pub id: i32,
    pub name: String,
    /// Six upper-case hex digits, or empty when unknown.
    pub rgb: String,
    pub is_trans: bool,
}

impl ColorRecord {
    /// Stand-in created when an element references an unknown color.
    pub fn placeholder(id: i32) -> Self {
        Self {
            id,
            name: String::new(),
            rgb: String::new(),
            is_trans: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    pub part_num: String,
    pub name: String,
    pub part_cat_id: Option<i32>,
}

impl PartRecord {
    /// Stand-in created when an element references an unknown part.
    pub fn placeholder(part_num: impl Into<String>) -> Self {
        Self {
            part_num: part_num.into(),
            name: String::new(),
            part_cat_id: None,
        }
    }
}

/// A color-specific variant of a part.
///
/// Keyed by `(part_num, color_id)`; `element_id` is payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRecord {
    pub element_id: String,
    pub part_num: String,
    pub color_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CatalogRecord {
    Color(ColorRecord),
    Part(PartRecord),
    Element(ElementRecord),
}

impl CatalogRecord {
    pub fn phase(&self) -> Phase {
        match self {
            CatalogRecord::Color(_) => Phase::Colors,
            CatalogRecord::Part(_) => Phase::Parts,
            CatalogRecord::Element(_) => Phase::Elements,
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        match self {
            CatalogRecord::Color(c) => NaturalKey::Color(c.id),
            CatalogRecord::Part(p) => NaturalKey::Part(p.part_num.clone()),
            CatalogRecord::Element(e) => NaturalKey::Element {
                part_num: e.part_num.clone(),
                color_id: e.color_id,
            },
        }
    }
}

/// Business identifier deciding insert vs. update vs. no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NaturalKey {
    Color(i32),
    Part(String),
    Element { part_num: String, color_id: i32 },
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NaturalKey::Color(id) => write!(f, "color:{id}"),
            NaturalKey::Part(num) => write!(f, "part:{num}"),
            NaturalKey::Element { part_num, color_id } => {
                write!(f, "element:{part_num}/{color_id}")
            }
        }
    }
}
