//! Product name → order code mapping.
//!
//! Resolution runs in three tiers, first hit wins:
//! 1. exact match of the trimmed product name against a table entry,
//! 2. case-insensitive substring match in either direction, walking the
//!    table in declaration order,
//! 3. category fallback (`LAYOTH` / `PROTH` / `ORDOTH`).
//!
//! The table is ordered data, not a map: declaration order decides which
//! keyword wins when several overlap.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{OrderError, OrderResult};

pub const SERVICE_FALLBACK_CODE: &str = "LAYOTH";
pub const PRODUCT_FALLBACK_CODE: &str = "PROTH";
pub const ORDER_FALLBACK_CODE: &str = "ORDOTH";

/// Built-in table. Full catalogue names first so they win the substring
/// pass over the short keywords that follow them.
const DEFAULT_ENTRIES: &[(&str, &str)] = &[
    ("Produk Aplikasi", "PRAPL"),
    ("Produk Website", "PRAWB"),
    ("Produk Sistem Informasi", "PRSIF"),
    ("Produk Desain UI/UX", "PRUIX"),
    ("Layanan Sewa Domain Microsoft", "LAYSDMM"),
    ("Layanan Sewa Hosting", "LAYSHST"),
    ("Layanan Sewa Ruang Meeting", "LAYSRM"),
    ("Layanan Virtual Office", "LAYVO"),
    ("Layanan Coworking Space", "LAYCWS"),
    ("Layanan Konsultasi IT", "LAYKIT"),
    ("Layanan Maintenance Website", "LAYMWB"),
    // Keywords
    ("Aplikasi", "PRAPL"),
    ("Website", "PRAWB"),
    ("Sistem Informasi", "PRSIF"),
    ("Domain", "LAYSDMM"),
    ("Hosting", "LAYSHST"),
    ("Meeting", "LAYSRM"),
    ("Virtual Office", "LAYVO"),
    ("Coworking", "LAYCWS"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeEntry {
    pub matcher: String,
    pub code: String,
}

/// Which tier produced a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeMatch {
    Exact,
    Keyword,
    Category,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCode {
    pub code: String,
    pub matched: CodeMatch,
}

#[derive(Debug, Clone)]
pub struct ProductCodeTable {
    entries: Vec<CodeEntry>,
}

impl Default for ProductCodeTable {
    fn default() -> Self {
        Self {
            entries: DEFAULT_ENTRIES
                .iter()
                .map(|(matcher, code)| CodeEntry {
                    matcher: matcher.to_string(),
                    code: code.to_string(),
                })
                .collect(),
        }
    }
}

impl ProductCodeTable {
    /// Build a table from custom entries, rejecting codes that would break
    /// the `^[A-Z]{2,8}\d{3}$` order id format.
    pub fn new(entries: Vec<CodeEntry>) -> OrderResult<Self> {
        for entry in &entries {
            if entry.matcher.trim().is_empty() {
                return Err(OrderError::Config(format!(
                    "empty matcher for code {}",
                    entry.code
                )));
            }
            if !is_valid_code(&entry.code) {
                return Err(OrderError::Config(format!(
                    "invalid product code '{}' for '{}': expected 2-8 uppercase letters",
                    entry.code, entry.matcher
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[CodeEntry] {
        &self.entries
    }

    pub fn resolve(&self, product_name: &str, product_category: &str) -> ResolvedCode {
        let name = product_name.trim();

        if !name.is_empty() {
            if let Some(entry) = self.entries.iter().find(|e| e.matcher.trim() == name) {
                return ResolvedCode {
                    code: entry.code.clone(),
                    matched: CodeMatch::Exact,
                };
            }

            let lower = name.to_lowercase();
            if let Some(entry) = self.entries.iter().find(|e| {
                let key = e.matcher.trim().to_lowercase();
                lower.contains(&key) || key.contains(&lower)
            }) {
                return ResolvedCode {
                    code: entry.code.clone(),
                    matched: CodeMatch::Keyword,
                };
            }
        }

        let code = category_fallback(product_category);
        warn!(
            product_name = name,
            product_category,
            code,
            "Product not in code table, using category fallback"
        );
        ResolvedCode {
            code: code.to_string(),
            matched: CodeMatch::Category,
        }
    }
}

fn category_fallback(category: &str) -> &'static str {
    let category = category.trim().to_lowercase();
    if category.contains("layanan") || category.contains("service") {
        SERVICE_FALLBACK_CODE
    } else if category.contains("produk") || category.contains("product") {
        PRODUCT_FALLBACK_CODE
    } else {
        ORDER_FALLBACK_CODE
    }
}

pub(crate) fn is_valid_code(code: &str) -> bool {
    (2..=8).contains(&code.len()) && code.bytes().all(|b| b.is_ascii_uppercase())
}
