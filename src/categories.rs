// src/categories.rs
//! Shared category → keyword table.
//!
//! One table serves both market adapters (single-category detection) and the
//! analyzer's keyword fallback (multi-category classification), so vendor
//! listings and page content are bucketed with the same vocabulary.
//!
//! Matching is case-insensitive substring over whitespace-condensed text.
//! Declaration order matters: `detect` returns the first category with a hit.
//!
//! The table can be overridden from TOML or JSON:
//! 1) $CATEGORY_TABLE_PATH
//! 2) config/categories.toml
//! 3) built-in table

use anyhow::{anyhow, Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_CATEGORY_TABLE_PATH: &str = "CATEGORY_TABLE_PATH";
pub const DEFAULT_CATEGORY_TABLE_PATH: &str = "config/categories.toml";

/// Returned by `detect` when nothing matches.
pub const OTHER: &str = "other";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryRule {
    pub name: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryTable {
    #[serde(rename = "category")]
    pub rules: Vec<CategoryRule>,
}

/// A category hit with the keywords that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryMatch {
    pub category: String,
    pub keywords: Vec<String>,
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CategoryTable {
    pub fn builtin() -> Self {
        fn rule(name: &str, kws: &[&str]) -> CategoryRule {
            CategoryRule {
                name: name.to_string(),
                keywords: kws.iter().map(|k| k.to_string()).collect(),
            }
        }
        Self {
            rules: vec![
                rule(
                    "politics",
                    &[
                        "election",
                        "president",
                        "congress",
                        "senate",
                        "vote",
                        "political",
                        "candidate",
                        "poll",
                        "democrat",
                        "republican",
                        "biden",
                        "trump",
                    ],
                ),
                rule(
                    "crypto",
                    &[
                        "bitcoin",
                        "ethereum",
                        "crypto",
                        "btc",
                        "eth",
                        "blockchain",
                        "defi",
                        "nft",
                        "coinbase",
                        "binance",
                    ],
                ),
                rule(
                    "finance",
                    &[
                        "fed",
                        "interest rate",
                        "rate",
                        "inflation",
                        "gdp",
                        "cpi",
                        "recession",
                        "economy",
                        "stock",
                        "s&p",
                        "nasdaq",
                        "market",
                    ],
                ),
                rule(
                    "sports",
                    &[
                        "nfl",
                        "nba",
                        "mlb",
                        "nhl",
                        "soccer",
                        "football",
                        "basketball",
                        "championship",
                        "super bowl",
                        "world series",
                    ],
                ),
                rule(
                    "weather",
                    &["hurricane", "temperature", "snow", "weather", "storm"],
                ),
                rule(
                    "entertainment",
                    &[
                        "oscar",
                        "emmy",
                        "movie",
                        "box office",
                        "celebrity",
                        "music",
                        "award",
                        "streaming",
                    ],
                ),
                rule(
                    "tech",
                    &[
                        "ai",
                        "tech",
                        "apple",
                        "google",
                        "microsoft",
                        "tesla",
                        "startup",
                    ],
                ),
            ],
        }
    }

    pub fn category_names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.name.as_str())
    }

    /// First category (in declaration order) with any keyword in `text`, else `other`.
    pub fn detect(&self, text: &str) -> String {
        let t = normalize(text);
        self.rules
            .iter()
            .find(|r| r.keywords.iter().any(|k| contains_normalized(&t, k)))
            .map(|r| r.name.clone())
            .unwrap_or_else(|| OTHER.to_string())
    }

    /// Every category with at least one hit, each with its matched keywords.
    pub fn classify(&self, text: &str) -> Vec<CategoryMatch> {
        let t = normalize(text);
        self.rules
            .iter()
            .filter_map(|r| {
                let hits: Vec<String> = r
                    .keywords
                    .iter()
                    .filter(|k| contains_normalized(&t, k))
                    .cloned()
                    .collect();
                (!hits.is_empty()).then(|| CategoryMatch {
                    category: r.name.clone(),
                    keywords: hits,
                })
            })
            .collect()
    }

    /// Keywords registered for `category` (case-insensitive name lookup).
    pub fn keywords_for(&self, category: &str) -> Option<&[String]> {
        self.rules
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(category))
            .map(|r| r.keywords.as_slice())
    }

    /// True if `text` hits any keyword of `category`. Unknown category → false.
    pub fn matches_category(&self, text: &str, category: &str) -> bool {
        let t = normalize(text);
        self.keywords_for(category)
            .map(|kws| kws.iter().any(|k| contains_normalized(&t, k)))
            .unwrap_or(false)
    }
}

/// Process-wide table, loaded once.
pub fn shared() -> &'static CategoryTable {
    static TABLE: OnceCell<CategoryTable> = OnceCell::new();
    TABLE.get_or_init(|| match load_table_default() {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(error = %e, "category table override unreadable, using built-in");
            CategoryTable::builtin()
        }
    })
}

/// Load a table from an explicit path (TOML or JSON).
pub fn load_table_from(path: &Path) -> Result<CategoryTable> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading category table from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let table: CategoryTable = if ext == "json" {
        serde_json::from_str(&content).context("parsing category table json")?
    } else {
        toml::from_str(&content).context("parsing category table toml")?
    };
    validate(table)
}

/// Env var, then `config/categories.toml`, then the built-in table.
pub fn load_table_default() -> Result<CategoryTable> {
    if let Ok(p) = std::env::var(ENV_CATEGORY_TABLE_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_table_from(&pb);
        }
        return Err(anyhow!(
            "{ENV_CATEGORY_TABLE_PATH} points to non-existent path"
        ));
    }
    let default_p = PathBuf::from(DEFAULT_CATEGORY_TABLE_PATH);
    if default_p.exists() {
        return load_table_from(&default_p);
    }
    Ok(CategoryTable::builtin())
}

fn validate(mut table: CategoryTable) -> Result<CategoryTable> {
    for r in &mut table.rules {
        r.name = r.name.trim().to_ascii_lowercase();
        r.keywords = r
            .keywords
            .iter()
            .map(|k| normalize(k))
            .filter(|k| !k.is_empty())
            .collect();
    }
    table.rules.retain(|r| !r.name.is_empty());
    if table.rules.is_empty() {
        return Err(anyhow!("category table has no categories"));
    }
    Ok(table)
}

// --- internals ---

fn contains_normalized(normalized_text: &str, keyword: &str) -> bool {
    let k = normalize(keyword);
    !k.is_empty() && normalized_text.contains(k.as_str())
}

/// Lowercase and condense whitespace runs into single spaces.
pub(crate) fn normalize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.extend(ch.to_lowercase());
            last_space = false;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_match_wins_in_declaration_order() {
        let t = CategoryTable::builtin();
        // both politics ("election") and finance ("market") hit; politics is declared first
        assert_eq!(t.detect("Election night market jitters"), "politics");
        assert_eq!(t.detect("Will the Fed cut rates in December 2024?"), "finance");
        assert_eq!(t.detect("Quiz of the day"), OTHER);
    }

    #[test]
    fn detection_is_deterministic() {
        let t = CategoryTable::builtin();
        let text = "Bitcoin ETF approval and Super Bowl odds";
        let first = t.detect(text);
        for _ in 0..50 {
            assert_eq!(t.detect(text), first);
        }
        assert_eq!(first, "crypto");
    }

    #[test]
    fn classify_collects_all_hits() {
        let t = CategoryTable::builtin();
        let hits = t.classify("The FED and   INFLATION; also the NBA finals");
        let names: Vec<&str> = hits.iter().map(|h| h.category.as_str()).collect();
        assert_eq!(names, vec!["finance", "sports"]);
        assert_eq!(hits[0].keywords, vec!["fed".to_string(), "inflation".into()]);
    }

    #[test]
    fn multiword_keywords_tolerate_whitespace() {
        let t = CategoryTable::builtin();
        assert!(t.matches_category("super\n\tbowl LVIII", "sports"));
        assert!(!t.matches_category("super bowl", "unknown"));
    }

    #[test]
    fn toml_override_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("categories.toml");
        fs::write(
            &p,
            r#"
[[category]]
name = " Space "
keywords = ["SpaceX", "  ", "NASA"]
"#,
        )
        .unwrap();
        let t = load_table_from(&p).unwrap();
        assert_eq!(t.rules.len(), 1);
        assert_eq!(t.rules[0].name, "space");
        assert_eq!(t.rules[0].keywords, vec!["spacex".to_string(), "nasa".into()]);
        assert_eq!(t.detect("NASA budget vote"), "space");
    }
}
