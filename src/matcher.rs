// src/matcher.rs
//! Analysis × listings → ranked recommendations.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analyze::AnalysisResult;
use crate::config::Settings;
use crate::error::PipelineError;
use crate::markets::{FilterOptions, MarketListing, MarketSource};

pub const TOPIC_WEIGHT: f64 = 0.3;
pub const CATEGORY_WEIGHT: f64 = 0.4;
pub const VOLUME_BONUS: f64 = 0.2;
pub const HIGH_VOLUME_BONUS: f64 = 0.1;
pub const VOLUME_THRESHOLD: f64 = 100_000.0;
pub const HIGH_VOLUME_THRESHOLD: f64 = 1_000_000.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    #[serde(flatten)]
    pub listing: MarketListing,
    /// Ranking heuristic in [0, 1], not a probability.
    pub relevance: f64,
    /// First analysis topic that matched, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub matched_keywords: Vec<String>,
}

/// What a listing matched against an analysis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchDetail {
    pub topics: Vec<String>,
    pub categories: Vec<String>,
}

impl MatchDetail {
    pub fn is_match(&self) -> bool {
        !self.topics.is_empty() || !self.categories.is_empty()
    }
}

/// Distinct topics contained in the listing's searchable text, and distinct
/// categories equal to the listing's category or contained in its text.
pub fn match_listing(listing: &MarketListing, analysis: &AnalysisResult) -> MatchDetail {
    let text = listing.searchable_text();
    let listing_cat = listing.category.to_lowercase();

    let mut seen = HashSet::new();
    let topics = analysis
        .topics
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty() && text.contains(t.as_str()) && seen.insert(t.clone()))
        .collect();

    let mut seen = HashSet::new();
    let categories = analysis
        .categories
        .iter()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| {
            !c.is_empty() && (*c == listing_cat || text.contains(c.as_str())) && seen.insert(c.clone())
        })
        .collect();

    MatchDetail { topics, categories }
}

/// 0.3 per topic + 0.4 per category + volume bonuses, clamped to [0, 1].
pub fn score(detail: &MatchDetail, volume: f64) -> f64 {
    let mut s = TOPIC_WEIGHT * detail.topics.len() as f64
        + CATEGORY_WEIGHT * detail.categories.len() as f64;
    if volume > VOLUME_THRESHOLD {
        s += VOLUME_BONUS;
    }
    if volume > HIGH_VOLUME_THRESHOLD {
        s += HIGH_VOLUME_BONUS;
    }
    s.clamp(0.0, 1.0)
}

/// Scores every matching listing; disabled categories are dropped.
pub fn rank_listings(
    listings: impl IntoIterator<Item = MarketListing>,
    analysis: &AnalysisResult,
    settings: &Settings,
) -> Vec<Recommendation> {
    listings
        .into_iter()
        .filter(|l| settings.is_category_enabled(&l.category))
        .filter_map(|listing| {
            let detail = match_listing(&listing, analysis);
            if !detail.is_match() {
                return None;
            }
            let relevance = score(&detail, listing.volume);
            let topic = detail.topics.first().cloned();
            let mut matched_keywords = detail.topics;
            matched_keywords.extend(detail.categories);
            Some(Recommendation {
                listing,
                relevance,
                topic,
                matched_keywords,
            })
        })
        .collect()
}

/// Stable sort by relevance (descending), then truncate.
pub fn finalize(mut recs: Vec<Recommendation>, max: usize) -> Vec<Recommendation> {
    recs.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
    recs.truncate(max);
    recs
}

/// Queries each enabled source (in the given order), merges, ranks, truncates.
/// A failing source is skipped; if every enabled source fails the last error
/// is returned.
pub async fn match_markets(
    analysis: &AnalysisResult,
    sources: &[Arc<dyn MarketSource>],
    settings: &Settings,
) -> Result<Vec<Recommendation>, PipelineError> {
    let mut merged = Vec::new();
    let mut attempted = 0usize;
    let mut failed = 0usize;
    let mut last_err = None;

    for src in sources {
        let platform = src.platform();
        if !settings.is_platform_enabled(platform) {
            debug!(target: "matcher", %platform, "platform disabled");
            continue;
        }
        attempted += 1;
        match src.fetch_listings(&FilterOptions::default()).await {
            Ok(listings) => {
                let n = listings.len();
                let recs = rank_listings(listings, analysis, settings);
                debug!(target: "matcher", %platform, listings = n, matched = recs.len(), "ranked");
                merged.extend(recs);
            }
            Err(e) => {
                warn!(target: "matcher", %platform, error = %e, "platform unavailable, skipping");
                failed += 1;
                last_err = Some(e);
            }
        }
    }

    if attempted > 0 && failed == attempted {
        if let Some(e) = last_err {
            return Err(e.into());
        }
    }
    Ok(finalize(merged, settings.max_recommendations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markets::Platform;

    fn listing(title: &str, category: &str, volume: f64) -> MarketListing {
        MarketListing {
            id: title.into(),
            title: title.into(),
            platform: Platform::Polymarket,
            url: String::new(),
            price: 0.5,
            volume,
            category: category.into(),
            end_date: None,
            subtitle: None,
            description: None,
            ticker: None,
            tags: vec![],
            active: true,
            liquidity: 0.0,
        }
    }

    fn analysis(topics: &[&str], categories: &[&str]) -> AnalysisResult {
        AnalysisResult {
            topics: topics.iter().map(|s| s.to_string()).collect(),
            categories: categories.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn score_saturates_at_one() {
        let d = MatchDetail {
            topics: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            categories: vec!["x".into()],
        };
        assert_eq!(score(&d, 0.0), 1.0);
        let d = MatchDetail {
            topics: vec![],
            categories: vec!["finance".into()],
        };
        assert!((score(&d, 500_000.0) - 0.6).abs() < 1e-9);
        assert!((score(&d, 2_000_000.0) - 0.7).abs() < 1e-9);
        assert!((score(&d, 100_000.0) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn topics_and_categories_count_once() {
        let l = listing("Will the Fed cut rates? Fed watch", "finance", 0.0);
        let a = analysis(&["fed", "FED", "rates"], &["finance", "Finance"]);
        let d = match_listing(&l, &a);
        assert_eq!(d.topics, vec!["fed".to_string(), "rates".into()]);
        assert_eq!(d.categories, vec!["finance".to_string()]);
    }

    #[test]
    fn ties_keep_merge_order_and_truncate() {
        let mut recs = Vec::new();
        for (i, r) in [0.5, 0.9, 0.5, 0.7, 0.5].iter().enumerate() {
            recs.push(Recommendation {
                listing: listing(&format!("m{i}"), "other", 0.0),
                relevance: *r,
                topic: None,
                matched_keywords: vec![],
            });
        }
        let out = finalize(recs, 4);
        let ids: Vec<&str> = out.iter().map(|r| r.listing.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m3", "m0", "m2"]);
    }

    #[test]
    fn disabled_categories_are_dropped() {
        let settings = Settings::default();
        let a = analysis(&["oscar"], &[]);
        let recs = rank_listings(
            vec![listing("Oscar best picture", "entertainment", 0.0)],
            &a,
            &settings,
        );
        assert!(recs.is_empty());
    }

    #[test]
    fn recommendation_flattens_listing_on_the_wire() {
        let r = Recommendation {
            listing: listing("T", "finance", 1.0),
            relevance: 0.6,
            topic: Some("fed".into()),
            matched_keywords: vec!["fed".into()],
        };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["title"], "T");
        assert_eq!(v["platform"], "Polymarket");
        assert_eq!(v["relevance"], 0.6);
        assert_eq!(v["matchedKeywords"][0], "fed");
        let back: Recommendation = serde_json::from_value(v).unwrap();
        assert_eq!(back, r);
    }
}
