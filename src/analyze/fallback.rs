// src/analyze/fallback.rs
//! Keyword classifier used whenever the LLM is unavailable or unusable.

use super::AnalysisResult;
use crate::categories::CategoryTable;
use crate::extract::ExtractedContent;

pub const MATCHED_RELEVANCE: f64 = 0.6;
pub const UNMATCHED_RELEVANCE: f64 = 0.3;
pub const GENERAL_CATEGORY: &str = "general";

pub fn classify(content: &ExtractedContent, table: &CategoryTable) -> AnalysisResult {
    let combined = format!("{} {}", content.text, content.title);
    let hits = table.classify(&combined);

    let (categories, topics, relevance_score) = if hits.is_empty() {
        (
            vec![GENERAL_CATEGORY.to_string()],
            vec!["news".to_string(), "current events".to_string()],
            UNMATCHED_RELEVANCE,
        )
    } else {
        let categories: Vec<String> = hits.iter().map(|h| h.category.clone()).collect();
        let topics: Vec<String> = hits.into_iter().flat_map(|h| h.keywords).collect();
        (categories, topics, MATCHED_RELEVANCE)
    };

    let summary = if content.title.trim().is_empty() {
        "Web page content".to_string()
    } else {
        content.title.clone()
    };

    AnalysisResult {
        betting_angles: categories.clone(),
        topics,
        categories,
        relevance_score,
        summary,
        ..Default::default()
    }
    .deduplicated()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fed_title_classifies_as_finance() {
        let c = ExtractedContent {
            title: "Will the Fed cut rates in December?".into(),
            ..Default::default()
        };
        let r = classify(&c, &CategoryTable::builtin());
        assert_eq!(r.categories, vec!["finance".to_string()]);
        assert_eq!(r.topics, vec!["fed".to_string(), "rate".into()]);
        assert_eq!(r.relevance_score, 0.6);
        assert_eq!(r.summary, "Will the Fed cut rates in December?");
        assert_eq!(r.betting_angles, r.categories);
    }

    #[test]
    fn nothing_matched_is_general() {
        let c = ExtractedContent {
            text: "Quiz of the day".into(),
            ..Default::default()
        };
        let r = classify(&c, &CategoryTable::builtin());
        assert_eq!(r.categories, vec![GENERAL_CATEGORY.to_string()]);
        assert_eq!(r.topics, vec!["news".to_string(), "current events".into()]);
        assert_eq!(r.relevance_score, 0.3);
        assert_eq!(r.summary, "Web page content");
    }

    #[test]
    fn shared_keywords_are_deduplicated() {
        // "market" belongs to finance only, but the same keyword may appear in
        // overridden tables under several categories
        let table: CategoryTable = toml::from_str(
            r#"
[[category]]
name = "finance"
keywords = ["market"]
[[category]]
name = "crypto"
keywords = ["market", "bitcoin"]
"#,
        )
        .unwrap();
        let c = ExtractedContent {
            text: "Bitcoin market update".into(),
            ..Default::default()
        };
        let r = classify(&c, &table);
        assert_eq!(r.topics, vec!["market".to_string(), "bitcoin".into()]);
        assert_eq!(r.categories, vec!["finance".to_string(), "crypto".into()]);
    }
}
