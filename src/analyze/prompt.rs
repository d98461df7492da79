// src/analyze/prompt.rs
use super::llm::{ChatMessage, ChatRequest, ContentPart, ImageUrl, MessageContent};
use crate::config::LlmConfig;
use crate::extract::ExtractedContent;

/// Page text sent to the model is capped at this many characters.
pub const PROMPT_TEXT_CHARS: usize = 5_000;

pub const SYSTEM_PROMPT: &str = r#"You are an AI assistant that analyzes web content to identify potential betting opportunities on prediction markets like Polymarket and Kalshi.

Your task is to:
1. Extract key topics, entities, and events from the content
2. Identify potential future outcomes that could be bet on
3. Categorize the content by relevance to prediction markets
4. Return structured data for market matching

Response format should be JSON with this structure:
{
  "topics": ["topic1", "topic2"],
  "entities": ["person1", "company1"],
  "events": ["event1", "event2"],
  "predictions": ["prediction1", "prediction2"],
  "categories": ["politics", "crypto", "sports"],
  "relevance_score": 0.8,
  "summary": "Brief summary of content",
  "betting_angles": ["angle1", "angle2"]
}"#;

const SCREENSHOT_NOTE: &str = "A screenshot of the visible page is attached. Use it together with the text; topics may also be given as objects {\"name\", \"keywords\", \"relevance\"}.";

pub fn user_prompt(content: &ExtractedContent) -> String {
    let text: String = content.text.chars().take(PROMPT_TEXT_CHARS).collect();
    let headings = if content.metadata.headings.is_empty() {
        "None".to_string()
    } else {
        content.metadata.headings.join(", ")
    };
    format!(
        "Analyze this web content for potential betting opportunities:\n\n\
         URL: {url}\n\
         Title: {title}\n\
         Content: {text}\n\
         Headings: {headings}\n\n\
         Focus on identifying:\n\
         - Political events and elections\n\
         - Cryptocurrency and financial markets\n\
         - Sports outcomes\n\
         - Technology and business events\n\
         - Entertainment and media\n\
         - Any other predictable future outcomes\n\n\
         Return the analysis as JSON.",
        url = content.url,
        title = content.title,
    )
}

/// Text-only request, or text + `image_url` (detail high) when a screenshot
/// data URL is given.
pub fn build_request(
    content: &ExtractedContent,
    screenshot: Option<&str>,
    model: &str,
    cfg: &LlmConfig,
) -> ChatRequest {
    let prompt = user_prompt(content);
    let (user, max_tokens) = match screenshot.filter(|s| !s.trim().is_empty()) {
        Some(data_url) => (
            MessageContent::Parts(vec![
                ContentPart::Text {
                    text: format!("{prompt}\n\n{SCREENSHOT_NOTE}"),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: data_url.to_string(),
                        detail: "high",
                    },
                },
            ]),
            cfg.vision_max_tokens,
        ),
        None => (MessageContent::Text(prompt), cfg.max_tokens),
    };

    ChatRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage {
                role: "system",
                content: MessageContent::Text(SYSTEM_PROMPT.to_string()),
            },
            ChatMessage {
                role: "user",
                content: user,
            },
        ],
        max_tokens,
        temperature: cfg.temperature,
    }
}
