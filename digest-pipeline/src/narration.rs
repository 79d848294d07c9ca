use crate::client::{RateState, RemoteService, ThrottledClient};
use crate::types::{CompletionRequest, CompletionResponse, EpisodeMetadata};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{error, info, warn};

pub const MAX_HEADLINES: usize = 6;
const MIN_HEADLINE_CHARS: usize = 20;
const MAX_HEADER_CHARS: usize = 40;
const DESCRIPTION_CHARS: usize = 200;
const TITLE_MAX_TOKENS: u32 = 50;
const TITLE_TEMPERATURE: f32 = 0.7;

static LIST_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\s*").unwrap());
static MARKDOWN_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#+\s*").unwrap());
static MARKDOWN_BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());
static MARKDOWN_ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^*]+)\*").unwrap());
static SENTENCE_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]+").unwrap());

const TITLE_PROMPT: &str = r#"You are a podcast editor writing episode titles for "{show_title}", a daily podcast on the latest developments in artificial intelligence.

Write ONE episode title for the script below.

Requirements:
- 6 to 12 words
- Newsworthy: say clearly what happened
- Focus on the most important or surprising development
- Professional, accessible tone
- No clickbait, no questions, no "How to..." titles

Good examples:
- "OpenAI Launches GPT-5 with Revolutionary Reasoning"
- "EU Parliament Passes Landmark AI Regulations"

Bad examples:
- "You Won't Believe What AI Did Today!"
- "Today's AI News"

Return ONLY the title, without quotes, explanation or final punctuation.

---

PODCAST SCRIPT:
{script}

---

EPISODE TITLE:"#;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NarrationSections {
    pub headlines: Vec<String>,
    pub deep_dive: String,
    pub full: String,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Preamble,
    Headlines,
    DeepDive,
}

fn is_header(line: &str, keyword: &str) -> bool {
    (line.starts_with('#') || line.chars().count() <= MAX_HEADER_CHARS)
        && line.to_lowercase().contains(keyword)
}

fn clean_headline(line: &str) -> Option<String> {
    if line.starts_with('#') || line.chars().count() <= MIN_HEADLINE_CHARS {
        return None;
    }
    let line = line.trim_matches('"').trim_matches('\'');
    let line = LIST_NUMBER.replace(line, "");
    let line = line.trim_matches('"').trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

/// Split a narration digest into its headline items and deep-dive body.
///
/// When no deep-dive section is found the whole text stands in for it.
pub fn parse_narration(text: &str) -> NarrationSections {
    let mut section = Section::Preamble;
    let mut headlines = Vec::new();
    let mut deep_dive: Vec<&str> = Vec::new();

    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if section != Section::DeepDive && is_header(line, "deep dive") {
            section = Section::DeepDive;
            continue;
        }
        if section == Section::Preamble && is_header(line, "headlines") {
            section = Section::Headlines;
            continue;
        }
        match section {
            Section::Headlines => headlines.extend(clean_headline(line)),
            Section::DeepDive if !line.starts_with('#') => deep_dive.push(line),
            _ => {}
        }
    }

    headlines.truncate(MAX_HEADLINES);
    let deep_dive = if deep_dive.is_empty() {
        text.to_string()
    } else {
        deep_dive.join("\n")
    };

    NarrationSections {
        headlines,
        deep_dive,
        full: text.to_string(),
    }
}

/// `"{short_title} Summary - October 17, 2025"`.
pub fn fallback_title(short_title: &str, date: NaiveDate) -> String {
    format!("{} Summary - {}", short_title, date.format("%B %d, %Y"))
}

fn strip_markdown(text: &str) -> String {
    let text = MARKDOWN_HEADER.replace_all(text, "");
    let text = MARKDOWN_BOLD.replace_all(&text, "${1}");
    MARKDOWN_ITALIC.replace_all(&text, "${1}").into_owned()
}

/// The opening sentences of `text`, up to about 200 characters.
pub fn episode_description(text: &str, show_title: &str) -> String {
    let clean = strip_markdown(text);
    let mut sentences = Vec::new();
    let mut char_count = 0;

    for sentence in SENTENCE_SPLIT.split(&clean).map(str::trim) {
        if sentence.is_empty() || char_count >= DESCRIPTION_CHARS || sentences.len() == 3 {
            break;
        }
        char_count += sentence.chars().count();
        sentences.push(sentence);
    }

    let description = sentences.join(". ");
    if description.is_empty() {
        return format!(
            "{} newsletter summary with the latest developments in artificial intelligence.",
            show_title
        );
    }
    if description.chars().count() > DESCRIPTION_CHARS {
        let kept: String = description.chars().take(DESCRIPTION_CHARS - 3).collect();
        return format!("{}...", kept);
    }
    description
}

/// Names episodes with a short completion call, falling back to a dated title.
pub struct EpisodeTitler<'a, S> {
    client: &'a ThrottledClient<S>,
    show_title: String,
    short_title: String,
    model: Option<String>,
}

impl<'a, S> EpisodeTitler<'a, S>
where
    S: RemoteService<Request = CompletionRequest, Response = CompletionResponse>,
{
    pub fn new(
        client: &'a ThrottledClient<S>,
        show_title: impl Into<String>,
        short_title: impl Into<String>,
        model: Option<String>,
    ) -> Self {
        Self {
            client,
            show_title: show_title.into(),
            short_title: short_title.into(),
            model,
        }
    }

    pub fn prompt(&self, narration: &str) -> String {
        TITLE_PROMPT
            .replace("{show_title}", &self.show_title)
            .replace("{script}", narration)
    }

    /// Never fails: any service error or empty answer yields the fallback title.
    pub async fn title(&self, rate: &mut RateState, narration: &str, date: NaiveDate) -> String {
        info!("Generating episode title");
        let mut request = CompletionRequest::new(self.prompt(narration), TITLE_MAX_TOKENS)
            .with_temperature(TITLE_TEMPERATURE);
        if let Some(model) = &self.model {
            request = request.with_model(model.clone());
        }

        let generated = match self.client.call(rate, &request).await {
            Ok(response) => response
                .text
                .trim()
                .trim_matches('"')
                .trim_matches('\'')
                .trim()
                .to_string(),
            Err(e) => {
                error!("Error generating episode title: {}", e);
                String::new()
            }
        };

        if generated.is_empty() {
            let title = fallback_title(&self.short_title, date);
            info!("Using fallback title: {}", title);
            return title;
        }

        let word_count = generated.split_whitespace().count();
        if !(3..=15).contains(&word_count) {
            warn!("Generated title has {} words, outside recommended range", word_count);
        }
        info!("Generated episode title: {}", generated);
        generated
    }

    pub async fn episode(&self, rate: &mut RateState, narration: &str, date: NaiveDate) -> EpisodeMetadata {
        EpisodeMetadata {
            title: self.title(rate, narration, date).await,
            description: episode_description(narration, &self.show_title),
        }
    }
}
