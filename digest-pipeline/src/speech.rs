use crate::client::{RemoteService, ThrottledClient};
use crate::context::RunContext;
use crate::types::{
    AudioChunk, AudioTrack, PipelineError, Result, SynthesisRequest, SynthesisResponse, VoiceConfig,
};
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

pub const DEFAULT_MAX_CHUNK_CHARS: usize = 2800;

pub const SENTENCE_PAUSE: &str = r#"<break time="0.5s"/>"#;
pub const SECTION_PAUSE: &str = r#"<break time="1s"/>"#;
pub const SEGMENT_PAUSE: &str = r#"<break time="2s"/>"#;

static BREAK_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<break[^>]*/?>").unwrap());
static MARKDOWN_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#+\s*").unwrap());
static MARKDOWN_BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());
static MARKDOWN_ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^*]+)\*").unwrap());
static LIST_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\d+\.\s*").unwrap());
static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").unwrap());
static DIVIDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"═+").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"([.!?])\s+").unwrap());
static SECTION_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(TOP NEWS HEADLINES|DEEP DIVE ANALYSIS)").unwrap());
static SUBSECTION_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(Technical Deep Dive|Financial Analysis|Market Disruption|Cultural and Social Impact|Executive Action Plan)",
    )
    .unwrap()
});
// A sentence ends at a terminator plus whitespace, absorbing any pause markers after it.
static UNIT_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]\s+(?:<break[^>]*/>\s*)*").unwrap());
// Indivisible pieces for word-level splitting: a tag, a word, or a whitespace run.
static ATOM: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>\s*|[^\s<]+\s*|<\s*|\s+").unwrap());

/// Spoken framing around the digest.
#[derive(Debug, Clone, PartialEq)]
pub struct Announcement {
    pub show_title: String,
    pub host_name: String,
    pub environment_notice: String,
}

impl Announcement {
    pub fn new(show_title: impl Into<String>, voice: &str, environment: &str) -> Self {
        let environment_notice = if environment.eq_ignore_ascii_case("staging") {
            "This is a staging test. ".to_string()
        } else {
            String::new()
        };
        Self {
            show_title: show_title.into(),
            host_name: host_name_for_voice(voice),
            environment_notice,
        }
    }

    pub fn intro(&self, date: NaiveDate) -> String {
        format!(
            "{}Welcome to {}. I'm {}, bringing you today's most important developments in artificial intelligence. Today is {}, {} {}{}.",
            self.environment_notice,
            self.show_title,
            self.host_name,
            date.format("%A"),
            date.format("%B"),
            date.day(),
            ordinal_suffix(date.day())
        )
    }

    pub fn outro(&self) -> String {
        format!(
            "That's all for today's {}. I'm {}, and I'll be back tomorrow with more AI insights. Until then, keep innovating.",
            self.show_title, self.host_name
        )
    }
}

pub fn host_name_for_voice(voice: &str) -> String {
    let mut letters = voice.trim().chars();
    let name: String = match letters.next() {
        Some(first) => first.to_uppercase().chain(letters.flat_map(char::to_lowercase)).collect(),
        None => "Your host".to_string(),
    };
    format!("{}, a synthetic intelligence agent", name)
}

pub fn ordinal_suffix(day: u32) -> &'static str {
    match day {
        4..=20 | 24..=30 => "th",
        _ => match day % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        },
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Turn digest markdown into speakable text with pause markers, framed by intro and outro.
pub fn prepare_text_for_speech(text: &str, announcement: &Announcement, date: NaiveDate) -> String {
    let text = BREAK_TAG.replace_all(text, " ");

    let text = MARKDOWN_HEADER.replace_all(&text, "");
    let text = MARKDOWN_BOLD.replace_all(&text, "${1}");
    let text = MARKDOWN_ITALIC.replace_all(&text, "${1}");
    let text = LIST_NUMBER.replace_all(&text, "");

    let text = text
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace('&', "and")
        .replace('%', " percent")
        .replace('$', "dollar ")
        .replace('<', " less than ")
        .replace('>', " greater than ");

    let text = URL.replace_all(&text, "link");
    let text = DIVIDER.replace_all(&text, " ");
    let text = WHITESPACE.replace_all(&text, " ");
    let text = escape_xml(text.trim());

    let text = SENTENCE_END.replace_all(&text, format!("${{1}} {} ", SENTENCE_PAUSE).as_str());
    let text = SECTION_HEADING.replace_all(
        &text,
        format!("{} ${{1}} {}", SECTION_PAUSE, SECTION_PAUSE).as_str(),
    );
    let text = SUBSECTION_HEADING.replace_all(
        &text,
        format!("{} ${{1}} {}", SECTION_PAUSE, SECTION_PAUSE).as_str(),
    );

    format!(
        "{} {} {} {} {}",
        escape_xml(&announcement.intro(date)),
        SEGMENT_PAUSE,
        text,
        SEGMENT_PAUSE,
        escape_xml(&announcement.outro())
    )
}

/// Remove pause markers and collapse the whitespace they leave behind.
pub fn strip_pacing_markers(text: &str) -> String {
    let text = BREAK_TAG.replace_all(text, " ");
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Split into sentences. Every slice ends after its terminator, trailing
/// whitespace and pause markers; concatenated they give back `text`.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut units = Vec::new();
    let mut start = 0;
    for boundary in UNIT_END.find_iter(text) {
        units.push(&text[start..boundary.end()]);
        start = boundary.end();
    }
    if start < text.len() {
        units.push(&text[start..]);
    }
    units
}

/// Split an over-long sentence at word boundaries, keeping markup tags whole.
/// A single word longer than `max_chars` is cut by characters.
fn split_at_words(text: &str, max_chars: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut end = 0;
    let mut chars = 0;

    for atom in ATOM.find_iter(text) {
        let atom_chars = atom.as_str().chars().count();
        if chars + atom_chars <= max_chars {
            end = atom.end();
            chars += atom_chars;
            continue;
        }
        if end > start {
            pieces.push(&text[start..end]);
        }
        start = atom.start();

        if atom_chars > max_chars {
            let mut rest = atom.as_str();
            while rest.chars().count() > max_chars {
                let cut = rest
                    .char_indices()
                    .nth(max_chars)
                    .map(|(index, _)| index)
                    .unwrap_or(rest.len());
                pieces.push(&rest[..cut]);
                rest = &rest[cut..];
            }
            start = atom.end() - rest.len();
            end = atom.end();
            chars = rest.chars().count();
        } else {
            end = atom.end();
            chars = atom_chars;
        }
    }
    if end > start {
        pieces.push(&text[start..end]);
    }
    pieces
}

/// Pack sentences into chunks of at most `max_chars` characters.
///
/// Chunks are contiguous slices of `text`, so joining them reproduces it exactly.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<&str> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut end = 0;
    let mut chars = 0;

    for unit in split_sentences(text) {
        let unit_start = end;
        let unit_end = unit_start + unit.len();
        let unit_chars = unit.chars().count();

        if unit_chars > max_chars {
            if end > start {
                chunks.push(&text[start..end]);
            }
            debug!("Sentence of {} chars exceeds {} and is split at words", unit_chars, max_chars);
            chunks.extend(split_at_words(unit, max_chars));
            start = unit_end;
            end = unit_end;
            chars = 0;
            continue;
        }

        if chars + unit_chars > max_chars && end > start {
            chunks.push(&text[start..end]);
            start = unit_start;
            chars = 0;
        }
        end = unit_end;
        chars += unit_chars;
    }
    if end > start {
        chunks.push(&text[start..end]);
    }
    chunks
}

/// Converts digest text into one audio track through the synthesis service.
pub struct SpeechSynthesizer<'a, S> {
    client: &'a ThrottledClient<S>,
    max_chunk_chars: usize,
    announcement: Announcement,
}

impl<'a, S> SpeechSynthesizer<'a, S>
where
    S: RemoteService<Request = SynthesisRequest, Response = SynthesisResponse>,
{
    pub fn new(client: &'a ThrottledClient<S>, max_chunk_chars: usize, announcement: Announcement) -> Self {
        Self {
            client,
            max_chunk_chars,
            announcement,
        }
    }

    /// Prepared segments in playback order. Their concatenation is the prepared text.
    pub fn plan_chunks(&self, digest_text: &str, date: NaiveDate) -> Vec<String> {
        let prepared = prepare_text_for_speech(digest_text, &self.announcement, date);
        chunk_text(&prepared, self.max_chunk_chars)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub async fn synthesize(
        &self,
        digest_text: &str,
        voice: &VoiceConfig,
        ctx: &mut RunContext,
    ) -> Result<AudioTrack> {
        if digest_text.trim().is_empty() {
            return Err(PipelineError::EmptySpeechText);
        }

        let segments = self.plan_chunks(digest_text, ctx.run_date);
        info!(
            "Converting {} text chunks to speech using voice {}",
            segments.len(),
            voice.voice
        );

        let total = segments.len();
        let mut chunks = Vec::with_capacity(total);
        for (ordinal, segment) in segments.into_iter().enumerate() {
            ctx.check_deadline(&format!("audio chunk {}", ordinal))?;
            debug!("Synthesizing chunk {}/{} ({} chars)", ordinal + 1, total, segment.len());

            let request = SynthesisRequest {
                text_segment: segment,
                voice: voice.clone(),
            };
            let response = self
                .client
                .call(&mut ctx.synthesis_rate, &request)
                .await
                .map_err(|source| PipelineError::AudioChunk { ordinal, source })?;

            chunks.push(AudioChunk {
                ordinal,
                text_segment: request.text_segment,
                audio_bytes: Some(response.audio_bytes),
            });
        }

        let track = AudioTrack::assemble(chunks)?;
        info!(
            "Generated audio track: {} bytes from {} chunks",
            track.len(),
            track.chunk_count
        );
        Ok(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedService;
    use crate::types::{Limits, ServiceFailure};
    use bytes::Bytes;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 17).unwrap()
    }

    fn announcement() -> Announcement {
        Announcement::new("AI Daily", "joanna", "production")
    }

    #[test]
    fn ordinal_suffixes() {
        let suffixes: Vec<&str> = [1, 2, 3, 4, 11, 12, 13, 21, 22, 23, 24, 31]
            .iter()
            .map(|day| ordinal_suffix(*day))
            .collect();
        assert_eq!(
            suffixes,
            vec!["st", "nd", "rd", "th", "th", "th", "th", "st", "nd", "rd", "th", "st"]
        );
    }

    #[test]
    fn intro_names_the_host_and_date() {
        let intro = announcement().intro(date());
        assert_eq!(
            intro,
            "Welcome to AI Daily. I'm Joanna, a synthetic intelligence agent, bringing you today's most important developments in artificial intelligence. Today is Friday, October 17th."
        );
        let staging = Announcement::new("AI Daily", "Matthew", "staging").intro(date());
        assert!(staging.starts_with("This is a staging test. Welcome"));
    }

    #[test]
    fn preparation_strips_markdown_and_adds_pauses() {
        let digest = "## TOP NEWS HEADLINES\n1. **OpenAI** raised $5B & grew 40%. See https://example.com/a now!\n\
                      ## DEEP DIVE ANALYSIS\n**Cultural & Social Impact**: big.";
        let prepared = prepare_text_for_speech(digest, &announcement(), date());

        assert!(!prepared.contains("**"));
        assert!(!prepared.contains('#'));
        assert!(!prepared.contains("https://"));
        assert!(prepared.contains("dollar 5B and grew 40 percent."));
        assert!(prepared.contains("See link now!"));
        assert!(prepared.contains(r#"<break time="1s"/> TOP NEWS HEADLINES <break time="1s"/>"#));
        assert!(prepared.contains(r#"<break time="1s"/> Cultural and Social Impact <break time="1s"/>"#));
        assert!(prepared.contains(r#"percent. <break time="0.5s"/> See"#));
        assert!(prepared.starts_with("Welcome to AI Daily."));
        assert!(prepared.ends_with("keep innovating."));
        assert_eq!(prepared.matches(SEGMENT_PAUSE).count(), 2);
    }

    #[test]
    fn existing_break_tags_are_replaced() {
        let prepared = prepare_text_for_speech(r#"One<break time="3s"/>two"#, &announcement(), date());
        assert!(!prepared.contains("3s"));
        assert!(prepared.contains("One two"));
    }

    #[test]
    fn chunks_respect_the_maximum_and_reconstruct_the_text() {
        let digest = (0..200)
            .map(|i| format!("Sentence number {} talks about model releases and funding.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let prepared = prepare_text_for_speech(&digest, &announcement(), date());
        let chunks = chunk_text(&prepared, 500);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 500);
            assert_eq!(chunk.matches('<').count(), chunk.matches("/>").count());
        }
        assert_eq!(chunks.concat(), prepared);
        assert_eq!(
            strip_pacing_markers(&chunks.concat()),
            strip_pacing_markers(&prepared)
        );
    }

    #[test]
    fn chunks_break_only_after_sentences() {
        let text = "First sentence here. Second sentence here. Third sentence here.";
        let chunks = chunk_text(text, 45);
        assert_eq!(
            chunks,
            vec!["First sentence here. Second sentence here. ", "Third sentence here."]
        );
    }

    #[test]
    fn overlong_sentence_is_split_at_words() {
        let sentence = format!("{} end.", "lorem ipsum dolor ".repeat(20));
        let chunks = chunk_text(&sentence, 50);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 50);
            assert!(chunk.ends_with(' ') || chunk.ends_with('.'));
        }
        assert_eq!(chunks.concat(), sentence);
    }

    #[test]
    fn word_longer_than_maximum_is_cut_by_characters() {
        let text = "a".repeat(25);
        let chunks = chunk_text(&text, 10);
        assert_eq!(chunks, vec!["a".repeat(10), "a".repeat(10), "a".repeat(5)]);
    }

    #[test]
    fn planned_segments_keep_boundary_whitespace() {
        let service = ScriptedService::new("synthesis", |_, _: &SynthesisRequest| {
            Ok(SynthesisResponse {
                audio_bytes: Bytes::from_static(b"mp3"),
            })
        });
        let client = ThrottledClient::new(service, synthesis_limits());
        let synthesizer = SpeechSynthesizer::new(&client, 100, announcement());
        let digest = format!("{}end.", "lorem ipsum dolor ".repeat(30));

        let segments = synthesizer.plan_chunks(&digest, date());
        let prepared = prepare_text_for_speech(&digest, &announcement(), date());

        assert!(segments.len() > 2);
        assert_eq!(segments.concat(), prepared);
        let joined = strip_pacing_markers(&segments.concat());
        assert_eq!(joined, strip_pacing_markers(&prepared));
        assert!(joined.contains("Welcome to AI Daily. I'm"));
        assert!(!joined.contains("loremipsum"));
    }

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(chunk_text("   ", 100).is_empty());
    }

    fn synthesis_limits() -> Limits {
        Limits {
            max_retries: 0,
            ..Limits::synthesis()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn synthesizes_every_chunk_in_order() {
        let service = ScriptedService::new("synthesis", |index, _: &SynthesisRequest| {
            Ok(SynthesisResponse {
                audio_bytes: Bytes::from(vec![index as u8; 3]),
            })
        });
        let client = ThrottledClient::new(service, synthesis_limits());
        let synthesizer = SpeechSynthesizer::new(&client, 300, announcement());
        let digest = "A short story about models. ".repeat(40);

        let mut ctx = RunContext::new().with_run_date(date());
        let track = synthesizer
            .synthesize(&digest, &VoiceConfig::default(), &mut ctx)
            .await
            .unwrap();

        let sent = client.service().requests();
        assert_eq!(track.chunk_count, sent.len());
        assert_eq!(track.len(), sent.len() * 3);
        assert_eq!(&track.bytes[..3], &[0, 0, 0]);
        assert!(sent.iter().all(|request| request.text_segment.chars().count() <= 300));
        assert!(sent[0].text_segment.starts_with("Welcome to AI Daily."));

        let sent_text: String = sent.iter().map(|request| request.text_segment.as_str()).collect();
        assert_eq!(sent_text, prepare_text_for_speech(&digest, &announcement(), date()));
    }

    #[tokio::test(start_paused = true)]
    async fn chunk_failure_abandons_the_track() {
        let service = ScriptedService::new("synthesis", |index, _: &SynthesisRequest| {
            if index == 1 {
                Err(ServiceFailure::fatal("invalid SSML"))
            } else {
                Ok(SynthesisResponse {
                    audio_bytes: Bytes::from_static(b"mp3"),
                })
            }
        });
        let client = ThrottledClient::new(service, synthesis_limits());
        let synthesizer = SpeechSynthesizer::new(&client, 300, announcement());
        let digest = "A short story about models. ".repeat(40);

        let result = synthesizer
            .synthesize(&digest, &VoiceConfig::default(), &mut RunContext::new())
            .await;
        assert!(matches!(result, Err(PipelineError::AudioChunk { ordinal: 1, .. })));
        assert_eq!(client.service().call_count(), 2);
    }

    #[tokio::test]
    async fn empty_digest_is_rejected() {
        let service = ScriptedService::new("synthesis", |_, _: &SynthesisRequest| {
            Ok(SynthesisResponse {
                audio_bytes: Bytes::new(),
            })
        });
        let client = ThrottledClient::new(service, synthesis_limits());
        let synthesizer = SpeechSynthesizer::new(&client, 300, announcement());

        let result = synthesizer
            .synthesize("  \n", &VoiceConfig::default(), &mut RunContext::new())
            .await;
        assert!(matches!(result, Err(PipelineError::EmptySpeechText)));
        assert_eq!(client.service().call_count(), 0);
    }
}
