use crate::tokens::TokenEstimator;
use crate::types::{batch_budget, Batch, Document};
use tracing::{debug, info, warn};

/// Fixed per-document allowance for prompt framing around the rendered document.
pub const DOCUMENT_OVERHEAD_TOKENS: usize = 16;

pub const TRUNCATION_MARKER: &str = " [Content truncated]";

/// Headroom applied to the proportional cut so the first attempt usually fits.
const TRUNCATION_HEADROOM: f64 = 0.95;

/// Render a document the way it is presented to the completion model.
pub fn render_document(document: &Document, index: usize) -> String {
    let mut rendered = format!("\n### Newsletter {}: {}\n", index, document.source_label);
    if let Some(subject) = &document.subject {
        rendered.push_str(&format!("**Subject:** {}\n", subject));
    }
    if let Some(sender) = &document.sender {
        rendered.push_str(&format!("**From:** {}\n", sender));
    }
    if let Some(date) = &document.received_at {
        rendered.push_str(&format!("**Date:** {}\n", date));
    }
    rendered.push_str("\n**Content:**\n");
    rendered.push_str(&document.text);
    rendered.push_str("\n\n");
    rendered
}

/// Longest prefix of `text` holding at most `max_chars` characters.
pub fn take_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Greedy, order-preserving packer of documents into token-bounded batches.
pub struct BatchPlanner<'a> {
    estimator: &'a TokenEstimator,
}

impl<'a> BatchPlanner<'a> {
    pub fn new(estimator: &'a TokenEstimator) -> Self {
        Self { estimator }
    }

    pub fn document_cost(&self, document: &Document) -> usize {
        self.estimator.estimate(&render_document(document, 1)) + DOCUMENT_OVERHEAD_TOKENS
    }

    pub fn total_cost(&self, documents: &[Document]) -> usize {
        documents.iter().map(|document| self.document_cost(document)).sum()
    }

    pub fn plan(&self, documents: &[Document], max_tokens_per_request: usize) -> Vec<Batch> {
        let budget = batch_budget(max_tokens_per_request);
        let mut batches = Vec::new();
        let mut current: Vec<Document> = Vec::new();
        let mut current_tokens = 0usize;

        for document in documents {
            let cost = self.document_cost(document);

            if cost > budget {
                if !current.is_empty() {
                    batches.push(Batch {
                        documents: std::mem::take(&mut current),
                        estimated_tokens: current_tokens,
                        truncated: false,
                    });
                    current_tokens = 0;
                }
                let (truncated, truncated_cost) = self.truncate_to_fit(document, cost, budget);
                batches.push(Batch {
                    documents: vec![truncated],
                    estimated_tokens: truncated_cost,
                    truncated: true,
                });
                continue;
            }

            if current_tokens + cost > budget && !current.is_empty() {
                batches.push(Batch {
                    documents: std::mem::take(&mut current),
                    estimated_tokens: current_tokens,
                    truncated: false,
                });
                current_tokens = 0;
            }

            current.push(document.clone());
            current_tokens += cost;
        }

        if !current.is_empty() {
            batches.push(Batch {
                documents: current,
                estimated_tokens: current_tokens,
                truncated: false,
            });
        }

        info!(
            "Planned {} batches for {} documents (budget {} tokens per batch)",
            batches.len(),
            documents.len(),
            budget
        );
        batches
    }

    /// Cut an oversized document down until its cost fits `budget`.
    ///
    /// The cut is proportional to `budget / cost`, backed off to a sentence or
    /// paragraph end when one lies in the last fifth of the kept text. The
    /// document is never dropped, even when nothing of its body fits.
    fn truncate_to_fit(&self, document: &Document, cost: usize, budget: usize) -> (Document, usize) {
        let original_chars = document.text.chars().count();
        let mut ratio = (budget as f64 / cost as f64) * TRUNCATION_HEADROOM;

        loop {
            let keep = (original_chars as f64 * ratio).floor() as usize;
            let kept = cut_at_boundary(&document.text, keep);
            let candidate = document.with_text(format!("{}{}", kept, TRUNCATION_MARKER));
            let candidate_cost = self.document_cost(&candidate);

            if candidate_cost <= budget || keep == 0 {
                if candidate_cost > budget {
                    warn!(
                        "Document {} still costs {} tokens with an empty body (budget {})",
                        document.id, candidate_cost, budget
                    );
                }
                warn!(
                    "Oversized document {} truncated from {} to {} chars ({} -> {} tokens)",
                    document.id,
                    original_chars,
                    candidate.size_hint_chars,
                    cost,
                    candidate_cost
                );
                return (candidate, candidate_cost);
            }

            debug!(
                "Truncated document {} still over budget ({} > {}), shrinking further",
                document.id, candidate_cost, budget
            );
            ratio *= 0.9;
        }
    }
}

/// Prefix of at most `keep_chars` characters, ending at a sentence or paragraph
/// boundary when one falls within the last 20% of the prefix.
fn cut_at_boundary(text: &str, keep_chars: usize) -> &str {
    let prefix = take_chars(text, keep_chars);
    if prefix.len() == text.len() {
        return prefix;
    }
    match prefix.rfind(['.', '!', '?', '\n']) {
        Some(position) if (position + 1) * 5 >= prefix.len() * 4 => &prefix[..position + 1],
        _ => prefix,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: usize, chars: usize) -> Document {
        Document::new(format!("doc-{}", id), "TLDR AI", "a".repeat(chars))
            .with_subject(format!("Issue {}", id))
    }

    #[test]
    fn empty_input_yields_no_batches() {
        let estimator = TokenEstimator::fallback();
        assert!(BatchPlanner::new(&estimator).plan(&[], 1_000).is_empty());
    }

    #[test]
    fn batches_preserve_order_and_cover_every_document_once() {
        let estimator = TokenEstimator::fallback();
        let planner = BatchPlanner::new(&estimator);
        let documents: Vec<Document> = (0..25).map(|i| doc(i, 300 + i * 37)).collect();

        let batches = planner.plan(&documents, 1_000);
        assert!(batches.len() > 1);

        let flattened: Vec<&str> = batches
            .iter()
            .flat_map(|batch| batch.documents.iter().map(|d| d.id.as_str()))
            .collect();
        let expected: Vec<&str> = documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(flattened, expected);
    }

    #[test]
    fn no_batch_exceeds_the_budget() {
        let estimator = TokenEstimator::fallback();
        let planner = BatchPlanner::new(&estimator);
        let documents: Vec<Document> = (0..40).map(|i| doc(i, 100 + (i * 97) % 900)).collect();

        for batch in planner.plan(&documents, 1_000) {
            assert!(!batch.documents.is_empty());
            assert!(batch.estimated_tokens <= 700, "batch of {} tokens", batch.estimated_tokens);
            let recomputed: usize = batch.documents.iter().map(|d| planner.document_cost(d)).sum();
            assert_eq!(recomputed, batch.estimated_tokens);
        }
    }

    #[test]
    fn oversized_document_is_truncated_into_its_own_batch() {
        let estimator = TokenEstimator::fallback();
        let planner = BatchPlanner::new(&estimator);
        let documents = vec![doc(0, 200), doc(1, 20_000), doc(2, 200)];

        let batches = planner.plan(&documents, 1_000);
        assert_eq!(batches.len(), 3);

        let oversized = &batches[1];
        assert!(oversized.truncated);
        assert_eq!(oversized.documents.len(), 1);
        assert_eq!(oversized.documents[0].id, "doc-1");
        assert!(oversized.documents[0].text.ends_with(TRUNCATION_MARKER));
        assert!(oversized.estimated_tokens <= 700);
        assert!(oversized.documents[0].size_hint_chars < 20_000);
    }

    #[test]
    fn truncation_prefers_sentence_boundaries() {
        let estimator = TokenEstimator::fallback();
        let planner = BatchPlanner::new(&estimator);
        let text = "This sentence is about forty chars long. ".repeat(500);
        let documents = vec![Document::new("long", "Import AI", text)];

        let batches = planner.plan(&documents, 2_000);
        let kept = batches[0].documents[0].text.trim_end_matches(TRUNCATION_MARKER);
        assert!(kept.ends_with('.'), "kept text ends with {:?}", &kept[kept.len() - 5..]);
    }

    #[test]
    fn single_small_document_forms_one_batch() {
        let estimator = TokenEstimator::fallback();
        let planner = BatchPlanner::new(&estimator);
        let batches = planner.plan(&[doc(0, 40)], 1_000);
        assert_eq!(batches.len(), 1);
        assert!(!batches[0].truncated);
    }

    #[test]
    fn take_chars_respects_char_boundaries() {
        assert_eq!(take_chars("héllo", 2), "hé");
        assert_eq!(take_chars("hi", 10), "hi");
    }
}
