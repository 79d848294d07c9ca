use crate::batching::{render_document, take_chars, BatchPlanner};
use crate::client::{RemoteService, ThrottledClient};
use crate::context::RunContext;
use crate::tokens::TokenEstimator;
use crate::types::{
    Batch, CompletionRequest, CompletionResponse, Digest, DigestFormat, Document, PipelineError,
    ReductionStrategy, Result,
};
use chrono::Utc;
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

/// Characters of each document body kept in a batch prompt.
pub const BATCH_CONTENT_CHARS: usize = 3000;

const EXECUTIVE_COMPREHENSIVE: &str = r#"
You are a Technology News Editor, expert in the AI domain, analyzing daily AI newsletters. Summarize the {num_documents} AI newsletters received today.

Here are the newsletters:

{document_content}

Provide a report with these sections:

1. **Executive Summary**: Two or three paragraphs on the day's most important AI developments
2. **Key Themes**: Three to five themes or trends that recur across the newsletters
3. **Breaking News**: Significant announcements, funding rounds and launches
4. **Technical Insights**: Research results, new capabilities and engineering developments
5. **Market Impact**: Business implications and shifts in the competitive landscape
6. **Notable Links**: The three to five links most worth reading, each with a one-line description
7. **Tomorrow's Focus**: What to watch next given today's news

Write it as a structured report for an executive who follows AI closely.
"#;

const EXECUTIVE_BATCH: &str = r#"
You are a Technology News Editor, expert in the AI domain. This is batch {batch_num}. Summarize these {num_documents} newsletters:

{batch_content}

Provide:
1. **Key Developments**: The main developments in these newsletters
2. **Important Links**: The most valuable links and why they matter
3. **Notable Quotes/Data**: Significant statistics or announcements

Be concise but complete.
"#;

const EXECUTIVE_META_SUMMARY: &str = r#"
You are a Technology News Editor, expert in the AI domain, writing the final report from {num_batches} batch summaries that cover {num_documents} AI newsletters from: {source_labels}.

Here are the batch summaries:

{batch_summaries}

Write the final report with:

1. **Executive Summary**: The overall picture of today's AI developments
2. **Key Themes**: Trends that span the newsletters
3. **Critical Developments**: The most important news and announcements
4. **Technical Breakthroughs**: Notable research and technical advances
5. **Market & Business Impact**: Commercial implications
6. **Must-Read Links**: The five links most worth following up
7. **Looking Ahead**: What these developments mean next

Some batch summaries may be placeholders for content that could not be processed; work from the rest.
"#;

const NARRATION_COMPREHENSIVE: &str = r#"
You are a technology radio host writing a podcast script from {num_documents} AI newsletters received today.

Do NOT include any introduction, welcome or opening statement. The introduction is added separately.

Here are the newsletters:

{document_content}

Write the script in TWO sections:

## TOP NEWS HEADLINES
Five or six short news items in conversational podcast style, one or two sentences each, written to be spoken aloud to a business audience.

## DEEP DIVE ANALYSIS
Take the single most important item from the headlines and analyze it:

1. **Technical Deep Dive**: How the technology works, in accessible terms
2. **Financial Analysis**: Funding, valuation, revenue and cost implications
3. **Market Disruption**: Competitive positioning and industry effects
4. **Cultural & Social Impact**: Effects on society, adoption and behavior
5. **Executive Action Plan**: Two or three concrete recommendations for a technology executive

Keep it conversational but professional, speaking directly to technology executives.

Do NOT include any closing statement or sign-off. The closing is added separately.
"#;

const NARRATION_BATCH: &str = r#"
You are preparing podcast material from AI newsletters. This is batch {batch_num}. Analyze these {num_documents} newsletters for a spoken format.

Do NOT include any introduction or closing statement.

{batch_content}

Cover:
1. **Key Developments**: Developments suitable for podcast headlines
2. **Important Stories**: The most compelling stories, with details
3. **Notable Information**: Significant data, quotes or technical details

Write in a conversational podcast style, engaging but concise.
"#;

const NARRATION_META_SUMMARY: &str = r#"
You are writing the final podcast script from {num_batches} batch summaries that cover {num_documents} AI newsletters from: {source_labels}.

Do NOT include any introduction, welcome, closing statement or sign-off. Start and end with the content.

Here are the batch summaries:

{batch_summaries}

Write the script in TWO sections:

## TOP NEWS HEADLINES
Five or six short news items in conversational podcast style, one or two sentences each.

## DEEP DIVE ANALYSIS
Take the single most important item and analyze it:
1. **Technical Deep Dive**: The technology in accessible terms
2. **Financial Analysis**: Business implications, funding and valuation
3. **Market Disruption**: Competitive impact and industry effects
4. **Cultural & Social Impact**: Societal and behavioral implications
5. **Executive Action Plan**: Two or three recommendations for technology executives

Some batch summaries may be placeholders for content that could not be processed; work from the rest.
"#;

/// The three prompts used to reduce documents into one digest format.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplateSet {
    pub format: DigestFormat,
    pub comprehensive: String,
    pub batch: String,
    pub meta_summary: String,
}

impl PromptTemplateSet {
    pub fn executive() -> Self {
        Self {
            format: DigestFormat::Executive,
            comprehensive: EXECUTIVE_COMPREHENSIVE.to_string(),
            batch: EXECUTIVE_BATCH.to_string(),
            meta_summary: EXECUTIVE_META_SUMMARY.to_string(),
        }
    }

    pub fn narration() -> Self {
        Self {
            format: DigestFormat::Narration,
            comprehensive: NARRATION_COMPREHENSIVE.to_string(),
            batch: NARRATION_BATCH.to_string(),
            meta_summary: NARRATION_META_SUMMARY.to_string(),
        }
    }

    pub fn for_format(format: DigestFormat) -> Self {
        match format {
            DigestFormat::Executive => Self::executive(),
            DigestFormat::Narration => Self::narration(),
        }
    }

    pub fn comprehensive_prompt(&self, documents: &[Document]) -> String {
        let content: String = documents
            .iter()
            .enumerate()
            .map(|(i, document)| render_document(document, i + 1))
            .collect();
        fill(
            &self.comprehensive,
            &[
                ("num_documents", documents.len().to_string()),
                ("document_content", content),
            ],
        )
    }

    pub fn batch_prompt(&self, documents: &[Document], batch_num: usize) -> String {
        let content: String = documents
            .iter()
            .enumerate()
            .map(|(i, document)| render_batch_document(document, i + 1))
            .collect();
        fill(
            &self.batch,
            &[
                ("batch_num", batch_num.to_string()),
                ("num_documents", documents.len().to_string()),
                ("batch_content", content),
            ],
        )
    }

    pub fn meta_summary_prompt(&self, partials: &[String], documents: &[Document]) -> String {
        let summaries: String = partials
            .iter()
            .enumerate()
            .map(|(i, summary)| format!("\n### Batch {} Summary:\n{}\n\n", i + 1, summary))
            .collect();
        fill(
            &self.meta_summary,
            &[
                ("num_batches", partials.len().to_string()),
                ("num_documents", documents.len().to_string()),
                ("source_labels", source_labels(documents)),
                ("batch_summaries", summaries),
            ],
        )
    }
}

/// Substitute `{name}` placeholders. Unknown placeholders are left as written.
pub fn fill(template: &str, values: &[(&str, String)]) -> String {
    values.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("{{{}}}", name), value)
    })
}

fn render_batch_document(document: &Document, index: usize) -> String {
    let mut rendered = format!("\n### Newsletter {}: {}\n", index, document.source_label);
    if let Some(subject) = &document.subject {
        rendered.push_str(&format!("**Subject:** {}\n", subject));
    }
    rendered.push_str(&format!(
        "**Content:** {}\n",
        take_chars(&document.text, BATCH_CONTENT_CHARS)
    ));
    rendered
}

/// Distinct source labels, sorted, comma separated.
pub fn source_labels(documents: &[Document]) -> String {
    documents
        .iter()
        .map(|document| document.source_label.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn batch_placeholder(batch_num: usize) -> String {
    format!("[Batch {}: content omitted due to processing error]", batch_num)
}

/// Chooses a reduction strategy and drives the completion service through it.
pub struct ReductionController<'a, S> {
    client: &'a ThrottledClient<S>,
    estimator: &'a TokenEstimator,
    max_output_tokens: u32,
}

impl<'a, S> ReductionController<'a, S>
where
    S: RemoteService<Request = CompletionRequest, Response = CompletionResponse>,
{
    pub fn new(
        client: &'a ThrottledClient<S>,
        estimator: &'a TokenEstimator,
        max_output_tokens: u32,
    ) -> Self {
        Self {
            client,
            estimator,
            max_output_tokens,
        }
    }

    pub fn choose_strategy(&self, documents: &[Document]) -> (ReductionStrategy, Vec<Batch>) {
        let planner = BatchPlanner::new(self.estimator);
        let max_tokens = self.client.limits().max_tokens_per_request;
        let total = planner.total_cost(documents);

        if total <= max_tokens {
            debug!("{} documents fit one request ({} <= {} tokens)", documents.len(), total, max_tokens);
            return (ReductionStrategy::SinglePass, Vec::new());
        }

        info!(
            "{} documents need {} tokens, over the {} token limit; batching",
            documents.len(),
            total,
            max_tokens
        );
        let batches = planner.plan(documents, max_tokens);
        (
            ReductionStrategy::BatchAndReduce {
                batches: batches.len(),
            },
            batches,
        )
    }

    pub async fn reduce(
        &self,
        documents: &[Document],
        templates: &PromptTemplateSet,
        ctx: &mut RunContext,
    ) -> Result<Digest> {
        if documents.is_empty() {
            return Err(PipelineError::NoDocuments);
        }

        let format = templates.format;
        let (strategy, batches) = self.choose_strategy(documents);
        info!("Reducing {} documents into {} digest: {}", documents.len(), format, strategy);

        if batches.is_empty() {
            ctx.check_deadline(&format!("{} single-pass synthesis", format))?;
            let request = CompletionRequest::new(
                templates.comprehensive_prompt(documents),
                self.max_output_tokens,
            );
            let response = self
                .client
                .call(&mut ctx.completion_rate, &request)
                .await
                .map_err(|source| {
                    error!("Single-pass {} synthesis failed: {}", format, source);
                    PipelineError::TopLevelSynthesis { format, source }
                })?;
            return Ok(Digest {
                format,
                text: response.text,
                strategy,
                failed_batches: Vec::new(),
                produced_at: Utc::now(),
            });
        }

        let mut partials = Vec::with_capacity(batches.len());
        let mut failed_batches = Vec::new();

        for (i, batch) in batches.iter().enumerate() {
            let batch_num = i + 1;
            ctx.check_deadline(&format!("{} batch {}", format, batch_num))?;
            if let Some(left) = ctx.remaining() {
                debug!("{:?} left before the run deadline", left);
            }

            info!(
                "Processing {} batch {}/{} ({} documents, ~{} tokens)",
                format,
                batch_num,
                batches.len(),
                batch.documents.len(),
                batch.estimated_tokens
            );
            let request = CompletionRequest::new(
                templates.batch_prompt(&batch.documents, batch_num),
                self.max_output_tokens,
            );
            match self.client.call(&mut ctx.completion_rate, &request).await {
                Ok(response) => partials.push(response.text),
                Err(e) => {
                    warn!("{} batch {} failed, substituting placeholder: {}", format, batch_num, e);
                    failed_batches.push(batch_num);
                    partials.push(batch_placeholder(batch_num));
                }
            }
        }

        if failed_batches.len() == batches.len() {
            warn!("Every {} batch failed; meta-summary will only see placeholders", format);
        }

        ctx.check_deadline(&format!("{} meta-summary", format))?;
        let request = CompletionRequest::new(
            templates.meta_summary_prompt(&partials, documents),
            self.max_output_tokens,
        );
        let response = self
            .client
            .call(&mut ctx.completion_rate, &request)
            .await
            .map_err(|source| {
                error!("{} meta-summary failed: {}", format, source);
                PipelineError::TopLevelSynthesis { format, source }
            })?;

        Ok(Digest {
            format,
            text: response.text,
            strategy,
            failed_batches,
            produced_at: Utc::now(),
        })
    }
}
