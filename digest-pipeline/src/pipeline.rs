use crate::client::{RemoteService, ThrottledClient};
use crate::config::PipelineConfig;
use crate::context::RunContext;
use crate::executive::{parse_executive, ExecutiveSections};
use crate::narration::{episode_description, fallback_title, parse_narration, EpisodeTitler, NarrationSections};
use crate::reduction::{PromptTemplateSet, ReductionController};
use crate::speech::{Announcement, SpeechSynthesizer, DEFAULT_MAX_CHUNK_CHARS};
use crate::tokens::TokenEstimator;
use crate::types::{
    AudioTrack, CompletionRequest, CompletionResponse, Digest, Document, DocumentSource,
    EpisodeMetadata, PipelineError, Result, ResultSink, SynthesisRequest, SynthesisResponse,
    VoiceConfig,
};
use chrono::NaiveDate;
use std::time::Duration;
use tracing::{error, info, warn};

/// Everything a run needs besides the services themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub max_output_tokens: u32,
    pub show_title: String,
    pub show_title_short: String,
    pub environment: String,
    pub title_model: Option<String>,
    pub voice: VoiceConfig,
    pub max_chunk_chars: usize,
    pub run_deadline: Option<Duration>,
}

impl PipelineOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_output_tokens: config.completion.max_output_tokens,
            show_title: config.show_title.clone(),
            show_title_short: config.show_title_short.clone(),
            environment: config.environment.clone(),
            title_model: config.completion.title_model.clone(),
            voice: config.synthesis.voice.clone(),
            max_chunk_chars: config.synthesis.max_chunk_chars,
            run_deadline: config.run_deadline,
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_output_tokens: 4000,
            show_title: "Daily AI, by AI".to_string(),
            show_title_short: "Daily AI".to_string(),
            environment: "production".to_string(),
            title_model: None,
            voice: VoiceConfig::default(),
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            run_deadline: None,
        }
    }
}

#[derive(Debug)]
pub enum AudioOutcome {
    Generated(AudioTrack),
    Skipped(String),
    Failed(PipelineError),
}

impl AudioOutcome {
    pub fn track(&self) -> Option<&AudioTrack> {
        match self {
            AudioOutcome::Generated(track) => Some(track),
            _ => None,
        }
    }
}

/// Definite outcome of one run, per digest format and for the audio track.
#[derive(Debug)]
pub struct RunReport {
    pub documents: usize,
    pub run_date: NaiveDate,
    pub executive: Result<Digest>,
    pub narration: Result<Digest>,
    pub executive_sections: Option<ExecutiveSections>,
    pub narration_sections: Option<NarrationSections>,
    pub episode: Option<EpisodeMetadata>,
    pub audio: AudioOutcome,
}

impl RunReport {
    pub fn digests(&self) -> impl Iterator<Item = &Digest> {
        self.executive.iter().chain(self.narration.iter())
    }

    pub fn any_digest(&self) -> bool {
        self.digests().next().is_some()
    }
}

pub struct DigestPipeline<C, T> {
    completion: ThrottledClient<C>,
    synthesis: Option<ThrottledClient<T>>,
    estimator: TokenEstimator,
    options: PipelineOptions,
}

impl<C, T> DigestPipeline<C, T>
where
    C: RemoteService<Request = CompletionRequest, Response = CompletionResponse>,
    T: RemoteService<Request = SynthesisRequest, Response = SynthesisResponse>,
{
    pub fn new(
        completion: ThrottledClient<C>,
        synthesis: Option<ThrottledClient<T>>,
        estimator: TokenEstimator,
        options: PipelineOptions,
    ) -> Self {
        Self {
            completion,
            synthesis,
            estimator,
            options,
        }
    }

    pub fn completion(&self) -> &ThrottledClient<C> {
        &self.completion
    }

    pub fn synthesis(&self) -> Option<&ThrottledClient<T>> {
        self.synthesis.as_ref()
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// A fresh context carrying the configured deadline.
    pub fn new_context(&self) -> RunContext {
        let ctx = RunContext::new();
        match self.options.run_deadline {
            Some(budget) => ctx.with_deadline(budget),
            None => ctx,
        }
    }

    pub async fn run(&self, documents: &[Document]) -> RunReport {
        let mut ctx = self.new_context();
        self.run_with_context(documents, &mut ctx).await
    }

    pub async fn run_with_context(&self, documents: &[Document], ctx: &mut RunContext) -> RunReport {
        info!("Starting digest run over {} documents", documents.len());
        let controller = ReductionController::new(
            &self.completion,
            &self.estimator,
            self.options.max_output_tokens,
        );

        let executive = controller
            .reduce(documents, &PromptTemplateSet::executive(), ctx)
            .await;
        log_digest("executive", &executive);
        let executive_sections = executive.as_ref().ok().map(|digest| {
            let sections = parse_executive(&digest.text);
            info!(
                "Executive digest has {} insights and {} links",
                sections.insights.len(),
                sections.top_links.len()
            );
            sections
        });

        let narration = controller
            .reduce(documents, &PromptTemplateSet::narration(), ctx)
            .await;
        log_digest("narration", &narration);

        let (narration_sections, episode) = match &narration {
            Ok(digest) => {
                let sections = parse_narration(&digest.text);
                info!("Narration has {} headlines", sections.headlines.len());
                let episode = self.episode_metadata(&digest.text, ctx).await;
                (Some(sections), Some(episode))
            }
            Err(_) => (None, None),
        };

        let audio = self.generate_audio(&narration, ctx).await;

        RunReport {
            documents: documents.len(),
            run_date: ctx.run_date,
            executive,
            narration,
            executive_sections,
            narration_sections,
            episode,
            audio,
        }
    }

    async fn episode_metadata(&self, narration: &str, ctx: &mut RunContext) -> EpisodeMetadata {
        if ctx.check_deadline("episode title").is_err() {
            return EpisodeMetadata {
                title: fallback_title(&self.options.show_title_short, ctx.run_date),
                description: episode_description(narration, &self.options.show_title),
            };
        }
        let titler = EpisodeTitler::new(
            &self.completion,
            self.options.show_title.clone(),
            self.options.show_title_short.clone(),
            self.options.title_model.clone(),
        );
        titler.episode(&mut ctx.completion_rate, narration, ctx.run_date).await
    }

    async fn generate_audio(&self, narration: &Result<Digest>, ctx: &mut RunContext) -> AudioOutcome {
        let Some(client) = &self.synthesis else {
            info!("Audio generation disabled");
            return AudioOutcome::Skipped("audio generation disabled".to_string());
        };
        let digest = match narration {
            Ok(digest) => digest,
            Err(_) => {
                warn!("No narration digest, skipping audio");
                return AudioOutcome::Skipped("no narration digest".to_string());
            }
        };

        let announcement = Announcement::new(
            self.options.show_title.clone(),
            &self.options.voice.voice,
            &self.options.environment,
        );
        let synthesizer = SpeechSynthesizer::new(client, self.options.max_chunk_chars, announcement);
        match synthesizer.synthesize(&digest.text, &self.options.voice, ctx).await {
            Ok(track) => AudioOutcome::Generated(track),
            Err(e) => {
                error!("Audio generation failed: {}", e);
                AudioOutcome::Failed(e)
            }
        }
    }

    /// Collect from `source`, run, and hand every product to `sink`.
    ///
    /// Sink failures are logged and do not fail the run. Documents are
    /// acknowledged only when at least one digest was produced.
    pub async fn process(
        &self,
        source: &mut dyn DocumentSource,
        sink: &dyn ResultSink,
    ) -> anyhow::Result<RunReport> {
        let documents = source.collect().await?;
        info!("Collected {} documents from {}", documents.len(), source.source_name());

        let report = self.run(&documents).await;

        for digest in report.digests() {
            if let Err(e) = sink.store_digest(digest).await {
                error!("Failed to store {} digest in {}: {:#}", digest.format, sink.sink_name(), e);
            }
        }
        if let (Some(track), Some(episode)) = (report.audio.track(), &report.episode) {
            if let Err(e) = sink.store_audio(&track.bytes, episode).await {
                error!("Failed to store audio in {}: {:#}", sink.sink_name(), e);
            }
        }

        if report.any_digest() {
            source.acknowledge(&documents).await?;
        } else {
            warn!("No digest produced, leaving {} documents unacknowledged", documents.len());
        }
        Ok(report)
    }
}

fn log_digest(label: &str, outcome: &Result<Digest>) {
    match outcome {
        Ok(digest) => info!(
            "{} digest ready: {} chars via {} ({} failed batches)",
            label,
            digest.text.len(),
            digest.strategy,
            digest.failed_batches.len()
        ),
        Err(e) => error!("{} digest failed: {}", label, e),
    }
}
