use anyhow::Context;
use digest_pipeline::config::PipelineConfig;
use digest_pipeline::services::{AnthropicCompletionService, HttpSpeechService};
use digest_pipeline::sinks::{LocalFileSink, WebhookSink};
use digest_pipeline::sources::LocalFileSource;
use digest_pipeline::{AudioOutcome, DigestPipeline, PipelineOptions, ThrottledClient, TokenEstimator};
use email_ingestion::{ImapMailboxSource, MailboxConfig, MailboxCredential};
use interfaces::defs::{DocumentSource, ResultSink};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn build_source(config: &PipelineConfig) -> anyhow::Result<Box<dyn DocumentSource>> {
    match &config.io.mailbox_uri {
        Some(uri) => {
            let credential = MailboxCredential {
                email_address: config.io.mailbox_username.clone().unwrap_or_default(),
                password: config
                    .io
                    .mailbox_password
                    .clone()
                    .context("MAILBOX_PASSWORD is required when MAILBOX_URI is set")?,
                last_sync_date: None,
            };
            let mailbox = MailboxConfig::from_uri_and_credentials(uri, &credential)?;
            Ok(Box::new(ImapMailboxSource::new(mailbox)))
        }
        None => Ok(Box::new(LocalFileSource::new(&config.io.sample_emails_dir))),
    }
}

fn build_sink(config: &PipelineConfig) -> anyhow::Result<Box<dyn ResultSink>> {
    match &config.io.webhook_url {
        Some(url) => Ok(Box::new(WebhookSink::new(url.clone())?)),
        None => Ok(Box::new(LocalFileSink::new(&config.io.output_dir, config.io.key_prefix.clone()))),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    info!("Starting newsletter digest run ({})", config.environment);

    let estimator = TokenEstimator::from_config(config.completion.tokenizer_path.as_deref());
    let completion = ThrottledClient::new(
        AnthropicCompletionService::new(
            config.completion.api_url.clone(),
            config.completion.api_key.clone(),
            config.completion.model.clone(),
        )?,
        config.completion.limits,
    );

    let synthesis = match (config.synthesis.enabled, &config.synthesis.api_url) {
        (true, Some(url)) => Some(ThrottledClient::new(
            HttpSpeechService::new(url.clone(), config.synthesis.api_key.clone())?,
            config.synthesis.limits,
        )),
        _ => None,
    };

    let pipeline = DigestPipeline::new(completion, synthesis, estimator, PipelineOptions::from_config(&config));
    let mut source = build_source(&config)?;
    let sink = build_sink(&config)?;
    info!("Reading from {}, writing to {}", source.source_name(), sink.sink_name());

    let report = pipeline.process(source.as_mut(), sink.as_ref()).await?;

    info!(
        "Run finished: {} documents, executive {}, narration {}",
        report.documents,
        if report.executive.is_ok() { "ok" } else { "failed" },
        if report.narration.is_ok() { "ok" } else { "failed" },
    );
    if let Some(episode) = &report.episode {
        info!("Episode: {}", episode.title);
    }
    match &report.audio {
        AudioOutcome::Generated(track) => info!("Audio: {} chunks, {} bytes", track.chunk_count, track.len()),
        AudioOutcome::Skipped(reason) => info!("Audio skipped: {}", reason),
        AudioOutcome::Failed(e) => warn!("Audio failed: {}", e),
    }

    if !report.any_digest() {
        error!("No digest was produced");
        anyhow::bail!("no digest produced from {} documents", report.documents);
    }
    Ok(())
}
