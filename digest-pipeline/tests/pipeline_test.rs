use bytes::Bytes;
use chrono::NaiveDate;
use digest_pipeline::client::ThrottledClient;
use digest_pipeline::testing::ScriptedService;
use digest_pipeline::types::{
    CompletionRequest, CompletionResponse, DigestFormat, Document, Limits, PipelineError,
    ReductionStrategy, ServiceError, ServiceFailure, SynthesisRequest, SynthesisResponse,
};
use digest_pipeline::{AudioOutcome, DigestPipeline, PipelineOptions, TokenEstimator};
use std::time::Duration;

type Completion = ScriptedService<CompletionRequest, CompletionResponse>;
type Synthesis = ScriptedService<SynthesisRequest, SynthesisResponse>;

const NARRATION: &str = "## TOP NEWS HEADLINES\n\
1. A lab released an open model that rivals frontier systems.\n\
2. Chip export rules tightened again across three regions.\n\n\
## DEEP DIVE ANALYSIS\n\
The open model changes pricing for every hosted provider. Expect cuts within weeks.\n";

fn limits(max_tokens_per_request: usize) -> Limits {
    Limits {
        max_tokens_per_request,
        requests_per_minute: 600,
        max_retries: 2,
        base_delay_seconds: 1,
        request_timeout_seconds: 360,
    }
}

fn documents(count: usize, chars: usize) -> Vec<Document> {
    (1..=count)
        .map(|i| {
            Document::new(format!("doc-{}", i), format!("Newsletter {}", i % 3), "a".repeat(chars))
                .with_subject(format!("Issue {}", i))
        })
        .collect()
}

fn answer(request: &CompletionRequest) -> CompletionResponse {
    let text = if request.prompt.contains("episode titles") {
        "\"Open Models Shake Up AI Pricing\"".to_string()
    } else if request.prompt.contains("Technology News Editor") {
        "## Executive Summary\nOpen models are cheaper now.\n\n## Notable\nPrices fell.\nhttps://example.com/prices".to_string()
    } else {
        NARRATION.to_string()
    };
    CompletionResponse { text }
}

fn completion() -> Completion {
    ScriptedService::new("completion", |_, request: &CompletionRequest| Ok(answer(request)))
}

fn speech() -> Synthesis {
    ScriptedService::new("synthesis", |attempt, _: &SynthesisRequest| {
        Ok(SynthesisResponse {
            audio_bytes: Bytes::from(vec![attempt as u8; 4]),
        })
    })
}

fn pipeline(
    completion: Completion,
    synthesis: Option<Synthesis>,
    max_tokens_per_request: usize,
    options: PipelineOptions,
) -> DigestPipeline<Completion, Synthesis> {
    DigestPipeline::new(
        ThrottledClient::new(completion, limits(max_tokens_per_request)),
        synthesis.map(|service| ThrottledClient::new(service, Limits::synthesis())),
        TokenEstimator::fallback(),
        options,
    )
}

fn run_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 10, 17).unwrap()
}

#[tokio::test(start_paused = true)]
async fn small_input_produces_both_digests_title_and_audio() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();

    let pipeline = pipeline(completion(), Some(speech()), 100_000, PipelineOptions::default());
    let mut ctx = pipeline.new_context().with_run_date(run_date());
    let report = pipeline.run_with_context(&documents(3, 400), &mut ctx).await;

    let executive = report.executive.as_ref().unwrap();
    assert_eq!(executive.format, DigestFormat::Executive);
    assert_eq!(executive.strategy, ReductionStrategy::SinglePass);
    assert!(executive.failed_batches.is_empty());

    let executive_sections = report.executive_sections.as_ref().unwrap();
    assert!(executive_sections.summary.contains("Open models are cheaper now."));
    assert_eq!(executive_sections.insights, vec!["## Notable\nPrices fell."]);
    assert_eq!(executive_sections.top_links, vec!["https://example.com/prices"]);

    let narration = report.narration.as_ref().unwrap();
    assert_eq!(narration.format, DigestFormat::Narration);
    assert_eq!(narration.text, NARRATION);

    let sections = report.narration_sections.as_ref().unwrap();
    assert_eq!(sections.headlines.len(), 2);
    assert!(sections.deep_dive.starts_with("The open model"));

    let episode = report.episode.as_ref().unwrap();
    assert_eq!(episode.title, "Open Models Shake Up AI Pricing");
    assert!(!episode.description.is_empty());

    // executive, narration and title
    assert_eq!(pipeline.completion().service().call_count(), 3);

    let track = report.audio.track().expect("audio track");
    let synthesis_calls = pipeline.synthesis().unwrap().service().call_count();
    assert_eq!(track.chunk_count, synthesis_calls);
    assert_eq!(track.len(), synthesis_calls * 4);

    let requests = pipeline.synthesis().unwrap().service().requests();
    assert!(requests[0].text_segment.starts_with("Welcome to Daily AI, by AI."));
    assert!(requests[0].text_segment.contains("Today is Friday, October 17th."));
    assert!(requests.last().unwrap().text_segment.contains("That's all for today's Daily AI, by AI."));
}

#[tokio::test(start_paused = true)]
async fn large_input_is_batched_for_both_formats() {
    let pipeline = pipeline(completion(), None, 1_000, PipelineOptions::default());
    let report = pipeline.run(&documents(10, 600)).await;

    for digest in report.digests() {
        assert_eq!(digest.strategy, ReductionStrategy::BatchAndReduce { batches: 4 });
    }
    // four batches plus a meta-summary per format, then the title
    assert_eq!(pipeline.completion().service().call_count(), 11);
    assert!(matches!(report.audio, AudioOutcome::Skipped(_)));
}

#[tokio::test(start_paused = true)]
async fn audio_failure_keeps_the_digests() {
    let failing = ScriptedService::new("synthesis", |_, _: &SynthesisRequest| {
        Err(ServiceFailure::fatal("voice not found"))
    });
    let pipeline = pipeline(completion(), Some(failing), 100_000, PipelineOptions::default());
    let report = pipeline.run(&documents(2, 300)).await;

    assert!(report.executive.is_ok());
    assert!(report.narration.is_ok());
    assert!(report.episode.is_some());
    match &report.audio {
        AudioOutcome::Failed(PipelineError::AudioChunk { ordinal, source }) => {
            assert_eq!(*ordinal, 0);
            assert!(matches!(source, ServiceError::Fatal { .. }));
        }
        other => panic!("expected chunk failure, got {:?}", other),
    }
    assert_eq!(pipeline.synthesis().unwrap().service().call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_narration_skips_title_and_audio() {
    let flaky = ScriptedService::new("completion", |_, request: &CompletionRequest| {
        if request.prompt.contains("Technology News Editor") {
            Ok(answer(request))
        } else {
            Err(ServiceFailure::fatal("content policy"))
        }
    });
    let pipeline = pipeline(flaky, Some(speech()), 100_000, PipelineOptions::default());
    let report = pipeline.run(&documents(2, 300)).await;

    assert!(report.executive.is_ok());
    assert!(matches!(
        report.narration,
        Err(PipelineError::TopLevelSynthesis {
            format: DigestFormat::Narration,
            ..
        })
    ));
    assert!(report.episode.is_none());
    assert!(report.executive_sections.is_some());
    assert!(report.narration_sections.is_none());
    assert!(matches!(report.audio, AudioOutcome::Skipped(_)));
    assert!(report.any_digest());
    assert_eq!(pipeline.synthesis().unwrap().service().call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn empty_input_produces_nothing() {
    let pipeline = pipeline(completion(), Some(speech()), 100_000, PipelineOptions::default());
    let report = pipeline.run(&[]).await;

    assert!(matches!(report.executive, Err(PipelineError::NoDocuments)));
    assert!(matches!(report.narration, Err(PipelineError::NoDocuments)));
    assert!(!report.any_digest());
    assert_eq!(pipeline.completion().service().call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn deadline_falls_back_to_default_title_and_stops_audio() {
    let slow = completion().with_latency(Duration::from_secs(20));
    let options = PipelineOptions {
        run_deadline: Some(Duration::from_secs(30)),
        show_title_short: "Daily AI".to_string(),
        ..PipelineOptions::default()
    };
    let pipeline = pipeline(slow, Some(speech()), 100_000, options);
    let mut ctx = pipeline.new_context().with_run_date(run_date());
    let report = pipeline.run_with_context(&documents(2, 300), &mut ctx).await;

    assert!(report.executive.is_ok());
    assert!(report.narration.is_ok());
    assert_eq!(report.episode.as_ref().unwrap().title, "Daily AI Summary - October 17, 2025");
    assert!(matches!(
        report.audio,
        AudioOutcome::Failed(PipelineError::DeadlineExceeded { .. })
    ));
    assert_eq!(pipeline.completion().service().call_count(), 2);
    assert_eq!(pipeline.synthesis().unwrap().service().call_count(), 0);
}
