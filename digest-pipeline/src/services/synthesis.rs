use super::{classify_status, classify_transport, parse_retry_after};
use crate::client::RemoteService;
use crate::types::{Result, ServiceFailure, SynthesisRequest, SynthesisResponse};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

/// Wrap a prepared segment in the SSML envelope sent to the speech engine.
/// Boundary whitespace of the segment is not sent.
pub fn wrap_ssml(segment: &str, rate: &str) -> String {
    format!("<speak><prosody rate='{}'>{}</prosody></speak>", rate, segment.trim())
}

/// Speech-synthesis service over a JSON-in, audio-bytes-out HTTP endpoint.
pub struct HttpSpeechService {
    client: Client,
    api_url: String,
    api_key: Option<String>,
}

impl HttpSpeechService {
    pub fn new(api_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key,
        })
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: String,
    text_type: &'a str,
    response_format: &'a str,
}

#[async_trait]
impl RemoteService for HttpSpeechService {
    type Request = SynthesisRequest;
    type Response = SynthesisResponse;

    fn service_name(&self) -> &str {
        "synthesis"
    }

    async fn invoke(&self, request: &SynthesisRequest) -> std::result::Result<SynthesisResponse, ServiceFailure> {
        let voice = &request.voice;
        let body = SpeechRequest {
            model: &voice.model,
            voice: &voice.voice,
            input: wrap_ssml(&request.text_segment, &voice.rate),
            text_type: "ssml",
            response_format: &voice.output_format,
        };

        let mut builder = self.client.post(&self.api_url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &text));
        }

        let audio_bytes = response.bytes().await.map_err(|e| classify_transport(&e))?;
        if audio_bytes.is_empty() {
            return Err(ServiceFailure::transient("speech service returned no audio"));
        }
        debug!(
            "Synthesized {} chars into {} bytes",
            request.text_segment.len(),
            audio_bytes.len()
        );
        Ok(SynthesisResponse { audio_bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssml_envelope_carries_the_rate() {
        assert_eq!(
            wrap_ssml("Hello. <break time=\"0.5s\"/> ", "95%"),
            "<speak><prosody rate='95%'>Hello. <break time=\"0.5s\"/></prosody></speak>"
        );
    }
}
