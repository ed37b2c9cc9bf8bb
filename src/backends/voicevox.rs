//! Client for VOICEVOX-compatible engines (AivisSpeech, VOICEVOX, COEIROINK).
//!
//! Synthesis is two requests against the same endpoint: `audio_query` turns
//! text into a prosody description, `synthesis` renders that description to
//! WAV. The query JSON is passed through byte for byte; it is only checked
//! to be well-formed.

use super::{AudioFormat, SpeechBackend, SynthesizedAudio};
use crate::error::SynthesisError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct VoicevoxBackend {
    client: reqwest::Client,
    timeout: Duration,
}

impl VoicevoxBackend {
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), timeout)
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn audio_query(
        &self,
        endpoint: &str,
        text: &str,
        speaker_id: u32,
    ) -> Result<Vec<u8>, SynthesisError> {
        let url = format!("{}/audio_query", endpoint.trim_end_matches('/'));
        let speaker = speaker_id.to_string();
        let resp = self
            .client
            .post(&url)
            .query(&[("text", text), ("speaker", speaker.as_str())])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| unavailable(endpoint, format!("audio_query: {}", e)))?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(unavailable(
                endpoint,
                format!("audio_query returned HTTP {}", resp.status().as_u16()),
            ));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| unavailable(endpoint, format!("audio_query body: {}", e)))?;
        serde_json::from_slice::<serde::de::IgnoredAny>(&body)
            .map_err(|e| unavailable(endpoint, format!("audio_query body is not JSON: {}", e)))?;
        Ok(body.to_vec())
    }

    async fn render(
        &self,
        endpoint: &str,
        query: &[u8],
        speaker_id: u32,
    ) -> Result<Vec<u8>, SynthesisError> {
        let url = format!("{}/synthesis", endpoint.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .query(&[("speaker", speaker_id)])
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(query.to_vec())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| unavailable(endpoint, format!("synthesis: {}", e)))?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(unavailable(
                endpoint,
                format!("synthesis returned HTTP {}", resp.status().as_u16()),
            ));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| unavailable(endpoint, format!("synthesis body: {}", e)))?;
        if bytes.is_empty() {
            return Err(unavailable(endpoint, "synthesis returned no audio".to_string()));
        }
        Ok(bytes.to_vec())
    }
}

fn unavailable(endpoint: &str, reason: String) -> SynthesisError {
    SynthesisError::BackendUnavailable {
        endpoint: endpoint.to_string(),
        reason,
    }
}

#[async_trait]
impl SpeechBackend for VoicevoxBackend {
    fn id(&self) -> &'static str {
        "voicevox"
    }

    async fn synthesize(
        &self,
        endpoint: &str,
        text: &str,
        speaker_id: u32,
    ) -> Result<SynthesizedAudio, SynthesisError> {
        let query = self.audio_query(endpoint, text, speaker_id).await?;
        let bytes = self.render(endpoint, &query, speaker_id).await?;
        debug!(endpoint, bytes = bytes.len(), "Synthesized utterance");
        Ok(SynthesizedAudio {
            bytes,
            format: AudioFormat::Wav,
        })
    }
}
