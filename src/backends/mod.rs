pub mod espeak;
pub mod gtts;
pub mod voicevox;

use crate::error::SynthesisError;
use async_trait::async_trait;

/// Container format of a synthesized payload; decides the artifact's file
/// extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
}

/// Primary synthesis backend. Talks to exactly one endpoint per call and never
/// retries; choosing the endpoint is the router's job.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Returns the unique ID of the backend (e.g., "voicevox")
    fn id(&self) -> &'static str;

    async fn synthesize(
        &self,
        endpoint: &str,
        text: &str,
        speaker_id: u32,
    ) -> Result<SynthesizedAudio, SynthesisError>;
}

/// Secondary provider used when the primary backend could not produce audio.
/// A failure here is terminal for the utterance.
#[async_trait]
pub trait FallbackSynthesizer: Send + Sync {
    fn id(&self) -> &'static str;

    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SynthesisError>;
}

/// Build the fallback provider the settings ask for, if any.
pub fn fallback_from_settings(
    settings: &crate::config_loader::Settings,
) -> Option<std::sync::Arc<dyn FallbackSynthesizer>> {
    use crate::config_loader::FallbackProvider;

    match settings.fallback_provider {
        FallbackProvider::Gtts => Some(std::sync::Arc::new(gtts::GttsFallback::new(
            settings.gtts_base_url.clone(),
            settings.fallback_language.clone(),
            settings.request_timeout(),
        ))),
        FallbackProvider::Espeak => Some(std::sync::Arc::new(espeak::EspeakFallback::new(
            settings.espeak_binary.clone(),
            settings.fallback_language.clone(),
        ))),
        FallbackProvider::None => None,
    }
}
