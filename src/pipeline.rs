use crate::artifact::{AudioArtifact, ScratchDir};
use crate::backends::{FallbackSynthesizer, SpeechBackend, SynthesizedAudio};
use crate::chat::{Destination, MessageId};
use crate::error::SynthesisError;
use crate::router::EndpointRouter;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    pub speaker_id: u32,
    pub destination: Destination,
    pub origin_message_id: Option<MessageId>,
}

/// Router + primary backend, falling back to a secondary provider, ending in
/// a file on disk.
///
/// Exactly one endpoint is tried per request. If it fails the fallback gets
/// one attempt; other endpoints are left alone until the next request.
pub struct SynthesisPipeline {
    router: Arc<EndpointRouter>,
    backend: Arc<dyn SpeechBackend>,
    fallback: Option<Arc<dyn FallbackSynthesizer>>,
    scratch: ScratchDir,
}

impl SynthesisPipeline {
    pub fn new(
        router: Arc<EndpointRouter>,
        backend: Arc<dyn SpeechBackend>,
        fallback: Option<Arc<dyn FallbackSynthesizer>>,
        scratch: ScratchDir,
    ) -> Self {
        Self {
            router,
            backend,
            fallback,
            scratch,
        }
    }

    pub fn router(&self) -> &EndpointRouter {
        &self.router
    }

    pub async fn produce_audio(
        &self,
        request: &SynthesisRequest,
    ) -> Result<AudioArtifact, SynthesisError> {
        if request.text.trim().is_empty() {
            return Err(SynthesisError::EmptyText);
        }

        let audio = self.synthesize(&request.text, request.speaker_id).await?;
        let artifact = self
            .scratch
            .store(&audio.bytes, audio.format, request.origin_message_id)
            .await?;

        debug!(
            destination = %request.destination,
            path = %artifact.path().display(),
            "Stored audio artifact"
        );
        Ok(artifact)
    }

    async fn synthesize(
        &self,
        text: &str,
        speaker_id: u32,
    ) -> Result<SynthesizedAudio, SynthesisError> {
        let endpoint = self.router.select_endpoint().await;
        debug!(endpoint = %endpoint.address, backend = self.backend.id(), "Using endpoint");

        let primary = match self
            .backend
            .synthesize(&endpoint.address, text, speaker_id)
            .await
        {
            Ok(audio) => return Ok(audio),
            Err(e) => e,
        };

        let Some(fallback) = &self.fallback else {
            return Err(SynthesisError::SynthesisFailed {
                primary: primary.to_string(),
                fallback: "no fallback configured".to_string(),
            });
        };

        info!(provider = fallback.id(), "Primary synthesis failed ({}), falling back", primary);
        fallback
            .synthesize(text)
            .await
            .map_err(|fallback_err| {
                warn!("Fallback synthesis failed: {}", fallback_err);
                SynthesisError::SynthesisFailed {
                    primary: primary.to_string(),
                    fallback: fallback_err.to_string(),
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::AudioFormat;
    use crate::chat::{ChannelId, GuildId};
    use crate::error::ProbeError;
    use crate::router::HealthProbe;
    use async_trait::async_trait;
    use mockall::mock;
    use tempfile::tempdir;

    struct AlwaysHealthy;

    #[async_trait]
    impl HealthProbe for AlwaysHealthy {
        async fn probe(&self, _address: &str) -> Result<(), ProbeError> {
            Ok(())
        }
    }

    mock! {
        Backend {}
        #[async_trait]
        impl SpeechBackend for Backend {
            fn id(&self) -> &'static str;
            async fn synthesize(
                &self,
                endpoint: &str,
                text: &str,
                speaker_id: u32,
            ) -> Result<SynthesizedAudio, SynthesisError>;
        }
    }

    mock! {
        Fallback {}
        #[async_trait]
        impl FallbackSynthesizer for Fallback {
            fn id(&self) -> &'static str;
            async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SynthesisError>;
        }
    }

    fn request(text: &str) -> SynthesisRequest {
        SynthesisRequest {
            text: text.to_string(),
            speaker_id: 7,
            destination: Destination::new(GuildId(1), ChannelId(2)),
            origin_message_id: Some(MessageId(3)),
        }
    }

    fn wav() -> SynthesizedAudio {
        SynthesizedAudio {
            bytes: b"RIFF".to_vec(),
            format: AudioFormat::Wav,
        }
    }

    fn router() -> Arc<EndpointRouter> {
        Arc::new(EndpointRouter::new(vec!["http://a".into()], AlwaysHealthy).unwrap())
    }

    fn backend_failing() -> MockBackend {
        let mut backend = MockBackend::new();
        backend.expect_id().return_const("voicevox");
        backend.expect_synthesize().times(1).returning(|endpoint, _, _| {
            Err(SynthesisError::BackendUnavailable {
                endpoint: endpoint.to_string(),
                reason: "HTTP 500".into(),
            })
        });
        backend
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let dir = tempdir().unwrap();
        let mut backend = MockBackend::new();
        backend.expect_id().return_const("voicevox");
        backend
            .expect_synthesize()
            .withf(|endpoint, text, speaker| endpoint == "http://a" && text == "hello" && *speaker == 7)
            .times(1)
            .returning(|_, _, _| Ok(wav()));
        let mut fallback = MockFallback::new();
        fallback.expect_synthesize().times(0);

        let pipeline = SynthesisPipeline::new(
            router(),
            Arc::new(backend),
            Some(Arc::new(fallback)),
            ScratchDir::open(dir.path()).unwrap(),
        );

        let artifact = pipeline.produce_audio(&request("hello")).await.unwrap();
        assert!(artifact.exists());
        assert_eq!(artifact.origin_message_id(), Some(MessageId(3)));
    }

    #[tokio::test]
    async fn test_fallback_used_when_primary_fails() {
        let dir = tempdir().unwrap();
        let mut fallback = MockFallback::new();
        fallback.expect_id().return_const("gtts");
        fallback
            .expect_synthesize()
            .withf(|text| text == "hello")
            .times(1)
            .returning(|_| {
                Ok(SynthesizedAudio {
                    bytes: b"ID3".to_vec(),
                    format: AudioFormat::Mp3,
                })
            });

        let pipeline = SynthesisPipeline::new(
            router(),
            Arc::new(backend_failing()),
            Some(Arc::new(fallback)),
            ScratchDir::open(dir.path()).unwrap(),
        );

        let artifact = pipeline.produce_audio(&request("hello")).await.unwrap();
        assert_eq!(artifact.path().extension().unwrap(), "mp3");
    }

    #[tokio::test]
    async fn test_both_failing_creates_no_file() {
        let dir = tempdir().unwrap();
        let mut fallback = MockFallback::new();
        fallback.expect_id().return_const("gtts");
        fallback
            .expect_synthesize()
            .times(1)
            .returning(|_| Err(SynthesisError::FallbackUnavailable("offline".into())));

        let pipeline = SynthesisPipeline::new(
            router(),
            Arc::new(backend_failing()),
            Some(Arc::new(fallback)),
            ScratchDir::open(dir.path()).unwrap(),
        );

        let err = pipeline.produce_audio(&request("hello")).await.unwrap_err();
        assert!(matches!(err, SynthesisError::SynthesisFailed { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_no_fallback_configured() {
        let dir = tempdir().unwrap();
        let pipeline = SynthesisPipeline::new(
            router(),
            Arc::new(backend_failing()),
            None,
            ScratchDir::open(dir.path()).unwrap(),
        );

        let err = pipeline.produce_audio(&request("hello")).await.unwrap_err();
        assert!(matches!(err, SynthesisError::SynthesisFailed { .. }));
    }

    #[tokio::test]
    async fn test_blank_text_is_rejected_before_synthesis() {
        let dir = tempdir().unwrap();
        let mut backend = MockBackend::new();
        backend.expect_synthesize().times(0);

        let pipeline = SynthesisPipeline::new(
            router(),
            Arc::new(backend),
            None,
            ScratchDir::open(dir.path()).unwrap(),
        );

        let err = pipeline.produce_audio(&request("  \n")).await.unwrap_err();
        assert!(matches!(err, SynthesisError::EmptyText));
    }
}
