use super::{AudioFormat, FallbackSynthesizer, SynthesizedAudio};
use crate::error::SynthesisError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

const SYNTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Offline fallback through a local `espeak-ng` binary.
pub struct EspeakFallback {
    binary: String,
    language: String,
}

impl EspeakFallback {
    pub fn new(binary: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            language: language.into(),
        }
    }

    /// Arguments for one synthesis run. The text comes after `--` so chat
    /// content starting with `-` is never parsed as an option.
    fn command_args(language: &str, text: &str) -> Vec<OsString> {
        ["-v", language, "--stdout", "--", text]
            .into_iter()
            .map(OsString::from)
            .collect()
    }

    fn run(binary: &str, language: &str, text: &str) -> Result<Vec<u8>, String> {
        let mut child = Command::new(binary)
            .args(Self::command_args(language, text))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to run {}: {}", binary, e))?;

        // Drain stdout on its own thread so a large WAV can't fill the pipe
        // while we wait on the exit status.
        let mut stdout = child.stdout.take().ok_or("espeak stdout unavailable")?;
        let reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).map(|_| buf)
        });

        match child.wait_timeout(SYNTH_TIMEOUT).map_err(|e| e.to_string())? {
            Some(status) if status.success() => reader
                .join()
                .map_err(|_| "espeak reader panicked".to_string())?
                .map_err(|e| e.to_string()),
            Some(_) => {
                let mut err = String::new();
                if let Some(mut stderr) = child.stderr.take() {
                    let _ = stderr.read_to_string(&mut err);
                }
                Err(format!("espeak error: {}", err.trim()))
            }
            None => {
                let _ = child.kill();
                let _ = child.wait();
                Err(format!("espeak timed out after {}s", SYNTH_TIMEOUT.as_secs()))
            }
        }
    }
}

#[async_trait]
impl FallbackSynthesizer for EspeakFallback {
    fn id(&self) -> &'static str {
        "espeak-ng"
    }

    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SynthesisError> {
        let (binary, language, text) = (self.binary.clone(), self.language.clone(), text.to_string());
        let bytes = tokio::task::spawn_blocking(move || Self::run(&binary, &language, &text))
            .await
            .map_err(|e| SynthesisError::FallbackUnavailable(e.to_string()))?
            .map_err(SynthesisError::FallbackUnavailable)?;

        if bytes.is_empty() {
            return Err(SynthesisError::FallbackUnavailable(
                "espeak produced no audio".to_string(),
            ));
        }
        Ok(SynthesizedAudio {
            bytes,
            format: AudioFormat::Wav,
        })
    }
}
