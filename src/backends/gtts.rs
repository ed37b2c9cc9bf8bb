//! Google Translate TTS fallback.
//!
//! The endpoint only accepts short inputs, so longer text is split into
//! chunks and the returned MP3 segments are concatenated in order.

use super::{AudioFormat, FallbackSynthesizer, SynthesizedAudio};
use crate::error::SynthesisError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://translate.google.com";
const MAX_CHUNK_CHARS: usize = 100;
const BREAK_CHARS: &[char] = &['、', '。', '，', '．', '！', '？', ',', '.', '!', '?', ';', ':'];

pub struct GttsFallback {
    client: reqwest::Client,
    base_url: String,
    language: String,
    timeout: Duration,
}

impl GttsFallback {
    pub fn new(base_url: impl Into<String>, language: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            language: language.into(),
            timeout,
        }
    }

    async fn fetch_chunk(
        &self,
        chunk: &str,
        index: usize,
        total: usize,
    ) -> Result<Vec<u8>, SynthesisError> {
        let url = format!("{}/translate_tts", self.base_url.trim_end_matches('/'));
        let (idx, total, textlen) = (
            index.to_string(),
            total.to_string(),
            chunk.chars().count().to_string(),
        );
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("ie", "UTF-8"),
                ("q", chunk),
                ("tl", self.language.as_str()),
                ("client", "tw-ob"),
                ("idx", idx.as_str()),
                ("total", total.as_str()),
                ("textlen", textlen.as_str()),
            ])
            .header(reqwest::header::USER_AGENT, "Mozilla/5.0")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SynthesisError::FallbackUnavailable(format!("gtts request: {}", e)))?;

        if !resp.status().is_success() {
            return Err(SynthesisError::FallbackUnavailable(format!(
                "gtts returned HTTP {}",
                resp.status().as_u16()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SynthesisError::FallbackUnavailable(format!("gtts body: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl FallbackSynthesizer for GttsFallback {
    fn id(&self) -> &'static str {
        "gtts"
    }

    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SynthesisError> {
        let chunks = split_chunks(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(SynthesisError::EmptyText);
        }

        let mut bytes = Vec::new();
        for (index, chunk) in chunks.iter().enumerate() {
            bytes.extend(self.fetch_chunk(chunk, index, chunks.len()).await?);
        }
        if bytes.is_empty() {
            return Err(SynthesisError::FallbackUnavailable(
                "gtts returned no audio".to_string(),
            ));
        }

        debug!(chunks = chunks.len(), bytes = bytes.len(), "gtts fallback synthesized");
        Ok(SynthesizedAudio {
            bytes,
            format: AudioFormat::Mp3,
        })
    }
}

/// Split `text` into pieces of at most `max_chars` characters, cutting after
/// the last whitespace or punctuation mark when one is available.
fn split_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;
    let mut last_break: Option<usize> = None;

    for c in text.chars() {
        current.push(c);
        count += 1;
        if c.is_whitespace() || BREAK_CHARS.contains(&c) {
            last_break = Some(current.len());
        }

        if count == max_chars {
            let rest = match last_break.take() {
                Some(at) if at < current.len() => current.split_off(at),
                _ => String::new(),
            };
            push_trimmed(&mut chunks, &current);
            count = rest.chars().count();
            current = rest;
        }
    }
    push_trimmed(&mut chunks, &current);
    chunks
}

fn push_trimmed(chunks: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        chunks.push(piece.to_string());
    }
}
