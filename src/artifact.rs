//! Temporary audio files and the scratch directory they live in.
//!
//! An [`AudioArtifact`] owns its file. The file is deleted exactly once:
//! either explicitly through [`AudioArtifact::remove`], or when an artifact
//! that was never removed is dropped (a failed enqueue, an aborted consumer,
//! a queue torn down on leave).

use crate::backends::AudioFormat;
use crate::chat::MessageId;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Every artifact file is named `speech-relay-tts_<id>_<seq>.<wav|mp3>`; only
/// files matching that shape are swept at startup.
const FILE_PREFIX: &str = "speech-relay-tts_";

#[derive(Debug)]
pub struct AudioArtifact {
    path: PathBuf,
    origin_message_id: Option<MessageId>,
    released: bool,
}

impl AudioArtifact {
    /// Take ownership of an audio file that already exists on disk.
    pub fn new(path: PathBuf, origin_message_id: Option<MessageId>) -> Self {
        Self {
            path,
            origin_message_id,
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn origin_message_id(&self) -> Option<MessageId> {
        self.origin_message_id
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Delete the backing file.
    pub fn remove(mut self) -> io::Result<()> {
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Removed audio artifact");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Give up ownership without touching the file, for artifacts whose file
    /// is already gone.
    pub fn forget(mut self) {
        self.released = true;
    }
}

impl Drop for AudioArtifact {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), "Failed to clean up audio artifact: {}", e);
            }
        }
    }
}

/// Directory holding one file per pending utterance.
pub struct ScratchDir {
    root: PathBuf,
    seq: AtomicU64,
}

impl ScratchDir {
    /// Create the directory if needed and sweep files left behind by a
    /// previous run.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        for entry in std::fs::read_dir(&root)?.flatten() {
            let path = entry.path();
            let stale = is_artifact_name(&path);
            if stale && path.is_file() {
                debug!(path = %path.display(), "Removing stale artifact");
                let _ = std::fs::remove_file(&path);
            }
        }

        Ok(Self {
            root,
            seq: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A path no other artifact of this process uses.
    pub fn fresh_path(&self, origin: Option<MessageId>, format: AudioFormat) -> PathBuf {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let stem = match origin {
            Some(id) => format!("{}{}_{}", FILE_PREFIX, id, seq),
            None => {
                let now = chrono::Utc::now();
                let stamp = now
                    .timestamp_nanos_opt()
                    .unwrap_or_else(|| now.timestamp_micros() * 1000);
                format!("{}{}_{}", FILE_PREFIX, stamp, seq)
            }
        };
        self.root.join(format!("{}.{}", stem, format.extension()))
    }

    /// Write `bytes` to a fresh file and hand back the owning artifact. A
    /// partially written file is removed on failure.
    pub async fn store(
        &self,
        bytes: &[u8],
        format: AudioFormat,
        origin: Option<MessageId>,
    ) -> io::Result<AudioArtifact> {
        let path = self.fresh_path(origin, format);
        if let Err(e) = tokio::fs::write(&path, bytes).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }
        Ok(AudioArtifact::new(path, origin))
    }
}

fn is_artifact_name(path: &Path) -> bool {
    let named = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(FILE_PREFIX))
        .unwrap_or(false);
    let audio = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e == AudioFormat::Wav.extension() || e == AudioFormat::Mp3.extension())
        .unwrap_or(false);
    named && audio
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_store_and_remove() {
        let dir = tempdir().unwrap();
        let scratch = ScratchDir::open(dir.path()).unwrap();

        let artifact = scratch
            .store(b"RIFF", AudioFormat::Wav, Some(MessageId(99)))
            .await
            .unwrap();
        let path = artifact.path().to_path_buf();
        assert!(path.exists());
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("speech-relay-tts_99_"));
        assert_eq!(path.extension().unwrap(), "wav");

        artifact.remove().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_drop_deletes_unreleased_file() {
        let dir = tempdir().unwrap();
        let scratch = ScratchDir::open(dir.path()).unwrap();

        let artifact = scratch.store(b"ID3", AudioFormat::Mp3, None).await.unwrap();
        let path = artifact.path().to_path_buf();
        drop(artifact);
        assert!(!path.exists());
    }

    #[test]
    fn test_forget_leaves_file_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keep.wav");
        std::fs::write(&path, b"RIFF").unwrap();

        AudioArtifact::new(path.clone(), None).forget();
        assert!(path.exists());
    }

    #[test]
    fn test_fresh_paths_do_not_collide() {
        let dir = tempdir().unwrap();
        let scratch = ScratchDir::open(dir.path()).unwrap();
        let a = scratch.fresh_path(None, AudioFormat::Wav);
        let b = scratch.fresh_path(None, AudioFormat::Wav);
        assert_ne!(a, b);
    }

    #[test]
    fn test_open_sweeps_stale_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("speech-relay-tts_1_0.wav"), b"old").unwrap();
        std::fs::write(dir.path().join("speech-relay-tts_2_0.mp3"), b"old").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

        ScratchDir::open(dir.path()).unwrap();
        assert!(!dir.path().join("speech-relay-tts_1_0.wav").exists());
        assert!(!dir.path().join("speech-relay-tts_2_0.mp3").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_open_leaves_foreign_temp_files_alone() {
        let dir = tempdir().unwrap();
        let foreign = [
            "temp_1_0.wav",
            "temp_session.lock",
            "speech-relay-tts_notes.txt",
        ];
        for name in foreign {
            std::fs::write(dir.path().join(name), b"theirs").unwrap();
        }

        ScratchDir::open(dir.path()).unwrap();
        for name in foreign {
            assert!(dir.path().join(name).exists(), "{} was swept", name);
        }
    }
}
