use crate::chat::Destination;
use crate::error::PlaybackError;
use crate::playback::VoiceSink;
use async_trait::async_trait;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::mpsc::channel;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Voice sink that plays every destination on the local default output
/// device. Useful for running the relay without a chat platform voice
/// connection, and for listening in while developing.
pub struct LocalAudioSink {
    handle: OutputStreamHandle,
    connected: Mutex<HashSet<Destination>>,
}

/// Stops the track if the playing future is dropped half way, e.g. when the
/// destination's consumer is aborted on leave.
struct StopOnDrop(Sink);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.stop();
    }
}

impl LocalAudioSink {
    pub fn new() -> Result<Self, PlaybackError> {
        let (tx, rx) = channel();

        thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                // The output stream is not Send, so it lives on this thread
                // for the rest of the process; only the handle leaves.
                match OutputStream::try_default() {
                    Ok((_stream, handle)) => {
                        let _ = tx.send(Ok(handle));
                        loop {
                            thread::park();
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e.to_string()));
                    }
                }
            })
            .map_err(|e| PlaybackError::Device(e.to_string()))?;

        let handle = rx
            .recv()
            .map_err(|e| PlaybackError::Device(e.to_string()))?
            .map_err(PlaybackError::Device)?;
        info!("Local audio output ready");

        Ok(Self {
            handle,
            connected: Mutex::new(HashSet::new()),
        })
    }

    fn is_connected(&self, destination: Destination) -> bool {
        self.connected
            .lock()
            .map(|set| set.contains(&destination))
            .unwrap_or(false)
    }

    fn start(handle: &OutputStreamHandle, path: &Path) -> Result<Sink, PlaybackError> {
        let file = File::open(path).map_err(|_| PlaybackError::MissingArtifact(path.to_path_buf()))?;
        let source =
            Decoder::new(BufReader::new(file)).map_err(|e| PlaybackError::Decode(e.to_string()))?;
        let sink = Sink::try_new(handle).map_err(|e| PlaybackError::Device(e.to_string()))?;
        sink.append(source);
        Ok(sink)
    }
}

#[async_trait]
impl VoiceSink for LocalAudioSink {
    async fn connect(&self, destination: Destination) -> Result<(), PlaybackError> {
        if let Ok(mut set) = self.connected.lock() {
            set.insert(destination);
        }
        Ok(())
    }

    async fn disconnect(&self, destination: Destination) -> Result<(), PlaybackError> {
        if let Ok(mut set) = self.connected.lock() {
            set.remove(&destination);
        }
        Ok(())
    }

    async fn play(&self, destination: Destination, path: &Path) -> Result<(), PlaybackError> {
        if !self.is_connected(destination) {
            return Err(PlaybackError::NotConnected(destination.to_string()));
        }

        debug!(destination = %destination, path = %path.display(), "Playing");
        let handle = self.handle.clone();
        let owned = path.to_path_buf();
        let sink = tokio::task::spawn_blocking(move || Self::start(&handle, &owned))
            .await
            .map_err(|e| PlaybackError::Device(e.to_string()))??;

        let playing = StopOnDrop(sink);
        while !playing.0.empty() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Ok(())
    }
}
