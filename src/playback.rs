//! Ordered playback per voice destination.
//!
//! Every destination the relay occupies has one [`PlaybackQueue`]. Artifacts
//! are played strictly in enqueue order by a single consumer task which is
//! started on demand and exits once the queue runs dry. The
//! [`DestinationRegistry`] creates queues on join and tears them down on
//! leave.

use crate::artifact::AudioArtifact;
use crate::chat::{ChannelId, Destination};
use crate::error::{PlaybackError, RelayError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Where audio ends up: a voice connection per destination.
#[async_trait]
pub trait VoiceSink: Send + Sync {
    async fn connect(&self, destination: Destination) -> Result<(), PlaybackError>;

    async fn disconnect(&self, destination: Destination) -> Result<(), PlaybackError>;

    /// Play the file and resolve once playback has finished.
    async fn play(&self, destination: Destination, path: &Path) -> Result<(), PlaybackError>;
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<AudioArtifact>,
    draining: bool,
    closed: bool,
    consumer: Option<JoinHandle<()>>,
}

pub struct PlaybackQueue {
    destination: Destination,
    sink: Arc<dyn VoiceSink>,
    state: Mutex<QueueState>,
    consumer_starts: AtomicUsize,
}

impl PlaybackQueue {
    pub fn new(destination: Destination, sink: Arc<dyn VoiceSink>) -> Arc<Self> {
        Arc::new(Self {
            destination,
            sink,
            state: Mutex::new(QueueState::default()),
            consumer_starts: AtomicUsize::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn destination(&self) -> Destination {
        self.destination
    }

    /// Number of artifacts waiting (not counting the one playing).
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    pub fn is_draining(&self) -> bool {
        self.lock().draining
    }

    /// How many consumer tasks this queue has started over its lifetime.
    pub fn consumer_starts(&self) -> usize {
        self.consumer_starts.load(Ordering::SeqCst)
    }

    /// Append an artifact; starts the consumer if the queue was idle.
    ///
    /// On a closed queue the artifact's file is deleted and
    /// `QueueClosed` returned.
    pub fn enqueue(self: &Arc<Self>, artifact: AudioArtifact) -> Result<(), PlaybackError> {
        let mut state = self.lock();
        if state.closed {
            drop(state);
            if let Err(e) = artifact.remove() {
                warn!("Failed to remove artifact for closed queue: {}", e);
            }
            return Err(PlaybackError::QueueClosed(self.destination.to_string()));
        }

        debug!(destination = %self.destination, path = %artifact.path().display(), "Adding to queue");
        state.pending.push_back(artifact);

        if !state.draining {
            state.draining = true;
            self.consumer_starts.fetch_add(1, Ordering::SeqCst);
            let queue = Arc::clone(self);
            state.consumer = Some(tokio::spawn(async move { queue.drain().await }));
        }
        Ok(())
    }

    async fn drain(self: Arc<Self>) {
        debug!(destination = %self.destination, "Starting queue processing");
        loop {
            let next = {
                let mut state = self.lock();
                if state.closed {
                    return;
                }
                match state.pending.pop_front() {
                    Some(artifact) => artifact,
                    None => {
                        state.draining = false;
                        state.consumer = None;
                        debug!(destination = %self.destination, "Queue drained");
                        return;
                    }
                }
            };
            self.play_one(next).await;
        }
    }

    async fn play_one(&self, artifact: AudioArtifact) {
        if !artifact.exists() {
            warn!(
                destination = %self.destination,
                "{}",
                PlaybackError::MissingArtifact(artifact.path().to_path_buf())
            );
            artifact.forget();
            return;
        }

        if let Err(e) = self.sink.play(self.destination, artifact.path()).await {
            warn!(destination = %self.destination, path = %artifact.path().display(), "Playback error: {}", e);
        }
        if let Err(e) = artifact.remove() {
            error!(destination = %self.destination, "Failed to remove played artifact: {}", e);
        }
    }

    /// Stop the consumer and delete everything still queued. Idempotent.
    pub async fn close(&self) {
        let (pending, consumer) = {
            let mut state = self.lock();
            state.closed = true;
            state.draining = false;
            (std::mem::take(&mut state.pending), state.consumer.take())
        };

        if let Some(handle) = consumer {
            handle.abort();
            // Wait for the aborted task to release whatever it was playing.
            let _ = handle.await;
        }

        let discarded = pending.len();
        for artifact in pending {
            if let Err(e) = artifact.remove() {
                warn!("Failed to remove queued artifact: {}", e);
            }
        }
        if discarded > 0 {
            info!(destination = %self.destination, discarded, "Discarded queued utterances");
        }
    }
}

struct DestinationEntry {
    text_channel: ChannelId,
    queue: Arc<PlaybackQueue>,
}

/// The destinations the relay currently occupies, each with the text channel
/// bound at join time and its playback queue.
///
/// The entry map is never locked across a sink call; a destination whose
/// connect is still in flight is tracked in `connecting` instead.
pub struct DestinationRegistry {
    sink: Arc<dyn VoiceSink>,
    entries: tokio::sync::Mutex<HashMap<Destination, DestinationEntry>>,
    connecting: Arc<Mutex<HashSet<Destination>>>,
}

/// Clears the in-flight marker however the join ends.
struct ConnectingGuard {
    set: Arc<Mutex<HashSet<Destination>>>,
    destination: Destination,
}

impl Drop for ConnectingGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.destination);
    }
}

impl DestinationRegistry {
    pub fn new(sink: Arc<dyn VoiceSink>) -> Self {
        Self {
            sink,
            entries: tokio::sync::Mutex::new(HashMap::new()),
            connecting: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Connect the sink and start tracking `destination`, reading from
    /// `text_channel`. A second join for the same destination, while the
    /// first is connected or still connecting, is refused.
    pub async fn join(
        &self,
        destination: Destination,
        text_channel: ChannelId,
    ) -> Result<(), RelayError> {
        let _guard = {
            let entries = self.entries.lock().await;
            let mut connecting = self
                .connecting
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if entries.contains_key(&destination) || !connecting.insert(destination) {
                return Err(RelayError::AlreadyConnected);
            }
            ConnectingGuard {
                set: Arc::clone(&self.connecting),
                destination,
            }
        };

        info!(destination = %destination, "Connecting to voice channel");
        self.sink
            .connect(destination)
            .await
            .map_err(RelayError::Connect)?;

        self.entries.lock().await.insert(
            destination,
            DestinationEntry {
                text_channel,
                queue: PlaybackQueue::new(destination, Arc::clone(&self.sink)),
            },
        );
        Ok(())
    }

    /// Tear down `destination`: stop its consumer, delete its queued files and
    /// disconnect. Returns false if it was not occupied.
    pub async fn leave(&self, destination: Destination) -> bool {
        let entry = self.entries.lock().await.remove(&destination);
        let Some(entry) = entry else {
            return false;
        };

        entry.queue.close().await;
        if let Err(e) = self.sink.disconnect(destination).await {
            warn!(destination = %destination, "Disconnect failed: {}", e);
        }
        info!(destination = %destination, "Left voice channel");
        true
    }

    pub async fn leave_all(&self) {
        let destinations = self.destinations().await;
        futures_util::future::join_all(destinations.into_iter().map(|d| self.leave(d))).await;
    }

    pub async fn is_occupied(&self, destination: Destination) -> bool {
        self.entries.lock().await.contains_key(&destination)
    }

    pub async fn text_channel(&self, destination: Destination) -> Option<ChannelId> {
        self.entries
            .lock()
            .await
            .get(&destination)
            .map(|entry| entry.text_channel)
    }

    pub async fn queue(&self, destination: Destination) -> Option<Arc<PlaybackQueue>> {
        self.entries
            .lock()
            .await
            .get(&destination)
            .map(|entry| Arc::clone(&entry.queue))
    }

    pub async fn destinations(&self) -> Vec<Destination> {
        self.entries.lock().await.keys().copied().collect()
    }

    /// Hand an artifact to the destination's queue. If the destination is
    /// gone the artifact is deleted.
    pub async fn enqueue(
        &self,
        destination: Destination,
        artifact: AudioArtifact,
    ) -> Result<(), PlaybackError> {
        match self.queue(destination).await {
            Some(queue) => queue.enqueue(artifact),
            None => {
                if let Err(e) = artifact.remove() {
                    warn!("Failed to remove orphaned artifact: {}", e);
                }
                Err(PlaybackError::NotConnected(destination.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::GuildId;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    /// Sink that records played paths; each play waits for a permit so tests
    /// can hold the consumer mid-playback.
    struct GatedSink {
        played: Mutex<Vec<PathBuf>>,
        gate: Semaphore,
        fail: bool,
    }

    impl GatedSink {
        fn open() -> Arc<Self> {
            Self::build(Semaphore::MAX_PERMITS, false)
        }

        fn gated() -> Arc<Self> {
            Self::build(0, false)
        }

        fn failing() -> Arc<Self> {
            Self::build(Semaphore::MAX_PERMITS, true)
        }

        fn build(permits: usize, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                played: Mutex::new(Vec::new()),
                gate: Semaphore::new(permits),
                fail,
            })
        }

        fn played(&self) -> Vec<PathBuf> {
            self.played.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VoiceSink for GatedSink {
        async fn connect(&self, _destination: Destination) -> Result<(), PlaybackError> {
            Ok(())
        }

        async fn disconnect(&self, _destination: Destination) -> Result<(), PlaybackError> {
            Ok(())
        }

        async fn play(&self, _destination: Destination, path: &Path) -> Result<(), PlaybackError> {
            self.played.lock().unwrap().push(path.to_path_buf());
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| PlaybackError::Device(e.to_string()))?;
            permit.forget();
            if self.fail {
                return Err(PlaybackError::Device("device lost".into()));
            }
            Ok(())
        }
    }

    fn destination() -> Destination {
        Destination::new(GuildId(1), ChannelId(2))
    }

    fn artifact(dir: &TempDir, name: &str) -> AudioArtifact {
        let path = dir.path().join(name);
        std::fs::write(&path, b"RIFF").unwrap();
        AudioArtifact::new(path, None)
    }

    async fn wait_until_idle(queue: &PlaybackQueue) {
        for _ in 0..200 {
            if !queue.is_draining() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue never went idle");
    }

    #[tokio::test]
    async fn test_plays_in_fifo_order_and_deletes() {
        let dir = TempDir::new().unwrap();
        let sink = GatedSink::open();
        let queue = PlaybackQueue::new(destination(), sink.clone());

        let names = ["a.wav", "b.wav", "c.wav"];
        for name in names {
            queue.enqueue(artifact(&dir, name)).unwrap();
        }
        wait_until_idle(&queue).await;

        let expected: Vec<PathBuf> = names.iter().map(|n| dir.path().join(n)).collect();
        assert_eq!(sink.played(), expected);
        assert!(expected.iter().all(|p| !p.exists()));
        assert_eq!(queue.consumer_starts(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_while_draining_does_not_start_second_consumer() {
        let dir = TempDir::new().unwrap();
        let sink = GatedSink::gated();
        let queue = PlaybackQueue::new(destination(), sink.clone());

        queue.enqueue(artifact(&dir, "0.wav")).unwrap();
        for i in 1..5 {
            queue.enqueue(artifact(&dir, &format!("{}.wav", i))).unwrap();
            assert!(queue.is_draining());
        }
        assert_eq!(queue.consumer_starts(), 1);

        sink.gate.add_permits(5);
        wait_until_idle(&queue).await;
        assert_eq!(sink.played().len(), 5);
        assert_eq!(queue.consumer_starts(), 1);

        // A fresh enqueue after going idle starts a new consumer.
        queue.enqueue(artifact(&dir, "late.wav")).unwrap();
        assert_eq!(queue.consumer_starts(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let sink = GatedSink::open();
        let queue = PlaybackQueue::new(destination(), sink.clone());

        let gone = artifact(&dir, "gone.wav");
        std::fs::remove_file(gone.path()).unwrap();
        queue.enqueue(gone).unwrap();
        queue.enqueue(artifact(&dir, "ok.wav")).unwrap();
        wait_until_idle(&queue).await;

        assert_eq!(sink.played(), vec![dir.path().join("ok.wav")]);
    }

    #[tokio::test]
    async fn test_playback_error_deletes_and_continues() {
        let dir = TempDir::new().unwrap();
        let sink = GatedSink::failing();
        let queue = PlaybackQueue::new(destination(), sink.clone());

        queue.enqueue(artifact(&dir, "x.wav")).unwrap();
        queue.enqueue(artifact(&dir, "y.wav")).unwrap();
        wait_until_idle(&queue).await;

        assert_eq!(sink.played().len(), 2);
        assert!(!dir.path().join("x.wav").exists());
        assert!(!dir.path().join("y.wav").exists());
    }

    #[tokio::test]
    async fn test_close_discards_pending_and_stops() {
        let dir = TempDir::new().unwrap();
        let sink = GatedSink::gated();
        let queue = PlaybackQueue::new(destination(), sink.clone());

        queue.enqueue(artifact(&dir, "playing.wav")).unwrap();
        queue.enqueue(artifact(&dir, "q1.wav")).unwrap();
        queue.enqueue(artifact(&dir, "q2.wav")).unwrap();
        // Let the consumer pick up the first item and block in play.
        while sink.played().is_empty() {
            tokio::task::yield_now().await;
        }

        queue.close().await;
        sink.gate.add_permits(10);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sink.played(), vec![dir.path().join("playing.wav")]);
        for name in ["playing.wav", "q1.wav", "q2.wav"] {
            assert!(!dir.path().join(name).exists(), "{} left behind", name);
        }
        assert!(!queue.is_draining());

        let late = artifact(&dir, "late.wav");
        let late_path = late.path().to_path_buf();
        assert!(matches!(queue.enqueue(late), Err(PlaybackError::QueueClosed(_))));
        assert!(!late_path.exists());
    }

    #[tokio::test]
    async fn test_registry_join_leave() {
        let dir = TempDir::new().unwrap();
        let registry = DestinationRegistry::new(GatedSink::gated());
        let dest = destination();

        registry.join(dest, ChannelId(10)).await.unwrap();
        assert!(matches!(
            registry.join(dest, ChannelId(10)).await,
            Err(RelayError::AlreadyConnected)
        ));
        assert_eq!(registry.text_channel(dest).await, Some(ChannelId(10)));

        registry.enqueue(dest, artifact(&dir, "1.wav")).await.unwrap();
        registry.enqueue(dest, artifact(&dir, "2.wav")).await.unwrap();

        assert!(registry.leave(dest).await);
        assert!(!registry.is_occupied(dest).await);
        assert!(!dir.path().join("1.wav").exists());
        assert!(!dir.path().join("2.wav").exists());
        assert!(!registry.leave(dest).await);

        let orphan = artifact(&dir, "3.wav");
        assert!(matches!(
            registry.enqueue(dest, orphan).await,
            Err(PlaybackError::NotConnected(_))
        ));
        assert!(!dir.path().join("3.wav").exists());
    }

    /// Sink whose connect to one destination hangs until released.
    struct SlowConnectSink {
        slow: Destination,
        started: Semaphore,
        release: Semaphore,
    }

    #[async_trait]
    impl VoiceSink for SlowConnectSink {
        async fn connect(&self, destination: Destination) -> Result<(), PlaybackError> {
            if destination == self.slow {
                self.started.add_permits(1);
                let permit = self
                    .release
                    .acquire()
                    .await
                    .map_err(|e| PlaybackError::Device(e.to_string()))?;
                permit.forget();
            }
            Ok(())
        }

        async fn disconnect(&self, _destination: Destination) -> Result<(), PlaybackError> {
            Ok(())
        }

        async fn play(&self, _destination: Destination, _path: &Path) -> Result<(), PlaybackError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_slow_connect_does_not_block_other_destinations() {
        let slow = destination();
        let other = Destination::new(GuildId(1), ChannelId(3));
        let sink = Arc::new(SlowConnectSink {
            slow,
            started: Semaphore::new(0),
            release: Semaphore::new(0),
        });
        let registry = Arc::new(DestinationRegistry::new(sink.clone()));

        let joining = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.join(slow, ChannelId(10)).await })
        };
        sink.started.acquire().await.unwrap().forget();

        tokio::time::timeout(Duration::from_millis(500), async {
            assert!(!registry.is_occupied(slow).await);
            assert!(matches!(
                registry.join(slow, ChannelId(10)).await,
                Err(RelayError::AlreadyConnected)
            ));
            registry.join(other, ChannelId(11)).await.unwrap();
            assert!(registry.is_occupied(other).await);
        })
        .await
        .expect("registry stayed locked during a pending connect");

        sink.release.add_permits(1);
        joining.await.unwrap().unwrap();
        assert!(registry.is_occupied(slow).await);
        assert_eq!(registry.text_channel(slow).await, Some(ChannelId(10)));
    }
}
