//! Chat events in, queued utterances out.

use crate::chat::{
    ChatEvent, ChatMessage, CommandInvocation, CommandKind, Destination, Member,
    VoiceStateUpdate,
};
use crate::error::RelayError;
use crate::format::{self, MessageFormatter};
use crate::pipeline::{SynthesisPipeline, SynthesisRequest};
use crate::playback::DestinationRegistry;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const JOINED_REPLY: &str = "読み上げを開始します。";
pub const LEFT_REPLY: &str = "読み上げを終了します。";
pub const CHARS_DISABLED_REPLY: &str = "この機能は無効になっています。";

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub speaker_id: u32,
    pub command_prefix: String,
    pub announce_membership: bool,
    pub leave_when_empty: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            speaker_id: 888753760,
            command_prefix: "!".to_string(),
            announce_membership: true,
            leave_when_empty: true,
        }
    }
}

/// Outcome of handling one chat event.
#[derive(Debug, PartialEq, Eq)]
pub enum EventOutcome {
    /// Nothing to report back to the chat.
    Handled,
    /// A command succeeded; the text goes back to the invoking user.
    Reply(String),
    /// A command was refused; the text goes back to the invoking user.
    Rejected(String),
}

pub struct RelayController {
    pipeline: Arc<SynthesisPipeline>,
    registry: Arc<DestinationRegistry>,
    formatter: MessageFormatter,
    options: RelayOptions,
}

impl RelayController {
    pub fn new(
        pipeline: Arc<SynthesisPipeline>,
        registry: Arc<DestinationRegistry>,
        formatter: MessageFormatter,
        options: RelayOptions,
    ) -> Self {
        Self {
            pipeline,
            registry,
            formatter,
            options,
        }
    }

    pub fn registry(&self) -> &Arc<DestinationRegistry> {
        &self.registry
    }

    pub async fn handle_event(&self, event: ChatEvent) -> EventOutcome {
        match event {
            ChatEvent::Message(message) => {
                self.on_message(&message).await;
                EventOutcome::Handled
            }
            ChatEvent::VoiceState(update) => {
                self.on_voice_state(&update).await;
                EventOutcome::Handled
            }
            ChatEvent::Command(command) => match self.on_command(&command).await {
                Ok(reply) => EventOutcome::Reply(reply),
                Err(e) => EventOutcome::Rejected(e.to_string()),
            },
        }
    }

    pub async fn on_command(&self, command: &CommandInvocation) -> Result<String, RelayError> {
        match command.command {
            CommandKind::Join => self.join(command).await,
            CommandKind::Leave => self.leave(command).await,
            CommandKind::Chars => Ok(CHARS_DISABLED_REPLY.to_string()),
        }
    }

    async fn join(&self, command: &CommandInvocation) -> Result<String, RelayError> {
        let destination = command
            .destination()
            .ok_or(RelayError::NoHealthyDestination)?;
        self.registry.join(destination, command.channel_id).await?;
        info!(destination = %destination, text_channel = %command.channel_id, "Reading started");
        Ok(JOINED_REPLY.to_string())
    }

    async fn leave(&self, command: &CommandInvocation) -> Result<String, RelayError> {
        let destination = command.destination().ok_or(RelayError::NotConnected)?;
        self.registry.leave(destination).await;
        Ok(LEFT_REPLY.to_string())
    }

    /// The destination this message should be read into, if it qualifies.
    pub async fn reading_destination(&self, message: &ChatMessage) -> Option<Destination> {
        if message.author.bot || message.content.starts_with(&self.options.command_prefix) {
            return None;
        }
        let destination = message.destination()?;
        let bound = self.registry.text_channel(destination).await?;
        (bound == message.channel_id).then_some(destination)
    }

    pub async fn on_message(&self, message: &ChatMessage) {
        let Some(destination) = self.reading_destination(message).await else {
            return;
        };
        let text = self.formatter.format(message);
        self.speak(destination, text, Some(message)).await;
    }

    /// One handler for every membership change: announce joins and leaves in
    /// occupied destinations, and leave a destination nobody is left in.
    pub async fn on_voice_state(&self, update: &VoiceStateUpdate) {
        if update.previous_channel == update.new_channel {
            return;
        }

        if let Some(channel) = update.previous_channel {
            let destination = Destination::new(update.guild_id, channel);
            if self.registry.is_occupied(destination).await {
                self.announce(destination, &update.member, format::left_announcement)
                    .await;
                if self.options.leave_when_empty && update.humans_remaining == Some(0) {
                    info!(destination = %destination, "Voice channel empty, leaving");
                    self.registry.leave(destination).await;
                }
            }
        }

        if let Some(channel) = update.new_channel {
            let destination = Destination::new(update.guild_id, channel);
            if self.registry.is_occupied(destination).await {
                self.announce(destination, &update.member, format::joined_announcement)
                    .await;
            }
        }
    }

    async fn announce(
        &self,
        destination: Destination,
        member: &Member,
        phrase: fn(&str) -> String,
    ) {
        if !self.options.announce_membership || member.bot {
            return;
        }
        self.speak(destination, phrase(&member.display_name), None)
            .await;
    }

    /// Synthesize `text` and queue it for `destination`. Failures drop the
    /// utterance.
    pub async fn speak(&self, destination: Destination, text: String, origin: Option<&ChatMessage>) {
        let request = SynthesisRequest {
            text,
            speaker_id: self.options.speaker_id,
            destination,
            origin_message_id: origin.map(|m| m.id),
        };

        let artifact = match self.pipeline.produce_audio(&request).await {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!(destination = %destination, "Speech synthesis failed, dropping utterance: {}", e);
                return;
            }
        };

        debug!(destination = %destination, text = %request.text, "Queueing utterance");
        if let Err(e) = self.registry.enqueue(destination, artifact).await {
            warn!(destination = %destination, "Could not queue utterance: {}", e);
        }
    }
}
