//! Chat platform data as the relay sees it.
//!
//! The platform itself (gateway connection, slash-command registration) lives
//! outside this crate; whatever drives the relay translates its events into
//! these types. They are serde-friendly so they can travel over the line
//! gateway as JSON.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! snowflake {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

snowflake!(GuildId);
snowflake!(ChannelId);
snowflake!(UserId);
snowflake!(MessageId);

/// A voice channel the relay can occupy. Playback is ordered per destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub guild: GuildId,
    pub channel: ChannelId,
}

impl Destination {
    pub fn new(guild: GuildId, channel: ChannelId) -> Self {
        Self { guild, channel }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.guild, self.channel)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub bot: bool,
    /// Voice channel the member is connected to right now, if any.
    #[serde(default)]
    pub voice_channel: Option<ChannelId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub author: Member,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub mentions: Vec<UserId>,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
}

impl ChatMessage {
    /// Where this message would be read aloud: the author's current voice
    /// channel in the message's guild.
    pub fn destination(&self) -> Option<Destination> {
        self.author
            .voice_channel
            .map(|channel| Destination::new(self.guild_id, channel))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceStateUpdate {
    pub guild_id: GuildId,
    pub member: Member,
    #[serde(default)]
    pub previous_channel: Option<ChannelId>,
    #[serde(default)]
    pub new_channel: Option<ChannelId>,
    /// Non-bot members still connected to `previous_channel` after the change.
    /// Unknown when the event source does not report it.
    #[serde(default)]
    pub humans_remaining: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Join,
    Leave,
    Chars,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandInvocation {
    pub command: CommandKind,
    pub guild_id: GuildId,
    /// Text channel the command was typed in; becomes the read channel on join.
    pub channel_id: ChannelId,
    pub user: Member,
}

impl CommandInvocation {
    pub fn destination(&self) -> Option<Destination> {
        self.user
            .voice_channel
            .map(|channel| Destination::new(self.guild_id, channel))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Message(ChatMessage),
    VoiceState(VoiceStateUpdate),
    Command(CommandInvocation),
}
