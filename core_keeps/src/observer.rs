//! Outbound observer feed.
//!
//! State changes never write to sockets directly; they queue messages
//! here and the publish system flushes the queue into one hashed frame
//! per tick. The session layer decides which connection each message
//! actually reaches, using the scope carried on the message.

use std::collections::VecDeque;

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};

use keep_schema::{hash_frame_bytes, FeedHeader, KeepState, Realm, SectionState};

use crate::config::FrontierConfig;
use crate::guild::{GuildDirectory, GuildId};
use crate::keep::{KeepId, KeepRegistry};
use crate::region::{Observer, ObserverId, RegionAtlas, RegionId};

/// Delivery scope for a text broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastScope {
    Realm(Realm),
    Guild(GuildId),
    Region(RegionId),
}

/// One message queued for observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedMessage {
    /// Keep summary. `observer: None` addresses everyone in the keep's
    /// region, otherwise just the named session.
    KeepInfo {
        observer: Option<ObserverId>,
        state: KeepState,
    },
    /// Section summary for a newly arrived observer.
    SectionInfo {
        observer: Option<ObserverId>,
        state: SectionState,
    },
    /// Region-wide delta after a section changed.
    SectionDetail { state: SectionState },
    /// Full section resync after a capture reset.
    SectionResync {
        keep: KeepId,
        sections: Vec<SectionState>,
    },
    KeepRemoved { keep: KeepId },
    Broadcast { scope: BroadcastScope, text: String },
    /// Clamp an observer back onto solid geometry.
    Reposition {
        observer: ObserverId,
        x: i32,
        y: i32,
        z: i32,
        heading: u16,
    },
}

/// Queue of messages accumulated during the current tick.
#[derive(Resource, Debug, Default)]
pub struct ObserverFeed {
    queue: VecDeque<FeedMessage>,
    published: u64,
}

impl ObserverFeed {
    pub fn push(&mut self, message: FeedMessage) {
        self.queue.push_back(message);
    }

    pub fn drain(&mut self) -> Vec<FeedMessage> {
        let messages: Vec<FeedMessage> = self.queue.drain(..).collect();
        self.published += messages.len() as u64;
        messages
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Messages drained over the lifetime of the queue.
    pub fn published_total(&self) -> u64 {
        self.published
    }
}

/// Frame shipped to feed subscribers. The header hash covers the encoded
/// message list so receivers and test harnesses can verify integrity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedFrame {
    pub header: FeedHeader,
    pub messages: Vec<FeedMessage>,
}

pub fn encode_feed_frame(now_ms: u64, messages: Vec<FeedMessage>) -> bincode::Result<Vec<u8>> {
    let body = bincode::serialize(&messages)?;
    let frame = FeedFrame {
        header: FeedHeader {
            now_ms,
            message_count: messages.len() as u32,
            hash: hash_frame_bytes(&body),
        },
        messages,
    };
    bincode::serialize(&frame)
}

pub fn decode_feed_frame(data: &[u8]) -> bincode::Result<FeedFrame> {
    bincode::deserialize(data)
}

/// Latest encoded frame plus publish counters, read by the fanout
/// server after each tick.
#[derive(Resource, Debug, Default)]
pub struct FeedHistory {
    pub latest_frame: Option<Vec<u8>>,
    pub frames_published: u64,
}

/// Initial sync for an observer that just entered a region: one keep
/// summary plus one section summary per part, for every keep there.
/// Only regions registered as frontier get the listing; arrivals in
/// core or unknown regions queue nothing.
pub fn observer_entered_region(
    registry: &KeepRegistry,
    atlas: &RegionAtlas,
    guilds: &GuildDirectory,
    config: &FrontierConfig,
    feed: &mut ObserverFeed,
    now_ms: u64,
    observer: &Observer,
) {
    if !atlas
        .region(observer.region)
        .is_some_and(|info| info.frontier)
    {
        return;
    }
    for keep in registry.iter().filter(|k| k.region() == observer.region) {
        let guild_name = keep.guild.and_then(|g| guilds.name_of(g));
        feed.push(FeedMessage::KeepInfo {
            observer: Some(observer.id),
            state: keep.state(now_ms, config.combat_window_ms, guild_name),
        });
        for section in &keep.sections {
            feed.push(FeedMessage::SectionInfo {
                observer: Some(observer.id),
                state: section.state(keep.id.0),
            });
        }
    }
}
