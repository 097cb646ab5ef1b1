//! Fan-out of announcements to individual channels.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::core::ChannelOutcome;
use crate::errors::AdapterError;
use crate::stages::ports::{Announcement, ChannelAnnouncer};

/// A single place an announcement can be posted.
#[async_trait]
pub trait AnnouncementChannel: Send + Sync {
    /// Stable channel name, used for per-channel idempotency.
    fn name(&self) -> &str;

    /// Posts `message`, returning a reference to the post when the channel has one.
    async fn post(&self, message: &str) -> Result<Option<String>, AdapterError>;
}

/// Posts to each channel in turn, pausing between posts.
///
/// Channels listed in the announcement's skip set are not contacted. One
/// channel failing never stops the others.
pub struct ChannelBroadcaster {
    channels: Vec<Arc<dyn AnnouncementChannel>>,
    delay: Duration,
}

impl std::fmt::Debug for ChannelBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBroadcaster")
            .field("channels", &self.channel_names())
            .field("delay", &self.delay)
            .finish()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelBroadcaster {
    /// Creates a broadcaster without channels and without delay.
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    /// Adds a channel.
    #[must_use]
    pub fn with_channel(mut self, channel: Arc<dyn AnnouncementChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Sets the pause between two consecutive posts.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Names of the configured channels.
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }
}

#[async_trait]
impl ChannelAnnouncer for ChannelBroadcaster {
    async fn announce(&self, announcement: &Announcement) -> Vec<ChannelOutcome> {
        let message = announcement.message();
        let pending: Vec<_> = self
            .channels
            .iter()
            .filter(|c| !announcement.skip_channels.contains(c.name()))
            .collect();

        let mut outcomes = Vec::with_capacity(pending.len());
        for (i, channel) in pending.iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let outcome = match channel.post(&message).await {
                Ok(post_ref) => {
                    info!(slug = %announcement.slug, channel = channel.name(), "Announcement posted");
                    ChannelOutcome::posted(channel.name(), post_ref)
                }
                Err(error) => {
                    warn!(slug = %announcement.slug, channel = channel.name(), error = %error, "Announcement failed");
                    ChannelOutcome::failed(channel.name(), error)
                }
            };
            announcement.progress.record(outcome.clone());
            outcomes.push(outcome);
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::ports::RepositoryUrl;
    use crate::stages::ChannelProgress;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;
    use std::time::Instant;

    struct FakeChannel {
        name: String,
        result: Result<Option<String>, AdapterError>,
        posts: Mutex<Vec<String>>,
    }

    impl FakeChannel {
        fn new(name: &str, result: Result<Option<String>, AdapterError>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                result,
                posts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AnnouncementChannel for FakeChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn post(&self, message: &str) -> Result<Option<String>, AdapterError> {
            self.posts.lock().push(message.to_string());
            self.result.clone()
        }
    }

    fn announcement(skip: &[&str]) -> Announcement {
        Announcement {
            slug: "qn".to_string(),
            topic: "Quantum noise".to_string(),
            repository_url: RepositoryUrl("https://github.com/me/qn".to_string()),
            site_url: None,
            skip_channels: skip.iter().map(ToString::to_string).collect::<BTreeSet<_>>(),
            progress: ChannelProgress::new(),
        }
    }

    #[tokio::test]
    async fn test_one_outcome_per_channel() {
        let ok = FakeChannel::new("slack", Ok(Some("ts-1".to_string())));
        let bad = FakeChannel::new("discord", Err(AdapterError::rate_limited("429")));
        let broadcaster = ChannelBroadcaster::new().with_channel(ok.clone()).with_channel(bad.clone());

        let outcomes = broadcaster.announce(&announcement(&[])).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_success());
        assert_eq!(outcomes[0].post_ref.as_deref(), Some("ts-1"));
        assert!(!outcomes[1].is_success());
        assert_eq!(ok.posts.lock()[0], "New paper: Quantum noise\nhttps://github.com/me/qn");
    }

    #[tokio::test]
    async fn test_skipped_channels_are_not_contacted() {
        let slack = FakeChannel::new("slack", Ok(None));
        let discord = FakeChannel::new("discord", Ok(None));
        let broadcaster = ChannelBroadcaster::new()
            .with_channel(slack.clone())
            .with_channel(discord.clone());

        let outcomes = broadcaster.announce(&announcement(&["slack"])).await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].channel, "discord");
        assert!(slack.posts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_delay_only_between_posts() {
        let broadcaster = ChannelBroadcaster::new()
            .with_channel(FakeChannel::new("a", Ok(None)))
            .with_channel(FakeChannel::new("b", Ok(None)))
            .with_delay(Duration::from_millis(30));

        let start = Instant::now();
        broadcaster.announce(&announcement(&[])).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(30));
        assert!(elapsed < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_posts_are_reported_before_the_broadcast_ends() {
        let a = FakeChannel::new("a", Ok(Some("p-1".to_string())));
        let broadcaster = Arc::new(
            ChannelBroadcaster::new()
                .with_channel(a.clone())
                .with_channel(FakeChannel::new("b", Ok(None)))
                .with_delay(Duration::from_secs(30)),
        );
        let announcement = announcement(&[]);
        let progress = announcement.progress.clone();

        let task = {
            let broadcaster = broadcaster.clone();
            tokio::spawn(async move { broadcaster.announce(&announcement).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.abort();

        let posted = progress.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].channel, "a");
        assert_eq!(posted[0].post_ref.as_deref(), Some("p-1"));
        assert_eq!(a.posts.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_no_channels_yields_nothing() {
        assert!(ChannelBroadcaster::new().announce(&announcement(&[])).await.is_empty());
    }
}
