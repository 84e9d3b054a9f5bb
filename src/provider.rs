mod youtube;

use std::fmt::{self, Display};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use time::OffsetDateTime;

use crate::paging::{FetchError, Page, PageSource};

pub use self::youtube::{store_access_token, YoutubeClient};

/// A channel the account is subscribed to, as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSubscription {
    pub channel_id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityType {
    Unknown,
    Bulletin,
    ChannelItem,
    Comment,
    Favorite,
    Like,
    PlaylistItem,
    PromotedItem,
    Recommendation,
    Social,
    Subscription,
    Upload,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Bulletin => "bulletin",
            Self::ChannelItem => "channelItem",
            Self::Comment => "comment",
            Self::Favorite => "favorite",
            Self::Like => "like",
            Self::PlaylistItem => "playlistItem",
            Self::PromotedItem => "promotedItem",
            Self::Recommendation => "recommendation",
            Self::Social => "social",
            Self::Subscription => "subscription",
            Self::Upload => "upload",
        }
    }

    /// Parses the catalog's type string; anything unrecognized is [`ActivityType::Unknown`].
    pub fn from_raw(raw: &str) -> Self {
        raw.parse().unwrap_or(Self::Unknown)
    }
}

impl FromStr for ActivityType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "bulletin" => Self::Bulletin,
            "channelItem" => Self::ChannelItem,
            "comment" => Self::Comment,
            "favorite" => Self::Favorite,
            "like" => Self::Like,
            "playlistItem" => Self::PlaylistItem,
            "promotedItem" => Self::PromotedItem,
            "recommendation" => Self::Recommendation,
            "social" => Self::Social,
            "subscription" => Self::Subscription,
            "upload" => Self::Upload,
            _ => return Err(()),
        })
    }
}

impl Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

/// One entry of a channel's activity feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteActivityItem {
    pub id: String,
    pub channel_id: String,
    pub title: String,
    pub description: String,
    pub activity_type: ActivityType,

    /// The type string as the catalog sent it.
    pub raw_type: String,
    pub published_at: Option<OffsetDateTime>,
    pub thumbnail_url: Option<String>,

    /// Only set for uploads.
    pub video_id: Option<String>,
}

/// The paginated list operations of the remote catalog.
pub trait Provider: Send + Sync {
    fn list_subscriptions(
        &self,
        page_size: u32,
        token: Option<&str>,
    ) -> impl Future<Output = Result<Page<RemoteSubscription>, FetchError>> + Send;

    fn list_channel_activities(
        &self,
        channel_id: &str,
        published_after: OffsetDateTime,
        page_size: u32,
        token: Option<&str>,
    ) -> impl Future<Output = Result<Page<RemoteActivityItem>, FetchError>> + Send;
}

impl<P: Provider> Provider for Arc<P> {
    fn list_subscriptions(
        &self,
        page_size: u32,
        token: Option<&str>,
    ) -> impl Future<Output = Result<Page<RemoteSubscription>, FetchError>> + Send {
        (**self).list_subscriptions(page_size, token)
    }

    fn list_channel_activities(
        &self,
        channel_id: &str,
        published_after: OffsetDateTime,
        page_size: u32,
        token: Option<&str>,
    ) -> impl Future<Output = Result<Page<RemoteActivityItem>, FetchError>> + Send {
        (**self).list_channel_activities(channel_id, published_after, page_size, token)
    }
}

/// Pages of the account's subscription list.
pub struct Subscriptions<'p, P> {
    pub provider: &'p P,
    pub page_size: u32,
}

impl<P: Provider> PageSource for Subscriptions<'_, P> {
    type Item = RemoteSubscription;

    fn fetch_page(
        &mut self,
        token: Option<&str>,
    ) -> impl Future<Output = Result<Page<Self::Item>, FetchError>> + Send {
        self.provider.list_subscriptions(self.page_size, token)
    }
}

/// Pages of one channel's activity published after a watermark.
pub struct ChannelActivities<'p, P> {
    pub provider: &'p P,
    pub channel_id: &'p str,
    pub published_after: OffsetDateTime,
    pub page_size: u32,
}

impl<P: Provider> PageSource for ChannelActivities<'_, P> {
    type Item = RemoteActivityItem;

    fn fetch_page(
        &mut self,
        token: Option<&str>,
    ) -> impl Future<Output = Result<Page<Self::Item>, FetchError>> + Send {
        self.provider.list_channel_activities(
            self.channel_id,
            self.published_after,
            self.page_size,
            token,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_types_round_trip_through_their_raw_names() {
        for ty in [
            ActivityType::Bulletin,
            ActivityType::ChannelItem,
            ActivityType::PlaylistItem,
            ActivityType::Upload,
        ] {
            assert_eq!(ActivityType::from_raw(ty.as_str()), ty);
        }
    }

    #[test]
    fn unrecognized_activity_types_are_unknown() {
        assert_eq!(ActivityType::from_raw("liveStream"), ActivityType::Unknown);
        assert_eq!(ActivityType::from_raw("Upload"), ActivityType::Unknown);
        assert_eq!(ActivityType::from_raw(""), ActivityType::Unknown);
    }
}
