mod channel_feed;
mod subscriptions;

use std::fmt::{self, Display};
use std::future::Future;
use std::str::FromStr;

use anyhow::Result;
use derive_more::From;
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::paging::FetchError;
use crate::storage::Storage;

pub use self::channel_feed::ChannelFeedSyncJob;
pub use self::subscriptions::SubscriptionSyncJob;

/// Why a job run did not complete.
#[derive(From, Debug)]
pub enum JobError {
    /// The remote catalog could not be read.
    Fetch(FetchError),

    /// The local mirror could not be read or updated.
    Storage(anyhow::Error),

    #[from(ignore)]
    Cancelled,
}

impl Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(e) => write!(f, "could not fetch from the catalog: {e}"),
            Self::Storage(e) => write!(f, "could not update the local mirror: {e:#}"),
            Self::Cancelled => write!(f, "the run was cancelled"),
        }
    }
}

impl std::error::Error for JobError {}

/// The recurring tasks this service knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskName {
    SubscriptionSync,
    ChannelFeedSync,
}

impl TaskName {
    pub const ALL: [TaskName; 2] = [Self::SubscriptionSync, Self::ChannelFeedSync];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubscriptionSync => "SubscriptionSync",
            Self::ChannelFeedSync => "ChannelFeedSync",
        }
    }

    /// What to tell someone who asked for the task to run now.
    pub fn accepted_message(&self) -> &'static str {
        match self {
            Self::SubscriptionSync => "Updating subscriptions",
            Self::ChannelFeedSync => "Updating channel feeds",
        }
    }
}

impl FromStr for TaskName {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or(())
    }
}

impl Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

/// The precondition shared by all jobs: credentials for the catalog account exist.
async fn has_setup(storage: &Storage) -> Result<bool> {
    let mut tx = storage.begin().await?;
    let has_credentials = tx.has_credentials().await?;
    tx.commit().await?;

    Ok(has_credentials)
}

/// Races a remote fetch against cancellation. Cancellation wins if both are ready.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, FetchError>>,
) -> Result<T, JobError> {
    select! {
        biased;

        _ = cancel.cancelled() => Err(JobError::Cancelled),
        result = fut => Ok(result?),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use anyhow::anyhow;
    use time::OffsetDateTime;

    use super::*;
    use crate::paging::Page;
    use crate::provider::{ActivityType, Provider, RemoteActivityItem, RemoteSubscription};

    #[test]
    fn task_names_parse() {
        for name in TaskName::ALL {
            assert_eq!(name.as_str().parse::<TaskName>(), Ok(name));
        }

        assert!("subscriptionsync".parse::<TaskName>().is_err());
        assert!("Downloads".parse::<TaskName>().is_err());
    }

    #[test]
    fn storage_errors_keep_their_context() {
        let e = JobError::from(anyhow!("disk full").context("could not insert a video"));

        assert_eq!(
            e.to_string(),
            "could not update the local mirror: could not insert a video: disk full"
        );
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct ActivityRequest {
        pub channel_id: String,
        pub published_after: OffsetDateTime,
        pub token: Option<String>,
    }

    /// Serves canned pages. Page `i` of a list is requested with the token `p{i}`.
    #[derive(Default)]
    pub(crate) struct FakeProvider {
        pub subscriptions: Vec<Vec<RemoteSubscription>>,
        pub activities: HashMap<String, Vec<Vec<RemoteActivityItem>>>,
        pub failing_channels: Vec<String>,
        pub fail_subscriptions: bool,
        pub activity_requests: Mutex<Vec<ActivityRequest>>,
    }

    fn serve<T: Clone>(pages: &[Vec<T>], token: Option<&str>) -> Page<T> {
        let idx = token
            .and_then(|token| token.strip_prefix('p'))
            .map(|idx| idx.parse::<usize>().unwrap())
            .unwrap_or(0);

        Page {
            items: pages.get(idx).cloned().unwrap_or_default(),
            next_page_token: (idx + 1 < pages.len()).then(|| format!("p{}", idx + 1)),
        }
    }

    impl Provider for FakeProvider {
        async fn list_subscriptions(
            &self,
            _page_size: u32,
            token: Option<&str>,
        ) -> Result<Page<RemoteSubscription>, FetchError> {
            if self.fail_subscriptions {
                return Err(anyhow!("403 Forbidden: quotaExceeded").into());
            }

            Ok(serve(&self.subscriptions, token))
        }

        async fn list_channel_activities(
            &self,
            channel_id: &str,
            published_after: OffsetDateTime,
            _page_size: u32,
            token: Option<&str>,
        ) -> Result<Page<RemoteActivityItem>, FetchError> {
            self.activity_requests.lock().unwrap().push(ActivityRequest {
                channel_id: channel_id.into(),
                published_after,
                token: token.map(Into::into),
            });

            if self.failing_channels.iter().any(|id| id == channel_id) {
                return Err(anyhow!("500 Internal Server Error").into());
            }

            let pages = self
                .activities
                .get(channel_id)
                .map(Vec::as_slice)
                .unwrap_or_default();

            Ok(serve(pages, token))
        }
    }

    pub(crate) fn subscription(id: &str, name: &str) -> RemoteSubscription {
        RemoteSubscription {
            channel_id: id.into(),
            name: name.into(),
            description: String::new(),
        }
    }

    pub(crate) fn activity(id: &str, channel_id: &str, ty: ActivityType) -> RemoteActivityItem {
        RemoteActivityItem {
            id: id.into(),
            channel_id: channel_id.into(),
            title: format!("Activity {id}"),
            description: String::new(),
            activity_type: ty,
            raw_type: ty.as_str().into(),
            published_at: None,
            thumbnail_url: None,
            video_id: (ty == ActivityType::Upload).then(|| format!("video-{id}")),
        }
    }
}
