use std::sync::Arc;

use anyhow::{anyhow, Result};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::jobs::{cancellable, has_setup, JobError};
use crate::paging::Pager;
use crate::provider::{ActivityType, ChannelActivities, Provider};
use crate::reconcile;
use crate::scheduler::Work;
use crate::storage::entities::{ChannelRecord, NewVideo};
use crate::storage::Storage;

/// Polls the activity feed of every followed channel and records new uploads.
pub struct ChannelFeedSyncJob<P> {
    storage: Arc<Storage>,
    provider: P,
    page_size: u32,
    max_activities: usize,
}

impl<P: Provider> ChannelFeedSyncJob<P> {
    pub fn new(storage: Arc<Storage>, provider: P, page_size: u32, max_activities: usize) -> Self {
        Self {
            storage,
            provider,
            page_size,
            max_activities,
        }
    }
}

impl<P: Provider> ChannelFeedSyncJob<P> {
    /// Fetches the new activities of one channel and saves its uploads along with the new
    /// watermark. Nothing is saved for the channel if the fetch fails.
    async fn sync_channel(
        &self,
        channel: &ChannelRecord,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        let mut tx = self.storage.begin().await?;
        let known_ids = tx.get_video_activity_ids(&channel.id).await?;
        tx.commit().await?;

        let pager = Pager::new(ChannelActivities {
            provider: &self.provider,
            channel_id: &channel.id,
            published_after: channel.last_checked_at,
            page_size: self.page_size,
        })
        .with_max_items(Some(self.max_activities));
        let fetched = cancellable(cancel, pager.collect()).await?;
        let checked_at = OffsetDateTime::now_utc();

        if fetched.truncated {
            warn!(
                channel_id = %channel.id,
                last_checked_at = %channel.last_checked_at,
                "The channel `{}` has more than {} new activities since {}; the rest will be \
                    skipped (consider raising `max-activities-per-channel` or polling more often)",
                channel.name,
                self.max_activities,
                channel.last_checked_at,
            );
        }

        let uploads = fetched
            .items
            .into_iter()
            .filter(|activity| activity.activity_type == ActivityType::Upload);
        let diff = reconcile::diff(
            uploads,
            known_ids,
            |activity| activity.id.clone(),
            |id| id.clone(),
            |_, _| true,
        );

        let added = diff.to_add.len();
        let mut tx = self.storage.begin().await?;
        tx.set_channel_last_checked_at(&channel.id, checked_at).await?;

        for activity in diff.to_add {
            tx.insert_video(&NewVideo {
                activity_id: activity.id,
                video_id: activity.video_id,
                published_at: activity.published_at,
                added_at: checked_at,
                title: activity.title,
                description: activity.description,
                thumbnail_url: activity.thumbnail_url,
                channel_id: channel.id.clone(),
            })
            .await?;
        }

        tx.commit().await?;

        if added > 0 {
            info!(
                channel_id = %channel.id,
                "Found {added} new video(s) on the channel `{}`",
                channel.name,
            );
        }

        Ok(())
    }
}

impl<P: Provider + 'static> Work for ChannelFeedSyncJob<P> {
    async fn is_configured(&self) -> Result<bool> {
        has_setup(&self.storage).await
    }

    /// Channels are saved one by one. A channel whose feed could not be fetched keeps its
    /// watermark and is retried on the next run; the run still reports the failure.
    async fn run(&mut self, cancel: &CancellationToken) -> Result<(), JobError> {
        let mut tx = self.storage.begin().await?;
        let channels = tx.get_channels().await?;
        tx.commit().await?;
        debug!(count = channels.len(), "Checking the channel feeds");

        let mut failed = Vec::new();

        for channel in &channels {
            match self.sync_channel(channel, cancel).await {
                Ok(()) => {}

                Err(JobError::Fetch(e)) => {
                    warn!(
                        channel_id = %channel.id,
                        "Could not fetch the feed of the channel `{}`: {e}",
                        channel.name,
                    );
                    failed.push((channel.id.as_str(), e));
                }

                Err(e) => return Err(e),
            }
        }

        let Some((_, first_error)) = failed.first() else {
            return Ok(());
        };
        let ids = failed
            .iter()
            .map(|(id, _)| *id)
            .collect::<Vec<_>>()
            .join(", ");

        Err(JobError::Fetch(
            anyhow!(
                "could not fetch the feeds of {} channel(s) ({ids}): {first_error}",
                failed.len()
            )
            .into(),
        ))
    }
}
