use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::jobs::{cancellable, has_setup, JobError};
use crate::paging::Pager;
use crate::provider::{Provider, Subscriptions};
use crate::reconcile;
use crate::scheduler::Work;
use crate::storage::entities::SubscriptionRecord;
use crate::storage::Storage;

/// Mirrors the account's subscription list into the local store.
pub struct SubscriptionSyncJob<P> {
    storage: Arc<Storage>,
    provider: P,
    page_size: u32,
}

impl<P: Provider> SubscriptionSyncJob<P> {
    pub fn new(storage: Arc<Storage>, provider: P, page_size: u32) -> Self {
        Self {
            storage,
            provider,
            page_size,
        }
    }
}

impl<P: Provider + 'static> Work for SubscriptionSyncJob<P> {
    async fn is_configured(&self) -> Result<bool> {
        has_setup(&self.storage).await
    }

    async fn run(&mut self, cancel: &CancellationToken) -> Result<(), JobError> {
        let pager = Pager::new(Subscriptions {
            provider: &self.provider,
            page_size: self.page_size,
        });
        let remote = cancellable(cancel, pager.collect()).await?.items;
        debug!(count = remote.len(), "Retrieved the subscription list");

        let mut tx = self.storage.begin().await?;
        let local = tx.get_subscriptions().await?;

        let diff = reconcile::diff(
            remote,
            local,
            |r| r.channel_id.clone(),
            |l| l.id.clone(),
            |r, l| r.name == l.name && r.description == l.description,
        );

        if diff.is_empty() {
            info!("The subscription list is up to date");

            return Ok(());
        }

        for remote in diff.to_add {
            info!(channel_id = %remote.channel_id, "Subscribed to `{}`", remote.name);
            tx.insert_subscription(&SubscriptionRecord {
                id: remote.channel_id,
                name: remote.name,
                description: remote.description,
            })
            .await?;
        }

        for (mut local, remote) in diff.to_update {
            info!(
                channel_id = %local.id,
                "Updating the subscription `{}` (now `{}`)",
                local.name,
                remote.name,
            );
            local.name = remote.name;
            local.description = remote.description;
            tx.update_subscription(&local).await?;
        }

        for local in diff.to_remove {
            info!(channel_id = %local.id, "Unsubscribed from `{}`", local.name);
            tx.delete_subscription(&local.id).await?;
        }

        tx.commit().await?;

        Ok(())
    }
}
