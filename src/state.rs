use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::jobs::{ChannelFeedSyncJob, SubscriptionSyncJob, TaskName};
use crate::provider::YoutubeClient;
use crate::scheduler::{Scheduler, TaskHandle, TaskSchedule};
use crate::storage::Storage;

#[derive(Clone)]
pub struct State {
    pub storage: Arc<Storage>,
    pub cfg: Arc<Config>,
    pub tasks: Arc<HashMap<TaskName, TaskHandle>>,
}

impl State {
    /// Opens the store and registers every recurring task with a new scheduler.
    pub async fn new(cfg: Config, cancel: CancellationToken) -> Result<(Self, Scheduler)> {
        let storage = Arc::new(Storage::new(&cfg.db_path).await?);
        let mut scheduler = Scheduler::new(storage.clone(), cancel);
        let tasks = Arc::new(Self::start_tasks(&cfg, &storage, &mut scheduler).await?);
        let cfg = Arc::new(cfg);

        Ok((
            State {
                storage,
                cfg,
                tasks,
            },
            scheduler,
        ))
    }

    async fn start_tasks(
        cfg: &Config,
        storage: &Arc<Storage>,
        scheduler: &mut Scheduler,
    ) -> Result<HashMap<TaskName, TaskHandle>> {
        let client = YoutubeClient::new(
            cfg.api_base_url.clone(),
            cfg.cache_dir.clone(),
            storage.clone(),
        )?;
        let mut tasks = HashMap::with_capacity(TaskName::ALL.len());

        for name in TaskName::ALL {
            let handle = match name {
                TaskName::SubscriptionSync => {
                    let sync = &cfg.subscription_sync;
                    let job = SubscriptionSyncJob::new(storage.clone(), client.clone(), cfg.page_size);

                    scheduler
                        .start(
                            name.as_str(),
                            TaskSchedule::new(sync.interval, sync.overdue_delay),
                            job,
                        )
                        .await?
                }

                TaskName::ChannelFeedSync => {
                    let sync = &cfg.channel_feed_sync;
                    let job = ChannelFeedSyncJob::new(
                        storage.clone(),
                        client.clone(),
                        cfg.page_size,
                        sync.max_activities_per_channel,
                    );

                    scheduler
                        .start(
                            name.as_str(),
                            TaskSchedule::new(sync.interval, sync.overdue_delay),
                            job,
                        )
                        .await?
                }
            };

            tasks.insert(name, handle);
        }

        Ok(tasks)
    }
}
