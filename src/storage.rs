pub mod entities;

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use self::entities::{
    ChannelRecord, Credential, NewVideo, SubscriptionRecord, TaskRunRecord, VideoRecord,
};

/// Longest task status message kept in the database, in characters.
pub const MAX_STATUS_LEN: usize = 2048;

pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        let pool = SqlitePoolOptions::new()
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(db_path)
                    .foreign_keys(true)
                    .journal_mode(SqliteJournalMode::Delete)
                    .create_if_missing(true),
            )
            .await
            .with_context(|| anyhow!("could not open a SQLite database `{}`", db_path.display()))?;
        info!("Using an SQLite database `{}`", db_path.display());
        sqlx::migrate!()
            .run(&pool)
            .await
            .with_context(|| anyhow!("could not prepare a database schema"))?;

        Ok(Self { pool })
    }

    pub async fn begin(&self) -> Result<Tx> {
        self.pool
            .begin()
            .await
            .context("could not begin a new DB transaction")
            .map(Tx)
    }
}

fn truncate_status(status: &str) -> &str {
    match status.char_indices().nth(MAX_STATUS_LEN) {
        Some((idx, _)) => &status[..idx],
        None => status,
    }
}

pub struct Tx(Transaction<'static, Sqlite>);

impl Tx {
    pub async fn commit(self) -> Result<()> {
        self.0
            .commit()
            .await
            .context("could not commit a DB transaction")
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_task(&mut self, name: &str) -> Result<Option<TaskRunRecord>> {
        sqlx::query_as(
            "SELECT name, last_ran, last_ran_success, last_ran_status
            FROM tasks
            WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(self.0.as_mut())
        .await
        .with_context(|| anyhow!("could not retrieve the task `{name}`"))
    }

    /// Returns the record of the task, creating an empty one if there is none yet.
    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_or_create_task(&mut self, name: &str) -> Result<TaskRunRecord> {
        if let Some(task) = self.get_task(name).await? {
            return Ok(task);
        }

        debug!("No record found for the task, creating one");
        sqlx::query(
            "INSERT
            INTO tasks (name)
            VALUES (?1)",
        )
        .bind(name)
        .execute(self.0.as_mut())
        .await
        .with_context(|| anyhow!("could not create a record for the task `{name}`"))?;

        Ok(TaskRunRecord {
            name: name.into(),
            last_ran: None,
            last_ran_success: None,
            last_ran_status: None,
        })
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_tasks(&mut self) -> Result<Vec<TaskRunRecord>> {
        sqlx::query_as(
            "SELECT name, last_ran, last_ran_success, last_ran_status
            FROM tasks
            ORDER BY name ASC",
        )
        .fetch_all(self.0.as_mut())
        .await
        .context("could not retrieve the task list")
    }

    #[instrument(level = "TRACE", skip(self, status))]
    pub async fn record_task_run(
        &mut self,
        name: &str,
        ran_at: OffsetDateTime,
        success: bool,
        status: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT
            INTO tasks (name, last_ran, last_ran_success, last_ran_status)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (name) DO UPDATE SET
              last_ran = excluded.last_ran,
              last_ran_success = excluded.last_ran_success,
              last_ran_status = excluded.last_ran_status",
        )
        .bind(name)
        .bind(ran_at)
        .bind(success)
        .bind(truncate_status(status))
        .execute(self.0.as_mut())
        .await
        .with_context(|| anyhow!("could not update the status of the task `{name}`"))?;

        Ok(())
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_subscriptions(&mut self) -> Result<Vec<SubscriptionRecord>> {
        sqlx::query_as(
            "SELECT id, name, description
            FROM subscriptions
            ORDER BY name ASC, id ASC",
        )
        .fetch_all(self.0.as_mut())
        .await
        .context("could not retrieve the subscription list")
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_subscription(&mut self, id: &str) -> Result<Option<SubscriptionRecord>> {
        sqlx::query_as(
            "SELECT id, name, description
            FROM subscriptions
            WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.0.as_mut())
        .await
        .with_context(|| anyhow!("could not retrieve the subscription `{id}`"))
    }

    #[instrument(level = "TRACE", skip(self, subscription), fields(id = %subscription.id))]
    pub async fn insert_subscription(&mut self, subscription: &SubscriptionRecord) -> Result<()> {
        sqlx::query(
            "INSERT
            INTO subscriptions (id, name, description)
            VALUES (?1, ?2, ?3)",
        )
        .bind(&subscription.id)
        .bind(&subscription.name)
        .bind(&subscription.description)
        .execute(self.0.as_mut())
        .await
        .with_context(|| anyhow!("could not insert the subscription `{}`", subscription.id))?;

        Ok(())
    }

    #[instrument(level = "TRACE", skip(self, subscription), fields(id = %subscription.id))]
    pub async fn update_subscription(&mut self, subscription: &SubscriptionRecord) -> Result<()> {
        sqlx::query(
            "UPDATE subscriptions
            SET name = ?2, description = ?3
            WHERE id = ?1",
        )
        .bind(&subscription.id)
        .bind(&subscription.name)
        .bind(&subscription.description)
        .execute(self.0.as_mut())
        .await
        .with_context(|| anyhow!("could not update the subscription `{}`", subscription.id))?;

        Ok(())
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn delete_subscription(&mut self, id: &str) -> Result<()> {
        sqlx::query(
            "DELETE
            FROM subscriptions
            WHERE id = ?1",
        )
        .bind(id)
        .execute(self.0.as_mut())
        .await
        .with_context(|| anyhow!("could not delete the subscription `{id}`"))?;

        Ok(())
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_channels(&mut self) -> Result<Vec<ChannelRecord>> {
        sqlx::query_as(
            "SELECT id, name, description, inactive, last_checked_at
            FROM channels
            ORDER BY name ASC, id ASC",
        )
        .fetch_all(self.0.as_mut())
        .await
        .context("could not retrieve the channel list")
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_channel(&mut self, id: &str) -> Result<Option<ChannelRecord>> {
        sqlx::query_as(
            "SELECT id, name, description, inactive, last_checked_at
            FROM channels
            WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.0.as_mut())
        .await
        .with_context(|| anyhow!("could not retrieve the channel `{id}`"))
    }

    #[instrument(level = "TRACE", skip(self, channel), fields(id = %channel.id))]
    pub async fn insert_channel(&mut self, channel: &ChannelRecord) -> Result<()> {
        sqlx::query(
            "INSERT
            INTO channels (id, name, description, inactive, last_checked_at)
            VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&channel.id)
        .bind(&channel.name)
        .bind(&channel.description)
        .bind(channel.inactive)
        .bind(channel.last_checked_at)
        .execute(self.0.as_mut())
        .await
        .with_context(|| anyhow!("could not insert the channel `{}`", channel.id))?;

        Ok(())
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn set_channel_last_checked_at(
        &mut self,
        id: &str,
        last_checked_at: OffsetDateTime,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE channels
            SET last_checked_at = ?2
            WHERE id = ?1",
        )
        .bind(id)
        .bind(last_checked_at)
        .execute(self.0.as_mut())
        .await
        .with_context(|| anyhow!("could not update the watermark of the channel `{id}`"))?;

        Ok(())
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_video_activity_ids(&mut self, channel_id: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT activity_id
            FROM videos
            WHERE channel_id = ?1
            ORDER BY id ASC",
        )
        .bind(channel_id)
        .fetch_all(self.0.as_mut())
        .await
        .with_context(|| anyhow!("could not retrieve known activities of the channel `{channel_id}`"))
    }

    /// Inserts a video in the `NotStarted` download state and returns its id.
    #[instrument(
        level = "TRACE",
        skip(self, video),
        fields(channel_id = %video.channel_id, activity_id = %video.activity_id),
    )]
    pub async fn insert_video(&mut self, video: &NewVideo) -> Result<i64> {
        sqlx::query_scalar(
            "INSERT
            INTO videos (
              activity_id,
              video_id,
              published_at,
              added_at,
              title,
              description,
              thumbnail_url,
              channel_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            RETURNING id",
        )
        .bind(&video.activity_id)
        .bind(&video.video_id)
        .bind(video.published_at)
        .bind(video.added_at)
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.thumbnail_url)
        .bind(&video.channel_id)
        .fetch_one(self.0.as_mut())
        .await
        .with_context(|| anyhow!("could not insert the video for activity `{}`", video.activity_id))
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_videos(&mut self, channel_id: Option<&str>) -> Result<Vec<VideoRecord>> {
        sqlx::query_as(
            "SELECT
              id,
              activity_id,
              video_id,
              published_at,
              added_at,
              title,
              description,
              thumbnail_url,
              download_state,
              started_download_at,
              finished_download_at,
              download_error,
              download_error_details,
              channel_id
            FROM videos
            WHERE ?1 IS NULL OR channel_id = ?1
            ORDER BY added_at DESC, id DESC",
        )
        .bind(channel_id)
        .fetch_all(self.0.as_mut())
        .await
        .context("could not retrieve the video list")
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn has_credentials(&mut self) -> Result<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM credentials)")
            .fetch_one(self.0.as_mut())
            .await
            .context("could not check the credential store")
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_credential(&mut self, key: &str) -> Result<Option<Credential>> {
        sqlx::query_as(
            "SELECT key, source_type, data
            FROM credentials
            WHERE key = ?1",
        )
        .bind(key)
        .fetch_optional(self.0.as_mut())
        .await
        .with_context(|| anyhow!("could not retrieve the credential `{key}`"))
    }

    #[instrument(level = "TRACE", skip(self, data))]
    pub async fn store_credential(&mut self, key: &str, source_type: &str, data: &str) -> Result<()> {
        sqlx::query(
            "INSERT
            INTO credentials (key, source_type, data)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (key) DO UPDATE SET
              source_type = excluded.source_type,
              data = excluded.data",
        )
        .bind(key)
        .bind(source_type)
        .bind(data)
        .execute(self.0.as_mut())
        .await
        .with_context(|| anyhow!("could not store the credential `{key}`"))?;

        Ok(())
    }

    /// Deletes the credential if it was stored with the given type. Empty keys are ignored.
    #[instrument(level = "TRACE", skip(self))]
    pub async fn delete_credential(&mut self, key: &str, source_type: &str) -> Result<()> {
        if key.is_empty() {
            return Ok(());
        }

        sqlx::query(
            "DELETE
            FROM credentials
            WHERE key = ?1 AND source_type = ?2",
        )
        .bind(key)
        .bind(source_type)
        .execute(self.0.as_mut())
        .await
        .with_context(|| anyhow!("could not delete the credential `{key}`"))?;

        Ok(())
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn clear_credentials(&mut self) -> Result<()> {
        sqlx::query("DELETE FROM credentials")
            .execute(self.0.as_mut())
            .await
            .context("could not clear the credential store")?;
        info!("The credential store was cleared");

        Ok(())
    }
}
