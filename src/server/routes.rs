use std::collections::HashMap;

use anyhow::{anyhow, Context};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Result;
use axum::Json;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;

use crate::config;
use crate::jobs::TaskName;
use crate::provider::store_access_token;
use crate::server::convert_errors;
use crate::state::State as AppState;
use crate::storage::entities::{ChannelRecord, SubscriptionRecord, VideoRecord};

use super::responses::{
    AlreadyFollowed, EmptyAccessToken, NotSubscribed, TriggerRejected, UnknownChannel, UnknownTask,
};

fn format_date(date: OffsetDateTime) -> anyhow::Result<String> {
    date.format(&Rfc3339)
        .with_context(|| anyhow!("could not format the date {date}"))
}

fn format_opt_date(date: Option<OffsetDateTime>) -> anyhow::Result<Option<String>> {
    date.map(format_date).transpose()
}

#[derive(Serialize, Debug, Clone)]
pub struct TaskView {
    name: &'static str,
    state: &'static str,
    interval: String,
    last_ran: Option<String>,
    last_ran_success: Option<bool>,
    last_ran_status: Option<String>,
    update_url: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct SubscriptionView {
    id: String,
    name: String,
    description: String,
    followed: bool,
}

#[derive(Serialize, Debug, Clone)]
pub struct ChannelView {
    id: String,
    name: String,
    description: String,
    inactive: bool,
    last_checked_at: String,
    videos_url: String,
}

impl ChannelView {
    fn new(channel: ChannelRecord) -> anyhow::Result<Self> {
        let videos_url = format!("/channels/{}/videos", urlencoding::encode(&channel.id));

        Ok(Self {
            last_checked_at: format_date(channel.last_checked_at)?,
            id: channel.id,
            name: channel.name,
            description: channel.description,
            inactive: channel.inactive,
            videos_url,
        })
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct VideoView {
    id: i64,
    channel_id: String,
    activity_id: String,
    video_id: Option<String>,
    title: String,
    description: String,
    thumbnail_url: Option<String>,
    published_at: Option<String>,
    added_at: String,
    download_state: &'static str,
    started_download_at: Option<String>,
    finished_download_at: Option<String>,
    download_error: bool,
    download_error_details: Option<String>,
}

impl VideoView {
    fn new(video: VideoRecord) -> anyhow::Result<Self> {
        Ok(Self {
            id: video.id,
            channel_id: video.channel_id,
            activity_id: video.activity_id,
            video_id: video.video_id,
            title: video.title,
            description: video.description,
            thumbnail_url: video.thumbnail_url,
            published_at: format_opt_date(video.published_at)?,
            added_at: format_date(video.added_at)?,
            download_state: video.download_state.as_str(),
            started_download_at: format_opt_date(video.started_download_at)?,
            finished_download_at: format_opt_date(video.finished_download_at)?,
            download_error: video.download_error,
            download_error_details: video.download_error_details,
        })
    }
}

pub async fn list_tasks(State(state): State<AppState>) -> Result<Json<Vec<TaskView>>> {
    convert_errors(async move {
        let mut tx = state.storage.begin().await?;
        let mut records = tx
            .get_tasks()
            .await?
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect::<HashMap<_, _>>();
        tx.commit().await?;

        let mut tasks = Vec::with_capacity(state.tasks.len());

        for name in TaskName::ALL {
            let Some(handle) = state.tasks.get(&name) else {
                continue;
            };
            let record = records.remove(name.as_str());

            tasks.push(TaskView {
                name: name.as_str(),
                state: handle.state().as_str(),
                interval: config::Duration::from(handle.schedule().interval).to_string(),
                last_ran: format_opt_date(record.as_ref().and_then(|r| r.last_ran))?,
                last_ran_success: record.as_ref().and_then(|r| r.last_ran_success),
                last_ran_status: record.and_then(|r| r.last_ran_status),
                update_url: format!("/tasks/{}/update", urlencoding::encode(name.as_str())),
            });
        }

        Ok(Json(tasks))
    })
    .await
}

#[derive(Deserialize, Debug)]
pub struct NewCredentials {
    access_token: String,
}

/// Accepts the token handed over by the external sign-in flow.
pub async fn store_credentials(
    State(state): State<AppState>,
    Json(credentials): Json<NewCredentials>,
) -> Result<StatusCode> {
    if credentials.access_token.trim().is_empty() {
        return Err(EmptyAccessToken.into());
    }

    convert_errors(store_access_token(&state.storage, &credentials.access_token)).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Signs the catalog account out. The jobs skip their runs until new credentials are stored.
pub async fn clear_credentials(State(state): State<AppState>) -> Result<StatusCode> {
    convert_errors(async move {
        let mut tx = state.storage.begin().await?;
        tx.clear_credentials().await?;
        tx.commit().await?;

        Ok(StatusCode::NO_CONTENT)
    })
    .await
}

pub async fn update_task(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, &'static str)> {
    let name = name.parse::<TaskName>().map_err(|_| UnknownTask)?;
    let handle = state.tasks.get(&name).ok_or(UnknownTask)?;
    handle
        .trigger()
        .map_err(|reason| TriggerRejected { name, reason })?;

    Ok((StatusCode::ACCEPTED, name.accepted_message()))
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
) -> Result<Json<Vec<SubscriptionView>>> {
    convert_errors(async move {
        let mut tx = state.storage.begin().await?;
        let subscriptions = tx.get_subscriptions().await?;
        let mut views = Vec::with_capacity(subscriptions.len());

        for SubscriptionRecord {
            id,
            name,
            description,
        } in subscriptions
        {
            let followed = tx.get_channel(&id).await?.is_some();

            views.push(SubscriptionView {
                id,
                name,
                description,
                followed,
            });
        }

        tx.commit().await?;

        Ok(Json(views))
    })
    .await
}

pub async fn list_channels(State(state): State<AppState>) -> Result<Json<Vec<ChannelView>>> {
    convert_errors(async move {
        let mut tx = state.storage.begin().await?;
        let channels = tx.get_channels().await?;
        tx.commit().await?;

        channels
            .into_iter()
            .map(ChannelView::new)
            .collect::<anyhow::Result<Vec<_>>>()
            .map(Json)
    })
    .await
}

/// Starts polling the feed of a subscribed channel.
pub async fn follow_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ChannelView>)> {
    let mut tx = convert_errors(state.storage.begin()).await?;

    let Some(subscription) = convert_errors(tx.get_subscription(&id)).await? else {
        return Err(NotSubscribed { id }.into());
    };

    if convert_errors(tx.get_channel(&id)).await?.is_some() {
        return Err(AlreadyFollowed { id }.into());
    }

    let channel = ChannelRecord {
        id: subscription.id,
        name: subscription.name,
        description: subscription.description,
        inactive: false,
        last_checked_at: OffsetDateTime::UNIX_EPOCH,
    };
    convert_errors(tx.insert_channel(&channel)).await?;
    convert_errors(tx.commit()).await?;
    info!(channel_id = %channel.id, "Following the channel `{}`", channel.name);

    let view = convert_errors(async move { ChannelView::new(channel) }).await?;

    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn list_videos(State(state): State<AppState>) -> Result<Json<Vec<VideoView>>> {
    convert_errors(async move {
        let mut tx = state.storage.begin().await?;
        let videos = tx.get_videos(None).await?;
        tx.commit().await?;

        videos
            .into_iter()
            .map(VideoView::new)
            .collect::<anyhow::Result<Vec<_>>>()
            .map(Json)
    })
    .await
}

pub async fn list_channel_videos(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<VideoView>>> {
    let videos = convert_errors(async {
        let mut tx = state.storage.begin().await?;

        let videos = match tx.get_channel(&id).await? {
            Some(_) => Some(tx.get_videos(Some(&id)).await?),
            None => None,
        };
        tx.commit().await?;

        Ok(videos)
    })
    .await?
    .ok_or_else(|| UnknownChannel { id: id.clone() })?;

    convert_errors(async move {
        videos
            .into_iter()
            .map(VideoView::new)
            .collect::<anyhow::Result<Vec<_>>>()
            .map(Json)
    })
    .await
}
