use sqlx::FromRow;
use time::OffsetDateTime;

/// Execution health of one recurring task.
#[derive(FromRow, Debug, Clone, PartialEq, Eq)]
pub struct TaskRunRecord {
    pub name: String,
    pub last_ran: Option<OffsetDateTime>,

    /// `None` if the task has never finished a run.
    pub last_ran_success: Option<bool>,
    pub last_ran_status: Option<String>,
}

#[derive(FromRow, Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRecord {
    /// The subscribed channel's id.
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(FromRow, Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub inactive: bool,

    /// Activity published before this instant has already been processed.
    pub last_checked_at: OffsetDateTime,
}

#[derive(sqlx::Type, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum DownloadState {
    NotStarted = 0,
    Downloading = 1,
    Downloaded = 2,
    Failed = 3,
}

impl DownloadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::Failed => "failed",
        }
    }
}

#[derive(FromRow, Debug, Clone, PartialEq, Eq)]
pub struct VideoRecord {
    pub id: i64,
    pub activity_id: String,
    pub video_id: Option<String>,
    pub published_at: Option<OffsetDateTime>,
    pub added_at: OffsetDateTime,
    pub title: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
    pub download_state: DownloadState,
    pub started_download_at: Option<OffsetDateTime>,
    pub finished_download_at: Option<OffsetDateTime>,
    pub download_error: bool,
    pub download_error_details: Option<String>,
    pub channel_id: String,
}

/// A video row about to be inserted; the id and download bookkeeping are filled in by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVideo {
    pub activity_id: String,
    pub video_id: Option<String>,
    pub published_at: Option<OffsetDateTime>,
    pub added_at: OffsetDateTime,
    pub title: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
    pub channel_id: String,
}

#[derive(FromRow, Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub key: String,
    pub source_type: String,
    pub data: String,
}
