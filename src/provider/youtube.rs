use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use http_cache_reqwest::{
    CACacheManager, Cache, CacheOptions, HttpCache, HttpCacheOptions, MokaCache, MokaManager,
};
use reqwest::{StatusCode, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use crate::paging::{FetchError, Page};
use crate::storage::Storage;

use super::{ActivityType, Provider, RemoteActivityItem, RemoteSubscription};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Credential store entry holding the account's OAuth token.
const CREDENTIAL_KEY: &str = "user";

/// Source type of the credentials this client reads and writes.
const CREDENTIAL_SOURCE_TYPE: &str = "token";

#[derive(Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
}

/// Saves the account's access token, replacing any previous credentials.
pub async fn store_access_token(storage: &Storage, access_token: &str) -> Result<()> {
    let data = serde_json::to_string(&StoredToken {
        access_token: access_token.to_owned(),
    })
    .context("could not serialize the access token")?;

    let mut tx = storage.begin().await?;
    tx.store_credential(CREDENTIAL_KEY, CREDENTIAL_SOURCE_TYPE, &data)
        .await?;
    tx.commit().await?;
    info!("Stored a new access token");

    Ok(())
}

/// Responses are evaluated as by a private cache: every request carries the account's bearer
/// token, and the API marks such responses `private`.
fn cache_options() -> HttpCacheOptions {
    HttpCacheOptions {
        cache_options: Some(CacheOptions {
            shared: false,
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionResource {
    snippet: SubscriptionSnippet,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    resource_id: ResourceId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    channel_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityResource {
    id: String,
    snippet: ActivitySnippet,
    #[serde(default)]
    content_details: Option<ActivityContentDetails>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivitySnippet {
    published_at: Option<String>,
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    thumbnails: Option<Thumbnails>,
    #[serde(rename = "type", default)]
    activity_type: String,
}

#[derive(Deserialize)]
struct Thumbnails {
    default: Option<Thumbnail>,
}

#[derive(Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityContentDetails {
    upload: Option<UploadDetails>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadDetails {
    video_id: String,
}

impl From<SubscriptionResource> for RemoteSubscription {
    fn from(resource: SubscriptionResource) -> Self {
        Self {
            channel_id: resource.snippet.resource_id.channel_id,
            name: resource.snippet.title,
            description: resource.snippet.description,
        }
    }
}

impl From<ActivityResource> for RemoteActivityItem {
    fn from(resource: ActivityResource) -> Self {
        let snippet = resource.snippet;
        let published_at = snippet.published_at.as_deref().and_then(|s| {
            OffsetDateTime::parse(s, &Rfc3339)
                .inspect_err(|e| {
                    warn!(activity_id = %resource.id, "Malformed publication date `{s}`: {e}")
                })
                .ok()
        });
        let activity_type = ActivityType::from_raw(&snippet.activity_type);
        let video_id = match activity_type {
            ActivityType::Upload => resource
                .content_details
                .and_then(|details| details.upload)
                .map(|upload| upload.video_id),
            _ => None,
        };

        Self {
            id: resource.id,
            channel_id: snippet.channel_id,
            title: snippet.title,
            description: snippet.description,
            activity_type,
            raw_type: snippet.activity_type,
            published_at,
            thumbnail_url: snippet
                .thumbnails
                .and_then(|thumbnails| thumbnails.default)
                .map(|thumbnail| thumbnail.url),
            video_id,
        }
    }
}

/// Talks to the YouTube Data API v3.
#[derive(Clone)]
pub struct YoutubeClient {
    http_client: ClientWithMiddleware,
    base_url: Url,
    storage: Arc<Storage>,
}

impl YoutubeClient {
    pub fn new(
        mut base_url: Url,
        cache_dir: Option<PathBuf>,
        storage: Arc<Storage>,
    ) -> Result<Self> {
        // endpoints are resolved relative to the base, which drops its last segment otherwise
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let builder = ClientBuilder::new(
            reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .read_timeout(READ_TIMEOUT)
                .timeout(TOTAL_TIMEOUT)
                .build()
                .context("could not create an HTTP client")?,
        );

        let builder = if let Some(path) = cache_dir {
            debug!("Using a file cache at {}", path.display());
            builder.with(Cache(HttpCache {
                mode: Default::default(),
                manager: CACacheManager { path },
                options: cache_options(),
            }))
        } else {
            debug!("Using an in-memory cache");
            builder.with(Cache(HttpCache {
                mode: Default::default(),
                manager: MokaManager::new(MokaCache::builder().max_capacity(8192).build()),
                options: cache_options(),
            }))
        };

        Ok(Self {
            http_client: builder.build(),
            base_url,
            storage,
        })
    }

    async fn access_token(&self) -> Result<String> {
        let mut tx = self.storage.begin().await?;
        let credential = tx.get_credential(CREDENTIAL_KEY).await?;
        tx.commit().await?;

        let credential = credential
            .ok_or_else(|| anyhow!("no credentials stored under `{CREDENTIAL_KEY}`"))?;
        let token: StoredToken = serde_json::from_str(&credential.data)
            .context("could not parse the stored access token")?;

        Ok(token.access_token)
    }

    fn endpoint(
        &self,
        resource: &str,
        params: &[(&str, &str)],
        token: Option<&str>,
    ) -> Result<Url> {
        let mut url = self
            .base_url
            .join(resource)
            .with_context(|| anyhow!("could not build the URL for `{resource}`"))?;

        {
            let mut query = url.query_pairs_mut();
            query.extend_pairs(params);

            if let Some(token) = token {
                query.append_pair("pageToken", token);
            }
        }

        Ok(url)
    }

    /// Drops the stored token once the API has rejected it, so the jobs stop running until
    /// the account is set up again.
    async fn forget_access_token(&self) -> Result<()> {
        let mut tx = self.storage.begin().await?;
        tx.delete_credential(CREDENTIAL_KEY, CREDENTIAL_SOURCE_TYPE)
            .await?;
        tx.commit().await?;
        warn!("The API rejected the stored access token; it has been removed");

        Ok(())
    }

    async fn list<T, R>(&self, url: Url) -> Result<Page<T>>
    where
        R: DeserializeOwned,
        T: From<R>,
    {
        let access_token = self.access_token().await?;

        let response = self
            .http_client
            .get(url.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .with_context(|| anyhow!("could not fetch `{url}`"))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            self.forget_access_token().await?;
        }

        let response = response
            .error_for_status()
            .context("server returned an error")
            .with_context(|| anyhow!("could not fetch `{url}`"))?;
        let body = response
            .text()
            .await
            .with_context(|| anyhow!("could not read the response when fetching `{url}`"))?;
        let list: ListResponse<R> = serde_json::from_str(&body)
            .with_context(|| anyhow!("could not parse the response from `{url}`"))?;

        Ok(Page {
            items: list.items.into_iter().map(T::from).collect(),
            next_page_token: list.next_page_token,
        })
    }
}

impl Provider for YoutubeClient {
    #[instrument(level = "DEBUG", skip(self))]
    async fn list_subscriptions(
        &self,
        page_size: u32,
        token: Option<&str>,
    ) -> Result<Page<RemoteSubscription>, FetchError> {
        let page_size = page_size.to_string();
        let url = self.endpoint(
            "subscriptions",
            &[
                ("part", "snippet"),
                ("mine", "true"),
                ("maxResults", &page_size),
            ],
            token,
        )?;

        Ok(self.list::<_, SubscriptionResource>(url).await?)
    }

    #[instrument(level = "DEBUG", skip(self))]
    async fn list_channel_activities(
        &self,
        channel_id: &str,
        published_after: OffsetDateTime,
        page_size: u32,
        token: Option<&str>,
    ) -> Result<Page<RemoteActivityItem>, FetchError> {
        let page_size = page_size.to_string();
        let published_after = published_after
            .format(&Rfc3339)
            .context("could not format the activity watermark")?;
        let url = self.endpoint(
            "activities",
            &[
                ("part", "snippet,contentDetails"),
                ("channelId", channel_id),
                ("publishedAfter", &published_after),
                ("maxResults", &page_size),
            ],
            token,
        )?;

        Ok(self.list::<_, ActivityResource>(url).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use super::*;

    #[test]
    fn converts_activity_resources() {
        let list: ListResponse<ActivityResource> = serde_json::from_str(
            r#"{
                "nextPageToken": "CAUQAA",
                "items": [
                    {
                        "id": "act1",
                        "snippet": {
                            "publishedAt": "2024-05-01T12:00:00Z",
                            "channelId": "UC1",
                            "title": "New video",
                            "description": "desc",
                            "thumbnails": { "default": { "url": "https://i.ytimg.com/a.jpg" } },
                            "type": "upload"
                        },
                        "contentDetails": { "upload": { "videoId": "vid1" } }
                    },
                    {
                        "id": "act2",
                        "snippet": {
                            "publishedAt": "not a date",
                            "channelId": "UC1",
                            "title": "Liked something",
                            "type": "like"
                        },
                        "contentDetails": { "like": { "resourceId": { "videoId": "vid9" } } }
                    },
                    {
                        "id": "act3",
                        "snippet": { "channelId": "UC1", "title": "?", "type": "fromTheFuture" }
                    }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(list.next_page_token.as_deref(), Some("CAUQAA"));
        let items = list
            .items
            .into_iter()
            .map(RemoteActivityItem::from)
            .collect::<Vec<_>>();

        assert_eq!(items[0].activity_type, ActivityType::Upload);
        assert_eq!(items[0].video_id.as_deref(), Some("vid1"));
        assert_eq!(
            items[0].published_at,
            Some(time::macros::datetime!(2024-05-01 12:00 UTC))
        );
        assert_eq!(
            items[0].thumbnail_url.as_deref(),
            Some("https://i.ytimg.com/a.jpg")
        );

        assert_eq!(items[1].activity_type, ActivityType::Like);
        assert_eq!(items[1].video_id, None);
        assert_eq!(items[1].published_at, None);

        assert_eq!(items[2].activity_type, ActivityType::Unknown);
        assert_eq!(items[2].raw_type, "fromTheFuture");
    }

    #[test]
    fn converts_subscription_resources() {
        let list: ListResponse<SubscriptionResource> = serde_json::from_str(
            r#"{
                "items": [
                    {
                        "id": "sub-id",
                        "snippet": {
                            "title": "A channel",
                            "description": "About it",
                            "resourceId": { "kind": "youtube#channel", "channelId": "UC1" }
                        }
                    }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(list.next_page_token, None);
        let sub = RemoteSubscription::from(list.items.into_iter().next().unwrap());
        assert_eq!(
            sub,
            RemoteSubscription {
                channel_id: "UC1".into(),
                name: "A channel".into(),
                description: "About it".into(),
            }
        );
    }

    #[tokio::test]
    async fn builds_paged_endpoints() {
        let (_dir, storage) = crate::storage::tests::temp_storage().await;
        let client = YoutubeClient::new(
            Url::parse("https://example.com/youtube/v3/").unwrap(),
            None,
            Arc::new(storage),
        )
        .unwrap();

        let url = client
            .endpoint("activities", &[("channelId", "UC1")], Some("tok"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.com/youtube/v3/activities?channelId=UC1&pageToken=tok"
        );
    }

    #[tokio::test]
    async fn base_urls_without_a_trailing_slash_keep_their_path() {
        let (_dir, storage) = crate::storage::tests::temp_storage().await;
        let client = YoutubeClient::new(
            Url::parse("https://example.com/youtube/v3").unwrap(),
            None,
            Arc::new(storage),
        )
        .unwrap();

        let url = client
            .endpoint("subscriptions", &[("mine", "true")], None)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.com/youtube/v3/subscriptions?mine=true"
        );
    }

    #[tokio::test]
    async fn requires_a_stored_token() {
        let (_dir, storage) = crate::storage::tests::temp_storage().await;
        let storage = Arc::new(storage);
        let client = YoutubeClient::new(
            Url::parse("https://example.com/youtube/v3/").unwrap(),
            None,
            storage.clone(),
        )
        .unwrap();

        assert!(client.access_token().await.is_err());

        let mut tx = storage.begin().await.unwrap();
        tx.store_credential(
            CREDENTIAL_KEY,
            "token",
            r#"{"access_token":"abc","expires_in":3599}"#,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(client.access_token().await.unwrap(), "abc");

        store_access_token(&storage, "def").await.unwrap();
        assert_eq!(client.access_token().await.unwrap(), "def");
    }

    async fn serve_status(status: StatusCode) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().route(
            "/youtube/v3/subscriptions",
            axum::routing::get(move || async move { status }),
        );
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        Url::parse(&format!("http://{addr}/youtube/v3/")).unwrap()
    }

    #[tokio::test]
    async fn private_responses_are_cached() {
        let hits = Arc::new(AtomicUsize::new(0));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().route(
            "/youtube/v3/subscriptions",
            axum::routing::get({
                let hits = hits.clone();

                move || async move {
                    hits.fetch_add(1, AtomicOrdering::SeqCst);

                    (
                        [("cache-control", "private, max-age=600")],
                        r#"{"items": []}"#,
                    )
                }
            }),
        );
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let (_dir, storage) = crate::storage::tests::temp_storage().await;
        let storage = Arc::new(storage);
        store_access_token(&storage, "abc").await.unwrap();
        let base_url = Url::parse(&format!("http://{addr}/youtube/v3/")).unwrap();
        let client = YoutubeClient::new(base_url, None, storage).unwrap();

        for _ in 0..2 {
            let page = client.list_subscriptions(50, None).await.unwrap();
            assert!(page.items.is_empty());
        }

        assert_eq!(hits.load(AtomicOrdering::SeqCst), 1);
    }

    async fn has_credentials(storage: &Storage) -> bool {
        let mut tx = storage.begin().await.unwrap();

        tx.has_credentials().await.unwrap()
    }

    #[tokio::test]
    async fn rejected_tokens_are_forgotten() {
        let (_dir, storage) = crate::storage::tests::temp_storage().await;
        let storage = Arc::new(storage);
        store_access_token(&storage, "expired").await.unwrap();

        let client =
            YoutubeClient::new(serve_status(StatusCode::UNAUTHORIZED).await, None, storage.clone())
                .unwrap();
        let e = client.list_subscriptions(50, None).await.unwrap_err();

        assert!(e.to_string().contains("401"));
        assert!(!has_credentials(&storage).await);
    }

    #[tokio::test]
    async fn other_errors_keep_the_token() {
        let (_dir, storage) = crate::storage::tests::temp_storage().await;
        let storage = Arc::new(storage);
        store_access_token(&storage, "abc").await.unwrap();

        let client =
            YoutubeClient::new(serve_status(StatusCode::FORBIDDEN).await, None, storage.clone())
                .unwrap();
        let e = client.list_subscriptions(50, None).await.unwrap_err();

        assert!(e.to_string().contains("403"));
        assert!(has_credentials(&storage).await);
    }
}
