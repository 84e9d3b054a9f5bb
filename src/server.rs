mod responses;
mod routes;

use std::future::Future;

use anyhow::{anyhow, Context, Result};
use axum::Router;
use reqwest::StatusCode;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, TraceLayer};
use tracing::{error, info, Level};

use crate::state::State;

async fn convert_errors<F, R>(fut: F) -> axum::response::Result<R>
where
    F: Future<Output = Result<R>>,
{
    match fut.await {
        Ok(r) => Ok(r),

        Err(e) => {
            error!("Error occurred while processing an HTTP request: {e:#}");

            Err(StatusCode::INTERNAL_SERVER_ERROR.into())
        }
    }
}

pub struct Server {
    socket: TcpListener,
    app: Router,
}

fn make_router(state: State) -> Router {
    use axum::routing::{get, post, put};

    Router::new()
        .route("/tasks", get(routes::list_tasks))
        .route("/tasks/:name/update", post(routes::update_task))
        .route("/subscriptions", get(routes::list_subscriptions))
        .route("/channels", get(routes::list_channels))
        .route("/channels/:id", post(routes::follow_channel))
        .route("/channels/:id/videos", get(routes::list_channel_videos))
        .route("/videos", get(routes::list_videos))
        .route(
            "/credentials",
            put(routes::store_credentials).delete(routes::clear_credentials),
        )
        .layer(
            ServiceBuilder::new().layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_request(DefaultOnRequest::new().level(Level::INFO)),
            ),
        )
        .with_state(state)
}

impl Server {
    pub async fn new(state: State) -> Result<Self> {
        let bind_addr = &state.cfg.bind_addr;
        let socket = TcpListener::bind(bind_addr)
            .await
            .with_context(|| anyhow!("could not bind to `{bind_addr}`"))?;
        info!("Listening on {bind_addr}");

        Ok(Self {
            socket,
            app: make_router(state),
        })
    }

    pub async fn serve(self, cancel: CancellationToken) -> Result<()> {
        axum::serve(self.socket, self.app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .context("the HTTP server encountered a failure")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{self, Body};
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::jobs::{JobError, TaskName};
    use crate::scheduler::{Scheduler, TaskHandle, TaskSchedule, Work};
    use crate::storage::entities::SubscriptionRecord;
    use crate::storage::tests::temp_storage;

    struct Unconfigured;

    impl Work for Unconfigured {
        async fn is_configured(&self) -> Result<bool> {
            Ok(false)
        }

        async fn run(&mut self, _cancel: &CancellationToken) -> Result<(), JobError> {
            Ok(())
        }
    }

    async fn test_state() -> (TempDir, Scheduler, TaskHandle, State) {
        let (dir, storage) = temp_storage().await;
        let storage = Arc::new(storage);
        let mut scheduler = Scheduler::new(storage.clone(), CancellationToken::new());
        let schedule = TaskSchedule {
            interval: Duration::from_secs(86400),
            overdue_delay: Duration::from_secs(60),
        };
        let handle = scheduler
            .start(TaskName::SubscriptionSync.as_str(), schedule, Unconfigured)
            .await
            .unwrap();

        let state = State {
            storage,
            cfg: Arc::new(Config::default()),
            tasks: Arc::new(HashMap::from([(TaskName::SubscriptionSync, handle.clone())])),
        };

        (dir, scheduler, handle, state)
    }

    async fn call(state: &State, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();

        send(state, request).await
    }

    async fn send(state: &State, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = make_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        (status, body.to_vec())
    }

    async fn call_json(state: &State, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let (status, body) = call(state, method, uri).await;

        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn triggering_a_registered_task_is_accepted() {
        let (_dir, _scheduler, _handle, state) = test_state().await;
        let (status, body) = call(&state, "POST", "/tasks/SubscriptionSync/update").await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, b"Updating subscriptions");
    }

    #[tokio::test]
    async fn unknown_task_names_are_not_found() {
        let (_dir, _scheduler, _handle, state) = test_state().await;

        for uri in ["/tasks/Nope/update", "/tasks/ChannelFeedSync/update"] {
            let (status, body) = call(&state, "POST", uri).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body, b"A task by that name wasn't found");
        }
    }

    #[tokio::test]
    async fn stopped_tasks_reject_triggers() {
        let (_dir, _scheduler, handle, state) = test_state().await;
        handle.stop();

        let (status, body) = call(&state, "POST", "/tasks/SubscriptionSync/update").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(String::from_utf8(body).unwrap().contains("stopped"));
    }

    #[tokio::test]
    async fn tasks_are_listed_with_their_state() {
        let (_dir, _scheduler, _handle, state) = test_state().await;
        let (status, tasks) = call_json(&state, "GET", "/tasks").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(tasks[0]["name"], "SubscriptionSync");
        assert_eq!(tasks[0]["state"], "idle");
        assert_eq!(tasks[0]["interval"], "1d");
        assert_eq!(tasks[0]["update_url"], "/tasks/SubscriptionSync/update");
        assert_eq!(tasks.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn subscribed_channels_can_be_followed_once() {
        let (_dir, _scheduler, _handle, state) = test_state().await;

        {
            let mut tx = state.storage.begin().await.unwrap();
            tx.insert_subscription(&SubscriptionRecord {
                id: "UC1".into(),
                name: "Channel 1".into(),
                description: "About".into(),
            })
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }

        let (status, subscriptions) = call_json(&state, "GET", "/subscriptions").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(subscriptions[0]["followed"], false);

        let (status, channel) = call_json(&state, "POST", "/channels/UC1").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(channel["name"], "Channel 1");
        assert_eq!(channel["last_checked_at"], "1970-01-01T00:00:00Z");
        assert_eq!(channel["videos_url"], "/channels/UC1/videos");

        let (status, _) = call(&state, "POST", "/channels/UC1").await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&state, "POST", "/channels/UC2").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, subscriptions) = call_json(&state, "GET", "/subscriptions").await;
        assert_eq!(subscriptions[0]["followed"], true);

        let (_, channels) = call_json(&state, "GET", "/channels").await;
        assert_eq!(channels.as_array().unwrap().len(), 1);
    }

    async fn put_credentials(state: &State, body: &str) -> StatusCode {
        let request = Request::builder()
            .method("PUT")
            .uri("/credentials")
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap();

        send(state, request).await.0
    }

    #[tokio::test]
    async fn handed_over_tokens_set_the_account_up() {
        let (_dir, _scheduler, _handle, state) = test_state().await;

        assert_eq!(
            put_credentials(&state, r#"{"access_token": " "}"#).await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            put_credentials(&state, r#"{"token": "abc"}"#).await,
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert!(!state.storage.begin().await.unwrap().has_credentials().await.unwrap());

        assert_eq!(
            put_credentials(&state, r#"{"access_token": "abc"}"#).await,
            StatusCode::NO_CONTENT
        );

        let mut tx = state.storage.begin().await.unwrap();
        let credential = tx.get_credential("user").await.unwrap().unwrap();
        assert_eq!(credential.source_type, "token");
        assert_eq!(credential.data, r#"{"access_token":"abc"}"#);
    }

    #[tokio::test]
    async fn signing_out_clears_the_credentials() {
        let (_dir, _scheduler, _handle, state) = test_state().await;

        {
            let mut tx = state.storage.begin().await.unwrap();
            tx.store_credential("user", "token", "{}").await.unwrap();
            tx.commit().await.unwrap();
        }

        let (status, _) = call(&state, "DELETE", "/credentials").await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let mut tx = state.storage.begin().await.unwrap();
        assert!(!tx.has_credentials().await.unwrap());
    }

    #[tokio::test]
    async fn videos_of_unknown_channels_are_not_found() {
        let (_dir, _scheduler, _handle, state) = test_state().await;

        let (status, _) = call(&state, "GET", "/channels/UC1/videos").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, videos) = call_json(&state, "GET", "/videos").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(videos, serde_json::json!([]));
    }
}
