use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::jobs::TaskName;
use crate::scheduler::TriggerError;

#[derive(Debug, Clone)]
pub struct UnknownTask;

impl IntoResponse for UnknownTask {
    fn into_response(self) -> Response {
        IntoResponse::into_response((
            StatusCode::NOT_FOUND,
            "A task by that name wasn't found",
        ))
    }
}

#[derive(Debug, Clone)]
pub struct TriggerRejected {
    pub name: TaskName,
    pub reason: TriggerError,
}

impl IntoResponse for TriggerRejected {
    fn into_response(self) -> Response {
        let Self { name, reason } = self;

        IntoResponse::into_response((
            StatusCode::CONFLICT,
            format!("Could not start the task `{name}`: {reason}"),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct EmptyAccessToken;

impl IntoResponse for EmptyAccessToken {
    fn into_response(self) -> Response {
        IntoResponse::into_response((StatusCode::BAD_REQUEST, "The access token is empty"))
    }
}

#[derive(Debug, Clone)]
pub struct UnknownChannel {
    pub id: String,
}

impl IntoResponse for UnknownChannel {
    fn into_response(self) -> Response {
        let id = self.id;

        IntoResponse::into_response((
            StatusCode::NOT_FOUND,
            format!("The channel `{id}` is not followed"),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct NotSubscribed {
    pub id: String,
}

impl IntoResponse for NotSubscribed {
    fn into_response(self) -> Response {
        let id = self.id;

        IntoResponse::into_response((
            StatusCode::NOT_FOUND,
            format!("The account is not subscribed to the channel `{id}`"),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct AlreadyFollowed {
    pub id: String,
}

impl IntoResponse for AlreadyFollowed {
    fn into_response(self) -> Response {
        let id = self.id;

        IntoResponse::into_response((
            StatusCode::CONFLICT,
            format!("The channel `{id}` is already followed"),
        ))
    }
}
