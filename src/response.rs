//! Standard response envelope: `{"data": ..., "meta": ...}`.

use crate::dsl::Verb;
use crate::service::CallOutput;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
pub struct SuccessOne<T> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[derive(Serialize)]
pub struct SuccessMany<T> {
    pub data: Vec<T>,
    pub meta: MetaCount,
}

#[derive(Serialize)]
pub struct MetaCount {
    /// Items in this page.
    pub count: u64,
    /// Matches in storage before paging.
    pub total: u64,
}

pub fn success_one<T: Serialize>(status: StatusCode, data: T) -> (StatusCode, Json<SuccessOne<T>>) {
    (status, Json(SuccessOne { data, meta: None }))
}

pub fn success_many<T: Serialize>(data: Vec<T>, total: u64) -> (StatusCode, Json<SuccessMany<T>>) {
    let count = data.len() as u64;
    (
        StatusCode::OK,
        Json(SuccessMany {
            data,
            meta: MetaCount { count, total },
        }),
    )
}

/// Wrap a call result using the verb's success status. 204 is only used when there is no body.
pub fn render(verb: Verb, out: CallOutput) -> Response {
    let status = verb.success_status();
    let with_body = if status == StatusCode::NO_CONTENT { StatusCode::OK } else { status };
    match out {
        CallOutput::Entity(v) | CallOutput::Custom(v) => success_one(with_body, v).into_response(),
        CallOutput::List { items, total } => success_many(items, total).into_response(),
        CallOutput::Empty if status == StatusCode::NO_CONTENT => StatusCode::NO_CONTENT.into_response(),
        CallOutput::Empty => success_one(status, Value::Null).into_response(),
    }
}
