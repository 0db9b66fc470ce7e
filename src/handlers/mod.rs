pub mod redirect;
pub mod shorten;
pub mod user_urls;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

pub(crate) fn json_error(status: StatusCode, msg: &str) -> Response {
    (status, Json(serde_json::json!({ "error": msg }))).into_response()
}
