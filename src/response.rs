use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Success envelope shared by all handlers.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub status_code: u16,
    pub data: T,
    pub message: String,
    pub success: bool,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status: StatusCode, data: T, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            data,
            message: message.into(),
            success: status.is_success(),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_status_and_success() {
        let envelope = ApiResponse::new(
            StatusCode::CREATED,
            serde_json::json!({ "username": "alice" }),
            "user registered successfully",
        );
        let value = serde_json::to_value(&envelope).expect("serialize envelope");
        assert_eq!(value["statusCode"], 201);
        assert_eq!(value["data"]["username"], "alice");
        assert_eq!(value["message"], "user registered successfully");
        assert_eq!(value["success"], true);
    }

    #[test]
    fn envelope_response_uses_its_status() {
        let response =
            ApiResponse::new(StatusCode::CREATED, serde_json::json!({}), "created").into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
