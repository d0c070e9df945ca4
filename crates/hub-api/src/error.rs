//! HTTP rendering of gateway errors

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hub_common::Error;
use tracing::{error, warn};

/// Result type for request handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// A gateway error on its way to the client
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl From<kube::Error> for ApiError {
    fn from(e: kube::Error) -> Self {
        ApiError(e.into())
    }
}

impl ApiError {
    /// HTTP status of the wrapped error
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.0.to_string();

        if status.is_server_error() {
            error!(code = status.as_u16(), error = ?self.0, "request failed");
        } else {
            warn!(code = status.as_u16(), error = %message, "request rejected");
        }

        let body = serde_json::json!({
            "code": status.as_u16(),
            "message": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_common::ForbiddenAction;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn renders_code_and_message() {
        let response = ApiError(Error::Conflict("already exists".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"code": 409, "message": "already exists"})
        );
    }

    #[tokio::test]
    async fn forbidden_actions_travel_in_message() {
        let err = Error::forbidden_actions(vec![ForbiddenAction {
            api_group: String::new(),
            resource: "pods".to_string(),
            namespace: "default".to_string(),
            cluster_wide: false,
            verbs: vec!["create".to_string()],
        }]);
        let response = ApiError(err).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(
            body["message"],
            r#"[{"apiGroup":"","resource":"pods","namespace":"default","clusterWide":false,"verbs":["create"]}]"#
        );
    }

    #[test]
    fn kube_errors_convert() {
        let err: ApiError = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "secrets \"x\" not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        })
        .into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
