//! Success envelope for helm routes

use axum::Json;
use serde::Serialize;

/// `{"data": <payload>}`
#[derive(Debug, Serialize)]
pub struct Data<T> {
    /// Response payload
    pub data: T,
}

/// Wrap a payload in the success envelope
pub fn data<T: Serialize>(payload: T) -> Json<Data<T>> {
    Json(Data { data: payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_payload() {
        let Json(body) = data("OK");
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"data":"OK"}"#);
    }
}
