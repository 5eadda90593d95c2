use serde_json::Value;
use storefront_session::ProviderError;

/// Client-side API error.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP {status}: {message}")]
    Server { status: u16, message: String },

    #[error("network: {0}")]
    Network(#[from] reqwest::Error),

    #[error("auth: {0}")]
    Auth(String),

    #[error("decode: {0}")]
    Decode(String),
}

impl ApiError {
    /// Build a server error from a non-2xx response body.
    ///
    /// The backend reports errors under several field names depending on
    /// the service and its version; the first string found wins, and the
    /// raw body is used when none is.
    pub fn from_body(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| {
                ["msg", "message", "error_description", "error"]
                    .iter()
                    .find_map(|k| v.get(*k).and_then(Value::as_str).map(str::to_string))
            })
            .unwrap_or_else(|| body.trim().to_string());
        ApiError::Server { status, message }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<ApiError> for ProviderError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Server { status, message } => ProviderError::Rejected { status, message },
            ApiError::Auth(message) => ProviderError::Rejected {
                status: 401,
                message,
            },
            ApiError::Network(e) => ProviderError::Network(e.to_string()),
            ApiError::Decode(m) => ProviderError::Decode(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_message_fields_in_order() {
        let e = ApiError::from_body(400, r#"{"code":400,"msg":"Invalid login credentials"}"#);
        assert_eq!(e.to_string(), "HTTP 400: Invalid login credentials");

        let e = ApiError::from_body(
            400,
            r#"{"error":"invalid_grant","error_description":"Invalid Refresh Token"}"#,
        );
        assert_eq!(e.to_string(), "HTTP 400: Invalid Refresh Token");

        let e = ApiError::from_body(404, r#"{"message":"No user found","code":"PGRST116"}"#);
        assert_eq!(e.status(), Some(404));
        assert_eq!(e.to_string(), "HTTP 404: No user found");
    }

    #[test]
    fn non_json_body_is_kept() {
        let e = ApiError::from_body(502, "Bad Gateway\n");
        assert_eq!(e.to_string(), "HTTP 502: Bad Gateway");
    }

    #[test]
    fn converts_to_provider_error() {
        let e: ProviderError = ApiError::from_body(422, r#"{"msg":"User already registered"}"#).into();
        assert_eq!(
            e,
            ProviderError::Rejected { status: 422, message: "User already registered".into() }
        );
        let e: ProviderError = ApiError::Decode("bad json".into()).into();
        assert_eq!(e, ProviderError::Decode("bad json".into()));
    }
}
