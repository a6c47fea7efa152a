use axum::http::{HeaderMap, header};

/// Bearer-token gate for the `/v1` surface. With no token configured every
/// request passes, which is the local-development default.
#[derive(Clone)]
pub struct ApiAuth {
    token: Option<String>,
}

impl ApiAuth {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    pub fn allows(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.token else {
            return true;
        };

        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|presented| presented == expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn open_when_no_token_configured() {
        assert!(ApiAuth::new(None).allows(&HeaderMap::new()));
    }

    #[test]
    fn requires_matching_bearer_token() {
        let auth = ApiAuth::new(Some("s3cret".to_string()));

        assert!(!auth.allows(&HeaderMap::new()));

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer wrong"),
        );
        assert!(!auth.allows(&headers));

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer s3cret"),
        );
        assert!(auth.allows(&headers));
    }
}
