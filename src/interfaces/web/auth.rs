use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use sha2::{Digest, Sha256};

use super::AppState;

/// Check `X-Secret-Key` against the process secret. Digest comparison keeps
/// the check constant-time regardless of key length.
pub async fn require_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let presented = req
        .headers()
        .get("X-Secret-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if constant_time_eq(presented, &state.config.secret_key) {
        next.run(req).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "message": "Unauthorized - Invalid or missing API key"
            })),
        )
            .into_response()
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    Sha256::digest(a.as_bytes()) == Sha256::digest(b.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_comparison_matches_only_equal_keys() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "secre"));
        assert!(!constant_time_eq("", "secret"));
        assert!(constant_time_eq("", ""));
    }
}
