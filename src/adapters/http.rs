use crate::utils::error::{InsidersError, Result};
use reqwest::{header, Client, Response};
use std::time::Duration;

const APP_USER_AGENT: &str = concat!("insiders/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT_SEC: u64 = 30;

/// 建立帶有 Bearer token 的 HTTP 客戶端
pub fn bearer_client(token: &str, accept: &'static str) -> Result<Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(header::ACCEPT, header::HeaderValue::from_static(accept));
    let mut auth = header::HeaderValue::from_str(&format!("Bearer {}", token.trim()))
        .map_err(|_| InsidersError::config("Token contains invalid characters"))?;
    auth.set_sensitive(true);
    headers.insert(header::AUTHORIZATION, auth);

    Ok(Client::builder()
        .user_agent(APP_USER_AGENT)
        .default_headers(headers)
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SEC))
        .connect_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SEC))
        .build()?)
}

pub fn plain_client() -> Result<Client> {
    Ok(Client::builder()
        .user_agent(APP_USER_AGENT)
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SEC * 4))
        .build()?)
}

/// 非 2xx 回應轉成 `ApiError`，並附上回應內容中的訊息
pub async fn check_response(service: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("detail"))
                .map(|m| m.as_str().map(str::to_string).unwrap_or_else(|| m.to_string()))
        })
        .unwrap_or(body);
    Err(InsidersError::api(
        service,
        format!("HTTP {}: {}", status, message.trim()),
    ))
}
