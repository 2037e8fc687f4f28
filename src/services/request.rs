//! Transport wrapper with centralized session-expiry handling.
//!
//! Every backend call goes through [`request`]: a 401 response shows a
//! transient notice, triggers anonymous re-login, and surfaces as a
//! tagged [`ChatError::Unauthorized`] so the caller can decide whether
//! to abort or let the user retry.

use crate::adapters::{AdapterBundle, HttpRequest, HttpResponse};
use crate::services::chat::ChatError;

const SESSION_EXPIRED_NOTICE: &str = "用户信息失效，正在为您重新获取";
const SESSION_EXPIRED_ERROR: &str = "登录已过期，请稍后重试";
const NOTICE_DURATION_MS: u64 = 5_000;

pub async fn request(
    adapters: &AdapterBundle,
    http_request: HttpRequest,
) -> Result<HttpResponse, ChatError> {
    let response = adapters.transport.send(http_request).await?;

    if response.status == 401 {
        adapters.toast.info(SESSION_EXPIRED_NOTICE, NOTICE_DURATION_MS);
        adapters.auth.sign_in_anonymously().await;
        return Err(ChatError::unauthorized(SESSION_EXPIRED_ERROR));
    }

    Ok(response)
}
