use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/**
 * \brief 请求处理链路上的全部错误。
 *
 * 除 `Upstream` 原样透传外，其余错误统一序列化为 `{"error":{"message"}}`。
 */
#[derive(Debug, Error)]
pub enum RelayError {
    /** \brief 访问密码错误，或查询余额时未填写自己的 Key。 */
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Config(String),
    #[error("{0}")]
    TokenBudget(String),
    #[error("今天累计使用超过{limit}次了，请明天再白嫖吧。")]
    QuotaExceeded { limit: u64 },
    /** \brief 额度/日志代理返回非 2xx。 */
    #[error("errorCode : {status}, errorMessage: {message}")]
    Proxy { status: u16, message: String },
    /** \brief 无法连接额度/日志代理。 */
    #[error("{0}")]
    Store(#[source] reqwest::Error),
    /** \brief 模型服务返回非 2xx，状态码与响应体原样透传。 */
    #[error("upstream returned {status}: {body}")]
    Upstream { status: StatusCode, body: String },
    #[error("request to upstream timed out after {0}ms")]
    Timeout(u64),
    #[error("{0}")]
    Network(#[from] reqwest::Error),
    /** \brief 上游 SSE data 帧不是合法 JSON。 */
    #[error("{0}")]
    Stream(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::Upstream { status, .. } => *status,
            RelayError::Timeout(_) | RelayError::Network(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        if let RelayError::Upstream { status, body } = self {
            return (status, Body::from(body)).into_response();
        }
        let status = self.status();
        let body = json!({ "error": { "message": self.to_string() } });
        (status, Json(body)).into_response()
    }
}
