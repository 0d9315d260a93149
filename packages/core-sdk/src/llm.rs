use std::{pin::Pin, time::Duration};

use anyhow::anyhow;
use async_stream::try_stream;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

use crate::{
    config::Config,
    error::{RelayError, Result},
    models::{ChatMessage, Model},
    sse::{SseDecoder, SseEvent},
};

const DONE_SENTINEL: &str = "[DONE]";

/**
 * \brief 上游流中的一个事件：增量文本，或结束标记。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done,
}

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/**
 * \brief OpenAI 兼容接口的客户端，内部连接池可安全克隆共享。
 */
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.base_url.clone(), config.timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /**
     * \brief 发起流式对话请求。
     *
     * 超时只约束等待响应头的阶段；非 2xx 响应以 `RelayError::Upstream` 原样返回。
     */
    pub async fn stream_chat(
        &self,
        api_key: &str,
        model: Model,
        temperature: f32,
        messages: &[ChatMessage],
    ) -> Result<DeltaStream> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": model.as_str(),
            "messages": messages,
            "temperature": temperature,
            "stream": true
        });

        let send = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .bearer_auth(api_key)
            .json(&body)
            .send();
        let resp = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| RelayError::Timeout(self.timeout.as_millis() as u64))??;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::Upstream { status, body });
        }

        Ok(reframe(resp.bytes_stream()))
    }

    /**
     * \brief 查询订阅额度（美元）。
     */
    pub async fn fetch_subscription(&self, api_key: &str) -> anyhow::Result<f64> {
        let url = format!("{}/v1/dashboard/billing/subscription", self.base_url);
        let v: Value = self
            .http
            .get(url)
            .header(CONTENT_TYPE, "application/json")
            .bearer_auth(api_key)
            .send()
            .await?
            .json()
            .await?;
        if let Some(message) = v.pointer("/error/message").and_then(Value::as_str) {
            return Err(anyhow!("subscription query failed: {}", message));
        }
        v.get("hard_limit_usd")
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow!("unexpected subscription payload: {}", v))
    }

    /**
     * \brief 查询区间内已用金额（美元），日期格式为 `YYYY-MM-DD`。
     */
    pub async fn fetch_usage(
        &self,
        api_key: &str,
        start_date: &str,
        end_date: &str,
    ) -> anyhow::Result<f64> {
        let url = format!("{}/v1/dashboard/billing/usage", self.base_url);
        let v: Value = self
            .http
            .get(url)
            .query(&[("start_date", start_date), ("end_date", end_date)])
            .header(CONTENT_TYPE, "application/json")
            .bearer_auth(api_key)
            .send()
            .await?
            .json()
            .await?;
        if let Some(message) = v.pointer("/error/message").and_then(Value::as_str) {
            return Err(anyhow!("usage query failed: {}", message));
        }
        let cents = v
            .get("total_usage")
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow!("unexpected usage payload: {}", v))?;
        Ok(cents / 100.0)
    }
}

/**
 * \brief 把上游字节流重组为增量文本流。
 *
 * 遇到 `[DONE]` 产出 `StreamEvent::Done` 后结束；data 帧不是合法 JSON 时以错误结束。
 */
pub fn reframe<S, E>(body: S) -> DeltaStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<RelayError> + Send + 'static,
{
    let out = try_stream! {
        let mut body = Box::pin(body);
        let mut decoder = SseDecoder::new();
        'read: while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(Into::<RelayError>::into)?;
            for event in decoder.feed(&chunk) {
                let SseEvent::Frame { data, .. } = event else {
                    continue;
                };
                if data == DONE_SENTINEL {
                    yield StreamEvent::Done;
                    break 'read;
                }
                if let Some(delta) = parse_delta(&data)? {
                    yield StreamEvent::Delta(delta);
                }
            }
        }
    };
    Box::pin(out)
}

/**
 * \brief 解析 data 帧，取出 `choices[0].delta.content`。
 */
pub fn parse_delta(data: &str) -> Result<Option<String>> {
    let v: Value = serde_json::from_str(data)?;
    Ok(v.pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string()))
}
