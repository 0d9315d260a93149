use reqwest::{header::CONTENT_TYPE, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    config::StoreConfig,
    error::{RelayError, Result},
};

/** \brief 代理服务上对应的集合名。 */
pub const COLLECTION_NAME: &str = "chat";

/**
 * \brief 代理服务统一的响应结构。
 */
#[derive(Debug, Deserialize)]
struct ProxyReply {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    message: Option<String>,
}

/**
 * \brief 额度检测与聊天记录代理服务的客户端。
 *
 * 由启动流程显式构造并注入到服务状态中。
 */
#[derive(Debug, Clone)]
pub struct RemoteDb {
    http: reqwest::Client,
    config: StoreConfig,
}

impl RemoteDb {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self { http, config })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /**
     * \brief 查询该地址当天是否已达到免费次数上限。
     */
    pub async fn is_reached_limit(&self, ip: &str) -> Result<bool> {
        let url = format!("{}/api/isReachedLimitCount", self.config.base_url);
        let resp = self
            .http
            .get(url)
            .query(&[("collectionName", COLLECTION_NAME), ("ip", ip)])
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(RelayError::Store)?;
        let reply = read_reply(resp).await?;
        Ok(is_truthy(&reply.data))
    }

    /**
     * \brief 写入一条完成的问答记录。
     */
    pub async fn insert_chat(&self, ip: &str, question: &str, answer: &str) -> Result<()> {
        let url = format!("{}/api/insertChat", self.config.base_url);
        let body = json!({
            "collectionName": COLLECTION_NAME,
            "document": {
                "ip": ip,
                "question": question,
                "answer": answer
            }
        });
        let resp = self
            .http
            .post(url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(&body)
            .send()
            .await
            .map_err(RelayError::Store)?;
        let reply = read_reply(resp).await?;
        if !is_truthy(&reply.data) {
            return Err(RelayError::Validation(format!(
                "插入失败了，快去{}检查下原因吧",
                self.config.base_url
            )));
        }
        Ok(())
    }
}

async fn read_reply(resp: Response) -> Result<ProxyReply> {
    let status = resp.status();
    let text = resp.text().await.map_err(RelayError::Store)?;
    let parsed = serde_json::from_str::<ProxyReply>(&text);
    if !status.is_success() {
        return Err(RelayError::Proxy {
            status: status.as_u16(),
            message: parsed.ok().and_then(|r| r.message).unwrap_or(text),
        });
    }
    parsed.map_err(|err| RelayError::Proxy {
        status: status.as_u16(),
        message: format!("invalid reply: {}", err),
    })
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
