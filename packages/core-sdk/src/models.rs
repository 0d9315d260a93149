use serde::{Deserialize, Serialize};

/**
 * \brief 消息角色。`error` 仅由前端生成，原样转发给上游。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Error,
}

/**
 * \brief 消息结构，与 OpenAI Chat 消息格式对齐。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /** \brief 角色 */
    pub role: Role,
    /** \brief 内容 */
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/**
 * \brief 支持转发的模型。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Model {
    #[default]
    #[serde(rename = "gpt-3.5-turbo-1106", alias = "gpt-3.5-turbo")]
    Gpt35Turbo,
    #[serde(rename = "gpt-4")]
    Gpt4,
    #[serde(rename = "gpt-4-32k")]
    Gpt4_32k,
}

impl Model {
    /** \brief 上游接口使用的模型名。 */
    pub fn as_str(self) -> &'static str {
        match self {
            Model::Gpt35Turbo => "gpt-3.5-turbo-1106",
            Model::Gpt4 => "gpt-4",
            Model::Gpt4_32k => "gpt-4-32k",
        }
    }

    /** \brief 解析模型名，接受 `gpt-3.5-turbo` 别名。 */
    pub fn parse(name: &str) -> Option<Model> {
        match name.trim() {
            "gpt-3.5-turbo" | "gpt-3.5-turbo-1106" => Some(Model::Gpt35Turbo),
            "gpt-4" => Some(Model::Gpt4),
            "gpt-4-32k" => Some(Model::Gpt4_32k),
            _ => None,
        }
    }
}

fn default_temperature() -> f32 {
    0.6
}

/**
 * \brief 聊天接口请求体。
 */
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    /** \brief 会话消息，最后一条为本次提问 */
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /** \brief 调用方自带的 Key，多个以 `;` 分隔 */
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub model: Model,
}

/**
 * \brief 单个 Key 的额度信息，金额单位为美元。
 */
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Billing {
    pub key: String,
    /** \brief 剩余比例，0..1 */
    pub rate: f64,
    pub total_granted: f64,
    pub total_used: f64,
    pub total_available: f64,
}

impl Billing {
    /** \brief 查询失败时使用的零值记录。 */
    pub fn unavailable(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            rate: 0.0,
            total_granted: 0.0,
            total_used: 0.0,
            total_available: 0.0,
        }
    }

    pub fn from_amounts(key: impl Into<String>, total_granted: f64, total_used: f64) -> Self {
        let total_available = total_granted - total_used;
        let rate = if total_granted == 0.0 {
            0.0
        } else {
            total_available / total_granted
        };
        Self {
            key: key.into(),
            rate,
            total_granted,
            total_used,
            total_available,
        }
    }
}
