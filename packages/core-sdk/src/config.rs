use std::{collections::HashMap, time::Duration};

use anyhow::{anyhow, Result};

use crate::{models::Model, telemetry};

const DEFAULT_BASE_URL: &str = "api.openai.com";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_TOTAL_COUNT: u64 = 20;

/**
 * \brief 各模型允许的最大输入 token 数。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLimits {
    pub gpt35_turbo: usize,
    pub gpt4: usize,
    pub gpt4_32k: usize,
}

impl Default for TokenLimits {
    fn default() -> Self {
        Self {
            gpt35_turbo: 3072,
            gpt4: 6144,
            gpt4_32k: 24576,
        }
    }
}

impl TokenLimits {
    /** \brief 所有模型使用同一个上限。 */
    pub fn uniform(limit: usize) -> Self {
        Self {
            gpt35_turbo: limit,
            gpt4: limit,
            gpt4_32k: limit,
        }
    }

    pub fn get(&self, model: Model) -> usize {
        match model {
            Model::Gpt35Turbo => self.gpt35_turbo,
            Model::Gpt4 => self.gpt4,
            Model::Gpt4_32k => self.gpt4_32k,
        }
    }

    fn set(&mut self, model: Model, limit: usize) {
        match model {
            Model::Gpt35Turbo => self.gpt35_turbo = limit,
            Model::Gpt4 => self.gpt4 = limit,
            Model::Gpt4_32k => self.gpt4_32k = limit,
        }
    }

    /**
     * \brief 解析 `MAX_INPUT_TOKENS`：整数作用于全部模型，否则按 JSON 对象覆盖默认值。
     */
    pub fn parse_override(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if let Ok(limit) = raw.parse::<usize>() {
            return Ok(Self::uniform(limit));
        }
        let map: HashMap<String, usize> = serde_json::from_str(raw)?;
        let mut limits = Self::default();
        for (name, limit) in map {
            let model = Model::parse(&name).ok_or_else(|| anyhow!("unknown model: {}", name))?;
            limits.set(model, limit);
        }
        Ok(limits)
    }
}

/**
 * \brief 额度检测与聊天记录代理服务的地址和鉴权信息。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

/**
 * \brief 服务配置，启动时从环境变量读取一次。
 */
#[derive(Debug, Clone)]
pub struct Config {
    /** \brief 服务端内置 Key，多个以 `;` 分隔 */
    pub api_key: String,
    /** \brief 模型服务基地址，含协议，不含末尾 `/` */
    pub base_url: String,
    /** \brief 未配置时跳过额度检测与聊天记录 */
    pub store: Option<StoreConfig>,
    pub timeout: Duration,
    /** \brief 每日免费次数，仅用于提示文案，实际计数在代理服务上 */
    pub total_count: u64,
    pub max_input_tokens: TokenLimits,
    pub password: Option<String>,
    /** \brief 是否信任 X-Forwarded-For / X-Real-IP，仅在前置可信反向代理时开启 */
    pub trust_proxy_headers: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: normalize_base_url(DEFAULT_BASE_URL),
            store: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            total_count: DEFAULT_TOTAL_COUNT,
            max_input_tokens: TokenLimits::default(),
            password: None,
            trust_proxy_headers: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /**
     * \brief 通过任意查找函数构造配置，空字符串视为未设置。
     */
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let base_url = if get("NOGFW").is_some() {
            DEFAULT_BASE_URL.to_string()
        } else {
            get("OPENAI_API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
        };

        let store = get("MONGO_DB_PROXY_URL").map(|url| StoreConfig {
            base_url: url.trim().trim_end_matches('/').to_string(),
            username: lookup("MONGO_DB_PROXY_URL_USER_NAME").unwrap_or_default(),
            password: lookup("MONGO_DB_PROXY_URL_PASS_WORD").unwrap_or_default(),
        });

        let timeout_ms = get("TIMEOUT")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        let total_count = get("TOTAL_COUNT")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_TOTAL_COUNT);

        let max_input_tokens = match get("MAX_INPUT_TOKENS") {
            Some(raw) => TokenLimits::parse_override(&raw).unwrap_or_else(|err| {
                telemetry::log_error(
                    "config",
                    &format!("Error parsing MAX_INPUT_TOKENS: {}", err),
                );
                TokenLimits::default()
            }),
            None => TokenLimits::default(),
        };

        Self {
            api_key: lookup("OPENAI_API_KEY").unwrap_or_default(),
            base_url: normalize_base_url(&base_url),
            store,
            timeout: Duration::from_millis(timeout_ms),
            total_count,
            max_input_tokens,
            password: get("PASSWORD"),
            trust_proxy_headers: get("TRUST_PROXY_HEADERS").is_some_and(|v| parse_flag(&v)),
        }
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/**
 * \brief 未带协议的地址默认使用 https。
 */
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}
