use rand::seq::SliceRandom;

use crate::error::{RelayError, Result};

pub const QUERY_OWN_KEYS_PREFIX: &str = "查询填写的 Key 的余额";
pub const KEY_PREFIX: &str = "sk-";
/** \brief 遗留的测试语句，命中后直接把原文作为错误返回。 */
pub const ECHO_SENTENCE: &str = "Please tell me what is ChatGPT in English with at most 20 words";

const KEY_DELIMITER: char = ';';

/**
 * \brief 在转发前拦截的指令。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /** \brief 查询请求中填写的 Key 的余额。 */
    QueryOwnKeys,
    /** \brief 消息本身就是一个或多个 Key，查询它们的余额。 */
    QueryKeys(Vec<String>),
    /** \brief 把原文作为错误返回。 */
    Echo(String),
}

type Matcher = fn(&str) -> Option<Command>;

fn match_query_own_keys(content: &str) -> Option<Command> {
    content
        .starts_with(QUERY_OWN_KEYS_PREFIX)
        .then_some(Command::QueryOwnKeys)
}

fn match_literal_keys(content: &str) -> Option<Command> {
    content
        .starts_with(KEY_PREFIX)
        .then(|| Command::QueryKeys(split_keys(content)))
}

fn match_echo(content: &str) -> Option<Command> {
    content
        .starts_with(ECHO_SENTENCE)
        .then(|| Command::Echo(content.to_string()))
}

/** \brief 按顺序匹配，先命中者生效。 */
const COMMANDS: [Matcher; 3] = [match_query_own_keys, match_literal_keys, match_echo];

/**
 * \brief 解析最后一条消息；返回 None 表示正常转发给模型。
 */
pub fn resolve(last_content: &str) -> Option<Command> {
    let content = last_content.trim();
    COMMANDS.iter().find_map(|matcher| matcher(content))
}

/**
 * \brief 按 `;` 拆分 Key 列表，去掉空白与空项。
 */
pub fn split_keys(keys: &str) -> Vec<String> {
    keys.split(KEY_DELIMITER)
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/**
 * \brief 从候选 Key 中随机选取一个。
 */
pub fn random_key(keys: &[String]) -> Result<&str> {
    keys.choose(&mut rand::thread_rng())
        .map(String::as_str)
        .ok_or_else(|| {
            RelayError::Config("没有填写 OpenAI API key，或者 key 填写错误。".to_string())
        })
}
