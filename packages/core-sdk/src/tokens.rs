use tiktoken_rs::CoreBPE;

use crate::{
    error::{RelayError, Result},
    models::{ChatMessage, Model},
};

const MULTI_TURN_TOO_LONG: &str =
    "由于开启了连续对话选项，导致本次对话过长，请清除部分内容后重试，或者关闭连续对话选项。";
const SINGLE_TOO_LONG: &str = "太长了，缩短一点吧。";

/** \brief 三个受支持的模型都使用 cl100k 词表。 */
fn bpe_for_model(model: Model) -> &'static CoreBPE {
    match model {
        Model::Gpt35Turbo | Model::Gpt4 | Model::Gpt4_32k => tiktoken_rs::cl100k_base_singleton(),
    }
}

/**
 * \brief 统计单段文本的 token 数。
 */
pub fn count_tokens(model: Model, text: &str) -> usize {
    bpe_for_model(model).encode_with_special_tokens(text).len()
}

/**
 * \brief 统计整段会话内容的 token 总数（只计正文）。
 */
pub fn count_messages(model: Model, messages: &[ChatMessage]) -> usize {
    messages
        .iter()
        .map(|m| count_tokens(model, &m.content))
        .sum()
}

/**
 * \brief 校验会话是否超出上限，返回统计出的 token 数。
 */
pub fn check_budget(model: Model, messages: &[ChatMessage], limit: usize) -> Result<usize> {
    let tokens = count_messages(model, messages);
    if tokens > limit {
        let message = if messages.len() > 1 {
            MULTI_TURN_TOO_LONG
        } else {
            SINGLE_TOO_LONG
        };
        return Err(RelayError::TokenBudget(message.to_string()));
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_count_is_deterministic_and_monotonic() {
        let short = count_tokens(Model::Gpt35Turbo, "hello");
        let again = count_tokens(Model::Gpt35Turbo, "hello");
        let longer = count_tokens(Model::Gpt35Turbo, "hello world, how are you today?");
        assert_eq!(short, again);
        assert!(short > 0);
        assert!(longer > short);
        assert_eq!(count_tokens(Model::Gpt4, ""), 0);
    }

    #[test]
    fn test_models_share_cl100k_counts() {
        let text = "The quick brown fox 跳过了懒狗";
        let expected = tiktoken_rs::cl100k_base_singleton()
            .encode_with_special_tokens(text)
            .len();
        for model in [Model::Gpt35Turbo, Model::Gpt4, Model::Gpt4_32k] {
            assert_eq!(count_tokens(model, text), expected);
        }
    }

    #[test]
    fn test_messages_sum() {
        let msgs = vec![
            ChatMessage::new(Role::System, "You are helpful."),
            ChatMessage::new(Role::User, "hello"),
        ];
        assert_eq!(
            count_messages(Model::Gpt4, &msgs),
            count_tokens(Model::Gpt4, "You are helpful.") + count_tokens(Model::Gpt4, "hello")
        );
    }

    #[test]
    fn test_budget_single_message_too_long() {
        let msgs = vec![ChatMessage::new(Role::User, "one two three four five six")];
        let err = check_budget(Model::Gpt35Turbo, &msgs, 2).unwrap_err();
        assert_eq!(err.to_string(), SINGLE_TOO_LONG);
    }

    #[test]
    fn test_budget_multi_turn_too_long() {
        let msgs = vec![
            ChatMessage::new(Role::User, "one two three"),
            ChatMessage::new(Role::Assistant, "four five six"),
        ];
        let err = check_budget(Model::Gpt35Turbo, &msgs, 2).unwrap_err();
        assert!(matches!(err, RelayError::TokenBudget(_)));
        assert_eq!(err.to_string(), MULTI_TURN_TOO_LONG);
    }

    #[test]
    fn test_budget_at_limit_passes() {
        let msgs = vec![ChatMessage::new(Role::User, "hello")];
        let tokens = count_messages(Model::Gpt35Turbo, &msgs);
        assert_eq!(
            check_budget(Model::Gpt35Turbo, &msgs, tokens).expect("within budget"),
            tokens
        );
    }
}
