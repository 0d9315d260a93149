use std::cmp::Ordering;

use futures_util::future::join_all;
use time::{macros::format_description, Duration, OffsetDateTime};

use crate::{llm::OpenAiClient, models::Billing, telemetry};

const USAGE_WINDOW_DAYS: i64 = 90;

/**
 * \brief 用量查询的起止日期：过去 90 天到明天，容忍时钟偏差。
 */
pub fn usage_window(now: OffsetDateTime) -> (String, String) {
    let format = format_description!("[year]-[month]-[day]");
    let start = now - Duration::days(USAGE_WINDOW_DAYS);
    let end = now + Duration::days(1);
    (
        start.format(&format).unwrap_or_default(),
        end.format(&format).unwrap_or_default(),
    )
}

/**
 * \brief 查询单个 Key 的额度；任何失败都返回零值记录。
 */
pub async fn fetch_billing(client: &OpenAiClient, key: &str) -> Billing {
    let (start, end) = usage_window(OffsetDateTime::now_utc());
    let granted = match client.fetch_subscription(key).await {
        Ok(v) => v,
        Err(err) => {
            telemetry::log_error(
                "billing",
                &format!("key={} {}", telemetry::mask_key(key), err),
            );
            return Billing::unavailable(key);
        }
    };
    let used = match client.fetch_usage(key, &start, &end).await {
        Ok(v) => v,
        Err(err) => {
            telemetry::log_error(
                "billing",
                &format!("key={} {}", telemetry::mask_key(key), err),
            );
            return Billing::unavailable(key);
        }
    };
    Billing::from_amounts(key, granted, used)
}

/**
 * \brief 并发查询多个 Key，结果顺序与输入一致。
 */
pub async fn fetch_billings(client: &OpenAiClient, keys: &[String]) -> Vec<Billing> {
    join_all(keys.iter().map(|k| fetch_billing(client, k))).await
}

fn compare(a: &Billing, b: &Billing) -> Ordering {
    match (a.total_granted == 0.0, b.total_granted == 0.0) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => b.rate.partial_cmp(&a.rate).unwrap_or(Ordering::Equal),
    }
}

/**
 * \brief 渲染额度表：不可用的 Key 排在最前，其余按剩余比例降序。
 */
pub fn render_table(billings: &[Billing]) -> String {
    let mut sorted = billings.to_vec();
    sorted.sort_by(compare);

    let rows = sorted
        .iter()
        .map(|b| {
            let key: String = b.key.chars().take(8).collect();
            if b.total_granted == 0.0 {
                format!("| {} | 不可用 | —— | —— |", key)
            } else {
                format!(
                    "| {} | {:.4}({:.1}%) | {:.4} | {} |",
                    key,
                    b.total_available,
                    b.rate * 100.0,
                    b.total_used,
                    b.total_granted
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "| Key  | 剩余 | 已用 | 总额度 |\n| ---- | ---- | ---- | ------ |\n{}\n",
        rows
    )
}
