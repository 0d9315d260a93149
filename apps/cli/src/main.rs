use std::{io::Write, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;

use chatrelay_core_sdk::{
    billing, commands,
    config::Config,
    llm::{OpenAiClient, StreamEvent},
    models::{ChatMessage, Model, Role},
    server, telemetry,
};

/**
 * \brief CLI 程序入口。
 */
#[derive(Parser, Debug)]
#[command(name = "chatrelay", version, about = "Chat relay with daily quota and billing lookup")]
struct Cli {
    /** \brief 日志目录，未设置时仅输出到控制台。 */
    #[arg(long, env = "CHATRELAY_LOG_DIR", global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 启动 HTTP 服务。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:3000")]
        addr: String,
    },

    /**
     * \brief 查询一个或多个 Key 的余额，多个以 `;` 分隔。
     */
    Billing {
        #[arg(long)]
        keys: String,
    },

    /**
     * \brief 使用服务端 Key 发送一条消息并流式显示回复。
     */
    Chat {
        #[arg(long)]
        prompt: String,
        #[arg(long, default_value = "gpt-3.5-turbo-1106")]
        model: String,
        #[arg(long, default_value_t = 0.6)]
        temperature: f32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    telemetry::init(cli.log_dir.as_deref()).context("init logging failed")?;

    let config = Config::from_env();

    match cli.command {
        Commands::Serve { addr } => {
            server::run(&addr, config).await?;
        }
        Commands::Billing { keys } => {
            let keys = commands::split_keys(&keys);
            if keys.is_empty() {
                bail!("no key given, pass --keys \"sk-...;sk-...\"");
            }
            let client = OpenAiClient::from_config(&config).context("build client failed")?;
            let billings = billing::fetch_billings(&client, &keys).await;
            print!("{}", billing::render_table(&billings));
        }
        Commands::Chat {
            prompt,
            model,
            temperature,
        } => {
            let model = Model::parse(&model).with_context(|| format!("unknown model: {}", model))?;
            let keys = commands::split_keys(&config.api_key);
            let api_key = commands::random_key(&keys)?.to_string();
            let client = OpenAiClient::from_config(&config).context("build client failed")?;
            let messages = vec![ChatMessage::new(Role::User, prompt)];

            let mut stream = client
                .stream_chat(&api_key, model, temperature, &messages)
                .await
                .context("create stream failed")?;

            while let Some(event) = stream
                .as_mut()
                .next()
                .await
                .transpose()
                .context("stream error")?
            {
                match event {
                    StreamEvent::Delta(delta) => {
                        print!("{}", delta);
                        std::io::stdout().flush().ok();
                    }
                    StreamEvent::Done => break,
                }
            }
            println!();
        }
    }

    Ok(())
}
