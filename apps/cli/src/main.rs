use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use clawbox_core_sdk::{
    config::{ConfigStore, DEFAULT_CONFIG_FILE},
    llm::ChatDispatcher,
    providers,
    relay::AuxRelay,
    server::{self, AppState},
};

/**
 * \brief CLI 程序入口：默认启动本地服务。
 */
#[derive(Parser, Debug)]
#[command(name = "clawbox", version, about = "ClawBox local AI relay")]
struct Cli {
    /** \brief 配置文件路径 */
    #[arg(long, global = true, env = "CLAWBOX_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /** \brief 监听地址，默认仅本机；云端部署时可设为 0.0.0.0 */
    #[arg(long, global = true, env = "HOST", default_value = "127.0.0.1")]
    host: IpAddr,

    #[arg(long, global = true, env = "PORT", default_value_t = 3000)]
    port: u16,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 启动本地 HTTP 服务并提供前端页面。
     */
    Serve,

    /**
     * \brief 使用已保存的配置发送一条消息并打印回复。
     */
    Chat {
        #[arg(long)]
        prompt: String,
    },

    /**
     * \brief 列出内置的服务商与默认模型。
     */
    Providers,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let store = ConfigStore::load(&cli.config);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let state = AppState::new(store, ChatDispatcher::from_env(), AuxRelay::from_env());
            server::run(SocketAddr::new(cli.host, cli.port), state).await?;
        }
        Commands::Chat { prompt } => {
            let config = store.snapshot();
            let reply = ChatDispatcher::from_env()
                .dispatch(&config, &prompt)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))
                .context("chat failed")?;
            println!("{}", reply.unwrap_or_default());
        }
        Commands::Providers => {
            let current = providers::resolve(&store.snapshot().api_provider).id;
            for p in providers::catalog() {
                println!(
                    "{} {:<11} {:<18} default={} tools={}",
                    if p.id == current { "*" } else { " " },
                    p.id,
                    p.family.as_str(),
                    p.default_model,
                    if p.supports_tools { "yes" } else { "no" }
                );
            }
        }
    }

    Ok(())
}
