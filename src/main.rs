//! Plugin Host 命令行入口
//!
//! 插件宿主的命令行工具，用于检查配置和插件目录。
//!
//! # 命令概览
//!
//! - `version` - 显示版本信息
//! - `check-config` - 验证配置文件
//! - `list` - 扫描插件目录并显示解析后的加载顺序
//!
//! # 使用示例
//!
//! ```bash
//! # 检查配置文件
//! plugin-host check-config -c host.yaml
//!
//! # 查看插件加载顺序
//! plugin-host -c host.yaml list
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use plugin_host::plugin::{ArchivePluginLoader, EntryPointTable, PluginEnvironment, PluginLoader};
use plugin_host::{HostConfig, Logger, LoggerConfig, PluginError};

/// Plugin Host - 插件宿主
///
/// 插件依赖解析、隔离加载与分阶段生命周期编排。
#[derive(Parser)]
#[command(name = "plugin-host")]
#[command(version, about = "插件依赖解析与生命周期编排", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "host.yaml", global = true)]
    config: PathBuf,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// 子命令
    #[command(subcommand)]
    command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 查看版本信息
    Version,

    /// 验证配置文件
    ///
    /// 检查配置文件是否有效，并显示解析后的配置内容。
    CheckConfig {
        /// 配置文件路径（不指定则使用全局 -c 选项）
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// 列出插件加载顺序
    ///
    /// 扫描插件目录，解析依赖并按加载顺序显示插件。
    List,
}

/// 打印版本信息
fn print_version() {
    println!();
    println!("Plugin Host - 插件宿主");
    println!("═══════════════════════════════════════");
    println!("  版本:             {}", plugin_host::VERSION);
    println!("  元数据文件:       {}", plugin_host::plugin::METADATA_ENTRIES.join(", "));
    println!();
    println!("构建信息:");
    println!("  目标平台:         {}", std::env::consts::ARCH);
    println!("  操作系统:         {}", std::env::consts::OS);
    println!("═══════════════════════════════════════");
    println!();
}

/// 检查配置文件
async fn check_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("检查配置文件: {}", path.display());
    println!();

    let config = if path.exists() {
        match HostConfig::from_file(path).await {
            Ok(config) => {
                println!("✅ 配置文件有效！");
                config
            }
            Err(e) => {
                println!("❌ 配置文件无效: {}", e);
                return Err(e.into());
            }
        }
    } else {
        println!("⚠️  警告: 配置文件不存在，将使用默认配置");
        HostConfig::default()
    };

    println!();
    println!("配置内容:");
    println!("────────────────────────────────────────");
    println!("  [插件]");
    println!("    插件目录:       {}", config.plugins_dir.display());
    println!("    数据目录:       {}", config.data_dir.display());
    println!("    归档后缀:       {}", config.archive_suffix);
    println!("    事件通道容量:   {}", config.event_capacity);
    println!();
    println!("  [日志配置]");
    println!("    日志级别:       {}", config.logging.level);
    println!("    文件输出:       {}", if config.logging.file_output { "是" } else { "否" });
    println!("    JSON 格式:      {}", if config.logging.json_format { "是" } else { "否" });
    println!("    轮转策略:       {}", config.logging.rotation);
    println!("────────────────────────────────────────");
    Ok(())
}

/// 列出插件加载顺序
async fn list_plugins(config: &HostConfig) -> Result<(), PluginError> {
    let env = PluginEnvironment::from_config(config);
    let loader = ArchivePluginLoader::from_config(config, env, EntryPointTable::new());
    let order = loader.list_descriptions().await?;

    println!();
    println!("插件加载顺序 ({})", config.plugins_dir.display());
    println!("═══════════════════════════════════════");
    if order.is_empty() {
        println!("  （没有发现插件）");
    }
    for (index, description) in order.iter().enumerate() {
        println!(
            "  {:>3}. {} [{}] 入口: {}",
            index + 1,
            description,
            description.kind(),
            description.entry_point()
        );
        for dependency in description.dependencies() {
            let marker = if dependency.optional { "可选" } else { "必需" };
            println!("         └─ {} ({})", dependency.name, marker);
        }
    }
    println!("═══════════════════════════════════════");
    println!();
    Ok(())
}

/// 加载配置文件，不存在时使用默认配置
async fn load_config(path: &Path) -> Result<HostConfig, PluginError> {
    if path.exists() {
        HostConfig::from_file(path).await
    } else {
        Ok(HostConfig::default())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => print_version(),

        Commands::CheckConfig { config } => {
            let path = config.unwrap_or(cli.config);
            check_config(&path).await?;
        }

        Commands::List => {
            let config = load_config(&cli.config).await?;
            let mut logger = LoggerConfig::from_log_config(&config.logging);
            if let Some(level) = cli.log_level {
                logger.level = level;
            }
            let _guard = Logger::init(logger)?;
            info!(config = %cli.config.display(), "已加载配置");

            if let Err(e) = list_plugins(&config).await {
                eprintln!("❌ [{}] {}", e.error_code(), e);
                return Err(e.into());
            }
        }
    }

    Ok(())
}
