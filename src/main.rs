//! Chips Loader 命令行入口
//!
//! 薯片模块加载器的命令行工具，用于检查配置和离线验证模块依赖图。
//!
//! # 命令概览
//!
//! - `version` - 显示版本信息
//! - `check-config` - 验证配置文件
//! - `resolve` - 解析模块清单，输出初始化顺序
//!
//! # 使用示例
//!
//! ```bash
//! # 检查配置文件
//! chips-loader check-config -c loader.yaml
//!
//! # 解析模块清单
//! chips-loader resolve modules.yaml
//!
//! # 查看版本
//! chips-loader version
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use chips_loader::{
    DependencyResolver, LoaderConfig, Logger, LoggerConfig, ModuleDeclaration,
};

/// Chips Loader - 薯片模块加载器
#[derive(Parser)]
#[command(name = "chips-loader")]
#[command(version, about = "薯片模块加载器", long_about = None)]
#[command(author = "Chips Team")]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "loader.yaml", global = true)]
    config: PathBuf,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

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

    /// 解析模块清单
    ///
    /// 读取 YAML 或 JSON 格式的模块声明列表，校验依赖并输出初始化顺序。
    Resolve {
        /// 清单文件路径
        manifest: PathBuf,

        /// 以 JSON 输出结果
        #[arg(long)]
        json: bool,
    },
}

/// 检查配置文件
async fn check_config(path: &Path) -> anyhow::Result<()> {
    println!("检查配置文件: {}", path.display());
    println!();

    let config = if path.exists() {
        let config = LoaderConfig::from_file(path)
            .await
            .with_context(|| format!("配置文件无效: {}", path.display()))?;
        println!("✅ 配置文件有效！");
        config
    } else {
        println!("⚠️  警告: 配置文件不存在，将使用默认配置");
        LoaderConfig::default()
    };

    println!();
    println!("配置内容:");
    println!("────────────────────────────────────────");
    println!("  [调用注册表]");
    println!("    挂起调用超时:   {} ms", config.registry.call_timeout_ms);
    println!("    重复注册策略:   {:?}", config.registry.replace_policy);
    println!();
    println!("  [日志配置]");
    println!("    日志级别:       {}", config.logging.level);
    println!("    文件输出:       {}", if config.logging.file_output { "是" } else { "否" });
    println!("    JSON 格式:      {}", if config.logging.json_format { "是" } else { "否" });
    println!("    轮转策略:       {}", config.logging.rotation);
    println!();
    println!("  [模块配置]");
    match config.modules.enabled_pref_path {
        Some(ref p) => println!("    启用偏好文件:   {}", p.display()),
        None => println!("    启用偏好文件:   （未设置，启用全部模块）"),
    }
    println!();
    println!("  [其他]");
    println!("    开发模式:       {}", if config.dev_mode { "是" } else { "否" });
    println!("────────────────────────────────────────");
    Ok(())
}

/// 读取模块清单
async fn read_manifest(path: &Path) -> anyhow::Result<Vec<ModuleDeclaration>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取清单文件: {}", path.display()))?;

    let declarations: Vec<ModuleDeclaration> =
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

    for decl in &declarations {
        decl.validate()?;
    }
    debug!(count = declarations.len(), "读取模块清单");
    Ok(declarations)
}

/// 解析模块清单
async fn resolve(path: &Path, json: bool) -> anyhow::Result<()> {
    let declarations = read_manifest(path).await?;
    let order = DependencyResolver::new().resolve_names(&declarations)?;
    info!(modules = order.len(), "依赖解析完成");

    if json {
        println!("{}", serde_json::to_string_pretty(&order)?);
        return Ok(());
    }

    println!("初始化顺序:");
    println!("────────────────────────────────────────");
    for (i, name) in order.iter().enumerate() {
        let decl = declarations.iter().find(|d| &d.name == name);
        let soft = decl
            .map(|d| d.soft_dependencies.join(", "))
            .unwrap_or_default();
        if soft.is_empty() {
            println!("  {:>3}. {}", i + 1, name);
        } else {
            println!("  {:>3}. {}  (软依赖: {})", i + 1, name, soft);
        }
    }
    println!("────────────────────────────────────────");
    Ok(())
}

/// 打印版本信息
fn print_version() {
    println!();
    println!("Chips Loader - 薯片模块加载器");
    println!("═══════════════════════════════════════");
    println!("  版本:             {}", chips_loader::VERSION);
    println!();
    println!("构建信息:");
    println!("  目标平台:         {}", std::env::consts::ARCH);
    println!("  操作系统:         {}", std::env::consts::OS);
    println!("═══════════════════════════════════════");
    println!();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _guard = Logger::try_init(LoggerConfig::default().with_level(&cli.log_level));

    match cli.command {
        Commands::Version => print_version(),
        Commands::CheckConfig { config } => {
            let config_path = config.unwrap_or(cli.config);
            check_config(&config_path).await?;
        }
        Commands::Resolve { manifest, json } => resolve(&manifest, json).await?,
    }

    Ok(())
}
