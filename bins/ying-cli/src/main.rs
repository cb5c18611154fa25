//! ying-cli - H.264 解码命令行工具
//!
//! 读取 Annex B 码流, 解码全部 NAL, 以平面 YUV 4:2:0 写出裁剪后的帧.
//! MVC 码流的非基础视图可以写到单独的文件.

mod decode;

use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use ying::logging::{self, LoggingConfig};

#[derive(Parser, Debug)]
#[command(name = "ying-cli", version, about = "纯 Rust H.264 解码工具")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// 日志级别 (EnvFilter 语法, YING_LOG 环境变量优先)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// 日志文件目录, 不指定时只输出到 stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 解码 H.264 Annex B 码流
    Decode(DecodeArgs),
}

#[derive(Args, Debug)]
pub(crate) struct DecodeArgs {
    /// 输入文件路径 (.264 / .h264)
    pub input: PathBuf,

    /// 输出原始 YUV420p 文件
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// MVC 非基础视图的 YUV420p 输出文件
    #[arg(long)]
    pub mvc_output: Option<PathBuf>,

    /// 解码线程数: 0 同步解码, 负数按 CPU 核数
    #[arg(short, long, default_value_t = 0, allow_hyphen_values = true)]
    pub threads: i32,

    /// 最多输出的帧数
    #[arg(short = 'n', long)]
    pub frames: Option<u64>,

    /// 把参数集与切片头摘要打印到 stdout
    #[arg(long)]
    pub headers: bool,

    /// 以 JSON 格式打印统计
    #[arg(long)]
    pub json: bool,
}

fn main() {
    let cli = Cli::parse();

    let mut config = LoggingConfig::console(&cli.log_level);
    if let Some(dir) = &cli.log_dir {
        config = config.with_file(dir.to_string_lossy(), "ying-cli");
    }
    if let Err(e) = logging::init(&config) {
        eprintln!("错误: {e:#}");
        process::exit(2);
    }

    let result = match &cli.command {
        Command::Decode(args) => decode::run(args),
    };
    if let Err(e) = result {
        eprintln!("错误: {e:#}");
        process::exit(1);
    }
}
