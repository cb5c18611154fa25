//! decode 子命令.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use ying::{DecoderConfig, Frame, H264Decoder, YingError};

use crate::DecodeArgs;

/// 解码统计
#[derive(Debug, Default, Serialize)]
struct Summary {
    frames: u64,
    error_frames: u64,
    /// 带非基础视图的帧数
    mvc_frames: u64,
    nal_units: u64,
    nal_errors: u64,
    width: u32,
    height: u32,
    bytes_written: u64,
}

pub(crate) fn run(args: &DecodeArgs) -> Result<()> {
    let stream = std::fs::read(&args.input)
        .with_context(|| format!("读取输入文件失败, path={}", args.input.display()))?;

    let mut out = args.output.as_deref().map(create_output).transpose()?;
    let mut mvc_out = args.mvc_output.as_deref().map(create_output).transpose()?;

    let mut config = DecoderConfig::new().with_threads(args.threads);
    if args.headers {
        config = config.with_log_callback(|line: &str| println!("{line}"));
    }
    let mut decoder = H264Decoder::new(config).context("创建解码器失败")?;
    info!("开始解码 {}, 共 {} 字节", args.input.display(), stream.len());

    let limit = args.frames.unwrap_or(u64::MAX);
    let mut summary = Summary::default();
    let mut nal = ying::skip_to_first_nal(&stream);
    while summary.frames < limit {
        let (res, next) = decoder.decode_nal(nal, false);
        let done = matches!(res, Err(YingError::NoData));
        if !done {
            summary.nal_units += 1;
            if let Err(e) = &res {
                summary.nal_errors += 1;
                warn!("NAL #{} 解码失败: {e}", summary.nal_units);
            }
        }
        while summary.frames < limit {
            let Some(frame) = decoder.get_frame(false).context("取输出帧失败")? else {
                break;
            };
            write_frame(&frame, out.as_mut(), &mut summary)?;
            if frame.is_mvc() {
                summary.mvc_frames += 1;
                if let Some(w) = mvc_out.as_mut() {
                    frame.write_mvc_i420(w).context("写出非基础视图失败")?;
                }
            }
        }
        if done {
            break;
        }
        nal = next;
    }

    for w in out.iter_mut().chain(mvc_out.iter_mut()) {
        w.flush().context("写出输出文件失败")?;
    }
    print_summary(&summary, args.json)
}

fn create_output(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path)
        .with_context(|| format!("创建输出文件失败, path={}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn write_frame(frame: &Frame, out: Option<&mut BufWriter<File>>, summary: &mut Summary) -> Result<()> {
    summary.frames += 1;
    summary.width = frame.width();
    summary.height = frame.height();
    if frame.has_error() {
        summary.error_frames += 1;
        warn!("帧 #{} (poc={}) 含有修复的宏块", summary.frames, frame.poc());
    }
    if let Some(w) = out {
        frame.write_i420(w).context("写出帧数据失败")?;
        let (w, h) = (u64::from(frame.width()), u64::from(frame.height()));
        summary.bytes_written += w * h + 2 * (w / 2) * (h / 2);
    }
    Ok(())
}

fn print_summary(summary: &Summary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }
    println!(
        "解码完成: {} 帧 ({}x{}), 出错帧 {}, NAL {} 个, 出错 NAL {}",
        summary.frames,
        summary.width,
        summary.height,
        summary.error_frames,
        summary.nal_units,
        summary.nal_errors
    );
    if summary.mvc_frames > 0 {
        println!("其中 {} 帧带 MVC 非基础视图", summary.mvc_frames);
    }
    if summary.bytes_written > 0 {
        println!("写出 {} 字节", summary.bytes_written);
    }
    Ok(())
}
