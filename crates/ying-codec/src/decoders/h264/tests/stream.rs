use std::sync::{Arc, Mutex};

use ying_core::YingError;
use ying_core::bitreader::find_start_code;

use super::super::dpb::Poc;
use super::super::{DecoderConfig, H264Decoder};
use super::helpers::*;

fn pcm_idr(st: &mut Stream, rng: &mut XorShift, idr_pic_id: u32) {
    let mbs = random_pcm(rng, 4);
    let s = SliceParams {
        idr: true,
        idr_pic_id,
        ..SliceParams::default()
    };
    st.push_cavlc(&s, |w| cavlc_pcm_data(w, &mbs));
}

fn skip_picture(st: &mut Stream, frame_num: u32, poc_lsb: u32, nal_ref_idc: u8) {
    let s = SliceParams {
        slice_type: 0,
        frame_num,
        poc_lsb,
        nal_ref_idc,
        ..SliceParams::default()
    };
    st.push_cavlc(&s, |w| cavlc_skip_data(w, 4));
}

/// 码流中第一个 NAL 头的位置
fn first_nal(data: &[u8]) -> &[u8] {
    let pos = find_start_code(data).unwrap();
    &data[pos + 3..]
}

#[test]
fn test_reorder_outputs_increasing_poc() {
    let sps = SpsParams {
        max_num_reorder_frames: 2,
        max_dec_frame_buffering: 4,
        max_num_ref_frames: 2,
        ..SpsParams::default()
    };
    let mut st = Stream::new(sps, PpsParams::default());
    let mut rng = XorShift::new(1);
    pcm_idr(&mut st, &mut rng, 0);
    skip_picture(&mut st, 1, 4, 1);
    skip_picture(&mut st, 2, 2, 0);

    let (results, frames) = decode_with_threads(&st.data, 0);
    assert!(results.iter().all(Result::is_ok), "{results:?}");
    let pocs: Vec<i32> = frames.iter().map(|f| f.poc()).collect();
    assert_eq!(pocs, vec![0, 2, 4]);
}

#[test]
fn test_remainder_points_after_next_start_code() {
    let mut st = Stream::new(SpsParams::default(), PpsParams::default());
    let mut rng = XorShift::new(2);
    pcm_idr(&mut st, &mut rng, 0);
    let mut dec = H264Decoder::new(DecoderConfig::default()).unwrap();

    let sps_nal = first_nal(&st.data);
    let (res, rest) = dec.decode_nal(sps_nal, false);
    assert!(res.is_ok());
    // 剩余部分从 PPS 的 NAL 头开始
    assert_eq!(rest[0], 0x68);
    let (res, rest) = dec.decode_nal(rest, false);
    assert!(res.is_ok());
    assert_eq!(rest[0] & 0x1F, 5);
    let (res, rest) = dec.decode_nal(rest, false);
    assert!(res.is_ok());
    assert!(rest.is_empty());

    let (res, rest) = dec.decode_nal(&[], false);
    assert!(matches!(res, Err(YingError::NoData)));
    assert!(rest.is_empty());
    assert!(dec.get_frame(false).unwrap().is_some());
    assert!(dec.get_frame(false).unwrap().is_none());
}

#[test]
fn test_ignored_and_unsupported_nal_types() {
    let mut st = Stream::new(SpsParams::default(), PpsParams::default());
    st.push_nal(0x09, &[0x10]); // AUD, primary_pic_type 0
    st.push_nal(0x06, &[0x05, 0x01, 0xAA, 0x80]); // SEI
    st.push_nal(0x0C, &[0xFF, 0xFF, 0x80]); // 填充数据
    st.push_nal(0x0E, &[0x40, 0x00, 0x07]); // 前缀 NAL, view_id 0
    st.push_nal(0x14, &[0x40, 0x00, 0x47, 0x80]); // 切片扩展, view_id 1, 没有子集 SPS
    st.push_nal(0x02, &[0x80]); // 数据分割 A
    st.push_nal(0x09, &[0x00]); // 尾随位缺失的 AUD
    let mut rng = XorShift::new(4);
    pcm_idr(&mut st, &mut rng, 0);

    let (results, frames) = decode_with_threads(&st.data, 0);
    assert_eq!(results.len(), 10);
    assert!(results[..6].iter().all(Result::is_ok), "{results:?}");
    assert!(matches!(results[6], Err(YingError::InvalidData(_))));
    assert!(matches!(results[7], Err(YingError::Unsupported(_))));
    assert!(matches!(results[8], Err(YingError::InvalidData(_))));
    // 出错的 NAL 不影响后续解码
    assert!(results[9].is_ok());
    assert_eq!(frames.len(), 1);
}

#[test]
fn test_reparsing_identical_parameter_sets_keeps_decoding() {
    let mut st = Stream::new(SpsParams::default(), PpsParams::default());
    let mut rng = XorShift::new(6);
    pcm_idr(&mut st, &mut rng, 0);
    let repeat = Stream::new(st.sps.clone(), st.pps.clone());
    st.data.extend_from_slice(&repeat.data);
    skip_picture(&mut st, 1, 2, 1);

    let (results, frames) = decode_with_threads(&st.data, 0);
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(frames.len(), 2);
    assert_eq!(planes_of(&frames[0]), planes_of(&frames[1]));
}

#[test]
fn test_end_of_sequence_outputs_and_resets() {
    let sps = SpsParams {
        max_num_reorder_frames: 4,
        max_dec_frame_buffering: 4,
        ..SpsParams::default()
    };
    let mut st = Stream::new(sps, PpsParams::default());
    let mut rng = XorShift::new(8);
    pcm_idr(&mut st, &mut rng, 0);
    st.push_nal(0x0A, &[]);
    pcm_idr(&mut st, &mut rng, 1);

    let mut dec = H264Decoder::new(DecoderConfig::default()).unwrap();
    let mut rest = first_nal(&st.data);
    let mut after_eos = None;
    for i in 0..st_nal_count(&st.data) {
        let (res, next) = dec.decode_nal(rest, false);
        assert!(res.is_ok(), "{res:?}");
        rest = next;
        if i == 3 {
            after_eos = dec.get_frame(false).unwrap();
        }
    }
    let first = after_eos.expect("序列结束时应输出全部帧");
    assert_eq!(first.poc(), 0);
    let (res, _) = dec.decode_nal(&[], false);
    assert!(matches!(res, Err(YingError::NoData)));
    let second = dec.get_frame(false).unwrap().unwrap();
    assert_ne!(first.frame_id(), second.frame_id());
    // 每个 IDR 开始新的恢复代数
    assert_eq!(first.recovery_generation(), 1);
    assert_eq!(second.recovery_generation(), 2);
}

fn st_nal_count(data: &[u8]) -> usize {
    let mut count = 0;
    let mut rest = data;
    while let Some(pos) = find_start_code(rest) {
        count += 1;
        rest = &rest[pos + 3..];
    }
    count
}

#[test]
fn test_flush_drops_output_and_keeps_parameter_sets() {
    let sps = SpsParams {
        max_num_reorder_frames: 2,
        max_dec_frame_buffering: 4,
        ..SpsParams::default()
    };
    let mut st = Stream::new(sps, PpsParams::default());
    let mut rng = XorShift::new(10);
    pcm_idr(&mut st, &mut rng, 0);
    skip_picture(&mut st, 1, 2, 1);
    let split = st.data.len();
    pcm_idr(&mut st, &mut rng, 1);

    let mut dec = H264Decoder::new(DecoderConfig::new().with_threads(2)).unwrap();
    let mut rest = first_nal(&st.data[..split]);
    while !rest.is_empty() {
        let (res, next) = dec.decode_nal(rest, false);
        assert!(res.is_ok());
        rest = next;
    }
    dec.flush();
    assert!(dec.get_frame(false).unwrap().is_none());

    // flush 之后直接送 IDR, 参数集仍然有效
    let (res, _) = dec.decode_nal(first_nal(&st.data[split..]), false);
    assert!(res.is_ok(), "{res:?}");
    let (res, _) = dec.decode_nal(&[], false);
    assert!(matches!(res, Err(YingError::NoData)));
    let frame = dec.get_frame(false).unwrap().unwrap();
    assert_eq!(frame.poc(), 0);
    assert!(dec.get_frame(false).unwrap().is_none());
}

#[test]
fn test_output_queue_backpressure() {
    let mut st = Stream::new(SpsParams::default(), PpsParams::default());
    let mut rng = XorShift::new(12);
    pcm_idr(&mut st, &mut rng, 0);
    for k in 1..20 {
        skip_picture(&mut st, k % 16, 2 * k % 64, 1);
    }

    let mut dec = H264Decoder::new(DecoderConfig::default()).unwrap();
    let mut rest = first_nal(&st.data);
    let mut blocked = 0;
    let mut held = Vec::new();
    while !rest.is_empty() {
        let (res, next) = dec.decode_nal(rest, false);
        match res {
            Ok(()) => rest = next,
            Err(YingError::OutOfBuffers) => {
                // 需要重试的调用原样返回输入
                assert_eq!(next.len(), rest.len());
                blocked += 1;
                held.clear();
                held.push(dec.get_frame(false).unwrap().unwrap());
            }
            Err(e) => panic!("{e}"),
        }
    }
    assert!(blocked > 0);
    drop(held);
    let (res, _) = dec.decode_nal(&[], false);
    assert!(matches!(res, Err(YingError::NoData)));
    let mut pocs = Vec::new();
    while let Some(f) = dec.get_frame(false).unwrap() {
        pocs.push(f.poc());
    }
    assert!(pocs.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_non_blocking_decode_never_hangs() {
    let mut st = Stream::new(SpsParams::default(), PpsParams::default());
    let mut rng = XorShift::new(14);
    pcm_idr(&mut st, &mut rng, 0);
    for k in 1..12 {
        skip_picture(&mut st, k, 2 * k, 1);
    }

    let mut dec = H264Decoder::new(DecoderConfig::new().with_threads(2)).unwrap();
    let mut rest = first_nal(&st.data);
    let mut frames = Vec::new();
    let mut retries = 0u32;
    while !rest.is_empty() {
        let (res, next) = dec.decode_nal(rest, true);
        match res {
            Ok(()) => rest = next,
            Err(YingError::WouldBlock) => {
                retries += 1;
                assert!(retries < 1_000_000);
                std::thread::yield_now();
            }
            Err(e) => panic!("{e}"),
        }
        loop {
            match dec.get_frame(true) {
                Ok(Some(f)) => frames.push(f),
                Ok(None) | Err(YingError::WouldBlock) => break,
                Err(e) => panic!("{e}"),
            }
        }
    }
    let _ = dec.decode_nal(&[], true);
    while let Some(f) = dec.get_frame(false).unwrap() {
        frames.push(f);
    }
    assert_eq!(frames.len(), 12);
    let first = planes_of(&frames[0]);
    assert!(frames.iter().all(|f| planes_of(f) == first));
}

#[test]
fn test_log_callback_receives_header_summaries() {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let config = DecoderConfig::new()
        .with_log_callback(move |line: &str| sink.lock().unwrap().push(line.to_string()));
    let mut dec = H264Decoder::new(config).unwrap();

    let mut st = Stream::new(SpsParams::default(), PpsParams::default());
    let mut rng = XorShift::new(16);
    pcm_idr(&mut st, &mut rng, 0);
    let (results, frames) = decode_stream(&mut dec, &st.data);
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(frames.len(), 1);

    let lines = lines.lock().unwrap();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("SPS id=0"));
    assert!(lines[0].contains("32x32"));
    assert!(lines[1].starts_with("PPS id=0"));
    assert!(lines[2].starts_with("slice view=0 type=I"));
}

#[test]
fn test_redundant_slices_are_skipped() {
    let pps = PpsParams {
        redundant_pic_cnt_present: true,
        ..PpsParams::default()
    };
    let mut st = Stream::new(SpsParams::default(), pps);
    let mut rng = XorShift::new(18);
    let mbs = random_pcm(&mut rng, 4);
    let primary = SliceParams {
        idr: true,
        ..SliceParams::default()
    };
    st.push_cavlc(&primary, |w| cavlc_pcm_data(w, &mbs));
    let other = random_pcm(&mut rng, 4);
    let redundant = SliceParams {
        redundant_pic_cnt: 1,
        ..primary.clone()
    };
    st.push_cavlc(&redundant, |w| cavlc_pcm_data(w, &other));

    let (results, frames) = decode_with_threads(&st.data, 0);
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(frames.len(), 1);
    assert_eq!(planes_of(&frames[0]), pcm_planes(&mbs, 2));
}

#[test]
fn test_cropped_frame_geometry() {
    let sps = SpsParams {
        crop: Some([1, 3, 2, 2]),
        ..SpsParams::default()
    };
    let mut st = Stream::new(sps, PpsParams::default());
    let mut rng = XorShift::new(20);
    let mbs = random_pcm(&mut rng, 4);
    st.push_cavlc(
        &SliceParams {
            idr: true,
            ..SliceParams::default()
        },
        |w| cavlc_pcm_data(w, &mbs),
    );

    let (_, frames) = decode_with_threads(&st.data, 0);
    let frame = &frames[0];
    assert_eq!((frame.width(), frame.height()), (24, 24));
    assert_eq!(frame.crop_offset(), (2, 4));
    assert_eq!(frame.strides(), [32, 16, 16]);
    assert_eq!(frame.bit_depth(), 8);

    let full = pcm_planes(&mbs, 2);
    let view = frame.planes().unwrap();
    let rows: Vec<&[u8]> = view.cropped_rows(0).collect();
    assert_eq!(rows.len(), 24);
    assert_eq!(rows[0], &full[0][4 * 32 + 2..4 * 32 + 26]);
    assert_eq!(view.cropped_rows(1).count(), 12);

    let mut out = Vec::new();
    frame.write_i420(&mut out).unwrap();
    assert_eq!(out.len(), 24 * 24 * 3 / 2);
    assert_eq!(&out[..24], rows[0]);
}

#[test]
fn test_get_frame_non_blocking_leaves_frame_in_flight_queued() {
    for threads in [0, 2] {
        let mut dec = H264Decoder::new(DecoderConfig::new().with_threads(threads)).unwrap();
        let sps = Arc::new(test_sps(&SpsParams::default()));
        let slot = 0;
        dec.dpb.claim(slot, 0, &sps, 0, &Poc::default(), false);
        let pic = Arc::clone(&dec.dpb.slots[slot].pic);
        pic.write().unwrap().reset(2, 2);
        dec.sched.begin_frame(slot, pic, sps.mb_count()).unwrap();
        dec.views[0].out_queue.push_back(slot);

        // 帧仍在解码: 不等待, 也不出队
        assert!(matches!(dec.get_frame(true), Err(YingError::WouldBlock)));
        assert_eq!(dec.views[0].out_queue.len(), 1);
        if threads == 0 {
            // 没有工作线程时阻塞等待永远不会结束, 同样返回 WouldBlock
            assert!(matches!(dec.get_frame(false), Err(YingError::WouldBlock)));
        }

        dec.sched.close_frame(slot).unwrap();
        let frame = dec.get_frame(true).unwrap().unwrap();
        assert!(dec.views[0].out_queue.is_empty());
        // 没有任何切片, 整帧由修复得到
        assert!(frame.has_error());
        assert!(frame.mb_errors().iter().all(|&e| e == 100));
        assert!(dec.get_frame(true).unwrap().is_none());
    }
}

fn mvc_idr(st: &mut Stream, mbs: &[PcmBlock], view_id: u16) {
    let s = SliceParams {
        idr: true,
        pps_id: u32::from(view_id),
        view_id,
        ..SliceParams::default()
    };
    st.push_cavlc(&s, |w| cavlc_pcm_data(w, mbs));
}

fn mvc_skip(st: &mut Stream, frame_num: u32, view_id: u16, ref_mods: Vec<(u32, u32)>) {
    let s = SliceParams {
        slice_type: 0,
        frame_num,
        poc_lsb: 2 * frame_num,
        pps_id: u32::from(view_id),
        view_id,
        ref_mods: [ref_mods, Vec::new()],
        ..SliceParams::default()
    };
    st.push_cavlc(&s, |w| cavlc_skip_data(w, 4));
}

#[test]
fn test_mvc_views_are_output_in_pairs() {
    let mut rng = XorShift::new(22);
    let base = random_pcm(&mut rng, 4);
    let second = random_pcm(&mut rng, 4);
    let mut st = mvc_stream(SpsParams::default(), PpsParams::default());
    mvc_idr(&mut st, &base, 0);
    mvc_idr(&mut st, &second, 1);
    // 两个视图各自从本视图的 IDR 跳过
    mvc_skip(&mut st, 1, 0, Vec::new());
    mvc_skip(&mut st, 1, 1, Vec::new());
    // 非基础视图把视图间参考移到列表首位, 复制同一访问单元的基础视图
    mvc_skip(&mut st, 2, 0, Vec::new());
    mvc_skip(&mut st, 2, 1, vec![(5, 0)]);

    for threads in [0, 2] {
        let (results, frames) = decode_with_threads(&st.data, threads);
        assert!(results.iter().all(Result::is_ok), "{results:?}");
        assert_eq!(frames.len(), 3);
        let base_planes = pcm_planes(&base, 2);
        let second_planes = pcm_planes(&second, 2);
        for (k, frame) in frames.iter().enumerate() {
            assert!(frame.is_mvc());
            assert_eq!(frame.poc(), 2 * k as i32);
            assert_eq!(planes_of(frame), base_planes);
            assert_ne!(frame.mvc_frame_id(), Some(frame.frame_id()));
            assert_eq!(frame.mvc_has_error(), Some(false));
            assert_eq!(frame.mvc_mb_errors(), Some(&[0u8; 4][..]));
            let view = frame.mvc_planes().unwrap().unwrap();
            let got = [view.y().to_vec(), view.cb().to_vec(), view.cr().to_vec()];
            let expected = if k < 2 { &second_planes } else { &base_planes };
            assert_eq!(&got, expected, "frame {k}");
        }
        let mut out = Vec::new();
        frames[0].write_mvc_i420(&mut out).unwrap();
        assert_eq!(out.len(), 32 * 32 * 3 / 2);
        assert_eq!(out[..32], second_planes[0][..32]);
    }
}

#[test]
fn test_mvc_pairs_wait_for_second_view() {
    let mut rng = XorShift::new(24);
    let base = random_pcm(&mut rng, 4);
    let second = random_pcm(&mut rng, 4);
    let mut st = mvc_stream(SpsParams::default(), PpsParams::default());
    mvc_idr(&mut st, &base, 0);
    mvc_idr(&mut st, &second, 1);
    mvc_skip(&mut st, 1, 0, Vec::new());

    let mut dec = H264Decoder::new(DecoderConfig::default()).unwrap();
    let mut rest = first_nal(&st.data);
    let mut nals = 0;
    while !rest.is_empty() {
        let (res, next) = dec.decode_nal(rest, false);
        assert!(res.is_ok(), "{res:?}");
        rest = next;
        nals += 1;
        if nals == 6 {
            // 基础视图 IDR 已完成, 非基础视图仍在解码
            assert_eq!(dec.views[0].out_queue.len(), 1);
            assert!(dec.get_frame(false).unwrap().is_none());
        }
    }
    // 非基础视图 IDR 完成后成对输出
    let first = dec.get_frame(false).unwrap().unwrap();
    assert!(first.is_mvc());
    assert!(dec.get_frame(false).unwrap().is_none());

    // 码流结束时最后一帧缺少非基础视图, 单独输出
    let (res, _) = dec.decode_nal(&[], false);
    assert!(matches!(res, Err(YingError::NoData)));
    let last = dec.get_frame(false).unwrap().unwrap();
    assert!(!last.is_mvc());
    assert_eq!(last.poc(), 2);
    assert_eq!(last.mvc_frame_id(), None);
    assert!(last.mvc_planes().unwrap().is_none());
}

#[test]
fn test_second_view_with_other_size_is_unsupported() {
    let mut st = Stream::new(SpsParams::default(), PpsParams::default());
    let subset = SpsParams {
        profile_idc: 118,
        sps_id: 1,
        width_mbs: 1,
        ..SpsParams::default()
    };
    st.push_nal(0x6F, &subset_sps_rbsp(&subset));
    st.push_nal(
        0x68,
        &pps_rbsp(&PpsParams {
            pps_id: 1,
            sps_id: 1,
            ..PpsParams::default()
        }),
    );
    let mut rng = XorShift::new(26);
    let base = random_pcm(&mut rng, 4);
    let second = random_pcm(&mut rng, 2);
    mvc_idr(&mut st, &base, 0);
    mvc_idr(&mut st, &second, 1);

    let (results, frames) = decode_with_threads(&st.data, 0);
    assert!(results[..5].iter().all(Result::is_ok), "{results:?}");
    assert!(matches!(results[5], Err(YingError::Unsupported(_))));
    // 基础视图照常输出
    assert_eq!(frames.len(), 1);
    assert!(!frames[0].is_mvc());
    assert_eq!(planes_of(&frames[0]), pcm_planes(&base, 2));
}
