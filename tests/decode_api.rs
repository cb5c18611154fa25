//! 通过公开接口解码合成码流.

mod common;

use common::{SynthStream, StreamShape, pcm_blocks, pcm_planes};
use ying::{DecoderConfig, Frame, H264Decoder, YingError, skip_to_first_nal};

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn decode_all(data: &[u8], threads: i32) -> (Vec<Result<(), YingError>>, Vec<Frame>) {
    init_log();
    let mut dec = match H264Decoder::new(DecoderConfig::new().with_threads(threads)) {
        Ok(dec) => dec,
        Err(e) => panic!("创建解码器失败: {e}"),
    };
    let mut results = Vec::new();
    let mut frames = Vec::new();
    let mut nal = skip_to_first_nal(data);
    loop {
        let (res, next) = dec.decode_nal(nal, false);
        while let Some(frame) = dec.get_frame(false).unwrap() {
            frames.push(frame);
        }
        if matches!(res, Err(YingError::NoData)) {
            break;
        }
        results.push(res);
        nal = next;
    }
    (results, frames)
}

fn planes(frame: &Frame) -> [Vec<u8>; 3] {
    let view = frame.planes().unwrap();
    [view.y().to_vec(), view.cb().to_vec(), view.cr().to_vec()]
}

#[test]
fn test_pcm_then_skip_frames_are_identical() {
    let shape = StreamShape::new(3, 2);
    let mbs = pcm_blocks(42, shape.mb_count());
    let mut stream = SynthStream::new(shape);
    stream.idr_pcm(&mbs).p_skip().p_skip().p_skip();

    let (results, frames) = decode_all(&stream.data, 0);
    assert!(results.iter().all(Result::is_ok), "{results:?}");
    assert_eq!(frames.len(), 4);
    let expected = pcm_planes(&mbs, 3);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.poc(), 2 * i as i32);
        assert_eq!((frame.width(), frame.height()), (48, 32));
        assert!(!frame.has_error());
        assert_eq!(planes(frame), expected);
    }
}

#[test]
fn test_fresh_decoders_produce_identical_output() {
    let shape = StreamShape::new(2, 2);
    let mut stream = SynthStream::new(shape);
    stream
        .idr_pcm(&pcm_blocks(1, 4))
        .p_skip()
        .idr_pcm(&pcm_blocks(2, 4))
        .p_skip();

    let (_, first) = decode_all(&stream.data, 0);
    for threads in [0, 2, -1] {
        let (results, again) = decode_all(&stream.data, threads);
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(again.len(), first.len());
        for (a, b) in first.iter().zip(&again) {
            assert_eq!(a.poc(), b.poc());
            assert_eq!(planes(a), planes(b));
        }
    }
}

#[test]
fn test_cropped_i420_output() {
    let shape = StreamShape {
        crop: Some([0, 4, 0, 4]),
        ..StreamShape::new(2, 2)
    };
    let mbs = pcm_blocks(9, 4);
    let mut stream = SynthStream::new(shape);
    stream.idr_pcm(&mbs);

    let (_, frames) = decode_all(&stream.data, 0);
    assert_eq!(frames.len(), 1);
    let frame = &frames[0];
    assert_eq!((frame.width(), frame.height()), (24, 24));

    let mut out = Vec::new();
    frame.write_i420(&mut out).unwrap();
    assert_eq!(out.len(), 24 * 24 + 2 * 12 * 12);
    let full = pcm_planes(&mbs, 2);
    assert_eq!(&out[..24], &full[0][..24]);
    // Cb 平面紧跟亮度
    assert_eq!(&out[24 * 24..24 * 24 + 12], &full[1][..12]);
}

#[test]
fn test_truncated_stream_still_outputs_frames() {
    let shape = StreamShape::new(2, 2);
    let mut stream = SynthStream::new(shape);
    stream.idr_pcm(&pcm_blocks(5, 4)).p_skip();
    let cut = stream.data.len() - 700;
    let data = &stream.data[..cut];

    let (results, frames) = decode_all(data, 0);
    assert!(results.iter().any(Result::is_err));
    assert_eq!(frames.len(), 1);
    assert!(frames[0].has_error());
    let errors = frames[0].mb_errors();
    assert_eq!(errors.len(), 4);
    assert!(errors.iter().any(|&e| e > 0), "{errors:?}");
    assert!(!frames[0].is_mvc());
}

#[test]
fn test_get_frame_on_empty_decoder_returns_none() {
    init_log();
    let mut dec = H264Decoder::new(DecoderConfig::new().with_threads(2)).unwrap();
    assert!(dec.get_frame(true).unwrap().is_none());
    assert!(dec.get_frame(false).unwrap().is_none());
}

#[test]
fn test_random_noise_never_panics() {
    for seed in 1..=24u32 {
        let mut state = seed;
        let mut data: Vec<u8> = (0..4096)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();
        // 噪声中按固定间隔放置切片/SEI/AUD 的 NAL 头
        const HEADERS: [u8; 6] = [0x41, 0x65, 0x06, 0x09, 0x21, 0x01];
        for (k, pos) in (0..data.len() - 4).step_by(97).enumerate() {
            data[pos..pos + 4].copy_from_slice(&[0, 0, 1, HEADERS[k % HEADERS.len()]]);
        }
        // 以合法的参数集开头, 让切片路径也被覆盖
        let mut stream = SynthStream::new(StreamShape::new(2, 2));
        stream.idr_pcm(&pcm_blocks(seed, 4));
        data.splice(0..0, stream.data[..stream.data.len() / 2].iter().copied());

        init_log();
        let config = DecoderConfig::new().with_threads((seed % 3) as i32);
        let mut dec = H264Decoder::new(config).unwrap();
        let mut nal = skip_to_first_nal(&data);
        let mut units = 0;
        loop {
            let (res, next) = dec.decode_nal(nal, false);
            // 帧立即丢弃, 槽位不会耗尽
            while dec.get_frame(false).unwrap().is_some() {}
            match res {
                Err(YingError::NoData) => break,
                Err(e) if e.is_retryable() => panic!("同步解码不应要求重试: {e}"),
                _ => units += 1,
            }
            nal = next;
        }
        assert!(units > 40);
    }
}

#[test]
fn test_version_is_set() {
    assert!(!ying::version().is_empty());
}
