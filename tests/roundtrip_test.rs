//! End-to-end container round trips

use pixelrts::container::raster::{decode_png, encode_png};
use pixelrts::container::{
    read_inline, sidecar_path, DecodeOptions, Decoder, Encoder, PayloadManifest,
};
use pixelrts::error::Error;
use pixelrts::{CodecConfig, EncodingMode};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut buf = vec![0u8; len];
    rng.fill_bytes(&mut buf);
    buf
}

fn payloads() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("empty", Vec::new()),
        ("one byte", vec![0x42]),
        ("256 random", random_bytes(256, 7)),
        ("1MB pattern", b"PixelRTS".repeat(128 * 1024)),
        ("1MB random", random_bytes(1024 * 1024, 42)),
    ]
}

#[test]
fn test_round_trip_both_modes() {
    for mode in [EncodingMode::Dense, EncodingMode::Code] {
        let config = CodecConfig::for_mode(mode);
        let mut encoder = Encoder::new(config.clone());
        let mut decoder = Decoder::new(config);

        for (label, payload) in payloads() {
            let container = encoder
                .encode(&payload, None, None)
                .unwrap_or_else(|e| panic!("encode {} in {}: {}", label, mode, e));
            assert_eq!(container.grid.mode(), mode);

            let decoded = decoder
                .decode(&container.png, Some(payload.len() as u64))
                .unwrap_or_else(|e| panic!("decode {} in {}: {}", label, mode, e));
            assert!(decoded == payload, "{} did not survive {}", label, mode);
        }
    }
}

#[test]
fn test_code_mode_compresses_patterns() {
    let payload = b"PixelRTS".repeat(128 * 1024);
    let mut dense = Encoder::new(CodecConfig::for_mode(EncodingMode::Dense));
    let mut code = Encoder::new(CodecConfig::for_mode(EncodingMode::Code));

    let dense = dense.encode(&payload, None, None).expect("dense encode");
    let code = code.encode(&payload, None, None).expect("code encode");
    assert!(code.grid.size() < dense.grid.size());
    assert!(code.metadata.stream_size < dense.metadata.stream_size);
}

#[test]
fn test_flipped_pixel_is_integrity_error() {
    let mut encoder = Encoder::default();
    let container = encoder.encode(b"hello world", None, None).expect("encode");

    let mut image = decode_png(&container.png).expect("raster");
    image.grid.pixel_mut(0, 0)[0] ^= 0xff;
    let json = container.metadata.to_json().expect("metadata json");
    let tampered = encode_png(&image.grid, &[("pixelrts", json.as_str())]).expect("re-encode");

    let options = DecodeOptions {
        verify: true,
        ..DecodeOptions::default()
    };
    match Decoder::default().decode_with(&tampered, &options) {
        Err(Error::Integrity { .. }) => {}
        other => panic!("Expected integrity error, got {:?}", other.map(|d| d.payload)),
    }

    // Without verification the corrupted bytes come back
    let options = DecodeOptions {
        verify: false,
        ..DecodeOptions::default()
    };
    let decoded = Decoder::default()
        .decode_with(&tampered, &options)
        .expect("unverified decode");
    assert_ne!(decoded.payload, b"hello world");
}

#[test]
fn test_sidecar_written_and_used() {
    let dir = std::env::temp_dir().join(format!("pixelrts_test_{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    let path = dir.join("initrd.rts.png");

    let payload = random_bytes(5000, 3);
    let container = Encoder::default().encode(&payload, None, None).expect("encode");
    let sidecar = container.write_to(&path).expect("write");
    assert_eq!(sidecar, sidecar_path(&path));
    assert_eq!(sidecar.file_name().and_then(|n| n.to_str()), Some("initrd.meta.json"));

    // Strip the embedded chunk so only the sidecar describes the grid
    let bare = encode_png(&container.grid, &[]).expect("bare png");
    std::fs::write(&path, bare).expect("overwrite");

    let decoded = Decoder::default().decode_path(&path).expect("decode via sidecar");
    assert_eq!(decoded.payload, payload);
    assert_eq!(decoded.metadata.data_size, Some(5000));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_segments_and_inline_values() {
    let mut payload = b"#!/bin/sh\necho booting\n".to_vec();
    let kernel_offset = payload.len() as u64;
    payload.extend(random_bytes(3000, 11));
    payload.extend(vec![0u8; 4096]);

    let manifest = PayloadManifest::new()
        .segment("init", 0, kernel_offset)
        .segment("kernel", kernel_offset, 3000)
        .inline("cmdline", b"root=/dev/vda quiet")
        .field("label", serde_json::json!("alpine"));

    let config = CodecConfig::for_mode(EncodingMode::Code);
    let container = Encoder::new(config.clone())
        .encode(&payload, Some(&manifest), None)
        .expect("encode");

    let names: Vec<&str> = container.metadata.segments.keys().map(String::as_str).collect();
    assert_eq!(names.len(), 3, "trailing gap becomes its own segment: {:?}", names);
    assert_eq!(container.metadata.extra["label"], "alpine");

    let inline = read_inline(&container.png).expect("inline");
    assert_eq!(inline["cmdline"], b"root=/dev/vda quiet");

    let mut decoder = Decoder::new(config);
    assert_eq!(decoder.decode(&container.png, None).expect("decode"), payload);

    let files = decoder.decode_files(&container.png, None).expect("segments");
    assert_eq!(files[0].0, "init");
    assert_eq!(files[0].1, b"#!/bin/sh\necho booting\n");
    assert_eq!(files[1].0, "kernel");
}

#[test]
fn test_many_small_segments_round_trip() {
    let mut payload = Vec::new();
    let mut manifest = PayloadManifest::new();
    for i in 0..24 {
        let unit = format!(
            "[Unit]\nDescription=Service {}\n[Service]\nExecStart=/usr/bin/svc{} --foreground\nRestart=always\n",
            i, i
        );
        manifest = manifest.segment(&format!("svc{}.service", i), payload.len() as u64, unit.len() as u64);
        payload.extend_from_slice(unit.as_bytes());
    }

    let config = CodecConfig::for_mode(EncodingMode::Code);
    let container = Encoder::new(config.clone())
        .encode(&payload, Some(&manifest), None)
        .expect("encode");
    assert_eq!(container.metadata.segments.len(), 24);

    let decoded = Decoder::new(config).decode(&container.png, None).expect("decode");
    assert_eq!(decoded, payload);
}

#[test]
fn test_explicit_grid_size_errors() {
    let mut encoder = Encoder::default();
    match encoder.encode(b"hello world", None, Some(12)) {
        Err(Error::Format(_)) => {}
        other => panic!("Expected format error, got {:?}", other.map(|c| c.grid.size())),
    }
    match encoder.encode(&[0xAB; 64], None, Some(2)) {
        Err(Error::Capacity { required, available }) => {
            assert_eq!(required, 64);
            assert_eq!(available, 12);
        }
        other => panic!("Expected capacity error, got {:?}", other.map(|c| c.grid.size())),
    }
}

#[test]
fn test_deflate_backend_stays_readable() {
    let config = CodecConfig {
        backend: pixelrts::compression::CompressionBackend::Deflate,
        ..CodecConfig::for_mode(EncodingMode::Code)
    };
    let payload = b"legacy deflate container ".repeat(200);
    let container = Encoder::new(config).encode(&payload, None, None).expect("encode");
    assert_eq!(
        container.metadata.segments["data"].compression,
        pixelrts::compression::CompressionType::Deflate
    );

    // A default session reads it back
    let decoded = Decoder::default().decode(&container.png, None).expect("decode");
    assert_eq!(decoded, payload);
}
