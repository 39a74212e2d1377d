//! Format-level behaviour: corruption detection, trailing-data policy,
//! header validation, and multi-member error reporting.

use oxilz_core::error::LzipError;
use oxilz_stream::{DecodeOptions, compress_bytes, decode_stream, decompress_bytes};
use std::io::Cursor;

fn decode_with(data: &[u8], options: DecodeOptions) -> Result<(Vec<u8>, bool), LzipError> {
    let mut out = Vec::new();
    let stats = decode_stream(Cursor::new(data), &mut out, options)?;
    Ok((out, stats.trailing_data))
}

#[test]
fn test_bit_flips_are_detected() {
    let data = b"corruption must never pass silently. ".repeat(60);
    let compressed = compress_bytes(&data, 6).unwrap();

    // Flip one bit at a spread of payload and trailer offsets.
    let probes = [6, 8, 20, compressed.len() / 2, compressed.len() - 25, compressed.len() - 10];
    for &offset in &probes {
        for bit in [0, 5, 7] {
            let mut corrupted = compressed.clone();
            corrupted[offset] ^= 1 << bit;
            let result = decompress_bytes(&corrupted);
            let err = result.expect_err(&format!("flip at {offset} bit {bit} undetected"));
            assert!(err.is_data_error(), "unexpected error class: {err}");
        }
    }
}

#[test]
fn test_truncated_member_is_detected() {
    let compressed = compress_bytes(&[42u8; 10_000], 6).unwrap();
    for keep in [7, compressed.len() / 2, compressed.len() - 21, compressed.len() - 1] {
        let err = decompress_bytes(&compressed[..keep]).unwrap_err();
        assert!(err.is_data_error(), "truncation at {keep} gave: {err}");
    }
}

#[test]
fn test_trailing_data_policy() {
    let compressed = compress_bytes(b"payload", 6).unwrap();
    let mut with_garbage = compressed.clone();
    with_garbage.push(0x00);

    // Default policy ignores trailing bytes but reports them.
    let (out, trailing) = decode_with(&with_garbage, DecodeOptions::default()).unwrap();
    assert_eq!(out, b"payload");
    assert!(trailing);

    // Strict policy rejects them.
    let strict = DecodeOptions {
        ignore_trailing: false,
        loose_trailing: false,
    };
    let err = decode_with(&with_garbage, strict).unwrap_err();
    assert!(matches!(err, LzipError::TrailingData));
    assert_eq!(err.exit_code(), 2);

    // Longer opaque garbage behaves the same.
    let mut with_more = compressed.clone();
    with_more.extend_from_slice(b"\x00\x01\x02\x03\x04\x05\x06\x07");
    let (out, trailing) = decode_with(&with_more, DecodeOptions::default()).unwrap();
    assert_eq!(out, b"payload");
    assert!(trailing);
}

#[test]
fn test_corrupt_looking_trailing_header() {
    let compressed = compress_bytes(b"payload", 6).unwrap();

    // Trailing bytes that resemble a damaged header are corruption by
    // default, trailing data under --loose-trailing.
    let mut suspicious = compressed.clone();
    suspicious.extend_from_slice(b"LZiP\x01\x17");
    let err = decode_with(&suspicious, DecodeOptions::default()).unwrap_err();
    assert!(err.is_data_error());

    let loose = DecodeOptions {
        ignore_trailing: true,
        loose_trailing: true,
    };
    let (out, trailing) = decode_with(&suspicious, loose).unwrap();
    assert_eq!(out, b"payload");
    assert!(trailing);

    // A truncated genuine magic is always corruption.
    let mut truncated = compressed;
    truncated.extend_from_slice(b"LZI");
    let err = decode_with(&truncated, loose).unwrap_err();
    assert!(err.is_data_error());
}

#[test]
fn test_unsupported_version_message() {
    let mut compressed = compress_bytes(b"versioned", 6).unwrap();
    compressed[4] = 2;
    let err = decompress_bytes(&compressed).unwrap_err();
    assert_eq!(err.to_string(), "Version 2 member format not supported.");
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn test_dictionary_size_clamp() {
    let compressed = compress_bytes(b"window", 6).unwrap();

    for ds_byte in [0u8, 11, 30, 31] {
        let mut bad = compressed.clone();
        bad[5] = ds_byte;
        let err = decompress_bytes(&bad).unwrap_err();
        assert!(
            matches!(err, LzipError::InvalidDictSize),
            "ds byte {ds_byte} gave: {err}"
        );
    }
}

#[test]
fn test_bad_magic_first_member() {
    let mut compressed = compress_bytes(b"magic", 6).unwrap();
    compressed[0] = b'M';
    let err = decompress_bytes(&compressed).unwrap_err();
    assert!(matches!(err, LzipError::BadMagic));
}

#[test]
fn test_empty_input_is_an_error() {
    let err = decompress_bytes(b"").unwrap_err();
    assert!(err.is_data_error());
}

#[test]
fn test_second_member_error_keeps_first_output() {
    let a = b"first member, fully intact".to_vec();
    let b = b"second member, damaged in transit".to_vec();
    let first = compress_bytes(&a, 6).unwrap();
    let second = compress_bytes(&b, 6).unwrap();

    // Corrupt the second member's stored data size (trailer bytes 4..12
    // from its end-relative offset 16).
    let mut stream = first.clone();
    let mut damaged = second;
    let len = damaged.len();
    damaged[len - 14] ^= 0xFF;
    stream.extend_from_slice(&damaged);

    let mut out = Vec::new();
    let err = decode_stream(Cursor::new(&stream), &mut out, DecodeOptions::default()).unwrap_err();
    assert!(matches!(err, LzipError::DataSizeMismatch { .. }));
    // The first member was already written before the failure.
    assert!(out.starts_with(&a));
}

#[test]
fn test_members_end_exactly_at_marker() {
    // Each member's stored size must account for every byte between the
    // end marker and the next header.
    let parts: [&[u8]; 3] = [b"alpha", b"beta beta", b"gamma gamma gamma"];
    let mut stream = Vec::new();
    for part in parts {
        stream.extend(compress_bytes(part, 6).unwrap());
    }
    let mut out = Vec::new();
    let stats = decode_stream(Cursor::new(&stream), &mut out, DecodeOptions::default()).unwrap();
    assert_eq!(stats.members, 3);
    assert_eq!(stats.in_size, stream.len() as u64);
    assert_eq!(out, b"alphabeta betagamma gamma gamma".to_vec());
}
