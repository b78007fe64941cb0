//! Shared fixtures: run directories and hand-encoded summary event logs.

#![allow(dead_code)]

use runboard::metrics::masked_crc32c;
use serde_json::{Value, json};
use std::fs;
use std::path::Path;

pub fn base_record() -> Value {
    json!({
        "start_time": "2020-01-01T00:00:00.000000",
        "stop_time": "2020-01-01T01:00:00.000000",
        "heartbeat": "2020-01-01T00:30:00.000000",
    })
}

/// Write a complete run directory.
pub fn write_run(dir: &Path, base: &Value, config: &Value, info: &Value) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("run.json"), base.to_string()).unwrap();
    fs::write(dir.join("config.json"), config.to_string()).unwrap();
    fs::write(dir.join("info.json"), info.to_string()).unwrap();
}

pub fn write_default_run(dir: &Path) {
    write_run(dir, &base_record(), &json!({}), &json!({}));
}

fn varint(mut v: u64, out: &mut Vec<u8>) {
    while v >= 0x80 {
        out.push((v as u8) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

fn len_field(field: u64, bytes: &[u8], out: &mut Vec<u8>) {
    varint(field << 3 | 2, out);
    varint(bytes.len() as u64, out);
    out.extend_from_slice(bytes);
}

/// Protobuf-encode an event carrying `simple_value` measurements.
pub fn encode_event(wall_time: f64, step: i64, values: &[(&str, f32)]) -> Vec<u8> {
    let mut summary = Vec::new();
    for (tag, value) in values {
        let mut encoded = Vec::new();
        len_field(1, tag.as_bytes(), &mut encoded);
        varint(2 << 3 | 5, &mut encoded);
        encoded.extend_from_slice(&value.to_le_bytes());
        len_field(1, &encoded, &mut summary);
    }

    let mut out = Vec::new();
    varint(1 << 3 | 1, &mut out);
    out.extend_from_slice(&wall_time.to_le_bytes());
    varint(2 << 3, &mut out);
    varint(step as u64, &mut out);
    if !summary.is_empty() {
        len_field(5, &summary, &mut out);
    }
    out
}

/// Protobuf-encode the header event every log starts with.
pub fn encode_file_version(wall_time: f64) -> Vec<u8> {
    let mut out = Vec::new();
    varint(1 << 3 | 1, &mut out);
    out.extend_from_slice(&wall_time.to_le_bytes());
    len_field(3, b"brain.Event:2", &mut out);
    out
}

/// Frame a payload as a checksummed record.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let len = (payload.len() as u64).to_le_bytes();
    out.extend_from_slice(&len);
    out.extend_from_slice(&masked_crc32c(&len).to_le_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&masked_crc32c(payload).to_le_bytes());
    out
}

/// A log with a file-version header followed by the given encoded events.
pub fn summary_log(events: impl IntoIterator<Item = Vec<u8>>) -> Vec<u8> {
    let mut bytes = frame(&encode_file_version(1_577_836_800.0));
    for event in events {
        bytes.extend(frame(&event));
    }
    bytes
}
