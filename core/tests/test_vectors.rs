//! Verify body framing against JSON test vectors stored in `test-vectors/`.
//!
//! Each vector lists typed parameters and the exact bytes they must encode
//! to. File parameters are materialized in a temporary directory first.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;
use urlnet_core::multipart::{MultipartEncoder, Segment};
use urlnet_core::store::{cookies_string, parameters_string, Parameters};
use urlnet_core::Body;

/// Build a `Body` from a vector entry.
fn body(entry: &Value, dir: &Path) -> Body {
    match entry["type"].as_str().unwrap() {
        "string" => Body::string(entry["value"].as_str().unwrap()),
        "number" => Body::number(entry["value"].as_i64().unwrap()),
        "json" => Body::json(entry["value"].clone()).unwrap(),
        "file" => {
            let path = dir.join(entry["file_name"].as_str().unwrap());
            std::fs::write(&path, entry["content"].as_str().unwrap()).unwrap();
            Body::file(&path).unwrap()
        }
        "array" => Body::array(entry["value"].as_array().unwrap().iter().map(|e| body(e, dir))).unwrap(),
        other => panic!("unknown body type: {other}"),
    }
}

fn parameters(case: &Value, dir: &Path) -> Parameters {
    case["parameters"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| (p["key"].as_str().unwrap().to_string(), body(p, dir)))
        .collect()
}

// ---------------------------------------------------------------------------
// Multipart
// ---------------------------------------------------------------------------

#[test]
fn multipart_test_vectors() {
    let raw = include_str!("../../test-vectors/multipart.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();
    let encoder = MultipartEncoder::with_boundary(vectors["boundary"].as_str().unwrap());

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let planned = encoder.plan(&parameters(case, dir.path())).unwrap();

        let mut bytes = Vec::new();
        for segment in planned.segments() {
            match segment {
                Segment::Bytes(b) => bytes.extend_from_slice(b),
                Segment::File { path, len } => {
                    let content = std::fs::read(path).unwrap();
                    assert_eq!(content.len() as u64, *len, "{name}: file length");
                    bytes.extend(content);
                }
            }
        }

        let expected = case["expected_body"].as_str().unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), expected, "{name}: body");
        assert_eq!(planned.total_len(), expected.len() as u64, "{name}: total length");
    }
}

// ---------------------------------------------------------------------------
// URL-encoded parameters and cookies
// ---------------------------------------------------------------------------

#[test]
fn urlencoded_test_vectors() {
    let raw = include_str!("../../test-vectors/urlencoded.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();
    let dir = tempfile::tempdir().unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let encoded = parameters_string(&parameters(case, dir.path()));
        assert_eq!(encoded, case["expected"].as_str().unwrap(), "{name}");
    }
}

#[test]
fn cookie_test_vectors() {
    let raw = include_str!("../../test-vectors/urlencoded.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cookies"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let cookies: BTreeMap<String, String> = serde_json::from_value(case["cookies"].clone()).unwrap();
        assert_eq!(cookies_string(&cookies), case["expected"].as_str().unwrap(), "{name}");
    }
}
