use cphd_core::{CphdReader, SignalArray};
use cphd_tool::{
    commands,
    config::{ChannelShape, GenerateSpec, ToolConfig},
    error::ToolError,
};
use cphd_types::{Compression, SignalFormat};
use tempfile::TempDir;

fn small_config() -> ToolConfig {
    ToolConfig {
        threads: 3,
        scratch_bytes: 64 * 1024,
        block_bytes: 2048,
    }
}

fn small_spec(
    format: SignalFormat,
    compression: Compression,
) -> GenerateSpec {
    GenerateSpec {
        channels: vec![
            ChannelShape {
                num_vectors: 32,
                num_samples: 64,
            },
            ChannelShape {
                num_vectors: 17,
                num_samples: 40,
            },
        ],
        signal_format: format,
        compression,
        with_support: true,
        seed: 7,
    }
}

// ============================================================================
// generate / info
// ============================================================================

#[test]
fn test_generate_then_info() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("synthetic.cphd");
    let cfg = small_config();

    let summary = commands::generate(&path, &small_spec(SignalFormat::Ci4, Compression::None), &cfg).unwrap();
    assert_eq!(summary.errors, 0);
    assert!(summary.bytes_written > 0);

    let info = commands::info(&path, &cfg).unwrap();
    assert_eq!(info.signal_format, "CI4");
    assert_eq!(info.channels.len(), 2);
    assert_eq!(info.channels[1].num_vectors, 17);
    assert_eq!(info.channels[0].signal_bytes, 32 * 64 * 4);
    assert_eq!(info.support_arrays.len(), 2);
    assert!(info.pvp_params.iter().any(|p| p == "AmpSF"));
    assert_eq!(info.file_size, std::fs::metadata(&path).unwrap().len());

    let text = info.to_string();
    assert!(text.contains("CI4"));
    assert!(text.contains("CH1"));
}

#[test]
fn test_generate_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.cphd");
    let b = dir.path().join("b.cphd");
    let spec = small_spec(SignalFormat::Cf8, Compression::Lz4);

    commands::generate(&a, &spec, &small_config()).unwrap();
    commands::generate(
        &b,
        &spec,
        &ToolConfig {
            threads: 1,
            ..small_config()
        },
    )
    .unwrap();

    assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
}

// ============================================================================
// verify / extract
// ============================================================================

#[test]
fn test_verify_all_formats() {
    let dir = TempDir::new().unwrap();
    let cfg = small_config();

    for format in [SignalFormat::Ci2, SignalFormat::Ci4, SignalFormat::Cf8] {
        for compression in [Compression::None, Compression::Lz4] {
            let path = dir.path().join(format!("{format}_{compression}.cphd"));
            commands::generate(&path, &small_spec(format, compression), &cfg).unwrap();

            let report = commands::verify(&path, &cfg).unwrap();
            assert_eq!(report.channels, 2);
            assert_eq!(report.vectors, 49);
            assert_eq!(report.support_arrays, 2);
            assert!(report.peak_scratch <= report.scratch_budget);
        }
    }
}

#[test]
fn test_verify_rejects_corruption() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.cphd");
    let cfg = small_config();

    commands::generate(&path, &small_spec(SignalFormat::Ci2, Compression::None), &cfg).unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    bytes[0] = b'X';
    std::fs::write(&path, &bytes).unwrap();

    let err = commands::verify(&path, &cfg).unwrap_err();
    assert!(matches!(err, ToolError::Cphd(ref e) if e.is_format_error()));
}

#[test]
fn test_extract_range() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("src.cphd");
    let out = dir.path().join("ch0.bin");
    let cfg = small_config();

    commands::generate(&path, &small_spec(SignalFormat::Cf8, Compression::Lz4), &cfg).unwrap();

    let n = commands::extract(&path, 0, Some(4..12), &out, &cfg).unwrap();
    assert_eq!(n, 8 * 64 * 8);

    let raw = std::fs::read(&out).unwrap();
    let decoded = SignalArray::decode(SignalFormat::Cf8, 8, 64, &raw).unwrap();

    let reader = CphdReader::open(&path, cfg.scratch_bytes).unwrap();
    let expected = reader.wideband().unwrap().read_vectors(0, 4..12).unwrap();
    assert_eq!(decoded, expected);
}

#[test]
fn test_extract_bad_channel() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("src.cphd");
    let cfg = small_config();

    commands::generate(&path, &small_spec(SignalFormat::Ci2, Compression::None), &cfg).unwrap();

    let err = commands::extract(&path, 5, None, dir.path().join("x.bin"), &cfg).unwrap_err();
    assert!(matches!(err, ToolError::Cphd(_)));
}

// ============================================================================
// pvp
// ============================================================================

#[test]
fn test_dump_pvp_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pvp.cphd");
    let cfg = small_config();

    commands::generate(&path, &small_spec(SignalFormat::Ci4, Compression::None), &cfg).unwrap();

    let mut out = Vec::new();
    commands::dump_pvp(&path, Some(1), &cfg, &mut out).unwrap();

    let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let channels = json.as_array().unwrap();
    assert_eq!(channels.len(), 1);

    let records = channels[0].as_array().unwrap();
    assert_eq!(records.len(), 17);
    assert_eq!(records[0]["SIGNAL"], 1);
    assert_eq!(records[2]["TxTime"].as_f64().unwrap(), 0.002);
    assert_eq!(records[0]["TxPos"].as_array().unwrap().len(), 3);

    let err = commands::dump_pvp(&path, Some(9), &cfg, Vec::new()).unwrap_err();
    assert!(matches!(err, ToolError::InvalidArgument(_)));
}

#[test]
fn test_generate_default_spec_shape() {
    let spec = GenerateSpec::default();
    assert_eq!(spec.channels.len(), 1);
    assert_eq!(spec.channels[0].to_string(), "256x1024");
    assert_eq!(spec.compression, Compression::None);
}
