//! Resilience tests: damaged devices, diverging replicas and misuse.
//!
//! These tests tamper with the backing directories directly and check that
//! the pipeline either reports the damage or behaves as the coder promises.

use layerfs::config::{CipherMode, CoderMode, KeyMaterial, LayerKind, PipelineConfig};
use layerfs::{Access, Error, Pipeline};
use std::fs::{self, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn setup_devices(ndevs: usize) -> (TempDir, Vec<PathBuf>) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let roots = (0..ndevs)
        .map(|i| temp_dir.path().join(format!("dev{}", i)))
        .collect();
    (temp_dir, roots)
}

fn hex_key(byte: u8) -> Option<KeyMaterial> {
    Some(KeyMaterial::Hex(hex::encode([byte; 32])))
}

/// Flip every bit of one byte of a device file.
fn corrupt_byte(file_path: &Path, offset: u64) {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(file_path)
        .expect("Failed to open device file");
    let mut byte = [0u8; 1];
    file.read_exact_at(&mut byte, offset).unwrap();
    byte[0] ^= 0xFF;
    file.write_all_at(&byte, offset).unwrap();
}

#[test]
fn test_replica_length_divergence_is_reported() {
    let (_temp_dir, roots) = setup_devices(2);
    let pipeline = Pipeline::assemble(PipelineConfig::new(roots.clone())).unwrap();
    pipeline.write_file("/r", b"0123456789", 0).unwrap();

    // Lose the tail of the second replica behind the pipeline's back
    let replica = OpenOptions::new().write(true).open(roots[1].join("r")).unwrap();
    replica.set_len(5).unwrap();
    drop(replica);

    let err = pipeline.read_file("/r", 0, None).unwrap_err();
    assert!(
        matches!(err, Error::Divergence { device: 1, expected: 10, found: 5 }),
        "unexpected error: {}",
        err
    );
    assert_eq!(err.errno(), libc::EIO);
}

#[test]
fn test_missing_replica_fails_open_on_that_device() {
    let (_temp_dir, roots) = setup_devices(3);
    let pipeline = Pipeline::assemble(PipelineConfig::new(roots.clone())).unwrap();
    pipeline.write_file("/gone", b"data", 0).unwrap();

    fs::remove_file(roots[2].join("gone")).unwrap();

    let err = pipeline.open("/gone", Access::ReadOnly).unwrap_err();
    assert!(matches!(err, Error::Device { device: 2, .. }), "unexpected error: {}", err);
    assert!(err.is_not_found());

    let mut handle = None;
    assert_eq!(
        pipeline.surface().open("/gone", libc::O_RDONLY, &mut handle),
        -(libc::ENOENT as isize)
    );
}

#[test]
fn test_xor_share_damage_goes_unnoticed_without_cipher() {
    let (_temp_dir, roots) = setup_devices(2);
    let config = PipelineConfig::new(roots.clone())
        .with_block_size(64)
        .with_coder(CoderMode::Xor);
    let pipeline = Pipeline::assemble(config).unwrap();

    let data: Vec<u8> = (0..100u8).collect();
    pipeline.write_file("/x", &data, 0).unwrap();
    corrupt_byte(&roots[1].join("x"), 3);

    let read = pipeline.read_file("/x", 0, None).unwrap();
    assert_eq!(read.len(), data.len());
    assert_eq!(read[3], data[3] ^ 0xFF);
    assert_eq!(&read[4..], &data[4..]);
}

#[test]
fn test_xor_share_damage_caught_by_cipher() {
    let (_temp_dir, roots) = setup_devices(2);
    let config = PipelineConfig::new(roots.clone())
        .with_block_size(64)
        .with_cipher(CipherMode::Deterministic, hex_key(0x42))
        .with_coder(CoderMode::Xor);
    let pipeline = Pipeline::assemble(config).unwrap();

    pipeline.write_file("/x", &[9u8; 100], 0).unwrap();
    corrupt_byte(&roots[1].join("x"), 3);

    let err = pipeline.read_file("/x", 0, None).unwrap_err();
    assert!(matches!(err, Error::Decryption), "unexpected error: {}", err);
}

#[test]
fn test_erasure_data_fragment_damage_caught_by_cipher() {
    let (_temp_dir, roots) = setup_devices(3);
    let config = PipelineConfig::new(roots.clone())
        .with_block_size(64)
        .with_cipher(CipherMode::RandomIv, hex_key(0x17))
        .with_coder(CoderMode::Erasure)
        .with_erasure(2, 1);
    let pipeline = Pipeline::assemble(config).unwrap();

    pipeline.write_file("/e", &[5u8; 64], 0).unwrap();

    // Parity is only consulted for reconstruction
    corrupt_byte(&roots[2].join("e-00000.parity"), 0);
    assert_eq!(pipeline.read_file("/e", 0, None).unwrap(), vec![5u8; 64]);

    corrupt_byte(&roots[0].join("e-00000.data"), 0);
    let err = pipeline.read_file("/e", 0, None).unwrap_err();
    assert!(matches!(err, Error::Decryption), "unexpected error: {}", err);
}

#[test]
fn test_erasure_unwritten_offsets() {
    let (_temp_dir, roots) = setup_devices(3);
    let config = PipelineConfig::new(roots)
        .with_layers(vec![LayerKind::Devices])
        .with_coder(CoderMode::Erasure)
        .with_erasure(2, 1);
    let pipeline = Pipeline::assemble(config).unwrap();

    let handle = pipeline.create("/sparse", 0o644).unwrap();
    assert_eq!(pipeline.write("/sparse", b"hello", 0, &handle).unwrap(), 5);

    let err = pipeline.write("/sparse", b"gap", 100, &handle).unwrap_err();
    assert!(matches!(err, Error::MissingOffset { offset: 100, .. }), "unexpected error: {}", err);

    let mut buf = [0u8; 3];
    let err = pipeline.read("/sparse", &mut buf, 2, &handle).unwrap_err();
    assert!(matches!(err, Error::MissingOffset { offset: 2, .. }), "unexpected error: {}", err);

    // Past the tracked size there is simply nothing to read
    assert_eq!(pipeline.read("/sparse", &mut buf, 10, &handle).unwrap(), 0);
    pipeline.release("/sparse", handle).unwrap();
}

#[test]
fn test_append_past_end_is_alignment_error() {
    let (_temp_dir, roots) = setup_devices(1);
    let pipeline = Pipeline::assemble(PipelineConfig::new(roots).with_block_size(16)).unwrap();
    pipeline.write_file("/a", b"abc", 0).unwrap();

    let err = pipeline.write_file("/a", b"x", 33).unwrap_err();
    assert!(
        matches!(
            err,
            Error::Alignment {
                block_offset: 32,
                extra_offset: 1,
                file_size: 3,
                ..
            }
        ),
        "unexpected error: {}",
        err
    );
    assert_eq!(pipeline.file_size("/a").unwrap(), 3);
}

#[test]
fn test_wrong_key_fails_decryption() {
    let (_temp_dir, roots) = setup_devices(2);
    let config = PipelineConfig::new(roots.clone())
        .with_block_size(32)
        .with_cipher(CipherMode::RandomIv, hex_key(0x01));
    let pipeline = Pipeline::assemble(config.clone()).unwrap();
    pipeline.write_file("/secret", &[7u8; 80], 0).unwrap();
    pipeline.shutdown().unwrap();

    let reopened = Pipeline::assemble(config).unwrap();
    assert_eq!(reopened.read_file("/secret", 0, None).unwrap(), vec![7u8; 80]);
    reopened.shutdown().unwrap();

    let wrong = PipelineConfig::new(roots)
        .with_block_size(32)
        .with_cipher(CipherMode::RandomIv, hex_key(0x02));
    let pipeline = Pipeline::assemble(wrong).unwrap();
    let err = pipeline.read_file("/secret", 0, None).unwrap_err();
    assert!(matches!(err, Error::Decryption), "unexpected error: {}", err);
}

#[test]
fn test_passphrase_key_survives_reassembly() {
    let (_temp_dir, roots) = setup_devices(1);
    let salt = "5a".repeat(16);
    let config_for = |passphrase: &str| {
        PipelineConfig::new(roots.clone())
            .with_block_size(16)
            .with_cipher(
                CipherMode::Deterministic,
                Some(KeyMaterial::Passphrase {
                    passphrase: passphrase.to_string(),
                    salt: salt.clone(),
                }),
            )
    };

    let pipeline = Pipeline::assemble(config_for("correct horse")).unwrap();
    pipeline.write_file("/p", b"battery staple", 0).unwrap();
    drop(pipeline);

    let pipeline = Pipeline::assemble(config_for("correct horse")).unwrap();
    assert_eq!(pipeline.read_file("/p", 0, None).unwrap(), b"battery staple");
    drop(pipeline);

    let pipeline = Pipeline::assemble(config_for("wrong horse")).unwrap();
    assert!(matches!(pipeline.file_size("/p"), Err(Error::Decryption)));
}
