//! Decoder matrix for query inputs: every accepted suffix combination,
//! plus the malformed-input contract for lying suffixes.

use elastic_blast::filehelper::FileHelper;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const FASTA: &str = ">seq1\nACGTACGT\n>seq2\nTTTTAAAA\n";

fn tar_bytes(members: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, body) in members {
        let mut header = tar::Header::new_ustar();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, *name, body.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap()
}

fn write_fixture(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    match name {
        "queries.fa" | "queries.fasta" | "queries.fna" | "queries.faa" => {
            std::fs::write(&path, FASTA).unwrap();
        }
        "queries.fa.gz" => {
            let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
            enc.write_all(FASTA.as_bytes()).unwrap();
            enc.finish().unwrap();
        }
        "queries.fa.bz2" => {
            let mut enc = bzip2::write::BzEncoder::new(
                File::create(&path).unwrap(),
                bzip2::Compression::default(),
            );
            enc.write_all(FASTA.as_bytes()).unwrap();
            enc.finish().unwrap();
        }
        "queries.tar" => {
            std::fs::write(&path, tar_bytes(&[("queries.fa", FASTA)])).unwrap();
        }
        "queries.tar.gz" | "queries.tgz" => {
            let tar = tar_bytes(&[("queries.fa", FASTA)]);
            let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
            enc.write_all(&tar).unwrap();
            enc.finish().unwrap();
        }
        "queries.tar.bz2" => {
            let tar = tar_bytes(&[("queries.fa", FASTA)]);
            let mut enc = bzip2::write::BzEncoder::new(
                File::create(&path).unwrap(),
                bzip2::Compression::default(),
            );
            enc.write_all(&tar).unwrap();
            enc.finish().unwrap();
        }
        other => panic!("no fixture rule for {other}"),
    }
    path
}

#[tokio::test]
async fn test_every_accepted_input_shape_decodes() {
    let dir = tempfile::tempdir().unwrap();
    let fh = FileHelper::new().unwrap();
    for name in [
        "queries.fa",
        "queries.fasta",
        "queries.fna",
        "queries.faa",
        "queries.fa.gz",
        "queries.fa.bz2",
        "queries.tar",
        "queries.tar.gz",
        "queries.tgz",
        "queries.tar.bz2",
    ] {
        let path = write_fixture(dir.path(), name);
        let mut stream = fh.open_for_read(path.to_str().unwrap()).await.unwrap();
        let mut text = String::new();
        stream.read_to_string(&mut text).unwrap();
        assert_eq!(text, FASTA, "decoding {name} changed the content");
    }
}

#[tokio::test]
async fn test_multi_member_tar_preserves_archive_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("multi.tar");
    std::fs::write(
        &path,
        tar_bytes(&[(
            "z_last_name_first_member.fa",
            ">m1\nAA\n",
        ), ("a_first_name_second_member.fa", ">m2\nCC\n")]),
    )
    .unwrap();

    let fh = FileHelper::new().unwrap();
    let mut stream = fh.open_for_read(path.to_str().unwrap()).await.unwrap();
    let mut text = String::new();
    stream.read_to_string(&mut text).unwrap();
    // Archive order, not name order
    assert_eq!(text, ">m1\nAA\n>m2\nCC\n");
}

#[tokio::test]
async fn test_bz2_suffix_on_gzip_bytes_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queries.fa.bz2");
    let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    enc.write_all(FASTA.as_bytes()).unwrap();
    enc.finish().unwrap();

    let fh = FileHelper::new().unwrap();
    let err = fh
        .open_for_read(path.to_str().unwrap())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("bzip2"), "{err}");
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn test_compressed_content_without_suffix_still_decodes() {
    // Sniffing is content-driven; a missing suffix is not an error
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queries");
    let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    enc.write_all(FASTA.as_bytes()).unwrap();
    enc.finish().unwrap();

    let fh = FileHelper::new().unwrap();
    let mut stream = fh.open_for_read(path.to_str().unwrap()).await.unwrap();
    let mut text = String::new();
    stream.read_to_string(&mut text).unwrap();
    assert_eq!(text, FASTA);
}
