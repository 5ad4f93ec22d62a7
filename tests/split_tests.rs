//! End-to-end splitter scenarios: compressed/archived inputs through
//! batch files and job descriptors.

use elastic_blast::filehelper::FileHelper;
use elastic_blast::jobs::write_job_files;
use elastic_blast::split::FastaReader;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

fn make_tar_gz(path: &Path, members: &[(&str, &str)]) {
    let gz = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(gz);
    for (name, body) in members {
        let mut header = tar::Header::new_ustar();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, *name, body.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

/// Gzipped tar with two FASTA members totaling 98 bases and a batch
/// length well above that: one batch equal to the concatenation, one job
/// file.
#[tokio::test]
async fn test_gzipped_tar_input_one_batch() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.tar.gz");
    // 49 bases per member, 98 total
    let member1 = format!(">seq1\n{}\n", "A".repeat(49));
    let member2 = format!(">seq2\n{}\n", "C".repeat(49));
    make_tar_gz(&input, &[("part1.fa", &member1), ("part2.fa", &member2)]);

    let mut fh = FileHelper::new().unwrap();
    let stream = fh.open_for_read(input.to_str().unwrap()).await.unwrap();
    let out_path = dir.path().join("batches").display().to_string();
    let outcome = FastaReader::new(&mut fh, 1000, &out_path)
        .read_and_cut(vec![stream])
        .unwrap();

    assert_eq!(outcome.total_count, 98);
    assert_eq!(outcome.batches.len(), 1);
    assert!(outcome.batches[0].ends_with("batch_000.fa"));

    let job_path = dir.path().join("jobs").display().to_string();
    let jobs = write_job_files(
        &mut fh,
        &job_path,
        "$QUERY $QUERY_NUM ${RESULTS}",
        &outcome.batches,
        &HashMap::from([("RESULTS".to_string(), "results".to_string())]),
    )
    .unwrap();
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].ends_with("job_000.yaml"));

    fh.copy_to_bucket(false).await.unwrap();
    let batch_text = std::fs::read_to_string(&outcome.batches[0]).unwrap();
    assert_eq!(batch_text, format!("{member1}{member2}"));
    assert_eq!(
        std::fs::read_to_string(&jobs[0]).unwrap(),
        "batch_000 000 results"
    );
}

/// Ten records of 200 letters with a 500-letter budget: five batches of
/// two records (400 letters) each and job files job_000..job_004.
#[tokio::test]
async fn test_multi_batch_split_with_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("queries.fa");
    let record = format!(">r\n{}\n", "ACGT".repeat(50));
    std::fs::write(&input, record.repeat(10)).unwrap();

    let mut fh = FileHelper::new().unwrap();
    let stream = fh.open_for_read(input.to_str().unwrap()).await.unwrap();
    let out_path = dir.path().join("batches").display().to_string();
    let outcome = FastaReader::new(&mut fh, 500, &out_path)
        .read_and_cut(vec![stream])
        .unwrap();

    assert_eq!(outcome.total_count, 2000);
    assert_eq!(outcome.batches.len(), 5);

    let job_path = dir.path().join("jobs").display().to_string();
    let jobs = write_job_files(&mut fh, &job_path, "$QUERY", &outcome.batches, &HashMap::new())
        .unwrap();
    let names: Vec<&str> = jobs
        .iter()
        .map(|j| j.rsplit('/').next().unwrap())
        .collect();
    assert_eq!(
        names,
        ["job_000.yaml", "job_001.yaml", "job_002.yaml", "job_003.yaml", "job_004.yaml"]
    );

    fh.copy_to_bucket(false).await.unwrap();
    for batch in &outcome.batches {
        let text = std::fs::read_to_string(batch).unwrap();
        let letters: usize = text
            .lines()
            .filter(|l| !l.starts_with('>'))
            .map(str::len)
            .sum();
        assert_eq!(letters, 400);
    }
}

/// One 10 000-letter record with a 500-letter budget: the record is never
/// split, so it forms a single oversized batch.
#[tokio::test]
async fn test_oversized_record_forms_own_batch() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("big.fa");
    let body: String = (0..100).map(|_| format!("{}\n", "G".repeat(100))).collect();
    std::fs::write(&input, format!(">big\n{body}")).unwrap();

    let mut fh = FileHelper::new().unwrap();
    let stream = fh.open_for_read(input.to_str().unwrap()).await.unwrap();
    let out_path = dir.path().join("batches").display().to_string();
    let outcome = FastaReader::new(&mut fh, 500, &out_path)
        .read_and_cut(vec![stream])
        .unwrap();

    assert_eq!(outcome.batches.len(), 1);
    assert_eq!(outcome.total_count, 10_000);
}

/// Letter accounting holds across an input spread over plain, gzip, and
/// bz2 physical files.
#[tokio::test]
async fn test_letter_accounting_across_mixed_inputs() {
    let dir = tempfile::tempdir().unwrap();

    let plain = dir.path().join("a.fa");
    std::fs::write(&plain, format!(">p\n{}\n", "A".repeat(30))).unwrap();

    let gz = dir.path().join("b.fa.gz");
    let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
    encoder
        .write_all(format!(">g\n{}\n", "C".repeat(40)).as_bytes())
        .unwrap();
    encoder.finish().unwrap();

    let bz = dir.path().join("c.fa.bz2");
    let mut encoder =
        bzip2::write::BzEncoder::new(File::create(&bz).unwrap(), bzip2::Compression::default());
    encoder
        .write_all(format!(">b\n{}\n", "T".repeat(50)).as_bytes())
        .unwrap();
    encoder.finish().unwrap();

    let mut fh = FileHelper::new().unwrap();
    let uris: Vec<String> = [&plain, &gz, &bz]
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    let streams = fh.open_queries(&uris).await.unwrap();
    let out_path = dir.path().join("batches").display().to_string();
    let outcome = FastaReader::new(&mut fh, 1_000_000, &out_path)
        .read_and_cut(streams)
        .unwrap();

    assert_eq!(outcome.total_count, 120);
    assert_eq!(outcome.batches.len(), 1);

    fh.copy_to_bucket(false).await.unwrap();
    let text = std::fs::read_to_string(&outcome.batches[0]).unwrap();
    // Record order follows the physical input order
    let headers: Vec<&str> = text.lines().filter(|l| l.starts_with('>')).collect();
    assert_eq!(headers, [">p", ">g", ">b"]);
}
