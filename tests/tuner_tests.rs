//! Tuner scenarios: cluster shape from database and query properties.

use elastic_blast::config::{MemoryStr, MolType, Program};
use elastic_blast::tuner::{
    aws_get_machine_type, aws_get_mem_limit, gcp_get_machine_type, gcp_get_mem_limit,
    get_batch_length, get_mt_mode, get_num_cpus, DbData, MtMode, SeqData,
};

fn large_nucl_db() -> DbData {
    DbData {
        mol_type: MolType::Nucl,
        length: 160_000_000_000,
        bytes_to_cache: 40_000_000_000,
    }
}

fn large_nucl_query() -> SeqData {
    SeqData {
        length: 1_000_000_000,
        mol_type: MolType::Nucl,
    }
}

/// AWS blastn against a 40 GB database: database-split mode, 16+ cores,
/// the constant 20G memory limit, and an M-family instance sized for it.
#[test]
fn test_aws_blastn_large_database() {
    let db = large_nucl_db();
    let query = large_nucl_query();

    let mt_mode = get_mt_mode(Program::Blastn, "", &db, &query);
    assert_eq!(mt_mode, MtMode::SplitByDatabase);

    let num_cpus = get_num_cpus(Program::Blastn, mt_mode, &query);
    assert!(num_cpus >= 16);

    let mem_limit = aws_get_mem_limit(&db, &MemoryStr::new("20G").unwrap(), 0.0);
    assert_eq!(mem_limit.as_str(), "20G");

    let machine_type = aws_get_machine_type(&mem_limit, num_cpus, "us-east-1");
    assert!(
        machine_type.starts_with("m5."),
        "expected an M-family instance, got {machine_type}"
    );
}

/// The same search on GCP scales memory with the database (factor 1.1)
/// and lands on a high-memory machine type.
#[test]
fn test_gcp_blastn_large_database() {
    let db = large_nucl_db();
    let query = large_nucl_query();

    let mt_mode = get_mt_mode(Program::Blastn, "", &db, &query);
    let num_cpus = get_num_cpus(Program::Blastn, mt_mode, &query);

    let mem_limit = gcp_get_mem_limit(&db, 1.1);
    assert_eq!(mem_limit.as_str(), "44G");

    let machine_type = gcp_get_machine_type(&mem_limit, num_cpus);
    assert!(
        machine_type.starts_with("n1-highmem-"),
        "expected n1-highmem-*, got {machine_type}"
    );
}

/// Growing the database never shrinks the memory limit.
#[test]
fn test_memory_limit_monotonic_in_database_size() {
    let mut last = 0.0;
    for bytes in [1u64, 1 << 28, 1 << 32, 1 << 36, 1 << 40] {
        let db = DbData {
            mol_type: MolType::Prot,
            length: bytes,
            bytes_to_cache: bytes,
        };
        let gb = gcp_get_mem_limit(&db, 1.1).as_gb();
        assert!(gb >= last, "memory limit decreased at {bytes} bytes");
        last = gb;
    }
}

/// Growing the query never shrinks the chosen core count.
#[test]
fn test_cores_monotonic_in_query_size() {
    let mut last = 0;
    for length in [1u64, 10_000, 1_000_000, 50_000_000, 1_000_000_000] {
        let query = SeqData {
            length,
            mol_type: MolType::Prot,
        };
        let cpus = get_num_cpus(Program::Blastp, MtMode::SplitByQueries, &query);
        assert!(cpus >= last, "cores decreased at query length {length}");
        last = cpus;
    }
}

/// The same inputs always produce the same outputs.
#[test]
fn test_tuner_is_deterministic() {
    let db = large_nucl_db();
    let query = large_nucl_query();
    let first = (
        get_mt_mode(Program::Blastn, "", &db, &query),
        get_num_cpus(Program::Blastn, MtMode::SplitByDatabase, &query),
        get_batch_length(Program::Blastn, MtMode::SplitByDatabase, 16),
        aws_get_machine_type(&MemoryStr::new("20G").unwrap(), 16, "us-east-1"),
    );
    let second = (
        get_mt_mode(Program::Blastn, "", &db, &query),
        get_num_cpus(Program::Blastn, MtMode::SplitByDatabase, &query),
        get_batch_length(Program::Blastn, MtMode::SplitByDatabase, 16),
        aws_get_machine_type(&MemoryStr::new("20G").unwrap(), 16, "us-east-1"),
    );
    assert_eq!(first, second);
}

/// Batch lengths follow the program defaults in query-split mode and
/// scale with cores in database-split mode.
#[test]
fn test_batch_length_by_program() {
    assert_eq!(
        get_batch_length(Program::Blastn, MtMode::SplitByQueries, 8),
        5_000_000
    );
    assert_eq!(
        get_batch_length(Program::Blastp, MtMode::SplitByQueries, 8),
        10_000
    );
    assert_eq!(
        get_batch_length(Program::Tblastn, MtMode::SplitByQueries, 8),
        20_000
    );
    assert_eq!(
        get_batch_length(Program::Blastn, MtMode::SplitByDatabase, 8),
        40_000_000
    );
}
