// Integration tests for the mercount binary

use anyhow::Result;
use assert_cmd::Command;
use mercount::io::read_all;
use mercount::MerCodec;
use predicates::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// Helper to create a temporary test FASTA file
fn create_test_fasta(dir: &TempDir, filename: &str, content: &str) -> Result<PathBuf> {
    let path = dir.path().join(filename);
    fs::write(&path, content)?;
    Ok(path)
}

fn decoded_counts(path: &Path, k: usize) -> BTreeMap<String, u64> {
    let codec = MerCodec::new(k, false).unwrap();
    let (_, records) = read_all(path).unwrap();
    records.into_iter().map(|(key, count)| (codec.decode(key), count)).collect()
}

#[test]
fn test_binary_output() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let fasta = create_test_fasta(&temp_dir, "reads.fa", ">r\nACGTACGT\n")?;
    let output = temp_dir.path().join("counts.mc");

    Command::cargo_bin("mercount")?
        .args(["-m", "4", "-s", "1k", "-t", "2", "-o"])
        .arg(&output)
        .arg(&fasta)
        .assert()
        .success();

    assert!(output.exists());
    let counts = decoded_counts(&output, 4);
    assert_eq!(counts.get("ACGT"), Some(&2));
    assert_eq!(counts.values().sum::<u64>(), 5);
    Ok(())
}

#[test]
fn test_text_output() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let fasta = create_test_fasta(&temp_dir, "reads.fa", ">r\nACGTACGT\n")?;
    let output = temp_dir.path().join("counts.txt");

    Command::cargo_bin("mercount")?
        .args(["-m", "4", "-s", "16", "--text", "-o"])
        .arg(&output)
        .arg(&fasta)
        .assert()
        .success();

    let content = fs::read_to_string(&output)?;
    assert!(content.contains("\"text/unsorted\""), "text dump should carry its header");
    assert!(content.lines().any(|l| l == "ACGT 2"));
    assert!(content.lines().any(|l| l == "TACG 1"));
    Ok(())
}

#[test]
fn test_disk_mode_with_timing() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let fasta = create_test_fasta(
        &temp_dir,
        "reads.fa",
        ">r1\nACGTTGCATGCAAGCTTCGATCGGATCCATGCAGTACGATCGAT\n>r2\nTTGACCGTAGGCATTACAGGT\n",
    )?;
    let output = temp_dir.path().join("counts.mc");
    let timing = temp_dir.path().join("timing.txt");

    Command::cargo_bin("mercount")?
        .args(["-m", "6", "-s", "8", "--disk", "-t", "3", "--timing"])
        .arg(&timing)
        .arg("-o")
        .arg(&output)
        .arg(&fasta)
        .assert()
        .success();

    let counts = decoded_counts(&output, 6);
    assert_eq!(counts.values().sum::<u64>(), (44 - 5) + (21 - 5));
    let report = fs::read_to_string(&timing)?;
    for phase in ["Init", "Counting", "Writing"] {
        assert!(report.contains(phase), "missing phase {}", phase);
    }
    // Intermediate files are removed after the merge
    assert!(!temp_dir.path().join("counts.mc_0").exists());
    Ok(())
}

#[test]
fn test_lower_count_filter() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let fasta = create_test_fasta(&temp_dir, "reads.fa", ">r\nACGTACGT\n")?;
    let output = temp_dir.path().join("counts.mc");

    Command::cargo_bin("mercount")?
        .args(["-m", "4", "-s", "64", "-L", "2", "-o"])
        .arg(&output)
        .arg(&fasta)
        .assert()
        .success();

    let counts = decoded_counts(&output, 4);
    assert_eq!(counts.into_iter().collect::<Vec<_>>(), vec![("ACGT".to_string(), 2)]);
    Ok(())
}

#[test]
fn test_generator_input() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let commands = temp_dir.path().join("generators");
    fs::write(&commands, "# one command per line\necho '>r'; echo ACGTACGT\n")?;
    let output = temp_dir.path().join("counts.mc");

    Command::cargo_bin("mercount")?
        .args(["-m", "4", "-s", "64", "-g"])
        .arg(&commands)
        .arg("-o")
        .arg(&output)
        .assert()
        .success();

    assert_eq!(decoded_counts(&output, 4).get("ACGT"), Some(&2));
    Ok(())
}

#[test]
fn test_failing_generator_is_reported() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let commands = temp_dir.path().join("generators");
    fs::write(&commands, "exit 3\n")?;

    Command::cargo_bin("mercount")?
        .args(["-m", "4", "-s", "64", "-g"])
        .arg(&commands)
        .arg("-o")
        .arg(temp_dir.path().join("counts.mc"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("exit 3"));
    Ok(())
}

#[test]
fn test_missing_bloom_filter_fails() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let fasta = create_test_fasta(&temp_dir, "reads.fa", ">r\nACGTACGT\n")?;

    Command::cargo_bin("mercount")?
        .args(["-m", "4", "-s", "64", "--bf"])
        .arg(temp_dir.path().join("missing.bc"))
        .arg(&fasta)
        .assert()
        .failure();
    Ok(())
}

#[test]
fn test_invalid_arguments() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let fasta = create_test_fasta(&temp_dir, "reads.fa", ">r\nACGTACGT\n")?;

    // k above the supported maximum
    Command::cargo_bin("mercount")?
        .args(["-m", "40", "-s", "64"])
        .arg(&fasta)
        .assert()
        .failure()
        .stderr(predicate::str::contains("k-mer length"));

    // --disk never grows, so a maximum size makes no sense
    Command::cargo_bin("mercount")?
        .args(["-m", "4", "-s", "64", "--disk", "--max-size", "1k"])
        .arg(&fasta)
        .assert()
        .failure();

    // No input at all
    Command::cargo_bin("mercount")?
        .args(["-m", "4", "-s", "64"])
        .assert()
        .failure();
    Ok(())
}
