//! JSON files used by the shipped binaries: artifact, reference distribution
//! and JSON-lines transaction history.

use crate::features::ReferenceDistribution;
use crate::models::{ArtifactData, EnsembleArtifact};
use crate::types::Transaction;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

fn write_json<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

fn read_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn save_artifact<P: AsRef<Path>>(path: P, artifact: &EnsembleArtifact) -> Result<()> {
    write_json(path, &artifact.export())
}

pub fn load_artifact<P: AsRef<Path>>(path: P) -> Result<EnsembleArtifact> {
    let data: ArtifactData = read_json(&path)?;
    EnsembleArtifact::import(data)
        .with_context(|| format!("Rejected artifact {}", path.as_ref().display()))
}

pub fn save_reference<P: AsRef<Path>>(path: P, reference: &ReferenceDistribution) -> Result<()> {
    write_json(path, reference)
}

pub fn load_reference<P: AsRef<Path>>(path: P) -> Result<ReferenceDistribution> {
    read_json(path)
}

/// One JSON transaction per line; blank lines are skipped.
pub fn read_transactions<P: AsRef<Path>>(path: P) -> Result<Vec<Transaction>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut transactions = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let tx: Transaction = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid transaction", path.display(), line_no + 1))?;
        transactions.push(tx);
    }
    Ok(transactions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("reference.json");
        let reference = ReferenceDistribution::from_amounts([5.0, 1.0, 3.0]);

        save_reference(&path, &reference).unwrap();
        assert_eq!(load_reference(&path).unwrap(), reference);
    }

    #[test]
    fn test_read_transactions_jsonl() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"transaction_id":"a","customer_id":"C1","terminal_id":"T1","amount":10.0,"timestamp":"2024-04-01T00:00:00Z","label":1}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"TRANSACTION_ID":"b","CUSTOMER_ID":"C1","TERMINAL_ID":"T2","TX_AMOUNT":20.0,"TX_DATETIME":"2024-04-01T01:00:00Z","TX_FRAUD":0}}"#
        )
        .unwrap();

        let txs = read_transactions(file.path()).unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].label, Some(true));
        assert_eq!(txs[1].label, Some(false));
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = load_reference("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("not/here.json"));
    }
}
