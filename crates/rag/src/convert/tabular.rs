use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use flate2::read::MultiGzDecoder;

pub fn convert_csv(path: &Path) -> Result<String> {
    let file = fs::File::open(path)
        .with_context(|| format!("failed to open CSV file {}", path.display()))?;
    rows_from_reader(path, file, b',')
}

pub fn convert_tsv(path: &Path) -> Result<String> {
    let file = fs::File::open(path)
        .with_context(|| format!("failed to open TSV file {}", path.display()))?;
    rows_from_reader(path, file, b'\t')
}

pub fn convert_csv_gz(path: &Path) -> Result<String> {
    let file = fs::File::open(path)
        .with_context(|| format!("failed to open CSV file {}", path.display()))?;
    rows_from_reader(path, MultiGzDecoder::new(file), b',')
}

pub fn convert_tsv_gz(path: &Path) -> Result<String> {
    let file = fs::File::open(path)
        .with_context(|| format!("failed to open TSV file {}", path.display()))?;
    rows_from_reader(path, MultiGzDecoder::new(file), b'\t')
}

/// Every record, header included, as one `", "`-joined line.
fn rows_from_reader<R: Read>(path: &Path, reader: R, delimiter: u8) -> Result<String> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let mut lines = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("invalid row in {}", path.display()))?;
        let line = record
            .iter()
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(", ");
        if !line.trim_matches([',', ' ']).is_empty() {
            lines.push(line);
        }
    }
    Ok(lines.join("\n"))
}
