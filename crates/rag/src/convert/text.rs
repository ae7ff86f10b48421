use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use html2text::from_read;

pub fn read_plain(path: &Path) -> Result<String> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read text file {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn read_pdf(path: &Path) -> Result<String> {
    pdf_extract::extract_text(path)
        .map_err(|e| anyhow!("pdf extract failed for {}: {e}", path.display()))
}

pub fn read_html(path: &Path) -> Result<String> {
    let raw = read_plain(path)?;
    Ok(from_read(raw.as_bytes(), 80))
}
