use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;

mod structured;
mod tabular;
mod text;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Text,
    Markdown,
    Pdf,
    Html,
    Json,
    Yaml,
    Toml,
    Ini,
    Csv,
    Tsv,
    CsvGz,
    TsvGz,
}

impl FileFormat {
    /// `None` for extensions no extractor handles; extensionless files read as text.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_lowercase();
        if name.ends_with(".csv.gz") {
            return Some(FileFormat::CsvGz);
        }
        if name.ends_with(".tsv.gz") {
            return Some(FileFormat::TsvGz);
        }
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => ext.to_lowercase(),
            None => return Some(FileFormat::Text),
        };
        match ext.as_str() {
            "txt" | "text" => Some(FileFormat::Text),
            "md" | "markdown" => Some(FileFormat::Markdown),
            "pdf" => Some(FileFormat::Pdf),
            "html" | "htm" => Some(FileFormat::Html),
            "json" => Some(FileFormat::Json),
            "yml" | "yaml" => Some(FileFormat::Yaml),
            "toml" => Some(FileFormat::Toml),
            "ini" | "cfg" => Some(FileFormat::Ini),
            "csv" => Some(FileFormat::Csv),
            "tsv" => Some(FileFormat::Tsv),
            _ => None,
        }
    }
}

/// Text pulled out of one source file plus what the format itself declares.
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    pub text: String,
    pub fields: BTreeMap<String, String>,
    pub category: Option<String>,
}

impl Extracted {
    fn plain(text: String) -> Self {
        Self {
            text,
            ..Self::default()
        }
    }
}

pub fn extract(path: &Path, format: FileFormat) -> Result<Extracted> {
    match format {
        FileFormat::Text | FileFormat::Markdown => text::read_plain(path).map(Extracted::plain),
        FileFormat::Pdf => text::read_pdf(path).map(Extracted::plain),
        FileFormat::Html => text::read_html(path).map(Extracted::plain),
        FileFormat::Json => structured::convert_json(path),
        FileFormat::Yaml => structured::convert_yaml(path),
        FileFormat::Toml => structured::convert_toml(path),
        FileFormat::Ini => structured::convert_ini(path),
        FileFormat::Csv => tabular::convert_csv(path).map(Extracted::plain),
        FileFormat::Tsv => tabular::convert_tsv(path).map(Extracted::plain),
        FileFormat::CsvGz => tabular::convert_csv_gz(path).map(Extracted::plain),
        FileFormat::TsvGz => tabular::convert_tsv_gz(path).map(Extracted::plain),
    }
}
