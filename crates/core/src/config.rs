use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, VaioError};
use crate::knowledge::KbRoots;

const ENV_PREFIX: &str = "VAIO_";
pub const DEFAULT_CONFIG_FILE: &str = "vaio.toml";
pub const DEFAULT_CONTEXT_THRESHOLD: f32 = 0.35;

const KNOWN_LANGUAGES: &[(&str, &str)] = &[
    ("ar", "Arabic"),
    ("ja", "Japanese"),
    ("zh", "Mandarin"),
    ("de", "German"),
    ("it", "Italian"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("en", "English"),
    ("ru", "Russian"),
    ("pt", "Portuguese"),
    ("hi", "Hindi"),
];
const DEFAULT_TARGETS: &str = "ar,ja,zh,de,it,es,fr,en,ru";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Language {
    pub code: String,
    pub name: String,
}

impl Language {
    pub fn from_code(code: &str) -> Self {
        let code = code.trim().to_lowercase();
        let name = KNOWN_LANGUAGES
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, n)| n.to_string())
            .unwrap_or_else(|| code.to_uppercase());
        Self { code, name }
    }
}

#[derive(Debug, Clone)]
pub struct VaioConfig {
    pub provider: String,
    pub model: String,
    pub ollama_host: String,
    pub whisper_model: String,
    pub embed_provider: String,
    pub embed_model: Option<String>,
    pub embed_timeout: Duration,
    pub temperature: f32,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub concurrency: usize,
    pub source_language: Language,
    pub target_languages: Vec<Language>,
    pub kb_root: PathBuf,
    pub data_root: PathBuf,
    pub context_top_k: usize,
    pub context_threshold: f32,
    pub context_max_chars: usize,
    pub chunk_chars: usize,
    pub tts_command: Option<String>,
}

impl VaioConfig {
    /// Environment over the optional TOML file over built-in defaults.
    pub fn from_env(file: Option<&Path>) -> Result<Self> {
        let table = match file {
            Some(path) => Some(read_table(path)?),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Some(read_table(Path::new(DEFAULT_CONFIG_FILE))?)
            }
            None => None,
        };
        Self::from_lookup(|key| {
            env::var(format!("{ENV_PREFIX}{key}"))
                .ok()
                .or_else(|| table.as_ref().and_then(|t| table_value(t, key)))
        })
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let source_code = get("SOURCE_LANG_CODE").unwrap_or_else(|| "en".to_string());
        let mut source_language = Language::from_code(&source_code);
        if let Some(name) = get("SOURCE_LANG") {
            source_language.name = name;
        }
        let target_languages = parse_languages(&get("TARGET_LANGS").unwrap_or_else(|| DEFAULT_TARGETS.to_string()))?;
        let backoff_secs: f64 = parse_or(get("BACKOFF_S"), "BACKOFF_S", 1.0)?;
        if backoff_secs < 0.0 {
            return Err(VaioError::config("BACKOFF_S must not be negative"));
        }
        let initial_backoff = Duration::try_from_secs_f64(backoff_secs)
            .map_err(|e| VaioError::config(format!("invalid value for {ENV_PREFIX}BACKOFF_S: {backoff_secs} ({e})")))?;
        let max_retries: u32 = parse_or(get("MAX_RETRIES"), "MAX_RETRIES", 3)?;
        let default_concurrency = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(8);
        let concurrency: usize = parse_or(get("CONCURRENCY"), "CONCURRENCY", default_concurrency)?;
        Ok(Self {
            provider: get("PROVIDER").unwrap_or_else(|| "ollama".to_string()).to_lowercase(),
            model: get("MODEL").unwrap_or_else(|| "gpt-oss".to_string()),
            ollama_host: get("OLLAMA_HOST").unwrap_or_else(|| "http://localhost:11434".to_string()),
            whisper_model: get("WHISPER_MODEL").unwrap_or_else(|| "large-v3-turbo".to_string()),
            embed_provider: get("EMBED_PROVIDER").unwrap_or_else(|| "hash".to_string()).to_lowercase(),
            embed_model: get("EMBED_MODEL"),
            embed_timeout: Duration::from_secs(parse_or(get("EMBED_TIMEOUT_S"), "EMBED_TIMEOUT_S", 30)?),
            temperature: parse_or(get("TEMPERATURE"), "TEMPERATURE", 0.3)?,
            max_retries: max_retries.max(1),
            initial_backoff,
            concurrency: concurrency.max(1),
            source_language,
            target_languages,
            kb_root: get("KB_ROOT").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("knowledge")),
            data_root: get("DATA_ROOT").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data/kb")),
            context_top_k: parse_or(get("CONTEXT_TOP_K"), "CONTEXT_TOP_K", 3)?,
            context_threshold: parse_or(get("CONTEXT_THRESHOLD"), "CONTEXT_THRESHOLD", DEFAULT_CONTEXT_THRESHOLD)?,
            context_max_chars: parse_or(get("CONTEXT_MAX_CHARS"), "CONTEXT_MAX_CHARS", 4000)?,
            chunk_chars: parse_or(get("CHUNK_CHARS"), "CHUNK_CHARS", 1500)?,
            tts_command: get("TTS_COMMAND"),
        })
    }

    pub fn kb_roots(&self) -> KbRoots {
        KbRoots::new(&self.kb_root, &self.data_root)
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| VaioError::config(format!("invalid value for {ENV_PREFIX}{key}: {value}"))),
        None => Ok(default),
    }
}

fn parse_languages(raw: &str) -> Result<Vec<Language>> {
    let mut out: Vec<Language> = Vec::new();
    for code in raw.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        let lang = Language::from_code(code);
        if !out.iter().any(|l| l.code == lang.code) {
            out.push(lang);
        }
    }
    if out.is_empty() {
        return Err(VaioError::config("TARGET_LANGS must name at least one language"));
    }
    Ok(out)
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let raw = fs::read_to_string(path)?;
    raw.parse::<toml::Table>()
        .map_err(|e| VaioError::config(format!("invalid config {}: {e}", path.display())))
}

fn table_value(table: &toml::Table, key: &str) -> Option<String> {
    match table.get(&key.to_lowercase())? {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(","),
        ),
        _ => None,
    }
}
