use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use vaio_core::{VaioConfig, VaioError};
use vaio_pipeline::{Approver, Checkpoint, Decision, MediaTools, Narrator, Segment, Transcript};

const AUDIO_RATE: u32 = 44_100;
const AUDIO_CHANNELS: u32 = 2;

/// Looks a program up on `PATH` (or takes it as-is when it is a path).
pub fn find_program(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .flat_map(|dir| {
            let plain = dir.join(name);
            let exe = dir.join(format!("{name}.exe"));
            [plain, exe]
        })
        .find(|p| p.is_file())
}

fn require(program: &str) -> Result<PathBuf> {
    find_program(program).ok_or_else(|| anyhow!(VaioError::Dependency(format!("{program} not found on PATH"))))
}

fn run(mut cmd: Command, what: &str) -> Result<()> {
    debug!(command = ?cmd, "spawning");
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("failed to start {what}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(5)..].join("\n");
        bail!("{what} exited with {}: {}", output.status, tail);
    }
    Ok(())
}

/// `ffmpeg` for audio, the `whisper` CLI for transcription.
pub struct ProcessTools {
    whisper_model: String,
}

impl ProcessTools {
    pub fn new(cfg: &VaioConfig) -> Self {
        Self {
            whisper_model: cfg.whisper_model.clone(),
        }
    }
}

#[derive(Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    segments: Vec<WhisperSegment>,
    language: Option<String>,
}

#[derive(Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

impl MediaTools for ProcessTools {
    fn extract_audio(&self, video: &Path, audio: &Path) -> Result<()> {
        let ffmpeg = require("ffmpeg")?;
        let mut cmd = Command::new(ffmpeg);
        cmd.arg("-y")
            .arg("-i")
            .arg(video)
            .args(["-vn", "-acodec", "libmp3lame"])
            .args(["-ar", &AUDIO_RATE.to_string()])
            .args(["-ac", &AUDIO_CHANNELS.to_string()])
            .arg(audio);
        run(cmd, "ffmpeg")
    }

    fn transcribe(&self, audio: &Path, language_hint: &str) -> Result<Transcript> {
        let whisper = require("whisper")?;
        let out_dir = tempfile::tempdir().context("creating whisper output dir")?;
        let mut cmd = Command::new(whisper);
        cmd.arg(audio)
            .args(["--model", &self.whisper_model])
            .args(["--language", language_hint])
            .args(["--output_format", "json"])
            .arg("--output_dir")
            .arg(out_dir.path());
        info!(model = %self.whisper_model, "running whisper");
        run(cmd, "whisper")?;

        let stem = audio
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let json_path = out_dir.path().join(format!("{stem}.json"));
        let raw = fs::read_to_string(&json_path)
            .with_context(|| format!("whisper wrote no transcript at {}", json_path.display()))?;
        let parsed: WhisperOutput = serde_json::from_str(&raw).context("parsing whisper output")?;
        Ok(Transcript {
            segments: parsed
                .segments
                .into_iter()
                .map(|s| Segment {
                    start: s.start,
                    end: s.end,
                    text: s.text,
                })
                .collect(),
            language: parsed.language,
        })
    }
}

/// Runs the configured narration command template.
pub struct CommandNarrator {
    template: Option<String>,
}

impl CommandNarrator {
    pub fn new(cfg: &VaioConfig) -> Self {
        Self {
            template: cfg.tts_command.clone(),
        }
    }

    fn argv(&self, input: &Path, output: &Path, lang: &str) -> vaio_core::Result<Vec<String>> {
        let template = self
            .template
            .as_deref()
            .ok_or_else(|| VaioError::Dependency("VAIO_TTS_COMMAND is not set".into()))?;
        let argv: Vec<String> = template
            .split_whitespace()
            .map(|part| {
                part.replace("{input}", &input.to_string_lossy())
                    .replace("{output}", &output.to_string_lossy())
                    .replace("{lang}", lang)
            })
            .collect();
        if argv.is_empty() {
            return Err(VaioError::Dependency("VAIO_TTS_COMMAND is empty".into()));
        }
        Ok(argv)
    }
}

impl Narrator for CommandNarrator {
    fn ensure_available(&self) -> vaio_core::Result<()> {
        let argv = self.argv(Path::new("in"), Path::new("out"), "en")?;
        match find_program(&argv[0]) {
            Some(_) => Ok(()),
            None => Err(VaioError::Dependency(format!("narration command {} not found", argv[0]))),
        }
    }

    fn narrate(&self, text: &str, lang: &str, output: &Path) -> Result<()> {
        let mut input = tempfile::Builder::new()
            .prefix("vaio-tts-")
            .suffix(".txt")
            .tempfile()?;
        input.write_all(text.as_bytes())?;
        input.flush()?;
        let argv = self.argv(input.path(), output, lang)?;
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        run(cmd, "narration command")
    }
}

/// Asks on the terminal; a bare Enter approves, end of input defers.
pub struct PromptApprover;

fn decision_for(answer: &str) -> Decision {
    match answer.trim().to_lowercase().as_str() {
        "" | "y" | "yes" => Decision::Approved,
        _ => Decision::Rejected,
    }
}

impl Approver for PromptApprover {
    fn review(&self, checkpoint: Checkpoint, artifact: &Path) -> Decision {
        let question = match checkpoint {
            Checkpoint::CaptionsReview => "Are the captions correct?",
            Checkpoint::DescriptionReview => "Are the title and description final?",
        };
        eprintln!("\nReview {} (edit it now if needed).", artifact.display());
        eprint!("{question} [Y/n]: ");
        let _ = io::stderr().flush();
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(0) | Err(_) => Decision::Deferred,
            Ok(_) => decision_for(&answer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn narrator(template: Option<&str>) -> CommandNarrator {
        CommandNarrator {
            template: template.map(str::to_string),
        }
    }

    #[test]
    fn narration_template_placeholders_are_filled() {
        let n = narrator(Some("kokoro-tts {input} {output} --lang {lang}"));
        let argv = n.argv(Path::new("/tmp/in.txt"), Path::new("/v/tts/clip.es.mp3"), "es").unwrap();
        assert_eq!(argv, vec!["kokoro-tts", "/tmp/in.txt", "/v/tts/clip.es.mp3", "--lang", "es"]);
    }

    #[test]
    fn missing_narration_command_is_a_dependency_error() {
        let err = narrator(None).ensure_available().unwrap_err();
        assert!(matches!(err, VaioError::Dependency(_)));
        let err = narrator(Some("definitely-not-installed-tts {input}")).ensure_available().unwrap_err();
        assert!(matches!(err, VaioError::Dependency(_)));
    }

    #[test]
    fn bare_enter_approves_and_anything_else_rejects() {
        for answer in ["\n", "y\n", "YES\r\n", "  yes  "] {
            assert_eq!(decision_for(answer), Decision::Approved, "{answer:?}");
        }
        for answer in ["n\n", "no", "later\n"] {
            assert_eq!(decision_for(answer), Decision::Rejected, "{answer:?}");
        }
    }

    #[test]
    fn whisper_json_is_tolerant_of_extra_fields() {
        let raw = r#"{"text":"hi","segments":[{"id":0,"start":0.0,"end":1.2,"text":" hi"}],"language":"en"}"#;
        let parsed: WhisperOutput = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.segments.len(), 1);
        assert_eq!(parsed.language.as_deref(), Some("en"));
    }
}
