use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const CAPTIONS_DIR: &str = "captions";
pub const DESCRIPTION_DIR: &str = "description";
pub const TTS_DIR: &str = "tts";
pub const TEMPLATE_FILENAME: &str = "tdtmp.txt";

/// Output locations of every stage, relative to the asset.
#[derive(Debug, Clone)]
pub struct AssetLayout {
    video: PathBuf,
}

impl AssetLayout {
    pub fn new<P: AsRef<Path>>(video: P) -> Self {
        Self {
            video: video.as_ref().to_path_buf(),
        }
    }

    pub fn video(&self) -> &Path {
        &self.video
    }

    pub fn dir(&self) -> PathBuf {
        self.video
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn stem(&self) -> String {
        self.video
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "asset".to_string())
    }

    pub fn audio_path(&self) -> PathBuf {
        self.video.with_extension("mp3")
    }

    pub fn captions_dir(&self) -> PathBuf {
        self.dir().join(CAPTIONS_DIR)
    }

    pub fn caption_path(&self, lang: &str) -> PathBuf {
        self.captions_dir().join(format!("{}.{}.srt", self.stem(), lang))
    }

    pub fn description_dir(&self) -> PathBuf {
        self.dir().join(DESCRIPTION_DIR)
    }

    pub fn td_path(&self, lang: &str) -> PathBuf {
        self.description_dir().join(format!("td.{lang}.txt"))
    }

    pub fn tts_dir(&self) -> PathBuf {
        self.dir().join(TTS_DIR)
    }

    pub fn tts_path(&self, lang: &str) -> PathBuf {
        self.tts_dir().join(format!("{}.{}.mp3", self.stem(), lang))
    }

    pub fn template_candidates(&self) -> Vec<PathBuf> {
        let mut out = vec![self.dir().join(TEMPLATE_FILENAME)];
        if let Ok(cwd) = std::env::current_dir() {
            out.push(cwd.join(TEMPLATE_FILENAME));
            out.push(cwd.join("templates").join(TEMPLATE_FILENAME));
        }
        out
    }
}

pub fn ensure_dir(path: &Path) -> io::Result<&Path> {
    fs::create_dir_all(path)?;
    Ok(path)
}

/// Reads text as UTF-8, falling back to lossy decoding.
pub fn read_text(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    };
    Ok(text.trim().to_string())
}

/// Writes trimmed text with a single trailing newline.
pub fn write_text(path: &Path, text: &str) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{}\n", text.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outputs_are_placed_beside_the_asset() {
        let layout = AssetLayout::new("/media/show/ep1.mp4");
        assert_eq!(layout.audio_path(), PathBuf::from("/media/show/ep1.mp3"));
        assert_eq!(
            layout.caption_path("en"),
            PathBuf::from("/media/show/captions/ep1.en.srt")
        );
        assert_eq!(
            layout.td_path("de"),
            PathBuf::from("/media/show/description/td.de.txt")
        );
        assert_eq!(layout.tts_path("ja"), PathBuf::from("/media/show/tts/ep1.ja.mp3"));
    }

    #[test]
    fn write_text_normalizes_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.txt");
        write_text(&path, "  hello \n\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");
        assert_eq!(read_text(&path).unwrap(), "hello");
    }
}
