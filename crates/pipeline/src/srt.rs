//! SubRip helpers: building captions from segments, scrubbing known
//! transcription hallucinations, and extracting the spoken text.

use crate::tools::Segment;

/// Credits and sign-offs speech models invent over silence.
pub const HALLUCINATIONS: [&str; 6] = [
    "субтитры создавал",
    "dimatorzok",
    "subtitles by",
    "edited by",
    "спасибо за просмотр",
    "thank you for watching",
];

pub fn is_hallucination(text: &str) -> bool {
    let lower = text.to_lowercase();
    HALLUCINATIONS.iter().any(|phrase| lower.contains(phrase))
}

/// `hh:mm:ss,mmm`
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let (whole, millis) = (total_ms / 1000, total_ms % 1000);
    let (hours, rest) = (whole / 3600, whole % 3600);
    format!("{:02}:{:02}:{:02},{:03}", hours, rest / 60, rest % 60, millis)
}

/// Drops hallucinated or empty segments and numbers the rest from 1.
pub fn segments_to_srt(segments: &[Segment]) -> String {
    segments
        .iter()
        .filter(|seg| !is_hallucination(&seg.text))
        .filter_map(|seg| {
            let text = seg.text.trim();
            (!text.is_empty()).then_some((text, seg))
        })
        .enumerate()
        .map(|(idx, (text, seg))| {
            format!(
                "{}\n{} --> {}\n{}\n",
                idx + 1,
                format_timestamp(seg.start),
                format_timestamp(seg.end),
                text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Removes hallucinated lines from model-produced subtitles.
pub fn clean_srt(text: &str) -> String {
    text.lines()
        .filter(|line| !is_hallucination(line))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Spoken text only: no cue numbers, timecodes or blank lines.
pub fn spoken_text(srt: &str) -> String {
    srt.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.contains("-->"))
        .filter(|line| !line.chars().all(|c| c.is_ascii_digit()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64, text: &str) -> Segment {
        Segment {
            start,
            end,
            text: text.to_string(),
        }
    }

    #[test]
    fn timestamps_are_zero_padded() {
        assert_eq!(format_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_timestamp(3725.5), "01:02:05,500");
        assert_eq!(format_timestamp(59.999), "00:00:59,999");
    }

    #[test]
    fn hallucinated_segments_are_dropped_and_renumbered() {
        let srt = segments_to_srt(&[
            seg(0.0, 1.5, " Hello there. "),
            seg(1.5, 3.0, "Субтитры создавал DimaTorzok"),
            seg(3.0, 4.0, "   "),
            seg(4.0, 5.25, "Second line."),
            seg(5.25, 6.0, "Thank you for watching!"),
        ]);
        assert_eq!(
            srt,
            "1\n00:00:00,000 --> 00:00:01,500\nHello there.\n\n\
             2\n00:00:04,000 --> 00:00:05,250\nSecond line.\n"
        );
    }

    #[test]
    fn clean_srt_drops_banned_lines_only() {
        let raw = "1\n00:00:00,000 --> 00:00:01,000\nHallo\nSubtitles by ACME\n\n";
        assert_eq!(clean_srt(raw), "1\n00:00:00,000 --> 00:00:01,000\nHallo");
    }

    #[test]
    fn spoken_text_strips_cue_structure() {
        let srt = "1\n00:00:00,000 --> 00:00:01,000\nHello\n\n2\n00:00:01,000 --> 00:00:02,000\n42 apples\n";
        assert_eq!(spoken_text(srt), "Hello 42 apples");
    }
}
