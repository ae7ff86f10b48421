/// Splits on blank-line paragraph boundaries, packing paragraphs into chunks
/// of at most `max_chars` characters. Oversized paragraphs are cut at the last
/// whitespace that fits.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    for paragraph in paragraphs(text) {
        for piece in split_long(&paragraph, max_chars) {
            let joined_len = if current.is_empty() {
                piece.chars().count()
            } else {
                current.chars().count() + 2 + piece.chars().count()
            };
            if joined_len > max_chars && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&piece);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !buf.is_empty() {
                out.push(buf.join("\n"));
                buf.clear();
            }
        } else {
            buf.push(line.trim_end());
        }
    }
    if !buf.is_empty() {
        out.push(buf.join("\n"));
    }
    out
}

fn split_long(paragraph: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest: &str = paragraph;
    while rest.chars().count() > max_chars {
        let hard_end = rest
            .char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        let cut = if rest[hard_end..].starts_with(char::is_whitespace) {
            hard_end
        } else {
            rest[..hard_end]
                .rfind(char::is_whitespace)
                .filter(|idx| *idx > 0)
                .unwrap_or(hard_end)
        };
        pieces.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start();
    }
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}
