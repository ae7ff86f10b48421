//! Prompt texts for the generation stages.

use crate::template::ParsedTemplate;

pub const SYSTEM_DESCRIPTION: &str = "You are a YouTube content strategist, copywriter and SEO specialist. \
Write a readable, search-optimized video description in {src_lang} from the captions, \
the contextual notes and the layout template you are given.\n\n\
Requirements:\n\
1) Derive the topic, tone and key moments from the captions.\n\
2) Fill every relevant template placeholder with coherent, engaging text.\n\
3) Keep a professional tone with a natural rhythm.\n\
4) Stay within the provided material; do not introduce unrelated topics.\n\
5) Never emit metadata markers such as <!-- --> or ## headings.\n\
6) Keep the static parts of the template unchanged.\n\
7) Reply with the final description text only.";

pub const USER_DESCRIPTION: &str = "Write a complete YouTube description from the material below.\n\n\
## Captions\n{captions}\n\n\
## Template\n{template}\n\n\
Where it fits, close with hashtags taken from the context or the template.";

pub const SYSTEM_TITLE: &str = "You are a YouTube SEO and media marketing specialist. \
Write one short, compelling, search-optimized title for a video from its description, \
captions and context.\n\n\
Rules:\n\
1) The title reflects the actual topic and emotional core of the video.\n\
2) Stay under 100 characters where possible.\n\
3) Use Title Case.\n\
4) No hashtags, emojis or quotation marks unless essential.\n\
5) Reply with the title text only.";

pub const USER_TITLE: &str = "Write the most relevant, high click-through YouTube title in {src_lang} \
for the video described below.\n\n\
## Captions\n{captions}\n\n\
## Description\n{description}\n\n\
Prefer natural phrasing with strong search-intent keywords.";

pub const SYSTEM_TRANSLATE_TD: &str = "You are a specialist in multilingual SEO, localization and cultural adaptation. \
Strict rules:\n\
1) Reply with the translated, search-optimized text only.\n\
2) No explanations, comments, metadata or notes.\n\
3) Keep the structure, formatting and line breaks.\n\
4) Adapt naturally to the cultural and linguistic norms of the audience.\n\
5) Prefer popular search phrases and idioms of the target language.";

pub const USER_TRANSLATE_TD: &str = "Translate and optimize the TITLE and DESCRIPTION below from {src_lang} to {tgt_lang}. \
Keep the layout and formatting exactly.\n\n\
----- BEGIN CONTENT -----\n{content}\n----- END CONTENT -----";

pub const SYSTEM_TRANSLATE_CAPTIONS: &str = "You are a professional subtitle translator. \
Translate every text line between timestamps faithfully and naturally, \
keeping cue numbers and timecodes identical.\n\
Rules:\n\
1) Never change timestamps or formatting.\n\
2) Translate spoken lines only.\n\
3) Reply with valid .srt text only.";

pub const USER_TRANSLATE_CAPTIONS: &str = "Translate these SRT subtitles from {src_lang} to {tgt_lang}. \
Keep timestamps, numbering and layout identical.\n\n\
----- BEGIN SRT -----\n{content}\n----- END SRT -----";

pub fn description_system(src_lang: &str) -> String {
    SYSTEM_DESCRIPTION.replace("{src_lang}", src_lang)
}

/// Structured description request: template blocks first, then the material.
pub fn description_user(captions: &str, template: &ParsedTemplate) -> String {
    let body = USER_DESCRIPTION
        .replace("{captions}", captions)
        .replace("{template}", &template.template_text());
    format!(
        "## Instructions\n{}\n\n## Context\n{}\n\n## Description Base\n{}\n\n## Hashtags\n{}\n\n{}",
        template.block("Instructions"),
        template.block("Context"),
        template.block("Video Description"),
        template.block("Hash tags"),
        body
    )
}

pub fn title_user(src_lang: &str, captions: &str, description: &str) -> String {
    let captions = captions.trim();
    let description = description.trim();
    let mut prompt = USER_TITLE
        .replace("{src_lang}", src_lang)
        .replace("{captions}", if captions.is_empty() { "(no captions)" } else { captions })
        .replace(
            "{description}",
            if description.is_empty() { "(no description)" } else { description },
        );
    let combined = match (description.is_empty(), captions.is_empty()) {
        (false, false) => format!("## DESCRIPTION\n{description}\n\n## CAPTIONS\n{captions}"),
        (false, true) => format!("## DESCRIPTION\n{description}"),
        (true, false) => format!("## CAPTIONS\n{captions}"),
        (true, true) => String::new(),
    };
    if !combined.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&combined);
    }
    prompt
}

/// Wraps an already-injected title prompt with the template hints, if any.
pub fn with_title_hints(prompt: String, template: &ParsedTemplate) -> String {
    let inst = template.block("Instructions");
    let ctx = template.block("Context");
    let name = template.block("Video Name");
    if inst.is_empty() && ctx.is_empty() && name.is_empty() {
        return prompt;
    }
    format!("## Instructions\n{inst}\n\n## Context\n{ctx}\n\n## Video Name Hint\n{name}\n\n{prompt}")
}

pub fn translate_td_user(src_lang: &str, tgt_lang: &str, content: &str) -> String {
    USER_TRANSLATE_TD
        .replace("{src_lang}", src_lang)
        .replace("{tgt_lang}", tgt_lang)
        .replace("{content}", content)
}

pub fn translate_captions_user(src_lang: &str, tgt_lang: &str, content: &str) -> String {
    USER_TRANSLATE_CAPTIONS
        .replace("{src_lang}", src_lang)
        .replace("{tgt_lang}", tgt_lang)
        .replace("{content}", content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_prompt_carries_template_blocks() {
        let template = ParsedTemplate::parse(
            "<!-- <Instructions> -->Be brief<!-- </Instructions> -->\n\
             <!-- <Hash tags> -->#coffee<!-- </Hash tags> -->\nFollow us!",
        );
        let prompt = description_user("1\n00:00:00,000 --> 00:00:01,000\nhi", &template);
        assert!(prompt.starts_with("## Instructions\nBe brief\n\n## Context\n\n\n"));
        assert!(prompt.contains("## Hashtags\n#coffee"));
        assert!(prompt.contains("## Template\nFollow us!"));
        assert!(prompt.contains("## Captions\n1\n00:00:00,000"));
    }

    #[test]
    fn title_prompt_handles_missing_parts() {
        let prompt = title_user("English", "", "A calm morning.");
        assert!(prompt.contains("## Captions\n(no captions)"));
        assert!(prompt.ends_with("## DESCRIPTION\nA calm morning."));
        assert!(!prompt.contains("## CAPTIONS"));
    }

    #[test]
    fn title_hints_only_when_present() {
        let plain = ParsedTemplate::parse("just text");
        assert_eq!(with_title_hints("p".into(), &plain), "p");
        let named = ParsedTemplate::parse("<!-- <Video Name> -->Morning Brew<!-- </Video Name> -->");
        let out = with_title_hints("p".into(), &named);
        assert!(out.contains("## Video Name Hint\nMorning Brew"));
        assert!(out.ends_with("\n\np"));
    }

    #[test]
    fn translation_prompts_fill_languages() {
        let p = translate_captions_user("English", "German", "1\n...");
        assert!(p.starts_with("Translate these SRT subtitles from English to German."));
        assert!(p.contains("----- BEGIN SRT -----\n1\n...\n----- END SRT -----"));
        let p = translate_td_user("English", "French", "Title\n\n\nBody");
        assert!(p.contains("from English to French"));
    }
}
