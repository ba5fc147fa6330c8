//! Caption markup to plain text, plus the lexical cleanup applied to every
//! transcript before it is stored.

use regex::Regex;
use std::sync::LazyLock;

/// Transcripts at or below this many characters are placeholders, not speech
pub const MIN_TRANSCRIPT_LEN: usize = 50;

static RE_TIMED_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(text|p)\b[^>]*>([\s\S]*?)</(?:text|p)>").expect("timed text regex")
});
static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("tag regex"));
static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static RE_CUE_TIMING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{2}:\d{2}|-->").expect("cue timing regex"));
static RE_VTT_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(WEBVTT|Kind:|Language:|NOTE\b|STYLE\b|REGION\b)").expect("vtt header regex")
});

/// Sponsor reads and ad inserts, removed sentence by sentence
static SPONSOR_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"thanks? to [\w\s]+ for sponsoring",
        r"this video is sponsored by",
        r"use code \w+ for \d+% off",
        r"go to [\w.]+\.com/\w+",
        r"link in the description",
    ]
    .iter()
    .map(|p| {
        Regex::new(&format!(r"(?i)[^.!?]*{}[^.!?]*[.!?]?", p)).expect("sponsor regex")
    })
    .collect()
});

/// Caption file formats yt-dlp may leave behind, in preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionFormat {
    Srv1,
    Vtt,
    Srt,
}

impl CaptionFormat {
    /// File suffixes checked after a download, with the format each one holds
    pub const CANDIDATES: [(&'static str, CaptionFormat); 4] = [
        (".en.srv1", CaptionFormat::Srv1),
        (".en.vtt", CaptionFormat::Vtt),
        (".en.srt", CaptionFormat::Srt),
        (".en-orig.vtt", CaptionFormat::Vtt),
    ];

    pub fn parse(&self, content: &str) -> String {
        match self {
            CaptionFormat::Srv1 => parse_timed_text(content),
            CaptionFormat::Vtt | CaptionFormat::Srt => parse_cue_text(content),
        }
    }
}

/// Decode the XML entities caption hosts emit. `&amp;` goes last so
/// `&amp;lt;` stays a literal `&lt;`.
pub fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

fn collapse_whitespace(text: &str) -> String {
    RE_WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Parse srv1 / timedtext XML (`<text>` or `<p>` segments) into one line of text
pub fn parse_timed_text(xml: &str) -> String {
    let segments: Vec<String> = RE_TIMED_TEXT
        .captures_iter(xml)
        .filter_map(|caps| caps.get(2))
        .map(|m| {
            let inner = RE_TAG.replace_all(m.as_str(), "");
            decode_entities(&inner).replace('\n', " ")
        })
        .collect();

    collapse_whitespace(&segments.join(" "))
}

/// Parse WebVTT or SRT cues, dropping headers, cue numbers and timings.
/// Rolling auto-captions repeat each line; consecutive repeats are kept once.
pub fn parse_cue_text(content: &str) -> String {
    let mut lines: Vec<String> = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty()
            || RE_VTT_HEADER.is_match(line)
            || RE_CUE_TIMING.is_match(line)
            || line.chars().all(|c| c.is_ascii_digit())
        {
            continue;
        }

        let text = collapse_whitespace(&decode_entities(&RE_TAG.replace_all(line, "")));
        if text.is_empty() || lines.last() == Some(&text) {
            continue;
        }
        lines.push(text);
    }

    collapse_whitespace(&lines.join(" "))
}

/// Remove sponsor and ad-insert sentences. Best effort: plain pattern matching.
pub fn strip_sponsor_segments(text: &str) -> String {
    let mut cleaned = text.to_string();
    for pattern in SPONSOR_PATTERNS.iter() {
        cleaned = pattern.replace_all(&cleaned, " ").into_owned();
    }
    collapse_whitespace(&cleaned)
}

/// Final gate for every transcript candidate: length check, then cleanup.
/// Returns `None` when nothing usable is left.
pub fn finalize_transcript(raw: &str) -> Option<String> {
    let text = collapse_whitespace(raw);
    if text.chars().count() <= MIN_TRANSCRIPT_LEN {
        return None;
    }

    let cleaned = strip_sponsor_segments(&text);
    (cleaned.chars().count() > MIN_TRANSCRIPT_LEN).then_some(cleaned)
}
