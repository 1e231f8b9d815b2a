//! Heuristics for turning a raw source title into track metadata.

/// Artist used when the raw title carries none
pub const UNKNOWN_ARTIST: &str = "unknown";

/// Promotional suffixes removed from parsed titles (matched case-sensitively)
const PROMO_SUFFIXES: &[&str] = &[
    "Official Music Video",
    "Official Lyric Video",
    "Official Video",
    "Official Audio",
    "Official MV",
    "Lyric Video",
    "Lyrics",
    "MV",
];

/// Bracket pairs a suffix may be wrapped in
const BRACKETS: &[(&str, &str)] = &[("(", ")"), ("[", "]"), ("【", "】")];

/// Title and artist parsed from a raw source title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub title: String,
    pub artist: String,
}

/// Parse `"<artist> - <title>"`, falling back to the whole string as title.
///
/// Splits on the first `" - "` only, so titles containing the separator keep
/// it. Promotional suffixes are stripped from the title as a final pass.
pub fn parse_title(raw: &str) -> TrackInfo {
    let raw = raw.trim();

    let (artist, title) = match raw.split_once(" - ") {
        Some((artist, title)) if !artist.trim().is_empty() => (artist.trim(), title.trim()),
        _ => (UNKNOWN_ARTIST, raw),
    };

    TrackInfo {
        title: strip_promo_suffixes(title),
        artist: artist.to_string(),
    }
}

/// Remove trailing promotional markers, repeatedly, never emptying the title
pub fn strip_promo_suffixes(title: &str) -> String {
    let mut current = title.trim();

    loop {
        let Some(stripped) = strip_one(current) else {
            break;
        };
        let stripped = stripped.trim_end_matches(|c: char| c.is_whitespace() || c == '-' || c == '|');
        if stripped.is_empty() {
            break;
        }
        current = stripped;
    }

    current.to_string()
}

fn strip_one(title: &str) -> Option<&str> {
    for suffix in PROMO_SUFFIXES {
        for (open, close) in BRACKETS {
            let wrapped = format!("{}{}{}", open, suffix, close);
            if let Some(rest) = title.strip_suffix(wrapped.as_str()) {
                return Some(rest);
            }
        }

        // Bare suffixes must stand as their own word
        if let Some(rest) = title.strip_suffix(suffix) {
            if rest.is_empty() || rest.ends_with(char::is_whitespace) {
                return Some(rest);
            }
        }
    }
    None
}

/// Coarse region guess from an artist name.
///
/// Returns "CN" when the name contains CJK unified ideographs, else "US".
pub fn infer_region(artist: &str) -> &'static str {
    if artist
        .chars()
        .any(|c| ('\u{4E00}'..='\u{9FFF}').contains(&c))
    {
        "CN"
    } else {
        "US"
    }
}
