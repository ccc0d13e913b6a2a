use regex::Regex;
use std::sync::OnceLock;

fn full_response_field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Captures the raw (still escaped) string body of every `"full_response": "..."`.
        Regex::new(r#""full_response"\s*:\s*"((?:[^"\\]|\\.)*)""#)
            .expect("valid full_response regex")
    })
}

fn content_field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""content"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("valid content regex")
    })
}

fn envelope_type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*\{\s*"type"\s*:\s*"[a-z_]+""#).expect("valid envelope regex")
    })
}

/// Decodes JSON-style escapes: `\n \r \t \" \\ \/ \b \f` and `\uXXXX`
/// (surrogate pairs included). Unknown or malformed escapes are kept verbatim.
pub fn decode_escapes(input: &str) -> String {
    if !input.contains('\\') {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.peek().copied() {
            Some('n') => push_skip(&mut out, &mut chars, '\n'),
            Some('r') => push_skip(&mut out, &mut chars, '\r'),
            Some('t') => push_skip(&mut out, &mut chars, '\t'),
            Some('b') => push_skip(&mut out, &mut chars, '\u{8}'),
            Some('f') => push_skip(&mut out, &mut chars, '\u{c}'),
            Some('"') => push_skip(&mut out, &mut chars, '"'),
            Some('\\') => push_skip(&mut out, &mut chars, '\\'),
            Some('/') => push_skip(&mut out, &mut chars, '/'),
            Some('u') => {
                chars.next();
                let rest: String = chars.clone().take(4).collect();
                match parse_hex4(&rest) {
                    Some(hi) if (0xD800..0xDC00).contains(&hi) => {
                        // High surrogate: needs a following `\uDC00..DFFF`.
                        let lookahead: String = chars.clone().skip(4).take(6).collect();
                        let lo = lookahead
                            .strip_prefix("\\u")
                            .and_then(parse_hex4)
                            .filter(|lo| (0xDC00..0xE000).contains(lo));
                        match lo {
                            Some(lo) => {
                                let cp = 0x10000 + ((hi - 0xD800) << 10) + (lo - 0xDC00);
                                match char::from_u32(cp) {
                                    Some(ch) => out.push(ch),
                                    None => out.push(char::REPLACEMENT_CHARACTER),
                                }
                                for _ in 0..10 {
                                    chars.next();
                                }
                            }
                            None => {
                                out.push(char::REPLACEMENT_CHARACTER);
                                for _ in 0..4 {
                                    chars.next();
                                }
                            }
                        }
                    }
                    Some(cp) => {
                        match char::from_u32(cp) {
                            Some(ch) => out.push(ch),
                            None => out.push(char::REPLACEMENT_CHARACTER),
                        }
                        for _ in 0..4 {
                            chars.next();
                        }
                    }
                    None => out.push_str("\\u"),
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
                chars.next();
            }
            None => out.push('\\'),
        }
    }

    out
}

fn push_skip(out: &mut String, chars: &mut std::iter::Peekable<std::str::Chars<'_>>, c: char) {
    out.push(c);
    chars.next();
}

fn parse_hex4(s: &str) -> Option<u32> {
    let hex: String = s.chars().take(4).collect();
    if hex.len() != 4 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(&hex, 16).ok()
}

/// True when `text` embeds at least one `"full_response"` field.
pub fn contains_full_response_field(text: &str) -> bool {
    full_response_field_re().is_match(text)
}

/// Extracts the last embedded `"full_response"` value, escape-decoded.
///
/// The server sometimes concatenates completion payloads; the later one wins.
pub fn extract_last_full_response(text: &str) -> Option<String> {
    full_response_field_re()
        .captures_iter(text)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| decode_escapes(m.as_str()))
}

/// Number of embedded `"full_response"` fields.
pub fn count_full_response_fields(text: &str) -> usize {
    full_response_field_re().find_iter(text).count()
}

/// Extracts the first `"content"` string value, escape-decoded.
pub fn extract_content_field(text: &str) -> Option<String> {
    content_field_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| decode_escapes(m.as_str()))
}

/// Heuristic for a string that is itself a serialized `{"type": ..}` envelope.
pub fn looks_like_envelope(text: &str) -> bool {
    envelope_type_re().is_match(text)
}

/// True for text that is JSON debris rather than prose.
pub fn looks_like_json_fragment(text: &str) -> bool {
    let t = text.trim_start();
    t.starts_with('{') || t.starts_with('[') || t.starts_with('"')
}

pub fn preview_text(text: &str) -> String {
    const MAX: usize = 120;
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX {
        return trimmed.to_string();
    }

    trimmed.chars().take(MAX).collect::<String>() + "…"
}
