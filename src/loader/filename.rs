//! Archive entry-name construction from untrusted hints.
//!
//! Entry names end up inside a ZIP served to arbitrary clients, some of
//! which extract on Windows, so the sanitizer strips paths, rewrites
//! dangerous characters (including their full-width homoglyphs), drops
//! invisible formatting characters, and defuses reserved device names.

const DEFAULT_BASE: &str = "unnamed";
const MAX_BASE_LEN: usize = 100;

/// ASCII characters that are dangerous or problematic in file names.
const DANGEROUS_ASCII: &str = "<>:\"/\\|?*~.;#$%&'(){}[]!`";

/// Full-width variants of the dangerous set; harmless on disk but visually
/// indistinguishable from the real thing.
const DANGEROUS_FULLWIDTH: &str = "＜＞：＂／＼｜？＊～；＃＄％＆＇（）｛｝［］！";

/// Windows reserved device names, uppercased, including the Unicode
/// superscript digit variants Windows also refuses.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "COM¹", "COM²", "COM³", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8",
    "LPT9", "LPT¹", "LPT²", "LPT³",
];

/// Builds a safe archive entry name from an untrusted hint.
///
/// Steps: strip any directory prefix, strip the trailing extension, sanitize
/// the base ([`sanitize_base`]), then append `-<unique_num>` (when positive)
/// and the required extension. A base that uppercases to a Windows reserved
/// device name gets a `_` suffix; the uniqueness suffix alone is enough to
/// defuse reserved names, so the two never combine.
///
/// ```
/// use fetchzip::loader::archive_entry_name;
///
/// assert_eq!(archive_entry_name("/some/path/file.txt", ".png", 0), "file.png");
/// assert_eq!(archive_entry_name("file.txt", ".png", 123), "file-123.png");
/// assert_eq!(archive_entry_name("con..txt", ".png", 0), "con_.png");
/// ```
#[must_use]
pub fn archive_entry_name(hint: &str, ext: &str, unique_num: usize) -> String {
    if hint.is_empty() {
        if unique_num > 0 {
            return format!("{DEFAULT_BASE}-{unique_num}{ext}");
        }
        return format!("{DEFAULT_BASE}{ext}");
    }

    let mut base = hint;
    if let Some(pos) = base.rfind(['/', '\\']) {
        base = &base[pos + 1..];
    }
    if let Some(pos) = base.rfind('.') {
        base = &base[..pos];
    }

    let base = sanitize_base(base, MAX_BASE_LEN);

    if unique_num > 0 {
        return format!("{base}-{unique_num}{ext}");
    }

    if RESERVED_NAMES.contains(&base.to_uppercase().as_str()) {
        return format!("{base}_{ext}");
    }

    format!("{base}{ext}")
}

/// Character-level sanitation: whitespace and dangerous characters become
/// `-`, invisible characters are dropped, runs of `-` collapse to one, a
/// trailing `-` is trimmed, and the result is capped at `max_len` code
/// points. An empty result falls back to `unnamed`.
fn sanitize_base(value: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(max_len);
    let mut prev = '-'; // suppresses a leading '-'
    let mut count = 0;

    for mut c in value.chars() {
        if count >= max_len {
            break;
        }

        if c.is_whitespace() {
            c = '-';
        } else if is_invisible(c) {
            continue;
        } else if DANGEROUS_ASCII.contains(c) || DANGEROUS_FULLWIDTH.contains(c) {
            c = '-';
        }

        if c == '-' && prev == '-' {
            continue;
        }

        out.push(c);
        prev = c;
        count += 1;
    }

    if out.ends_with('-') {
        out.pop();
    }

    if out.is_empty() {
        return DEFAULT_BASE.to_string();
    }

    out
}

/// Control characters plus the invisible Unicode formatting ranges
/// (zero-width, BIDI overrides, word joiners, BOM).
fn is_invisible(c: char) -> bool {
    c.is_control()
        || matches!(
            c,
            '\u{00AD}'
                | '\u{061C}'
                | '\u{180E}'
                | '\u{200B}'..='\u{200F}'
                | '\u{202A}'..='\u{202E}'
                | '\u{2060}'..='\u{2064}'
                | '\u{2066}'..='\u{2069}'
                | '\u{FEFF}'
                | '\u{FFF9}'..='\u{FFFB}'
        )
}
