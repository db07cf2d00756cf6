use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Copy-index markers export tools insert when a name collides: "(3)"
    /// anywhere in the name, or a tilde counter like "~2".
    static ref COPY_INDEX_RE: Regex = Regex::new(r"\((\d+)\)|~(\d+)").unwrap();
}

/// Markers appended to the stem of an edited rendition, lowercase. The
/// sidecar stays with the pre-edit original.
const EDITED_MARKERS: &[&str] = &[
    "-edited",
    "-bearbeitet",
    "-modifi\u{e9}",
    "-editado",
    "-edytowane",
];

const SIDECAR_EXT: &str = ".json";
const SIDECAR_DESCRIPTOR: &str = ".supplemental-metadata";

/// Split a file name into (stem, extension including the dot).
pub fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => name.split_at(pos),
        _ => (name, ""),
    }
}

/// Remove the last copy-index marker, wherever it sits in the name, and
/// return the stripped name plus the index. None when no marker is present.
pub fn strip_copy_index(name: &str) -> Option<(String, u32)> {
    let m = COPY_INDEX_RE.find_iter(name).last()?;
    let digits = m
        .as_str()
        .trim_start_matches(['(', '~'])
        .trim_end_matches(')');
    let index: u32 = digits.parse().ok()?;
    let mut stripped = String::with_capacity(name.len() - m.as_str().len());
    stripped.push_str(&name[..m.start()]);
    stripped.push_str(&name[m.end()..]);
    Some((stripped, index))
}

/// Remove a trailing edited marker from the stem, case-insensitively.
/// `IMG_0002-edited.jpg` → `IMG_0002.jpg`. None when no marker is present.
pub fn strip_edited_marker(name: &str) -> Option<String> {
    let (stem, ext) = split_name(name);
    for marker in EDITED_MARKERS {
        let cut = match stem.len().checked_sub(marker.len()) {
            Some(cut) if stem.is_char_boundary(cut) => cut,
            _ => continue,
        };
        if stem[cut..].to_lowercase() == *marker {
            return Some(format!("{}{}", &stem[..cut], ext));
        }
    }
    None
}

/// Composed reduction for edited variants: the copy index is stripped first
/// (it may sit after the marker, as in `IMG-edited(1).jpg`), then the marker.
/// None when no edited marker is present at all.
pub fn strip_edited_variant(name: &str) -> Option<(String, Option<u32>)> {
    match strip_copy_index(name) {
        Some((stripped, index)) => strip_edited_marker(&stripped).map(|s| (s, Some(index))),
        None => strip_edited_marker(name).map(|s| (s, None)),
    }
}

/// The media name a sidecar claims: its own name minus the metadata suffix
/// (`.json`, optionally preceded by the export tool's descriptor segment).
/// None when the name does not carry the suffix.
pub fn sidecar_base(name: &str) -> Option<String> {
    let base = strip_suffix_ignore_case(name, SIDECAR_EXT)?;
    Some(match strip_descriptor(base) {
        Some(inner) => inner.to_string(),
        None => base.to_string(),
    })
}

/// Strip the descriptor segment some export tools insert before `.json`.
pub fn strip_descriptor(base: &str) -> Option<&str> {
    strip_suffix_ignore_case(base, SIDECAR_DESCRIPTOR)
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let cut = s.len().checked_sub(suffix.len())?;
    if s.is_char_boundary(cut) && s[cut..].eq_ignore_ascii_case(suffix) {
        Some(&s[..cut])
    } else {
        None
    }
}
