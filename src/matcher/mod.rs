//! Pairs each media file with the sidecar that belongs to it.
//!
//! Four ordered phases over shrinking candidate pools: exact name, copy-index
//! stripping, edited-variant stripping, then terminal unmatched. A sidecar
//! consumed by one phase is removed from the pool before the next runs, so no
//! file is ever claimed twice.

pub mod strip;

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::error::Error;
use crate::index::FileEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    Exact,
    CopyIndex,
    EditedVariant,
    Unmatched,
}

impl MatchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchPhase::Exact => "exact",
            MatchPhase::CopyIndex => "copy-index",
            MatchPhase::EditedVariant => "edited-variant",
            MatchPhase::Unmatched => "unmatched",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    Exact,
    Heuristic,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Exact => "exact",
            Confidence::Heuristic => "heuristic",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub media: FileEntry,
    pub sidecar: Option<FileEntry>,
    pub phase: MatchPhase,
    pub confidence: Confidence,
}

#[derive(Debug)]
pub struct MatchOutcome {
    /// Exactly one entry per media file, unmatched ones included.
    pub matches: Vec<MatchResult>,
    /// Sidecars no phase could place.
    pub unmatched_sidecars: Vec<FileEntry>,
    /// Losers of an exact-phase tie; reported, never silently dropped.
    pub duplicate_sidecars: Vec<FileEntry>,
}

/// Run the four matching phases over one album's media and sidecar sets.
///
/// Deterministic: pools are ordered by normalized name, so the result is
/// independent of the caller's enumeration order.
pub fn match_album(
    media: Vec<FileEntry>,
    sidecars: Vec<FileEntry>,
) -> Result<MatchOutcome, Error> {
    let total_media = media.len();
    let total_sidecars = sidecars.len();

    let mut matches: Vec<MatchResult> = Vec::new();
    let mut duplicate_sidecars: Vec<FileEntry> = Vec::new();

    let mut media_pool: BTreeMap<String, FileEntry> = BTreeMap::new();
    for entry in media {
        match media_pool.entry(entry.name.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
            Entry::Occupied(_) => {
                // distinct on-disk names can collide after NFC normalization
                warn!("Media name collision after normalization: {}", entry.name);
                matches.push(MatchResult {
                    media: entry,
                    sidecar: None,
                    phase: MatchPhase::Unmatched,
                    confidence: Confidence::Exact,
                });
            }
        }
    }

    let mut sidecar_pool: BTreeMap<String, FileEntry> = BTreeMap::new();
    for entry in sidecars {
        match sidecar_pool.entry(entry.name.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
            Entry::Occupied(_) => {
                warn!("Sidecar name collision after normalization: {}", entry.name);
                duplicate_sidecars.push(entry);
            }
        }
    }

    phase_exact(
        &mut media_pool,
        &mut sidecar_pool,
        &mut matches,
        &mut duplicate_sidecars,
    );
    phase_copy_index(&mut media_pool, &mut sidecar_pool, &mut matches);
    phase_edited(&mut media_pool, &mut sidecar_pool, &mut matches);

    // Phase 4 — whatever is left is a terminal, successful outcome.
    let leftover: Vec<String> = media_pool.keys().cloned().collect();
    for name in leftover {
        if let Some(media) = media_pool.remove(&name) {
            matches.push(MatchResult {
                media,
                sidecar: None,
                phase: MatchPhase::Unmatched,
                confidence: Confidence::Exact,
            });
        }
    }
    let unmatched_sidecars: Vec<FileEntry> = sidecar_pool.into_values().collect();

    verify_exclusion(
        &matches,
        &duplicate_sidecars,
        &unmatched_sidecars,
        total_media,
        total_sidecars,
    )?;

    Ok(MatchOutcome {
        matches,
        unmatched_sidecars,
        duplicate_sidecars,
    })
}

/// Phase 1: sidecar base equals the media name byte-for-byte. When several
/// sidecars claim one media file the shortest file name wins and the rest are
/// reported as duplicates.
fn phase_exact(
    media_pool: &mut BTreeMap<String, FileEntry>,
    sidecar_pool: &mut BTreeMap<String, FileEntry>,
    matches: &mut Vec<MatchResult>,
    duplicates: &mut Vec<FileEntry>,
) {
    let by_base = base_view(sidecar_pool);

    let media_names: Vec<String> = media_pool.keys().cloned().collect();
    for media_name in media_names {
        let Some(cands) = by_base.get(&media_name) else {
            continue;
        };
        let mut live: Vec<&String> = cands
            .iter()
            .filter(|n| sidecar_pool.contains_key(*n))
            .collect();
        if live.is_empty() {
            continue;
        }
        live.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        let winner = live[0].clone();
        let losers: Vec<String> = live[1..].iter().map(|n| (*n).clone()).collect();

        if let (Some(media), Some(sidecar)) = (
            media_pool.remove(&media_name),
            sidecar_pool.remove(&winner),
        ) {
            matches.push(MatchResult {
                media,
                sidecar: Some(sidecar),
                phase: MatchPhase::Exact,
                confidence: Confidence::Exact,
            });
            for loser in losers {
                if let Some(entry) = sidecar_pool.remove(&loser) {
                    duplicates.push(entry);
                }
            }
        }
    }
}

/// Phase 2: strip copy-index markers from both names independently and
/// compare the reduced stems.
fn phase_copy_index(
    media_pool: &mut BTreeMap<String, FileEntry>,
    sidecar_pool: &mut BTreeMap<String, FileEntry>,
    matches: &mut Vec<MatchResult>,
) {
    let stripped = stripped_view(sidecar_pool);

    let media_names: Vec<String> = media_pool.keys().cloned().collect();
    for media_name in media_names {
        let (reduced, index) = reduce_copy_index(&media_name);
        let Some(cands) = stripped.get(&reduced) else {
            continue;
        };
        let live: Vec<&(Option<u32>, String)> = cands
            .iter()
            .filter(|(_, n)| sidecar_pool.contains_key(n))
            .collect();
        let Some(winner) = pick_copy_index_candidate(index, &live) else {
            continue;
        };
        if let (Some(media), Some(sidecar)) =
            (media_pool.remove(&media_name), sidecar_pool.remove(&winner))
        {
            matches.push(MatchResult {
                media,
                sidecar: Some(sidecar),
                phase: MatchPhase::CopyIndex,
                confidence: Confidence::Heuristic,
            });
        }
    }
}

/// Phase 3: the media carries an edited marker the sidecar's original never
/// had. Tried against the raw sidecar bases first (marker stripped, any copy
/// index kept in place), then with copy-index stripping composed in.
fn phase_edited(
    media_pool: &mut BTreeMap<String, FileEntry>,
    sidecar_pool: &mut BTreeMap<String, FileEntry>,
    matches: &mut Vec<MatchResult>,
) {
    let by_base = base_view(sidecar_pool);
    let stripped = stripped_view(sidecar_pool);

    let media_names: Vec<String> = media_pool.keys().cloned().collect();
    for media_name in media_names {
        let mut winner: Option<String> = None;

        if let Some(no_edit) = strip::strip_edited_marker(&media_name) {
            if let Some(cands) = by_base.get(&no_edit) {
                let mut live: Vec<&String> = cands
                    .iter()
                    .filter(|n| sidecar_pool.contains_key(*n))
                    .collect();
                live.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
                winner = live.first().map(|n| (*n).clone());
            }
        }

        if winner.is_none() {
            if let Some((reduced, index)) = strip::strip_edited_variant(&media_name) {
                if let Some(cands) = stripped.get(&reduced) {
                    let live: Vec<&(Option<u32>, String)> = cands
                        .iter()
                        .filter(|(_, n)| sidecar_pool.contains_key(n))
                        .collect();
                    winner = pick_copy_index_candidate(index, &live);
                }
            }
        }

        let Some(winner) = winner else { continue };
        if let (Some(media), Some(sidecar)) =
            (media_pool.remove(&media_name), sidecar_pool.remove(&winner))
        {
            matches.push(MatchResult {
                media,
                sidecar: Some(sidecar),
                phase: MatchPhase::EditedVariant,
                confidence: Confidence::Heuristic,
            });
        }
    }
}

/// Sidecar base → sidecar names claiming it, over the remaining pool.
fn base_view(sidecar_pool: &BTreeMap<String, FileEntry>) -> BTreeMap<String, Vec<String>> {
    let mut view: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for name in sidecar_pool.keys() {
        if let Some(base) = strip::sidecar_base(name) {
            view.entry(base).or_default().push(name.clone());
        }
    }
    view
}

/// Copy-index-stripped sidecar base → (index, sidecar name).
fn stripped_view(
    sidecar_pool: &BTreeMap<String, FileEntry>,
) -> BTreeMap<String, Vec<(Option<u32>, String)>> {
    let mut view: BTreeMap<String, Vec<(Option<u32>, String)>> = BTreeMap::new();
    for name in sidecar_pool.keys() {
        let Some(base) = strip::sidecar_base(name) else {
            continue;
        };
        let (reduced, index) = reduce_copy_index(&base);
        view.entry(reduced).or_default().push((index, name.clone()));
    }
    view
}

fn reduce_copy_index(name: &str) -> (String, Option<u32>) {
    let (stripped, index) = match strip::strip_copy_index(name) {
        Some((s, i)) => (s, Some(i)),
        None => (name.to_string(), None),
    };
    // the descriptor can trail the stripped index ("….supplemental-metadata(1).json")
    let stripped = match strip::strip_descriptor(&stripped) {
        Some(s) => s.to_string(),
        None => stripped,
    };
    (stripped, index)
}

/// Tie-break when several sidecars strip to one stem: a sidecar carrying the
/// media's own index wins, then the lowest index, then the smallest name.
fn pick_copy_index_candidate(
    media_index: Option<u32>,
    candidates: &[&(Option<u32>, String)],
) -> Option<String> {
    candidates
        .iter()
        .min_by(|a, b| {
            let ka = (a.0 != media_index, a.0.unwrap_or(u32::MAX), a.1.as_str());
            let kb = (b.0 != media_index, b.0.unwrap_or(u32::MAX), b.1.as_str());
            ka.cmp(&kb)
        })
        .map(|c| c.1.clone())
}

/// Every sidecar must end up in exactly one bucket, every media file in
/// exactly one result. A violation means downstream data would be unsafe to
/// persist, so it aborts the scan.
fn verify_exclusion(
    matches: &[MatchResult],
    duplicates: &[FileEntry],
    unmatched_sidecars: &[FileEntry],
    total_media: usize,
    total_sidecars: usize,
) -> Result<(), Error> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut consumed = 0usize;
    for result in matches {
        if let Some(sidecar) = &result.sidecar {
            consumed += 1;
            if !seen.insert(sidecar.name.as_str()) {
                return Err(Error::MatchingInvariant(format!(
                    "sidecar '{}' consumed by more than one match",
                    sidecar.name
                )));
            }
        }
    }
    if matches.len() != total_media {
        return Err(Error::MatchingInvariant(format!(
            "{} media files produced {} match results",
            total_media,
            matches.len()
        )));
    }
    let accounted = consumed + duplicates.len() + unmatched_sidecars.len();
    if accounted != total_sidecars {
        return Err(Error::MatchingInvariant(format!(
            "{} sidecars, {} accounted for",
            total_sidecars, accounted
        )));
    }
    Ok(())
}
