//! Viseme derivation: character alignment to cues, cues to animation tracks.

use serde::{Deserialize, Serialize};
use serde_json::json;

use visage_core::{AnimationTrack, Frame, RawVisemes, VisemeCue};

/// Oculus viseme set, in the order used for derived track vectors.
pub const VISEME_NAMES: [&str; 15] = [
    "viseme_sil",
    "viseme_PP",
    "viseme_FF",
    "viseme_TH",
    "viseme_DD",
    "viseme_kk",
    "viseme_CH",
    "viseme_SS",
    "viseme_nn",
    "viseme_RR",
    "viseme_aa",
    "viseme_E",
    "viseme_I",
    "viseme_O",
    "viseme_U",
];

/// Hold after the last cue before the mouth closes, when the cue has no end.
const TRAILING_HOLD_SECS: f64 = 0.1;

/// Character-level timing returned alongside timestamped synthesis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Alignment {
    pub characters: Vec<String>,
    pub character_start_times_seconds: Vec<f64>,
    pub character_end_times_seconds: Vec<f64>,
}

/// Rough grapheme to viseme mapping. Digraphs are not handled.
fn viseme_for_char(c: char) -> &'static str {
    match c.to_ascii_lowercase() {
        'p' | 'b' | 'm' => "PP",
        'f' | 'v' => "FF",
        't' | 'd' => "DD",
        'k' | 'g' | 'q' | 'c' | 'x' => "kk",
        'j' => "CH",
        's' | 'z' => "SS",
        'n' | 'l' => "nn",
        'r' => "RR",
        'a' | 'h' => "aa",
        'e' => "E",
        'i' | 'y' => "I",
        'o' => "O",
        'u' | 'w' => "U",
        _ => "sil",
    }
}

/// Convert character timings into viseme cues, merging runs of the same viseme.
pub fn cues_from_alignment(alignment: &Alignment) -> Vec<VisemeCue> {
    let mut cues: Vec<VisemeCue> = Vec::new();

    let timed = alignment
        .characters
        .iter()
        .zip(&alignment.character_start_times_seconds)
        .zip(&alignment.character_end_times_seconds);

    for ((chars, &start), &end) in timed {
        let viseme = chars.chars().next().map(viseme_for_char).unwrap_or("sil");
        match cues.last_mut() {
            Some(last) if last.label().as_deref() == Some(viseme) => {
                last.end = Some(end);
            }
            _ => cues.push(VisemeCue {
                viseme: json!(viseme),
                start,
                end: Some(end),
            }),
        }
    }

    cues
}

/// Wrap character timings in the raw viseme payload shape.
pub fn visemes_from_alignment(alignment: &Alignment) -> Option<RawVisemes> {
    let cues = cues_from_alignment(alignment);
    if cues.is_empty() {
        return None;
    }
    Some(RawVisemes(json!({ "visemes": cues })))
}

/// Map a provider viseme label (`PP`, `viseme_aa`, integer id) to its index in [`VISEME_NAMES`].
fn viseme_index(label: &str) -> Option<usize> {
    if let Ok(id) = label.parse::<usize>() {
        return (id < VISEME_NAMES.len()).then_some(id);
    }
    let bare = label.strip_prefix("viseme_").unwrap_or(label);
    VISEME_NAMES
        .iter()
        .position(|name| name["viseme_".len()..].eq_ignore_ascii_case(bare))
}

/// Build a one-hot viseme track from timed cues.
///
/// Each cue contributes a fully-weighted frame at its start; gaps and the end
/// of speech get an all-zero frame so the mouth closes.
pub fn track_from_cues(cues: &[VisemeCue]) -> Option<AnimationTrack> {
    let mut timed: Vec<(usize, f64, Option<f64>)> = cues
        .iter()
        .filter_map(|cue| {
            let index = viseme_index(&cue.label()?)?;
            Some((index, cue.start, cue.end))
        })
        .collect();

    if timed.is_empty() {
        return None;
    }
    timed.sort_by(|a, b| a.1.total_cmp(&b.1));

    let width = VISEME_NAMES.len();
    let mut frames = Vec::with_capacity(timed.len() * 2 + 1);
    if timed[0].1 > 0.0 {
        frames.push(Frame::new(0.0, vec![0.0; width]));
    }

    for (i, &(index, start, end)) in timed.iter().enumerate() {
        let mut values = vec![0.0; width];
        values[index] = 1.0;
        frames.push(Frame::new(start, values));

        let next_start = timed.get(i + 1).map(|t| t.1);
        let close_at = match (end, next_start) {
            (Some(end), Some(next)) if end < next => Some(end),
            (Some(end), None) => Some(end.max(start)),
            (None, None) => Some(start + TRAILING_HOLD_SECS),
            _ => None,
        };
        if let Some(at) = close_at {
            frames.push(Frame::new(at, vec![0.0; width]));
        }
    }

    let names = VISEME_NAMES.iter().map(|n| n.to_string()).collect();
    AnimationTrack::from_parts(names, frames)
}

/// Derive a track from a raw viseme payload, if it carries usable cues.
pub fn track_from_raw(raw: &RawVisemes) -> Option<AnimationTrack> {
    track_from_cues(&raw.cues())
}
