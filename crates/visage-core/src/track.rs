//! Blendshape animation tracks and raw viseme payloads.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Blink channels. Owned by the blink sub-system, never written by lip-sync.
pub const BLINK_CHANNELS: [&str; 2] = ["EyeBlinkLeft", "EyeBlinkRight"];

/// Names relaxed toward zero when no track has ever been received.
///
/// The viseme names match the vocabulary derived tracks are built from.
pub const FALLBACK_BLENDSHAPES: [&str; 21] = [
    "jawOpen",
    "mouthOpen",
    "mouthSmileLeft",
    "mouthSmileRight",
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
    "EyeBlinkLeft",
    "EyeBlinkRight",
];

pub fn is_blink_channel(name: &str) -> bool {
    BLINK_CHANNELS.contains(&name)
}

/// One timestamped vector of blendshape weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Seconds from the start of the clip.
    pub time_code: f64,
    /// Same length and order as the owning track's `names`.
    pub values: Vec<f32>,
}

impl Frame {
    pub fn new(time_code: f64, values: Vec<f32>) -> Self {
        Self { time_code, values }
    }
}

/// Time-ordered blendshape weights for one utterance.
///
/// Construct through [`AnimationTrack::from_parts`], which enforces the shape
/// and ordering invariants. Deserialization goes through it too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TrackWire")]
pub struct AnimationTrack {
    names: Vec<String>,
    timecourse: Vec<Frame>,
}

#[derive(Deserialize)]
struct TrackWire {
    names: Vec<String>,
    #[serde(default)]
    timecourse: Vec<Frame>,
}

impl TryFrom<TrackWire> for AnimationTrack {
    type Error = String;

    fn try_from(wire: TrackWire) -> Result<Self, Self::Error> {
        AnimationTrack::from_parts(wire.names, wire.timecourse)
            .ok_or_else(|| "animation track has no usable frames".to_string())
    }
}

impl AnimationTrack {
    /// Assemble a track, dropping malformed frames and sorting by `time_code`.
    ///
    /// Returns `None` when the result would be absent (no names or no frames).
    pub fn from_parts(names: Vec<String>, frames: Vec<Frame>) -> Option<Self> {
        if names.is_empty() {
            return None;
        }

        let total = frames.len();
        let mut timecourse: Vec<Frame> = frames
            .into_iter()
            .filter(|f| {
                f.values.len() == names.len() && f.time_code.is_finite() && f.time_code >= 0.0
            })
            .collect();

        let dropped = total - timecourse.len();
        if dropped > 0 {
            debug!(dropped, total, "Dropped malformed animation frames");
        }

        if timecourse.is_empty() {
            return None;
        }

        timecourse.sort_by(|a, b| a.time_code.total_cmp(&b.time_code));

        Some(Self { names, timecourse })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn timecourse(&self) -> &[Frame] {
        &self.timecourse
    }

    pub fn len(&self) -> usize {
        self.timecourse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timecourse.is_empty()
    }

    /// Time code of the last frame.
    pub fn duration_secs(&self) -> f64 {
        self.timecourse.last().map(|f| f.time_code).unwrap_or(0.0)
    }
}

/// One timed viseme from a TTS provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisemeCue {
    #[serde(alias = "name", alias = "id")]
    pub viseme: serde_json::Value,
    #[serde(alias = "time", alias = "offset", alias = "start_time")]
    pub start: f64,
    #[serde(default, alias = "end_time", skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
}

impl VisemeCue {
    /// Viseme label, whether the provider sent it as a string or an integer id.
    pub fn label(&self) -> Option<String> {
        match &self.viseme {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Raw viseme/timing metadata extracted alongside synthesized audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawVisemes(pub serde_json::Value);

impl RawVisemes {
    /// Whether a JSON value has the expected shape (an object with a `visemes` field).
    pub fn matches(value: &serde_json::Value) -> bool {
        value
            .as_object()
            .is_some_and(|obj| obj.contains_key("visemes"))
    }

    /// Append the cues of another payload onto this one.
    pub fn merge(&mut self, other: RawVisemes) {
        let incoming = match other.0.get("visemes") {
            Some(serde_json::Value::Array(items)) => items.clone(),
            _ => return,
        };
        if let Some(serde_json::Value::Array(items)) = self.0.get_mut("visemes") {
            items.extend(incoming);
        }
    }

    /// Parse cues, skipping entries that do not look like timed visemes.
    pub fn cues(&self) -> Vec<VisemeCue> {
        let Some(items) = self.0.get("visemes").and_then(|v| v.as_array()) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| serde_json::from_value::<VisemeCue>(item.clone()).ok())
            .filter(|cue| cue.start.is_finite() && cue.start >= 0.0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn names(n: &[&str]) -> Vec<String> {
        n.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_track_sorts_out_of_order_frames() {
        let track = AnimationTrack::from_parts(
            names(&["jawOpen"]),
            vec![
                Frame::new(0.2, vec![0.2]),
                Frame::new(0.0, vec![0.0]),
                Frame::new(0.1, vec![0.1]),
            ],
        )
        .unwrap();
        let times: Vec<f64> = track.timecourse().iter().map(|f| f.time_code).collect();
        assert_eq!(times, vec![0.0, 0.1, 0.2]);
    }

    #[test]
    fn test_reordered_input_sorts_identically() {
        let frames = vec![
            Frame::new(0.3, vec![3.0]),
            Frame::new(0.1, vec![1.0]),
            Frame::new(0.2, vec![2.0]),
        ];
        let mut reversed = frames.clone();
        reversed.reverse();

        let a = AnimationTrack::from_parts(names(&["jawOpen"]), frames).unwrap();
        let b = AnimationTrack::from_parts(names(&["jawOpen"]), reversed).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_mismatched_frames_dropped() {
        let track = AnimationTrack::from_parts(
            names(&["jawOpen", "mouthClose"]),
            vec![
                Frame::new(0.0, vec![0.1, 0.2]),
                Frame::new(0.1, vec![0.5]),
                Frame::new(f64::NAN, vec![0.5, 0.5]),
                Frame::new(0.2, vec![0.3, 0.4]),
            ],
        )
        .unwrap();
        assert_eq!(track.len(), 2);
        assert!(track.timecourse().iter().all(|f| f.values.len() == 2));
    }

    #[test]
    fn test_empty_track_is_absent() {
        assert!(AnimationTrack::from_parts(names(&["jawOpen"]), vec![]).is_none());
        assert!(AnimationTrack::from_parts(vec![], vec![Frame::new(0.0, vec![])]).is_none());
        assert!(
            AnimationTrack::from_parts(names(&["jawOpen"]), vec![Frame::new(0.0, vec![1.0, 2.0])])
                .is_none()
        );
    }

    #[test]
    fn test_track_deserializes_from_wire_shape() {
        let value = json!({
            "names": ["jawOpen"],
            "timecourse": [{"time_code": 0.0, "values": [0.0]}, {"time_code": 1.0, "values": [1.0]}]
        });
        let track: AnimationTrack = serde_json::from_value(value).unwrap();
        assert_eq!(track.duration_secs(), 1.0);
    }

    #[test]
    fn test_deserialized_track_is_sorted_and_shaped() {
        let value = json!({
            "names": ["jawOpen"],
            "timecourse": [
                {"time_code": 1.0, "values": [1.0]},
                {"time_code": 0.0, "values": [0.0]},
                {"time_code": 0.5, "values": [0.2, 0.9]}
            ]
        });
        let track: AnimationTrack = serde_json::from_value(value).unwrap();
        let times: Vec<f64> = track.timecourse().iter().map(|f| f.time_code).collect();
        assert_eq!(times, vec![0.0, 1.0]);
    }

    #[test]
    fn test_deserializing_empty_track_fails() {
        let empty = serde_json::from_value::<AnimationTrack>(json!({"names": ["jawOpen"], "timecourse": []}));
        assert!(empty.is_err());
        let missing = serde_json::from_value::<AnimationTrack>(json!({"names": ["jawOpen"]}));
        assert!(missing.is_err());
        let nameless = serde_json::from_value::<AnimationTrack>(
            json!({"names": [], "timecourse": [{"time_code": 0.0, "values": []}]}),
        );
        assert!(nameless.is_err());
    }

    #[test]
    fn test_saved_track_reloads_equal() {
        let track = AnimationTrack::from_parts(
            names(&["jawOpen", "viseme_aa"]),
            vec![Frame::new(0.0, vec![0.0, 0.1]), Frame::new(0.2, vec![0.6, 0.3])],
        )
        .unwrap();
        let text = serde_json::to_string(&track).unwrap();
        assert_eq!(serde_json::from_str::<AnimationTrack>(&text).unwrap(), track);
    }

    #[test]
    fn test_fallback_names_use_derived_viseme_spelling() {
        assert!(FALLBACK_BLENDSHAPES.contains(&"viseme_aa"));
        assert!(FALLBACK_BLENDSHAPES.contains(&"viseme_sil"));
        assert!(!FALLBACK_BLENDSHAPES.contains(&"viseme_AA"));
    }

    #[test]
    fn test_raw_visemes_shape_and_cues() {
        assert!(RawVisemes::matches(&json!({"visemes": []})));
        assert!(!RawVisemes::matches(&json!({"alignment": {}})));
        assert!(!RawVisemes::matches(&json!([1, 2])));

        let raw = RawVisemes(json!({
            "visemes": [
                {"viseme": "PP", "start": 0.0, "end": 0.1},
                {"id": 3, "time": 0.1},
                {"viseme": "aa"},
                {"name": "O", "offset": -1.0}
            ]
        }));
        let cues = raw.cues();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].label().as_deref(), Some("PP"));
        assert_eq!(cues[1].label().as_deref(), Some("3"));
    }

    #[test]
    fn test_raw_visemes_merge() {
        let mut a = RawVisemes(json!({"visemes": [{"viseme": "PP", "start": 0.0}]}));
        a.merge(RawVisemes(json!({"visemes": [{"viseme": "FF", "start": 0.2}]})));
        assert_eq!(a.cues().len(), 2);
    }

    #[test]
    fn test_blink_channel_detection() {
        assert!(is_blink_channel("EyeBlinkLeft"));
        assert!(is_blink_channel("EyeBlinkRight"));
        assert!(!is_blink_channel("jawOpen"));
    }
}
