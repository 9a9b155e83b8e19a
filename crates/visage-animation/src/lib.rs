//! Facial animation for Visage: the inference bridge, the playback state
//! store, and the per-frame morph target driver.

pub mod blink;
pub mod body;
pub mod bridge;
pub mod driver;
pub mod morph;
pub mod pipeline;
pub mod playback;
pub mod protocol;
pub mod store;

pub use bridge::{AnimationInference, FacialAnimationBridge, InferenceRequest};
pub use driver::AnimationDriver;
pub use morph::{MorphTargetRig, MorphTargetSurface};
pub use pipeline::{PipelineError, SpeechPipeline, VoiceSettings};
pub use store::{AnimationState, AnimationStateStore};
