//! Config, errors, and the shared audio/animation data model for Visage.

pub mod audio;
pub mod config;
pub mod error;
pub mod track;

pub use audio::{AudioArtifact, AudioEncoding, AudioFormat};
pub use track::{AnimationTrack, Frame, RawVisemes, VisemeCue};
