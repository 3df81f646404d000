//! Transcoding through an ordered codec fallback chain.

pub mod coordinator;
pub mod engine;
pub mod ffmpeg;
pub mod tier;

pub use coordinator::{TierOutcome, TierRecord, TranscodeCoordinator, TranscodeError, Transcoded};
pub use engine::{EncodeError, EncodeRequest, TranscodeEngine};
pub use ffmpeg::FfmpegEngine;
pub use tier::{CodecTier, TierParams, TranscodeConfig, VideoCodec};
