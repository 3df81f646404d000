//! Codec tiers and their encode parameters.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Position in the fallback chain, strictly ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecTier {
    PreferredCodec,
    FallbackCodec,
    RemuxOnly,
}

impl CodecTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreferredCodec => "preferred",
            Self::FallbackCodec => "fallback",
            Self::RemuxOnly => "remux",
        }
    }
}

impl std::fmt::Display for CodecTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target video codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[serde(alias = "hevc")]
    H265,
    #[serde(alias = "avc")]
    H264,
    /// Stream copy, no re-encode.
    Copy,
}

impl VideoCodec {
    pub fn encoder(&self) -> &'static str {
        match self {
            Self::H265 => "libx265",
            Self::H264 => "libx264",
            Self::Copy => "copy",
        }
    }
}

/// Parameters for one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierParams {
    pub tier: CodecTier,
    pub video_codec: VideoCodec,
    /// Constant rate factor; ignored for stream copy.
    #[serde(default)]
    pub crf: Option<u8>,
    #[serde(default)]
    pub preset: Option<String>,
    /// AAC bitrate such as "128k"; ignored for stream copy.
    #[serde(default)]
    pub audio_bitrate: Option<String>,
    /// Output container extension.
    #[serde(default = "default_container")]
    pub container: String,
    /// Optional fit-and-pad target as "WIDTHxHEIGHT".
    #[serde(default)]
    pub scale: Option<String>,
    pub timeout_secs: u64,
}

fn default_container() -> String {
    "mp4".to_string()
}

impl TierParams {
    pub fn is_remux(&self) -> bool {
        self.video_codec == VideoCodec::Copy
    }

    /// Parse `scale` into width and height.
    pub fn scale_dimensions(&self) -> Option<(u32, u32)> {
        let (w, h) = self.scale.as_deref()?.split_once(['x', ':'])?;
        Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
    }
}

/// The built-in chain: HEVC, then H.264, then container copy.
pub fn default_tiers() -> Vec<TierParams> {
    vec![
        TierParams {
            tier: CodecTier::PreferredCodec,
            video_codec: VideoCodec::H265,
            crf: Some(28),
            preset: Some("medium".to_string()),
            audio_bitrate: Some("128k".to_string()),
            container: default_container(),
            scale: None,
            timeout_secs: 1_800,
        },
        TierParams {
            tier: CodecTier::FallbackCodec,
            video_codec: VideoCodec::H264,
            crf: Some(23),
            preset: Some("medium".to_string()),
            audio_bitrate: Some("128k".to_string()),
            container: default_container(),
            scale: None,
            timeout_secs: 1_800,
        },
        TierParams {
            tier: CodecTier::RemuxOnly,
            video_codec: VideoCodec::Copy,
            crf: None,
            preset: None,
            audio_bitrate: None,
            container: default_container(),
            scale: None,
            timeout_secs: 600,
        },
    ]
}

/// Transcode policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub tiers: Vec<TierParams>,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
        }
    }
}

impl TranscodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tiers.is_empty() {
            return Err(Error::config("transcode needs at least one tier"));
        }
        for pair in self.tiers.windows(2) {
            if pair[0].tier >= pair[1].tier {
                return Err(Error::config(format!(
                    "transcode tiers must be strictly ordered ({} before {})",
                    pair[0].tier, pair[1].tier
                )));
            }
        }
        for tier in &self.tiers {
            if tier.timeout_secs == 0 {
                return Err(Error::config(format!("tier '{}' has a zero timeout", tier.tier)));
            }
            if (tier.tier == CodecTier::RemuxOnly) != tier.is_remux() {
                return Err(Error::config(format!(
                    "tier '{}' must use stream copy if and only if it is the remux tier",
                    tier.tier
                )));
            }
            if tier.container.trim().is_empty() {
                return Err(Error::config(format!("tier '{}' has no container", tier.tier)));
            }
            if tier.scale.is_some() && tier.scale_dimensions().is_none() {
                return Err(Error::config(format!(
                    "tier '{}' has an unparseable scale",
                    tier.tier
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chain_valid_and_ordered() {
        let config = TranscodeConfig::default();
        config.validate().unwrap();
        let tiers: Vec<_> = config.tiers.iter().map(|t| t.tier).collect();
        assert_eq!(
            tiers,
            [CodecTier::PreferredCodec, CodecTier::FallbackCodec, CodecTier::RemuxOnly]
        );
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut config = TranscodeConfig::default();
        config.tiers.swap(0, 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_repeated_tier_rejected() {
        let mut config = TranscodeConfig::default();
        let first = config.tiers[0].clone();
        config.tiers.insert(1, first);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_remux_must_copy() {
        let mut config = TranscodeConfig::default();
        config.tiers[2].video_codec = VideoCodec::H264;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scale_dimensions() {
        let mut params = default_tiers().remove(0);
        params.scale = Some("1280x720".to_string());
        assert_eq!(params.scale_dimensions(), Some((1280, 720)));
        params.scale = Some("1280:720".to_string());
        assert_eq!(params.scale_dimensions(), Some((1280, 720)));
        params.scale = Some("wide".to_string());
        assert_eq!(params.scale_dimensions(), None);
    }

    #[test]
    fn test_codec_alias() {
        let codec: VideoCodec = serde_json::from_str("\"hevc\"").unwrap();
        assert_eq!(codec, VideoCodec::H265);
    }
}
