//! Job kinds supported by the provider.
//!
//! Every per-kind rule (payload shape, status handle derivation, output
//! field) dispatches on [`JobKind`] with an exhaustive `match`, so a new
//! kind cannot be added without deciding each rule for it.

use serde::{Deserialize, Serialize};

use crate::error::GenerationError;

/// The kind of media a generation job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Video,
    Image,
    Avatar,
    Audio,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = GenerationError;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "video" => Ok(Self::Video),
            "image" => Ok(Self::Image),
            "avatar" => Ok(Self::Avatar),
            "audio" => Ok(Self::Audio),
            _ => Err(GenerationError::UnsupportedKind {
                kind: s.to_string(),
            }),
        }
    }
}

impl JobKind {
    /// All kinds, in a stable order.
    pub const ALL: [JobKind; 4] = [Self::Video, Self::Image, Self::Avatar, Self::Audio];

    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Image => "image",
            Self::Avatar => "avatar",
            Self::Audio => "audio",
        }
    }

    /// Field under `result.outputs[0]` holding the media object.
    pub fn media_field(&self) -> &'static str {
        self.as_str()
    }

    /// Key of the output URL in the success response body.
    pub fn response_url_key(&self) -> &'static str {
        match self {
            Self::Video => "videoUrl",
            Self::Image => "imageUrl",
            Self::Avatar | Self::Audio => "outputUrl",
        }
    }

    /// Whether the provider accepts submissions of this kind.
    pub fn has_submission_path(&self) -> bool {
        match self {
            Self::Video | Self::Image | Self::Avatar => true,
            Self::Audio => false,
        }
    }

    /// Capitalized name for user-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Video => "Video",
            Self::Image => "Image",
            Self::Avatar => "Avatar",
            Self::Audio => "Audio",
        }
    }

    /// Default `(width, height)` when the request omits dimensions.
    pub fn default_dimensions(&self) -> (u32, u32) {
        match self {
            Self::Video => (1280, 720),
            Self::Image => (1024, 1024),
            Self::Avatar | Self::Audio => (1280, 720),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("VIDEO".parse::<JobKind>().unwrap(), JobKind::Video);
        assert_eq!(" Image ".parse::<JobKind>().unwrap(), JobKind::Image);
        assert_eq!("aVaTaR".parse::<JobKind>().unwrap(), JobKind::Avatar);
        assert_eq!("audio".parse::<JobKind>().unwrap(), JobKind::Audio);
    }

    #[test]
    fn test_parse_unknown_kind() {
        let err = "hologram".parse::<JobKind>().unwrap_err();
        assert!(matches!(
            err,
            GenerationError::UnsupportedKind { ref kind } if kind == "hologram"
        ));
        assert!("".parse::<JobKind>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for kind in JobKind::ALL {
            assert_eq!(kind.to_string().parse::<JobKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_only_audio_lacks_submission_path() {
        let submittable: Vec<JobKind> = JobKind::ALL
            .into_iter()
            .filter(JobKind::has_submission_path)
            .collect();
        assert_eq!(submittable, vec![JobKind::Video, JobKind::Image, JobKind::Avatar]);
    }

    #[test]
    fn test_response_url_keys() {
        assert_eq!(JobKind::Video.response_url_key(), "videoUrl");
        assert_eq!(JobKind::Image.response_url_key(), "imageUrl");
        assert_eq!(JobKind::Avatar.response_url_key(), "outputUrl");
    }

    #[test]
    fn test_serde_uses_lowercase() {
        let json = serde_json::to_string(&JobKind::Avatar).unwrap();
        assert_eq!(json, "\"avatar\"");
    }
}
