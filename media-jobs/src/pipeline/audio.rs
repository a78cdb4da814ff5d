//! Choosing the audio track to merge with a video-only format.

use std::cmp::Ordering;

use crate::database::models::FormatDbModel;
use crate::{Error, Result};

/// Picks an audio format for a video format among a job's formats.
pub trait AudioMatcher: Send + Sync {
    fn match_audio<'a>(
        &self,
        video: &FormatDbModel,
        formats: &'a [FormatDbModel],
    ) -> Result<&'a FormatDbModel>;
}

/// Prefers an audio-only format in the same container family, then the same
/// language, then the highest total bitrate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestAudioMatcher;

fn container_family(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "mp4" | "m4a" | "m4v" | "mov" => "mp4",
        "webm" | "weba" | "opus" | "ogg" => "webm",
        _ => "other",
    }
}

fn same_language(video: &FormatDbModel, audio: &FormatDbModel) -> bool {
    match (video.language.as_deref(), audio.language.as_deref()) {
        (Some(v), Some(a)) => v.eq_ignore_ascii_case(a),
        _ => false,
    }
}

impl AudioMatcher for BestAudioMatcher {
    fn match_audio<'a>(
        &self,
        video: &FormatDbModel,
        formats: &'a [FormatDbModel],
    ) -> Result<&'a FormatDbModel> {
        let family = container_family(&video.ext);

        formats
            .iter()
            .filter(|f| f.has_audio() && !f.has_video())
            .max_by(|a, b| {
                let key = |f: &FormatDbModel| {
                    (container_family(&f.ext) == family, same_language(video, f))
                };
                key(*a).cmp(&key(*b)).then_with(|| {
                    a.total_bitrate()
                        .partial_cmp(&b.total_bitrate())
                        .unwrap_or(Ordering::Equal)
                })
            })
            .ok_or_else(|| {
                Error::unprocessable(format!(
                    "no audio format available to merge with format {}",
                    video.id
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::NewFormat;

    fn format(id: &str, ext: &str, audio: bool, video: bool, tbr: &str) -> FormatDbModel {
        let mut f = NewFormat {
            format_id: id.to_string(),
            ext: ext.to_string(),
            acodec: Some(if audio { "opus" } else { "none" }.to_string()),
            vcodec: Some(if video { "vp9" } else { "none" }.to_string()),
            tbr: Some(tbr.to_string()),
            url: format!("https://cdn.example.com/{}", id),
            ..Default::default()
        }
        .into_model("job-1");
        f.id = id.to_string();
        f
    }

    #[test]
    fn test_prefers_same_container_over_bitrate() {
        let video = format("v", "mp4", false, true, "2000");
        let formats = vec![
            video.clone(),
            format("webm-hi", "webm", true, false, "160"),
            format("m4a-lo", "m4a", true, false, "48"),
        ];
        let audio = BestAudioMatcher.match_audio(&video, &formats).unwrap();
        assert_eq!(audio.id, "m4a-lo");
    }

    #[test]
    fn test_prefers_matching_language_then_bitrate() {
        let video = {
            let mut v = format("v", "webm", false, true, "2000");
            v.language = Some("en".to_string());
            v
        };
        let mut dubbed = format("dub", "webm", true, false, "160");
        dubbed.language = Some("de".to_string());
        let mut original = format("orig", "webm", true, false, "128");
        original.language = Some("EN".to_string());
        let formats = vec![dubbed, original, format("low", "webm", true, false, "50")];

        let audio = BestAudioMatcher.match_audio(&video, &formats).unwrap();
        assert_eq!(audio.id, "orig");
    }

    #[test]
    fn test_ignores_muxed_formats_and_fails_without_audio() {
        let video = format("v", "mp4", false, true, "2000");
        let formats = vec![video.clone(), format("muxed", "mp4", true, true, "900")];
        let result = BestAudioMatcher.match_audio(&video, &formats);
        assert!(matches!(result, Err(Error::Unprocessable(_))));
    }
}
