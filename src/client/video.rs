//! Presentation helpers for the YouTube flow: metadata labels, quality
//! choice and the saved file name.

use crate::extract::youtube::{QualityOption, VideoDetails};

const FILENAME_RESERVED: [char; 10] = ['/', '\\', '?', '%', '*', ':', '|', '"', '<', '>'];

/// `h:mm:ss`, or `m:ss` under an hour.
pub fn format_duration(seconds: u64) -> String {
    if seconds == 0 {
        return "Unknown".to_string();
    }
    let (hours, minutes, seconds) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

pub fn format_views(views: u64) -> String {
    match views {
        0 => "Unknown".to_string(),
        1_000_000.. => format!("{:.1}M views", views as f64 / 1e6),
        1_000.. => format!("{:.1}K views", views as f64 / 1e3),
        _ => format!("{views} views"),
    }
}

/// `<title>.<ext>` with path and shell-reserved characters replaced by `-`.
pub fn video_filename(title: &str, ext: &str) -> String {
    format!("{title}.{ext}")
        .chars()
        .map(|character| {
            if FILENAME_RESERVED.contains(&character) {
                '-'
            } else {
                character
            }
        })
        .collect()
}

/// The requested quality label, or the best available one when none is given.
pub fn pick_quality<'a>(
    details: &'a VideoDetails,
    requested: Option<&str>,
) -> Result<&'a QualityOption, String> {
    let Some(requested) = requested.map(str::trim).filter(|label| !label.is_empty()) else {
        return details
            .formats
            .first()
            .ok_or_else(|| "No download formats available.".to_string());
    };

    details
        .formats
        .iter()
        .find(|option| option.quality.eq_ignore_ascii_case(requested))
        .ok_or_else(|| {
            let offered: Vec<&str> = details
                .formats
                .iter()
                .map(|option| option.quality.as_str())
                .collect();
            format!(
                "Quality {requested} is not offered (available: {})",
                offered.join(", ")
            )
        })
}
