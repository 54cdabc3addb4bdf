use std::path::PathBuf;

use clap::{Parser, Subcommand};
use toolhub::{
    client::download::{ImageFormatChoice, VideoFormatChoice},
    source::Source,
};

/// Instagram and YouTube media extraction backend with a terminal client
#[derive(Parser)]
#[command(name = "toolhub", version)]
#[command(about = "Extract and download media from Instagram posts and YouTube videos", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the extraction API server
    Serve,
    /// Fetch a post through the API and download selected items
    Fetch {
        /// Instagram post/reel or YouTube URL
        url: String,

        /// Source to query; detected from the URL when omitted
        #[arg(long, value_parser = parse_source)]
        source: Option<Source>,

        /// Items to download: 1-based positions like `1,3` or `all`
        #[arg(long, value_parser = parse_selection)]
        select: Option<Selection>,

        #[arg(long, value_enum, default_value_t = ImageFormatChoice::Jpg)]
        image_format: ImageFormatChoice,

        #[arg(long, value_enum, default_value_t = VideoFormatChoice::Mp4)]
        video_format: VideoFormatChoice,

        /// YouTube quality label such as `720p`; downloads through the API
        #[arg(long)]
        quality: Option<String>,

        /// Output directory
        #[arg(long, default_value = ".")]
        out: PathBuf,

        /// API base URL
        #[arg(long)]
        backend: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Positions(Vec<usize>),
}

fn parse_source(value: &str) -> Result<Source, String> {
    value.parse()
}

pub fn parse_selection(value: &str) -> Result<Selection, String> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("all") {
        return Ok(Selection::All);
    }

    let positions = value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.parse::<usize>() {
            Ok(position) if position > 0 => Ok(position),
            _ => Err(format!("invalid position: {part}")),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if positions.is_empty() {
        return Err("selection is empty".to_string());
    }
    Ok(Selection::Positions(positions))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_selections() {
        assert_eq!(parse_selection("ALL"), Ok(Selection::All));
        assert_eq!(
            parse_selection("1, 3"),
            Ok(Selection::Positions(vec![1, 3]))
        );
        assert!(parse_selection("0").is_err());
        assert!(parse_selection(",").is_err());
    }

    #[test]
    fn fetch_arguments_parse() {
        let cli = Cli::try_parse_from([
            "toolhub",
            "fetch",
            "https://www.instagram.com/p/ABC123/",
            "--select",
            "2",
            "--image-format",
            "webp",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Fetch {
                select,
                image_format,
                video_format,
                ..
            }) => {
                assert_eq!(select, Some(Selection::Positions(vec![2])));
                assert_eq!(image_format, ImageFormatChoice::Webp);
                assert_eq!(video_format, VideoFormatChoice::Mp4);
            }
            _ => panic!("expected fetch"),
        }
    }

    #[test]
    fn youtube_quality_is_optional() {
        let cli = Cli::try_parse_from([
            "toolhub",
            "fetch",
            "https://youtu.be/dQw4w9WgXcQ",
            "--quality",
            "720p",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Fetch { quality, .. }) => assert_eq!(quality.as_deref(), Some("720p")),
            _ => panic!("expected fetch"),
        }
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["toolhub"]).unwrap();
        assert!(cli.command.is_none());
    }
}
