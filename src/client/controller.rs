//! Client Controller state machine.
//!
//! The controller owns the current [`MediaList`] and the selection. Every
//! user or network event goes through one method that updates that state
//! and returns the [`ViewUpdate`]s a front end has to apply; nothing here
//! renders or performs I/O.

use std::collections::BTreeSet;

use tracing::debug;

use super::ClientError;
use crate::{
    media::{MediaItem, MediaList, MediaType, count_by_type},
    source::Source,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Results,
    Error,
}

/// Handed out by [`Controller::submit`]; the caller performs the fetch and
/// passes `generation` back with the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub generation: u64,
    pub source: Source,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatControls {
    pub image: bool,
    pub video: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridCell {
    pub index: usize,
    pub media_type: MediaType,
    /// Video cells play `url_high` with the thumbnail as poster; image
    /// cells show the thumbnail.
    pub preview: String,
    pub poster: Option<String>,
    pub badge: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewUpdate {
    ShowLoading,
    HideLoading,
    HideResults,
    SetSubmitEnabled(bool),
    ShowError(String),
    HideError,
    RenderGrid(Vec<GridCell>),
    SetResultsCount(String),
    SetSelected { index: usize, selected: bool },
    SetDownloadLabel(String),
    SetSelectAllLabel(&'static str),
    SetFormatControls(FormatControls),
}

#[derive(Debug, Default)]
pub struct Transition {
    pub ticket: Option<FetchTicket>,
    pub updates: Vec<ViewUpdate>,
}

#[derive(Debug)]
pub struct Controller {
    source: Source,
    phase: Phase,
    media: MediaList,
    selection: BTreeSet<usize>,
    generation: u64,
}

impl Controller {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            phase: Phase::Idle,
            media: Vec::new(),
            selection: BTreeSet::new(),
            generation: 0,
        }
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn media(&self) -> &[MediaItem] {
        &self.media
    }

    pub fn selection(&self) -> impl Iterator<Item = usize> + '_ {
        self.selection.iter().copied()
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.selection.contains(&index)
    }

    /// Validates `input` and, when it passes, moves to `Loading` and hands
    /// out a ticket for the fetch. Submitting while a fetch is in flight
    /// does nothing.
    pub fn submit(&mut self, input: &str) -> Transition {
        if self.phase == Phase::Loading {
            debug!("Ignoring submit while a fetch is in flight");
            return Transition::default();
        }

        let url = input.trim();
        if url.is_empty() {
            return Transition {
                ticket: None,
                updates: vec![ViewUpdate::ShowError(format!(
                    "Please enter a{} {} URL",
                    if self.source == Source::Instagram { "n" } else { "" },
                    self.source
                ))],
            };
        }
        if !self.source.is_valid_url(url) {
            return Transition {
                ticket: None,
                updates: vec![ViewUpdate::ShowError(
                    self.source.invalid_url_message().to_string(),
                )],
            };
        }

        self.generation += 1;
        self.phase = Phase::Loading;

        Transition {
            ticket: Some(FetchTicket {
                generation: self.generation,
                source: self.source,
                url: url.to_string(),
            }),
            updates: vec![
                ViewUpdate::ShowLoading,
                ViewUpdate::HideResults,
                ViewUpdate::HideError,
                ViewUpdate::SetSubmitEnabled(false),
            ],
        }
    }

    /// Applies the outcome of the fetch identified by `generation`. Results
    /// of superseded fetches are dropped.
    pub fn apply_fetch_result(
        &mut self,
        generation: u64,
        result: Result<MediaList, ClientError>,
    ) -> Vec<ViewUpdate> {
        if generation != self.generation || self.phase != Phase::Loading {
            debug!(
                "Dropping stale fetch result {generation} (current {})",
                self.generation
            );
            return Vec::new();
        }

        let media = match result {
            Ok(media) if !media.is_empty() => media,
            Ok(_) => return self.fail(ClientError::NoMediaFound),
            Err(error) => return self.fail(error),
        };

        self.media = media;
        self.selection.clear();
        self.phase = Phase::Results;

        let mut updates = vec![
            ViewUpdate::HideLoading,
            ViewUpdate::SetSubmitEnabled(true),
            ViewUpdate::RenderGrid(self.grid()),
            ViewUpdate::SetResultsCount(self.results_summary()),
        ];
        updates.extend(self.selection_updates());
        updates
    }

    fn fail(&mut self, error: ClientError) -> Vec<ViewUpdate> {
        self.phase = Phase::Error;
        vec![
            ViewUpdate::HideLoading,
            ViewUpdate::ShowError(error.user_message(self.source)),
            ViewUpdate::SetSubmitEnabled(true),
        ]
    }

    pub fn toggle_selection(&mut self, index: usize) -> Vec<ViewUpdate> {
        if self.phase != Phase::Results || index >= self.media.len() {
            return Vec::new();
        }

        let selected = if self.selection.remove(&index) {
            false
        } else {
            self.selection.insert(index);
            true
        };

        let mut updates = vec![ViewUpdate::SetSelected { index, selected }];
        updates.extend(self.selection_updates());
        updates
    }

    /// Selects everything, or clears the selection when everything is
    /// already selected.
    pub fn select_all(&mut self) -> Vec<ViewUpdate> {
        if self.phase != Phase::Results {
            return Vec::new();
        }

        let select = self.selection.len() != self.media.len();
        if select {
            self.selection = (0..self.media.len()).collect();
        } else {
            self.selection.clear();
        }

        let mut updates: Vec<ViewUpdate> = (0..self.media.len())
            .map(|index| ViewUpdate::SetSelected {
                index,
                selected: select,
            })
            .collect();
        updates.extend(self.selection_updates());
        updates
    }

    /// Which format pickers apply to the current selection. An empty
    /// selection shows the image picker only.
    pub fn format_controls(&self) -> FormatControls {
        if self.selection.is_empty() {
            return FormatControls {
                image: true,
                video: false,
            };
        }

        let videos = self
            .selection
            .iter()
            .filter(|index| self.media[**index].is_video())
            .count();
        FormatControls {
            image: videos < self.selection.len(),
            video: videos > 0,
        }
    }

    /// Selected items in ascending index order, ready for the pipeline.
    pub fn download_queue(&self) -> Result<Vec<(usize, MediaItem)>, String> {
        if self.media.is_empty() {
            return Err("No media to download".to_string());
        }
        if self.selection.is_empty() {
            return Err("Please select images to download by clicking on them".to_string());
        }

        Ok(self
            .selection
            .iter()
            .map(|index| (*index, self.media[*index].clone()))
            .collect())
    }

    pub fn grid(&self) -> Vec<GridCell> {
        let total = self.media.len();
        self.media
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let marker = if item.is_video() { "🎥 " } else { "" };
                let (preview, poster) = match item.media_type {
                    MediaType::Video => (item.url_high.clone(), Some(item.thumbnail.clone())),
                    MediaType::Image => (item.thumbnail.clone(), None),
                };
                GridCell {
                    index,
                    media_type: item.media_type,
                    preview,
                    poster,
                    badge: format!("{marker}{}/{total}", index + 1),
                }
            })
            .collect()
    }

    pub fn results_summary(&self) -> String {
        let (images, videos) = count_by_type(&self.media);
        let plural = |count: usize| if count > 1 { "s" } else { "" };

        if images > 0 && videos > 0 {
            format!(
                "{} items ({images} image{}, {videos} video{})",
                self.media.len(),
                plural(images),
                plural(videos)
            )
        } else if images > 0 {
            format!("{images} image{} found", plural(images))
        } else {
            format!("{videos} video{} found", plural(videos))
        }
    }

    fn selection_updates(&self) -> Vec<ViewUpdate> {
        let all_selected = !self.media.is_empty() && self.selection.len() == self.media.len();
        vec![
            ViewUpdate::SetDownloadLabel(format!(
                "Download Selected ({})",
                self.selection.len()
            )),
            ViewUpdate::SetSelectAllLabel(if all_selected {
                "Deselect All"
            } else {
                "Select All"
            }),
            ViewUpdate::SetFormatControls(self.format_controls()),
        ]
    }
}
