mod cli;

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use cli::{Cli, Commands, Selection};
use toolhub::{
    client::{
        ApiClient, Controller, DirectorySink, DownloadOptions, HttpFetcher, ViewUpdate,
        controller::{FormatControls, GridCell, Phase},
        download::{ImageFormatChoice, VideoFormatChoice},
        run_batch,
        video::{format_duration, format_views, pick_quality, video_filename},
    },
    config::{Settings, non_empty, resolve_backend_url},
    extract::BROWSER_USER_AGENT,
    server,
    source::Source,
};
use tracing::info;

const CLIENT_TIMEOUT_SECONDS: u64 = 120;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "toolhub=info,tower_http=info".to_string()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            if let Err(error) = server::run(Settings::from_env()).await {
                eprintln!("Server error: {}", error.message);
                std::process::exit(1);
            }
        }
        Commands::Fetch {
            url,
            source,
            select,
            image_format,
            video_format,
            quality,
            out,
            backend,
        } => {
            let request = FetchRequest {
                url,
                source,
                select,
                image_format,
                video_format,
                quality,
                out,
                backend,
            };
            if let Err(message) = fetch(request).await {
                eprintln!("{message}");
                std::process::exit(1);
            }
        }
    }
}

struct FetchRequest {
    url: String,
    source: Option<Source>,
    select: Option<Selection>,
    image_format: ImageFormatChoice,
    video_format: VideoFormatChoice,
    quality: Option<String>,
    out: PathBuf,
    backend: Option<String>,
}

fn env_text(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
}

fn backend_url(flag: Option<String>) -> String {
    flag.or_else(|| env_text("TOOLHUB_BACKEND_URL"))
        .unwrap_or_else(|| {
            let host = env_text("TOOLHUB_PUBLIC_HOST").unwrap_or_else(|| "localhost".to_string());
            resolve_backend_url(&host).to_string()
        })
}

/// Prints view updates and returns the error banner, if one was shown.
fn render(updates: &[ViewUpdate]) -> Option<String> {
    let mut error = None;
    for update in updates {
        match update {
            ViewUpdate::ShowLoading => println!("Fetching..."),
            ViewUpdate::ShowError(message) => {
                eprintln!("Error: {message}");
                error = Some(message.clone());
            }
            ViewUpdate::RenderGrid(cells) => cells.iter().for_each(print_cell),
            ViewUpdate::SetResultsCount(summary) => println!("{summary}"),
            ViewUpdate::SetFormatControls(FormatControls { image, video }) => {
                info!("Format controls: image={image} video={video}");
            }
            _ => {}
        }
    }
    error
}

fn print_cell(cell: &GridCell) {
    println!("  [{}] {}", cell.badge, cell.preview);
}

async fn fetch(request: FetchRequest) -> Result<(), String> {
    let source = request
        .source
        .or_else(|| Source::detect(&request.url))
        .unwrap_or(Source::Instagram);

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(CLIENT_TIMEOUT_SECONDS))
        .user_agent(BROWSER_USER_AGENT)
        .build()
        .map_err(|error| format!("Could not build HTTP client: {error}"))?;
    let api = ApiClient::new(http_client.clone(), &backend_url(request.backend.clone()))
        .map_err(|error| error.to_string())?;
    info!("Using backend {}", api.base_url());

    if source == Source::YouTube {
        return fetch_video(&api, request).await;
    }

    let mut controller = Controller::new(source);
    let transition = controller.submit(&request.url);
    if let Some(message) = render(&transition.updates) {
        return Err(message);
    }
    let Some(ticket) = transition.ticket else {
        return Err("Nothing to fetch".to_string());
    };

    let result = api.fetch_media(ticket.source, &ticket.url).await;
    let updates = controller.apply_fetch_result(ticket.generation, result);
    if let Some(message) = render(&updates) {
        return Err(message);
    }
    if controller.phase() != Phase::Results {
        return Err("No results".to_string());
    }

    match request.select {
        None => return Ok(()),
        Some(Selection::All) => {
            render(&controller.select_all());
        }
        Some(Selection::Positions(positions)) => {
            for position in positions {
                if position > controller.media().len() {
                    return Err(format!(
                        "Position {position} is out of range (1-{})",
                        controller.media().len()
                    ));
                }
                if !controller.is_selected(position - 1) {
                    render(&controller.toggle_selection(position - 1));
                }
            }
        }
    }

    let queue = controller.download_queue()?;
    let options = DownloadOptions {
        image_format: request.image_format,
        video_format: request.video_format,
        ..DownloadOptions::new(source.file_prefix())
    };
    let sink = DirectorySink::new(request.out);
    let fetcher = HttpFetcher::new(http_client);

    let report = run_batch(&queue, &options, &fetcher, &sink).await;
    println!(
        "Downloaded {}/{} item(s) to {}",
        report.succeeded,
        report.attempted,
        sink.dir().display()
    );
    for filename in &report.saved {
        println!("  {filename}");
    }
    if report.handed_off > 0 {
        println!(
            "{} video(s) could not be fetched; saved their links instead",
            report.handed_off
        );
    }

    Ok(())
}

/// Shows video info and qualities, then saves the chosen quality through the
/// backend's merge-and-stream endpoint.
async fn fetch_video(api: &ApiClient, request: FetchRequest) -> Result<(), String> {
    let url = request.url.trim();
    if !Source::YouTube.is_valid_url(url) {
        return Err(Source::YouTube.invalid_url_message().to_string());
    }

    println!("Fetching...");
    let details = api
        .fetch_video(url)
        .await
        .map_err(|error| error.user_message(Source::YouTube))?;

    println!("{}", details.title);
    println!(
        "  {} | {} | {}",
        format_views(details.views),
        format_duration(details.duration),
        details.channel
    );
    if details.formats.is_empty() {
        println!("No download formats available.");
    }
    for option in &details.formats {
        let size = if option.filesize.is_empty() {
            "Size unknown"
        } else {
            option.filesize.as_str()
        };
        println!("  {}  {} \u{2022} {size}", option.quality, option.ext);
    }

    if request.quality.is_none() && request.select.is_none() {
        return Ok(());
    }

    let option = pick_quality(&details, request.quality.as_deref())?;
    let filename = video_filename(&details.title, &option.ext);
    println!("Downloading {} as {filename}...", option.quality);
    let saved = api
        .download_video(url, &option.quality, &filename, &request.out)
        .await
        .map_err(|error| error.user_message(Source::YouTube))?;
    println!("Saved {}", saved.display());

    Ok(())
}
