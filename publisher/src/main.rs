use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{anyhow, bail, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};

use common::{Privacy, StreamConfig, StreamInput, StreamPush, VideoMetadata};
use stream_publisher::app::{AppBuilder, PublisherApp, DEFAULT_CONFIG_FILE};
use stream_publisher::config::ConfigManager;
use stream_publisher::identity::VideoUploadRequest;
use stream_publisher::upload_manager::{EventHandler, UploadEvent};
use stream_publisher::validators::{validate_rtmp_url, validate_stream_name, validate_url};

/// Prints upload progress to stdout
struct ConsoleProgressHandler;

impl EventHandler for ConsoleProgressHandler {
    fn handle_event(&self, event: UploadEvent) {
        match event {
            UploadEvent::SessionOpened { session_id, file_size, .. } => {
                println!("Upload session {} opened ({} bytes)", session_id, file_size);
            }
            UploadEvent::ProgressUpdate { progress, bytes_sent, .. } => {
                println!("  {:>6.2}%  {} bytes sent", progress * 100.0, bytes_sent);
            }
            UploadEvent::Published { video, .. } => {
                println!("Published video {}", video.video_id.as_deref().unwrap_or("<unknown>"));
            }
            UploadEvent::Failed { error, .. } => {
                eprintln!("Upload failed: {}", error);
            }
            UploadEvent::ChunkSent { .. } => {}
        }
    }
}

fn cli() -> Command {
    let stream_name = Arg::new("name").help("Stream name").required(false);
    let token = Arg::new("token")
        .long("token")
        .value_name("USER_TOKEN")
        .help("User access token")
        .required(true);

    Command::new("stream-publisher")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Manage streams and publish videos to pages")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("Configuration file")
                .default_value(DEFAULT_CONFIG_FILE)
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(Command::new("validate").about("Check the streaming server connection"))
        .subcommand(
            Command::new("create-stream")
                .about("Create or update a stream")
                .arg(stream_name.clone().required(true))
                .arg(Arg::new("title").long("title").value_name("TITLE"))
                .arg(
                    Arg::new("input")
                        .long("input")
                        .value_name("URL")
                        .action(ArgAction::Append)
                        .help("Source URL, may be repeated"),
                )
                .arg(
                    Arg::new("push")
                        .long("push")
                        .value_name("RTMP_URL")
                        .action(ArgAction::Append)
                        .help("Restream destination, may be repeated"),
                ),
        )
        .subcommand(
            Command::new("delete-stream")
                .about("Delete a stream")
                .arg(stream_name.clone().required(true)),
        )
        .subcommand(
            Command::new("info")
                .about("Show stream stats")
                .arg(stream_name.clone()),
        )
        .subcommand(
            Command::new("watch")
                .about("Poll stream status until interrupted")
                .arg(stream_name)
                .arg(
                    Arg::new("updates")
                        .long("updates")
                        .value_name("N")
                        .value_parser(clap::value_parser!(u64))
                        .help("Exit after N status updates"),
                ),
        )
        .subcommand(
            Command::new("pages")
                .about("Log in and list manageable pages")
                .arg(token.clone()),
        )
        .subcommand(
            Command::new("upload")
                .about("Upload a video file to a page")
                .arg(Arg::new("file").required(true).value_parser(clap::value_parser!(PathBuf)))
                .arg(token)
                .arg(Arg::new("page").long("page").value_name("PAGE_ID").required(true))
                .arg(Arg::new("title").long("title").value_name("TITLE").required(true))
                .arg(Arg::new("description").long("description").value_name("TEXT").default_value(""))
                .arg(
                    Arg::new("privacy")
                        .long("privacy")
                        .value_name("PRIVACY")
                        .default_value("EVERYONE")
                        .help("EVERYONE, ALL_FRIENDS, FRIENDS_OF_FRIENDS or SELF"),
                )
                .arg(Arg::new("category").long("category").value_name("CATEGORY"))
                .arg(
                    Arg::new("single-shot")
                        .long("single-shot")
                        .action(ArgAction::SetTrue)
                        .help("Send the whole file in one request"),
                ),
        )
        .subcommand(
            Command::new("init-config")
                .about("Write a default configuration file")
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Overwrite an existing file"),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if let Some(("init-config", sub)) = matches.subcommand() {
        return init_config(config_path, sub.get_flag("force")).await;
    }

    let app = AppBuilder::new()
        .with_config_path(config_path.clone())
        .with_event_handler(Arc::new(ConsoleProgressHandler))
        .build()
        .await
        .with_context(|| format!("Failed to initialize from {}", config_path.display()))?;

    let result = match matches.subcommand() {
        Some(("validate", _)) => validate(&app).await,
        Some(("create-stream", sub)) => create_stream(&app, sub).await,
        Some(("delete-stream", sub)) => delete_stream(&app, sub).await,
        Some(("info", sub)) => info(&app, sub).await,
        Some(("watch", sub)) => watch(&app, sub).await,
        Some(("pages", sub)) => pages(&app, sub).await,
        Some(("upload", sub)) => upload(&app, sub).await,
        _ => Err(anyhow!("Unknown command")),
    };

    app.shutdown().await;
    result
}

async fn init_config(path: PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists, use --force to overwrite", path.display());
    }

    let manager = ConfigManager::new(path.clone());
    manager.save().await?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn stream_name(app: &PublisherApp, sub: &ArgMatches) -> Result<String> {
    let name = sub
        .get_one::<String>("name")
        .cloned()
        .or_else(|| app.config().admin.default_stream.clone())
        .ok_or_else(|| anyhow!("No stream name given and no default_stream configured"))?;

    if !validate_stream_name(&name) {
        bail!("Invalid stream name {:?}: use at least 3 letters, digits, '-' or '_'", name);
    }
    Ok(name)
}

async fn validate(app: &PublisherApp) -> Result<()> {
    let reply = app.stream_admin().validate().await?;
    let count = reply
        .get("streams")
        .and_then(|streams| streams.as_array())
        .map(|streams| streams.len());

    app.toasts().success("Connected to streaming server").await;
    match count {
        Some(count) => println!("Connected to {} ({} streams)", app.stream_admin().base_url(), count),
        None => println!("Connected to {}", app.stream_admin().base_url()),
    }
    Ok(())
}

async fn create_stream(app: &PublisherApp, sub: &ArgMatches) -> Result<()> {
    let name = stream_name(app, sub)?;

    let inputs = sub
        .get_many::<String>("input")
        .into_iter()
        .flatten()
        .map(|url| {
            if validate_url(url) {
                Ok(StreamInput { url: url.clone() })
            } else {
                Err(anyhow!("Invalid input URL {}", url))
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let pushes = sub
        .get_many::<String>("push")
        .into_iter()
        .flatten()
        .map(|url| {
            if validate_rtmp_url(url) {
                Ok(StreamPush { url: url.clone() })
            } else {
                Err(anyhow!("Push destination must be an rtmp:// URL, got {}", url))
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let config = StreamConfig {
        title: sub.get_one::<String>("title").cloned(),
        inputs,
        pushes,
    };

    let reply = app.stream_admin().create_or_update(&name, &config).await?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

async fn delete_stream(app: &PublisherApp, sub: &ArgMatches) -> Result<()> {
    let name = stream_name(app, sub)?;
    app.stream_admin().delete(&name).await?;
    println!("Deleted stream {}", name);
    Ok(())
}

async fn info(app: &PublisherApp, sub: &ArgMatches) -> Result<()> {
    let name = stream_name(app, sub)?;
    let stats = app.stream_admin().get_info(&name).await?;
    let snapshot = common::StreamStatusSnapshot::from_stats(&stats);

    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!(
        "live={} viewers={} quality={} bitrate={} kbps",
        snapshot.is_live, snapshot.viewers, snapshot.quality, snapshot.bitrate_kbps
    );
    Ok(())
}

async fn watch(app: &PublisherApp, sub: &ArgMatches) -> Result<()> {
    let name = stream_name(app, sub)?;
    let limit = sub.get_one::<u64>("updates").copied();
    let mut status = app.status_poller().subscribe();

    app.start_watching(&name).await;
    println!("Watching {} every {:?}, Ctrl+C to stop", name, app.status_poller().interval());

    let mut seen = 0u64;
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = *status.borrow_and_update();
                println!(
                    "live={} viewers={} quality={} bitrate={} kbps",
                    snapshot.is_live, snapshot.viewers, snapshot.quality, snapshot.bitrate_kbps
                );
                seen += 1;
                if limit.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    app.stop_watching().await;
    Ok(())
}

async fn pages(app: &PublisherApp, sub: &ArgMatches) -> Result<()> {
    let token = sub
        .get_one::<String>("token")
        .ok_or_else(|| anyhow!("--token is required"))?;

    app.load_identity().await?;
    let auth = app.login(token).await?;
    let pages = app.user_pages(&auth).await?;

    if pages.is_empty() {
        println!("User {} manages no pages", auth.user_id);
    }
    for page in pages {
        println!("{}\t{}\t{}", page.id, page.name, page.category.unwrap_or_default());
    }
    Ok(())
}

async fn upload(app: &PublisherApp, sub: &ArgMatches) -> Result<()> {
    let file = sub
        .get_one::<PathBuf>("file")
        .ok_or_else(|| anyhow!("file is required"))?;
    let token = sub
        .get_one::<String>("token")
        .ok_or_else(|| anyhow!("--token is required"))?;
    let page_id = sub
        .get_one::<String>("page")
        .ok_or_else(|| anyhow!("--page is required"))?;
    let title = sub
        .get_one::<String>("title")
        .ok_or_else(|| anyhow!("--title is required"))?;

    let privacy: Privacy = sub
        .get_one::<String>("privacy")
        .map(|p| p.parse::<Privacy>())
        .transpose()
        .map_err(|e: String| anyhow!(e))?
        .unwrap_or_default();

    let mut metadata = VideoMetadata::new(title.clone()).with_privacy(privacy);
    if let Some(description) = sub.get_one::<String>("description") {
        metadata = metadata.with_description(description.clone());
    }
    if let Some(category) = sub.get_one::<String>("category") {
        metadata = metadata.with_category(category.clone());
    }

    app.load_identity().await?;
    let auth = app.login(token).await?;
    let page = app
        .user_pages(&auth)
        .await?
        .into_iter()
        .find(|page| &page.id == page_id)
        .ok_or_else(|| anyhow!("User {} cannot manage page {}", auth.user_id, page_id))?;

    if sub.get_flag("single-shot") {
        let request = VideoUploadRequest::from_file(&page, file, metadata).await?;
        let reply = app.upload_video(request).await?;
        println!("Uploaded video {}", reply.id.as_deref().unwrap_or("<unknown>"));
    } else {
        let published = app.upload_file(file, &page, &metadata).await;
        if let Err(e) = &published {
            app.toasts().error(e.to_string()).await;
        }
        published?;
    }
    Ok(())
}
