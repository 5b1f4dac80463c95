use clap::Parser;
use stage_display::display::DisplayConsumer;
use stage_display::relay::{ConnectionStatus, RelayClient};
use stage_display::store::{AnyStore, HttpStore, JsonFileStore, SongStore};
use stage_proto::config::Config;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Follow the bridge push stream and render the current song page.
#[derive(Debug, Parser)]
#[command(name = "stage-display", version)]
struct Args {
    /// Config file (defaults to the platform config dir).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Bridge push-stream URL, e.g. ws://192.168.1.20:8081/
    #[arg(long)]
    url: Option<String>,
    /// Song records: a local JSON file path or an http(s) URL.
    #[arg(long)]
    songs: Option<String>,
    /// Write the page here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.url {
            config.relay.url = url.clone();
        }
        if let Some(songs) = &self.songs {
            if songs.starts_with("http://") || songs.starts_with("https://") {
                config.display.songs_url = Some(songs.clone());
                config.display.songs_file = None;
            } else {
                config.display.songs_file = Some(PathBuf::from(songs));
            }
        }
        if let Some(output) = &self.output {
            config.display.output = Some(output.clone());
        }
    }
}

/// Relay callbacks run on the relay task; they forward into the render loop.
#[derive(Debug)]
enum DisplayUpdate {
    Song(String),
    Progress(f64),
    Playing(bool),
    Connection(ConnectionStatus),
}

fn forward<T: 'static>(
    tx: &mpsc::UnboundedSender<DisplayUpdate>,
    wrap: fn(&T) -> DisplayUpdate,
) -> impl FnMut(&T) -> anyhow::Result<()> + Send + 'static {
    let tx = tx.clone();
    move |value: &T| {
        tx.send(wrap(value))
            .map_err(|_| anyhow::anyhow!("display loop gone"))
    }
}

async fn write_page(output: Option<&PathBuf>, html: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            // Write then rename so a watching browser never sees a half page.
            let tmp = path.with_extension("tmp");
            tokio::fs::write(&tmp, html).await?;
            tokio::fs::rename(&tmp, path).await?;
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(html.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let data_dir = stage_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("display.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,stage_display=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    args.apply(&mut config);

    let store = match (&config.display.songs_file, &config.display.songs_url) {
        (Some(path), _) => AnyStore::File(JsonFileStore::new(path.clone())),
        (None, Some(url)) => AnyStore::Http(HttpStore::new(url.clone())),
        (None, None) => anyhow::bail!("no song source: set [display] songs_file or songs_url, or pass --songs"),
    };

    run(config, store).await
}

async fn run<S: SongStore>(config: Config, store: S) -> anyhow::Result<()> {
    let (update_tx, mut update_rx) = mpsc::unbounded_channel();

    let mut relay = RelayClient::new(&config.relay);
    let listeners = relay.listeners_mut();
    listeners
        .song_change
        .push(forward(&update_tx, |name: &String| DisplayUpdate::Song(name.clone())));
    listeners
        .progress
        .push(forward(&update_tx, |f: &f64| DisplayUpdate::Progress(*f)));
    listeners
        .playback
        .push(forward(&update_tx, |p: &bool| DisplayUpdate::Playing(*p)));
    listeners
        .connection
        .push(forward(&update_tx, |s: &ConnectionStatus| DisplayUpdate::Connection(*s)));
    drop(update_tx);

    let (relay_handle, relay_task) = relay.spawn();
    info!("Following {}", config.relay.url);
    relay_handle.connect(None);

    let output = config.display.output;
    let mut display = DisplayConsumer::new(store);
    write_page(output.as_ref(), &display.page_html()).await?;

    loop {
        let update = tokio::select! {
            update = update_rx.recv() => match update {
                Some(u) => u,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
        };

        let changed = match update {
            DisplayUpdate::Song(name) => display.song_changed(&name).await,
            DisplayUpdate::Progress(f) => {
                display.set_progress(f);
                true
            }
            DisplayUpdate::Playing(p) => {
                display.set_playing(p);
                true
            }
            DisplayUpdate::Connection(status) => {
                info!("Connection {:?}: {}", status.source, status.connected);
                display.set_connection(status);
                true
            }
        };

        if changed {
            if let Err(e) = write_page(output.as_ref(), &display.page_html()).await {
                warn!("Failed to write page: {:#}", e);
            }
        }
    }

    relay_handle.disconnect();
    drop(relay_handle);
    let _ = relay_task.await;
    info!("Display stopped");
    Ok(())
}
