use std::{
    path::{Path, PathBuf},
    thread,
};

use chrono::Utc;
use clap::{Parser, Subcommand, arg};
use log::{debug, info, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use trackside::{
    AppConfig, Client, Notification, RaceControlHandle, RaceControlView, SpeedUnit,
    TracksideError,
    client::TickClock,
    transport::{
        FrameSource, ReplaySource, WebSocketSource,
        replay::{load_frames, split_at_version_changes},
    },
    writer,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Follow a live race control feed
    Watch {
        /// Race control websocket or http address, e.g. ws://localhost:8772/api/race-control
        #[arg(short, long)]
        url: Option<String>,

        /// Record every received frame to this JSON lines file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Show speeds in mph
        #[arg(long)]
        mph: bool,

        /// Remember the url and units for the next run
        #[arg(long)]
        save_config: bool,
    },
    /// Play back a frame recording
    Replay {
        #[arg(short, long)]
        input: PathBuf,

        /// Keep the recorded gaps between frames
        #[arg(short, long)]
        paced: bool,

        /// Show speeds in mph
        #[arg(long)]
        mph: bool,
    },
}

fn load_config() -> AppConfig {
    match AppConfig::from_local_file() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            warn!("Ignoring unreadable config file: {}", e);
            AppConfig::default()
        }
    }
}

fn watch(
    url: Option<String>,
    output: Option<PathBuf>,
    use_mph: bool,
    save_config: bool,
) -> Result<(), TracksideError> {
    let mut config = load_config();
    if let Some(url) = url {
        config.server_url = url;
    }
    config.use_mph |= use_mph;
    if save_config {
        config.save()?;
    }

    let server_url = config.server_url.clone();
    let backoff = config.backoff();
    let (client, notifications) = Client::new(
        move || {
            Box::new(WebSocketSource::new(server_url.clone(), backoff.clone()))
                as Box<dyn FrameSource>
        },
        &config,
    );

    // if we need to write a recording we hand every frame to a writer thread as well
    let client = if let Some(output_file) = output {
        let (frame_writer_tx, frame_writer_rx) = mpsc::unbounded_channel();
        thread::spawn(move || writer::write_frames(&output_file, frame_writer_rx));
        client.with_recorder(frame_writer_tx)
    } else {
        client
    };

    run(client, notifications, SpeedUnit::from_use_mph(config.use_mph))
}

fn replay(input: &Path, paced: bool, use_mph: bool) -> Result<(), TracksideError> {
    let mut config = load_config();
    config.use_mph |= use_mph;

    // each protocol version change in the recording restarts the client on the next run
    let mut runs = split_at_version_changes(load_frames(input)?);
    let (client, notifications) = Client::new(
        move || {
            let frames = runs.pop_front().unwrap_or_default();
            Box::new(ReplaySource::from_frames(frames).paced(paced)) as Box<dyn FrameSource>
        },
        &config,
    );
    let client = client.with_tick_clock(TickClock::Recorded);

    run(client, notifications, SpeedUnit::from_use_mph(config.use_mph))
}

fn run(
    client: Client,
    notifications: UnboundedReceiver<Notification>,
    speed_unit: SpeedUnit,
) -> Result<(), TracksideError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| TracksideError::RuntimeError { source: e })?;

    let handle = client.handle();
    runtime.block_on(async move {
        let printer = tokio::spawn(print_notifications(handle, notifications, speed_unit));
        let result = client.run().await;
        let _ = printer.await;
        result
    })
}

async fn print_notifications(
    handle: RaceControlHandle,
    mut notifications: UnboundedReceiver<Notification>,
    speed_unit: SpeedUnit,
) {
    while let Some(notification) = notifications.recv().await {
        match notification {
            Notification::TrackChanged { track, layout } => {
                let header = handle.read(|rc| {
                    let view = RaceControlView::new(rc, speed_unit, Utc::now());
                    format!("{} ({})", view.title(), view.location())
                });
                info!("Track is now {} {}", track, layout);
                println!("== {} ==", header);
            }
            Notification::WeatherChanged { .. } => {
                let (weather, (ambient, road)) = handle.read(|rc| {
                    let view = RaceControlView::new(rc, speed_unit, Utc::now());
                    (view.weather(), view.temperatures())
                });
                println!("Weather: {}, ambient {}°C, road {}°C", weather, ambient, road);
            }
            Notification::StandingsChanged => {
                let (progress, rows) = handle.read(|rc| {
                    let view = RaceControlView::new(rc, speed_unit, Utc::now());
                    (view.progress(), view.standings())
                });
                println!("-- {} --", progress);
                for row in rows {
                    println!(
                        "{:>3} {:<24} {:<20} {:>4} {:>10} {:>10} {:>4} {}",
                        row.rank,
                        row.driver_name,
                        row.car_name,
                        row.total_laps,
                        row.last_lap,
                        row.best_lap,
                        row.tyres,
                        row.gap
                    );
                }
            }
            Notification::ChatReceived => {
                if let Some(message) = handle.read(|rc| rc.chat().iter().last().cloned()) {
                    println!("[chat] {}: {}", message.driver_name, message.text);
                }
            }
            Notification::CollisionRecorded(_) => {
                let cards = handle.read(|rc| {
                    RaceControlView::new(rc, speed_unit, Utc::now()).collisions()
                });
                if let Some(card) = cards.last() {
                    println!("[crash] {} {}: {}", card.driver_name, card.speed, card.title);
                }
            }
            Notification::DriverConnected(guid)
            | Notification::DriverDisconnected(guid)
            | Notification::DriverPurged(guid) => {
                debug!("Connection change for {}", guid);
            }
            Notification::SessionEnded { results_file } => {
                println!("Session over, results in {}", results_file);
            }
            Notification::ServerError(error) => println!("Server error: {}", error),
            other => debug!("{:?}", other),
        }
    }
}

fn main() {
    #[cfg(debug_assertions)]
    colog::init();

    let cli = Args::parse();
    ctrlc::set_handler(move || {
        println!("Exiting...");
        std::process::exit(0);
    })
    .expect("Could not set Ctrl-C handler");
    match &cli.command {
        Commands::Watch {
            url,
            output,
            mph,
            save_config,
        } => watch(url.clone(), output.clone(), *mph, *save_config)
            .expect("Error while following race control"),
        Commands::Replay { input, paced, mph } => {
            replay(input, *paced, *mph).expect("Error while replaying recording")
        }
    };
}
