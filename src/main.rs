use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use screen_recorder::assembler::Assembler;
use screen_recorder::catalog::Catalog;
use screen_recorder::config::{Bitrate, Quality, RecorderConfig};
use screen_recorder::constants::DEFAULT_API_PORT;
use screen_recorder::db;
use screen_recorder::error::RecorderError;
use screen_recorder::janitor;
use screen_recorder::pipe_capture::PipeCapture;
use screen_recorder::recorder::{Recorder, RecorderEvent, RecorderOptions, SessionConfig};
use screen_recorder::serve;
use screen_recorder::session::{format_hms, now_ms};
use screen_recorder::store::{DurableStore, RecordingSummary, SqliteStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "Record the screen into a local SQLite catalog")]
struct Args {
    /// Path to config file (TOML format)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config file)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record until Ctrl-C, the duration limit, or the capture source ends
    Record {
        /// Resolution preset (overrides config file)
        #[arg(short, long)]
        quality: Option<Quality>,

        /// Bitrate preset (overrides config file)
        #[arg(short, long)]
        bitrate: Option<Bitrate>,

        /// Frames per second (overrides config file)
        #[arg(long)]
        frame_rate: Option<u32>,

        /// Also capture the microphone
        #[arg(long)]
        microphone: bool,

        /// Also capture the camera
        #[arg(long)]
        camera: bool,

        /// Do not capture system audio
        #[arg(long)]
        no_system_audio: bool,

        /// Stop after this many recorded minutes (overrides config file)
        #[arg(short, long)]
        duration_limit_minutes: Option<u64>,
    },
    /// List finished recordings, newest first
    List,
    /// Change the title of a recording
    Rename { id: i64, title: String },
    /// Delete a recording
    Delete { id: i64 },
    /// Write a recording to a file
    Export {
        id: i64,

        /// Directory to write into
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// List unfinished sessions, or assemble one into a recording
    Recover {
        /// Session to assemble (lists sessions when omitted)
        session_id: Option<i64>,
    },
    /// Purge stale staged chunks
    Sweep {
        /// Delete every staged chunk regardless of age
        #[arg(long)]
        all: bool,
    },
    /// Serve the catalog via HTTP
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_API_PORT)]
        port: u16,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RecorderConfig::load(path)?,
        None => RecorderConfig::default(),
    };
    if let Some(database) = args.database.clone() {
        config.database = Some(database);
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args.command, config))
}

async fn run(command: Command, mut config: RecorderConfig) -> Result<(), Box<dyn std::error::Error>> {
    let pool = db::open_and_init_database(&config.database_path()).await?;
    let store: Arc<dyn DurableStore> = Arc::new(SqliteStore::new(pool));
    let catalog = Catalog::new(Arc::clone(&store));

    match command {
        Command::Record {
            quality,
            bitrate,
            frame_rate,
            microphone,
            camera,
            no_system_audio,
            duration_limit_minutes,
        } => {
            if quality.is_some() {
                config.quality = quality;
            }
            if bitrate.is_some() {
                config.bitrate = bitrate;
            }
            if frame_rate.is_some() {
                config.frame_rate = frame_rate;
            }
            if microphone {
                config.microphone = Some(true);
            }
            if camera {
                config.camera = Some(true);
            }
            if no_system_audio {
                config.system_audio = Some(false);
            }
            if duration_limit_minutes.is_some() {
                config.duration_limit_minutes = duration_limit_minutes;
            }
            config.validate()?;
            record(catalog, &config).await
        }
        Command::List => {
            let recordings = catalog.list().await?;
            if recordings.is_empty() {
                println!("No recordings");
            }
            for recording in &recordings {
                print_recording(recording);
            }
            Ok(())
        }
        Command::Rename { id, title } => {
            let recording = catalog.rename(id, &title).await?;
            print_recording(&recording);
            Ok(())
        }
        Command::Delete { id } => {
            if catalog.delete(id).await? {
                println!("Deleted recording {}", id);
            } else {
                println!("Recording {} does not exist", id);
            }
            Ok(())
        }
        Command::Export { id, output_dir } => {
            let path = catalog.export(id, &output_dir).await?;
            println!("Exported recording {} to {}", id, path.display());
            Ok(())
        }
        Command::Recover { session_id } => match session_id {
            Some(session_id) => {
                let assembler = Assembler::new(store, catalog.clone());
                match assembler.recover(session_id).await? {
                    Some(recording) => {
                        println!("Recovered session {}:", session_id);
                        print_recording(&recording);
                    }
                    None => println!("No staged chunks for session {}", session_id),
                }
                Ok(())
            }
            None => {
                let sessions = catalog.orphaned_sessions().await?;
                if sessions.is_empty() {
                    println!("No unfinished sessions");
                }
                for session in sessions {
                    println!(
                        "session {}  {} chunks  {} bytes  {} .. {}",
                        session.session_id,
                        session.chunk_count,
                        session.total_bytes,
                        format_timestamp(session.first_arrival_ms),
                        format_timestamp(session.last_arrival_ms)
                    );
                }
                Ok(())
            }
        },
        Command::Sweep { all } => {
            let deleted = if all {
                catalog.clear_staged_chunks().await?
            } else {
                janitor::purge_stale_chunks(store.as_ref(), config.retention(), now_ms(), None)
                    .await?
            };
            println!("Deleted {} staged chunks", deleted);
            Ok(())
        }
        Command::Serve { port } => {
            serve::serve_catalog(catalog, port, config.retention(), config.sweep_interval()).await
        }
    }
}

async fn record(catalog: Catalog, config: &RecorderConfig) -> Result<(), Box<dyn std::error::Error>> {
    let platform = Arc::new(PipeCapture::new(config.capture_program()));
    let recorder = Recorder::new(
        catalog,
        platform,
        RecorderOptions {
            retention: config.retention(),
            sweep_interval: config.sweep_interval(),
        },
    );
    let mut events = recorder.subscribe();
    let mut status = recorder.watch_status();

    let session_id = recorder
        .start(SessionConfig {
            capture: config.capture_settings(),
            limits: config.limits(),
        })
        .await?;
    println!("Recording session {} (Ctrl-C to stop)", session_id);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                match recorder.stop().await {
                    Ok(outcome) => {
                        println!();
                        println!("Recording stopped: {}", outcome.reason);
                        print_recording(&outcome.recording);
                        return Ok(());
                    }
                    // Already stopping on its own; wait for the commit event
                    Err(RecorderError::NotRecording(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            event = events.recv() => match event {
                Ok(RecorderEvent::Stopped { reason, .. }) => {
                    println!();
                    println!("Recording stopped: {}", reason);
                }
                Ok(RecorderEvent::Committed { recording, .. }) => {
                    print_recording(&recording);
                    return Ok(());
                }
                Ok(RecorderEvent::CommitFailed { message, .. }) => {
                    return Err(format!("Failed to save recording: {}", message).into());
                }
                Ok(RecorderEvent::DeviceWarning { message, .. }) => {
                    eprintln!("Warning: {}", message);
                }
                Ok(RecorderEvent::StateChanged { .. }) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Ok(()),
            },
            changed = status.changed() => {
                if changed.is_ok() {
                    let snapshot = status.borrow_and_update().clone();
                    print!(
                        "\r{} [{}] {:.1} MiB recorded, buffer {:.0}%   ",
                        format_hms(snapshot.elapsed.as_secs()),
                        snapshot.state,
                        snapshot.bytes_recorded as f64 / (1024.0 * 1024.0),
                        snapshot.memory_percent
                    );
                    let _ = std::io::stdout().flush();
                }
            }
        }
    }
}

fn format_timestamp(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn print_recording(recording: &RecordingSummary) {
    println!(
        "{:>5}  {}  {}  {:>8.2} MiB  {:<28}  {}",
        recording.id,
        format_timestamp(recording.created_at_ms),
        format_hms(recording.duration_secs.round() as u64),
        recording.size_bytes as f64 / (1024.0 * 1024.0),
        recording.mime_type,
        recording.title
    );
}
