//! Capture adapter that runs an external encoder and reads its stdout.
//!
//! The encoder (typically `ffmpeg ... -f webm pipe:1`) owns grabbing and
//! encoding. This adapter only slices its output into timed chunks.
//!
//! While paused the reader stops draining stdout, so the encoder blocks on
//! a full pipe instead of losing output. Bytes already read are never dropped.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureConstraints, CapturePlatform, CaptureSink, StreamHandle};
use crate::config::CaptureProgram;
use crate::constants::{CAPTURE_TIMESLICE, PIPE_READ_SIZE};
use crate::error::CaptureError;

/// How long an encoder gets to finish its output, once asked to quit and again after a kill
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// [`CapturePlatform`] backed by an encoder process
pub struct PipeCapture {
    program: CaptureProgram,
    timeslice: Duration,
}

impl PipeCapture {
    pub fn new(program: CaptureProgram) -> Self {
        Self {
            program,
            timeslice: CAPTURE_TIMESLICE,
        }
    }

    /// Override the interval at which pending output is cut into chunks
    pub fn with_timeslice(mut self, timeslice: Duration) -> Self {
        self.timeslice = timeslice;
        self
    }

    /// Expand the argument template for the given constraints
    ///
    /// Returns the arguments plus warnings for optional devices that were
    /// requested but have no arguments configured.
    pub fn build_args(&self, constraints: &CaptureConstraints) -> (Vec<String>, Vec<String>) {
        let settings = &constraints.settings;
        let mut args: Vec<String> = Vec::new();
        let mut warnings = Vec::new();

        let devices = [
            ("system audio", settings.system_audio, &self.program.system_audio_args),
            ("microphone", settings.microphone, &self.program.microphone_args),
            ("camera", settings.camera, &self.program.camera_args),
        ];
        for (device, requested, device_args) in devices {
            if !requested {
                continue;
            }
            match device_args {
                Some(extra) => args.extend(extra.iter().cloned()),
                None => warnings.push(format!("{} requested but no arguments configured", device)),
            }
        }

        let bitrate = settings.bitrate_bps.to_string();
        let width = settings.width.to_string();
        let height = settings.height.to_string();
        let frame_rate = settings.frame_rate.to_string();
        // Device inputs were added first so ffmpeg reads them before the output options
        args.extend(self.program.args.iter().map(|arg| {
            arg.replace("{width}", &width)
                .replace("{height}", &height)
                .replace("{frame_rate}", &frame_rate)
                .replace("{bitrate}", &bitrate)
        }));

        (args, warnings)
    }
}

#[async_trait]
impl CapturePlatform for PipeCapture {
    fn supported_mime_types(&self) -> Vec<String> {
        self.program.mime_types.clone()
    }

    async fn request_capture(
        &self,
        constraints: &CaptureConstraints,
        sink: CaptureSink,
    ) -> Result<Arc<dyn StreamHandle>, CaptureError> {
        let (args, warnings) = self.build_args(constraints);

        info!(
            "Starting encoder: {} {} ({})",
            self.program.program,
            args.join(" "),
            constraints.mime_type
        );

        let mut child = Command::new(&self.program.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::from_spawn(&self.program.program, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Unavailable("encoder stdout not captured".to_string()))?;
        let stdin = child.stdin.take();

        for warning in warnings {
            warn!("{}", warning);
            sink.device_warning(warning).await;
        }

        let (paused_tx, paused_rx) = watch::channel(false);
        let flush = Arc::new(Notify::new());
        let stop = CancellationToken::new();

        let reader = PipeReader {
            child,
            stdin,
            stdout,
            sink,
            quit_input: self.program.quit_input.clone(),
            paused: paused_rx,
            flush: Arc::clone(&flush),
            stop: stop.clone(),
            timeslice: self.timeslice,
        };
        let task = tokio::spawn(reader.run());

        Ok(Arc::new(PipeHandle {
            mime_type: constraints.mime_type.clone(),
            paused: paused_tx,
            flush,
            stop,
            task: Mutex::new(Some(task)),
        }))
    }
}

struct PipeHandle {
    mime_type: String,
    paused: watch::Sender<bool>,
    flush: Arc<Notify>,
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl StreamHandle for PipeHandle {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn request_chunk_now(&self) {
        self.flush.notify_one();
    }

    fn pause(&self) {
        self.paused.send_replace(true);
    }

    fn resume(&self) {
        self.paused.send_replace(false);
    }

    async fn stop(&self) {
        self.stop.cancel();
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Encoder reader task failed: {}", e);
            }
        }
    }
}

struct PipeReader {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
    sink: CaptureSink,
    quit_input: Option<String>,
    paused: watch::Receiver<bool>,
    flush: Arc<Notify>,
    stop: CancellationToken,
    timeslice: Duration,
}

impl PipeReader {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.timeslice);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        let mut buf = vec![0u8; PIPE_READ_SIZE];
        let mut pending = BytesMut::new();

        loop {
            let paused = *self.paused.borrow_and_update();
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    self.finish(&mut buf, &mut pending).await;
                    return;
                }
                changed = self.paused.changed() => {
                    if changed.is_err() {
                        debug!("Encoder handle dropped, stopping");
                        self.finish(&mut buf, &mut pending).await;
                        return;
                    }
                }
                read = self.stdout.read(&mut buf), if !paused => match read {
                    Ok(0) => {
                        info!("Encoder output ended");
                        break;
                    }
                    Ok(n) => pending.extend_from_slice(&buf[..n]),
                    Err(e) => {
                        warn!("Encoder read error: {}", e);
                        break;
                    }
                },
                _ = ticker.tick(), if !paused => {
                    if !self.emit(&mut pending, false).await {
                        return;
                    }
                }
                _ = self.flush.notified() => {
                    if !self.emit(&mut pending, false).await {
                        return;
                    }
                }
            }
        }

        // The encoder went away on its own: hand over the tail, then report the end
        self.emit(&mut pending, false).await;
        self.sink.ended().await;
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!("Encoder exited with {}", status);
        }
    }

    /// Send pending bytes as a chunk; empty buffers are skipped unless final
    async fn emit(&self, pending: &mut BytesMut, is_final: bool) -> bool {
        if pending.is_empty() && !is_final {
            return true;
        }
        let payload: Bytes = pending.split().freeze();
        debug!("Encoder chunk: {} bytes (final: {})", payload.len(), is_final);
        self.sink.chunk(payload, is_final).await
    }

    /// Ask the encoder to quit so it can write its trailer, kill it if it does not
    async fn finish(&mut self, buf: &mut [u8], pending: &mut BytesMut) {
        if let Some(mut stdin) = self.stdin.take() {
            if let Some(input) = &self.quit_input {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!("Encoder stdin closed before quit: {}", e);
                }
                let _ = stdin.flush().await;
            }
            // Dropping stdin sends EOF
        }

        if !drain(&mut self.stdout, buf, pending).await {
            warn!("Encoder did not exit within {:?}, killing it", DRAIN_TIMEOUT);
            if let Err(e) = self.child.start_kill() {
                debug!("Encoder already exited: {}", e);
            }
            if !drain(&mut self.stdout, buf, pending).await {
                warn!("Timed out draining encoder output");
            }
        }

        if let Err(e) = self.child.wait().await {
            warn!("Failed to reap encoder: {}", e);
        }
        self.emit(pending, true).await;
    }
}

/// Read stdout to EOF into `pending`; false if it did not end within [`DRAIN_TIMEOUT`]
async fn drain(stdout: &mut ChildStdout, buf: &mut [u8], pending: &mut BytesMut) -> bool {
    let read_all = async {
        loop {
            match stdout.read(buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => pending.extend_from_slice(&buf[..n]),
            }
        }
    };
    tokio::time::timeout(DRAIN_TIMEOUT, read_all).await.is_ok()
}
