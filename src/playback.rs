use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_SIRENS_DIR: &str = "/usr/share/Atam_Okul_Zili/sirenler";
pub const INDICATOR_VISIBLE_MS: i64 = 12_000;
pub const INDICATOR_BLINK_MS: i64 = 500;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no sound assigned for bell type '{0}'")]
    Unassigned(&'static str),
    #[error("sound file path is empty")]
    EmptyPath,
    #[error("sound file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("playback worker is not running")]
    WorkerGone,
}

/// What the bell scheduler needs from its host: a way to make noise and a way to say so.
pub trait NotificationPort: Send {
    fn request_playback(&mut self, sound_path: &Path) -> Result<(), PlaybackError>;

    fn notify_bell_fired(&mut self);

    fn stop_playback(&mut self) {}
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SpecialSound {
    ArmisticeSiren,
    NationalAnthem,
    MomentOfSilence,
    Earthquake,
    Fire,
}

impl SpecialSound {
    pub const ALL: [SpecialSound; 5] = [
        SpecialSound::ArmisticeSiren,
        SpecialSound::NationalAnthem,
        SpecialSound::MomentOfSilence,
        SpecialSound::Earthquake,
        SpecialSound::Fire,
    ];

    pub fn key(self) -> &'static str {
        match self {
            SpecialSound::ArmisticeSiren => "armistice-siren",
            SpecialSound::NationalAnthem => "national-anthem",
            SpecialSound::MomentOfSilence => "moment-of-silence",
            SpecialSound::Earthquake => "earthquake",
            SpecialSound::Fire => "fire",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            SpecialSound::ArmisticeSiren => "10 KASIM siren ve İstiklal Marşı bileşik.mp3",
            SpecialSound::NationalAnthem => "İSTİKLAL MARŞI.mp3",
            SpecialSound::MomentOfSilence => "saygı_ti.mp3",
            SpecialSound::Earthquake => "deprem.mp3",
            SpecialSound::Fire => "yangın.mp3",
        }
    }

    pub fn path_in(self, sirens_dir: &Path) -> PathBuf {
        sirens_dir.join(self.file_name())
    }
}

impl FromStr for SpecialSound {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        SpecialSound::ALL
            .into_iter()
            .find(|sound| sound.key().eq_ignore_ascii_case(input.trim()))
            .ok_or_else(|| format!("unknown special sound '{input}'"))
    }
}

/// Transient "bell ringing" indication: visible for 12 s, blinking every 500 ms.
#[derive(Debug, Clone, Copy, Default)]
pub struct RingIndicator {
    armed_at: Option<NaiveDateTime>,
    fired_count: u64,
}

impl RingIndicator {
    pub fn arm(&mut self, now: NaiveDateTime) {
        self.armed_at = Some(now);
        self.fired_count += 1;
    }

    pub fn is_active(&self, now: NaiveDateTime) -> bool {
        self.elapsed_ms(now)
            .map(|elapsed| (0..INDICATOR_VISIBLE_MS).contains(&elapsed))
            .unwrap_or(false)
    }

    pub fn is_lit(&self, now: NaiveDateTime) -> bool {
        self.is_active(now)
            && self
                .elapsed_ms(now)
                .map(|elapsed| (elapsed / INDICATOR_BLINK_MS) % 2 == 0)
                .unwrap_or(false)
    }

    pub fn last_fired_at(&self) -> Option<NaiveDateTime> {
        self.armed_at
    }

    pub fn fired_count(&self) -> u64 {
        self.fired_count
    }

    fn elapsed_ms(&self, now: NaiveDateTime) -> Option<i64> {
        self.armed_at
            .map(|armed_at| (now - armed_at).num_milliseconds())
    }
}

pub type SharedIndicator = Arc<Mutex<RingIndicator>>;

pub fn validate_sound_path(path: &Path) -> Result<(), PlaybackError> {
    if path.as_os_str().is_empty() {
        return Err(PlaybackError::EmptyPath);
    }
    if !path.exists() {
        return Err(PlaybackError::NotFound(path.to_path_buf()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub enum PlaybackMessage {
    Play(PathBuf),
    Stop,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PlaybackBackend {
    Silent,
    Command { program: String, args: Vec<String> },
    #[cfg(feature = "audio")]
    Decoder,
}

impl PlaybackBackend {
    pub fn label(&self) -> String {
        match self {
            PlaybackBackend::Silent => "silent".to_string(),
            PlaybackBackend::Command { program, .. } => format!("command ({program})"),
            #[cfg(feature = "audio")]
            PlaybackBackend::Decoder => "decoder".to_string(),
        }
    }
}

/// Host adapter handed to the scheduler. Playback is forwarded to the worker thread.
pub struct HostPort {
    sender: Sender<PlaybackMessage>,
    indicator: SharedIndicator,
}

impl HostPort {
    pub fn new(sender: Sender<PlaybackMessage>, indicator: SharedIndicator) -> Self {
        Self { sender, indicator }
    }
}

impl NotificationPort for HostPort {
    fn request_playback(&mut self, sound_path: &Path) -> Result<(), PlaybackError> {
        validate_sound_path(sound_path)?;
        self.sender
            .send(PlaybackMessage::Play(sound_path.to_path_buf()))
            .map_err(|_| PlaybackError::WorkerGone)
    }

    fn notify_bell_fired(&mut self) {
        self.indicator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .arm(Local::now().naive_local());
    }

    fn stop_playback(&mut self) {
        if self.sender.send(PlaybackMessage::Stop).is_err() {
            debug!("stop requested but playback worker is gone");
        }
    }
}

pub struct PlaybackWorker {
    sender: Sender<PlaybackMessage>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl PlaybackWorker {
    pub fn spawn(backend: PlaybackBackend) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let join = thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || run_playback_loop(backend, receiver, stop_for_thread))
            .context("failed to spawn playback thread")?;
        Ok(Self {
            sender,
            stop,
            join: Some(join),
        })
    }

    pub fn sender(&self) -> Sender<PlaybackMessage> {
        self.sender.clone()
    }
}

impl Drop for PlaybackWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

enum Player {
    Silent,
    Command {
        program: String,
        args: Vec<String>,
    },
    #[cfg(feature = "audio")]
    Decoder {
        _stream: rodio::OutputStream,
        handle: rodio::OutputStreamHandle,
    },
}

enum ActivePlayback {
    Child(Child),
    #[cfg(feature = "audio")]
    Sink(rodio::Sink),
}

impl ActivePlayback {
    fn stop(self) {
        match self {
            ActivePlayback::Child(mut child) => {
                let _ = child.kill();
                let _ = child.wait();
            }
            #[cfg(feature = "audio")]
            ActivePlayback::Sink(sink) => sink.stop(),
        }
    }

    fn is_finished(&mut self) -> bool {
        match self {
            ActivePlayback::Child(child) => matches!(child.try_wait(), Ok(Some(_)) | Err(_)),
            #[cfg(feature = "audio")]
            ActivePlayback::Sink(sink) => sink.empty(),
        }
    }
}

impl Player {
    fn open(backend: PlaybackBackend) -> Self {
        match backend {
            PlaybackBackend::Silent => Player::Silent,
            PlaybackBackend::Command { program, args } => Player::Command { program, args },
            #[cfg(feature = "audio")]
            PlaybackBackend::Decoder => match rodio::OutputStream::try_default() {
                Ok((stream, handle)) => Player::Decoder {
                    _stream: stream,
                    handle,
                },
                Err(err) => {
                    warn!(error = %err, "no audio output device; falling back to silent playback");
                    Player::Silent
                }
            },
        }
    }

    fn play(&self, path: &Path) -> Option<ActivePlayback> {
        match self {
            Player::Silent => {
                info!(path = %path.display(), "silent backend, playback skipped");
                None
            }
            Player::Command { program, args } => match Command::new(program)
                .args(args)
                .arg(path)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
            {
                Ok(child) => {
                    info!(path = %path.display(), %program, "playing sound");
                    Some(ActivePlayback::Child(child))
                }
                Err(err) => {
                    warn!(%program, error = %err, "failed to start external player");
                    None
                }
            },
            #[cfg(feature = "audio")]
            Player::Decoder { handle, .. } => {
                let file = match std::fs::File::open(path) {
                    Ok(file) => file,
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "failed to open sound file");
                        return None;
                    }
                };
                let source = match rodio::Decoder::new(std::io::BufReader::new(file)) {
                    Ok(source) => source,
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "failed to decode sound file");
                        return None;
                    }
                };
                match rodio::Sink::try_new(handle) {
                    Ok(sink) => {
                        sink.append(source);
                        info!(path = %path.display(), "playing sound");
                        Some(ActivePlayback::Sink(sink))
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to open audio sink");
                        None
                    }
                }
            }
        }
    }
}

fn run_playback_loop(
    backend: PlaybackBackend,
    receiver: Receiver<PlaybackMessage>,
    stop: Arc<AtomicBool>,
) {
    let player = Player::open(backend);
    let mut active: Option<ActivePlayback> = None;
    while !stop.load(Ordering::Relaxed) {
        match receiver.recv_timeout(Duration::from_millis(200)) {
            Ok(PlaybackMessage::Play(path)) => {
                if let Some(previous) = active.take() {
                    previous.stop();
                }
                active = player.play(&path);
            }
            Ok(PlaybackMessage::Stop) => {
                if let Some(previous) = active.take() {
                    previous.stop();
                    info!("playback stopped");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if active.as_mut().is_some_and(ActivePlayback::is_finished) {
                    active = None;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    if let Some(previous) = active.take() {
        previous.stop();
    }
}
