use crate::audio::{RecordTap, VoiceBank};
use crate::frame_sync::{FrameSync, FrameTap, SyncError};
use crate::pool::PoolManager;
use crate::raster::rasterize;
use crate::record::{RecordOptions, Recorder};
use crate::settings::SharedSettings;
use anyhow::Result;
use crossbeam_channel::Receiver;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Requests applied between ticks, never in the middle of one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    StartRecording { out: PathBuf },
    StopRecording,
}

/// Counters the UI reads without touching the pool.
#[derive(Debug, Default)]
pub struct EngineStatus {
    pub frame: AtomicU64,
    pub pool_size: AtomicUsize,
    pub channels: AtomicUsize,
    pub recording: AtomicBool,
    notice: Mutex<Option<String>>,
}

impl EngineStatus {
    /// Takes the latest one-line notice (recording saved, recorder failure).
    pub fn take_notice(&self) -> Option<String> {
        self.notice.lock().ok().and_then(|mut n| n.take())
    }

    fn notify(&self, msg: String) {
        if let Ok(mut n) = self.notice.lock() {
            *n = Some(msg);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineExit {
    Stopped,
    ConsumerGone,
}

/// The producer context: everything one tick touches, owned in one place.
pub struct Engine {
    pool: PoolManager,
    sync: FrameSync,
    settings: SharedSettings,
    voices: Arc<VoiceBank>,
    controls: Receiver<Control>,
    record_tap: Option<RecordTap>,
    sample_rate_hz: Option<u32>,
    recorder: Option<Recorder>,
    frame_size: (usize, usize),
    status: Arc<EngineStatus>,
    stop: Arc<AtomicBool>,
    audio_buf: Vec<f32>,
}

impl Engine {
    pub fn new(
        pool: PoolManager,
        sync: FrameSync,
        frame_size: (usize, usize),
        settings: SharedSettings,
        voices: Arc<VoiceBank>,
        controls: Receiver<Control>,
    ) -> Self {
        Self {
            pool,
            sync,
            settings,
            voices,
            controls,
            record_tap: None,
            sample_rate_hz: None,
            recorder: None,
            frame_size,
            status: Arc::new(EngineStatus::default()),
            stop: Arc::new(AtomicBool::new(false)),
            audio_buf: Vec::new(),
        }
    }

    /// Records what the audio device actually played, at `sample_rate_hz`.
    pub fn with_record_tap(mut self, tap: RecordTap, sample_rate_hz: u32) -> Self {
        self.record_tap = Some(tap);
        self.sample_rate_hz = Some(sample_rate_hz);
        self
    }

    pub fn status(&self) -> Arc<EngineStatus> {
        Arc::clone(&self.status)
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// The tick loop. Returns when stopped or when every consumer is gone;
    /// a pool error (resource exhaustion) ends it with `Err`.
    pub fn run(mut self) -> Result<EngineExit> {
        let exit = self.run_loop();
        if let Some(rec) = self.recorder.take() {
            self.finish_recording(rec);
        }
        self.voices.publish(Vec::new());
        exit
    }

    fn run_loop(&mut self) -> Result<EngineExit> {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Ok(EngineExit::Stopped);
            }
            self.apply_controls();

            let settings = self.settings.snapshot();
            let report = self.pool.tick(&settings.to_tick_params())?;
            if report.reset {
                log::info!(target: "engine", "mode switched to {}", settings.mode.label());
            }
            self.voices.publish(self.pool.voices());
            self.status.pool_size.store(self.pool.len(), Ordering::Relaxed);
            self.status.channels.store(self.pool.channels().len(), Ordering::Relaxed);
            self.drain_audio();

            let style = settings.trail_style();
            let pool = &self.pool;
            let tap = self.recorder.as_mut().map(|r| r as &mut dyn FrameTap);
            let published = match self.sync.render_frame(tap, |raster| rasterize(raster, pool.views(), &style)) {
                Ok(p) => p,
                Err(SyncError::Disconnected) => return Ok(EngineExit::ConsumerGone),
                Err(err) => return Err(err.into()),
            };
            self.status.frame.store(published.frame, Ordering::Relaxed);
            if let Some(err) = published.tap_error {
                log::warn!(target: "engine", "recorder failed on frame {}: {err}", published.frame);
                self.status.notify(format!("recording stopped: {err}"));
                self.stop_recording();
            }

            match self.sync.wait_consumed() {
                Ok(_) => {}
                Err(SyncError::Interrupted) => {
                    log::debug!(target: "engine", "frame wait interrupted; rendering again");
                }
                Err(SyncError::Disconnected) => return Ok(EngineExit::ConsumerGone),
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn apply_controls(&mut self) {
        while let Ok(control) = self.controls.try_recv() {
            match control {
                Control::StartRecording { out } => self.start_recording(out),
                Control::StopRecording => self.stop_recording(),
            }
        }
    }

    fn start_recording(&mut self, out: PathBuf) {
        if self.recorder.is_some() {
            return;
        }
        let opts = RecordOptions {
            out,
            width: self.frame_size.0,
            height: self.frame_size.1,
            fps: self.settings.snapshot().fps,
            sample_rate_hz: self.sample_rate_hz,
        };
        match Recorder::start(opts) {
            Ok(rec) => {
                if let Some(tap) = self.record_tap.as_mut() {
                    tap.set_recording(true);
                }
                self.status.notify(format!("recording {}", rec.out_path().display()));
                self.recorder = Some(rec);
                self.status.recording.store(true, Ordering::Relaxed);
            }
            Err(err) => {
                log::warn!(target: "engine", "could not start recording: {err:#}");
                self.status.notify(format!("recording failed: {err}"));
            }
        }
    }

    fn stop_recording(&mut self) {
        if let Some(tap) = self.record_tap.as_mut() {
            tap.set_recording(false);
        }
        self.drain_audio();
        if let Some(rec) = self.recorder.take() {
            self.finish_recording(rec);
        }
    }

    fn finish_recording(&mut self, rec: Recorder) {
        self.status.recording.store(false, Ordering::Relaxed);
        match rec.finish() {
            Ok(summary) => self.status.notify(format!(
                "saved {} ({} frames)",
                summary.path.display(),
                summary.frames
            )),
            Err(err) => {
                log::warn!(target: "engine", "recording not saved: {err:#}");
                self.status.notify(format!("recording not saved: {err}"));
            }
        }
    }

    fn drain_audio(&mut self) {
        let (Some(tap), Some(rec)) = (self.record_tap.as_mut(), self.recorder.as_mut()) else {
            return;
        };
        self.audio_buf.clear();
        tap.drain_into(&mut self.audio_buf);
        if let Err(err) = rec.push_audio(&self.audio_buf) {
            log::warn!(target: "engine", "dropping {} audio samples: {err}", self.audio_buf.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_sync::frame_channel;
    use crate::generator::Generator;
    use crate::pool::PoolError;
    use crate::settings::Settings;
    use std::thread;
    use std::time::Duration;

    fn engine(budget: u128, settings: Settings) -> (Engine, crate::frame_sync::FrameConsumer) {
        let (sync, consumer) = frame_channel(32, 32);
        let (_tx, rx) = crossbeam_channel::unbounded();
        let e = Engine::new(
            PoolManager::new(Generator::with_seed(11), budget),
            sync,
            (32, 32),
            SharedSettings::new(settings),
            Arc::new(VoiceBank::new()),
            rx,
        );
        (e, consumer)
    }

    fn small_settings() -> Settings {
        Settings {
            trajectories: 5,
            min_iterations: 10,
            max_iterations: 40,
            ..Settings::default()
        }
    }

    #[test]
    fn producer_is_paced_by_consumer() {
        let (e, consumer) = engine(u128::MAX, small_settings());
        let status = e.status();
        let h = thread::spawn(move || e.run());

        for expected in 1..=3u64 {
            let t = consumer.wait_ready(Duration::from_secs(10)).unwrap().unwrap();
            assert_eq!(t.frame(), expected);
            // Holding the token keeps the producer parked on this frame.
            thread::sleep(Duration::from_millis(20));
            assert_eq!(status.frame.load(Ordering::Relaxed), expected);
            consumer.release(t).unwrap();
        }
        assert_eq!(status.pool_size.load(Ordering::Relaxed), 5);

        drop(consumer);
        assert_eq!(h.join().unwrap().unwrap(), EngineExit::ConsumerGone);
    }

    #[test]
    fn resource_exhaustion_ends_the_loop() {
        let (e, _consumer) = engine(1024, Settings::default());
        let err = e.run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PoolError>(),
            Some(PoolError::ResourceExhausted { .. })
        ));
    }

    #[test]
    fn stop_flag_is_checked_between_ticks() {
        let (e, consumer) = engine(u128::MAX, small_settings());
        let stop = e.stop_handle();
        let h = thread::spawn(move || e.run());
        let t = consumer.wait_ready(Duration::from_secs(10)).unwrap().unwrap();
        stop.store(true, Ordering::Relaxed);
        consumer.release(t).unwrap();
        assert_eq!(h.join().unwrap().unwrap(), EngineExit::Stopped);
    }
}
