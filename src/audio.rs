use crate::pool::Voice;
use crate::trajectory::{Point, TrajectoryId};
use anyhow::{Context, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer as _, Producer as _, Split as _};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Seconds of mono audio the record tap can hold before dropping samples.
const TAP_SECONDS: usize = 4;

/// The admitted voice set, republished by the producer after every tick.
///
/// The audio callback only ever `try_lock`s the list; the generation counter
/// lets it skip the lock entirely when nothing changed.
pub struct VoiceBank {
    generation: AtomicU64,
    voices: Mutex<Vec<Voice>>,
}

impl VoiceBank {
    pub fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            voices: Mutex::new(Vec::new()),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Replaces the voice set; a no-op when the ids are unchanged.
    pub fn publish(&self, voices: Vec<Voice>) {
        let mut guard = self.voices.lock().unwrap_or_else(|p| p.into_inner());
        let same = guard.len() == voices.len() && guard.iter().zip(&voices).all(|(a, b)| a.id == b.id);
        if same {
            return;
        }
        *guard = voices;
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.voices.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for VoiceBank {
    fn default() -> Self {
        Self::new()
    }
}

struct PlayingVoice {
    id: TrajectoryId,
    points: Arc<[Point]>,
    pos: usize,
}

/// Sums the admitted trajectories as looping wavetables over their x values,
/// one point per sample.
pub struct Mixer {
    bank: Arc<VoiceBank>,
    seen: u64,
    voices: Vec<PlayingVoice>,
}

impl Mixer {
    pub fn new(bank: Arc<VoiceBank>) -> Self {
        Self {
            bank,
            seen: 0,
            voices: Vec::new(),
        }
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Picks up a newer voice set if one is available without blocking.
    /// Voices that stay admitted keep their playback position.
    pub fn refresh(&mut self) {
        let generation = self.bank.generation();
        if generation == self.seen {
            return;
        }
        let Ok(published) = self.bank.voices.try_lock() else {
            return;
        };
        let mut next = Vec::with_capacity(published.len());
        for v in published.iter() {
            if v.points.is_empty() {
                continue;
            }
            let pos = self
                .voices
                .iter()
                .find(|p| p.id == v.id)
                .map(|p| p.pos % v.points.len())
                .unwrap_or(0);
            next.push(PlayingVoice {
                id: v.id,
                points: Arc::clone(&v.points),
                pos,
            });
        }
        drop(published);
        self.voices = next;
        self.seen = generation;
    }

    /// Next mono sample in [-1, 1]. Silence with no voices.
    pub fn next_sample(&mut self) -> f32 {
        if self.voices.is_empty() {
            return 0.0;
        }
        let mut acc = 0.0f64;
        for v in &mut self.voices {
            acc += v.points[v.pos].x;
            v.pos = (v.pos + 1) % v.points.len();
        }
        // Orbit coordinates stay within the bailout radius of 2.
        let n = self.voices.len() as f64;
        (acc / (2.0 * n)).clamp(-1.0, 1.0) as f32
    }

    pub fn fill_mono(&mut self, out: &mut [f32]) {
        self.refresh();
        for s in out {
            *s = self.next_sample();
        }
    }
}

pub fn list_output_devices() -> anyhow::Result<()> {
    let host = cpal::default_host();
    let devices = host.output_devices().context("enumerate output devices")?;

    let mut out = io::stdout();
    writeln!(out, "Output devices:")?;
    for dev in devices {
        let name = dev.name().unwrap_or_else(|_| "<unknown>".to_string());
        writeln!(out, "  - {}", name)?;
    }
    Ok(())
}

/// A running output stream fed by a [`Mixer`].
pub struct AudioOutput {
    _stream: cpal::Stream,
    recording: Arc<AtomicBool>,
    tap: Option<ringbuf::HeapCons<f32>>,
    pub sample_rate_hz: u32,
}

impl AudioOutput {
    pub fn new(bank: Arc<VoiceBank>, device_query: Option<&str>) -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let device = select_output_device(&host, device_query)?;
        let supported = device
            .default_output_config()
            .context("get default output config")?;
        let sample_rate_hz = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let config: cpal::StreamConfig = supported.clone().into();

        let rb = HeapRb::<f32>::new((sample_rate_hz as usize).saturating_mul(TAP_SECONDS));
        let (prod, cons) = rb.split();
        let recording = Arc::new(AtomicBool::new(false));

        let err_fn = |err| log::warn!(target: "audio", "output stream error: {err}");
        let mut render = OutputRender {
            mixer: Mixer::new(bank),
            channels: channels.max(1),
            tap: prod,
            recording: Arc::clone(&recording),
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _| render.write(data),
                err_fn,
                None,
            )?,
            SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _| render.write(data),
                err_fn,
                None,
            )?,
            SampleFormat::U16 => device.build_output_stream(
                &config,
                move |data: &mut [u16], _| render.write(data),
                err_fn,
                None,
            )?,
            fmt => return Err(anyhow!("unsupported sample format: {fmt:?}")),
        };

        stream.play().context("start output stream")?;
        log::info!(
            target: "audio",
            "output {} Hz, {channels} ch, {:?}",
            sample_rate_hz,
            supported.sample_format()
        );

        Ok(Self {
            _stream: stream,
            recording,
            tap: Some(cons),
            sample_rate_hz,
        })
    }

    /// Hands the consumer end of the record tap to whoever records. Only once.
    pub fn take_record_tap(&mut self) -> Option<RecordTap> {
        let cons = self.tap.take()?;
        Some(RecordTap {
            cons,
            recording: Arc::clone(&self.recording),
        })
    }
}

/// Consumer end of the samples the output callback produced while recording.
pub struct RecordTap {
    cons: ringbuf::HeapCons<f32>,
    recording: Arc<AtomicBool>,
}

impl RecordTap {
    /// Starts or stops tapping; starting drops anything left from before.
    pub fn set_recording(&mut self, on: bool) {
        if on {
            while self.cons.try_pop().is_some() {}
        }
        self.recording.store(on, Ordering::Release);
    }

    pub fn drain_into(&mut self, out: &mut Vec<f32>) {
        while let Some(s) = self.cons.try_pop() {
            out.push(s);
        }
    }
}

struct OutputRender {
    mixer: Mixer,
    channels: usize,
    tap: ringbuf::HeapProd<f32>,
    recording: Arc<AtomicBool>,
}

impl OutputRender {
    fn write<T: SizedSample + FromSample<f32>>(&mut self, data: &mut [T]) {
        self.mixer.refresh();
        let tapping = self.recording.load(Ordering::Acquire);
        for frame in data.chunks_mut(self.channels) {
            let s = self.mixer.next_sample();
            if tapping {
                let _ = self.tap.try_push(s);
            }
            let v = T::from_sample(s);
            for d in frame {
                *d = v;
            }
        }
    }
}

fn select_output_device(host: &cpal::Host, device_query: Option<&str>) -> anyhow::Result<cpal::Device> {
    let devices = host
        .output_devices()
        .context("enumerate output devices")?
        .collect::<Vec<_>>();

    let want = device_query.map(|s| s.to_lowercase());
    if let Some(want) = want.as_deref() {
        if let Some(dev) = devices.iter().find(|d| {
            d.name()
                .map(|n| n.to_lowercase().contains(want))
                .unwrap_or(false)
        }) {
            return Ok(dev.clone());
        }
        return Err(anyhow!("no output device matching: {want}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("no default output device found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(id: u64, xs: &[f64]) -> Voice {
        Voice {
            id: TrajectoryId(id),
            points: xs.iter().map(|&x| Point::new(x, 0.0)).collect::<Vec<_>>().into(),
            amplitude: 1.0,
        }
    }

    #[test]
    fn silent_without_voices() {
        let mut m = Mixer::new(Arc::new(VoiceBank::new()));
        let mut out = [1.0f32; 8];
        m.fill_mono(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn single_voice_loops_over_x() {
        let bank = Arc::new(VoiceBank::new());
        bank.publish(vec![voice(1, &[2.0, -2.0, 0.0])]);
        let mut m = Mixer::new(Arc::clone(&bank));
        let mut out = [0.0f32; 6];
        m.fill_mono(&mut out);
        assert_eq!(out, [1.0, -1.0, 0.0, 1.0, -1.0, 0.0]);
    }

    #[test]
    fn republish_keeps_position_of_surviving_voice() {
        let bank = Arc::new(VoiceBank::new());
        bank.publish(vec![voice(1, &[0.0, 1.0, 2.0, -1.0])]);
        let mut m = Mixer::new(Arc::clone(&bank));
        let mut out = [0.0f32; 2];
        m.fill_mono(&mut out);

        bank.publish(vec![voice(1, &[0.0, 1.0, 2.0, -1.0]), voice(7, &[0.0])]);
        m.refresh();
        assert_eq!(m.voice_count(), 2);
        // Voice 1 resumes at index 2: (2.0 + 0.0) / (2 * 2).
        assert_eq!(m.next_sample(), 0.5);
    }

    #[test]
    fn same_ids_do_not_bump_generation() {
        let bank = VoiceBank::new();
        bank.publish(vec![voice(1, &[0.1])]);
        let g = bank.generation();
        bank.publish(vec![voice(1, &[0.1])]);
        assert_eq!(bank.generation(), g);
        bank.publish(Vec::new());
        assert_eq!(bank.generation(), g + 1);
        assert!(bank.is_empty());
    }
}
