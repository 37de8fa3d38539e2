use crate::frame_sync::FrameTap;
use crate::raster::Raster;
use anyhow::{Context, Result, anyhow, bail};
use std::fs;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct RecordOptions {
    pub out: PathBuf,
    pub width: usize,
    pub height: usize,
    pub fps: u32,
    /// `None` records video only.
    pub sample_rate_hz: Option<u32>,
}

/// Streams frames into an ffmpeg child and audio into a WAV file, then muxes
/// both into `out` on [`Recorder::finish`].
pub struct Recorder {
    opts: RecordOptions,
    video_tmp: PathBuf,
    ffmpeg: Child,
    stdin: Option<ChildStdin>,
    wav: Option<(PathBuf, WavWriter)>,
    frames: u64,
    frame_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub frames: u64,
    pub audio_samples: u64,
}

impl Recorder {
    pub fn start(opts: RecordOptions) -> Result<Self> {
        if opts.width == 0 || opts.height == 0 || opts.fps == 0 {
            bail!("recording needs a non-empty frame size and fps >= 1");
        }
        ensure_ffmpeg_available()?;
        if let Some(parent) = opts.out.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create recording directory {}", parent.display()))?;
        }

        let (video_tmp, wav) = match opts.sample_rate_hz {
            Some(sr) => {
                let wav_path = sibling(&opts.out, "wav");
                let writer = WavWriter::create(&wav_path, sr)
                    .with_context(|| format!("create {}", wav_path.display()))?;
                (sibling(&opts.out, "video.mp4"), Some((wav_path, writer)))
            }
            None => (opts.out.clone(), None),
        };

        let launched = spawn_video_encoder(&video_tmp, opts.width, opts.height, opts.fps).and_then(|mut child| {
            let stdin = child
                .stdin
                .take()
                .context("failed to open ffmpeg stdin for rawvideo input")?;
            Ok((child, stdin))
        });
        let (ffmpeg, stdin) = match launched {
            Ok(v) => v,
            Err(err) => {
                if let Some((wav_path, writer)) = wav {
                    drop(writer);
                    remove_temporaries(&[wav_path.as_path()]);
                }
                return Err(err);
            }
        };
        log::info!(target: "record", "recording to {}", opts.out.display());

        Ok(Self {
            frame_bytes: opts.width * opts.height * 4,
            opts,
            video_tmp,
            ffmpeg,
            stdin: Some(stdin),
            wav,
            frames: 0,
        })
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn out_path(&self) -> &Path {
        &self.opts.out
    }

    pub fn push_frame(&mut self, raster: &Raster) -> io::Result<()> {
        let pixels = raster.rgba();
        if pixels.len() != self.frame_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame is {}x{}, recorder expects {}x{}", raster.width(), raster.height(), self.opts.width, self.opts.height),
            ));
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "recorder already closed"));
        };
        stdin.write_all(pixels)?;
        self.frames += 1;
        Ok(())
    }

    /// Appends mono samples; ignored for video-only recordings.
    pub fn push_audio(&mut self, samples: &[f32]) -> io::Result<()> {
        match self.wav.as_mut() {
            Some((_, w)) => w.write(samples),
            None => Ok(()),
        }
    }

    /// Closes the encoder and muxes. The temporaries are removed whether or
    /// not this succeeds.
    pub fn finish(mut self) -> Result<RecordingSummary> {
        drop(self.stdin.take());
        let encoded = self.ffmpeg.wait().context("wait for ffmpeg").and_then(|status| {
            if status.success() {
                Ok(())
            } else {
                Err(anyhow!("ffmpeg exited with status {status}"))
            }
        });

        let audio_samples = match self.wav.take() {
            Some((wav_path, writer)) => {
                let muxed = encoded.and_then(|()| {
                    let samples = writer.finish().context("finalize wav")?;
                    mux(&self.video_tmp, &wav_path, &self.opts.out)?;
                    Ok(samples)
                });
                remove_temporaries(&[self.video_tmp.as_path(), wav_path.as_path()]);
                muxed?
            }
            None => {
                encoded?;
                0
            }
        };
        log::info!(target: "record", "wrote {} frames to {}", self.frames, self.opts.out.display());
        Ok(RecordingSummary {
            path: self.opts.out.clone(),
            frames: self.frames,
            audio_samples,
        })
    }
}

impl FrameTap for Recorder {
    fn capture(&mut self, raster: &Raster, _frame: u64) -> io::Result<()> {
        self.push_frame(raster)
    }
}

/// `twinklebrot-<unix seconds>.mp4` under `dir`.
pub fn recording_file_name(dir: &Path) -> PathBuf {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.join(format!("twinklebrot-{secs}.mp4"))
}

fn remove_temporaries(paths: &[&Path]) {
    for tmp in paths {
        match fs::remove_file(tmp) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => log::warn!(target: "record", "could not remove {}: {err}", tmp.display()),
        }
    }
}

fn sibling(out: &Path, ext: &str) -> PathBuf {
    let stem = out
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());
    out.with_file_name(format!("{stem}.{ext}"))
}

pub fn ensure_ffmpeg_available() -> Result<()> {
    match Command::new("ffmpeg")
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            bail!("ffmpeg not found in PATH (install ffmpeg and retry)")
        }
        Err(err) => Err(anyhow!("failed to run ffmpeg: {err}")),
    }
}

fn spawn_video_encoder(out_path: &Path, width: usize, height: usize, fps: u32) -> Result<Child> {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-y")
        .arg("-f")
        .arg("rawvideo")
        .arg("-pix_fmt")
        .arg("rgba")
        .arg("-video_size")
        .arg(format!("{width}x{height}"))
        .arg("-framerate")
        .arg(fps.to_string())
        .arg("-i")
        .arg("-")
        .arg("-c:v")
        .arg("libx264")
        .arg("-pix_fmt")
        .arg("yuv420p")
        .arg("-movflags")
        .arg("+faststart")
        .arg(out_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    cmd.spawn()
        .with_context(|| format!("spawn ffmpeg for output {}", out_path.display()))
}

fn mux(video: &Path, audio: &Path, out: &Path) -> Result<()> {
    let status = Command::new("ffmpeg")
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-y")
        .arg("-i")
        .arg(video)
        .arg("-i")
        .arg(audio)
        .arg("-map")
        .arg("0:v:0")
        .arg("-map")
        .arg("1:a:0")
        .arg("-c:v")
        .arg("copy")
        .arg("-c:a")
        .arg("aac")
        .arg("-shortest")
        .arg(out)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("run ffmpeg mux")?;
    if !status.success() {
        bail!("ffmpeg mux exited with status {status}");
    }
    Ok(())
}

/// 16-bit PCM mono WAV written incrementally; sizes are patched on finish.
pub struct WavWriter {
    w: BufWriter<fs::File>,
    samples: u64,
}

impl WavWriter {
    pub fn create(path: &Path, sr: u32) -> io::Result<Self> {
        let mut w = BufWriter::new(fs::File::create(path)?);

        let channels: u16 = 1;
        let bits_per_sample: u16 = 16;
        let byte_rate = sr * channels as u32 * bits_per_sample as u32 / 8;
        let block_align = channels * bits_per_sample / 8;

        w.write_all(b"RIFF")?;
        w.write_all(&0u32.to_le_bytes())?;
        w.write_all(b"WAVE")?;

        w.write_all(b"fmt ")?;
        w.write_all(&16u32.to_le_bytes())?;
        w.write_all(&1u16.to_le_bytes())?; // PCM
        w.write_all(&channels.to_le_bytes())?;
        w.write_all(&sr.to_le_bytes())?;
        w.write_all(&byte_rate.to_le_bytes())?;
        w.write_all(&block_align.to_le_bytes())?;
        w.write_all(&bits_per_sample.to_le_bytes())?;

        w.write_all(b"data")?;
        w.write_all(&0u32.to_le_bytes())?;
        Ok(Self { w, samples: 0 })
    }

    pub fn write(&mut self, samples: &[f32]) -> io::Result<()> {
        for s in samples {
            self.w.write_all(&to_i16(*s).to_le_bytes())?;
        }
        self.samples += samples.len() as u64;
        Ok(())
    }

    /// Returns the number of samples written.
    pub fn finish(mut self) -> io::Result<u64> {
        let data_bytes = u32::try_from(self.samples * 2)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "wav data exceeds 4 GiB"))?;
        self.w.flush()?;
        let f = self.w.get_mut();
        f.seek(SeekFrom::Start(4))?;
        f.write_all(&(36 + data_bytes).to_le_bytes())?;
        f.seek(SeekFrom::Start(40))?;
        f.write_all(&data_bytes.to_le_bytes())?;
        f.flush()?;
        Ok(self.samples)
    }
}

fn to_i16(x: f32) -> i16 {
    let y = x.clamp(-1.0, 1.0);
    (y * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("twinklebrot-record-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn wav_header_sizes_are_patched() {
        let path = temp_path("t.wav");
        let mut w = WavWriter::create(&path, 8000).unwrap();
        w.write(&[0.0, 1.0, -1.0]).unwrap();
        w.write(&[0.5]).unwrap();
        assert_eq!(w.finish().unwrap(), 4);

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 44 + 8);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 44);
        assert_eq!(u32::from_le_bytes(bytes[24..28].try_into().unwrap()), 8000);
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 8);
        assert_eq!(i16::from_le_bytes([bytes[46], bytes[47]]), i16::MAX);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn samples_are_clamped() {
        assert_eq!(to_i16(3.0), i16::MAX);
        assert_eq!(to_i16(-3.0), -i16::MAX);
    }

    #[test]
    fn temporaries_sit_next_to_output() {
        let out = Path::new("/tmp/clips/take.mp4");
        assert_eq!(sibling(out, "wav"), PathBuf::from("/tmp/clips/take.wav"));
        assert_eq!(sibling(out, "video.mp4"), PathBuf::from("/tmp/clips/take.video.mp4"));
    }

    #[test]
    fn removing_temporaries_tolerates_missing_files() {
        let present = temp_path("left.wav");
        fs::write(&present, b"x").unwrap();
        let missing = temp_path("never-written.video.mp4");
        remove_temporaries(&[present.as_path(), missing.as_path()]);
        assert!(!present.exists());
    }

    #[cfg(unix)]
    #[test]
    fn failed_encode_cleans_up_temporaries() {
        let out = temp_path("failed.mp4");
        let video_tmp = sibling(&out, "video.mp4");
        let wav_path = sibling(&out, "wav");
        fs::write(&video_tmp, b"partial").unwrap();
        let writer = WavWriter::create(&wav_path, 8000).unwrap();

        let mut ffmpeg = Command::new("sh")
            .arg("-c")
            .arg("cat > /dev/null; exit 3")
            .stdin(Stdio::piped())
            .spawn()
            .unwrap();
        let stdin = ffmpeg.stdin.take();
        let rec = Recorder {
            opts: RecordOptions {
                out: out.clone(),
                width: 2,
                height: 2,
                fps: 30,
                sample_rate_hz: Some(8000),
            },
            video_tmp: video_tmp.clone(),
            ffmpeg,
            stdin,
            wav: Some((wav_path.clone(), writer)),
            frames: 0,
            frame_bytes: 16,
        };
        assert_eq!(rec.frames(), 0);

        let err = rec.finish().unwrap_err();
        assert!(err.to_string().contains("status"), "{err:#}");
        assert!(!video_tmp.exists());
        assert!(!wav_path.exists());
        assert!(!out.exists());
    }

    #[cfg(unix)]
    #[test]
    fn frames_are_counted_and_size_checked() {
        let mut ffmpeg = Command::new("sh")
            .arg("-c")
            .arg("cat > /dev/null")
            .stdin(Stdio::piped())
            .spawn()
            .unwrap();
        let stdin = ffmpeg.stdin.take();
        let out = temp_path("counted.mp4");
        let mut rec = Recorder {
            opts: RecordOptions {
                out: out.clone(),
                width: 2,
                height: 2,
                fps: 30,
                sample_rate_hz: None,
            },
            video_tmp: out,
            ffmpeg,
            stdin,
            wav: None,
            frames: 0,
            frame_bytes: 16,
        };
        rec.push_frame(&Raster::new(2, 2)).unwrap();
        rec.capture(&Raster::new(2, 2), 2).unwrap();
        assert!(rec.push_frame(&Raster::new(3, 2)).is_err());
        assert_eq!(rec.frames(), 2);
        let summary = rec.finish().unwrap();
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.audio_samples, 0);
    }

    #[test]
    fn file_name_is_timestamped_mp4() {
        let p = recording_file_name(Path::new("out"));
        let name = p.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("twinklebrot-") && name.ends_with(".mp4"));
    }
}
