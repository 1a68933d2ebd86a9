//! Realtime capture sinks.
//!
//! In MIDI-input mode the audio hardware stays engaged and each render
//! callback hands its interleaved int16 block to the active recorder: WAV
//! streams straight to disk, FLAC and Vorbis accumulate and encode when
//! finalized, MP3 streams through the LAME encoder. The callback reaches the
//! recorder through [`RecorderSlot`], whose lock is held only for the block
//! copy; the UI takes the recorder out of the slot before finalizing, so no
//! lock is ever held across encoder teardown.
//!
//! [`MidiCapture`] records the incoming MIDI performance itself as a
//! format-0 SMF with a fixed 120 BPM tempo map.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use hound::{SampleFormat, WavSpec, WavWriter};
use log::warn;
use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};

use crate::dtype::SfError;

/// Ticks per quarter note in recorded MIDI files.
pub const MIDI_RECORD_DIVISION: u16 = 1000;
/// Tempo meta written at delta 0. Recording always stamps 120 BPM and does
/// not chase incoming Set Tempo messages; deltas are wall-clock derived.
pub const MIDI_RECORD_TEMPO: u32 = 500_000;

fn encoder_err<E: std::fmt::Debug>(what: &str) -> impl FnOnce(E) -> SfError + '_ {
    move |e| SfError::Encoder(format!("{}: {:?}", what, e))
}

/// One active PCM capture. Constructed on record start, fed from the audio
/// callback, consumed by `finalize`.
pub enum PcmRecorder {
    Wav {
        writer: WavWriter<BufWriter<File>>,
    },
    Flac {
        path: PathBuf,
        channels: u16,
        sample_rate: u32,
        frames: Vec<i32>,
    },
    Vorbis {
        path: PathBuf,
        channels: u16,
        sample_rate: u32,
        bitrate_bps: u32,
        frames: Vec<i16>,
    },
    Mp3 {
        encoder: mp3lame_encoder::Encoder,
        out: BufWriter<File>,
        channels: u16,
    },
}

impl PcmRecorder {
    pub fn start_wav(
        path: &Path,
        channels: u16,
        sample_rate: u32,
        bits: u16,
    ) -> Result<PcmRecorder, SfError> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: bits,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec).map_err(encoder_err("wav create"))?;
        Ok(PcmRecorder::Wav { writer })
    }

    pub fn start_flac(path: &Path, channels: u16, sample_rate: u32) -> Result<PcmRecorder, SfError> {
        Ok(PcmRecorder::Flac {
            path: path.to_path_buf(),
            channels,
            sample_rate,
            frames: Vec::new(),
        })
    }

    pub fn start_vorbis(
        path: &Path,
        channels: u16,
        sample_rate: u32,
        bitrate_bps: u32,
    ) -> Result<PcmRecorder, SfError> {
        Ok(PcmRecorder::Vorbis {
            path: path.to_path_buf(),
            channels,
            sample_rate,
            bitrate_bps,
            frames: Vec::new(),
        })
    }

    pub fn start_mp3(
        path: &Path,
        channels: u16,
        sample_rate: u32,
        bitrate_bps: u32,
    ) -> Result<PcmRecorder, SfError> {
        use mp3lame_encoder::{Bitrate, Builder, Quality};
        let brate = match bitrate_bps {
            128_000 => Bitrate::Kbps128,
            192_000 => Bitrate::Kbps192,
            256_000 => Bitrate::Kbps256,
            320_000 => Bitrate::Kbps320,
            other => {
                return Err(SfError::Param(format!(
                    "unsupported MP3 bitrate {} bps",
                    other
                )))
            }
        };
        let mut builder =
            Builder::new().ok_or_else(|| SfError::Encoder("lame init failed".into()))?;
        builder
            .set_num_channels(channels as u8)
            .map_err(encoder_err("lame channels"))?;
        builder
            .set_sample_rate(sample_rate)
            .map_err(encoder_err("lame sample rate"))?;
        builder.set_brate(brate).map_err(encoder_err("lame bitrate"))?;
        builder
            .set_quality(Quality::Good)
            .map_err(encoder_err("lame quality"))?;
        let encoder = builder.build().map_err(encoder_err("lame build"))?;
        let out = BufWriter::new(File::create(path)?);
        Ok(PcmRecorder::Mp3 {
            encoder,
            out,
            channels,
        })
    }

    /// Append one interleaved int16 block. Called from the audio callback.
    pub fn push_frames(&mut self, interleaved: &[i16]) -> Result<(), SfError> {
        match self {
            PcmRecorder::Wav { writer } => {
                for &sample in interleaved {
                    writer.write_sample(sample).map_err(encoder_err("wav write"))?;
                }
                Ok(())
            }
            PcmRecorder::Flac { frames, .. } => {
                frames.extend(interleaved.iter().map(|&s| s as i32));
                Ok(())
            }
            PcmRecorder::Vorbis { frames, .. } => {
                frames.extend_from_slice(interleaved);
                Ok(())
            }
            PcmRecorder::Mp3 {
                encoder,
                out,
                channels,
            } => {
                use mp3lame_encoder::{InterleavedPcm, MonoPcm};
                let mut buf: Vec<u8> =
                    Vec::with_capacity(mp3lame_encoder::max_required_buffer_size(
                        interleaved.len(),
                    ));
                let written = if *channels <= 1 {
                    encoder
                        .encode(MonoPcm(interleaved), buf.spare_capacity_mut())
                        .map_err(encoder_err("mp3 encode"))?
                } else {
                    encoder
                        .encode(InterleavedPcm(interleaved), buf.spare_capacity_mut())
                        .map_err(encoder_err("mp3 encode"))?
                };
                unsafe { buf.set_len(written) };
                out.write_all(&buf)?;
                Ok(())
            }
        }
    }

    /// Close and flush the capture. For the accumulator formats this is
    /// where the actual encoding happens.
    pub fn finalize(self) -> Result<(), SfError> {
        match self {
            PcmRecorder::Wav { writer } => {
                writer.finalize().map_err(encoder_err("wav finalize"))
            }
            PcmRecorder::Flac {
                path,
                channels,
                sample_rate,
                frames,
            } => {
                let frames_per_channel = frames.len() as u64 / channels.max(1) as u64;
                let mut file = File::create(&path)?;
                let mut sink = flac_bound::WriteWrapper(&mut file);
                let mut encoder = flac_bound::FlacEncoder::new()
                    .ok_or_else(|| SfError::Encoder("flac init failed".into()))?
                    .channels(channels as u32)
                    .bits_per_sample(16)
                    .sample_rate(sample_rate)
                    .compression_level(5)
                    .verify(true)
                    .total_samples_estimate(frames_per_channel)
                    .init_write(&mut sink)
                    .map_err(|_| SfError::Encoder("flac encoder init failed".into()))?;
                encoder
                    .process_interleaved(&frames, frames_per_channel as u32)
                    .map_err(|_| SfError::Encoder("flac encode failed".into()))?;
                encoder
                    .finish()
                    .map_err(|_| SfError::Encoder("flac finish failed".into()))?;
                Ok(())
            }
            PcmRecorder::Vorbis {
                path,
                channels,
                sample_rate,
                bitrate_bps,
                frames,
            } => {
                use std::num::{NonZeroU32, NonZeroU8};
                use vorbis_rs::{VorbisBitrateManagementStrategy, VorbisEncoderBuilder};

                let file = File::create(&path)?;
                let rate = NonZeroU32::new(sample_rate)
                    .ok_or_else(|| SfError::Param("zero sample rate".into()))?;
                let chans = NonZeroU8::new(channels.min(255) as u8)
                    .ok_or_else(|| SfError::Param("zero channels".into()))?;
                let bitrate = NonZeroU32::new(bitrate_bps)
                    .ok_or_else(|| SfError::Param("zero bitrate".into()))?;
                let mut builder = VorbisEncoderBuilder::new(rate, chans, file)
                    .map_err(|e| SfError::Encoder(format!("vorbis init: {}", e)))?;
                builder.bitrate_management_strategy(VorbisBitrateManagementStrategy::Vbr {
                    target_bitrate: bitrate,
                });
                let mut encoder = builder
                    .build()
                    .map_err(|e| SfError::Encoder(format!("vorbis build: {}", e)))?;

                // De-interleave into planar float blocks.
                let ch = channels.max(1) as usize;
                let frames_per_channel = frames.len() / ch;
                let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(frames_per_channel); ch];
                for frame in frames.chunks_exact(ch) {
                    for (c, &sample) in frame.iter().enumerate() {
                        planar[c].push(sample as f32 / 32768.0);
                    }
                }
                encoder
                    .encode_audio_block(&planar)
                    .map_err(|e| SfError::Encoder(format!("vorbis encode: {}", e)))?;
                encoder
                    .finish()
                    .map_err(|e| SfError::Encoder(format!("vorbis finish: {}", e)))?;
                Ok(())
            }
            PcmRecorder::Mp3 {
                mut encoder,
                mut out,
                ..
            } => {
                use mp3lame_encoder::FlushNoGap;
                let mut buf: Vec<u8> = Vec::with_capacity(7200);
                let written = encoder
                    .flush::<FlushNoGap>(buf.spare_capacity_mut())
                    .map_err(encoder_err("mp3 flush"))?;
                unsafe { buf.set_len(written) };
                out.write_all(&buf)?;
                out.flush()?;
                Ok(())
            }
        }
    }
}

/// Shared slot between the UI and the audio callback. The callback locks
/// only long enough to push one block; the UI installs a recorder to begin
/// capture and takes it back out before finalizing, so the encoder teardown
/// never runs under the lock.
pub struct RecorderSlot {
    inner: Mutex<Option<PcmRecorder>>,
}

impl Default for RecorderSlot {
    fn default() -> Self {
        RecorderSlot::new()
    }
}

impl RecorderSlot {
    pub const fn new() -> RecorderSlot {
        RecorderSlot {
            inner: Mutex::new(None),
        }
    }

    pub fn install(&self, recorder: PcmRecorder) {
        *self.inner.lock().unwrap() = Some(recorder);
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    /// Audio-callback entry point. A recorder that fails to accept a block
    /// is dropped so the callback cannot wedge on a dead file.
    pub fn capture_block(&self, interleaved: &[i16]) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(recorder) = guard.as_mut() {
            if let Err(e) = recorder.push_frames(interleaved) {
                warn!("pcm capture failed, dropping recorder: {}", e);
                *guard = None;
            }
        }
    }

    pub fn take(&self) -> Option<PcmRecorder> {
        self.inner.lock().unwrap().take()
    }
}

const CAPTURE_RECORD_BYTES: usize = 7;

/// Incoming-MIDI recorder. Events stream to a temp file as fixed-size
/// records (delta ticks plus the raw channel message); `finalize` assembles
/// the format-0 SMF. The caller wraps this in a mutex shared between the
/// MIDI service thread (record) and the UI thread (finalize).
pub struct MidiCapture {
    temp: BufWriter<File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    started: Instant,
    last_ticks: u64,
}

impl MidiCapture {
    /// Begin capturing. `initial_programs` carries each channel's
    /// (bank MSB, program) so playback starts from the engine's state.
    pub fn start(
        final_path: &Path,
        temp_path: &Path,
        initial_programs: &[(u8, u8); 16],
    ) -> Result<MidiCapture, SfError> {
        let mut capture = MidiCapture {
            temp: BufWriter::new(File::create(temp_path)?),
            temp_path: temp_path.to_path_buf(),
            final_path: final_path.to_path_buf(),
            started: Instant::now(),
            last_ticks: 0,
        };
        for (channel, &(bank, program)) in initial_programs.iter().enumerate() {
            let ch = channel as u8;
            capture.write_record(0, 0xB0 | ch, 0, bank & 0x7F)?;
            capture.write_record(0, 0xC0 | ch, program & 0x7F, 0)?;
        }
        Ok(capture)
    }

    fn write_record(&mut self, delta: u32, status: u8, data1: u8, data2: u8) -> Result<(), SfError> {
        self.temp.write_u32::<LittleEndian>(delta)?;
        self.temp.write_u8(status)?;
        self.temp.write_u8(data1)?;
        self.temp.write_u8(data2)?;
        Ok(())
    }

    fn elapsed_ticks(&self) -> u64 {
        let usec = self.started.elapsed().as_micros() as u64;
        usec * MIDI_RECORD_DIVISION as u64 / MIDI_RECORD_TEMPO as u64
    }

    /// Append one channel message with a delta derived from the monotonic
    /// clock.
    pub fn record(&mut self, status: u8, data1: u8, data2: u8) -> Result<(), SfError> {
        let now = self.elapsed_ticks();
        let delta = (now - self.last_ticks) as u32;
        self.last_ticks = now;
        self.write_record(delta, status, data1, data2)
    }

    /// Close the capture: tempo meta, the recorded events, All Notes Off on
    /// every channel, End of Track.
    pub fn finalize(mut self) -> Result<(), SfError> {
        self.temp.flush()?;
        drop(self.temp);

        let mut raw = Vec::new();
        File::open(&self.temp_path)?.read_to_end(&mut raw)?;

        let mut track: Vec<TrackEvent> = Vec::with_capacity(raw.len() / CAPTURE_RECORD_BYTES + 20);
        let tempo = u24::try_from(MIDI_RECORD_TEMPO)
            .ok_or_else(|| SfError::Param("tempo out of range".into()))?;
        let zero_delta =
            u28::try_from(0).ok_or_else(|| SfError::Param("delta out of range".into()))?;
        let zero_value = u7::try_from(0).ok_or_else(|| SfError::Param("bad data byte".into()))?;
        track.push(TrackEvent {
            delta: zero_delta,
            kind: TrackEventKind::Meta(MetaMessage::Tempo(tempo)),
        });

        let mut cursor = std::io::Cursor::new(raw);
        while let Ok(delta) = cursor.read_u32::<LittleEndian>() {
            let status = cursor.read_u8()?;
            let data1 = cursor.read_u8()?;
            let data2 = cursor.read_u8()?;
            let channel = u4::try_from(status & 0x0F)
                .ok_or_else(|| SfError::Param("bad channel".into()))?;
            let d1 = u7::try_from(data1 & 0x7F)
                .ok_or_else(|| SfError::Param("bad data byte".into()))?;
            let d2 = u7::try_from(data2 & 0x7F)
                .ok_or_else(|| SfError::Param("bad data byte".into()))?;
            let message = match status & 0xF0 {
                0x80 => MidiMessage::NoteOff { key: d1, vel: d2 },
                0x90 => MidiMessage::NoteOn { key: d1, vel: d2 },
                0xA0 => MidiMessage::Aftertouch { key: d1, vel: d2 },
                0xB0 => MidiMessage::Controller {
                    controller: d1,
                    value: d2,
                },
                0xC0 => MidiMessage::ProgramChange { program: d1 },
                0xD0 => MidiMessage::ChannelAftertouch { vel: d1 },
                0xE0 => MidiMessage::PitchBend {
                    bend: midly::PitchBend(
                        midly::num::u14::try_from(
                            ((data2 as u16 & 0x7F) << 7) | (data1 as u16 & 0x7F),
                        )
                        .ok_or_else(|| SfError::Param("bad pitch bend".into()))?,
                    ),
                },
                _ => continue,
            };
            track.push(TrackEvent {
                delta: u28::try_from(delta)
                    .ok_or_else(|| SfError::Param("delta out of range".into()))?,
                kind: TrackEventKind::Midi { channel, message },
            });
        }

        // Close every channel so nothing rings on playback.
        for channel in 0..16u8 {
            track.push(TrackEvent {
                delta: zero_delta,
                kind: TrackEventKind::Midi {
                    channel: u4::try_from(channel)
                        .ok_or_else(|| SfError::Param("bad channel".into()))?,
                    message: MidiMessage::Controller {
                        controller: u7::try_from(123)
                            .ok_or_else(|| SfError::Param("bad controller".into()))?,
                        value: zero_value,
                    },
                },
            });
        }
        track.push(TrackEvent {
            delta: zero_delta,
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });

        let smf = Smf {
            header: Header::new(
                Format::SingleTrack,
                Timing::Metrical(
                    u15::try_from(MIDI_RECORD_DIVISION)
                        .ok_or_else(|| SfError::Param("division out of range".into()))?,
                ),
            ),
            tracks: vec![track],
        };
        smf.save(&self.final_path)
            .map_err(|e| SfError::Encoder(format!("midi save: {}", e)))?;
        let _ = std::fs::remove_file(&self.temp_path);
        Ok(())
    }
}
