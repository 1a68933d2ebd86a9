//! Engine-facing data model and host interfaces.
//!
//! The GM tone generator itself lives host-side behind the [`Mixer`] and
//! [`Song`] traits; this module defines the records the SF2 compiler emits
//! for it (envelopes, LFOs, modulation curves, waveforms, instruments) and
//! the enumerations shared with the host.

use std::path::Path;

use serde::Serialize;
use strum::{Display, EnumIter};

use crate::dtype::{Fixed, SfError, FIXED_1};

/// Envelope stage slots per ADSR record.
pub const ADSR_STAGES: usize = 8;
/// LFO records per instrument.
pub const MAX_LFOS: usize = 6;
/// Modulation curve records per instrument.
pub const MAX_CURVES: usize = 8;
/// Points per modulation curve.
pub const MAX_CURVE_POINTS: usize = 4;
/// Zones per keymap-split instrument.
pub const MAX_ZONES: usize = 128;

/// Duration of one render slice in microseconds. Ramping envelope stages are
/// floored to this so a ramp always spans at least one slice.
pub const SLICE_TIME_USEC: u32 = 11_610;

/// Centibel level treated as silence in SF2-domain envelopes.
pub const SILENCE_CB: i32 = 14_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum StageFlag {
    #[default]
    Terminate,
    ExponentialRamp,
    Sustain,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EnvelopeStage {
    /// Centibels for SF2 volume envelopes, tenths of a percent for
    /// modulation envelopes, 16.16 linear for LFO delay ramps.
    pub level: i32,
    pub time_usec: u32,
    pub flag: StageFlag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    pub stages: [EnvelopeStage; ADSR_STAGES],
    /// True when stage levels use SF2 semantics (centibels for the volume
    /// envelope, tenths of a percent for the modulation envelope) rather
    /// than 16.16 linear; the host runtime switches its level math on this.
    pub sf2_levels: bool,
    pub sustaining_decay_level: Fixed,
}

impl Default for Envelope {
    fn default() -> Self {
        Envelope {
            stages: [EnvelopeStage::default(); ADSR_STAGES],
            sf2_levels: false,
            sustaining_decay_level: FIXED_1,
        }
    }
}

impl Envelope {
    /// Stages before the first terminator.
    pub fn active_stages(&self) -> usize {
        self.stages
            .iter()
            .position(|s| s.flag == StageFlag::Terminate)
            .unwrap_or(ADSR_STAGES)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LfoTarget {
    Pitch,
    Volume,
    FilterCutoff,
    StereoPan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum WaveShape {
    #[default]
    Sine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LfoRecord {
    pub period_usec: u32,
    /// Depth in engine units (SF2 cents x4 for pitch/filter, centibels x16
    /// for volume).
    pub level: i32,
    pub target: LfoTarget,
    pub shape: WaveShape,
    /// Scalar ramp from 0 to full after the SF2 delay, or flat full when the
    /// delay generator is the default sentinel.
    pub delay_ramp: Envelope,
}

/// Where a modulation curve reads its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CurveSource {
    NoteVelocity,
    NoteKey,
    Pressure,
    ModWheel,
    VolumeCc,
    PanCc,
    ExpressionCc,
}

/// What a modulation curve drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CurveTarget {
    PitchLfo,
    VolumeLfo,
    VolumeAttack,
    FilterCutoff,
    StereoPanLfo,
}

/// Piecewise-linear modulation routing, up to [`MAX_CURVE_POINTS`] points of
/// (controller value, scalar) pairs. Scalar 256 is unity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CurveRecord {
    pub source: CurveSource,
    pub target: CurveTarget,
    pub count: u8,
    pub from_value: [u8; MAX_CURVE_POINTS],
    pub to_scalar: [i16; MAX_CURVE_POINTS],
}

impl CurveRecord {
    pub fn new(source: CurveSource, target: CurveTarget, points: &[(u8, i16)]) -> CurveRecord {
        let mut record = CurveRecord {
            source,
            target,
            count: points.len().min(MAX_CURVE_POINTS) as u8,
            from_value: [0; MAX_CURVE_POINTS],
            to_scalar: [0; MAX_CURVE_POINTS],
        };
        for (i, &(from, to)) in points.iter().take(MAX_CURVE_POINTS).enumerate() {
            record.from_value[i] = from;
            record.to_scalar[i] = to;
        }
        record
    }
}

/// One rendered sample buffer: mono 16-bit frames plus loop/tuning metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Waveform {
    #[serde(skip_serializing)]
    pub data: Vec<i16>,
    pub frames: u32,
    pub start_loop: u32,
    pub end_loop: u32,
    pub base_midi_pitch: i16,
    /// 16.16 fixed Hz.
    pub sampled_rate: Fixed,
    pub channels: u8,
    pub bits: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeymapSplit {
    pub low_key: u8,
    pub high_key: u8,
    /// Packed `(high_vel << 8) | low_vel`.
    pub vel_range: u16,
    pub attenuation: i16,
    pub instrument: Box<Instrument>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum InstrumentKind {
    Simple(Waveform),
    KeymapSplit {
        default_split: u16,
        splits: Vec<KeymapSplit>,
    },
}

/// A compiled instrument, ready for the host voice allocator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instrument {
    pub not_polyphonic: bool,
    pub use_sample_rate: bool,
    pub play_at_sampled_freq: bool,
    pub sample_and_hold: bool,
    pub disable_looping: bool,
    pub avoid_reverb: bool,
    pub pan_placement: i16,
    pub master_root_key: i16,
    pub volume_envelope: Envelope,
    pub mod_envelope: Envelope,
    /// Engine cents (SF2 cents x4).
    pub mod_env_to_pitch: i32,
    pub mod_env_to_filter: i32,
    pub lfos: Vec<LfoRecord>,
    pub curves: Vec<CurveRecord>,
    pub kind: InstrumentKind,
}

impl Instrument {
    pub fn is_keymap_split(&self) -> bool {
        matches!(self.kind, InstrumentKind::KeymapSplit { .. })
    }

    pub fn waveform(&self) -> Option<&Waveform> {
        match &self.kind {
            InstrumentKind::Simple(w) => Some(w),
            InstrumentKind::KeymapSplit { .. } => None,
        }
    }
}

/// Output container for file export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Wav,
    Flac,
    Mpeg,
    Vorbis,
}

/// Compression selection for file export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lossless,
    Mpeg128,
    Mpeg192,
    Mpeg256,
    Mpeg320,
    Vorbis96,
    Vorbis128,
    Vorbis256,
    Vorbis320,
}

impl Compression {
    /// Bitrate in bits per second for the lossy modes.
    pub fn bitrate_bps(&self) -> Option<u32> {
        match self {
            Compression::Mpeg128 | Compression::Vorbis128 => Some(128_000),
            Compression::Mpeg192 => Some(192_000),
            Compression::Mpeg256 | Compression::Vorbis256 => Some(256_000),
            Compression::Mpeg320 | Compression::Vorbis320 => Some(320_000),
            Compression::Vorbis96 => Some(96_000),
            Compression::None | Compression::Lossless => None,
        }
    }
}

/// Reverb room selection forwarded to the host engine. Index 0 is the
/// hidden "no change" pseudo-entry; the user-facing list starts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
#[repr(i32)]
pub enum ReverbType {
    #[strum(serialize = "No Change")]
    NoChange = 0,
    #[strum(serialize = "None")]
    NoReverb = 1,
    Closet = 2,
    Garage = 3,
    #[strum(serialize = "Acoustic Lab")]
    AcousticLab = 4,
    Cavern = 5,
    Dungeon = 6,
    #[strum(serialize = "Small Reflections")]
    SmallReflections = 7,
    #[strum(serialize = "Early Reflections")]
    EarlyReflections = 8,
    Basement = 9,
    Banquet = 10,
    Catacombs = 11,
}

impl ReverbType {
    pub fn from_index(index: i32) -> Option<ReverbType> {
        use ReverbType::*;
        Some(match index {
            0 => NoChange,
            1 => NoReverb,
            2 => Closet,
            3 => Garage,
            4 => AcousticLab,
            5 => Cavern,
            6 => Dungeon,
            7 => SmallReflections,
            8 => EarlyReflections,
            9 => Basement,
            10 => Banquet,
            11 => Catacombs,
            _ => return None,
        })
    }

    pub fn index(&self) -> i32 {
        *self as i32
    }
}

/// Host mixer surface used by this crate: non-realtime file output driving,
/// hardware re-engagement after export, and the handful of global controls
/// the player sets. Exactly one production implementation exists host-side.
pub trait Mixer: Send + Sync {
    fn start_output_to_file(
        &self,
        path: &Path,
        file_type: FileType,
        compression: Compression,
    ) -> Result<(), SfError>;
    fn service_audio_output_to_file(&self) -> Result<(), SfError>;
    fn stop_output_to_file(&self);
    fn reengage_audio(&self) -> Result<(), SfError>;
    fn idle(&self);
    fn set_default_reverb(&self, reverb: ReverbType);
    fn set_master_volume(&self, volume: Fixed);
    /// Monotonic count of device samples consumed; used for encoder-drain
    /// stabilization and stall detection.
    fn device_samples_played(&self) -> u32;
}

/// Host song surface: transport, position, and channel-level event
/// injection for the MIDI-input path.
pub trait Song: Send + Sync {
    fn microsecond_length(&self) -> u32;
    fn microsecond_position(&self) -> u32;
    fn set_microsecond_position(&self, usec: u32);
    fn is_done(&self) -> bool;
    fn is_paused(&self) -> bool;
    fn preroll(&self);
    fn start(&self, delay: u32) -> Result<(), SfError>;
    fn stop(&self, async_stop: bool);
    fn pause(&self);
    fn resume(&self);
    fn set_loops(&self, count: i16);
    fn set_volume(&self, volume: Fixed);
    fn set_master_tempo(&self, tempo: Fixed);
    fn set_transpose(&self, semitones: i32);
    fn mute_channel(&self, channel: u8);
    fn unmute_channel(&self, channel: u8);
    fn note_on(&self, channel: u8, note: u8, velocity: u8);
    fn note_off(&self, channel: u8, note: u8, velocity: u8);
    fn key_pressure(&self, channel: u8, note: u8, pressure: u8);
    fn control_change(&self, channel: u8, controller: u8, value: u8);
    fn program_change(&self, channel: u8, program: u8);
    fn program_bank_change(&self, channel: u8, program: u8, bank: u8);
    fn channel_pressure(&self, channel: u8, pressure: u8);
    fn pitch_bend(&self, channel: u8, lsb: u8, msb: u8);
    fn all_notes_off(&self);
    fn channel_program(&self, channel: u8) -> u8;
    fn channel_bank(&self, channel: u8) -> u8;
}

/// GM melodic program names, for tool listings.
pub static GM_PROGRAM_NAMES: phf::Map<u8, &'static str> = phf::phf_map! {
    0u8 => "Acoustic Grand Piano", 1u8 => "Bright Acoustic Piano",
    2u8 => "Electric Grand Piano", 3u8 => "Honky-tonk Piano",
    4u8 => "Electric Piano 1", 5u8 => "Electric Piano 2",
    6u8 => "Harpsichord", 7u8 => "Clavinet",
    8u8 => "Celesta", 9u8 => "Glockenspiel",
    10u8 => "Music Box", 11u8 => "Vibraphone",
    12u8 => "Marimba", 13u8 => "Xylophone",
    14u8 => "Tubular Bells", 15u8 => "Dulcimer",
    16u8 => "Drawbar Organ", 17u8 => "Percussive Organ",
    18u8 => "Rock Organ", 19u8 => "Church Organ",
    20u8 => "Reed Organ", 21u8 => "Accordion",
    22u8 => "Harmonica", 23u8 => "Tango Accordion",
    24u8 => "Acoustic Guitar (nylon)", 25u8 => "Acoustic Guitar (steel)",
    26u8 => "Electric Guitar (jazz)", 27u8 => "Electric Guitar (clean)",
    28u8 => "Electric Guitar (muted)", 29u8 => "Overdriven Guitar",
    30u8 => "Distortion Guitar", 31u8 => "Guitar Harmonics",
    32u8 => "Acoustic Bass", 33u8 => "Electric Bass (finger)",
    34u8 => "Electric Bass (pick)", 35u8 => "Fretless Bass",
    36u8 => "Slap Bass 1", 37u8 => "Slap Bass 2",
    38u8 => "Synth Bass 1", 39u8 => "Synth Bass 2",
    40u8 => "Violin", 41u8 => "Viola",
    42u8 => "Cello", 43u8 => "Contrabass",
    44u8 => "Tremolo Strings", 45u8 => "Pizzicato Strings",
    46u8 => "Orchestral Harp", 47u8 => "Timpani",
    48u8 => "String Ensemble 1", 49u8 => "String Ensemble 2",
    50u8 => "Synth Strings 1", 51u8 => "Synth Strings 2",
    52u8 => "Choir Aahs", 53u8 => "Voice Oohs",
    54u8 => "Synth Voice", 55u8 => "Orchestra Hit",
    56u8 => "Trumpet", 57u8 => "Trombone",
    58u8 => "Tuba", 59u8 => "Muted Trumpet",
    60u8 => "French Horn", 61u8 => "Brass Section",
    62u8 => "Synth Brass 1", 63u8 => "Synth Brass 2",
    64u8 => "Soprano Sax", 65u8 => "Alto Sax",
    66u8 => "Tenor Sax", 67u8 => "Baritone Sax",
    68u8 => "Oboe", 69u8 => "English Horn",
    70u8 => "Bassoon", 71u8 => "Clarinet",
    72u8 => "Piccolo", 73u8 => "Flute",
    74u8 => "Recorder", 75u8 => "Pan Flute",
    76u8 => "Blown Bottle", 77u8 => "Shakuhachi",
    78u8 => "Whistle", 79u8 => "Ocarina",
    80u8 => "Lead 1 (square)", 81u8 => "Lead 2 (sawtooth)",
    82u8 => "Lead 3 (calliope)", 83u8 => "Lead 4 (chiff)",
    84u8 => "Lead 5 (charang)", 85u8 => "Lead 6 (voice)",
    86u8 => "Lead 7 (fifths)", 87u8 => "Lead 8 (bass + lead)",
    88u8 => "Pad 1 (new age)", 89u8 => "Pad 2 (warm)",
    90u8 => "Pad 3 (polysynth)", 91u8 => "Pad 4 (choir)",
    92u8 => "Pad 5 (bowed)", 93u8 => "Pad 6 (metallic)",
    94u8 => "Pad 7 (halo)", 95u8 => "Pad 8 (sweep)",
    96u8 => "FX 1 (rain)", 97u8 => "FX 2 (soundtrack)",
    98u8 => "FX 3 (crystal)", 99u8 => "FX 4 (atmosphere)",
    100u8 => "FX 5 (brightness)", 101u8 => "FX 6 (goblins)",
    102u8 => "FX 7 (echoes)", 103u8 => "FX 8 (sci-fi)",
    104u8 => "Sitar", 105u8 => "Banjo",
    106u8 => "Shamisen", 107u8 => "Koto",
    108u8 => "Kalimba", 109u8 => "Bag pipe",
    110u8 => "Fiddle", 111u8 => "Shanai",
    112u8 => "Tinkle Bell", 113u8 => "Agogo",
    114u8 => "Steel Drums", 115u8 => "Woodblock",
    116u8 => "Taiko Drum", 117u8 => "Melodic Tom",
    118u8 => "Synth Drum", 119u8 => "Reverse Cymbal",
    120u8 => "Guitar Fret Noise", 121u8 => "Breath Noise",
    122u8 => "Seashore", 123u8 => "Bird Tweet",
    124u8 => "Telephone Ring", 125u8 => "Helicopter",
    126u8 => "Applause", 127u8 => "Gunshot",
};
