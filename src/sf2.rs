use std::io::{Read, Seek, SeekFrom};

use bevy_reflect::Reflect;
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, warn};
use serde::{Serialize, Serializer};

use crate::dtype::{
    fourcc_str, record_name, FourCC, RecordTable, SfError, WireRecord, MAX_CHUNK_ALLOC,
};

pub mod compile;
pub mod resolver;

/// SF2 generator tags. Only the tags the compiler consults are named; unknown
/// tags pass through record storage untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum GenTag {
    StartAddrsOffset = 0,
    EndAddrsOffset = 1,
    StartloopAddrsOffset = 2,
    EndloopAddrsOffset = 3,
    StartAddrsCoarseOffset = 4,
    ModLfoToPitch = 5,
    VibLfoToPitch = 6,
    ModEnvToPitch = 7,
    InitialFilterFc = 8,
    InitialFilterQ = 9,
    ModLfoToFilterFc = 10,
    ModEnvToFilterFc = 11,
    EndAddrsCoarseOffset = 12,
    ModLfoToVolume = 13,
    ChorusEffectsSend = 15,
    ReverbEffectsSend = 16,
    Pan = 17,
    DelayModLfo = 21,
    FreqModLfo = 22,
    DelayVibLfo = 23,
    FreqVibLfo = 24,
    DelayModEnv = 25,
    AttackModEnv = 26,
    HoldModEnv = 27,
    DecayModEnv = 28,
    SustainModEnv = 29,
    ReleaseModEnv = 30,
    KeynumToModEnvHold = 31,
    KeynumToModEnvDecay = 32,
    DelayVolEnv = 33,
    AttackVolEnv = 34,
    HoldVolEnv = 35,
    DecayVolEnv = 36,
    SustainVolEnv = 37,
    ReleaseVolEnv = 38,
    KeynumToVolEnvHold = 39,
    KeynumToVolEnvDecay = 40,
    Instrument = 41,
    KeyRange = 43,
    VelRange = 44,
    StartloopAddrsCoarseOffset = 45,
    Keynum = 46,
    Velocity = 47,
    InitialAttenuation = 48,
    EndloopAddrsCoarseOffset = 50,
    CoarseTune = 51,
    FineTune = 52,
    SampleId = 53,
    SampleModes = 54,
    ScaleTuning = 56,
    ExclusiveClass = 57,
    OverridingRootKey = 58,
}

/// Default sentinel for the packed key/velocity range generators (0..127).
pub const RANGE_DEFAULT: i16 = 0x7F00;

/// Split a packed range amount into (low, high), applying the same lenience
/// the rest of the compiler uses: the sentinel or a zero high byte means the
/// full 0..127 range.
pub fn unpack_range(raw: i16) -> (u8, u8) {
    let lo = (raw as u16 & 0xFF) as u8;
    let hi = ((raw as u16 >> 8) & 0xFF) as u8;
    if raw == RANGE_DEFAULT || hi == 0 {
        (0, 127)
    } else {
        (lo, hi)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub struct SampleType: u16 {
        const MONO = 0x0001;
        const RIGHT = 0x0002;
        const LEFT = 0x0004;
        const LINKED = 0x0008;
        const ROM = 0x8000;
    }
}

fn ser_name<S: Serializer>(raw: &[u8; 20], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&record_name(raw))
}

#[derive(Debug, Clone, Reflect, Serialize)]
pub struct PresetHeader {
    #[serde(rename = "@name")]
    #[serde(serialize_with = "ser_name")]
    pub name: [u8; 20],
    #[serde(rename = "@program")]
    pub preset: u16,
    #[serde(rename = "@bank")]
    pub bank: u16,
    #[serde(rename = "@bag")]
    pub bag_index: u16,
    #[serde(skip_serializing)]
    pub library: u32,
    #[serde(skip_serializing)]
    pub genre: u32,
    #[serde(skip_serializing)]
    pub morphology: u32,
}
impl Default for PresetHeader {
    fn default() -> Self {
        PresetHeader {
            name: [0; 20],
            preset: 0,
            bank: 0,
            bag_index: 0,
            library: 0,
            genre: 0,
            morphology: 0,
        }
    }
}
impl crate::dtype::AutoReadWrite for PresetHeader {}
impl WireRecord for PresetHeader {
    const RECORD_SIZE: usize = 38;
}
impl PresetHeader {
    pub fn name_str(&self) -> String {
        record_name(&self.name)
    }
}

#[derive(Debug, Clone, Default, Reflect, Serialize)]
pub struct Bag {
    #[serde(rename = "@gen")]
    pub gen_index: u16,
    #[serde(rename = "@mod")]
    pub mod_index: u16,
}
impl crate::dtype::AutoReadWrite for Bag {}
impl WireRecord for Bag {
    const RECORD_SIZE: usize = 4;
}

#[derive(Debug, Clone, Default, Reflect, Serialize)]
pub struct Generator {
    #[serde(rename = "@tag")]
    pub tag: u16,
    #[serde(rename = "@amount")]
    pub amount: i16,
}
impl crate::dtype::AutoReadWrite for Generator {}
impl WireRecord for Generator {
    const RECORD_SIZE: usize = 4;
}

#[derive(Debug, Clone, Default, Reflect, Serialize)]
pub struct Modulator {
    #[serde(rename = "@src")]
    pub src_oper: u16,
    #[serde(rename = "@dest")]
    pub dest_oper: u16,
    #[serde(rename = "@amount")]
    pub amount: i16,
    #[serde(rename = "@amtsrc")]
    pub amt_src_oper: u16,
    #[serde(rename = "@transform")]
    pub trans_oper: u16,
}
impl crate::dtype::AutoReadWrite for Modulator {}
impl WireRecord for Modulator {
    const RECORD_SIZE: usize = 10;
}

#[derive(Debug, Clone, Reflect, Serialize)]
pub struct InstrumentHeader {
    #[serde(rename = "@name")]
    #[serde(serialize_with = "ser_name")]
    pub name: [u8; 20],
    #[serde(rename = "@bag")]
    pub bag_index: u16,
}
impl Default for InstrumentHeader {
    fn default() -> Self {
        InstrumentHeader {
            name: [0; 20],
            bag_index: 0,
        }
    }
}
impl crate::dtype::AutoReadWrite for InstrumentHeader {}
impl WireRecord for InstrumentHeader {
    const RECORD_SIZE: usize = 22;
}
impl InstrumentHeader {
    pub fn name_str(&self) -> String {
        record_name(&self.name)
    }
}

#[derive(Debug, Clone, Reflect, Serialize)]
pub struct SampleHeader {
    #[serde(rename = "@name")]
    #[serde(serialize_with = "ser_name")]
    pub name: [u8; 20],
    #[serde(rename = "@start")]
    pub start: u32,
    #[serde(rename = "@end")]
    pub end: u32,
    #[serde(rename = "@startloop")]
    pub start_loop: u32,
    #[serde(rename = "@endloop")]
    pub end_loop: u32,
    #[serde(rename = "@rate")]
    pub sample_rate: u32,
    #[serde(rename = "@origpitch")]
    pub original_pitch: u8,
    #[serde(rename = "@pitchadj")]
    pub pitch_correction: i8,
    #[serde(rename = "@link")]
    pub sample_link: u16,
    #[serde(rename = "@type")]
    pub sample_type: u16,
}
impl Default for SampleHeader {
    fn default() -> Self {
        SampleHeader {
            name: [0; 20],
            start: 0,
            end: 0,
            start_loop: 0,
            end_loop: 0,
            sample_rate: 0,
            original_pitch: 0,
            pitch_correction: 0,
            sample_link: 0,
            sample_type: SampleType::MONO.bits(),
        }
    }
}
impl crate::dtype::AutoReadWrite for SampleHeader {}
impl WireRecord for SampleHeader {
    const RECORD_SIZE: usize = 46;
}
impl SampleHeader {
    pub fn name_str(&self) -> String {
        record_name(&self.name)
    }
    pub fn type_flags(&self) -> SampleType {
        SampleType::from_bits_truncate(self.sample_type)
    }
}

/// RIFF chunk header: FOURCC in file byte order plus a little-endian size.
#[derive(Debug, Clone, Copy)]
pub struct ChunkHeader {
    pub tag: FourCC,
    pub size: u32,
}

/// Read the next 8-byte chunk header. Returns `Ok(None)` on a clean end of
/// stream (no header bytes at all); a partial header is a `BadFile`.
pub fn read_chunk<R: Read>(reader: &mut R) -> Result<Option<ChunkHeader>, SfError> {
    let mut tag: FourCC = [0; 4];
    let mut got = 0;
    while got < 4 {
        let n = reader.read(&mut tag[got..])?;
        if n == 0 {
            if got == 0 {
                return Ok(None);
            }
            return Err(SfError::BadFile("truncated chunk header".into()));
        }
        got += n;
    }
    let size = reader
        .read_u32::<LittleEndian>()
        .map_err(|_| SfError::BadFile("truncated chunk size".into()))?;
    Ok(Some(ChunkHeader { tag, size }))
}

/// Read the 4-byte list type that follows a LIST chunk header.
pub fn read_list_type<R: Read>(reader: &mut R) -> Result<FourCC, SfError> {
    let mut tag: FourCC = [0; 4];
    reader
        .read_exact(&mut tag)
        .map_err(|_| SfError::BadFile("truncated list type".into()))?;
    Ok(tag)
}

pub fn skip<R: Seek>(reader: &mut R, n: u32) -> Result<(), SfError> {
    reader.seek(SeekFrom::Current(n as i64))?;
    Ok(())
}

/// In-memory SF2 bank: the raw 16-bit mono PCM pool plus the nine pdta
/// tables, exactly as stored on disk. Cross-references between tables stay
/// as indices; nothing is resolved at load time. Immutable after load.
#[derive(Debug, Default, Serialize)]
pub struct Bank {
    #[serde(skip_serializing)]
    pub samples: Vec<i16>,
    #[serde(rename = "shdr")]
    pub sample_headers: RecordTable<SampleHeader>,
    #[serde(rename = "phdr")]
    pub presets: RecordTable<PresetHeader>,
    #[serde(rename = "inst")]
    pub instruments: RecordTable<InstrumentHeader>,
    #[serde(rename = "pbag")]
    pub preset_bags: RecordTable<Bag>,
    #[serde(rename = "pmod")]
    pub preset_mods: RecordTable<Modulator>,
    #[serde(rename = "pgen")]
    pub preset_gens: RecordTable<Generator>,
    #[serde(rename = "ibag")]
    pub inst_bags: RecordTable<Bag>,
    #[serde(rename = "imod")]
    pub inst_mods: RecordTable<Modulator>,
    #[serde(rename = "igen")]
    pub inst_gens: RecordTable<Generator>,
}

impl Bank {
    /// Load an SF2 bank from a seekable stream. The outer chunk must be
    /// `RIFF` with list type `sfbk`; unknown chunks and LIST types are
    /// skipped, truncated reads fail with `BadFile`.
    pub fn read_from_file<R: Read + Seek>(reader: &mut R) -> Result<Bank, SfError> {
        let riff = read_chunk(reader)?
            .ok_or_else(|| SfError::BadFile("empty stream".into()))?;
        if &riff.tag != b"RIFF" {
            return Err(SfError::BadFileType(format!(
                "outer chunk is '{}', expected 'RIFF'",
                fourcc_str(&riff.tag)
            )));
        }
        let form = read_list_type(reader)?;
        if &form != b"sfbk" {
            return Err(SfError::BadFileType(format!(
                "RIFF form is '{}', expected 'sfbk'",
                fourcc_str(&form)
            )));
        }

        let mut bank = Bank::default();
        while let Some(chunk) = read_chunk(reader)? {
            match &chunk.tag {
                b"LIST" => {
                    let list_type = read_list_type(reader)?;
                    match &list_type {
                        b"sdta" => bank.read_sdta(reader, chunk.size.saturating_sub(4))?,
                        b"pdta" => bank.read_pdta(reader, chunk.size.saturating_sub(4))?,
                        _ => {
                            debug!("skipping LIST '{}'", fourcc_str(&list_type));
                            skip(reader, chunk.size.saturating_sub(4))?;
                        }
                    }
                }
                _ => {
                    debug!("skipping chunk '{}'", fourcc_str(&chunk.tag));
                    skip(reader, chunk.size)?;
                }
            }
        }

        debug!(
            "bank loaded: {} presets, {} instruments, {} samples, {} pool frames",
            bank.presets.len(),
            bank.instruments.len(),
            bank.sample_headers.len(),
            bank.samples.len()
        );
        Ok(bank)
    }

    fn read_sdta<R: Read + Seek>(&mut self, reader: &mut R, size: u32) -> Result<(), SfError> {
        let list_end = reader.stream_position()? + size as u64;
        while reader.stream_position()? < list_end {
            let sub = match read_chunk(reader)? {
                Some(sub) => sub,
                None => break,
            };
            if &sub.tag == b"smpl" {
                if sub.size as u64 > MAX_CHUNK_ALLOC {
                    return Err(SfError::Memory(sub.size as u64));
                }
                let frames = sub.size as usize / 2;
                let mut pool = vec![0i16; frames];
                reader
                    .read_i16_into::<LittleEndian>(&mut pool)
                    .map_err(|_| SfError::BadFile("truncated smpl payload".into()))?;
                if sub.size % 2 != 0 {
                    skip(reader, 1)?;
                }
                self.samples = pool;
            } else {
                // sm24 and anything else
                debug!("skipping sdta sub-chunk '{}'", fourcc_str(&sub.tag));
                skip(reader, sub.size)?;
            }
        }
        Ok(())
    }

    fn read_pdta<R: Read + Seek>(&mut self, reader: &mut R, size: u32) -> Result<(), SfError> {
        let list_end = reader.stream_position()? + size as u64;
        while reader.stream_position()? < list_end {
            let sub = match read_chunk(reader)? {
                Some(sub) => sub,
                None => break,
            };
            match &sub.tag {
                b"phdr" => self.presets = RecordTable::read_sized(reader, sub.size)?,
                b"pbag" => self.preset_bags = RecordTable::read_sized(reader, sub.size)?,
                b"pmod" => self.preset_mods = RecordTable::read_sized(reader, sub.size)?,
                b"pgen" => self.preset_gens = RecordTable::read_sized(reader, sub.size)?,
                b"inst" => self.instruments = RecordTable::read_sized(reader, sub.size)?,
                b"ibag" => self.inst_bags = RecordTable::read_sized(reader, sub.size)?,
                b"imod" => self.inst_mods = RecordTable::read_sized(reader, sub.size)?,
                b"igen" => self.inst_gens = RecordTable::read_sized(reader, sub.size)?,
                b"shdr" => self.sample_headers = RecordTable::read_sized(reader, sub.size)?,
                _ => {
                    warn!("skipping unknown pdta sub-chunk '{}'", fourcc_str(&sub.tag));
                    skip(reader, sub.size)?;
                }
            }
        }
        Ok(())
    }

    pub fn num_presets(&self) -> usize {
        self.presets.len()
    }
    pub fn num_samples(&self) -> usize {
        self.sample_headers.len()
    }

    /// Exact (bank, program) preset lookup, first match in table order.
    pub fn find_preset(&self, bank_num: u16, program: u16) -> Option<usize> {
        self.presets
            .records
            .iter()
            .position(|p| p.bank == bank_num && p.preset == program)
    }

    /// Bag index range `[start, end)` belonging to a preset.
    pub fn preset_bag_range(&self, preset_index: usize) -> (usize, usize) {
        let start = self.presets.records[preset_index].bag_index as usize;
        let end = if preset_index + 1 < self.presets.len() {
            self.presets.records[preset_index + 1].bag_index as usize
        } else {
            self.preset_bags.len()
        };
        (start.min(self.preset_bags.len()), end.min(self.preset_bags.len()))
    }

    /// Generator index range `[start, end)` of one preset bag.
    pub fn preset_gen_range(&self, bag_index: usize) -> (usize, usize) {
        let start = self.preset_bags.records[bag_index].gen_index as usize;
        let end = if bag_index + 1 < self.preset_bags.len() {
            self.preset_bags.records[bag_index + 1].gen_index as usize
        } else {
            self.preset_gens.len()
        };
        (start.min(self.preset_gens.len()), end.min(self.preset_gens.len()))
    }

    pub fn preset_mod_range(&self, bag_index: usize) -> (usize, usize) {
        let start = self.preset_bags.records[bag_index].mod_index as usize;
        let end = if bag_index + 1 < self.preset_bags.len() {
            self.preset_bags.records[bag_index + 1].mod_index as usize
        } else {
            self.preset_mods.len()
        };
        (start.min(self.preset_mods.len()), end.min(self.preset_mods.len()))
    }

    /// Bag index range `[start, end)` belonging to an instrument.
    pub fn inst_bag_range(&self, inst_index: usize) -> (usize, usize) {
        let start = self.instruments.records[inst_index].bag_index as usize;
        let end = if inst_index + 1 < self.instruments.len() {
            self.instruments.records[inst_index + 1].bag_index as usize
        } else {
            self.inst_bags.len()
        };
        (start.min(self.inst_bags.len()), end.min(self.inst_bags.len()))
    }

    /// Generator index range `[start, end)` of one instrument bag.
    pub fn inst_gen_range(&self, bag_index: usize) -> (usize, usize) {
        let start = self.inst_bags.records[bag_index].gen_index as usize;
        let end = if bag_index + 1 < self.inst_bags.len() {
            self.inst_bags.records[bag_index + 1].gen_index as usize
        } else {
            self.inst_gens.len()
        };
        (start.min(self.inst_gens.len()), end.min(self.inst_gens.len()))
    }

    pub fn inst_mod_range(&self, bag_index: usize) -> (usize, usize) {
        let start = self.inst_bags.records[bag_index].mod_index as usize;
        let end = if bag_index + 1 < self.inst_bags.len() {
            self.inst_bags.records[bag_index + 1].mod_index as usize
        } else {
            self.inst_mods.len()
        };
        (start.min(self.inst_mods.len()), end.min(self.inst_mods.len()))
    }

    /// XML dump of the pdta tables (and optionally per-sample PCM as base64).
    pub fn to_xml(&self, with_samples: bool) -> Result<String, SfError> {
        #[derive(Serialize)]
        #[serde(rename = "sample")]
        struct SampleDump {
            #[serde(rename = "@name")]
            name: String,
            #[serde(rename = "@rate")]
            rate: u32,
            #[serde(with = "base64")]
            pcm: Vec<u8>,
        }
        #[derive(Serialize)]
        #[serde(rename = "bank")]
        struct BankDump<'a> {
            #[serde(flatten)]
            bank: &'a Bank,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            samples: Vec<SampleDump>,
        }

        let mut samples = Vec::new();
        if with_samples {
            for header in self.sample_headers.records.iter() {
                let start = (header.start as usize).min(self.samples.len());
                let end = (header.end as usize).min(self.samples.len()).max(start);
                let mut pcm = Vec::with_capacity((end - start) * 2);
                for frame in &self.samples[start..end] {
                    pcm.extend_from_slice(&frame.to_le_bytes());
                }
                samples.push(SampleDump {
                    name: header.name_str(),
                    rate: header.sample_rate,
                    pcm,
                });
            }
        }
        quick_xml::se::to_string(&BankDump {
            bank: self,
            samples,
        })
        .map_err(|e| SfError::Param(e.to_string()))
    }
}

pub mod base64 {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
        let encoded = general_purpose::STANDARD.encode(v);
        String::serialize(&encoded, s)
    }
}

/// Synthesizes minimal SF2 images in memory for the loader and compiler
/// tests. Only what the tests exercise is supported: mono 16-bit samples and
/// hand-written bag/generator tables.
#[cfg(test)]
pub(crate) mod testbank {
    use super::*;
    use crate::dtype::ReadWrite;
    use byteorder::WriteBytesExt;
    use std::io::{Cursor, Write};

    #[derive(Default)]
    pub struct BankImage {
        pub samples: Vec<i16>,
        pub sample_headers: Vec<SampleHeader>,
        pub presets: Vec<PresetHeader>,
        pub preset_bags: Vec<Bag>,
        pub preset_gens: Vec<Generator>,
        pub preset_mods: Vec<Modulator>,
        pub instruments: Vec<InstrumentHeader>,
        pub inst_bags: Vec<Bag>,
        pub inst_gens: Vec<Generator>,
        pub inst_mods: Vec<Modulator>,
    }

    fn name20(name: &str) -> [u8; 20] {
        let mut raw = [0u8; 20];
        let bytes = name.as_bytes();
        let n = bytes.len().min(19);
        raw[..n].copy_from_slice(&bytes[..n]);
        raw
    }

    impl BankImage {
        pub fn new() -> BankImage {
            BankImage::default()
        }

        /// Append PCM to the pool and a matching header; returns sample id.
        pub fn add_sample(
            &mut self,
            name: &str,
            pcm: &[i16],
            rate: u32,
            original_pitch: u8,
            loop_points: Option<(u32, u32)>,
        ) -> u16 {
            let start = self.samples.len() as u32;
            self.samples.extend_from_slice(pcm);
            let end = self.samples.len() as u32;
            let (start_loop, end_loop) = match loop_points {
                Some((s, e)) => (start + s, start + e),
                None => (0, 0),
            };
            self.sample_headers.push(SampleHeader {
                name: name20(name),
                start,
                end,
                start_loop,
                end_loop,
                sample_rate: rate,
                original_pitch,
                pitch_correction: 0,
                sample_link: 0,
                sample_type: SampleType::MONO.bits(),
            });
            (self.sample_headers.len() - 1) as u16
        }

        /// Start an instrument; zones are added with `inst_zone`.
        pub fn add_instrument(&mut self, name: &str) -> u16 {
            self.instruments.push(InstrumentHeader {
                name: name20(name),
                bag_index: self.inst_bags.len() as u16,
            });
            (self.instruments.len() - 1) as u16
        }

        /// Append one instrument bag holding the given generators, in order.
        pub fn inst_zone(&mut self, gens: &[(GenTag, i16)]) {
            self.inst_bags.push(Bag {
                gen_index: self.inst_gens.len() as u16,
                mod_index: self.inst_mods.len() as u16,
            });
            for &(tag, amount) in gens {
                self.inst_gens.push(Generator {
                    tag: tag as u16,
                    amount,
                });
            }
        }

        pub fn inst_mod(&mut self, m: Modulator) {
            self.inst_mods.push(m);
        }

        pub fn add_preset(&mut self, name: &str, bank: u16, program: u16) {
            self.presets.push(PresetHeader {
                name: name20(name),
                preset: program,
                bank,
                bag_index: self.preset_bags.len() as u16,
                library: 0,
                genre: 0,
                morphology: 0,
            });
        }

        pub fn preset_zone(&mut self, gens: &[(GenTag, i16)]) {
            self.preset_bags.push(Bag {
                gen_index: self.preset_gens.len() as u16,
                mod_index: self.preset_mods.len() as u16,
            });
            for &(tag, amount) in gens {
                self.preset_gens.push(Generator {
                    tag: tag as u16,
                    amount,
                });
            }
        }

        pub fn preset_mod(&mut self, m: Modulator) {
            self.preset_mods.push(m);
        }

        fn write_records<T: ReadWrite>(
            out: &mut Cursor<Vec<u8>>,
            tag: &[u8; 4],
            records: &[T],
            record_size: usize,
        ) {
            out.write_all(tag).unwrap();
            out.write_u32::<LittleEndian>((records.len() * record_size) as u32)
                .unwrap();
            for r in records {
                r.write_to_file(out).unwrap();
            }
        }

        /// Serialize the image as a complete RIFF sfbk byte stream.
        pub fn build(&self) -> Vec<u8> {
            let mut pdta = Cursor::new(Vec::new());
            pdta.write_all(b"pdta").unwrap();
            Self::write_records(&mut pdta, b"phdr", &self.presets, PresetHeader::RECORD_SIZE);
            Self::write_records(&mut pdta, b"pbag", &self.preset_bags, Bag::RECORD_SIZE);
            Self::write_records(&mut pdta, b"pmod", &self.preset_mods, Modulator::RECORD_SIZE);
            Self::write_records(&mut pdta, b"pgen", &self.preset_gens, Generator::RECORD_SIZE);
            Self::write_records(
                &mut pdta,
                b"inst",
                &self.instruments,
                InstrumentHeader::RECORD_SIZE,
            );
            Self::write_records(&mut pdta, b"ibag", &self.inst_bags, Bag::RECORD_SIZE);
            Self::write_records(&mut pdta, b"imod", &self.inst_mods, Modulator::RECORD_SIZE);
            Self::write_records(&mut pdta, b"igen", &self.inst_gens, Generator::RECORD_SIZE);
            Self::write_records(
                &mut pdta,
                b"shdr",
                &self.sample_headers,
                SampleHeader::RECORD_SIZE,
            );
            let pdta = pdta.into_inner();

            let mut sdta = Cursor::new(Vec::new());
            sdta.write_all(b"sdta").unwrap();
            sdta.write_all(b"smpl").unwrap();
            sdta.write_u32::<LittleEndian>((self.samples.len() * 2) as u32)
                .unwrap();
            for s in &self.samples {
                sdta.write_i16::<LittleEndian>(*s).unwrap();
            }
            let sdta = sdta.into_inner();

            let mut out = Cursor::new(Vec::new());
            out.write_all(b"RIFF").unwrap();
            out.write_u32::<LittleEndian>((4 + 8 + sdta.len() + 8 + pdta.len()) as u32)
                .unwrap();
            out.write_all(b"sfbk").unwrap();
            out.write_all(b"LIST").unwrap();
            out.write_u32::<LittleEndian>(sdta.len() as u32).unwrap();
            out.write_all(&sdta).unwrap();
            out.write_all(b"LIST").unwrap();
            out.write_u32::<LittleEndian>(pdta.len() as u32).unwrap();
            out.write_all(&pdta).unwrap();
            out.into_inner()
        }

        pub fn load(&self) -> Bank {
            let bytes = self.build();
            Bank::read_from_file(&mut Cursor::new(bytes)).unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testbank::BankImage;
    use super::*;
    use std::io::Cursor;

    fn sine_second() -> Vec<i16> {
        (0..44100)
            .map(|i| {
                let phase = i as f64 / 44100.0 * 440.0 * std::f64::consts::TAU;
                (phase.sin() * 16000.0) as i16
            })
            .collect()
    }

    fn minimal_image() -> BankImage {
        let mut image = BankImage::new();
        let sample = image.add_sample("sine", &sine_second(), 44100, 69, None);
        let inst = image.add_instrument("Sine Lead");
        image.inst_zone(&[(GenTag::SampleId, sample as i16)]);
        image.add_preset("Sine Lead", 0, 0);
        image.preset_zone(&[(GenTag::Instrument, inst as i16)]);
        image
    }

    #[test]
    fn loads_minimal_bank() {
        let bank = minimal_image().load();
        assert_eq!(bank.num_presets(), 1);
        assert_eq!(bank.num_samples(), 1);
        assert_eq!(bank.instruments.len(), 1);
        assert_eq!(bank.samples.len(), 44100);
        assert_eq!(bank.presets.records[0].name_str(), "Sine Lead");
        assert_eq!(bank.find_preset(0, 0), Some(0));
        assert_eq!(bank.find_preset(0, 1), None);
    }

    #[test]
    fn rejects_wrong_outer_fourcc() {
        let mut bytes = minimal_image().build();
        bytes[..4].copy_from_slice(b"RIFX");
        let err = Bank::read_from_file(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, SfError::BadFileType(_)));
    }

    #[test]
    fn rejects_wrong_form_type() {
        let mut bytes = minimal_image().build();
        bytes[8..12].copy_from_slice(b"sfbX");
        let err = Bank::read_from_file(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, SfError::BadFileType(_)));
    }

    #[test]
    fn truncated_table_is_bad_file() {
        let bytes = minimal_image().build();
        let cut = bytes.len() - 20;
        let err = Bank::read_from_file(&mut Cursor::new(bytes[..cut].to_vec())).unwrap_err();
        assert!(matches!(err, SfError::BadFile(_)));
    }

    #[test]
    fn skips_unknown_top_level_and_info_lists() {
        // Splice an INFO list and an unknown chunk before sdta.
        let image = minimal_image();
        let inner = image.build();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&inner[..12]); // RIFF + size + sfbk
        bytes.extend_from_slice(b"LIST");
        bytes.extend_from_slice(&12u32.to_le_bytes()); // "INFO" + one empty sub-chunk
        bytes.extend_from_slice(b"INFO");
        bytes.extend_from_slice(b"ifil");
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(b"junk");
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 4]);
        bytes.extend_from_slice(&inner[12..]);
        let bank = Bank::read_from_file(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(bank.num_presets(), 1);
    }

    #[test]
    fn bag_ranges_extend_to_table_length() {
        let bank = minimal_image().load();
        assert_eq!(bank.preset_bag_range(0), (0, 1));
        assert_eq!(bank.preset_gen_range(0), (0, 1));
        assert_eq!(bank.inst_bag_range(0), (0, 1));
        assert_eq!(bank.inst_gen_range(0), (0, 1));
    }

    #[test]
    fn unpack_range_handles_sentinel_and_zero_high_byte() {
        assert_eq!(unpack_range(RANGE_DEFAULT), (0, 127));
        assert_eq!(unpack_range(0x0000), (0, 127));
        assert_eq!(unpack_range(0x3B24), (0x24, 0x3B));
    }
}
