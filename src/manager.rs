//! Bank manager: the ordered set of loaded SF2 banks and the
//! (bank, program) resolution cascade, including the legacy odd-bank
//! percussion mapping used by instrument identifiers.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::debug;

use crate::dtype::SfError;
use crate::engine::Instrument;
use crate::sf2::compile::{create_from_preset, create_from_preset_with_note, looks_like_drum_kit};
use crate::sf2::Bank;

/// Owns every loaded bank in load order, keyed by source path. Mutated only
/// from the UI thread, and never while an export worker is running.
#[derive(Default)]
pub struct BankSet {
    banks: IndexMap<PathBuf, Bank>,
}

/// How an instrument identifier decodes: `id = internal_bank * 128 + n`
/// where an odd internal bank is the legacy percussion mapping (n is the
/// drum note, kit pinned to (128, 0)), and an even internal bank halves to
/// the external MIDI bank (128 meaning the SF2 percussion bank).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentRequest {
    pub bank: u16,
    pub program: u16,
    /// Set when the request is percussion; carries the note to build.
    pub percussion_note: Option<u8>,
}

impl InstrumentRequest {
    pub fn decode(instrument_id: u32) -> InstrumentRequest {
        let internal_bank = (instrument_id / 128) as u16;
        let program_or_note = (instrument_id % 128) as u16;
        if internal_bank % 2 == 1 {
            InstrumentRequest {
                bank: 128,
                program: 0,
                percussion_note: Some(program_or_note as u8),
            }
        } else {
            let ext_bank = internal_bank / 2;
            if ext_bank == 128 {
                InstrumentRequest {
                    bank: 128,
                    program: program_or_note,
                    percussion_note: Some(program_or_note as u8),
                }
            } else {
                InstrumentRequest {
                    bank: ext_bank,
                    program: program_or_note,
                    percussion_note: None,
                }
            }
        }
    }
}

impl BankSet {
    pub fn new() -> BankSet {
        BankSet::default()
    }

    /// Load an SF2 file and append it. A failed load leaves the set as-is.
    pub fn load_bank(&mut self, path: &Path) -> Result<(), SfError> {
        let file = File::open(path)?;
        let bank = Bank::read_from_file(&mut BufReader::new(file))?;
        self.banks.insert(path.to_path_buf(), bank);
        Ok(())
    }

    pub fn add_bank(&mut self, path: PathBuf, bank: Bank) {
        self.banks.insert(path, bank);
    }

    pub fn remove_bank(&mut self, path: &Path) -> bool {
        self.banks.shift_remove(path).is_some()
    }

    pub fn find_by_path(&self, path: &Path) -> Option<&Bank> {
        self.banks.get(path)
    }

    pub fn len(&self) -> usize {
        self.banks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.banks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &Bank)> {
        self.banks.iter()
    }

    /// Resolve an encoded instrument identifier through the fallback
    /// cascade. Percussion requests never fall back to melodic presets.
    pub fn find_instrument(&self, instrument_id: u32) -> Result<Instrument, SfError> {
        let request = InstrumentRequest::decode(instrument_id);
        self.find_requested(request)
    }

    pub fn find_requested(&self, request: InstrumentRequest) -> Result<Instrument, SfError> {
        let bad = || SfError::BadInstrument {
            bank: request.bank,
            program: request.program,
        };

        // Exact (bank, program) across the loaded banks.
        for (path, bank) in self.banks.iter() {
            if bank.find_preset(request.bank, request.program).is_none() {
                continue;
            }
            let built = match request.percussion_note {
                Some(note) => {
                    create_from_preset_with_note(bank, request.bank, request.program, note)
                }
                None => create_from_preset(bank, request.bank, request.program),
            };
            match built {
                Ok(instrument) => return Ok(instrument),
                Err(e) => debug!("{}: preset matched but failed to build: {}", path.display(), e),
            }
        }

        if let Some(note) = request.percussion_note {
            // Percussion fallback: any bank-128 kit first, then presets that
            // look like kits. Never a melodic preset.
            for (_, bank) in self.banks.iter() {
                for preset in bank.presets.records.iter() {
                    if preset.bank != 128 {
                        continue;
                    }
                    if let Ok(instrument) =
                        create_from_preset_with_note(bank, preset.bank, preset.preset, note)
                    {
                        return Ok(instrument);
                    }
                }
            }
            for (_, bank) in self.banks.iter() {
                for (i, preset) in bank.presets.records.iter().enumerate() {
                    if preset.bank == 128 {
                        continue;
                    }
                    if !looks_like_drum_kit(bank, i) {
                        continue;
                    }
                    if let Ok(instrument) =
                        create_from_preset_with_note(bank, preset.bank, preset.preset, note)
                    {
                        return Ok(instrument);
                    }
                }
            }
            return Err(bad());
        }

        // Melodic fallback tier 1: General MIDI bank 0.
        if request.bank != 0 {
            for (_, bank) in self.banks.iter() {
                if bank.find_preset(0, request.program).is_some() {
                    if let Ok(instrument) = create_from_preset(bank, 0, request.program) {
                        return Ok(instrument);
                    }
                }
            }
        }

        // Tier 2: matching program in any bank. Some fonts leave the bank
        // field inconsistent, so a loose match beats dropping the note.
        for (_, bank) in self.banks.iter() {
            for preset in bank.presets.records.iter() {
                if preset.preset != request.program {
                    continue;
                }
                if let Ok(instrument) = create_from_preset(bank, preset.bank, preset.preset) {
                    return Ok(instrument);
                }
            }
        }

        // Tier 3: piano.
        for (_, bank) in self.banks.iter() {
            for preset in bank.presets.records.iter() {
                if preset.preset != 0 {
                    continue;
                }
                if let Ok(instrument) = create_from_preset(bank, preset.bank, 0) {
                    return Ok(instrument);
                }
            }
        }

        Err(bad())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sf2::testbank::BankImage;
    use crate::sf2::GenTag;

    fn melodic_image(bank_num: u16, program: u16, pitch: u8) -> BankImage {
        let mut image = BankImage::new();
        let s = image.add_sample("tone", &vec![100i16; 256], 44100, pitch, None);
        let inst = image.add_instrument("Tone");
        image.inst_zone(&[(GenTag::SampleId, s as i16)]);
        image.add_preset("Tone", bank_num, program);
        image.preset_zone(&[(GenTag::Instrument, inst as i16)]);
        image
    }

    fn kit_image() -> BankImage {
        let mut image = BankImage::new();
        let mut samples = Vec::new();
        for n in 35..=45u8 {
            samples.push(image.add_sample(&format!("d{}", n), &vec![50i16; 64], 22050, 255, None));
        }
        let inst = image.add_instrument("Kit");
        for (i, n) in (35..=45u8).enumerate() {
            image.inst_zone(&[(GenTag::Keynum, n as i16), (GenTag::SampleId, samples[i] as i16)]);
        }
        image.add_preset("Standard Kit", 128, 0);
        image.preset_zone(&[(GenTag::Instrument, inst as i16)]);
        image
    }

    #[test]
    fn decode_instrument_request() {
        // Even internal bank: melodic, bank = internal / 2.
        let r = InstrumentRequest::decode(2 * 128 + 40);
        assert_eq!((r.bank, r.program, r.percussion_note), (1, 40, None));
        // Odd internal bank: legacy percussion, note in the low bits.
        let r = InstrumentRequest::decode(128 + 38);
        assert_eq!((r.bank, r.program), (128, 0));
        assert_eq!(r.percussion_note, Some(38));
        // Even internal bank deriving MIDI bank 128: percussion.
        let r = InstrumentRequest::decode(256 * 128 + 5);
        assert_eq!(r.bank, 128);
        assert_eq!(r.percussion_note, Some(5));
    }

    #[test]
    fn exact_match_wins() {
        let mut set = BankSet::new();
        set.add_bank(PathBuf::from("a.sf2"), melodic_image(0, 40, 60).load());
        // Internal bank 0 (even): MIDI bank 0, program 40.
        let instrument = set.find_instrument(40).unwrap();
        assert_eq!(instrument.waveform().unwrap().base_midi_pitch, 60);
    }

    #[test]
    fn gm_fallback_from_other_bank() {
        let mut set = BankSet::new();
        set.add_bank(PathBuf::from("a.sf2"), melodic_image(0, 40, 61).load());
        // Request MIDI bank 3 (internal 6): no exact preset, falls to (0, 40).
        let id = 6 * 128 + 40;
        let instrument = set.find_instrument(id).unwrap();
        assert_eq!(instrument.waveform().unwrap().base_midi_pitch, 61);
    }

    #[test]
    fn program_only_fallback_then_piano() {
        let mut set = BankSet::new();
        set.add_bank(PathBuf::from("a.sf2"), melodic_image(9, 40, 62).load());
        // (0, 40) missing, bank 9 has program 40: loose match succeeds.
        let instrument = set.find_instrument(40).unwrap();
        assert_eq!(instrument.waveform().unwrap().base_midi_pitch, 62);

        let mut set = BankSet::new();
        set.add_bank(PathBuf::from("b.sf2"), melodic_image(4, 0, 63).load());
        // Nothing matches program 40 at all: piano fallback.
        let instrument = set.find_instrument(40).unwrap();
        assert_eq!(instrument.waveform().unwrap().base_midi_pitch, 63);
    }

    #[test]
    fn percussion_request_never_falls_back_to_melodic() {
        let mut set = BankSet::new();
        set.add_bank(PathBuf::from("a.sf2"), melodic_image(0, 0, 60).load());
        // Odd internal bank 1: percussion note 38, but no kit anywhere.
        let err = set.find_instrument(128 + 38).unwrap_err();
        assert!(matches!(err, SfError::BadInstrument { .. }));
    }

    #[test]
    fn percussion_finds_bank_128_kit() {
        let mut set = BankSet::new();
        set.add_bank(PathBuf::from("gm.sf2"), melodic_image(0, 0, 60).load());
        set.add_bank(PathBuf::from("kit.sf2"), kit_image().load());
        let instrument = set.find_instrument(128 + 38).unwrap();
        assert_eq!(instrument.waveform().unwrap().base_midi_pitch, 38);
        assert!(instrument.play_at_sampled_freq);
    }

    #[test]
    fn remove_bank_by_path() {
        let mut set = BankSet::new();
        set.add_bank(PathBuf::from("a.sf2"), melodic_image(0, 0, 60).load());
        assert_eq!(set.len(), 1);
        assert!(set.find_by_path(Path::new("a.sf2")).is_some());
        assert!(set.remove_bank(Path::new("a.sf2")));
        assert!(set.is_empty());
        assert!(!set.remove_bank(Path::new("a.sf2")));
    }
}
