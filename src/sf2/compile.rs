//! Compilation of SF2 presets into engine instruments: envelope and LFO
//! emission, modulator-curve translation, sample materialization, and the
//! melodic / keymap-split / per-note-drum instrument constructors.

use log::debug;

use crate::dtype::{fixed_from_f64, name_contains_ignore_case, SfError, FIXED_1};
use crate::engine::{
    CurveRecord, CurveSource, CurveTarget, Envelope, EnvelopeStage, Instrument, InstrumentKind,
    KeymapSplit, LfoRecord, LfoTarget, StageFlag, WaveShape, Waveform, MAX_CURVES, MAX_LFOS,
    MAX_ZONES, SILENCE_CB, SLICE_TIME_USEC,
};
use crate::math::{floor_stage_usec, level_from_centibels, lfo_period_usec, timecents_to_usec};

use super::resolver::{
    find_effective, find_in_range, find_inst_merged, preset_gen_range_for_instrument,
    preset_global_gen_range,
};
use super::{unpack_range, Bank, GenTag, RANGE_DEFAULT};

/// Candidate instruments considered per preset.
const MAX_PRESET_INSTRUMENTS: usize = 16;
/// Candidate instruments considered for a per-note drum lookup.
const MAX_NOTE_CANDIDATES: usize = 32;

/// Effective root key for a zone: the overriding root key wins as-is (even
/// outside the key range), then the sample header's original pitch, then the
/// key-range center, then middle C.
pub fn effective_root_key(
    bank: &Bank,
    sample_id: i32,
    zone_root_key: i16,
    key_lo: u8,
    key_hi: u8,
) -> i16 {
    if (0..=127).contains(&zone_root_key) {
        return zone_root_key;
    }
    if sample_id >= 0 && (sample_id as usize) < bank.sample_headers.len() {
        let orig = bank.sample_headers.records[sample_id as usize].original_pitch as i16;
        if (0..=127).contains(&orig) {
            return orig;
        }
    }
    if (key_lo, key_hi) != (0, 127) && key_lo <= key_hi {
        return ((key_lo as i16) + (key_hi as i16)) / 2;
    }
    60
}

/// Volume ADSR from the zone's (instrument-merged) envelope generators.
/// Stage levels are centibels; delay and hold are emitted only when their
/// timecent generator departs from the default sentinel.
pub fn fill_volume_adsr(
    bank: &Bank,
    inst_index: usize,
    gen_start: usize,
    gen_end: usize,
) -> Envelope {
    let f = |tag, default| find_inst_merged(bank, inst_index, gen_start, gen_end, tag, default);
    let tc_delay = f(GenTag::DelayVolEnv, -12000).max(-12000);
    let tc_attack = f(GenTag::AttackVolEnv, -12000).max(-12000);
    let tc_hold = f(GenTag::HoldVolEnv, -12000).max(-12000);
    let tc_decay = f(GenTag::DecayVolEnv, -12000).max(-12000);
    let cb_sustain = f(GenTag::SustainVolEnv, 0);
    let tc_release = f(GenTag::ReleaseVolEnv, -12000).max(-12000);
    let cb_init_att = f(GenTag::InitialAttenuation, 0);

    let t_delay = timecents_to_usec(tc_delay);
    let t_attack = floor_stage_usec(timecents_to_usec(tc_attack), SLICE_TIME_USEC);
    let t_hold = timecents_to_usec(tc_hold);
    let t_decay = floor_stage_usec(timecents_to_usec(tc_decay), SLICE_TIME_USEC);
    let t_release = floor_stage_usec(timecents_to_usec(tc_release), SLICE_TIME_USEC);

    let mut env = Envelope {
        sf2_levels: true,
        sustaining_decay_level: if cb_init_att != 0 {
            level_from_centibels(cb_init_att, FIXED_1)
        } else {
            FIXED_1
        },
        ..Envelope::default()
    };

    let sustain_level = (cb_sustain as i32 - cb_init_att as i32).max(0);
    let mut stage = 0;
    if tc_delay > -12000 {
        env.stages[stage] = EnvelopeStage {
            level: SILENCE_CB,
            time_usec: t_delay,
            flag: StageFlag::ExponentialRamp,
        };
        stage += 1;
    }
    env.stages[stage] = EnvelopeStage {
        level: 0,
        time_usec: t_attack,
        flag: StageFlag::ExponentialRamp,
    };
    stage += 1;
    if tc_hold > -12000 {
        env.stages[stage] = EnvelopeStage {
            level: 0,
            time_usec: t_hold,
            flag: StageFlag::ExponentialRamp,
        };
        stage += 1;
    }
    env.stages[stage] = EnvelopeStage {
        level: sustain_level,
        time_usec: t_decay,
        flag: StageFlag::ExponentialRamp,
    };
    stage += 1;
    env.stages[stage] = EnvelopeStage {
        level: sustain_level,
        time_usec: 0,
        flag: StageFlag::Sustain,
    };
    stage += 1;
    env.stages[stage] = EnvelopeStage {
        level: SILENCE_CB,
        time_usec: t_release,
        flag: StageFlag::Release,
    };
    stage += 1;
    for s in env.stages.iter_mut().skip(stage) {
        *s = EnvelopeStage {
            level: SILENCE_CB,
            time_usec: 1,
            flag: StageFlag::Terminate,
        };
    }
    env
}

/// Modulation ADSR: same six-stage shape, levels on a 0..1000 scale
/// (tenths of a percent), sustain taken directly from the generator.
pub fn fill_modulation_adsr(
    bank: &Bank,
    inst_index: usize,
    gen_start: usize,
    gen_end: usize,
) -> Envelope {
    let f = |tag, default| find_inst_merged(bank, inst_index, gen_start, gen_end, tag, default);
    let tc_delay = f(GenTag::DelayModEnv, -12000).max(-12000);
    let tc_attack = f(GenTag::AttackModEnv, -12000).max(-12000);
    let tc_hold = f(GenTag::HoldModEnv, -12000).max(-12000);
    let tc_decay = f(GenTag::DecayModEnv, -12000).max(-12000);
    let sustain = f(GenTag::SustainModEnv, 0);
    let tc_release = f(GenTag::ReleaseModEnv, -12000).max(-12000);

    let t_delay = timecents_to_usec(tc_delay);
    let t_attack = floor_stage_usec(timecents_to_usec(tc_attack), SLICE_TIME_USEC);
    let t_hold = timecents_to_usec(tc_hold);
    let t_decay = floor_stage_usec(timecents_to_usec(tc_decay), SLICE_TIME_USEC);
    let t_release = floor_stage_usec(timecents_to_usec(tc_release), SLICE_TIME_USEC);

    let mut env = Envelope {
        sf2_levels: true,
        ..Envelope::default()
    };

    let mut stage = 0;
    if tc_delay > -12000 {
        env.stages[stage] = EnvelopeStage {
            level: 0,
            time_usec: t_delay,
            flag: StageFlag::ExponentialRamp,
        };
        stage += 1;
    }
    env.stages[stage] = EnvelopeStage {
        level: 1000,
        time_usec: t_attack,
        flag: StageFlag::ExponentialRamp,
    };
    stage += 1;
    if tc_hold > -12000 {
        env.stages[stage] = EnvelopeStage {
            level: 1000,
            time_usec: t_hold,
            flag: StageFlag::ExponentialRamp,
        };
        stage += 1;
    }
    env.stages[stage] = EnvelopeStage {
        level: sustain as i32,
        time_usec: t_decay,
        flag: StageFlag::ExponentialRamp,
    };
    stage += 1;
    env.stages[stage] = EnvelopeStage {
        level: sustain as i32,
        time_usec: 0,
        flag: StageFlag::Sustain,
    };
    stage += 1;
    env.stages[stage] = EnvelopeStage {
        level: 0,
        time_usec: t_release,
        flag: StageFlag::Release,
    };
    stage += 1;
    for s in env.stages.iter_mut().skip(stage) {
        *s = EnvelopeStage {
            level: 0,
            time_usec: 1,
            flag: StageFlag::Terminate,
        };
    }
    env
}

/// Scalar ramp for an LFO: 0 to full scale over the delay time, or flat full
/// scale when the delay generator is the default sentinel.
fn lfo_delay_ramp(delay_tc: i16) -> Envelope {
    let mut env = Envelope::default();
    if delay_tc > -12000 {
        env.stages[0] = EnvelopeStage {
            level: 0,
            time_usec: timecents_to_usec(delay_tc),
            flag: StageFlag::ExponentialRamp,
        };
        env.stages[1] = EnvelopeStage {
            level: FIXED_1,
            time_usec: 0,
            flag: StageFlag::Terminate,
        };
    } else {
        env.stages[0] = EnvelopeStage {
            level: FIXED_1,
            time_usec: 0,
            flag: StageFlag::Terminate,
        };
    }
    env
}

fn make_lfo(freq_cents: i16, delay_tc: i16, target: LfoTarget, level: i32) -> LfoRecord {
    LfoRecord {
        period_usec: lfo_period_usec(freq_cents),
        level,
        target,
        shape: WaveShape::Sine,
        delay_ramp: lfo_delay_ramp(delay_tc),
    }
}

/// Emit LFO records for the zone: one per non-zero modulation-LFO routing
/// (pitch, volume, filter) plus the vibrato LFO. A running LFO with no
/// explicit depth still gets a default-depth record so external modulator
/// routings have something to scale.
pub fn fill_lfo_records(
    bank: &Bank,
    inst_index: usize,
    gen_start: usize,
    gen_end: usize,
) -> Vec<LfoRecord> {
    let f = |tag, default| find_inst_merged(bank, inst_index, gen_start, gen_end, tag, default);
    let mod_delay = f(GenTag::DelayModLfo, -12000);
    let mod_freq = f(GenTag::FreqModLfo, 0);
    let mod_to_pitch = f(GenTag::ModLfoToPitch, 0);
    let mod_to_volume = f(GenTag::ModLfoToVolume, 0);
    let mod_to_filter = f(GenTag::ModLfoToFilterFc, 0);
    let vib_delay = f(GenTag::DelayVibLfo, -12000);
    let vib_freq = f(GenTag::FreqVibLfo, 0);
    let vib_to_pitch = f(GenTag::VibLfoToPitch, 0);

    let mut lfos = Vec::new();
    if mod_to_pitch != 0 && lfos.len() < MAX_LFOS {
        lfos.push(make_lfo(
            mod_freq,
            mod_delay,
            LfoTarget::Pitch,
            mod_to_pitch as i32 * 4,
        ));
    }
    if mod_to_volume != 0 && lfos.len() < MAX_LFOS {
        lfos.push(make_lfo(
            mod_freq,
            mod_delay,
            LfoTarget::Volume,
            mod_to_volume as i32 * 16,
        ));
    }
    if mod_to_filter != 0 && lfos.len() < MAX_LFOS {
        lfos.push(make_lfo(
            mod_freq,
            mod_delay,
            LfoTarget::FilterCutoff,
            mod_to_filter as i32 * 4,
        ));
    }
    if vib_to_pitch != 0 && lfos.len() < MAX_LFOS {
        lfos.push(make_lfo(
            vib_freq,
            vib_delay,
            LfoTarget::Pitch,
            vib_to_pitch as i32 * 4,
        ));
    }
    // Vibrato oscillator running with no explicit depth: default ~50 cents
    // so the mod wheel routing still has range to work with.
    if vib_to_pitch == 0 && vib_freq != 0 && lfos.len() < MAX_LFOS {
        lfos.push(make_lfo(vib_freq, vib_delay, LfoTarget::Pitch, 50 * 4));
    }
    // Same for a destination-less modulation LFO: default 25 cents to pitch.
    if mod_to_pitch == 0
        && mod_to_volume == 0
        && mod_to_filter == 0
        && mod_freq != 0
        && lfos.len() < MAX_LFOS
    {
        lfos.push(make_lfo(mod_freq, mod_delay, LfoTarget::Pitch, 25 * 4));
    }
    lfos
}

/// Decode an SF2 modulator source operator. The low 7 bits name the
/// controller; bit 7 selects the MIDI-CC palette.
fn decode_modulator_source(src_oper: u16) -> Option<CurveSource> {
    let controller = src_oper & 0x7F;
    let is_cc = (src_oper >> 7) & 0x01 == 1;
    if is_cc {
        match controller {
            1 => Some(CurveSource::ModWheel),
            7 => Some(CurveSource::VolumeCc),
            10 => Some(CurveSource::PanCc),
            11 => Some(CurveSource::ExpressionCc),
            _ => None,
        }
    } else {
        match controller {
            2 => Some(CurveSource::NoteVelocity),
            3 => Some(CurveSource::NoteKey),
            10 | 13 => Some(CurveSource::Pressure),
            _ => None,
        }
    }
}

/// Map an SF2 destination generator tag to an engine curve destination.
fn map_curve_destination(dest_oper: u16) -> Option<CurveTarget> {
    match dest_oper {
        x if x == GenTag::ModLfoToPitch as u16 => Some(CurveTarget::PitchLfo),
        x if x == GenTag::VibLfoToPitch as u16 => Some(CurveTarget::PitchLfo),
        x if x == GenTag::ModLfoToFilterFc as u16 => Some(CurveTarget::FilterCutoff),
        x if x == GenTag::ModLfoToVolume as u16 => Some(CurveTarget::VolumeLfo),
        x if x == GenTag::InitialAttenuation as u16 => Some(CurveTarget::VolumeAttack),
        x if x == GenTag::Pan as u16 => Some(CurveTarget::StereoPanLfo),
        x if x == GenTag::InitialFilterFc as u16 => Some(CurveTarget::FilterCutoff),
        _ => None,
    }
}

/// Scale an SF2 modulator amount into an engine curve scalar (256 = unity).
fn modulator_scalar(amount: i16) -> i16 {
    let amount = amount as i32;
    if amount > 0 {
        (amount * 256 / 100).min(512) as i16
    } else {
        (256 + amount * 256 / 100).max(0) as i16
    }
}

/// Translate preset-level (PMOD) and instrument-level (IMOD) modulators of
/// the zone into curve records. Preset bags anywhere in the bank that
/// reference this instrument contribute their modulators.
pub fn process_modulators(
    bank: &Bank,
    inst_index: usize,
    gen_start: usize,
    gen_end: usize,
    curves: &mut Vec<CurveRecord>,
) {
    for bag_idx in 0..bank.preset_bags.len() {
        let (gs, ge) = bank.preset_gen_range(bag_idx);
        let bag_inst = find_in_range(&bank.preset_gens.records, gs, ge, GenTag::Instrument, -1);
        if bag_inst != inst_index as i16 {
            continue;
        }
        let (ms, me) = bank.preset_mod_range(bag_idx);
        for modulator in &bank.preset_mods.records[ms.min(bank.preset_mods.len())..me] {
            if curves.len() >= MAX_CURVES {
                return;
            }
            if let (Some(source), Some(target)) = (
                decode_modulator_source(modulator.src_oper),
                map_curve_destination(modulator.dest_oper),
            ) {
                if modulator.amount != 0 {
                    curves.push(CurveRecord::new(
                        source,
                        target,
                        &[(0, 0), (127, modulator_scalar(modulator.amount))],
                    ));
                }
            }
        }
    }

    if inst_index >= bank.instruments.len() {
        return;
    }
    let (bag_start, bag_end) = bank.inst_bag_range(inst_index);
    for bag_idx in bag_start..bag_end {
        let (zgs, zge) = bank.inst_gen_range(bag_idx);
        // Only bags overlapping the zone's generator range apply.
        if zgs > gen_end || zge < gen_start {
            continue;
        }
        let (ms, me) = bank.inst_mod_range(bag_idx);
        for modulator in &bank.inst_mods.records[ms.min(bank.inst_mods.len())..me] {
            if curves.len() >= MAX_CURVES {
                return;
            }
            if let (Some(source), Some(target)) = (
                decode_modulator_source(modulator.src_oper),
                map_curve_destination(modulator.dest_oper),
            ) {
                if modulator.amount != 0 {
                    curves.push(CurveRecord::new(
                        source,
                        target,
                        &[(0, 0), (127, modulator_scalar(modulator.amount))],
                    ));
                }
            }
        }
    }
}

/// SF2 default modulators, always applied after PMOD/IMOD: velocity to
/// attenuation and filter brightness, mod wheel to vibrato and tremolo.
pub fn apply_default_modulators(curves: &mut Vec<CurveRecord>) {
    if curves.len() < MAX_CURVES {
        curves.push(CurveRecord::new(
            CurveSource::NoteVelocity,
            CurveTarget::VolumeAttack,
            &[(0, 50), (64, 180), (127, 256)],
        ));
    }
    if curves.len() < MAX_CURVES {
        curves.push(CurveRecord::new(
            CurveSource::NoteVelocity,
            CurveTarget::FilterCutoff,
            &[(0, 180), (64, 256), (127, 320)],
        ));
    }
    if curves.len() < MAX_CURVES {
        curves.push(CurveRecord::new(
            CurveSource::ModWheel,
            CurveTarget::PitchLfo,
            &[(0, 0), (64, 128), (127, 256)],
        ));
    }
    if curves.len() < MAX_CURVES {
        curves.push(CurveRecord::new(
            CurveSource::ModWheel,
            CurveTarget::VolumeLfo,
            &[(0, 0), (127, 128)],
        ));
    }
}

/// SAMPLE_MODES: 0 and 2 disable looping, 1 and 3 enable it, anything else
/// leaves the current setting alone.
fn apply_sample_modes(
    bank: &Bank,
    inst_index: usize,
    gen_start: usize,
    gen_end: usize,
    instrument: &mut Instrument,
) {
    match find_inst_merged(bank, inst_index, gen_start, gen_end, GenTag::SampleModes, 0) {
        0 | 2 => instrument.disable_looping = true,
        1 | 3 => instrument.disable_looping = false,
        _ => {}
    }
}

/// Materialize a zone's waveform from the bank's PCM pool, honoring the
/// start/end and loop address offset generators (fine and coarse), clamping
/// the loop into the effective window, and picking the effective root key.
pub fn create_waveform_from_sample(
    bank: &Bank,
    inst_index: usize,
    sample_id: u16,
    gen_start: usize,
    gen_end: usize,
) -> Result<Waveform, SfError> {
    if sample_id as usize >= bank.sample_headers.len() {
        return Err(SfError::Param(format!("sample id {} out of range", sample_id)));
    }
    let header = &bank.sample_headers.records[sample_id as usize];
    let f = |tag| find_inst_merged(bank, inst_index, gen_start, gen_end, tag, 0) as i64;

    let eff_start =
        (header.start as i64 + f(GenTag::StartAddrsOffset) + 32768 * f(GenTag::StartAddrsCoarseOffset))
            .max(0);
    let mut eff_end =
        header.end as i64 + f(GenTag::EndAddrsOffset) + 32768 * f(GenTag::EndAddrsCoarseOffset);
    if eff_end <= eff_start {
        eff_end = eff_start + 1;
    }
    let frames = (eff_end - eff_start) as usize;

    if frames == 0 || eff_start as usize >= bank.samples.len() {
        return Err(SfError::BadSample(format!(
            "sample '{}': window {}..{} outside pool of {} frames",
            header.name_str(),
            eff_start,
            eff_end,
            bank.samples.len()
        )));
    }

    let mut data = vec![0i16; frames];
    for (i, slot) in data.iter_mut().enumerate() {
        let idx = eff_start as usize + i;
        if idx < bank.samples.len() {
            *slot = bank.samples[idx];
        }
    }

    let target_rate = header.sample_rate.clamp(8000, 48000);

    let eff_start_loop = (header.start_loop as i64
        + f(GenTag::StartloopAddrsOffset)
        + 32768 * f(GenTag::StartloopAddrsCoarseOffset))
        .clamp(eff_start, eff_end);
    let eff_end_loop = (header.end_loop as i64
        + f(GenTag::EndloopAddrsOffset)
        + 32768 * f(GenTag::EndloopAddrsCoarseOffset))
        .clamp(eff_start_loop, eff_end);
    let header_had_loop = header.end_loop > header.start_loop;

    let (mut start_loop, mut end_loop) = if header_had_loop && eff_start_loop < eff_end_loop {
        (
            (eff_start_loop - eff_start) as u32,
            (eff_end_loop - eff_start) as u32,
        )
    } else {
        if header_had_loop {
            debug!(
                "sample '{}': loop {}..{} degenerate after offsets, dropping",
                header.name_str(),
                header.start_loop,
                header.end_loop
            );
        }
        (0, 0)
    };
    if end_loop > frames as u32 {
        end_loop = frames as u32;
    }
    if start_loop > end_loop {
        start_loop = 0;
        end_loop = 0;
    }

    let zone_root_key = find_inst_merged(
        bank,
        inst_index,
        gen_start,
        gen_end,
        GenTag::OverridingRootKey,
        -1,
    );
    let key_range = find_inst_merged(
        bank,
        inst_index,
        gen_start,
        gen_end,
        GenTag::KeyRange,
        RANGE_DEFAULT,
    );
    let (key_lo, key_hi) = unpack_range(key_range);
    let base_midi_pitch =
        effective_root_key(bank, sample_id as i32, zone_root_key, key_lo, key_hi);

    Ok(Waveform {
        data,
        frames: frames as u32,
        start_loop,
        end_loop,
        base_midi_pitch,
        sampled_rate: fixed_from_f64(target_rate as f64),
        channels: 1,
        bits: 16,
    })
}

fn blank_instrument(kind: InstrumentKind) -> Instrument {
    Instrument {
        not_polyphonic: false,
        use_sample_rate: true,
        play_at_sampled_freq: false,
        sample_and_hold: false,
        disable_looping: false,
        avoid_reverb: false,
        pan_placement: 0,
        master_root_key: 0,
        volume_envelope: Envelope::default(),
        mod_envelope: Envelope::default(),
        mod_env_to_pitch: 0,
        mod_env_to_filter: 0,
        lfos: Vec::new(),
        curves: Vec::new(),
        kind,
    }
}

/// Fill the shared per-zone pieces of an instrument: envelopes, modulation
/// envelope depths, LFOs, looping mode, and modulator curves.
fn fill_zone_records(
    bank: &Bank,
    inst_index: usize,
    gen_start: usize,
    gen_end: usize,
    instrument: &mut Instrument,
) {
    instrument.volume_envelope = fill_volume_adsr(bank, inst_index, gen_start, gen_end);
    instrument.mod_envelope = fill_modulation_adsr(bank, inst_index, gen_start, gen_end);
    instrument.mod_env_to_pitch = find_inst_merged(
        bank,
        inst_index,
        gen_start,
        gen_end,
        GenTag::ModEnvToPitch,
        0,
    ) as i32
        * 4;
    instrument.mod_env_to_filter = find_inst_merged(
        bank,
        inst_index,
        gen_start,
        gen_end,
        GenTag::ModEnvToFilterFc,
        0,
    ) as i32
        * 4;
    instrument.lfos = fill_lfo_records(bank, inst_index, gen_start, gen_end);
    apply_sample_modes(bank, inst_index, gen_start, gen_end, instrument);
    let mut curves = Vec::new();
    process_modulators(bank, inst_index, gen_start, gen_end, &mut curves);
    apply_default_modulators(&mut curves);
    instrument.curves = curves;
}

/// Distinct instruments referenced by a preset's bags, in bag order.
fn collect_preset_instruments(bank: &Bank, preset_index: usize) -> Vec<usize> {
    let (bag_start, bag_end) = bank.preset_bag_range(preset_index);
    let mut ids = Vec::new();
    for bag_idx in bag_start..bag_end {
        if ids.len() >= MAX_PRESET_INSTRUMENTS {
            break;
        }
        let (gs, ge) = bank.preset_gen_range(bag_idx);
        let inst = find_in_range(&bank.preset_gens.records, gs, ge, GenTag::Instrument, -1);
        if inst >= 0 && (inst as usize) < bank.instruments.len() && !ids.contains(&(inst as usize))
        {
            ids.push(inst as usize);
        }
    }
    ids
}

/// Compile the preset at `(bank_num, preset_num)` into an instrument: a
/// single-zone preset becomes a simple sampled instrument, anything larger
/// becomes a keymap split.
pub fn create_from_preset(
    bank: &Bank,
    bank_num: u16,
    preset_num: u16,
) -> Result<Instrument, SfError> {
    let preset_index = bank.find_preset(bank_num, preset_num).ok_or(SfError::BadInstrument {
        bank: bank_num,
        program: preset_num,
    })?;

    let instrument_ids = collect_preset_instruments(bank, preset_index);
    if instrument_ids.is_empty() {
        return Err(SfError::BadInstrument {
            bank: bank_num,
            program: preset_num,
        });
    }

    let mut total_zones = 0usize;
    for &inst in &instrument_ids {
        let (bag_start, bag_end) = bank.inst_bag_range(inst);
        for bag_idx in bag_start..bag_end {
            let (gs, ge) = bank.inst_gen_range(bag_idx);
            let sample = find_in_range(&bank.inst_gens.records, gs, ge, GenTag::SampleId, -1);
            if sample >= 0 && (sample as usize) < bank.sample_headers.len() {
                total_zones += 1;
            }
        }
    }
    if total_zones == 0 {
        return Err(SfError::BadInstrument {
            bank: bank_num,
            program: preset_num,
        });
    }

    if total_zones <= 1 {
        create_simple_instrument(bank, &instrument_ids).ok_or(SfError::BadInstrument {
            bank: bank_num,
            program: preset_num,
        })
    } else {
        create_keymap_split_instrument(bank, &instrument_ids, preset_index).ok_or(
            SfError::BadInstrument {
                bank: bank_num,
                program: preset_num,
            },
        )
    }
}

/// Single-zone path: the first zone with a sample wins. Pitch placement is
/// carried entirely by the waveform's base pitch; the master root key stays
/// zero so the note is not transposed twice.
fn create_simple_instrument(bank: &Bank, instrument_ids: &[usize]) -> Option<Instrument> {
    for &inst in instrument_ids {
        let (bag_start, bag_end) = bank.inst_bag_range(inst);
        for bag_idx in bag_start..bag_end {
            let (gs, ge) = bank.inst_gen_range(bag_idx);
            let sample = find_in_range(&bank.inst_gens.records, gs, ge, GenTag::SampleId, -1);
            if sample < 0 || sample as usize >= bank.sample_headers.len() {
                continue;
            }
            let waveform = match create_waveform_from_sample(bank, inst, sample as u16, gs, ge) {
                Ok(w) => w,
                Err(_) => continue,
            };
            let mut instrument = blank_instrument(InstrumentKind::Simple(waveform));
            fill_zone_records(bank, inst, gs, ge, &mut instrument);
            return Some(instrument);
        }
    }
    None
}

struct ZoneInfo {
    sample_id: u16,
    low_key: u8,
    high_key: u8,
    low_vel: u8,
    high_vel: u8,
    root_key: i16,
    coarse_tune: i16,
    fine_tune: i16,
    gen_start: usize,
    gen_end: usize,
    inst_index: usize,
    preset_gen_start: usize,
    preset_gen_end: usize,
}

/// Resolve a zone's velocity range with the fallbacks real files need: the
/// fully-resolved value first, then the preset's global zone, then any bag
/// of this preset that wrote a VEL_RANGE. Bags of unrelated presets are
/// never consulted.
fn resolve_zone_vel_range(
    bank: &Bank,
    preset_index: usize,
    inst_index: usize,
    preset_gen_start: usize,
    preset_gen_end: usize,
    gen_start: usize,
    gen_end: usize,
) -> (u8, u8) {
    let mut vel_raw = find_effective(
        bank,
        preset_index,
        inst_index,
        preset_gen_start,
        preset_gen_end,
        gen_start,
        gen_end,
        GenTag::VelRange,
        RANGE_DEFAULT,
    );
    if vel_raw == RANGE_DEFAULT {
        if let Some((gs, ge)) = preset_global_gen_range(bank, preset_index) {
            let v = find_in_range(
                &bank.preset_gens.records,
                gs,
                ge,
                GenTag::VelRange,
                RANGE_DEFAULT,
            );
            if v != RANGE_DEFAULT {
                vel_raw = v;
            }
        }
    }
    if vel_raw == RANGE_DEFAULT {
        let (bag_start, bag_end) = bank.preset_bag_range(preset_index);
        for bag_idx in bag_start..bag_end {
            let (gs, ge) = bank.preset_gen_range(bag_idx);
            let v = find_in_range(
                &bank.preset_gens.records,
                gs,
                ge,
                GenTag::VelRange,
                RANGE_DEFAULT,
            );
            if v != RANGE_DEFAULT {
                vel_raw = v;
                break;
            }
        }
    }
    let (mut lo, mut hi) = unpack_range(vel_raw);
    if lo > hi {
        std::mem::swap(&mut lo, &mut hi);
    }
    (lo, hi.min(127))
}

/// Multi-zone path: gather every sample-bearing zone across the preset's
/// instruments with fully-resolved ranges and tuning, sort by key then
/// velocity, and nest one sub-instrument per zone.
fn create_keymap_split_instrument(
    bank: &Bank,
    instrument_ids: &[usize],
    preset_index: usize,
) -> Option<Instrument> {
    let mut zones: Vec<ZoneInfo> = Vec::new();

    for &inst in instrument_ids {
        if zones.len() >= MAX_ZONES {
            break;
        }
        let preset_range = preset_gen_range_for_instrument(bank, preset_index, inst);
        let (preset_gen_start, preset_gen_end) = preset_range.unwrap_or((0, 0));

        let (bag_start, bag_end) = bank.inst_bag_range(inst);
        for bag_idx in bag_start..bag_end {
            if zones.len() >= MAX_ZONES {
                break;
            }
            let (gs, ge) = bank.inst_gen_range(bag_idx);
            let sample = find_in_range(&bank.inst_gens.records, gs, ge, GenTag::SampleId, -1);
            if sample < 0 || sample as usize >= bank.sample_headers.len() {
                continue;
            }

            let key_raw = find_effective(
                bank,
                preset_index,
                inst,
                preset_gen_start,
                preset_gen_end,
                gs,
                ge,
                GenTag::KeyRange,
                RANGE_DEFAULT,
            );
            let (mut low_key, mut high_key) = unpack_range(key_raw);
            let keynum = find_effective(
                bank,
                preset_index,
                inst,
                preset_gen_start,
                preset_gen_end,
                gs,
                ge,
                GenTag::Keynum,
                -1,
            );
            if (0..=127).contains(&keynum) {
                low_key = keynum as u8;
                high_key = keynum as u8;
            }
            if low_key > high_key {
                std::mem::swap(&mut low_key, &mut high_key);
            }
            high_key = high_key.min(127);

            let (low_vel, high_vel) = resolve_zone_vel_range(
                bank,
                preset_index,
                inst,
                preset_gen_start,
                preset_gen_end,
                gs,
                ge,
            );

            let zone_root = find_effective(
                bank,
                preset_index,
                inst,
                preset_gen_start,
                preset_gen_end,
                gs,
                ge,
                GenTag::OverridingRootKey,
                -1,
            );
            let root_key = effective_root_key(bank, sample as i32, zone_root, low_key, high_key);
            let coarse_tune = find_effective(
                bank,
                preset_index,
                inst,
                preset_gen_start,
                preset_gen_end,
                gs,
                ge,
                GenTag::CoarseTune,
                0,
            );
            let fine_tune = find_effective(
                bank,
                preset_index,
                inst,
                preset_gen_start,
                preset_gen_end,
                gs,
                ge,
                GenTag::FineTune,
                0,
            );

            zones.push(ZoneInfo {
                sample_id: sample as u16,
                low_key,
                high_key,
                low_vel,
                high_vel,
                root_key,
                coarse_tune,
                fine_tune,
                gen_start: gs,
                gen_end: ge,
                inst_index: inst,
                preset_gen_start,
                preset_gen_end,
            });
        }
    }

    if zones.is_empty() {
        return None;
    }
    zones.sort_by_key(|z| (z.low_key, z.low_vel));

    let mut splits = Vec::with_capacity(zones.len());
    for zone in &zones {
        let waveform = match create_waveform_from_sample(
            bank,
            zone.inst_index,
            zone.sample_id,
            zone.gen_start,
            zone.gen_end,
        ) {
            Ok(w) => w,
            Err(_) => continue,
        };
        let mut sub = blank_instrument(InstrumentKind::Simple(waveform));
        fill_zone_records(bank, zone.inst_index, zone.gen_start, zone.gen_end, &mut sub);

        let scale_tuning = find_effective(
            bank,
            preset_index,
            zone.inst_index,
            zone.preset_gen_start,
            zone.preset_gen_end,
            zone.gen_start,
            zone.gen_end,
            GenTag::ScaleTuning,
            100,
        );
        let mut pitch_factor = 2.0_f64.powf(zone.fine_tune as f64 / 1200.0);
        if scale_tuning != 100 {
            let scale_factor = scale_tuning as f64 / 100.0;
            pitch_factor *=
                2.0_f64.powf((zone.root_key - 60) as f64 * (scale_factor - 1.0) / 12.0);
        }
        if let InstrumentKind::Simple(ref mut w) = sub.kind {
            w.base_midi_pitch -= zone.coarse_tune;
            w.sampled_rate = (w.sampled_rate as f64 * pitch_factor) as i32;
        }

        splits.push(KeymapSplit {
            low_key: zone.low_key,
            high_key: zone.high_key,
            vel_range: ((zone.high_vel as u16) << 8) | zone.low_vel as u16,
            attenuation: 100,
            instrument: Box::new(sub),
        });
    }

    if splits.is_empty() {
        return None;
    }
    let mut main = blank_instrument(InstrumentKind::KeymapSplit {
        default_split: 0,
        splits,
    });
    main.master_root_key = 0;
    Some(main)
}

/// Per-note drum construction: find the best zone for `note` across every
/// instrument whose preset zone admits it, preferring exact fixed-key
/// matches, then fixed keys by distance, then containing key ranges
/// (narrower and closer to center first). When nothing scores, fall back to
/// the nearest zone by key distance, then to any sample-bearing zone. The
/// result always plays at the triggering note's recorded pitch.
pub fn create_from_preset_with_note(
    bank: &Bank,
    bank_num: u16,
    preset_num: u16,
    note: u8,
) -> Result<Instrument, SfError> {
    let bad = || SfError::BadInstrument {
        bank: bank_num,
        program: preset_num,
    };
    let preset_index = bank.find_preset(bank_num, preset_num).ok_or_else(bad)?;

    // Candidate instruments from preset zones covering the note.
    let (bag_start, bag_end) = bank.preset_bag_range(preset_index);
    let mut candidates: Vec<usize> = Vec::new();
    for bag_idx in bag_start..bag_end {
        if candidates.len() >= MAX_NOTE_CANDIDATES {
            break;
        }
        let (gs, ge) = bank.preset_gen_range(bag_idx);
        let key_raw = find_in_range(
            &bank.preset_gens.records,
            gs,
            ge,
            GenTag::KeyRange,
            RANGE_DEFAULT,
        );
        let (lo, hi) = unpack_range(key_raw);
        let keynum = find_in_range(&bank.preset_gens.records, gs, ge, GenTag::Keynum, -1);
        let admits = (lo..=hi).contains(&note) || keynum == note as i16;
        if !admits {
            continue;
        }
        let inst = find_in_range(&bank.preset_gens.records, gs, ge, GenTag::Instrument, -1);
        if inst >= 0 && (inst as usize) < bank.instruments.len() && !candidates.contains(&(inst as usize)) {
            candidates.push(inst as usize);
        }
    }
    if candidates.is_empty() {
        return Err(bad());
    }

    struct Choice {
        inst_index: usize,
        sample_id: u16,
        gen_start: usize,
        gen_end: usize,
    }

    // Scored pass: exact fixed key wins outright.
    let mut best: Option<(i32, Choice)> = None;
    'outer: for &inst in &candidates {
        let (ibag_start, ibag_end) = bank.inst_bag_range(inst);
        for bag_idx in ibag_start..ibag_end {
            let (gs, ge) = bank.inst_gen_range(bag_idx);
            let sample = find_in_range(&bank.inst_gens.records, gs, ge, GenTag::SampleId, -1);
            if sample < 0 || sample as usize >= bank.sample_headers.len() {
                continue;
            }
            let keynum = find_in_range(&bank.inst_gens.records, gs, ge, GenTag::Keynum, -1);
            let key_raw = find_in_range(
                &bank.inst_gens.records,
                gs,
                ge,
                GenTag::KeyRange,
                RANGE_DEFAULT,
            );
            let (lo, hi) = unpack_range(key_raw);

            let score = if (0..=127).contains(&keynum) {
                if keynum == note as i16 {
                    0
                } else {
                    1000 + (note as i32 - keynum as i32).abs()
                }
            } else if (lo..=hi).contains(&note) {
                let width = hi as i32 - lo as i32;
                let mid = (lo as i32 + hi as i32) / 2;
                100_000 + (width << 8) + (note as i32 - mid).abs()
            } else {
                i32::MAX
            };

            if score < best.as_ref().map_or(i32::MAX, |(s, _)| *s) {
                best = Some((
                    score,
                    Choice {
                        inst_index: inst,
                        sample_id: sample as u16,
                        gen_start: gs,
                        gen_end: ge,
                    },
                ));
                if score == 0 {
                    break 'outer;
                }
            }
        }
    }

    // Nearest zone by key distance when nothing contained the note.
    if best.is_none() {
        let mut nearest: Option<(u32, Choice)> = None;
        for &inst in &candidates {
            let (ibag_start, ibag_end) = bank.inst_bag_range(inst);
            for bag_idx in ibag_start..ibag_end {
                let (gs, ge) = bank.inst_gen_range(bag_idx);
                let sample = find_in_range(&bank.inst_gens.records, gs, ge, GenTag::SampleId, -1);
                if sample < 0 || sample as usize >= bank.sample_headers.len() {
                    continue;
                }
                let keynum = find_in_range(&bank.inst_gens.records, gs, ge, GenTag::Keynum, -1);
                let key_raw = find_in_range(
                    &bank.inst_gens.records,
                    gs,
                    ge,
                    GenTag::KeyRange,
                    RANGE_DEFAULT,
                );
                let (lo, hi) = unpack_range(key_raw);
                let dist = if (0..=127).contains(&keynum) {
                    (note as i32 - keynum as i32).unsigned_abs()
                } else if note < lo {
                    (lo - note) as u32
                } else if note > hi {
                    (note - hi) as u32
                } else {
                    0
                };
                if dist < nearest.as_ref().map_or(u32::MAX, |(d, _)| *d) {
                    nearest = Some((
                        dist,
                        Choice {
                            inst_index: inst,
                            sample_id: sample as u16,
                            gen_start: gs,
                            gen_end: ge,
                        },
                    ));
                }
            }
        }
        best = nearest.map(|(d, c)| (d as i32, c));
    }

    let (_, choice) = best.ok_or_else(bad)?;

    let waveform = create_waveform_from_sample(
        bank,
        choice.inst_index,
        choice.sample_id,
        choice.gen_start,
        choice.gen_end,
    )?;
    let mut instrument = blank_instrument(InstrumentKind::Simple(waveform));
    // Percussion one-shots play at the recorded rate, never transposed.
    instrument.play_at_sampled_freq = bank_num == 128;
    fill_zone_records(
        bank,
        choice.inst_index,
        choice.gen_start,
        choice.gen_end,
        &mut instrument,
    );
    if let InstrumentKind::Simple(ref mut w) = instrument.kind {
        w.base_midi_pitch = note as i16;
    }
    Ok(instrument)
}

/// Heuristic kit detection for presets outside bank 128: name hints, many
/// instruments across a wide key span, mostly fixed-key or unit-width
/// zones, or repeated exclusive classes.
pub fn looks_like_drum_kit(bank: &Bank, preset_index: usize) -> bool {
    if preset_index >= bank.presets.len() {
        return false;
    }
    let preset = &bank.presets.records[preset_index];
    if preset.bank == 128 {
        return true;
    }
    let name = preset.name_str();
    if name_contains_ignore_case(&name, "drum")
        || name_contains_ignore_case(&name, "kit")
        || name_contains_ignore_case(&name, "perc")
    {
        return true;
    }

    let (bag_start, bag_end) = bank.preset_bag_range(preset_index);
    let mut inst_count = 0u32;
    let mut min_key = 127u8;
    let mut max_key = 0u8;
    let mut total_zones = 0u32;
    let mut fixed_or_narrow = 0u32;
    let mut exclusive = 0u32;
    for bag_idx in bag_start..bag_end {
        let (gs, ge) = bank.preset_gen_range(bag_idx);
        let inst = find_in_range(&bank.preset_gens.records, gs, ge, GenTag::Instrument, -1);
        if inst < 0 || inst as usize >= bank.instruments.len() {
            continue;
        }
        inst_count += 1;
        let key_raw = find_in_range(
            &bank.preset_gens.records,
            gs,
            ge,
            GenTag::KeyRange,
            RANGE_DEFAULT,
        );
        let (lo, hi) = unpack_range(key_raw);
        min_key = min_key.min(lo);
        max_key = max_key.max(hi);

        let (ibag_start, ibag_end) = bank.inst_bag_range(inst as usize);
        for ibag in ibag_start..ibag_end {
            let (igs, ige) = bank.inst_gen_range(ibag);
            let sample = find_in_range(&bank.inst_gens.records, igs, ige, GenTag::SampleId, -1);
            if sample < 0 || sample as usize >= bank.sample_headers.len() {
                continue;
            }
            total_zones += 1;
            let z_raw = find_in_range(
                &bank.inst_gens.records,
                igs,
                ige,
                GenTag::KeyRange,
                RANGE_DEFAULT,
            );
            let (zlo, zhi) = unpack_range(z_raw);
            let z_keynum = find_in_range(&bank.inst_gens.records, igs, ige, GenTag::Keynum, -1);
            if (0..=127).contains(&z_keynum) || (zlo <= zhi && zhi - zlo <= 1) {
                fixed_or_narrow += 1;
            }
            if find_in_range(&bank.inst_gens.records, igs, ige, GenTag::ExclusiveClass, 0) != 0 {
                exclusive += 1;
            }
        }
    }

    if inst_count >= 8 && max_key > min_key && (max_key - min_key) >= 24 {
        return true;
    }
    if total_zones >= 6 {
        if fixed_or_narrow as f32 / total_zones as f32 >= 0.5 {
            return true;
        }
        if exclusive >= 2 {
            return true;
        }
    }
    false
}
