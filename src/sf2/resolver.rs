//! Generator resolution across the four SF2 scopes: preset-global,
//! preset-local, instrument-global, instrument-local.
//!
//! Two distinct semantics exist. Override generators (key/velocity ranges,
//! sample selection, root key, fixed key, sample modes) are decided by
//! *presence*: a generator written in a more specific scope wins outright,
//! which requires scanning the range for the tag rather than comparing the
//! looked-up value with a sentinel (a legal override can equal the default).
//! Everything else is additive: the instrument-level effective value plus
//! whatever the preset level contributes.

use super::{Bank, GenTag, Generator};

/// Linear scan of `gens[start..end)` for `tag`; `default` when absent.
pub fn find_in_range(
    gens: &[Generator],
    start: usize,
    end: usize,
    tag: GenTag,
    default: i16,
) -> i16 {
    let end = end.min(gens.len());
    for gen in gens.iter().take(end).skip(start.min(end)) {
        if gen.tag == tag as u16 {
            return gen.amount;
        }
    }
    default
}

/// Presence test over `gens[start..end)`.
pub fn has_in_range(gens: &[Generator], start: usize, end: usize, tag: GenTag) -> bool {
    let end = end.min(gens.len());
    gens.iter()
        .take(end)
        .skip(start.min(end))
        .any(|gen| gen.tag == tag as u16)
}

fn is_override(tag: GenTag) -> bool {
    matches!(
        tag,
        GenTag::KeyRange
            | GenTag::VelRange
            | GenTag::SampleId
            | GenTag::OverridingRootKey
            | GenTag::Keynum
            | GenTag::SampleModes
    )
}

fn is_inst_additive(tag: GenTag) -> bool {
    matches!(
        tag,
        GenTag::CoarseTune
            | GenTag::FineTune
            | GenTag::InitialAttenuation
            | GenTag::ModLfoToPitch
            | GenTag::ModLfoToVolume
            | GenTag::ModLfoToFilterFc
            | GenTag::VibLfoToPitch
            | GenTag::ModEnvToPitch
            | GenTag::ModEnvToFilterFc
    )
}

/// The first instrument bag is a global zone iff its generator range carries
/// no SAMPLE_ID.
pub fn inst_global_gen_range(bank: &Bank, inst_index: usize) -> Option<(usize, usize)> {
    if inst_index >= bank.instruments.len() {
        return None;
    }
    let (bag_start, bag_end) = bank.inst_bag_range(inst_index);
    if bag_start >= bag_end {
        return None;
    }
    let (gen_start, gen_end) = bank.inst_gen_range(bag_start);
    if has_in_range(&bank.inst_gens.records, gen_start, gen_end, GenTag::SampleId) {
        None
    } else {
        Some((gen_start, gen_end))
    }
}

/// The first preset bag is a global zone iff its generator range carries no
/// INSTRUMENT.
pub fn preset_global_gen_range(bank: &Bank, preset_index: usize) -> Option<(usize, usize)> {
    if preset_index >= bank.presets.len() {
        return None;
    }
    let (bag_start, bag_end) = bank.preset_bag_range(preset_index);
    if bag_start >= bag_end {
        return None;
    }
    let (gen_start, gen_end) = bank.preset_gen_range(bag_start);
    if has_in_range(
        &bank.preset_gens.records,
        gen_start,
        gen_end,
        GenTag::Instrument,
    ) {
        None
    } else {
        Some((gen_start, gen_end))
    }
}

/// Instrument-level resolution: local zone merged with the instrument's
/// global zone. Override tags are decided by presence in the local zone;
/// tuning/attenuation/LFO-depth tags add; the rest take local-if-set else
/// global.
pub fn find_inst_merged(
    bank: &Bank,
    inst_index: usize,
    local_start: usize,
    local_end: usize,
    tag: GenTag,
    default: i16,
) -> i16 {
    let gens = &bank.inst_gens.records;
    let local = find_in_range(gens, local_start, local_end, tag, default);

    if is_override(tag) && has_in_range(gens, local_start, local_end, tag) {
        return local;
    }

    let global = match inst_global_gen_range(bank, inst_index) {
        Some((gs, ge)) => find_in_range(gens, gs, ge, tag, default),
        None => default,
    };

    if is_inst_additive(tag) {
        return local.saturating_add(global);
    }

    if local != default {
        local
    } else {
        global
    }
}

/// Full resolution: preset-global + preset-local over the instrument-level
/// effective value. Range/instrument selectors override only when the preset
/// actually writes them; everything else adds the preset contribution.
#[allow(clippy::too_many_arguments)]
pub fn find_effective(
    bank: &Bank,
    preset_index: usize,
    inst_index: usize,
    preset_gen_start: usize,
    preset_gen_end: usize,
    inst_local_start: usize,
    inst_local_end: usize,
    tag: GenTag,
    default: i16,
) -> i16 {
    let inst_value = find_inst_merged(
        bank,
        inst_index,
        inst_local_start,
        inst_local_end,
        tag,
        default,
    );

    let pgens = &bank.preset_gens.records;
    let preset_global = match preset_global_gen_range(bank, preset_index) {
        Some((gs, ge)) => find_in_range(pgens, gs, ge, tag, 0),
        None => 0,
    };
    let preset_local = find_in_range(pgens, preset_gen_start, preset_gen_end, tag, preset_global);

    if matches!(tag, GenTag::KeyRange | GenTag::VelRange | GenTag::Instrument) {
        let preset_has_local = has_in_range(pgens, preset_gen_start, preset_gen_end, tag);
        return if preset_has_local {
            preset_local
        } else {
            inst_value
        };
    }

    inst_value.saturating_add(preset_local)
}

/// Locate the contiguous run of preset bags inside `preset_index` that
/// reference `inst_index`, and return their combined generator range.
///
/// A single instrument is often referenced by several adjacent preset bags
/// (velocity splits), so the range spans from the first matching bag's
/// generators to the bag after the last match. Some files also place a
/// VEL_RANGE on the bag immediately before the INSTRUMENT-bearing one; when
/// that prior bag carries no INSTRUMENT generator it is pulled into the
/// range as well.
pub fn preset_gen_range_for_instrument(
    bank: &Bank,
    preset_index: usize,
    inst_index: usize,
) -> Option<(usize, usize)> {
    if preset_index >= bank.presets.len() {
        return None;
    }
    let (bag_start, bag_end) = bank.preset_bag_range(preset_index);
    let mut first_match = None;
    let mut last_match = None;
    for bag_idx in bag_start..bag_end {
        let (gs, ge) = bank.preset_gen_range(bag_idx);
        let bag_inst =
            find_in_range(&bank.preset_gens.records, gs, ge, GenTag::Instrument, -1);
        if bag_inst == inst_index as i16 {
            if first_match.is_none() {
                first_match = Some(bag_idx);
            }
            last_match = Some(bag_idx);
        }
    }
    let (first, last) = (first_match?, last_match?);

    let (mut gen_start, _) = bank.preset_gen_range(first);
    let after_last = last + 1;
    let gen_end = if after_last < bank.preset_bags.len() {
        bank.preset_bags.records[after_last].gen_index as usize
    } else {
        bank.preset_gens.len()
    };

    if first > bag_start {
        let prev = first - 1;
        let (pgs, pge) = bank.preset_gen_range(prev);
        let prev_inst =
            find_in_range(&bank.preset_gens.records, pgs, pge, GenTag::Instrument, -1);
        if prev_inst == -1 {
            gen_start = pgs;
        }
    }

    Some((gen_start, gen_end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sf2::testbank::BankImage;
    use crate::sf2::RANGE_DEFAULT;

    fn two_zone_bank() -> Bank {
        let mut image = BankImage::new();
        let s0 = image.add_sample("low", &[0i16; 64], 22050, 48, None);
        let s1 = image.add_sample("high", &[0i16; 64], 22050, 72, None);
        let inst = image.add_instrument("Split");
        // Global zone: fine tune +25, attenuation 30 cB, no sample.
        image.inst_zone(&[(GenTag::FineTune, 25), (GenTag::InitialAttenuation, 30)]);
        image.inst_zone(&[
            (GenTag::KeyRange, 0x3B00),
            (GenTag::FineTune, 5),
            (GenTag::SampleId, s0 as i16),
        ]);
        image.inst_zone(&[
            (GenTag::KeyRange, 0x7F3C),
            (GenTag::SampleId, s1 as i16),
        ]);
        image.add_preset("Split", 0, 0);
        image.preset_zone(&[(GenTag::FineTune, -10), (GenTag::Instrument, inst as i16)]);
        image.load()
    }

    #[test]
    fn find_and_has_in_range() {
        let bank = two_zone_bank();
        let gens = &bank.inst_gens.records;
        let (gs, ge) = bank.inst_gen_range(1);
        assert_eq!(find_in_range(gens, gs, ge, GenTag::FineTune, 0), 5);
        assert_eq!(find_in_range(gens, gs, ge, GenTag::CoarseTune, 7), 7);
        assert!(has_in_range(gens, gs, ge, GenTag::KeyRange));
        assert!(!has_in_range(gens, gs, ge, GenTag::VelRange));
    }

    #[test]
    fn global_zone_detection() {
        let bank = two_zone_bank();
        let global = inst_global_gen_range(&bank, 0).expect("global zone");
        assert_eq!(
            find_in_range(
                &bank.inst_gens.records,
                global.0,
                global.1,
                GenTag::FineTune,
                0
            ),
            25
        );
        // The preset has no global zone: its only bag carries INSTRUMENT.
        assert!(preset_global_gen_range(&bank, 0).is_none());
    }

    #[test]
    fn additive_local_plus_global() {
        let bank = two_zone_bank();
        let (gs, ge) = bank.inst_gen_range(1);
        // local 5 + global 25
        assert_eq!(find_inst_merged(&bank, 0, gs, ge, GenTag::FineTune, 0), 30);
        // zone 2 has no local fine tune: 0 + 25
        let (gs2, ge2) = bank.inst_gen_range(2);
        assert_eq!(find_inst_merged(&bank, 0, gs2, ge2, GenTag::FineTune, 0), 25);
        // attenuation only in global
        assert_eq!(
            find_inst_merged(&bank, 0, gs2, ge2, GenTag::InitialAttenuation, 0),
            30
        );
    }

    #[test]
    fn override_presence_beats_global() {
        let mut image = BankImage::new();
        let s0 = image.add_sample("a", &[0i16; 16], 22050, 60, None);
        let inst = image.add_instrument("I");
        // Global zone sets a key range; local zone overrides with the full
        // default-looking range, which must still win because it is present.
        image.inst_zone(&[(GenTag::KeyRange, 0x3000)]);
        image.inst_zone(&[
            (GenTag::KeyRange, RANGE_DEFAULT),
            (GenTag::SampleId, s0 as i16),
        ]);
        image.add_preset("P", 0, 0);
        image.preset_zone(&[(GenTag::Instrument, inst as i16)]);
        let bank = image.load();

        let (gs, ge) = bank.inst_gen_range(1);
        assert_eq!(
            find_inst_merged(&bank, 0, gs, ge, GenTag::KeyRange, RANGE_DEFAULT),
            RANGE_DEFAULT
        );
    }

    #[test]
    fn effective_adds_preset_contribution() {
        let bank = two_zone_bank();
        let (ps, pe) = preset_gen_range_for_instrument(&bank, 0, 0).unwrap();
        let (gs, ge) = bank.inst_gen_range(1);
        // inst (5 + 25) + preset (-10) = 20
        assert_eq!(
            find_effective(&bank, 0, 0, ps, pe, gs, ge, GenTag::FineTune, 0),
            20
        );
    }

    #[test]
    fn preset_range_override_only_when_present() {
        let mut image = BankImage::new();
        let s0 = image.add_sample("a", &[0i16; 16], 22050, 60, None);
        let inst = image.add_instrument("I");
        image.inst_zone(&[(GenTag::KeyRange, 0x4530), (GenTag::SampleId, s0 as i16)]);
        image.add_preset("P", 0, 0);
        image.preset_zone(&[(GenTag::KeyRange, 0x7F60), (GenTag::Instrument, inst as i16)]);
        let bank = image.load();

        let (ps, pe) = preset_gen_range_for_instrument(&bank, 0, 0).unwrap();
        let (gs, ge) = bank.inst_gen_range(0);
        // Preset writes KEY_RANGE, so it wins over the instrument's.
        assert_eq!(
            find_effective(&bank, 0, 0, ps, pe, gs, ge, GenTag::KeyRange, RANGE_DEFAULT),
            0x7F60
        );
        // VEL_RANGE is present nowhere: instrument default falls through.
        assert_eq!(
            find_effective(&bank, 0, 0, ps, pe, gs, ge, GenTag::VelRange, RANGE_DEFAULT),
            RANGE_DEFAULT
        );
    }

    #[test]
    fn preset_bag_aggregation_spans_velocity_splits() {
        let mut image = BankImage::new();
        let s0 = image.add_sample("a", &[0i16; 16], 22050, 60, None);
        let inst = image.add_instrument("I");
        image.inst_zone(&[(GenTag::SampleId, s0 as i16)]);
        image.add_preset("P", 0, 0);
        // Two adjacent preset bags referencing the same instrument with
        // different velocity ranges.
        image.preset_zone(&[(GenTag::VelRange, 0x3F00), (GenTag::Instrument, inst as i16)]);
        image.preset_zone(&[(GenTag::VelRange, 0x7F40), (GenTag::Instrument, inst as i16)]);
        let bank = image.load();

        let (ps, pe) = preset_gen_range_for_instrument(&bank, 0, 0).unwrap();
        assert_eq!((ps, pe), (0, 4));
    }

    #[test]
    fn prior_bag_without_instrument_is_included() {
        let mut image = BankImage::new();
        let s0 = image.add_sample("a", &[0i16; 16], 22050, 60, None);
        let inst0 = image.add_instrument("I0");
        image.inst_zone(&[(GenTag::SampleId, s0 as i16)]);
        let inst1 = image.add_instrument("I1");
        image.inst_zone(&[(GenTag::SampleId, s0 as i16)]);
        image.add_preset("P", 0, 0);
        // First bag pins instrument 0 so the stray bag is not the preset's
        // first (global) bag.
        image.preset_zone(&[(GenTag::Instrument, inst0 as i16)]);
        image.preset_zone(&[(GenTag::VelRange, 0x3F00)]);
        image.preset_zone(&[(GenTag::Instrument, inst1 as i16)]);
        let bank = image.load();

        let (ps, pe) = preset_gen_range_for_instrument(&bank, 0, inst1 as usize).unwrap();
        assert!(has_in_range(
            &bank.preset_gens.records,
            ps,
            pe,
            GenTag::VelRange
        ));
    }
}
