//! sfmix: a SoundFont 2 bank compiler and export pipeline for a
//! General-MIDI mixer engine.
//!
//! The crate loads SF2 patch banks, compiles their preset/instrument zone
//! layering into the engine's instrument records (envelopes, LFOs,
//! modulation curves, keymap splits), resolves (bank, program) requests
//! across multiple loaded banks, and drives the host mixer's non-realtime
//! service API to render songs into WAV/FLAC/MP3/Ogg files on a worker
//! thread. The tone generator itself is host-side, behind the traits in
//! [`engine`].

pub mod binutils;
pub mod dtype;
pub mod engine;
pub mod export;
pub mod manager;
pub mod math;
pub mod midihw;
pub mod record;
pub mod settings;
pub mod sf2;
