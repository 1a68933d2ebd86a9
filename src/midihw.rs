//! MIDI-input service thread.
//!
//! External MIDI events arrive on a channel and are forwarded to the engine
//! in FIFO order. Mute state filters note-ons and most controllers, but
//! Note-Off is always forwarded (a muted channel must not hold stuck notes)
//! and All Sound Off / All Notes Off bypass mute entirely. The per-channel
//! active-note array exists only for visualization; its stores are relaxed
//! and a frame of staleness is acceptable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, TryRecvError};
use log::debug;

use crate::engine::Song;
use crate::record::MidiCapture;

/// Idle sleep when the input queue is empty.
const IDLE_SLEEP: Duration = Duration::from_micros(2000);

/// A raw channel-voice message from the input device.
#[derive(Debug, Clone, Copy)]
pub struct RawMidiEvent {
    pub bytes: [u8; 3],
    pub len: u8,
}

impl RawMidiEvent {
    pub fn new(bytes: &[u8]) -> RawMidiEvent {
        let mut buf = [0u8; 3];
        let len = bytes.len().min(3);
        buf[..len].copy_from_slice(&bytes[..len]);
        RawMidiEvent {
            bytes: buf,
            len: len as u8,
        }
    }
}

/// Channel state shared between the UI, the service thread, and the
/// visualization. Enabled flags gate forwarding; active notes are a
/// best-effort mirror of what is sounding.
pub struct ChannelState {
    pub enabled: [AtomicBool; 16],
    pub active_notes: [[AtomicBool; 128]; 16],
}

impl Default for ChannelState {
    fn default() -> Self {
        ChannelState::new()
    }
}

impl ChannelState {
    pub fn new() -> ChannelState {
        ChannelState {
            enabled: std::array::from_fn(|_| AtomicBool::new(true)),
            active_notes: std::array::from_fn(|_| std::array::from_fn(|_| AtomicBool::new(false))),
        }
    }

    pub fn is_enabled(&self, channel: u8) -> bool {
        self.enabled[channel as usize & 0x0F].load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, channel: u8, enabled: bool) {
        self.enabled[channel as usize & 0x0F].store(enabled, Ordering::Relaxed);
    }

    fn set_note(&self, channel: u8, note: u8, on: bool) {
        self.active_notes[channel as usize & 0x0F][note as usize & 0x7F]
            .store(on, Ordering::Relaxed);
    }

    pub fn note_is_active(&self, channel: u8, note: u8) -> bool {
        self.active_notes[channel as usize & 0x0F][note as usize & 0x7F].load(Ordering::Relaxed)
    }

    pub fn clear_channel(&self, channel: u8) {
        for note in &self.active_notes[channel as usize & 0x0F] {
            note.store(false, Ordering::Relaxed);
        }
    }
}

pub struct MidiService {
    quit: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MidiService {
    /// Spawn the service thread. It drains `events` until the sender hangs
    /// up or `stop` is called.
    pub fn start<S: Song + 'static>(
        events: Receiver<RawMidiEvent>,
        song: Arc<S>,
        channels: Arc<ChannelState>,
        capture: Arc<Mutex<Option<MidiCapture>>>,
    ) -> MidiService {
        let quit = Arc::new(AtomicBool::new(false));
        let thread_quit = Arc::clone(&quit);
        let handle = thread::spawn(move || {
            service_loop(events, &*song, &channels, &capture, &thread_quit);
        });
        MidiService {
            quit,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.quit.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MidiService {
    fn drop(&mut self) {
        self.quit.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn service_loop<S: Song>(
    events: Receiver<RawMidiEvent>,
    song: &S,
    channels: &ChannelState,
    capture: &Mutex<Option<MidiCapture>>,
    quit: &AtomicBool,
) {
    loop {
        if quit.load(Ordering::Acquire) {
            return;
        }
        match events.try_recv() {
            Ok(event) => handle_event(event, song, channels, capture),
            Err(TryRecvError::Empty) => thread::sleep(IDLE_SLEEP),
            Err(TryRecvError::Disconnected) => return,
        }
    }
}

fn record_event(capture: &Mutex<Option<MidiCapture>>, status: u8, data1: u8, data2: u8) {
    let mut guard = capture.lock().unwrap();
    if let Some(active) = guard.as_mut() {
        if let Err(e) = active.record(status, data1, data2) {
            debug!("midi capture write failed: {}", e);
        }
    }
}

fn handle_event<S: Song>(
    event: RawMidiEvent,
    song: &S,
    channels: &ChannelState,
    capture: &Mutex<Option<MidiCapture>>,
) {
    if event.len < 1 {
        return;
    }
    let status = event.bytes[0];
    let kind = status & 0xF0;
    let channel = status & 0x0F;
    let data1 = event.bytes[1];
    let data2 = event.bytes[2];
    let enabled = channels.is_enabled(channel);

    match kind {
        0x80 => {
            if event.len < 3 {
                return;
            }
            // Note-Off goes through regardless of mute: a channel muted
            // mid-note must still release.
            song.note_off(channel, data1, 0);
            channels.set_note(channel, data1, false);
            record_event(capture, status, data1, data2);
        }
        0x90 => {
            if event.len < 3 {
                return;
            }
            if data2 == 0 {
                // Running-status style note-off.
                song.note_off(channel, data1, 0);
                channels.set_note(channel, data1, false);
            } else if enabled {
                song.note_on(channel, data1, data2);
                channels.set_note(channel, data1, true);
            }
            record_event(capture, status, data1, data2);
        }
        0xA0 => {
            if event.len < 3 {
                return;
            }
            if enabled {
                song.key_pressure(channel, data1, data2);
            }
            record_event(capture, status, data1, data2);
        }
        0xB0 => {
            if event.len < 3 {
                return;
            }
            if data1 == 120 || data1 == 123 {
                // All Sound Off / All Notes Off bypass mute to prevent
                // hanging notes.
                song.control_change(channel, data1, data2);
                channels.clear_channel(channel);
            } else if enabled {
                song.control_change(channel, data1, data2);
            }
            record_event(capture, status, data1, data2);
        }
        0xC0 => {
            if event.len < 2 {
                return;
            }
            if enabled {
                song.program_change(channel, data1);
            }
            record_event(capture, status, data1, 0);
        }
        0xD0 => {
            if event.len < 2 {
                return;
            }
            if enabled {
                song.channel_pressure(channel, data1);
            }
            record_event(capture, status, data1, 0);
        }
        0xE0 => {
            if event.len < 3 {
                return;
            }
            if enabled {
                song.pitch_bend(channel, data1, data2);
            }
            record_event(capture, status, data1, data2);
        }
        _ => {
            // System messages are not forwarded.
        }
    }
}

/// Stop-song hygiene: sustain off, All Sound Off, All Notes Off on every
/// channel, an explicit Note-Off for everything believed to be sounding,
/// and a cleared visualization map.
pub fn quiet_song<S: Song>(song: &S, channels: &ChannelState) {
    for channel in 0..16u8 {
        song.control_change(channel, 64, 0);
        song.control_change(channel, 120, 0);
        song.control_change(channel, 123, 0);
        for note in 0..128u8 {
            if channels.note_is_active(channel, note) {
                song.note_off(channel, note, 0);
            }
        }
        channels.clear_channel(channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::{Fixed, SfError};
    use crossbeam_channel::unbounded;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct ScriptedSong {
        notes_on: StdMutex<Vec<(u8, u8, u8)>>,
        notes_off: StdMutex<Vec<(u8, u8)>>,
        controls: StdMutex<Vec<(u8, u8, u8)>>,
        programs: StdMutex<Vec<(u8, u8)>>,
        all_off_calls: AtomicU32,
    }

    impl Song for ScriptedSong {
        fn microsecond_length(&self) -> u32 {
            0
        }
        fn microsecond_position(&self) -> u32 {
            0
        }
        fn set_microsecond_position(&self, _usec: u32) {}
        fn is_done(&self) -> bool {
            true
        }
        fn is_paused(&self) -> bool {
            false
        }
        fn preroll(&self) {}
        fn start(&self, _delay: u32) -> Result<(), SfError> {
            Ok(())
        }
        fn stop(&self, _async_stop: bool) {}
        fn pause(&self) {}
        fn resume(&self) {}
        fn set_loops(&self, _count: i16) {}
        fn set_volume(&self, _volume: Fixed) {}
        fn set_master_tempo(&self, _tempo: Fixed) {}
        fn set_transpose(&self, _semitones: i32) {}
        fn mute_channel(&self, _channel: u8) {}
        fn unmute_channel(&self, _channel: u8) {}
        fn note_on(&self, channel: u8, note: u8, velocity: u8) {
            self.notes_on.lock().unwrap().push((channel, note, velocity));
        }
        fn note_off(&self, channel: u8, note: u8, _velocity: u8) {
            self.notes_off.lock().unwrap().push((channel, note));
        }
        fn key_pressure(&self, _channel: u8, _note: u8, _pressure: u8) {}
        fn control_change(&self, channel: u8, controller: u8, value: u8) {
            self.controls.lock().unwrap().push((channel, controller, value));
        }
        fn program_change(&self, channel: u8, program: u8) {
            self.programs.lock().unwrap().push((channel, program));
        }
        fn program_bank_change(&self, _channel: u8, _program: u8, _bank: u8) {}
        fn channel_pressure(&self, _channel: u8, _pressure: u8) {}
        fn pitch_bend(&self, _channel: u8, _lsb: u8, _msb: u8) {}
        fn all_notes_off(&self) {
            self.all_off_calls.fetch_add(1, Ordering::SeqCst);
        }
        fn channel_program(&self, _channel: u8) -> u8 {
            0
        }
        fn channel_bank(&self, _channel: u8) -> u8 {
            0
        }
    }

    fn drain(service: MidiService) {
        thread::sleep(Duration::from_millis(50));
        service.stop();
    }

    #[test]
    fn forwards_events_in_fifo_order() {
        let (tx, rx) = unbounded();
        let song = Arc::new(ScriptedSong::default());
        let channels = Arc::new(ChannelState::new());
        let capture = Arc::new(Mutex::new(None));
        let service = MidiService::start(rx, Arc::clone(&song), Arc::clone(&channels), capture);

        tx.send(RawMidiEvent::new(&[0x90, 60, 100])).unwrap();
        tx.send(RawMidiEvent::new(&[0x90, 64, 90])).unwrap();
        tx.send(RawMidiEvent::new(&[0x80, 60, 0])).unwrap();
        drain(service);

        assert_eq!(
            *song.notes_on.lock().unwrap(),
            vec![(0, 60, 100), (0, 64, 90)]
        );
        assert_eq!(*song.notes_off.lock().unwrap(), vec![(0, 60)]);
        assert!(channels.note_is_active(0, 64));
        assert!(!channels.note_is_active(0, 60));
    }

    #[test]
    fn note_off_bypasses_mute_but_note_on_does_not() {
        let (tx, rx) = unbounded();
        let song = Arc::new(ScriptedSong::default());
        let channels = Arc::new(ChannelState::new());
        channels.set_enabled(2, false);
        let capture = Arc::new(Mutex::new(None));
        let service = MidiService::start(rx, Arc::clone(&song), Arc::clone(&channels), capture);

        tx.send(RawMidiEvent::new(&[0x92, 40, 100])).unwrap();
        tx.send(RawMidiEvent::new(&[0x82, 41, 0])).unwrap();
        drain(service);

        assert!(song.notes_on.lock().unwrap().is_empty());
        assert_eq!(*song.notes_off.lock().unwrap(), vec![(2, 41)]);
    }

    #[test]
    fn all_notes_off_controllers_bypass_mute() {
        let (tx, rx) = unbounded();
        let song = Arc::new(ScriptedSong::default());
        let channels = Arc::new(ChannelState::new());
        channels.set_enabled(1, false);
        let capture = Arc::new(Mutex::new(None));
        let service = MidiService::start(rx, Arc::clone(&song), Arc::clone(&channels), capture);

        tx.send(RawMidiEvent::new(&[0xB1, 120, 0])).unwrap();
        tx.send(RawMidiEvent::new(&[0xB1, 123, 0])).unwrap();
        tx.send(RawMidiEvent::new(&[0xB1, 7, 100])).unwrap(); // muted, dropped
        drain(service);

        assert_eq!(
            *song.controls.lock().unwrap(),
            vec![(1, 120, 0), (1, 123, 0)]
        );
    }

    #[test]
    fn quiet_song_releases_every_tracked_note() {
        let song = ScriptedSong::default();
        let channels = ChannelState::new();
        channels.set_note(3, 60, true);
        channels.set_note(3, 64, true);
        quiet_song(&song, &channels);

        let controls = song.controls.lock().unwrap();
        // CC64, CC120, CC123 on all 16 channels.
        assert_eq!(controls.len(), 48);
        assert!(controls.contains(&(3, 64, 0)));
        let offs = song.notes_off.lock().unwrap();
        assert_eq!(*offs, vec![(3, 60), (3, 64)]);
        assert!(!channels.note_is_active(3, 60));
    }

    #[test]
    fn capture_receives_forwarded_events() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("in.mid");
        let temp_path = dir.path().join("in.tmp");
        let programs = [(0u8, 0u8); 16];
        let capture = Arc::new(Mutex::new(Some(
            MidiCapture::start(&final_path, &temp_path, &programs).unwrap(),
        )));

        let (tx, rx) = unbounded();
        let song = Arc::new(ScriptedSong::default());
        let channels = Arc::new(ChannelState::new());
        let service =
            MidiService::start(rx, Arc::clone(&song), Arc::clone(&channels), Arc::clone(&capture));
        tx.send(RawMidiEvent::new(&[0x90, 60, 100])).unwrap();
        tx.send(RawMidiEvent::new(&[0x80, 60, 0])).unwrap();
        drain(service);

        let taken = capture.lock().unwrap().take().unwrap();
        taken.finalize().unwrap();
        let bytes = std::fs::read(&final_path).unwrap();
        let smf = midly::Smf::parse(&bytes).unwrap();
        let note_ons = smf.tracks[0]
            .iter()
            .filter(|e| {
                matches!(
                    e.kind,
                    midly::TrackEventKind::Midi {
                        message: midly::MidiMessage::NoteOn { .. },
                        ..
                    }
                )
            })
            .count();
        assert_eq!(note_ons, 1);
    }
}
