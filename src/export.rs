//! Non-realtime export: drives the mixer's file-output service API from a
//! dedicated worker thread, detects end-of-song, drains the encoder, and
//! restores the player's pre-export state.
//!
//! The worker is a state machine over {Priming, Running, Draining,
//! Finalizing}. Priming happens on the caller's thread so start errors are
//! synchronous; the spawned worker then runs Running -> Draining ->
//! Finalizing and always calls `stop_output_to_file` before raising its
//! finished flag. The UI shares exactly two atomics with the worker:
//! `should_stop` (UI to worker) and `finished` (worker to UI).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use crate::dtype::SfError;
use crate::engine::{Compression, FileType, Mixer, Song};

/// Passes of service+1ms sleep after the song starts, letting the
/// sequencer settle before priming proper.
const SETTLE_PASSES: usize = 10;
/// Unconditional priming service calls before the worker starts.
const PRIME_PASSES: usize = 8;
/// Extra priming iterations allowed while the song still reports done.
const PRIME_SAFETY_LIMIT: usize = 32;
const PRIME_SLEEP: Duration = Duration::from_micros(2000);
/// Worker pacing between service iterations.
const SERVICE_SLEEP: Duration = Duration::from_micros(2000);
/// Post-song drain: extra service calls flushing the encoder tail.
const DRAIN_PASSES: usize = 20;
const DRAIN_SLEEP: Duration = Duration::from_micros(5000);
/// MPEG-family teardown waits for this many consecutive polls with a stable
/// device-sample position.
const MPEG_STABLE_POLLS: u32 = 8;
const MPEG_POLL_SLEEP: Duration = Duration::from_micros(11_000);
/// Iterations without device-sample progress (song not done) before the
/// export is declared stalled and cancelled.
const STALL_LIMIT: u32 = 250;

/// Loop count used to restore "loop forever" after export.
const LOOP_FOREVER: i16 = 32767;

/// The user-facing codec menu: label, container, compression.
pub const EXPORT_CODECS: &[(&str, FileType, Compression)] = &[
    ("PCM 16 WAV", FileType::Wav, Compression::None),
    ("FLAC Lossless", FileType::Flac, Compression::Lossless),
    ("128kbps MP3", FileType::Mpeg, Compression::Mpeg128),
    ("192kbps MP3", FileType::Mpeg, Compression::Mpeg192),
    ("256kbps MP3", FileType::Mpeg, Compression::Mpeg256),
    ("320kbps MP3", FileType::Mpeg, Compression::Mpeg320),
    ("96kbps Vorbis", FileType::Vorbis, Compression::Vorbis96),
    ("128kbps Vorbis", FileType::Vorbis, Compression::Vorbis128),
    ("256kbps Vorbis", FileType::Vorbis, Compression::Vorbis256),
    ("320kbps Vorbis", FileType::Vorbis, Compression::Vorbis320),
];

pub fn codec_by_index(index: usize) -> Option<(FileType, Compression)> {
    EXPORT_CODECS.get(index).map(|&(_, f, c)| (f, c))
}

pub fn codec_extension(file_type: FileType) -> &'static str {
    match file_type {
        FileType::Wav => "wav",
        FileType::Flac => "flac",
        FileType::Mpeg => "mp3",
        FileType::Vorbis => "ogg",
    }
}

/// Player-side state captured when export starts and restored when it ends.
#[derive(Debug, Clone, Copy)]
pub struct PlayerState {
    pub song_loaded: bool,
    pub is_audio_file: bool,
    pub is_playing: bool,
    pub loop_enabled: bool,
    pub hardware_engaged: bool,
}

#[derive(Debug, Clone, Copy)]
struct SavedPlayback {
    position_usec: u32,
    was_playing: bool,
    loop_enabled: bool,
    hardware_engaged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportPhase {
    Running,
    Draining,
    Finalizing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

/// Result of tearing an export down: what happened, and whether playback
/// was resumed (mirrors the pre-export playing state on success).
#[derive(Debug)]
pub struct ExportFinish {
    pub outcome: ExportOutcome,
    pub playing: bool,
}

pub struct ExportSession<M: Mixer + 'static, S: Song + 'static> {
    mixer: Arc<M>,
    song: Arc<S>,
    should_stop: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    saved: SavedPlayback,
    worker: Option<JoinHandle<()>>,
    pub path: PathBuf,
    pub file_type: FileType,
}

/// Put the mixer into file-output mode and spawn the worker. On any start
/// failure the file output is stopped and the saved position restored; the
/// song and mixer remain usable.
pub fn start_export<M: Mixer, S: Song>(
    mixer: Arc<M>,
    song: Arc<S>,
    state: PlayerState,
    path: &Path,
    file_type: FileType,
    compression: Compression,
) -> Result<ExportSession<M, S>, SfError> {
    if !state.song_loaded || state.is_audio_file {
        return Err(SfError::NotReady("no MIDI/RMF song loaded".into()));
    }

    let saved = SavedPlayback {
        position_usec: song.microsecond_position(),
        was_playing: state.is_playing,
        loop_enabled: state.loop_enabled,
        hardware_engaged: state.hardware_engaged,
    };

    if state.is_playing {
        song.stop(false);
    }
    // Export must terminate: no looping while the file is being written.
    song.set_loops(0);
    song.set_microsecond_position(0);

    mixer.start_output_to_file(path, file_type, compression)?;

    let restore_on_error = |err: SfError| -> SfError {
        mixer.stop_output_to_file();
        if saved.loop_enabled {
            song.set_loops(LOOP_FOREVER);
        }
        song.set_microsecond_position(saved.position_usec);
        err
    };

    // Export always renders from the top: rewind, preroll, start, with one
    // re-preroll retry as some songs need a second pass after a seek.
    song.stop(false);
    song.set_microsecond_position(0);
    song.preroll();
    if let Err(first) = song.start(0) {
        debug!("export start failed ({}), retrying with re-preroll", first);
        song.stop(false);
        song.set_microsecond_position(0);
        song.preroll();
        song.start(0).map_err(|e| restore_on_error(e))?;
    }

    // Let the sequencer settle so the first notes are not dropped.
    for _ in 0..SETTLE_PASSES {
        let _ = mixer.service_audio_output_to_file();
        thread::sleep(Duration::from_micros(1000));
    }

    // Prime the encoder.
    for _ in 0..PRIME_PASSES {
        mixer
            .service_audio_output_to_file()
            .map_err(|e| restore_on_error(e))?;
    }

    // If the song still reports done, no events have scheduled yet; keep
    // servicing until it comes alive or the safety limit trips.
    let mut safety = 0;
    while song.is_done() && safety < PRIME_SAFETY_LIMIT {
        mixer
            .service_audio_output_to_file()
            .map_err(|e| restore_on_error(e))?;
        thread::sleep(PRIME_SLEEP);
        safety += 1;
    }

    let should_stop = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let failed = Arc::new(AtomicBool::new(false));

    let worker = {
        let mixer = Arc::clone(&mixer);
        let song = Arc::clone(&song);
        let should_stop = Arc::clone(&should_stop);
        let finished = Arc::clone(&finished);
        let failed = Arc::clone(&failed);
        thread::spawn(move || {
            export_worker(&*mixer, &*song, &should_stop, &finished, &failed, file_type)
        })
    };

    Ok(ExportSession {
        mixer,
        song,
        should_stop,
        finished,
        failed,
        saved,
        worker: Some(worker),
        path: path.to_path_buf(),
        file_type,
    })
}

fn export_worker<M: Mixer, S: Song>(
    mixer: &M,
    song: &S,
    should_stop: &AtomicBool,
    finished: &AtomicBool,
    failed: &AtomicBool,
    file_type: FileType,
) {
    let mut phase = ExportPhase::Running;
    let mut last_samples = mixer.device_samples_played();
    let mut stall_iters = 0u32;

    loop {
        match phase {
            ExportPhase::Running => {
                if should_stop.load(Ordering::Acquire) {
                    phase = ExportPhase::Draining;
                    continue;
                }
                if mixer.service_audio_output_to_file().is_err() {
                    failed.store(true, Ordering::Release);
                    phase = ExportPhase::Finalizing;
                    continue;
                }
                let done = song.is_done();
                if !done {
                    // Second service call, matching the host's normal idle
                    // cadence of two passes per tick.
                    if mixer.service_audio_output_to_file().is_err() {
                        failed.store(true, Ordering::Release);
                        phase = ExportPhase::Finalizing;
                        continue;
                    }
                }

                if done {
                    debug!(
                        "song finished at {} us, draining encoder",
                        song.microsecond_position()
                    );
                    phase = ExportPhase::Draining;
                    continue;
                }

                // Stall watch: a song that is not done but produces no new
                // device samples will never finish the file.
                let samples = mixer.device_samples_played();
                if samples == last_samples {
                    stall_iters += 1;
                    if stall_iters >= STALL_LIMIT {
                        warn!("export stalled ({} iterations without progress)", stall_iters);
                        failed.store(true, Ordering::Release);
                        phase = ExportPhase::Draining;
                        continue;
                    }
                } else {
                    stall_iters = 0;
                    last_samples = samples;
                }

                thread::sleep(SERVICE_SLEEP);
            }
            ExportPhase::Draining => {
                // Flush the encoder tail so note releases are not cut off.
                // This runs for natural completion and for cancellation.
                for _ in 0..DRAIN_PASSES {
                    let _ = mixer.service_audio_output_to_file();
                    thread::sleep(DRAIN_SLEEP);
                }
                // MPEG-family encoders buffer deeper: wait for the device
                // sample position to hold still before tearing down.
                if matches!(file_type, FileType::Mpeg | FileType::Vorbis)
                    && !should_stop.load(Ordering::Acquire)
                {
                    let mut last = 0u32;
                    let mut stable = 0u32;
                    while stable < MPEG_STABLE_POLLS && !should_stop.load(Ordering::Acquire) {
                        let _ = mixer.service_audio_output_to_file();
                        thread::sleep(MPEG_POLL_SLEEP);
                        let current = mixer.device_samples_played();
                        if current == last {
                            stable += 1;
                        } else {
                            stable = 0;
                            last = current;
                        }
                    }
                }
                phase = ExportPhase::Finalizing;
            }
            ExportPhase::Finalizing => {
                // The file must be closed before completion is signalled,
                // whatever path led here.
                mixer.stop_output_to_file();
                finished.store(true, Ordering::Release);
                return;
            }
        }
    }
}

impl<M: Mixer, S: Song> ExportSession<M, S> {
    /// UI-side poll. True once the worker has flushed and closed the file.
    pub fn poll_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// True when the worker aborted (service error or stall).
    pub fn poll_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Cancel a running export: the worker still drains and closes the file.
    pub fn cancel(mut self) -> ExportFinish {
        self.should_stop.store(true, Ordering::Release);
        self.teardown(true)
    }

    /// Tear down after natural completion (poll_finished returned true).
    pub fn finish(mut self) -> ExportFinish {
        self.teardown(false)
    }

    fn teardown(&mut self, cancelled: bool) -> ExportFinish {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        // Idempotent with the worker's own stop in Finalizing.
        self.mixer.stop_output_to_file();

        self.song.stop(false);
        if self.saved.loop_enabled {
            self.song.set_loops(LOOP_FOREVER);
        }
        self.song.set_microsecond_position(self.saved.position_usec);

        if self.saved.hardware_engaged {
            if let Err(e) = self.mixer.reengage_audio() {
                warn!("could not re-engage audio hardware after export: {}", e);
            }
        }

        let mut playing = false;
        if self.saved.was_playing {
            self.song.preroll();
            self.song.set_microsecond_position(self.saved.position_usec);
            playing = self.song.start(0).is_ok();
        }

        let outcome = if self.failed.load(Ordering::Acquire) {
            ExportOutcome::Failed("export worker aborted".into())
        } else if cancelled {
            ExportOutcome::Cancelled
        } else {
            ExportOutcome::Completed
        };
        ExportFinish { outcome, playing }
    }
}

impl<M: Mixer, S: Song> Drop for ExportSession<M, S> {
    fn drop(&mut self) {
        // Window close or panic path: the worker must stop and the file must
        // be finalized before the process exits.
        if let Some(worker) = self.worker.take() {
            self.should_stop.store(true, Ordering::Release);
            let _ = worker.join();
            self.mixer.stop_output_to_file();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::Fixed;
    use crate::engine::ReverbType;
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32};
    use std::time::Instant;

    #[derive(Default)]
    struct FakeMixer {
        output_active: AtomicBool,
        service_calls: AtomicU32,
        stop_calls: AtomicU32,
        reengage_calls: AtomicU32,
        device_samples: AtomicU32,
        advance_samples: AtomicBool,
        fail_service: AtomicBool,
    }

    impl FakeMixer {
        fn new(advance: bool) -> FakeMixer {
            let m = FakeMixer::default();
            m.advance_samples.store(advance, Ordering::SeqCst);
            m
        }
    }

    impl Mixer for FakeMixer {
        fn start_output_to_file(
            &self,
            _path: &Path,
            _file_type: FileType,
            _compression: Compression,
        ) -> Result<(), SfError> {
            self.output_active.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn service_audio_output_to_file(&self) -> Result<(), SfError> {
            if self.fail_service.load(Ordering::SeqCst) {
                return Err(SfError::Encoder("forced failure".into()));
            }
            self.service_calls.fetch_add(1, Ordering::SeqCst);
            if self.advance_samples.load(Ordering::SeqCst) {
                self.device_samples.fetch_add(256, Ordering::SeqCst);
            }
            Ok(())
        }
        fn stop_output_to_file(&self) {
            self.output_active.store(false, Ordering::SeqCst);
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
        }
        fn reengage_audio(&self) -> Result<(), SfError> {
            self.reengage_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn idle(&self) {}
        fn set_default_reverb(&self, _reverb: ReverbType) {}
        fn set_master_volume(&self, _volume: Fixed) {}
        fn device_samples_played(&self) -> u32 {
            self.device_samples.load(Ordering::SeqCst)
        }
    }

    struct FakeSong {
        position: AtomicU32,
        loops: AtomicI64,
        started: AtomicU32,
        stopped: AtomicU32,
        prerolls: AtomicU32,
        services_until_done: AtomicI64,
        mixer: Arc<FakeMixer>,
    }

    impl FakeSong {
        fn new(mixer: Arc<FakeMixer>, services_until_done: i64) -> FakeSong {
            FakeSong {
                position: AtomicU32::new(0),
                loops: AtomicI64::new(-1),
                started: AtomicU32::new(0),
                stopped: AtomicU32::new(0),
                prerolls: AtomicU32::new(0),
                services_until_done: AtomicI64::new(services_until_done),
                mixer,
            }
        }
    }

    impl Song for FakeSong {
        fn microsecond_length(&self) -> u32 {
            3_000_000
        }
        fn microsecond_position(&self) -> u32 {
            self.position.load(Ordering::SeqCst)
        }
        fn set_microsecond_position(&self, usec: u32) {
            self.position.store(usec, Ordering::SeqCst);
        }
        fn is_done(&self) -> bool {
            let threshold = self.services_until_done.load(Ordering::SeqCst);
            threshold >= 0 && self.mixer.service_calls.load(Ordering::SeqCst) as i64 >= threshold
        }
        fn is_paused(&self) -> bool {
            false
        }
        fn preroll(&self) {
            self.prerolls.fetch_add(1, Ordering::SeqCst);
        }
        fn start(&self, _delay: u32) -> Result<(), SfError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn stop(&self, _async_stop: bool) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
        fn pause(&self) {}
        fn resume(&self) {}
        fn set_loops(&self, count: i16) {
            self.loops.store(count as i64, Ordering::SeqCst);
        }
        fn set_volume(&self, _volume: Fixed) {}
        fn set_master_tempo(&self, _tempo: Fixed) {}
        fn set_transpose(&self, _semitones: i32) {}
        fn mute_channel(&self, _channel: u8) {}
        fn unmute_channel(&self, _channel: u8) {}
        fn note_on(&self, _channel: u8, _note: u8, _velocity: u8) {}
        fn note_off(&self, _channel: u8, _note: u8, _velocity: u8) {}
        fn key_pressure(&self, _channel: u8, _note: u8, _pressure: u8) {}
        fn control_change(&self, _channel: u8, _controller: u8, _value: u8) {}
        fn program_change(&self, _channel: u8, _program: u8) {}
        fn program_bank_change(&self, _channel: u8, _program: u8, _bank: u8) {}
        fn channel_pressure(&self, _channel: u8, _pressure: u8) {}
        fn pitch_bend(&self, _channel: u8, _lsb: u8, _msb: u8) {}
        fn all_notes_off(&self) {}
        fn channel_program(&self, _channel: u8) -> u8 {
            0
        }
        fn channel_bank(&self, _channel: u8) -> u8 {
            0
        }
    }

    fn loaded_state(playing: bool, looping: bool) -> PlayerState {
        PlayerState {
            song_loaded: true,
            is_audio_file: false,
            is_playing: playing,
            loop_enabled: looping,
            hardware_engaged: true,
        }
    }

    fn wait_finished<M: Mixer, S: Song>(session: &ExportSession<M, S>, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if session.poll_finished() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn not_ready_without_song() {
        let mixer = Arc::new(FakeMixer::new(true));
        let song = Arc::new(FakeSong::new(Arc::clone(&mixer), 100));
        let state = PlayerState {
            song_loaded: false,
            is_audio_file: false,
            is_playing: false,
            loop_enabled: false,
            hardware_engaged: true,
        };
        let err = start_export(
            mixer,
            song,
            state,
            Path::new("out.wav"),
            FileType::Wav,
            Compression::None,
        )
        .err()
        .unwrap();
        assert!(matches!(err, SfError::NotReady(_)));
    }

    #[test]
    fn completes_drains_and_restores_state() {
        let mixer = Arc::new(FakeMixer::new(true));
        let song = Arc::new(FakeSong::new(Arc::clone(&mixer), 200));
        song.set_microsecond_position(1_500_000);

        let session = start_export(
            Arc::clone(&mixer),
            Arc::clone(&song),
            loaded_state(true, true),
            Path::new("out.wav"),
            FileType::Wav,
            Compression::None,
        )
        .unwrap();

        assert!(wait_finished(&session, Duration::from_secs(10)));
        // The worker closed the file before signalling completion.
        assert!(!mixer.output_active.load(Ordering::SeqCst));
        let services_at_done = mixer.service_calls.load(Ordering::SeqCst);
        assert!(services_at_done >= 200 + DRAIN_PASSES as u32);

        let finish = session.finish();
        assert_eq!(finish.outcome, ExportOutcome::Completed);
        assert!(finish.playing, "was playing before export");
        assert_eq!(song.microsecond_position(), 1_500_000);
        assert_eq!(song.loops.load(Ordering::SeqCst), LOOP_FOREVER as i64);
        assert!(mixer.reengage_calls.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn export_rewinds_to_zero_and_disables_loops() {
        let mixer = Arc::new(FakeMixer::new(true));
        let song = Arc::new(FakeSong::new(Arc::clone(&mixer), 50));
        song.set_microsecond_position(2_000_000);

        let session = start_export(
            Arc::clone(&mixer),
            Arc::clone(&song),
            loaded_state(false, false),
            Path::new("out.wav"),
            FileType::Wav,
            Compression::None,
        )
        .unwrap();
        // While running, loops are pinned to zero.
        assert_eq!(song.loops.load(Ordering::SeqCst), 0);
        assert!(wait_finished(&session, Duration::from_secs(10)));
        let finish = session.finish();
        assert_eq!(finish.outcome, ExportOutcome::Completed);
        assert!(!finish.playing);
        // Loop flag was off before export: no loop restore.
        assert_eq!(song.loops.load(Ordering::SeqCst), 0);
        assert_eq!(song.microsecond_position(), 2_000_000);
    }

    #[test]
    fn cancel_still_drains_and_closes_file() {
        let mixer = Arc::new(FakeMixer::new(true));
        // Song never reports done.
        let song = Arc::new(FakeSong::new(Arc::clone(&mixer), -1));

        let session = start_export(
            Arc::clone(&mixer),
            Arc::clone(&song),
            loaded_state(false, false),
            Path::new("out.mp3"),
            FileType::Mpeg,
            Compression::Mpeg128,
        )
        .unwrap();

        thread::sleep(Duration::from_millis(50));
        let services_before = mixer.service_calls.load(Ordering::SeqCst);
        let finish = session.cancel();
        assert_eq!(finish.outcome, ExportOutcome::Cancelled);
        // The drain ran after the cancel flag was raised.
        let services_after = mixer.service_calls.load(Ordering::SeqCst);
        assert!(services_after >= services_before + DRAIN_PASSES as u32);
        assert!(!mixer.output_active.load(Ordering::SeqCst));
        assert!(mixer.stop_calls.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn stalled_export_cancels_within_bounds_and_stops_output() {
        // Device samples never advance and the song is never done.
        let mixer = Arc::new(FakeMixer::new(false));
        let song = Arc::new(FakeSong::new(Arc::clone(&mixer), -1));

        let session = start_export(
            Arc::clone(&mixer),
            Arc::clone(&song),
            loaded_state(false, false),
            Path::new("out.wav"),
            FileType::Wav,
            Compression::None,
        )
        .unwrap();

        // The stall watchdog must trip on its own.
        assert!(wait_finished(&session, Duration::from_secs(20)));
        assert!(session.poll_failed());
        // stop_output_to_file happened before finished was raised.
        assert!(!mixer.output_active.load(Ordering::SeqCst));

        let finish = session.finish();
        assert!(matches!(finish.outcome, ExportOutcome::Failed(_)));
        // Mixer and song remain usable: hardware re-engaged, song stopped.
        assert!(mixer.reengage_calls.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn mpeg_waits_for_stable_device_samples() {
        let mixer = Arc::new(FakeMixer::new(true));
        let song = Arc::new(FakeSong::new(Arc::clone(&mixer), 30));

        let session = start_export(
            Arc::clone(&mixer),
            Arc::clone(&song),
            loaded_state(false, false),
            Path::new("out.mp3"),
            FileType::Mpeg,
            Compression::Mpeg192,
        )
        .unwrap();

        // Freeze the device-sample counter once the song reports done, as a
        // real device does when rendering stops; the stable-poll window can
        // then close and the worker finalize.
        let deadline = Instant::now() + Duration::from_secs(20);
        while !session.poll_finished() && Instant::now() < deadline {
            if song.is_done() {
                mixer.advance_samples.store(false, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(session.poll_finished());
        let finish = session.finish();
        assert_eq!(finish.outcome, ExportOutcome::Completed);
    }

    #[test]
    fn codec_table_maps_index_and_extension() {
        assert_eq!(codec_by_index(0), Some((FileType::Wav, Compression::None)));
        assert_eq!(
            codec_by_index(1),
            Some((FileType::Flac, Compression::Lossless))
        );
        assert_eq!(
            codec_by_index(5),
            Some((FileType::Mpeg, Compression::Mpeg320))
        );
        assert_eq!(
            codec_by_index(9),
            Some((FileType::Vorbis, Compression::Vorbis320))
        );
        assert_eq!(codec_by_index(10), None);
        assert_eq!(codec_extension(FileType::Vorbis), "ogg");
    }
}
