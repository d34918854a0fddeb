//! Play-record signal (`AU/pr`)
//!
//! Plays a prompt, then records the caller, retrying up to `na` attempts.
//!
//! ```text
//! LOADING_PLAYLIST -> PROMPTING -> COLLECTING -> SUCCEEDING -> [PLAYING_SUCCESS] -> SUCCEEDED
//!                                      |
//!                                      +-> FAILING -> (attempts left) -> REPROMPTING | NO_SPEECH_REPROMPTING
//!                                             |                         | PROMPTING | COLLECTING
//!                                             +-> [PLAYING_FAILURE] -> FAILED
//! ```
//!
//! Media events and timers never touch the machine directly. They are
//! posted to the control scheduler as tasks tagged with the phase that
//! produced them, so an event raised by an exited phase is dropped.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::media::{
    ListenerRef, MediaEvent, MediaGroup, MediaListener, RecordStop, ResourceError, ResourceKind,
};
use crate::notify::{EventSink, ObservedEvent};
use crate::scheduler::{Queue, Reschedule, Scheduler, Task, TaskHandle};

use super::{PlayRecordOptions, Playlist, ReturnCode, Signal, SignalContext, SignalError};

const PACKAGE: &str = "AU";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayRecordState {
    Idle,
    LoadingPlaylist,
    Prompting,
    Reprompting,
    NoSpeechReprompting,
    Collecting,
    Succeeding,
    PlayingSuccess,
    Succeeded,
    Failing,
    PlayingFailure,
    Failed,
    Canceled,
}

impl PlayRecordState {
    /// States that play a prompt before collection
    pub fn is_prompt(self) -> bool {
        matches!(
            self,
            PlayRecordState::Prompting | PlayRecordState::Reprompting | PlayRecordState::NoSpeechReprompting
        )
    }

    /// States that hold the player
    fn plays(self) -> bool {
        self.is_prompt() || matches!(self, PlayRecordState::PlayingSuccess | PlayRecordState::PlayingFailure)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PlayRecordState::Succeeded | PlayRecordState::Failed | PlayRecordState::Canceled)
    }
}

impl fmt::Display for PlayRecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayRecordState::Idle => "IDLE",
            PlayRecordState::LoadingPlaylist => "LOADING_PLAYLIST",
            PlayRecordState::Prompting => "PROMPTING",
            PlayRecordState::Reprompting => "REPROMPTING",
            PlayRecordState::NoSpeechReprompting => "NO_SPEECH_REPROMPTING",
            PlayRecordState::Collecting => "COLLECTING",
            PlayRecordState::Succeeding => "SUCCEEDING",
            PlayRecordState::PlayingSuccess => "PLAYING_SUCCESS",
            PlayRecordState::Succeeded => "SUCCEEDED",
            PlayRecordState::Failing => "FAILING",
            PlayRecordState::PlayingFailure => "PLAYING_FAILURE",
            PlayRecordState::Failed => "FAILED",
            PlayRecordState::Canceled => "CANCELED",
        };
        f.write_str(name)
    }
}

/// Why an attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    NoSpeech,
    MaxDuration,
    Restart,
    Reinput,
    BadAudio,
    Unspecified,
}

impl Failure {
    fn is_retryable(self) -> bool {
        matches!(self, Failure::NoSpeech | Failure::MaxDuration | Failure::Restart | Failure::Reinput)
    }

    fn return_code(self) -> ReturnCode {
        match self {
            Failure::NoSpeech => ReturnCode::NoSpeech,
            Failure::MaxDuration => ReturnCode::SpokeTooLong,
            Failure::Restart | Failure::Reinput => ReturnCode::MaxAttemptsExceeded,
            Failure::BadAudio => ReturnCode::BadAudioId,
            Failure::Unspecified => ReturnCode::UnspecifiedFailure,
        }
    }
}

impl From<&ResourceError> for Failure {
    fn from(error: &ResourceError) -> Self {
        match error {
            ResourceError::MalformedUri { .. } | ResourceError::Unavailable { .. } => Failure::BadAudio,
            _ => Failure::Unspecified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timeout {
    NoSpeech,
    MaxDuration,
}

#[derive(Debug)]
enum Input {
    Media { phase: u64, event: MediaEvent },
    Detector(MediaEvent),
    Timeout { phase: u64, timeout: Timeout },
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Phase(u64),
    Detector,
}

#[derive(Debug, Clone, Copy)]
enum Navigation {
    Previous,
    First,
    Current,
    Next,
    Last,
}

/// Play-record signal bound to one endpoint
pub struct PlayRecord {
    name: String,
    fsm: Arc<Mutex<PlayRecordFsm>>,
}

impl fmt::Debug for PlayRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fsm = self.fsm.lock();
        f.debug_struct("PlayRecord")
            .field("endpoint", &fsm.endpoint)
            .field("state", &fsm.state)
            .field("attempt", &fsm.attempt)
            .finish()
    }
}

impl PlayRecord {
    pub fn new(options: PlayRecordOptions, context: SignalContext) -> Arc<Self> {
        let fsm = Arc::new_cyclic(|this| {
            Mutex::new(PlayRecordFsm {
                endpoint: context.endpoint,
                options,
                media: context.media,
                scheduler: context.scheduler,
                sink: context.sink,
                this: this.clone(),
                state: PlayRecordState::Idle,
                history: Vec::new(),
                phase: 0,
                attempt: 1,
                return_code: None,
                speech_detected: false,
                digits: String::new(),
                timers: Vec::new(),
            })
        });
        Arc::new(Self { name: format!("{}/pr", PACKAGE), fsm })
    }

    pub fn state(&self) -> PlayRecordState {
        self.fsm.lock().state
    }

    /// Every state entered so far, in order
    pub fn history(&self) -> Vec<PlayRecordState> {
        self.fsm.lock().history.clone()
    }

    /// Current attempt, starting at 1
    pub fn attempt(&self) -> u32 {
        self.fsm.lock().attempt
    }

    pub fn return_code(&self) -> Option<ReturnCode> {
        self.fsm.lock().return_code
    }

    /// Digits collected during the current attempt
    pub fn digits(&self) -> String {
        self.fsm.lock().digits.clone()
    }
}

impl Drop for PlayRecord {
    fn drop(&mut self) {
        // A success announcement started by cancel ends with its last handle
        let mut fsm = self.fsm.lock();
        if matches!(fsm.state, PlayRecordState::Succeeding | PlayRecordState::PlayingSuccess) {
            fsm.finish_succeeded();
        }
    }
}

impl Signal for PlayRecord {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self) -> Result<(), SignalError> {
        let mut fsm = self.fsm.lock();
        if fsm.state != PlayRecordState::Idle {
            return Err(SignalError::AlreadyExecuted { name: self.name.clone() });
        }
        fsm.start();
        Ok(())
    }

    fn cancel(&self) {
        self.fsm.lock().cancel();
    }

    fn is_active(&self) -> bool {
        !self.fsm.lock().state.is_terminal()
    }
}

struct PlayRecordFsm {
    endpoint: String,
    options: PlayRecordOptions,
    media: Arc<Mutex<MediaGroup>>,
    scheduler: Scheduler,
    sink: Arc<dyn EventSink>,
    this: Weak<Mutex<PlayRecordFsm>>,
    state: PlayRecordState,
    history: Vec<PlayRecordState>,
    /// Incremented on every phase change; tags listeners and timers
    phase: u64,
    attempt: u32,
    return_code: Option<ReturnCode>,
    speech_detected: bool,
    digits: String,
    timers: Vec<TaskHandle>,
}

impl PlayRecordFsm {
    fn transition(&mut self, to: PlayRecordState) {
        trace!(endpoint = %self.endpoint, from = %self.state, to = %to, "play-record transition");
        self.state = to;
        self.history.push(to);
    }

    fn next_phase(&mut self) {
        self.phase += 1;
        for timer in self.timers.drain(..) {
            timer.cancel();
        }
    }

    fn listener(&self, source: Source) -> ListenerRef {
        Arc::new(SignalListener { fsm: self.this.clone(), scheduler: self.scheduler.clone(), source })
    }

    fn start(&mut self) {
        debug!(endpoint = %self.endpoint, attempts = self.options.attempts, "starting play-record");
        self.transition(PlayRecordState::LoadingPlaylist);
        self.attempt = 1;
        self.activate_detector();

        if self.options.initial_prompt.is_empty() {
            self.enter_collecting();
        } else {
            self.enter_prompt(PlayRecordState::Prompting);
        }
    }

    /// The detector lives for the whole signal so prompts can be navigated
    /// and interrupted
    fn activate_detector(&mut self) {
        let listener = self.listener(Source::Detector);
        let clear = self.options.clear_digit_buffer;
        let result = {
            let mut media = self.media.lock();
            media.detector().and_then(|detector| {
                if clear {
                    detector.clear_digits();
                }
                detector.add_listener(listener)?;
                detector.activate()
            })
        };

        match result {
            Ok(()) => {}
            Err(ResourceError::NotSupported { .. }) => {
                debug!(endpoint = %self.endpoint, "no DTMF detector, keypad input disabled");
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, "DTMF detector unavailable: {}", e);
                self.media.lock().release_detector();
            }
        }
    }

    fn playlist_mut(&mut self) -> Option<&mut Playlist> {
        let options = &mut self.options;
        match self.state {
            PlayRecordState::Prompting => Some(&mut options.initial_prompt),
            PlayRecordState::Reprompting => Some(&mut options.reprompt),
            PlayRecordState::NoSpeechReprompting => Some(&mut options.no_speech_reprompt),
            PlayRecordState::PlayingSuccess => Some(&mut options.success_announcement),
            PlayRecordState::PlayingFailure => Some(&mut options.failure_announcement),
            _ => None,
        }
    }

    fn enter_prompt(&mut self, state: PlayRecordState) {
        self.transition(state);
        self.next_phase();

        let first = self.playlist_mut().and_then(|playlist| {
            playlist.rewind();
            playlist.next().map(str::to_string)
        });
        match first {
            Some(segment) => self.play(&segment, Duration::ZERO),
            None => self.on_prompt_end(),
        }
    }

    fn play(&mut self, segment: &str, delay: Duration) {
        trace!(endpoint = %self.endpoint, segment, "playing segment");
        let listener = self.listener(Source::Phase(self.phase));
        let result = {
            let mut media = self.media.lock();
            media.player().and_then(|player| {
                player.remove_listener();
                player.deactivate();
                player.add_listener(listener)?;
                player.set_initial_delay(delay);
                player.set_url(segment)?;
                player.activate()
            })
        };

        if let Err(e) = result {
            warn!(endpoint = %self.endpoint, segment, "Could not play segment: {}", e);
            self.play_failed(Failure::from(&e));
        }
    }

    fn play_failed(&mut self, failure: Failure) {
        self.release_player();
        match self.state {
            PlayRecordState::PlayingSuccess => self.finish_succeeded(),
            PlayRecordState::PlayingFailure => self.finish_failed(),
            _ => self.fail(failure),
        }
    }

    fn on_segment_end(&mut self) {
        let interval = self.options.segment_interval;
        let next = self.playlist_mut().and_then(|playlist| playlist.next().map(str::to_string));
        match next {
            Some(segment) => self.play(&segment, interval),
            None => self.on_prompt_end(),
        }
    }

    fn on_prompt_end(&mut self) {
        self.release_player();
        match self.state {
            PlayRecordState::PlayingSuccess => self.finish_succeeded(),
            PlayRecordState::PlayingFailure => self.finish_failed(),
            state if state.is_prompt() => self.enter_collecting(),
            _ => {}
        }
    }

    fn enter_collecting(&mut self) {
        self.transition(PlayRecordState::Collecting);
        self.next_phase();
        self.speech_detected = false;

        let listener = self.listener(Source::Phase(self.phase));
        let options = &self.options;
        let result = {
            let mut media = self.media.lock();
            let result = media.recorder().and_then(|recorder| {
                recorder.set_max_record_time(options.total_record_length);
                recorder.set_pre_speech_timer(options.pre_speech_timer);
                recorder.set_post_speech_timer(options.post_speech_timer);
                if let Some(uri) = &options.record_id {
                    recorder.set_record_file(uri, false)?;
                }
                recorder.add_listener(listener)?;
                recorder.activate()
            });
            if result.is_ok() && media.borrowed().contains(&ResourceKind::DtmfDetector) {
                if let Ok(detector) = media.detector() {
                    detector.flush_buffer();
                }
            }
            result
        };

        match result {
            Ok(()) => {
                let pre_speech = self.options.pre_speech_timer;
                let total = self.options.total_record_length;
                self.start_timer(Timeout::NoSpeech, pre_speech);
                self.start_timer(Timeout::MaxDuration, total);
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, "Could not start recording: {}", e);
                self.exit_collecting();
                self.fail(Failure::from(&e));
            }
        }
    }

    fn exit_collecting(&mut self) {
        self.next_phase();
        self.media.lock().release_recorder();
    }

    fn start_timer(&mut self, timeout: Timeout, delay: Duration) {
        let task = SignalTask {
            fsm: self.this.clone(),
            input: Some(Input::Timeout { phase: self.phase, timeout }),
        };
        let handle = self.scheduler.schedule(task, Queue::Management, delay);
        self.timers.push(handle);
    }

    fn handle(&mut self, input: Input) {
        if self.state.is_terminal() {
            return;
        }

        match input {
            Input::Media { phase, event } => {
                if phase != self.phase {
                    trace!(endpoint = %self.endpoint, event = %event, "dropping event from an exited phase");
                    return;
                }
                self.on_media(event);
            }
            Input::Detector(MediaEvent::Tone(tone)) => self.on_tone(tone),
            Input::Detector(_) => {}
            Input::Timeout { phase, timeout } => {
                if phase != self.phase || self.state != PlayRecordState::Collecting {
                    return;
                }
                match timeout {
                    Timeout::NoSpeech if !self.speech_detected => {
                        debug!(endpoint = %self.endpoint, attempt = self.attempt, "no speech detected");
                        self.exit_collecting();
                        self.fail(Failure::NoSpeech);
                    }
                    Timeout::NoSpeech => {}
                    Timeout::MaxDuration => {
                        debug!(endpoint = %self.endpoint, attempt = self.attempt, "maximum record length exceeded");
                        self.exit_collecting();
                        self.fail(Failure::MaxDuration);
                    }
                }
            }
        }
    }

    fn on_media(&mut self, event: MediaEvent) {
        match (self.state, event) {
            (state, MediaEvent::PlayerStopped) if state.plays() => self.on_segment_end(),
            (state, MediaEvent::PlayerFailed { reason }) if state.plays() => {
                warn!(endpoint = %self.endpoint, "Player failed: {}", reason);
                self.play_failed(Failure::BadAudio);
            }
            (PlayRecordState::Collecting, MediaEvent::SpeechDetected) => {
                trace!(endpoint = %self.endpoint, "speech detected");
                self.speech_detected = true;
            }
            (PlayRecordState::Collecting, MediaEvent::RecorderStopped(stop)) => {
                self.exit_collecting();
                match stop {
                    RecordStop::Completed | RecordStop::Deactivated if self.speech_detected => self.succeed(),
                    RecordStop::Completed | RecordStop::Deactivated | RecordStop::NoSpeech => {
                        self.fail(Failure::NoSpeech)
                    }
                    RecordStop::MaxDuration => self.fail(Failure::MaxDuration),
                }
            }
            (PlayRecordState::Collecting, MediaEvent::RecorderFailed { reason }) => {
                warn!(endpoint = %self.endpoint, "Recorder failed: {}", reason);
                self.exit_collecting();
                self.fail(Failure::Unspecified);
            }
            (state, event) => trace!(endpoint = %self.endpoint, state = %state, event = %event, "ignoring media event"),
        }
    }

    fn on_tone(&mut self, tone: char) {
        if self.state.is_prompt() {
            self.on_prompt_key(tone);
        } else if self.state == PlayRecordState::Collecting {
            self.on_collect_key(tone);
        }
    }

    fn navigation(&self, tone: char) -> Option<Navigation> {
        let options = &self.options;
        let key = Some(tone);
        if key == options.previous_segment_key {
            Some(Navigation::Previous)
        } else if key == options.first_segment_key {
            Some(Navigation::First)
        } else if key == options.current_segment_key {
            Some(Navigation::Current)
        } else if key == options.next_segment_key {
            Some(Navigation::Next)
        } else if key == options.last_segment_key {
            Some(Navigation::Last)
        } else {
            None
        }
    }

    fn on_prompt_key(&mut self, tone: char) {
        if let Some(navigation) = self.navigation(tone) {
            trace!(endpoint = %self.endpoint, ?navigation, "prompt navigation");
            let segment = self.playlist_mut().and_then(|playlist| {
                let segment = match navigation {
                    Navigation::Previous => playlist.previous(),
                    Navigation::First => playlist.first(),
                    Navigation::Current => playlist.current(),
                    Navigation::Next => playlist.next(),
                    Navigation::Last => playlist.last(),
                };
                segment.map(str::to_string)
            });
            self.next_phase();
            match segment {
                Some(segment) => self.play(&segment, Duration::ZERO),
                None => self.on_prompt_end(),
            }
            return;
        }

        if self.options.non_interruptible {
            trace!(endpoint = %self.endpoint, tone = %tone, "prompt is not interruptible");
            return;
        }

        debug!(endpoint = %self.endpoint, tone = %tone, "prompt interrupted");
        self.release_player();
        self.enter_collecting();
        if self.state == PlayRecordState::Collecting {
            self.on_collect_key(tone);
        }
    }

    fn on_collect_key(&mut self, tone: char) {
        let key = Some(tone);
        if key == self.options.restart_key {
            self.exit_collecting();
            self.fail(Failure::Restart);
        } else if key == self.options.reinput_key {
            self.exit_collecting();
            self.fail(Failure::Reinput);
        } else if key == self.options.end_input_key {
            self.exit_collecting();
            self.succeed();
        } else {
            self.digits.push(tone);
        }
    }

    fn succeed(&mut self) {
        self.transition(PlayRecordState::Succeeding);
        self.next_phase();
        self.return_code = Some(ReturnCode::Success);

        if self.options.success_announcement.is_empty() {
            self.finish_succeeded();
        } else {
            self.enter_prompt(PlayRecordState::PlayingSuccess);
        }
    }

    fn fail(&mut self, failure: Failure) {
        self.transition(PlayRecordState::Failing);
        self.next_phase();

        if failure.is_retryable() && self.attempt < self.options.attempts {
            self.attempt += 1;
            debug!(endpoint = %self.endpoint, attempt = self.attempt, ?failure, "retrying play-record");
            self.discard_recording();
            self.speech_detected = false;
            self.digits.clear();
            self.retry(failure);
            return;
        }

        let code = failure.return_code();
        self.return_code = Some(code);
        if self.options.failure_announcement.is_empty() {
            self.finish_failed();
        } else {
            self.enter_prompt(PlayRecordState::PlayingFailure);
        }
    }

    fn retry(&mut self, failure: Failure) {
        let options = &self.options;
        let candidates = match failure {
            Failure::NoSpeech => vec![
                (!options.no_speech_reprompt.is_empty(), PlayRecordState::NoSpeechReprompting),
                (!options.reprompt.is_empty(), PlayRecordState::Reprompting),
                (!options.initial_prompt.is_empty(), PlayRecordState::Prompting),
            ],
            Failure::Restart | Failure::MaxDuration => vec![
                (!options.reprompt.is_empty(), PlayRecordState::Reprompting),
                (!options.initial_prompt.is_empty(), PlayRecordState::Prompting),
            ],
            _ => Vec::new(),
        };

        match candidates.iter().find(|(available, _)| *available) {
            Some((_, state)) => self.enter_prompt(*state),
            None => self.enter_collecting(),
        }
    }

    fn discard_recording(&mut self) {
        let Some(uri) = self.options.record_id.clone() else {
            return;
        };
        let result = {
            let mut media = self.media.lock();
            let result = media.recorder().and_then(|recorder| recorder.discard(&uri));
            media.release_recorder();
            result
        };
        if let Err(e) = result {
            warn!(endpoint = %self.endpoint, uri = %uri, "Failed to delete partial recording: {}", e);
        }
    }

    fn release_player(&mut self) {
        self.media.lock().release_player();
    }

    fn release_all(&mut self) {
        self.next_phase();
        let mut media = self.media.lock();
        media.release_player();
        media.release_recorder();
        media.release_detector();
    }

    fn finish_succeeded(&mut self) {
        self.transition(PlayRecordState::Succeeded);
        self.release_all();
        self.return_code = Some(ReturnCode::Success);

        let mut event = ObservedEvent::new(PACKAGE, "oc")
            .with_param("rc", ReturnCode::Success)
            .with_param("na", self.attempt)
            .with_param("vi", false);
        if let Some(record_id) = &self.options.record_id {
            event = event.with_param("ri", record_id);
        }
        info!(endpoint = %self.endpoint, event = %event, "play-record succeeded");
        self.sink.on_event(event);
    }

    fn finish_failed(&mut self) {
        self.transition(PlayRecordState::Failed);
        self.release_all();
        let code = *self.return_code.get_or_insert(ReturnCode::UnspecifiedFailure);

        let event = ObservedEvent::new(PACKAGE, "of").with_param("rc", code).with_param("na", self.attempt);
        info!(endpoint = %self.endpoint, event = %event, "play-record failed");
        self.sink.on_event(event);
    }

    fn cancel(&mut self) {
        match self.state {
            PlayRecordState::Idle => self.transition(PlayRecordState::Canceled),
            state if state.is_terminal() => {}
            PlayRecordState::Collecting if self.speech_detected => {
                debug!(endpoint = %self.endpoint, "cancelled after speech, completing");
                self.transition(PlayRecordState::Canceled);
                self.exit_collecting();
                self.succeed();
            }
            _ => {
                debug!(endpoint = %self.endpoint, state = %self.state, "cancelling play-record");
                self.transition(PlayRecordState::Canceled);
                self.release_all();
                if self.speech_detected {
                    self.finish_succeeded();
                } else {
                    self.return_code = Some(ReturnCode::NoSpeech);
                    self.finish_failed();
                }
            }
        }
    }
}

/// Forwards media events to the control scheduler
struct SignalListener {
    fsm: Weak<Mutex<PlayRecordFsm>>,
    scheduler: Scheduler,
    source: Source,
}

impl MediaListener for SignalListener {
    fn on_media_event(&self, event: MediaEvent) {
        let input = match self.source {
            Source::Phase(phase) => Input::Media { phase, event },
            Source::Detector => Input::Detector(event),
        };
        self.scheduler.submit(SignalTask { fsm: self.fsm.clone(), input: Some(input) }, Queue::Management);
    }
}

struct SignalTask {
    fsm: Weak<Mutex<PlayRecordFsm>>,
    input: Option<Input>,
}

impl Task for SignalTask {
    fn name(&self) -> &str {
        "play-record-event"
    }

    fn run(&mut self, _now: Duration) -> Reschedule {
        if let (Some(fsm), Some(input)) = (self.fsm.upgrade(), self.input.take()) {
            fsm.lock().handle(input);
        }
        Reschedule::Done
    }
}
