//! Play-record options
//!
//! Durations in a request are in units of 100 ms. Anything left out falls
//! back to the gateway's [`SignalSettings`].

use std::time::Duration;

use crate::config::SignalSettings;

use super::{Playlist, SignalError, SignalRequest};

const TIME_UNIT_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayRecordOptions {
    pub initial_prompt: Playlist,
    pub reprompt: Playlist,
    pub no_speech_reprompt: Playlist,
    pub failure_announcement: Playlist,
    pub success_announcement: Playlist,
    pub attempts: u32,
    pub record_id: Option<String>,
    pub pre_speech_timer: Duration,
    pub post_speech_timer: Duration,
    pub total_record_length: Duration,
    /// Prompts cannot be interrupted by DTMF
    pub non_interruptible: bool,
    /// Clear buffered digits before the signal starts
    pub clear_digit_buffer: bool,
    pub end_input_key: Option<char>,
    pub restart_key: Option<char>,
    pub reinput_key: Option<char>,
    pub previous_segment_key: Option<char>,
    pub first_segment_key: Option<char>,
    pub current_segment_key: Option<char>,
    pub next_segment_key: Option<char>,
    pub last_segment_key: Option<char>,
    /// Pause inserted before every prompt segment but the first
    pub segment_interval: Duration,
}

impl PlayRecordOptions {
    pub fn new(settings: &SignalSettings) -> Self {
        Self {
            initial_prompt: Playlist::default(),
            reprompt: Playlist::default(),
            no_speech_reprompt: Playlist::default(),
            failure_announcement: Playlist::default(),
            success_announcement: Playlist::default(),
            attempts: 1,
            record_id: None,
            pre_speech_timer: Duration::from_millis(settings.pre_speech_timer_ms),
            post_speech_timer: Duration::from_millis(settings.post_speech_timer_ms),
            total_record_length: Duration::from_millis(settings.total_record_length_ms),
            non_interruptible: false,
            clear_digit_buffer: false,
            end_input_key: Some('#'),
            restart_key: None,
            reinput_key: None,
            previous_segment_key: None,
            first_segment_key: None,
            current_segment_key: None,
            next_segment_key: None,
            last_segment_key: None,
            segment_interval: Duration::from_millis(settings.segment_interval_ms),
        }
    }

    pub fn parse(request: &SignalRequest, settings: &SignalSettings) -> Result<Self, SignalError> {
        let mut options = Self::new(settings);
        for (key, value) in &request.params {
            match key.as_str() {
                "ip" => options.initial_prompt = Playlist::parse(value),
                "rp" => options.reprompt = Playlist::parse(value),
                "nsp" => options.no_speech_reprompt = Playlist::parse(value),
                "fa" => options.failure_announcement = Playlist::parse(value),
                "sa" => options.success_announcement = Playlist::parse(value),
                "na" => {
                    options.attempts = parse_number(key, value)?;
                    if options.attempts == 0 {
                        return Err(SignalError::invalid_option(key, "must be at least 1"));
                    }
                }
                "ri" => options.record_id = Some(value.clone()),
                "prt" => options.pre_speech_timer = parse_units(key, value)?,
                "pst" => options.post_speech_timer = parse_units(key, value)?,
                "rlt" => options.total_record_length = parse_units(key, value)?,
                "ni" => options.non_interruptible = parse_flag(key, value)?,
                "cb" => options.clear_digit_buffer = parse_flag(key, value)?,
                "eik" => options.end_input_key = Some(parse_key(key, value)?),
                "rsk" => options.restart_key = Some(parse_key(key, value)?),
                "rik" => options.reinput_key = Some(parse_key(key, value)?),
                "psk" => options.previous_segment_key = Some(parse_key(key, value)?),
                "fst" => options.first_segment_key = Some(parse_key(key, value)?),
                "cst" => options.current_segment_key = Some(parse_key(key, value)?),
                "nsk" => options.next_segment_key = Some(parse_key(key, value)?),
                "lsk" => options.last_segment_key = Some(parse_key(key, value)?),
                other => return Err(SignalError::invalid_option(other, "unknown option")),
            }
        }
        Ok(options)
    }
}

fn parse_number(key: &str, value: &str) -> Result<u32, SignalError> {
    value
        .parse()
        .map_err(|_| SignalError::invalid_option(key, format!("'{}' is not a number", value)))
}

fn parse_units(key: &str, value: &str) -> Result<Duration, SignalError> {
    let units: u64 = value
        .parse()
        .map_err(|_| SignalError::invalid_option(key, format!("'{}' is not a number", value)))?;
    Ok(Duration::from_millis(units * TIME_UNIT_MS))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, SignalError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(SignalError::invalid_option(key, format!("'{}' is not a boolean", other))),
    }
}

fn parse_key(key: &str, value: &str) -> Result<char, SignalError> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(tone), None) if tone.is_ascii_digit() || matches!(tone, '*' | '#' | 'A'..='D') => Ok(tone),
        _ => Err(SignalError::invalid_option(key, format!("'{}' is not a DTMF key", value))),
    }
}
