//! Session description offer/answer
//!
//! Only the subset of SDP a media gateway needs to negotiate a single audio
//! stream: origin, connection address, one `m=audio` line with its payload
//! formats, `rtpmap` attributes and the direction attribute.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::ConnectionMode;

/// SDP errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SdpError {
    #[error("Malformed SDP line '{line}': {reason}")]
    Malformed { line: String, reason: String },

    #[error("SDP carries no audio media description")]
    MissingMedia,

    #[error("Unsupported transport: {transport}")]
    UnsupportedTransport { transport: String },

    #[error("No common codec")]
    NoCommonCodec,
}

impl SdpError {
    pub fn malformed(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed { line: line.into(), reason: reason.into() }
    }
}

pub const RTP_AVP: &str = "RTP/AVP";

/// An RTP payload format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    pub payload: u8,
    pub name: String,
    pub clock_rate: u32,
}

impl Format {
    pub fn new(payload: u8, name: impl Into<String>, clock_rate: u32) -> Self {
        Self { payload, name: name.into(), clock_rate }
    }

    pub fn pcmu() -> Self {
        Self::new(0, "PCMU", 8000)
    }

    pub fn pcma() -> Self {
        Self::new(8, "PCMA", 8000)
    }

    pub fn telephone_event() -> Self {
        Self::new(101, "telephone-event", 8000)
    }

    /// Payload formats with a fixed assignment
    pub fn from_static(payload: u8) -> Option<Self> {
        match payload {
            0 => Some(Self::pcmu()),
            8 => Some(Self::pcma()),
            _ => None,
        }
    }

    /// Whether this format carries audio rather than DTMF events
    pub fn is_audio(&self) -> bool {
        !self.name.is_empty() && !self.name.eq_ignore_ascii_case("telephone-event")
    }

    fn matches(&self, other: &Format) -> bool {
        self.name.eq_ignore_ascii_case(&other.name) && self.clock_rate == other.clock_rate
    }
}

/// One `m=` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    pub media: String,
    pub port: u16,
    pub transport: String,
    pub formats: Vec<Format>,
    pub address: Option<String>,
    pub direction: Option<String>,
}

/// A parsed or locally generated session description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub session_id: u64,
    pub version: u64,
    pub address: String,
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    /// Build a local description for one audio stream
    pub fn local(
        session_id: u64,
        version: u64,
        address: &str,
        port: u16,
        formats: Vec<Format>,
        mode: ConnectionMode,
    ) -> Self {
        Self {
            session_id,
            version,
            address: address.to_string(),
            media: vec![MediaDescription {
                media: "audio".to_string(),
                port,
                transport: RTP_AVP.to_string(),
                formats,
                address: None,
                direction: Some(direction_for(mode).to_string()),
            }],
        }
    }

    pub fn audio(&self) -> Option<&MediaDescription> {
        self.media.iter().find(|m| m.media == "audio")
    }

    /// Address and port the remote side expects media on
    pub fn audio_target(&self) -> Option<(String, u16)> {
        self.audio().map(|media| {
            let address = media.address.clone().unwrap_or_else(|| self.address.clone());
            (address, media.port)
        })
    }
}

pub(crate) fn direction_for(mode: ConnectionMode) -> &'static str {
    match mode {
        ConnectionMode::SendOnly => "sendonly",
        ConnectionMode::RecvOnly => "recvonly",
        ConnectionMode::Inactive => "inactive",
        _ => "sendrecv",
    }
}

fn parse_address(line: &str, value: &str) -> Result<String, SdpError> {
    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("IN"), Some(_), Some(address)) => Ok(address.to_string()),
        _ => Err(SdpError::malformed(line, "expected 'IN <addrtype> <address>'")),
    }
}

impl FromStr for SessionDescription {
    type Err = SdpError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut sdp = SessionDescription {
            session_id: 0,
            version: 0,
            address: String::new(),
            media: Vec::new(),
        };

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (key, value) = line
                .split_once('=')
                .filter(|(key, _)| key.len() == 1)
                .ok_or_else(|| SdpError::malformed(line, "expected '<type>=<value>'"))?;

            match key {
                "o" => {
                    let fields: Vec<&str> = value.split_whitespace().collect();
                    if fields.len() < 6 {
                        return Err(SdpError::malformed(line, "origin needs six fields"));
                    }
                    sdp.session_id = fields[1].parse().unwrap_or(0);
                    sdp.version = fields[2].parse().unwrap_or(0);
                }
                "c" => {
                    let address = parse_address(line, value)?;
                    match sdp.media.last_mut() {
                        Some(media) => media.address = Some(address),
                        None => sdp.address = address,
                    }
                }
                "m" => {
                    let fields: Vec<&str> = value.split_whitespace().collect();
                    if fields.len() < 3 {
                        return Err(SdpError::malformed(line, "media needs media, port and transport"));
                    }
                    let port = fields[1]
                        .split('/')
                        .next()
                        .and_then(|p| p.parse::<u16>().ok())
                        .ok_or_else(|| SdpError::malformed(line, "invalid port"))?;
                    let mut formats = Vec::new();
                    for payload in &fields[3..] {
                        let payload: u8 = payload
                            .parse()
                            .map_err(|_| SdpError::malformed(line, "invalid payload type"))?;
                        formats.push(Format::from_static(payload).unwrap_or(Format {
                            payload,
                            name: String::new(),
                            clock_rate: 0,
                        }));
                    }
                    sdp.media.push(MediaDescription {
                        media: fields[0].to_string(),
                        port,
                        transport: fields[2].to_string(),
                        formats,
                        address: None,
                        direction: None,
                    });
                }
                "a" => {
                    let Some(media) = sdp.media.last_mut() else {
                        continue;
                    };
                    if let Some(rtpmap) = value.strip_prefix("rtpmap:") {
                        let (payload, encoding) = rtpmap
                            .split_once(' ')
                            .ok_or_else(|| SdpError::malformed(line, "invalid rtpmap"))?;
                        let payload: u8 = payload
                            .parse()
                            .map_err(|_| SdpError::malformed(line, "invalid rtpmap payload"))?;
                        let mut encoding = encoding.split('/');
                        let name = encoding.next().unwrap_or_default().to_string();
                        let clock_rate = encoding.next().and_then(|r| r.parse().ok()).unwrap_or(8000);
                        if let Some(format) = media.formats.iter_mut().find(|f| f.payload == payload) {
                            format.name = name;
                            format.clock_rate = clock_rate;
                        }
                    } else if matches!(value, "sendrecv" | "sendonly" | "recvonly" | "inactive") {
                        media.direction = Some(value.to_string());
                    }
                }
                _ => {}
            }
        }

        if sdp.media.is_empty() {
            return Err(SdpError::MissingMedia);
        }
        if sdp.address.is_empty() && sdp.media.iter().all(|m| m.address.is_none()) {
            return Err(SdpError::malformed(text.lines().next().unwrap_or_default(), "missing connection address"));
        }
        Ok(sdp)
    }
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "v=0")?;
        writeln!(f, "o=- {} {} IN IP4 {}", self.session_id, self.version, self.address)?;
        writeln!(f, "s=-")?;
        writeln!(f, "c=IN IP4 {}", self.address)?;
        writeln!(f, "t=0 0")?;
        for media in &self.media {
            write!(f, "m={} {} {}", media.media, media.port, media.transport)?;
            for format in &media.formats {
                write!(f, " {}", format.payload)?;
            }
            writeln!(f)?;
            if let Some(address) = &media.address {
                writeln!(f, "c=IN IP4 {}", address)?;
            }
            for format in &media.formats {
                writeln!(f, "a=rtpmap:{} {}/{}", format.payload, format.name, format.clock_rate)?;
                if !format.is_audio() {
                    writeln!(f, "a=fmtp:{} 0-15", format.payload)?;
                }
            }
            if let Some(direction) = &media.direction {
                writeln!(f, "a={}", direction)?;
            }
        }
        Ok(())
    }
}

/// Select the formats both sides support, in the remote side's order.
///
/// Payload numbers follow the remote description so the answer lines up
/// with the offer. Fails unless at least one audio codec is shared.
pub fn negotiate(remote: &SessionDescription, supported: &[Format]) -> Result<Vec<Format>, SdpError> {
    let audio = remote.audio().ok_or(SdpError::MissingMedia)?;
    if !audio.transport.eq_ignore_ascii_case(RTP_AVP) {
        return Err(SdpError::UnsupportedTransport { transport: audio.transport.clone() });
    }

    let common: Vec<Format> = audio
        .formats
        .iter()
        .filter(|offered| supported.iter().any(|local| local.matches(offered)))
        .cloned()
        .collect();

    if !common.iter().any(Format::is_audio) {
        return Err(SdpError::NoCommonCodec);
    }
    Ok(common)
}
