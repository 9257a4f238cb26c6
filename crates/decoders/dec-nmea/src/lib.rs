//! NMEA 0183 decoder plugin.
//!
//! Turns one terminated line into an [`NmeaSentence`], the closed set of GPS
//! sentence kinds the engine publishes as updates. Well-formed sentences of
//! any other kind are reported as unrecognized so they can be surfaced as
//! UNKNOWN events.

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::todo
)]

use core_types::{gps_debug, gps_warn, DecodeResult, Decoder};
use nmea::sentences::{GgaData, GllData, GsaData, GsvData, RmcData, TxtData, VtgData};
use nmea::ParseResult;

const LOG_TARGET: &str = "nmea_parser";

/// Tag of a supported sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SentenceKind {
    Gga,
    Gll,
    Gsa,
    Gsv,
    Rmc,
    Txt,
    Vtg,
}

impl SentenceKind {
    pub const ALL: [SentenceKind; 7] = [
        SentenceKind::Gga,
        SentenceKind::Gll,
        SentenceKind::Gsa,
        SentenceKind::Gsv,
        SentenceKind::Rmc,
        SentenceKind::Txt,
        SentenceKind::Vtg,
    ];

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    /// Three-letter sentence formatter, e.g. "GGA".
    pub fn id(self) -> &'static str {
        match self {
            SentenceKind::Gga => "GGA",
            SentenceKind::Gll => "GLL",
            SentenceKind::Gsa => "GSA",
            SentenceKind::Gsv => "GSV",
            SentenceKind::Rmc => "RMC",
            SentenceKind::Txt => "TXT",
            SentenceKind::Vtg => "VTG",
        }
    }
}

impl std::fmt::Display for SentenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// A decoded sentence of one of the supported kinds.
#[derive(Debug)]
pub enum NmeaSentence {
    /// Fix data: time, position, fix quality, satellites, altitude.
    Gga(GgaData),
    /// Geographic position.
    Gll(GllData),
    /// DOP and active satellites.
    Gsa(GsaData),
    /// Satellites in view.
    Gsv(GsvData),
    /// Recommended minimum data, with the magnetic variation fields.
    Rmc {
        data: RmcData,
        magnetic_variation: Option<MagneticVariation>,
    },
    /// Receiver text message.
    Txt(TxtData),
    /// Track made good and ground speed.
    Vtg(VtgData),
}

impl NmeaSentence {
    pub fn kind(&self) -> SentenceKind {
        match self {
            NmeaSentence::Gga(_) => SentenceKind::Gga,
            NmeaSentence::Gll(_) => SentenceKind::Gll,
            NmeaSentence::Gsa(_) => SentenceKind::Gsa,
            NmeaSentence::Gsv(_) => SentenceKind::Gsv,
            NmeaSentence::Rmc { .. } => SentenceKind::Rmc,
            NmeaSentence::Txt(_) => SentenceKind::Txt,
            NmeaSentence::Vtg(_) => SentenceKind::Vtg,
        }
    }

    fn from_parse_result(result: ParseResult, sentence: &str) -> Option<Self> {
        match result {
            ParseResult::GGA(data) => Some(NmeaSentence::Gga(data)),
            ParseResult::GLL(data) => Some(NmeaSentence::Gll(data)),
            ParseResult::GSA(data) => Some(NmeaSentence::Gsa(data)),
            ParseResult::GSV(data) => Some(NmeaSentence::Gsv(data)),
            ParseResult::RMC(data) => Some(NmeaSentence::Rmc {
                data,
                magnetic_variation: rmc_magnetic_variation(sentence),
            }),
            ParseResult::TXT(data) => Some(NmeaSentence::Txt(data)),
            ParseResult::VTG(data) => Some(NmeaSentence::Vtg(data)),
            _ => None,
        }
    }
}

pub struct NmeaDecoder;

impl NmeaDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NmeaDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NmeaDecoder {
    type Record = NmeaSentence;

    fn decode(&mut self, line: &[u8]) -> DecodeResult<NmeaSentence> {
        // NMEA is ASCII
        let Ok(text) = std::str::from_utf8(line) else {
            return DecodeResult::NoData;
        };
        let sentence = text.trim_matches(|c: char| c.is_ascii_whitespace() || c == '\0');

        let Some(id) = sentence_id(sentence) else {
            gps_debug!(target: LOG_TARGET, "no sentence in {:?}", sentence);
            return DecodeResult::NoData;
        };

        let Some(kind) = SentenceKind::from_id(id) else {
            if !checksum_matches(sentence) {
                gps_warn!(target: LOG_TARGET, "{} sentence fails its checksum", id);
                return DecodeResult::Rejected { errors: 1 };
            }
            return DecodeResult::UnrecognizedTag(id.to_string());
        };

        match nmea::parse_str(sentence) {
            Ok(result) => match NmeaSentence::from_parse_result(result, sentence) {
                Some(record) => DecodeResult::Record(record),
                None => DecodeResult::UnrecognizedTag(id.to_string()),
            },
            Err(e) => {
                gps_warn!(target: LOG_TARGET, "{} sentence contains errors: {:?}", kind, e);
                DecodeResult::Rejected { errors: 1 }
            }
        }
    }

    fn id(&self) -> &'static str {
        "nmea"
    }

    fn name(&self) -> &'static str {
        "NMEA 0183"
    }
}

/// Sentence formatter of `$<talker><formatter>,...`, or the whole address
/// for proprietary (`$P...`) sentences.
fn sentence_id(sentence: &str) -> Option<&str> {
    let body = sentence.strip_prefix('$')?;
    let address = body.split([',', '*']).next()?;

    if address.starts_with('P') {
        return Some(address).filter(|a| a.len() > 1);
    }
    if address.len() != 5 || !address.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    address.get(2..)
}

/// XOR of everything between '$' and '*' against the hex digits after '*'.
/// Sentences without a checksum field pass.
fn checksum_matches(sentence: &str) -> bool {
    let body = sentence.strip_prefix('$').unwrap_or(sentence);
    let Some((payload, checksum)) = body.split_once('*') else {
        return true;
    };
    let Ok(expected) = u8::from_str_radix(checksum.trim(), 16) else {
        return false;
    };
    payload.bytes().fold(0u8, |acc, b| acc ^ b) == expected
}

/// Degrees and decimal minutes to decimal degrees.
pub fn position_degrees(degrees: i32, minutes: f64) -> f64 {
    f64::from(degrees) + minutes / 60.0
}

/// Side of true north the magnetic variation lies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagneticDirection {
    East,
    West,
}

/// Magnetic heading from a true track and the magnetic variation.
pub fn adjusted_course(track_deg: f64, magvar_deg: f64, direction: MagneticDirection) -> f64 {
    match direction {
        MagneticDirection::East => track_deg - magvar_deg,
        MagneticDirection::West => track_deg + magvar_deg,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagneticVariation {
    pub degrees: f64,
    pub direction: MagneticDirection,
}

impl MagneticVariation {
    pub fn adjust(&self, track_deg: f64) -> f64 {
        adjusted_course(track_deg, self.degrees, self.direction)
    }
}

/// Fields 10 and 11 of an RMC sentence, when both are present.
fn rmc_magnetic_variation(sentence: &str) -> Option<MagneticVariation> {
    let payload = sentence.split('*').next()?;
    let mut fields = payload.split(',').skip(10);
    let degrees = fields.next()?.parse().ok()?;
    let direction = match fields.next()? {
        "E" => MagneticDirection::East,
        "W" => MagneticDirection::West,
        _ => return None,
    };
    Some(MagneticVariation { degrees, direction })
}
