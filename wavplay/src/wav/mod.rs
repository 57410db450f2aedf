//! RIFF/WAVE header decoding
//!
//! Only the canonical 44-byte layout is understood: a `RIFF` chunk holding
//! `WAVE`, a 16-byte `fmt ` sub-chunk and a `data` sub-chunk whose payload
//! starts at byte 44.

pub mod header;

pub use header::{
    decode_from_reader, decode_header, decode_header_with, Header, HeaderAnomaly, ValidationMode,
    FORMAT_PCM, HEADER_LEN,
};
