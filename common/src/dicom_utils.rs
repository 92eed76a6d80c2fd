use crate::utils::to_hex;
use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dicom_object::{DefaultDicomObject, InMemDicomObject, OpenFileOptions, ReadError};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // UI value: dot separated numeric components
    static ref DICOM_UID: Regex = Regex::new(r"^[0-9]+(\.[0-9]+)*$").unwrap();
}

pub const DICOM_UID_MAX_LEN: usize = 64;

/// Length of the DICOM file preamble that precedes the magic code.
pub const DICOM_PREAMBLE_LEN: usize = 128;
pub const DICOM_MAGIC: &[u8; 4] = b"DICM";

/// Bytes at offset 128..132, truncated when the content is shorter.
pub fn magic_bytes(content: &[u8]) -> &[u8] {
    if content.len() <= DICOM_PREAMBLE_LEN {
        return &[];
    }
    let end = content.len().min(DICOM_PREAMBLE_LEN + DICOM_MAGIC.len());
    &content[DICOM_PREAMBLE_LEN..end]
}

pub fn has_dicom_magic(content: &[u8]) -> bool {
    magic_bytes(content) == DICOM_MAGIC
}

/// Hex of whatever sits where the magic code is expected.
pub fn magic_bytes_hex(content: &[u8]) -> String {
    to_hex(magic_bytes(content))
}

pub fn is_dicom_uid(value: &str) -> bool {
    value.len() <= DICOM_UID_MAX_LEN && DICOM_UID.is_match(value)
}

pub fn get_text_value(dicom_obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    dicom_obj
        .element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim_end_matches(|c| c == ' ' || c == '\0').to_string())
}

/// Parse an in-memory Part 10 file up to the pixel data.
pub fn open_dicom_bytes(content: &[u8]) -> Result<DefaultDicomObject, ReadError> {
    let body = content.get(DICOM_PREAMBLE_LEN..).unwrap_or(&[]);
    OpenFileOptions::new()
        .read_until(tags::PIXEL_DATA)
        .from_reader(body)
}
