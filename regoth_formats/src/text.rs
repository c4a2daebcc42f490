//! Game data stores text as ISO-8859-1; everything above the codec layer is
//! plain UTF-8 `String`s.

/// Decode ISO-8859-1 bytes. Every byte maps to the code point of the same value.
pub fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Encode to ISO-8859-1, replacing characters outside the Latin-1 range with `?`.
pub fn string_to_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| u8::try_from(u32::from(ch)).unwrap_or(b'?'))
        .collect()
}
