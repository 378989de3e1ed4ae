//! Dot-dash encoder
//!
//! Text is uppercased and each character replaced by its code from
//! [`MORSE_TABLE`]. Space becomes the word separator `/`. Characters outside
//! the table pass through as their own token. Tokens are joined by one space,
//! so the output decodes character by character.

use crate::domain::types::EncodedMessage;

/// Supported characters and their codes. No two entries share a code.
pub const MORSE_TABLE: [(char, &str); 40] = [
    ('A', ".-"),
    ('B', "-..."),
    ('C', "-.-."),
    ('D', "-.."),
    ('E', "."),
    ('F', "..-."),
    ('G', "--."),
    ('H', "...."),
    ('I', ".."),
    ('J', ".---"),
    ('K', "-.-"),
    ('L', ".-.."),
    ('M', "--"),
    ('N', "-."),
    ('O', "---"),
    ('P', ".--."),
    ('Q', "--.-"),
    ('R', ".-."),
    ('S', "..."),
    ('T', "-"),
    ('U', "..-"),
    ('V', "...-"),
    ('W', ".--"),
    ('X', "-..-"),
    ('Y', "-.--"),
    ('Z', "--.."),
    ('1', ".----"),
    ('2', "..---"),
    ('3', "...--"),
    ('4', "....-"),
    ('5', "....."),
    ('6', "-...."),
    ('7', "--..."),
    ('8', "---.."),
    ('9', "----."),
    ('0', "-----"),
    (' ', "/"),
    ('.', ".-.-.-"),
    (',', "--..--"),
    (':', "---..."),
];

/// ITU code for the hyphen, used for the minus sign when enabled
pub const MINUS_SIGN_CODE: &str = "-....-";

/// Look up the code for an (already uppercased) character
pub fn code_for(c: char) -> Option<&'static str> {
    MORSE_TABLE.iter().find(|(ch, _)| *ch == c).map(|(_, code)| *code)
}

/// Encode text with the standard table
pub fn encode(text: &str) -> String {
    Encoder::standard().encode(text)
}

/// Encoder configuration. `Copy`, so each producer keeps its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Encoder {
    minus_sign: bool,
}

impl Encoder {
    /// Table characters only; `-` passes through unencoded
    pub fn standard() -> Self {
        Self { minus_sign: false }
    }

    /// Also encode `-` so negative coordinates carry no plaintext
    pub fn with_minus_sign() -> Self {
        Self { minus_sign: true }
    }

    pub fn encodes_minus_sign(&self) -> bool {
        self.minus_sign
    }

    fn token(&self, c: char) -> Option<&'static str> {
        if self.minus_sign && c == '-' {
            return Some(MINUS_SIGN_CODE);
        }
        code_for(c)
    }

    pub fn encode(&self, text: &str) -> String {
        let upper = text.to_uppercase();
        let mut out = String::with_capacity(upper.len() * 5);

        for (i, c) in upper.chars().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            match self.token(c) {
                Some(code) => out.push_str(code),
                None => out.push(c),
            }
        }

        out
    }

    pub fn encode_message(&self, text: &str) -> EncodedMessage {
        EncodedMessage::new(self.encode(text))
    }
}
