//! Shell-aware tokenizer.
//!
//! Splits a command line on unquoted whitespace while honoring POSIX quoting
//! (single quotes, double quotes, backslash escapes). Unlike an off-the-shelf
//! lexer this one keeps, per token, the raw source span and whether any part
//! of the token was quoted; the canonicalizer needs both to undo quote
//! obfuscation and to know which tokens are eligible for glob resolution.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The token with quoting removed, as bash would hand it to a command.
    pub text: String,
    /// The raw source text of the token, quotes and escapes included.
    pub raw: String,
    /// Byte offset of the first raw character.
    pub start: usize,
    /// Byte offset one past the last raw character.
    pub end: usize,
    /// True if any part of the token was single- or double-quoted or
    /// backslash-escaped.
    pub quoted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("unterminated single quote")]
    UnterminatedSingleQuote,
    #[error("unterminated double quote")]
    UnterminatedDoubleQuote,
    #[error("trailing backslash")]
    TrailingBackslash,
}

/// Tokenize `input`, honoring POSIX quoting rules.
pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        // Skip unquoted whitespace between tokens.
        while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }

        let start = i;
        let mut text = String::new();
        let mut quoted = false;

        while i < bytes.len() {
            match bytes[i] {
                b' ' | b'\t' => break,
                b'\'' => {
                    quoted = true;
                    i += 1;
                    let close = find_byte(bytes, i, b'\'')
                        .ok_or(LexError::UnterminatedSingleQuote)?;
                    text.push_str(&input[i..close]);
                    i = close + 1;
                }
                b'"' => {
                    quoted = true;
                    i += 1;
                    loop {
                        match bytes.get(i) {
                            None => return Err(LexError::UnterminatedDoubleQuote),
                            Some(b'"') => {
                                i += 1;
                                break;
                            }
                            Some(b'\\') => {
                                // Inside double quotes a backslash only
                                // escapes the characters bash says it does.
                                match bytes.get(i + 1) {
                                    Some(&c) if matches!(c, b'"' | b'\\' | b'$' | b'`') => {
                                        text.push(c as char);
                                        i += 2;
                                    }
                                    Some(_) => {
                                        text.push('\\');
                                        i += 1;
                                    }
                                    None => return Err(LexError::UnterminatedDoubleQuote),
                                }
                            }
                            Some(_) => {
                                let c = next_char(input, i);
                                text.push(c);
                                i += c.len_utf8();
                            }
                        }
                    }
                }
                b'\\' => {
                    quoted = true;
                    match bytes.get(i + 1) {
                        None => return Err(LexError::TrailingBackslash),
                        Some(_) => {
                            let c = next_char(input, i + 1);
                            text.push(c);
                            i += 1 + c.len_utf8();
                        }
                    }
                }
                _ => {
                    let c = next_char(input, i);
                    text.push(c);
                    i += c.len_utf8();
                }
            }
        }

        tokens.push(Token {
            text,
            raw: input[start..i].to_string(),
            start,
            end: i,
            quoted,
        });
    }

    Ok(tokens)
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
    bytes[from..].iter().position(|&b| b == needle).map(|p| from + p)
}

fn next_char(input: &str, at: usize) -> char {
    input[at..].chars().next().unwrap_or('\u{fffd}')
}
