//! Text canonicalization.
//!
//! Collapses the shell obfuscation bash would undo at execution time (ANSI-C
//! quoting, backticks, quote splicing, brace expansion, globs) so the static
//! blocklist and the model inspect something close to what bash will run.
//!
//! Every stage either succeeds or reports trouble through an [`Annotation`];
//! nothing is swallowed. A stage that cannot make sense of its input leaves
//! the text unchanged and lets the policy engine treat the command with
//! heightened suspicion.

use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;

use crate::lexer;
use crate::lexer::LexError;
use crate::lexer::Token;

/// Upper bound on brace-expansion fan-out. Above this the variants are
/// discarded wholesale and the original text stands.
const MAX_BRACE_VARIANTS: usize = 64;

/// Per-token cap on glob matches.
const MAX_GLOB_MATCHES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Annotation {
    /// A canonicalization or parse stage failed; downstream layers must not
    /// treat the text as faithfully normalized.
    ParseUnreliable,
    /// An ANSI-C quoted string contained a malformed escape and was left
    /// unresolved.
    AnsiCPartial,
    /// The command carries one or more `<<<` here-strings.
    HereString,
    /// The raw command exceeded the configured length cap.
    Oversized,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalText {
    /// Stages 1-4 applied in order; what bash will execute, best effort.
    pub text: String,
    /// Brace/glob expansions distinct from the primary. Each one receives
    /// full blocklist scrutiny.
    pub variants: Vec<String>,
    pub annotations: BTreeSet<Annotation>,
    /// Bodies of `<<<` here-strings, extracted verbatim.
    pub here_strings: Vec<String>,
}

impl CanonicalText {
    pub fn has(&self, a: Annotation) -> bool {
        self.annotations.contains(&a)
    }
}

/// Run the full pipeline. Glob resolution consults the live filesystem
/// relative to `cwd`; it contributes variants only, so the primary text never
/// depends on filesystem state.
pub fn canonicalize(input: &str, cwd: &Path, max_len: usize) -> CanonicalText {
    let mut annotations = BTreeSet::new();

    if input.len() > max_len {
        annotations.insert(Annotation::Oversized);
        return CanonicalText {
            text: input.to_string(),
            variants: Vec::new(),
            annotations,
            here_strings: Vec::new(),
        };
    }

    // Stage 1: ANSI-C quote resolution.
    let (stage1, ansi_partial) = resolve_ansi_c_quotes(input);
    if ansi_partial {
        annotations.insert(Annotation::AnsiCPartial);
    }

    // Stage 2: backtick conversion.
    let (stage2, backtick_trouble) = convert_backticks(&stage1);
    if backtick_trouble {
        annotations.insert(Annotation::ParseUnreliable);
    }

    // Stage 3: quote normalization.
    let stage3 = match normalize_quotes(&stage2) {
        Ok(text) => text,
        Err(_) => {
            annotations.insert(Annotation::ParseUnreliable);
            stage2.clone()
        }
    };

    // Stage 4: brace expansion.
    let (primary, mut variants) = match expand_braces(&stage3) {
        Ok(expanded) => expanded,
        Err(LexError::UnterminatedSingleQuote)
        | Err(LexError::UnterminatedDoubleQuote)
        | Err(LexError::TrailingBackslash) => {
            annotations.insert(Annotation::ParseUnreliable);
            (stage3.clone(), Vec::new())
        }
    };

    // Stage 5: glob resolution (variants only).
    match resolve_globs(&primary, cwd) {
        Ok(mut glob_variants) => variants.append(&mut glob_variants),
        Err(_) => {
            annotations.insert(Annotation::ParseUnreliable);
        }
    }

    // Stage 6: here-string bodies.
    let here_strings = extract_here_strings(&primary);
    if !here_strings.is_empty() {
        annotations.insert(Annotation::HereString);
    }

    variants.sort();
    variants.dedup();
    variants.retain(|v| v != &primary);

    CanonicalText {
        text: primary,
        variants,
        annotations,
        here_strings,
    }
}

// ---------------------------------------------------------------------------
// Stage 1: ANSI-C quotes
// ---------------------------------------------------------------------------

/// Replace `$'…'` with the bytes it denotes. Malformed sequences are left
/// intact and reported. Resolved text containing `$` or a backtick is
/// re-wrapped in single quotes so later stages cannot misread it.
fn resolve_ansi_c_quotes(input: &str) -> (String, bool) {
    let mut out = String::with_capacity(input.len());
    let mut partial = false;
    let bytes = input.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                // Plain single-quoted region: copy verbatim.
                let close = bytes[i + 1..].iter().position(|&b| b == b'\'');
                match close {
                    Some(off) => {
                        out.push_str(&input[i..i + off + 2]);
                        i += off + 2;
                    }
                    None => {
                        out.push_str(&input[i..]);
                        i = bytes.len();
                    }
                }
            }
            b'\\' => {
                out.push('\\');
                i += 1;
                if i < bytes.len() {
                    let c = input[i..].chars().next().unwrap_or('\u{fffd}');
                    out.push(c);
                    i += c.len_utf8();
                }
            }
            b'$' if bytes.get(i + 1) == Some(&b'\'') => {
                match parse_ansi_c_string(&input[i + 2..]) {
                    Some((resolved, consumed)) => {
                        if resolved.contains('$') || resolved.contains('`') {
                            out.push_str(&single_quote(&resolved));
                        } else {
                            out.push_str(&resolved);
                        }
                        i += 2 + consumed;
                    }
                    None => {
                        // Leave the `$'` intact; copy the rest of the string
                        // through the normal path so a later terminator does
                        // not get re-interpreted.
                        partial = true;
                        out.push_str("$'");
                        i += 2;
                    }
                }
            }
            _ => {
                let c = input[i..].chars().next().unwrap_or('\u{fffd}');
                out.push(c);
                i += c.len_utf8();
            }
        }
    }

    (out, partial)
}

/// Parse the body of a `$'…'` string starting just past the opening quote.
/// Returns the resolved text and the number of bytes consumed including the
/// closing quote, or `None` when the sequence is malformed or unterminated.
fn parse_ansi_c_string(body: &str) -> Option<(String, usize)> {
    let bytes = body.as_bytes();
    let mut resolved: Vec<u8> = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                return String::from_utf8(resolved).ok().map(|s| (s, i + 1));
            }
            b'\\' => {
                let (escape_bytes, consumed) = parse_ansi_c_escape(&body[i + 1..])?;
                resolved.extend_from_slice(&escape_bytes);
                i += 1 + consumed;
            }
            _ => {
                let c = body[i..].chars().next()?;
                let mut buf = [0u8; 4];
                resolved.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                i += c.len_utf8();
            }
        }
    }

    None // unterminated
}

fn parse_ansi_c_escape(rest: &str) -> Option<(Vec<u8>, usize)> {
    let bytes = rest.as_bytes();
    let first = *bytes.first()?;
    let simple = |b: u8| Some((vec![b], 1));
    match first {
        b'n' => simple(b'\n'),
        b't' => simple(b'\t'),
        b'\\' => simple(b'\\'),
        b'a' => simple(0x07),
        b'b' => simple(0x08),
        b'f' => simple(0x0c),
        b'r' => simple(b'\r'),
        b'v' => simple(0x0b),
        b'e' => simple(0x1b),
        b'\'' => simple(b'\''),
        b'"' => simple(b'"'),
        b'x' => {
            let hex: String = rest[1..]
                .chars()
                .take_while(|c| c.is_ascii_hexdigit())
                .take(2)
                .collect();
            if hex.is_empty() {
                return None;
            }
            let value = u8::from_str_radix(&hex, 16).ok()?;
            Some((vec![value], 1 + hex.len()))
        }
        b'u' => {
            let hex: String = rest[1..]
                .chars()
                .take_while(|c| c.is_ascii_hexdigit())
                .take(4)
                .collect();
            if hex.len() != 4 {
                return None;
            }
            let value = u32::from_str_radix(&hex, 16).ok()?;
            let c = char::from_u32(value)?;
            let mut buf = [0u8; 4];
            Some((
                c.encode_utf8(&mut buf).as_bytes().to_vec(),
                1 + hex.len(),
            ))
        }
        b'0'..=b'7' => {
            let oct: String = rest
                .chars()
                .take_while(|c| ('0'..='7').contains(c))
                .take(3)
                .collect();
            let value = u16::from_str_radix(&oct, 8).ok()?;
            if value > 0xff {
                return None;
            }
            Some((vec![value as u8], oct.len()))
        }
        _ => None,
    }
}

fn single_quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

// ---------------------------------------------------------------------------
// Stage 2: backticks
// ---------------------------------------------------------------------------

/// Convert every non-nested `` `X` `` into `$(X)`. Nested or unterminated
/// backtick constructs are left alone and reported.
fn convert_backticks(input: &str) -> (String, bool) {
    let mut out = String::with_capacity(input.len());
    let mut trouble = false;
    let bytes = input.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                let close = bytes[i + 1..].iter().position(|&b| b == b'\'');
                match close {
                    Some(off) => {
                        out.push_str(&input[i..i + off + 2]);
                        i += off + 2;
                    }
                    None => {
                        out.push_str(&input[i..]);
                        i = bytes.len();
                    }
                }
            }
            b'\\' => {
                out.push('\\');
                i += 1;
                if i < bytes.len() {
                    let c = input[i..].chars().next().unwrap_or('\u{fffd}');
                    out.push(c);
                    i += c.len_utf8();
                }
            }
            b'`' => {
                match find_backtick_close(bytes, i + 1) {
                    Some(close) => {
                        let inner = &input[i + 1..close];
                        if inner.contains("\\`") {
                            // Nested command substitution via escaped
                            // backticks: conversion would change meaning.
                            trouble = true;
                            out.push_str(&input[i..close + 1]);
                        } else {
                            out.push_str("$(");
                            out.push_str(inner);
                            out.push(')');
                        }
                        i = close + 1;
                    }
                    None => {
                        trouble = true;
                        out.push_str(&input[i..]);
                        i = bytes.len();
                    }
                }
            }
            _ => {
                let c = input[i..].chars().next().unwrap_or('\u{fffd}');
                out.push(c);
                i += c.len_utf8();
            }
        }
    }

    (out, trouble)
}

fn find_backtick_close(bytes: &[u8], mut from: usize) -> Option<usize> {
    while from < bytes.len() {
        match bytes[from] {
            b'\\' => from += 2,
            b'`' => return Some(from),
            _ => from += 1,
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Stage 3: quote normalization
// ---------------------------------------------------------------------------

const METACHARS: &[char] = &['$', '`', '{', '|', ';', '&', '<', '>', '*', '?'];

/// Collapse quote splicing (`ba""sh` → `bash`) for commands with no shell
/// metacharacters. Anything that could change meaning under re-joining skips
/// the stage entirely: correctness over coverage.
fn normalize_quotes(input: &str) -> Result<String, LexError> {
    if input.contains(METACHARS) {
        return Ok(input.to_string());
    }
    let tokens = lexer::tokenize(input)?;
    if !tokens.iter().any(|t| t.quoted) {
        return Ok(input.to_string());
    }
    let joined = tokens
        .iter()
        .map(|t| {
            if t.text.contains(char::is_whitespace) || t.text.is_empty() {
                single_quote(&t.text)
            } else {
                t.text.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    Ok(joined)
}

// ---------------------------------------------------------------------------
// Stage 4: brace expansion
// ---------------------------------------------------------------------------

/// Expand `{a,b}` lists and `{1..5}` sequences. The primary gets bash's
/// in-place word expansion; the cartesian per-alternative command lines
/// become variants. Above [`MAX_BRACE_VARIANTS`] combinations everything is
/// discarded and the original text stands.
fn expand_braces(input: &str) -> Result<(String, Vec<String>), LexError> {
    let tokens = lexer::tokenize(input)?;
    if !tokens
        .iter()
        .any(|t| !t.quoted && contains_expandable_brace(&t.text))
    {
        return Ok((input.to_string(), Vec::new()));
    }

    let mut per_token: Vec<Vec<String>> = Vec::with_capacity(tokens.len());
    let mut product = 1usize;
    for token in &tokens {
        let alternatives = if !token.quoted && contains_expandable_brace(&token.text) {
            match expand_word(&token.text, MAX_BRACE_VARIANTS + 1) {
                Some(alts) => alts,
                // Fan-out beyond the cap: keep the original text, no
                // variants, and let the model see the braces as written.
                None => return Ok((input.to_string(), Vec::new())),
            }
        } else {
            vec![token.raw.clone()]
        };
        product = product.saturating_mul(alternatives.len());
        if product > MAX_BRACE_VARIANTS {
            return Ok((input.to_string(), Vec::new()));
        }
        per_token.push(alternatives);
    }

    let primary = per_token
        .iter()
        .map(|alts| alts.join(" "))
        .collect::<Vec<_>>()
        .join(" ");

    let mut variants = Vec::with_capacity(product);
    let mut indices = vec![0usize; per_token.len()];
    loop {
        let line = per_token
            .iter()
            .zip(&indices)
            .map(|(alts, &ix)| alts[ix].as_str())
            .collect::<Vec<_>>()
            .join(" ");
        variants.push(line);
        // Odometer increment.
        let mut pos = per_token.len();
        loop {
            if pos == 0 {
                return Ok((primary, variants));
            }
            pos -= 1;
            indices[pos] += 1;
            if indices[pos] < per_token[pos].len() {
                break;
            }
            indices[pos] = 0;
        }
    }
}

fn contains_expandable_brace(word: &str) -> bool {
    let bytes = word.as_bytes();
    for (ix, &b) in bytes.iter().enumerate() {
        if b == b'{' && (ix == 0 || bytes[ix - 1] != b'$') {
            return true;
        }
    }
    false
}

/// Expand one word, recursively, producing at most `limit` alternatives
/// (`None` when the cap is hit).
fn expand_word(word: &str, limit: usize) -> Option<Vec<String>> {
    let Some((open, close)) = find_brace_group(word) else {
        return Some(vec![word.to_string()]);
    };
    let prefix = &word[..open];
    let body = &word[open + 1..close];
    let suffix = &word[close + 1..];

    let alternatives = if let Some(seq) = expand_sequence(body, limit) {
        seq
    } else {
        split_top_level_commas(body)
    };
    if alternatives.len() > limit {
        return None;
    }

    let mut results = Vec::new();
    for alt in &alternatives {
        let candidate = format!("{prefix}{alt}{suffix}");
        let expanded = expand_word(&candidate, limit)?;
        results.extend(expanded);
        if results.len() > limit {
            return None;
        }
    }
    Some(results)
}

/// Locate the first expandable `{…}` group: unquoted, not `${…}`, balanced,
/// and containing a top-level `,` or a `..` sequence.
fn find_brace_group(word: &str) -> Option<(usize, usize)> {
    let bytes = word.as_bytes();
    let mut open_ix = None;
    let mut depth = 0usize;
    for (ix, &b) in bytes.iter().enumerate() {
        match b {
            b'{' if ix == 0 || bytes[ix - 1] != b'$' => {
                if depth == 0 {
                    open_ix = Some(ix);
                }
                depth += 1;
            }
            b'{' => depth += 1,
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    let open = open_ix?;
                    let body = &word[open + 1..ix];
                    if split_top_level_commas(body).len() > 1
                        || expand_sequence(body, 1).is_some()
                    {
                        return Some((open, ix));
                    }
                    open_ix = None;
                }
            }
            _ => {}
        }
    }
    None
}

fn split_top_level_commas(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in body.chars() {
        match c {
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// `{1..5}`, `{5..1}`, `{1..9..2}`, `{a..e}`.
fn expand_sequence(body: &str, limit: usize) -> Option<Vec<String>> {
    let parts: Vec<&str> = body.split("..").collect();
    if parts.len() != 2 && parts.len() != 3 {
        return None;
    }
    let step: i64 = if parts.len() == 3 {
        parts[2].parse().ok().filter(|s| *s != 0)?
    } else {
        1
    };

    if let (Ok(from), Ok(to)) = (parts[0].parse::<i64>(), parts[1].parse::<i64>()) {
        let step = if from <= to { step.abs() } else { -step.abs() };
        let mut out = Vec::new();
        let mut v = from;
        loop {
            out.push(v.to_string());
            if out.len() > limit {
                return Some(out); // caller enforces the cap
            }
            match v.checked_add(step) {
                Some(next) if (step > 0 && next <= to) || (step < 0 && next >= to) => v = next,
                _ => break,
            }
        }
        return Some(out);
    }

    // Single-character alpha sequences.
    let (a, b) = (parts[0].chars(), parts[1].chars());
    let (a, b): (Vec<char>, Vec<char>) = (a.collect(), b.collect());
    if a.len() == 1 && b.len() == 1 && a[0].is_ascii_alphabetic() && b[0].is_ascii_alphabetic() {
        let (from, to) = (a[0] as u8, b[0] as u8);
        let range: Vec<String> = if from <= to {
            (from..=to).map(|c| (c as char).to_string()).collect()
        } else {
            (to..=from).rev().map(|c| (c as char).to_string()).collect()
        };
        return Some(range);
    }
    None
}

// ---------------------------------------------------------------------------
// Stage 5: glob resolution
// ---------------------------------------------------------------------------

/// Resolve unquoted glob tokens against the live filesystem. Every match
/// becomes a full-command variant so each receives blocklist scrutiny.
fn resolve_globs(text: &str, cwd: &Path) -> Result<Vec<String>, LexError> {
    let tokens = lexer::tokenize(text)?;
    let mut variants = Vec::new();
    for (ix, token) in tokens.iter().enumerate() {
        if token.quoted || !token.text.contains(['*', '?', '[']) {
            continue;
        }
        let mut matches = glob_matches(&token.text, cwd);
        matches.truncate(MAX_GLOB_MATCHES);
        for m in matches {
            variants.push(rebuild_with(&tokens, ix, &m));
        }
    }
    Ok(variants)
}

fn rebuild_with(tokens: &[Token], replace_ix: usize, replacement: &str) -> String {
    tokens
        .iter()
        .enumerate()
        .map(|(ix, t)| {
            if ix == replace_ix {
                replacement.to_string()
            } else {
                t.raw.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Component-wise glob walk. Supports `*`, `?` and `[…]` classes within a
/// path component; dotfiles require an explicit leading dot, as in bash.
fn glob_matches(pattern: &str, cwd: &Path) -> Vec<String> {
    let absolute = pattern.starts_with('/');
    let root: PathBuf = if absolute {
        PathBuf::from("/")
    } else {
        cwd.to_path_buf()
    };

    let components: Vec<&str> = pattern
        .trim_start_matches('/')
        .split('/')
        .filter(|c| !c.is_empty())
        .collect();
    if components.is_empty() {
        return Vec::new();
    }

    let mut frontier: Vec<PathBuf> = vec![root];
    for component in &components {
        let mut next = Vec::new();
        if !component.contains(['*', '?', '[']) {
            for dir in &frontier {
                let candidate = dir.join(component);
                if candidate.symlink_metadata().is_ok() {
                    next.push(candidate);
                }
            }
        } else {
            let Some(re) = component_regex(component) else {
                return Vec::new();
            };
            for dir in &frontier {
                let Ok(entries) = std::fs::read_dir(dir) else {
                    continue;
                };
                for entry in entries.flatten() {
                    let name = entry.file_name();
                    let Some(name) = name.to_str() else { continue };
                    if name.starts_with('.') && !component.starts_with('.') {
                        continue;
                    }
                    if re.is_match(name) {
                        next.push(dir.join(name));
                    }
                }
            }
        }
        frontier = next;
        if frontier.is_empty() {
            break;
        }
    }

    let mut out: Vec<String> = frontier
        .into_iter()
        .filter_map(|p| {
            if absolute {
                p.to_str().map(str::to_string)
            } else {
                p.strip_prefix(cwd)
                    .ok()
                    .and_then(Path::to_str)
                    .map(str::to_string)
            }
        })
        .collect();
    out.sort();
    out
}

/// Translate one glob component into an anchored regex.
fn component_regex(component: &str) -> Option<regex::Regex> {
    let mut re = String::from("^");
    let mut chars = component.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => {
                re.push('[');
                if chars.peek() == Some(&'!') || chars.peek() == Some(&'^') {
                    chars.next();
                    re.push('^');
                }
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if matches!(inner, '\\' | '^') {
                        re.push('\\');
                    }
                    re.push(inner);
                }
                if !closed {
                    return None;
                }
                re.push(']');
            }
            _ => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re).ok()
}

// ---------------------------------------------------------------------------
// Stage 6: here-strings
// ---------------------------------------------------------------------------

/// Extract the body of every `cmd <<< word` construct, verbatim.
fn extract_here_strings(text: &str) -> Vec<String> {
    let mut bodies = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                let close = bytes[i + 1..].iter().position(|&b| b == b'\'');
                i = match close {
                    Some(off) => i + off + 2,
                    None => bytes.len(),
                };
            }
            b'\\' => {
                i += 1;
                if i < bytes.len() {
                    let c = text[i..].chars().next().unwrap_or('\u{fffd}');
                    i += c.len_utf8();
                }
            }
            b'<' if text[i..].starts_with("<<<") && !text[i..].starts_with("<<<<") => {
                i += 3;
                while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
                    i += 1;
                }
                let (body, consumed) = read_here_string_word(&text[i..]);
                if !body.is_empty() {
                    bodies.push(body);
                }
                i += consumed;
            }
            _ => {
                let c = text[i..].chars().next().unwrap_or('\u{fffd}');
                i += c.len_utf8();
            }
        }
    }
    bodies
}

fn read_here_string_word(rest: &str) -> (String, usize) {
    let bytes = rest.as_bytes();
    match bytes.first() {
        Some(&q @ (b'\'' | b'"')) => {
            let close = bytes[1..].iter().position(|&b| b == q);
            match close {
                Some(off) => (rest[1..off + 1].to_string(), off + 2),
                None => (rest[1..].to_string(), rest.len()),
            }
        }
        Some(_) => {
            let end = rest
                .find([' ', '\t', ';', '|', '&'])
                .unwrap_or(rest.len());
            (rest[..end].to_string(), end)
        }
        None => (String::new(), 0),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    fn canon(input: &str) -> CanonicalText {
        canonicalize(input, Path::new("/"), 4096)
    }

    #[test]
    fn ansi_c_named_and_hex_escapes() {
        let c = canon(r"echo $'hi\x41\n'");
        assert_eq!(c.text, "echo hiA\n");
        assert!(!c.has(Annotation::AnsiCPartial));
    }

    #[test]
    fn ansi_c_resolving_to_dollar_is_requoted() {
        let c = canon(r"echo $'\x24HOME'");
        assert_eq!(c.text, "echo '$HOME'");
    }

    #[test]
    fn ansi_c_malformed_is_left_intact_and_flagged() {
        let c = canon(r"echo $'\q'");
        assert!(c.text.contains("$'"));
        assert!(c.has(Annotation::AnsiCPartial));
    }

    #[test]
    fn ansi_c_unicode_escape() {
        let c = canon("echo $'\\u0041bc'");
        assert_eq!(c.text, "echo Abc");
    }

    #[test]
    fn backticks_become_dollar_paren() {
        let c = canon("echo `ls /tmp`");
        assert_eq!(c.text, "echo $(ls /tmp)");
    }

    #[test]
    fn nested_backticks_are_flagged_not_converted() {
        let c = canon(r"echo `echo \`id\``");
        assert!(c.text.contains('`'));
        assert!(c.has(Annotation::ParseUnreliable));
    }

    #[test]
    fn backticks_inside_single_quotes_are_literal() {
        let c = canon("echo '`ls`'");
        assert_eq!(c.text, "echo '`ls`'");
    }

    #[test]
    fn quote_splicing_collapses() {
        assert_eq!(canon(r#"ba""sh"#).text, "bash");
        assert_eq!(canon("'mk'fs /dev/null-like").text, "mkfs /dev/null-like");
    }

    #[test]
    fn plain_commands_are_untouched() {
        assert_eq!(canon("ls -la /tmp").text, "ls -la /tmp");
    }

    #[test]
    fn quote_normalization_skipped_with_metachars() {
        let c = canon(r#"ec""ho $HOME"#);
        assert_eq!(c.text, r#"ec""ho $HOME"#);
    }

    #[test]
    fn brace_list_expands_primary_and_variants() {
        let c = canon("{echo,rm} -rf /");
        assert_eq!(c.text, "echo rm -rf /");
        assert!(c.variants.contains(&"echo -rf /".to_string()));
        assert!(c.variants.contains(&"rm -rf /".to_string()));
    }

    #[test]
    fn brace_sequence_expands() {
        let c = canon("touch f{1..3}");
        assert_eq!(c.text, "touch f1 f2 f3");
        assert!(c.variants.contains(&"touch f2".to_string()));
    }

    #[test]
    fn nested_braces_flatten() {
        let c = canon("echo {a,{b,c}}");
        assert_eq!(c.text, "echo a b c");
    }

    #[test]
    fn brace_cap_discards_variants_and_keeps_original() {
        let c = canon("echo {1..65}");
        assert_eq!(c.text, "echo {1..65}");
        assert!(c.variants.is_empty());

        // At exactly the cap the expansion goes through.
        let c = canon("echo {1..64}");
        assert_eq!(c.variants.len(), 64);
        assert!(c.text.starts_with("echo 1 2 3"));
    }

    #[test]
    fn parameter_expansion_braces_are_not_expanded() {
        let c = canon("echo ${HOME,foo}");
        assert_eq!(c.text, "echo ${HOME,foo}");
    }

    #[test]
    fn glob_single_match_becomes_variant() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("shadow"), b"x").unwrap();
        let pattern = format!("cat {}/shado?", dir.path().display());
        let c = canonicalize(&pattern, Path::new("/"), 4096);
        assert_eq!(c.text, pattern);
        assert_eq!(c.variants.len(), 1);
        assert!(c.variants[0].ends_with("/shadow"));
    }

    #[test]
    fn glob_multiple_matches_each_become_variants() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["aa.txt", "ab.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let pattern = format!("ls {}/a*.txt", dir.path().display());
        let c = canonicalize(&pattern, Path::new("/"), 4096);
        assert_eq!(c.variants.len(), 2);
    }

    #[test]
    fn glob_zero_matches_leaves_token() {
        let c = canon("ls /no/such/dir-*");
        assert!(c.variants.is_empty());
    }

    #[test]
    fn glob_relative_to_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), b"x").unwrap();
        let c = canonicalize("cat note?.md", dir.path(), 4096);
        assert_eq!(c.variants, vec!["cat notes.md".to_string()]);
    }

    #[test]
    fn here_string_bodies_are_extracted() {
        let c = canon(r#"bash <<< "echo pwned""#);
        assert_eq!(c.here_strings, vec!["echo pwned".to_string()]);
        assert!(c.has(Annotation::HereString));

        let c = canon("wc -c <<< hello");
        assert_eq!(c.here_strings, vec!["hello".to_string()]);
    }

    #[test]
    fn oversized_input_is_flagged_and_untouched() {
        let big = "a".repeat(10);
        let c = canonicalize(&big, Path::new("/"), 9);
        assert!(c.has(Annotation::Oversized));
        assert_eq!(c.text, big);
    }

    #[test]
    fn canonicalization_is_a_fixed_point() {
        for input in [
            "ls -la",
            r#"ba""sh"#,
            "echo `ls`",
            "{echo,rm} -rf /",
            r"echo $'\x24HOME'",
            "wc -c <<< hello",
        ] {
            let once = canon(input);
            let twice = canonicalize(&once.text, Path::new("/"), 4096);
            assert_eq!(once.text, twice.text, "not a fixed point: {input}");
        }
    }

    #[test]
    fn unterminated_quote_flags_parse_unreliable() {
        let c = canon("echo 'oops");
        assert!(c.has(Annotation::ParseUnreliable));
        assert_eq!(c.text, "echo 'oops");
    }
}
