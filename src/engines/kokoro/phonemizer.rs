use std::collections::HashMap;
use std::io::Write;
use std::process::{Command, Stdio};

use super::model::KokoroError;

/// Map a voice name prefix to an espeak-ng language code.
///
/// Voice names follow the pattern `{prefix}_{name}` where the two-character
/// prefix encodes the language.
pub fn voice_lang(voice: &str) -> &'static str {
    match voice.get(..2).unwrap_or_default() {
        "af" | "am" => "en-us",
        "bf" | "bm" => "en-gb",
        "ef" | "em" => "es",
        "ff" => "fr",
        "hf" | "hm" => "hi",
        "if" | "im" => "it",
        "jf" | "jm" => "ja",
        "pf" | "pm" => "pt-br",
        "zf" | "zm" => "cmn",
        _ => "en-us",
    }
}

/// Phoneme token IDs for `text`, one sequence per sentence.
///
/// Sentences end at `.`, `!`, `?`, `…` and line breaks. Characters missing
/// from the vocab are dropped.
pub fn phonemize_sentences(
    text: &str,
    lang: &str,
    vocab: &HashMap<char, i64>,
) -> Result<Vec<Vec<i64>>, KokoroError> {
    let parts = split_text_parts(text);
    let words: Vec<&str> = parts
        .iter()
        .filter_map(|part| match part {
            TextPart::Text(segment) => Some(segment.as_str()),
            TextPart::Punct(_) => None,
        })
        .collect();

    if words.is_empty() {
        return Ok(Vec::new());
    }
    let ipa = phonemize_batch(&words, lang)?;
    let segment_ids: Vec<Vec<i64>> = ipa.iter().map(|line| ipa_to_ids(line, vocab)).collect();

    Ok(assemble_sentences(&parts, &segment_ids, vocab))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TextPart {
    Text(String),
    Punct(char),
}

fn is_sentence_end(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?' | '…')
}

/// Interleave phonemized text segments with punctuation tokens and cut the
/// result into sentences.
fn assemble_sentences(
    parts: &[TextPart],
    segment_ids: &[Vec<i64>],
    vocab: &HashMap<char, i64>,
) -> Vec<Vec<i64>> {
    let mut sentences = Vec::new();
    let mut current = Vec::new();
    let mut segments = segment_ids.iter();

    for part in parts {
        match part {
            TextPart::Text(_) => {
                if let Some(ids) = segments.next() {
                    current.extend_from_slice(ids);
                }
            }
            TextPart::Punct(ch) => {
                if let Some(&id) = vocab.get(ch) {
                    current.push(id);
                }
                if is_sentence_end(*ch) && !current.is_empty() {
                    sentences.push(std::mem::take(&mut current));
                }
            }
        }
    }
    if !current.is_empty() {
        sentences.push(current);
    }
    sentences
}

fn split_text_parts(text: &str) -> Vec<TextPart> {
    let mut parts = Vec::new();
    let mut current = String::new();

    for (idx, ch) in text.char_indices() {
        if let Some(punct) = boundary_punctuation(ch) {
            if !between_digits(text, idx, ch) {
                push_text(&mut parts, &mut current);
                parts.push(TextPart::Punct(punct));
                continue;
            }
        }

        if ch.is_whitespace() {
            if !current.is_empty() && !current.ends_with(' ') {
                current.push(' ');
            }
        } else {
            current.push(ch);
        }
    }

    push_text(&mut parts, &mut current);
    parts
}

fn push_text(parts: &mut Vec<TextPart>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        parts.push(TextPart::Text(trimmed.to_string()));
    }
    current.clear();
}

fn boundary_punctuation(ch: char) -> Option<char> {
    match ch {
        '.' | '!' | '?' | ',' | ';' | ':' | '—' | '…' | '"' | '(' | ')' | '\u{201c}'
        | '\u{201d}' => Some(ch),
        '\n' | '\r' => Some('.'),
        _ => None,
    }
}

/// `2.0` and `1,000` are numbers, not boundaries.
fn between_digits(text: &str, idx: usize, ch: char) -> bool {
    if !matches!(ch, '.' | ',') {
        return false;
    }
    let prev = text[..idx].chars().next_back();
    let next = text[idx + ch.len_utf8()..].chars().next();
    matches!((prev, next), (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit())
}

/// Phonemize all segments in a single espeak-ng call, one output line per
/// input line. Falls back to one call per segment if the line counts disagree.
fn phonemize_batch(segments: &[&str], lang: &str) -> Result<Vec<String>, KokoroError> {
    let output = run_espeak(&segments.join("\n"), lang)?;
    let lines: Vec<String> = output.lines().map(str::to_string).collect();
    if lines.len() == segments.len() {
        return Ok(lines);
    }

    log::debug!(
        "espeak-ng returned {} lines for {} segments, phonemizing one by one",
        lines.len(),
        segments.len()
    );
    segments.iter().map(|s| run_espeak(s, lang)).collect()
}

fn run_espeak(input: &str, lang: &str) -> Result<String, KokoroError> {
    let mut child = Command::new("espeak-ng")
        .args(["--ipa", "--stdin", "-q", "-v", lang])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => KokoroError::EspeakNotFound,
            _ => KokoroError::Io(e),
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        // stdin is line oriented; an unterminated last line loses its final phoneme
        stdin.write_all(input.as_bytes())?;
        if !input.ends_with('\n') {
            stdin.write_all(b"\n")?;
        }
    }

    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(KokoroError::PhonemizerFailed(format!(
            "espeak-ng exited with code {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn ipa_to_ids(ipa: &str, vocab: &HashMap<char, i64>) -> Vec<i64> {
    ipa.lines()
        .map(str::trim)
        .flat_map(str::chars)
        .filter(|&ch| ch != '_')
        .filter_map(|ch| vocab.get(&ch).copied())
        .collect()
}
