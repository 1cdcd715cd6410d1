//! Google Translate speech backend.
//!
//! Uses the keyless `translate_tts` endpoint. The regional domain (`tld`)
//! selects the accent, so a "voice" for this backend is mostly a domain.
//! The endpoint rejects long input, so text is sent in short chunks and the
//! returned MP3 streams are joined.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::audio::join_mp3;
use crate::backend::{BackendSettings, SpeechBackend};
use crate::error::BackendError;
use crate::voice::BackendKind;

/// Longest chunk the endpoint reliably accepts.
const MAX_CHUNK_CHARS: usize = 100;

pub struct GoogleBackend {
    client: Client,
    lang: String,
    tld: String,
}

impl GoogleBackend {
    pub fn new(settings: &BackendSettings) -> Result<Self, BackendError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0 (X11; Linux x86_64) dialogtts"),
        );

        let client = Client::builder()
            .timeout(settings.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| BackendError::Unavailable {
                backend: BackendKind::Google,
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        validate_tld(&settings.tld)?;

        Ok(Self {
            client,
            lang: settings.lang.clone(),
            tld: settings.tld.clone(),
        })
    }

    fn endpoint(tld: &str) -> String {
        format!("https://translate.google.{}/translate_tts", tld)
    }

    async fn fetch_chunk(
        &self,
        tld: &str,
        lang: &str,
        chunk: &str,
        idx: usize,
        total: usize,
    ) -> Result<Vec<u8>, BackendError> {
        let idx = idx.to_string();
        let total = total.to_string();
        let textlen = chunk.chars().count().to_string();

        let response = self
            .client
            .get(Self::endpoint(tld))
            .query(&[
                ("ie", "UTF-8"),
                ("q", chunk),
                ("tl", lang),
                ("client", "tw-ob"),
                ("idx", idx.as_str()),
                ("total", total.as_str()),
                ("textlen", textlen.as_str()),
            ])
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(BackendKind::Google, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Request {
                backend: BackendKind::Google,
                message: format!("translate_tts returned {}", status),
                status: Some(status.as_u16()),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BackendError::from_reqwest(BackendKind::Google, e))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SpeechBackend for GoogleBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Google
    }

    async fn synthesize(
        &self,
        text: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Vec<u8>, BackendError> {
        let tld = params.get("tld").map(String::as_str).unwrap_or(&self.tld);
        let lang = params.get("lang").map(String::as_str).unwrap_or(&self.lang);
        validate_tld(tld)?;

        let chunks = split_into_chunks(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(BackendError::Response {
                backend: BackendKind::Google,
                message: "nothing to synthesize".to_string(),
            });
        }

        let mut parts = Vec::with_capacity(chunks.len());
        for (idx, chunk) in chunks.iter().enumerate() {
            parts.push(self.fetch_chunk(tld, lang, chunk, idx, chunks.len()).await?);
        }

        Ok(join_mp3(&parts))
    }
}

fn validate_tld(tld: &str) -> Result<(), BackendError> {
    let valid = !tld.is_empty()
        && !tld.starts_with('.')
        && !tld.ends_with('.')
        && tld.chars().all(|c| c.is_ascii_alphanumeric() || c == '.');
    if valid {
        Ok(())
    } else {
        Err(BackendError::InvalidVoice {
            backend: BackendKind::Google,
            message: format!("invalid Google domain '{}'", tld),
        })
    }
}

/// Split text into chunks of at most `max_chars` characters.
///
/// Prefers sentence boundaries, then commas, then whitespace; a single word
/// longer than `max_chars` is cut hard.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in text.split_inclusive(&['.', '!', '?', ';'][..]) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if fits(&current, sentence, max_chars) {
            push_piece(&mut current, sentence);
            continue;
        }

        flush(&mut chunks, &mut current);

        if char_len(sentence) <= max_chars {
            push_piece(&mut current, sentence);
            continue;
        }

        // Sentence too long on its own: fall back to commas, then words.
        for part in sentence.split_inclusive(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if !fits(&current, part, max_chars) {
                flush(&mut chunks, &mut current);
            }
            if char_len(part) <= max_chars {
                push_piece(&mut current, part);
                continue;
            }
            for word in part.split_whitespace() {
                if !fits(&current, word, max_chars) {
                    flush(&mut chunks, &mut current);
                }
                if char_len(word) <= max_chars {
                    push_piece(&mut current, word);
                } else {
                    let chars: Vec<char> = word.chars().collect();
                    for piece in chars.chunks(max_chars) {
                        chunks.push(piece.iter().collect());
                    }
                }
            }
        }
    }

    flush(&mut chunks, &mut current);
    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn fits(current: &str, piece: &str, max_chars: usize) -> bool {
    let separator = usize::from(!current.is_empty());
    char_len(current) + separator + char_len(piece) <= max_chars
}

fn push_piece(current: &mut String, piece: &str) {
    if !current.is_empty() {
        current.push(' ');
    }
    current.push_str(piece);
}

fn flush(chunks: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        chunks.push(std::mem::take(current));
    }
}
