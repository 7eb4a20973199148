use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::model::{KokoroError, STYLE_DIM};

pub type StyleVector = [f32; STYLE_DIM];

/// Style vectors for every voice in a `voices-v1.0.bin` archive.
///
/// A voice holds one vector per phoneme-sequence length; picking the vector
/// by length keeps prosody consistent across utterances.
pub struct VoiceStore {
    voices: HashMap<String, Vec<StyleVector>>,
}

impl VoiceStore {
    /// Load all voices from a `.npz` (numpy zip) archive of `{voice}.npy` entries.
    pub fn load(path: &Path) -> Result<Self, KokoroError> {
        let file = File::open(path)?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|e| KokoroError::VoiceParse(format!("{}: {e}", path.display())))?;

        let mut voices = HashMap::with_capacity(zip.len());
        for i in 0..zip.len() {
            let mut entry = zip
                .by_index(i)
                .map_err(|e| KokoroError::VoiceParse(format!("zip entry {i}: {e}")))?;
            if entry.is_dir() {
                continue;
            }

            let name = entry.name().to_string();
            let voice = name.trim_end_matches(".npy");
            if voice.is_empty() {
                continue;
            }

            let mut data = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut data)
                .map_err(|e| KokoroError::VoiceParse(format!("{name}: {e}")))?;
            voices.insert(voice.to_string(), parse_npy(&data, &name)?);
        }

        log::info!("Loaded {} voices from {}", voices.len(), path.display());
        Ok(Self { voices })
    }

    pub fn contains(&self, voice: &str) -> bool {
        self.voices.contains_key(voice)
    }

    /// Style vector for `voice` at `idx`, clamped to the last available one.
    pub fn get_style(&self, voice: &str, idx: usize) -> Result<StyleVector, KokoroError> {
        let styles = self
            .voices
            .get(voice)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| KokoroError::VoiceNotFound(voice.to_string()))?;
        Ok(styles[idx.min(styles.len() - 1)])
    }

    /// List all available voice names in sorted order.
    pub fn list_voices(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.voices.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Parse a little-endian float32 `.npy` array of shape `[N, 256]` (a leading
/// singleton axis, `[N, 1, 256]`, is accepted as well).
fn parse_npy(data: &[u8], name: &str) -> Result<Vec<StyleVector>, KokoroError> {
    let bad = |msg: String| KokoroError::VoiceParse(format!("{name}: {msg}"));

    if data.len() < 10 || &data[..6] != b"\x93NUMPY" {
        return Err(bad("not a numpy array".to_string()));
    }
    // v1 header: magic(6) major(1) minor(1) header_len(u16 LE)
    let header_len = u16::from_le_bytes([data[8], data[9]]) as usize;
    let body = data
        .get(10 + header_len..)
        .ok_or_else(|| bad(format!("header truncated ({} bytes)", data.len())))?;

    if body.len() % (4 * STYLE_DIM) != 0 {
        return Err(bad(format!(
            "{} data bytes do not form whole {STYLE_DIM}-float style vectors",
            body.len()
        )));
    }

    Ok(body
        .chunks_exact(4 * STYLE_DIM)
        .map(|row| {
            let mut style = [0f32; STYLE_DIM];
            for (dst, bytes) in style.iter_mut().zip(row.chunks_exact(4)) {
                *dst = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
            style
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn npy(rows: usize, value: f32) -> Vec<u8> {
        let header = b"{'descr': '<f4', 'fortran_order': False, 'shape': (1, 256), }\n";
        let mut data = b"\x93NUMPY\x01\x00".to_vec();
        data.extend_from_slice(&(header.len() as u16).to_le_bytes());
        data.extend_from_slice(header);
        for _ in 0..rows * STYLE_DIM {
            data.extend_from_slice(&value.to_le_bytes());
        }
        data
    }

    #[test]
    fn parses_rows_of_style_vectors() {
        let styles = parse_npy(&npy(3, 0.5), "af_sarah.npy").unwrap();
        assert_eq!(styles.len(), 3);
        assert!(styles[2].iter().all(|&v| v == 0.5));
    }

    #[test]
    fn rejects_partial_rows() {
        let mut data = npy(1, 0.0);
        data.extend_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(
            parse_npy(&data, "x.npy"),
            Err(KokoroError::VoiceParse(_))
        ));
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(parse_npy(b"PK\x03\x04 not numpy", "x.npy").is_err());
    }

    #[test]
    fn style_index_is_clamped() {
        let store = VoiceStore {
            voices: HashMap::from([("af_sarah".to_string(), vec![[1.0; STYLE_DIM], [2.0; STYLE_DIM]])]),
        };
        assert_eq!(store.get_style("af_sarah", 99).unwrap()[0], 2.0);
        assert!(matches!(
            store.get_style("bf_emma", 0),
            Err(KokoroError::VoiceNotFound(_))
        ));
    }
}
