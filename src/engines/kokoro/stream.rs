use std::collections::VecDeque;

use super::model::{KokoroError, KokoroModel, SAMPLE_RATE};
use super::voices::StyleVector;
use crate::AudioChunk;

/// Crossfade (in samples) used when concatenating segments into one buffer.
pub const CROSSFADE_SAMPLES: usize = 240; // 10ms @ 24kHz

/// Pull-based synthesis over pre-phonemized segments.
///
/// Each call to `next()` runs inference for exactly one segment, so nothing
/// is generated ahead of the consumer. After an error the stream is drained.
pub struct KokoroStream<'a> {
    model: &'a mut KokoroModel,
    segments: VecDeque<Vec<i64>>,
    style: StyleVector,
    speed: f32,
    produced: usize,
}

impl<'a> KokoroStream<'a> {
    pub(crate) fn new(
        model: &'a mut KokoroModel,
        segments: Vec<Vec<i64>>,
        style: StyleVector,
        speed: f32,
    ) -> Self {
        Self {
            model,
            segments: segments.into(),
            style,
            speed,
            produced: 0,
        }
    }
}

impl Iterator for KokoroStream<'_> {
    type Item = Result<AudioChunk, KokoroError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(tokens) = self.segments.pop_front() {
            match self.model.infer(&tokens, &self.style, self.speed) {
                Ok(samples) if samples.is_empty() => continue,
                Ok(samples) => {
                    self.produced += 1;
                    log::debug!(
                        "Kokoro segment {} ready ({} tokens, {} samples)",
                        self.produced,
                        tokens.len(),
                        samples.len()
                    );
                    return Some(Ok(AudioChunk {
                        samples,
                        sample_rate: SAMPLE_RATE,
                    }));
                }
                Err(e) => {
                    self.segments.clear();
                    return Some(Err(e));
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.segments.len()))
    }
}

/// Append `src` to `dst`, blending the seam linearly over `crossfade_samples`.
pub fn append_with_crossfade(dst: &mut Vec<f32>, src: &[f32], crossfade_samples: usize) {
    let overlap = crossfade_samples.min(dst.len()).min(src.len());
    let start = dst.len() - overlap;
    for (i, (d, s)) in dst[start..].iter_mut().zip(&src[..overlap]).enumerate() {
        let t = (i + 1) as f32 / (overlap as f32 + 1.0);
        *d = *d * (1.0 - t) + s * t;
    }
    dst.extend_from_slice(&src[overlap..]);
}
