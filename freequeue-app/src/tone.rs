//! Sine source that stands in for a real producer (decoder, synth, capture).

use std::f64::consts::TAU;

pub struct ToneGenerator {
    phase: f64,
    step: f64,
    gain: f32,
}

impl ToneGenerator {
    pub fn new(tone_hz: f32, sample_rate: u32, gain: f32) -> Self {
        Self {
            phase: 0.0,
            step: TAU * f64::from(tone_hz) / f64::from(sample_rate.max(1)),
            gain,
        }
    }

    /// Render the next `frames` frames into every lane of `block`.
    pub fn fill(&mut self, block: &mut [Vec<f32>], frames: usize) {
        let start = self.phase;
        for lane in block.iter_mut() {
            let mut phase = start;
            for s in lane[..frames].iter_mut() {
                *s = phase.sin() as f32 * self.gain;
                phase += self.step;
            }
        }
        self.phase = (start + self.step * frames as f64) % TAU;
    }
}

/// Root mean square over every lane of a block.
pub fn rms(block: &[Vec<f32>], frames: usize) -> f32 {
    let count = block.len() * frames;
    if count == 0 {
        return 0.0;
    }
    let sum: f64 = block
        .iter()
        .flat_map(|lane| lane[..frames].iter())
        .map(|&s| f64::from(s) * f64::from(s))
        .sum();
    (sum / count as f64).sqrt() as f32
}
