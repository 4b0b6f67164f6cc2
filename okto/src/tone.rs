use std::time::Duration;

use rodio::Source;

/// An endless square wave, the classic CHIP-8 buzzer.
///
/// Always one channel at 48 kHz. The driver keeps one of these appended
/// to a paused sink and toggles playback with the sound timer.
#[derive(Clone, Debug)]
pub struct BuzzerTone {
    frequency: f32,
    current_sample: usize,
}

impl BuzzerTone {
    const SAMPLE_RATE: u32 = 48_000;
    /// A full-scale square wave is unpleasant; keep it quiet.
    const AMPLITUDE: f32 = 0.25;

    pub fn new(frequency: f32) -> Self {
        Self {
            frequency,
            current_sample: 0,
        }
    }
}

impl Iterator for BuzzerTone {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let period = Self::SAMPLE_RATE as f32 / self.frequency;
        let in_first_half = (self.current_sample as f32 % period) < period / 2.0;

        self.current_sample = self.current_sample.wrapping_add(1);

        Some(if in_first_half {
            Self::AMPLITUDE
        } else {
            -Self::AMPLITUDE
        })
    }
}

impl Source for BuzzerTone {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        Self::SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}
