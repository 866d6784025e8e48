//! Hardware parameter envelope advertised to the PCM client.

use serde::Serialize;

use crate::codec::SampleFormat;
use crate::error::{Result, SyncSoundError};

use super::HwParams;

/// Largest period the bus DMA can move in one transfer, in bytes.
pub const MAX_PERIOD_SIZE: u32 = 8192;

/// The bus clock fixes the sample rate.
pub const SAMPLE_RATE: u32 = 48_000;

/// Bounds within which `hw_params` may negotiate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PcmHardware {
    pub rate_min: u32,
    pub rate_max: u32,
    pub channels_min: u32,
    pub channels_max: u32,
    pub period_bytes_min: u32,
    pub period_bytes_max: u32,
    pub periods_min: u32,
    pub periods_max: u32,
    pub buffer_bytes_max: u32,
    #[serde(skip)]
    pub formats: Vec<SampleFormat>,
}

impl Default for PcmHardware {
    fn default() -> Self {
        Self {
            rate_min: SAMPLE_RATE,
            rate_max: SAMPLE_RATE,
            channels_min: 1,
            channels_max: 6,
            period_bytes_min: 128,
            period_bytes_max: MAX_PERIOD_SIZE,
            periods_min: 1,
            periods_max: 128,
            buffer_bytes_max: 128 * MAX_PERIOD_SIZE,
            formats: vec![
                SampleFormat::S16_BE,
                SampleFormat::S16_LE,
                SampleFormat::S24_3BE,
                SampleFormat::S24_3LE,
            ],
        }
    }
}

impl PcmHardware {
    /// Narrow the template to a bound bus channel.
    ///
    /// `buffer_size` is the per-channel tunable; a non-positive value means
    /// "unset" and leaves the period at [`MAX_PERIOD_SIZE`]. A set value pins
    /// the period size exactly.
    pub fn for_bus_channel(&self, buffer_size: i32, num_buffers: u32) -> Self {
        let mut hw = self.clone();
        let period_bytes = if buffer_size > 0 {
            hw.period_bytes_min = buffer_size as u32;
            buffer_size as u32
        } else {
            MAX_PERIOD_SIZE
        };
        hw.periods_min = 1;
        hw.periods_max = num_buffers;
        hw.period_bytes_max = period_bytes;
        hw.buffer_bytes_max = period_bytes.saturating_mul(num_buffers);
        hw
    }

    /// Check negotiated parameters against the envelope.
    pub fn validate(&self, params: &HwParams) -> Result<()> {
        if !self.formats.contains(&params.format) {
            return Err(SyncSoundError::InvalidParameter(format!(
                "sample format {} not supported",
                params.format
            )));
        }
        if params.channels < self.channels_min || params.channels > self.channels_max {
            return Err(SyncSoundError::InvalidParameter(format!(
                "{} channels requested, supported {}..={}",
                params.channels, self.channels_min, self.channels_max
            )));
        }
        if params.rate < self.rate_min || params.rate > self.rate_max {
            return Err(SyncSoundError::InvalidParameter(format!(
                "rate {} Hz outside {}..={}",
                params.rate, self.rate_min, self.rate_max
            )));
        }
        if params.frame_bytes() == 0 || params.period_frames == 0 {
            return Err(SyncSoundError::InvalidParameter(
                "empty frame or period".to_string(),
            ));
        }
        let period_bytes = params.period_bytes();
        if period_bytes < self.period_bytes_min as usize
            || period_bytes > self.period_bytes_max as usize
        {
            return Err(SyncSoundError::InvalidParameter(format!(
                "period of {} bytes outside {}..={}",
                period_bytes, self.period_bytes_min, self.period_bytes_max
            )));
        }
        if params.periods < self.periods_min || params.periods > self.periods_max {
            return Err(SyncSoundError::InvalidParameter(format!(
                "{} periods requested, supported {}..={}",
                params.periods, self.periods_min, self.periods_max
            )));
        }
        Ok(())
    }
}
