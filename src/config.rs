//! Build-time configuration for the two firmware profiles.
//! Nothing here is reconfigured at runtime; the host binary only picks a profile.

use crate::{adc::AdcConfig, dma::DmaConfig, normalize::ReferenceOffset};

// Keyword detection profile: microphone on GPIO28 (ADC2), software-paced polling

/// One second of audio
pub const KEYWORD_SAMPLES: usize = 16000;
pub const KEYWORD_SAMPLE_RATE_HZ: u32 = 16000;
pub const FEATURE_ROWS: usize = 40;
pub const FEATURE_COLS: usize = 40;
pub const ARENA_BYTES: usize = 10 * 1024;
pub const DETECTION_THRESHOLD: f32 = 0.5;
pub const CYCLE_DELAY_MS: u64 = 500;

pub const KEYWORD_ADC: AdcConfig = AdcConfig {
    channel: 2,
    pin: Some(28),
    // About 16 kS/s when free running
    clock_div: 2999,
    resolution_bits: 12,
    vref: 3.3,
};

/// Electret microphone biased at half the reference voltage
pub const KEYWORD_REFERENCE: ReferenceOffset = ReferenceOffset {
    vref: 3.3,
    max_code: 4095.0,
    offset: 1.65,
    full_scale: 32768.0,
};

// Telemetry profile: GPIO26 (ADC0), hardware-paced burst transfers

pub const TELEMETRY_SAMPLES: usize = 10000;

/// 0 = 500 kS/s, 960 = 50 kS/s, 9600 = 5 kS/s
pub const CLOCK_DIV: u32 = 12000;
pub const CAPTURE_CHANNEL: u8 = 0;
pub const TRANSFER_TIMEOUT_MS: u64 = 5000;
/// On-board LED, lit while a block transfer is running
pub const ACTIVITY_LED_PIN: u8 = 25;

pub const TELEMETRY_ADC: AdcConfig = AdcConfig {
    channel: CAPTURE_CHANNEL,
    pin: Some(26 + CAPTURE_CHANNEL),
    clock_div: CLOCK_DIV,
    resolution_bits: 12,
    vref: 3.3,
};

pub const TELEMETRY_DMA: DmaConfig = DmaConfig::ADC_FIFO;
