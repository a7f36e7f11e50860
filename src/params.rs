//! Radio Parameters and related value types, shared between the device layer
//! (`rtlsdr::RtlSdr`), the `Driver` adapter trait, and the Radio Controller.

pub use crate::tuners::TunerGain;

/// Direct sampling mode. `OnSwap` swaps the I/Q ADC inputs, used on some
/// vendor boards where the RF input is wired to the Q branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectSampleMode {
    #[default]
    Off,
    On,
    OnSwap,
}

impl DirectSampleMode {
    /// Maps the wire command's 0/1/2 parameter (code `0x09`) onto a direct
    /// sampling mode. Values other than 0/1/2 fall back to `Off`, matching
    /// the reference server's lenient decoding.
    pub fn from_wire(value: u32) -> Self {
        match value {
            1 => DirectSampleMode::On,
            2 => DirectSampleMode::OnSwap,
            _ => DirectSampleMode::Off,
        }
    }
}

/// Gain mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GainMode {
    #[default]
    Automatic,
    Manual,
}

/// Tuner Descriptor. Set once at device open, immutable thereafter. The
/// numeric values are the wire codes sent in the greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunerKind {
    Unknown = 0,
    E4000 = 1,
    Fc0012 = 2,
    Fc0013 = 3,
    Fc2580 = 4,
    R820T = 5,
    R828D = 6,
}

impl TunerKind {
    pub fn wire_code(self) -> u32 {
        self as u32
    }

    pub fn from_tuner_id(id: &str) -> Self {
        match id {
            "r820t" => TunerKind::R820T,
            "r828d" => TunerKind::R828D,
            "e4000" => TunerKind::E4000,
            "fc0012" => TunerKind::Fc0012,
            "fc0013" => TunerKind::Fc0013,
            "fc2580" => TunerKind::Fc2580,
            _ => TunerKind::Unknown,
        }
    }

    /// Offset tuning is meaningless on the R82xx family; requests are
    /// accepted and silently ignored there.
    pub fn supports_offset_tuning(self) -> bool {
        !matches!(self, TunerKind::R820T | TunerKind::R828D)
    }
}

/// Radio Parameters. Reads reflect the driver's last-successful value;
/// setters are applied through the Radio Controller only.
#[derive(Debug, Clone)]
pub struct RadioParams {
    pub center_freq_hz: u32,
    pub sample_rate_hz: u32,
    pub gain_mode: GainMode,
    pub manual_gain_tenths_db: i32,
    pub freq_correction_ppm: i32,
    pub rtl_agc: bool,
    pub direct_sampling: DirectSampleMode,
    pub offset_tuning: bool,
    pub bias_tee: bool,
    pub tuner_bandwidth_hz: u32,
}

impl Default for RadioParams {
    fn default() -> Self {
        RadioParams {
            center_freq_hz: DEFAULT_FREQUENCY_HZ,
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            gain_mode: GainMode::Automatic,
            manual_gain_tenths_db: 0,
            freq_correction_ppm: 0,
            rtl_agc: false,
            direct_sampling: DirectSampleMode::Off,
            offset_tuning: false,
            bias_tee: false,
            tuner_bandwidth_hz: 0,
        }
    }
}

pub const DEFAULT_FREQUENCY_HZ: u32 = 100_000_000;
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 2_048_000;

/// One decoded command frame, translated from wire bytes by
/// `server::command` and applied to the driver by the Radio Controller's
/// control path. Mirrors the shape of the `ControlMessage` enum in the
/// reference `rtl_tcp.rs`, extended with the two distinct crystal-frequency
/// variants the real protocol carries.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    SetCenterFreq(u32),
    SetSampleRate(u32),
    SetGainMode(GainMode),
    SetManualGain(i32),
    SetFreqCorrection(i32),
    SetIfGain { stage: u16, tenths_db: i16 },
    SetTestMode(bool),
    SetRtlAgc(bool),
    SetDirectSampling(DirectSampleMode),
    SetOffsetTuning(bool),
    SetRtlXtal(u32),
    SetTunerXtal(u32),
    SetGainByIndex(usize),
    SetBiasTee(bool),
}
