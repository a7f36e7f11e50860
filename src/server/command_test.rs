// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::*;

fn frame(code: u8, param: u32) -> [u8; FRAME_LEN] {
    let p = param.to_be_bytes();
    [code, p[0], p[1], p[2], p[3]]
}

#[test]
fn decode_splits_code_and_big_endian_param() {
    let f = CommandFrame::decode(frame(0x01, 100_000_000));
    assert_eq!(f.code, 0x01);
    assert_eq!(f.param, 100_000_000);
}

#[test]
fn set_center_frequency_translates() {
    let f = CommandFrame::decode(frame(0x01, 100_000_000));
    assert_eq!(f.translate(), Some(ControlMessage::SetCenterFreq(100_000_000)));
}

#[test]
fn set_sample_rate_translates() {
    let f = CommandFrame::decode(frame(0x02, 2_048_000));
    assert_eq!(f.translate(), Some(ControlMessage::SetSampleRate(2_048_000)));
}

#[test]
fn set_gain_mode_zero_is_automatic_nonzero_is_manual() {
    assert_eq!(
        CommandFrame::decode(frame(0x03, 0)).translate(),
        Some(ControlMessage::SetGainMode(GainMode::Automatic))
    );
    assert_eq!(
        CommandFrame::decode(frame(0x03, 1)).translate(),
        Some(ControlMessage::SetGainMode(GainMode::Manual))
    );
}

#[test]
fn set_manual_gain_translates_signed_value() {
    let f = CommandFrame::decode(frame(0x04, (-50i32) as u32));
    assert_eq!(f.translate(), Some(ControlMessage::SetManualGain(-50)));
}

#[test]
fn set_freq_correction_translates_signed_value() {
    let f = CommandFrame::decode(frame(0x05, (-3i32) as u32));
    assert_eq!(f.translate(), Some(ControlMessage::SetFreqCorrection(-3)));
}

#[test]
fn set_if_gain_splits_stage_and_gain() {
    let param = (2u32 << 16) | (0xfff6u32 & 0xffff); // stage 2, gain -10 tenths dB
    let f = CommandFrame::decode(frame(0x06, param));
    assert_eq!(
        f.translate(),
        Some(ControlMessage::SetIfGain {
            stage: 2,
            tenths_db: -10,
        })
    );
}

#[test]
fn set_test_mode_translates() {
    assert_eq!(
        CommandFrame::decode(frame(0x07, 1)).translate(),
        Some(ControlMessage::SetTestMode(true))
    );
}

#[test]
fn set_rtl_agc_translates() {
    assert_eq!(
        CommandFrame::decode(frame(0x08, 1)).translate(),
        Some(ControlMessage::SetRtlAgc(true))
    );
}

#[test]
fn set_direct_sampling_translates_each_mode() {
    assert_eq!(
        CommandFrame::decode(frame(0x09, 0)).translate(),
        Some(ControlMessage::SetDirectSampling(DirectSampleMode::Off))
    );
    assert_eq!(
        CommandFrame::decode(frame(0x09, 1)).translate(),
        Some(ControlMessage::SetDirectSampling(DirectSampleMode::On))
    );
    assert_eq!(
        CommandFrame::decode(frame(0x09, 2)).translate(),
        Some(ControlMessage::SetDirectSampling(DirectSampleMode::OnSwap))
    );
}

#[test]
fn set_offset_tuning_translates() {
    assert_eq!(
        CommandFrame::decode(frame(0x0a, 1)).translate(),
        Some(ControlMessage::SetOffsetTuning(true))
    );
}

#[test]
fn set_rtl_and_tuner_xtal_remain_distinct_codes() {
    assert_eq!(
        CommandFrame::decode(frame(0x0b, 28_800_000)).translate(),
        Some(ControlMessage::SetRtlXtal(28_800_000))
    );
    assert_eq!(
        CommandFrame::decode(frame(0x0c, 28_800_000)).translate(),
        Some(ControlMessage::SetTunerXtal(28_800_000))
    );
}

#[test]
fn set_gain_by_index_translates() {
    assert_eq!(
        CommandFrame::decode(frame(0x0d, 7)).translate(),
        Some(ControlMessage::SetGainByIndex(7))
    );
}

#[test]
fn set_bias_tee_translates() {
    assert_eq!(
        CommandFrame::decode(frame(0x0e, 1)).translate(),
        Some(ControlMessage::SetBiasTee(true))
    );
}

#[test]
fn unknown_code_translates_to_none() {
    assert_eq!(CommandFrame::decode(frame(0xff, 0)).translate(), None);
}
