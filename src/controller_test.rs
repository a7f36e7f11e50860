// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::*;
use crate::driver::MockDriver;
use crate::hub::Hub;
use crate::params::TunerGain;

fn state(tuner_kind: TunerKind) -> ControllerState {
    ControllerState {
        params: RadioParams::default(),
        gains: vec![0, 9, 14, 27, 37, 77, 87, 125, 144, 157, 166, 197, 207, 229, 254, 280, 297, 328, 338, 364, 372, 386, 402, 421, 434, 439, 445, 480, 496],
        tuner_kind,
    }
}

#[test]
fn set_center_freq_applies_and_updates_cache() {
    let mut mock = MockDriver::new();
    mock.expect_set_center_freq()
        .times(1)
        .withf(|&hz| hz == 100_000_000)
        .returning(|_| Ok(()));
    let mut st = state(TunerKind::R820T);
    let hub_arc = Hub::new(Some(4));
    apply_control_message(&mut mock, &mut st, &hub_arc, ControlMessage::SetCenterFreq(100_000_000));
    assert_eq!(st.params.center_freq_hz, 100_000_000);
}

#[test]
fn set_sample_rate_applies_exactly_once_and_updates_hub_rate_hint() {
    let mut mock = MockDriver::new();
    mock.expect_set_sample_rate()
        .times(1)
        .withf(|&hz| hz == 2_400_000)
        .returning(|_| Ok(()));
    let mut st = state(TunerKind::R820T);
    let hub_arc = Hub::new(None);
    apply_control_message(&mut mock, &mut st, &hub_arc, ControlMessage::SetSampleRate(2_400_000));
    assert_eq!(st.params.sample_rate_hz, 2_400_000);
}

#[test]
fn set_gain_mode_automatic_then_manual_transitions() {
    let mut mock = MockDriver::new();
    mock.expect_set_tuner_gain()
        .times(1)
        .withf(|g| matches!(g, TunerGain::Auto))
        .returning(|_| Ok(()));
    let mut st = state(TunerKind::R820T);
    let hub_arc = Hub::new(Some(4));
    apply_control_message(&mut mock, &mut st, &hub_arc, ControlMessage::SetGainMode(GainMode::Automatic));
    assert_eq!(st.params.gain_mode, GainMode::Automatic);

    let mut mock2 = MockDriver::new();
    mock2
        .expect_set_tuner_gain()
        .times(1)
        .withf(|g| matches!(g, TunerGain::Manual(_)))
        .returning(|_| Ok(()));
    apply_control_message(&mut mock2, &mut st, &hub_arc, ControlMessage::SetGainMode(GainMode::Manual));
    assert_eq!(st.params.gain_mode, GainMode::Manual);
}

#[test]
fn set_manual_gain_clamps_to_nearest_table_entry() {
    let mut mock = MockDriver::new();
    // requesting 100 (tenths dB) should clamp to the nearest entry: 87.
    mock.expect_set_tuner_gain()
        .times(1)
        .withf(|g| matches!(g, TunerGain::Manual(87)))
        .returning(|_| Ok(()));
    let mut st = state(TunerKind::R820T);
    let hub_arc = Hub::new(Some(4));
    apply_control_message(&mut mock, &mut st, &hub_arc, ControlMessage::SetManualGain(100));
    assert_eq!(st.params.manual_gain_tenths_db, 87);
    assert_eq!(st.params.gain_mode, GainMode::Manual);
}

#[test]
fn set_gain_by_index_out_of_range_is_a_logged_noop() {
    let mock = MockDriver::new(); // no expectations set: any call fails the test
    let mut st = state(TunerKind::R820T);
    let hub_arc = Hub::new(Some(4));
    let before = st.params.clone();
    let mut mock = mock;
    apply_control_message(&mut mock, &mut st, &hub_arc, ControlMessage::SetGainByIndex(999));
    assert_eq!(st.params.manual_gain_tenths_db, before.manual_gain_tenths_db);
}

#[test]
fn set_gain_by_index_applies_table_entry() {
    let mut mock = MockDriver::new();
    mock.expect_set_tuner_gain()
        .times(1)
        .withf(|g| matches!(g, TunerGain::Manual(14)))
        .returning(|_| Ok(()));
    let mut st = state(TunerKind::R820T);
    let hub_arc = Hub::new(Some(4));
    apply_control_message(&mut mock, &mut st, &hub_arc, ControlMessage::SetGainByIndex(2));
    assert_eq!(st.params.manual_gain_tenths_db, 14);
}

#[test]
fn freq_correction_idempotent_set_reapplies_successfully_twice() {
    let mut mock = MockDriver::new();
    mock.expect_set_freq_correction()
        .times(2)
        .withf(|&ppm| ppm == 5)
        .returning(|_| Ok(()));
    let mut st = state(TunerKind::R820T);
    let hub_arc = Hub::new(Some(4));
    apply_control_message(&mut mock, &mut st, &hub_arc, ControlMessage::SetFreqCorrection(5));
    apply_control_message(&mut mock, &mut st, &hub_arc, ControlMessage::SetFreqCorrection(5));
    assert_eq!(st.params.freq_correction_ppm, 5);
}

#[test]
fn offset_tuning_ignored_on_r820t_without_touching_driver() {
    let mock = MockDriver::new(); // expect_set_offset_tuning never configured, so any call panics
    let mut st = state(TunerKind::R820T);
    let hub_arc = Hub::new(Some(4));
    let mut mock = mock;
    apply_control_message(&mut mock, &mut st, &hub_arc, ControlMessage::SetOffsetTuning(true));
    assert!(!st.params.offset_tuning);
}

#[test]
fn offset_tuning_applied_on_e4000() {
    let mut mock = MockDriver::new();
    mock.expect_set_offset_tuning()
        .times(1)
        .withf(|&on| on)
        .returning(|_| Ok(()));
    let mut st = state(TunerKind::E4000);
    let hub_arc = Hub::new(Some(4));
    apply_control_message(&mut mock, &mut st, &hub_arc, ControlMessage::SetOffsetTuning(true));
    assert!(st.params.offset_tuning);
}

#[test]
fn crystal_frequency_commands_are_accepted_as_logged_noops() {
    let mock = MockDriver::new(); // any driver call would fail the test
    let mut st = state(TunerKind::R820T);
    let hub_arc = Hub::new(Some(4));
    let mut mock = mock;
    apply_control_message(&mut mock, &mut st, &hub_arc, ControlMessage::SetRtlXtal(28_800_000));
    apply_control_message(&mut mock, &mut st, &hub_arc, ControlMessage::SetTunerXtal(28_800_000));
}

#[test]
fn set_bias_tee_applies() {
    let mut mock = MockDriver::new();
    mock.expect_set_bias_tee()
        .times(1)
        .withf(|&on| on)
        .returning(|_| Ok(()));
    let mut st = state(TunerKind::R820T);
    let hub_arc = Hub::new(Some(4));
    apply_control_message(&mut mock, &mut st, &hub_arc, ControlMessage::SetBiasTee(true));
    assert!(st.params.bias_tee);
}

#[test]
fn set_test_mode_calls_driver_and_does_not_error_out() {
    let mut mock = MockDriver::new();
    mock.expect_set_testmode()
        .times(1)
        .withf(|&on| on)
        .returning(|_| Ok(()));
    let mut st = state(TunerKind::R820T);
    let hub_arc = Hub::new(Some(4));
    apply_control_message(&mut mock, &mut st, &hub_arc, ControlMessage::SetTestMode(true));
}

#[test]
fn nearest_gain_picks_closest_entry() {
    let gains = vec![0, 9, 14, 27, 37];
    assert_eq!(nearest_gain(&gains, 30), Some(27));
    assert_eq!(nearest_gain(&gains, 1000), Some(37));
    assert_eq!(nearest_gain(&gains, -10), Some(0));
}
