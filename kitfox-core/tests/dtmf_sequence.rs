//! End-to-end DTMF: synthesized keypad audio through the detector and
//! the command sequencer.

use std::f32::consts::TAU;

use kitfox_core::dtmf::{DtmfDetector, DtmfSequencer};

const FS: u32 = 44_100;

fn pair_for(c: char) -> (f32, f32) {
    let rows = [697.0, 770.0, 852.0, 941.0];
    let cols = [1209.0, 1336.0, 1477.0, 1633.0];
    let keypad = [
        ['1', '2', '3', 'A'],
        ['4', '5', '6', 'B'],
        ['7', '8', '9', 'C'],
        ['*', '0', '#', 'D'],
    ];
    for (r, row) in keypad.iter().enumerate() {
        for (col, &key) in row.iter().enumerate() {
            if key == c {
                return (rows[r], cols[col]);
            }
        }
    }
    panic!("not a keypad character: {}", c);
}

fn keypad_audio(keys: &str, press_secs: f32, gap_secs: f32) -> Vec<i16> {
    let mut audio = Vec::new();
    for c in keys.chars() {
        let (row, col) = pair_for(c);
        let n = (FS as f32 * press_secs) as usize;
        for i in 0..n {
            let t = i as f32 / FS as f32;
            let v = (TAU * row * t).sin() * 6000.0 + (TAU * col * t).sin() * 6000.0;
            audio.push(v as i16);
        }
        audio.extend(std::iter::repeat(0).take((FS as f32 * gap_secs) as usize));
    }
    audio
}

fn detect(audio: &[i16]) -> String {
    let mut detector = DtmfDetector::new(FS);
    let mut out = String::new();
    for &s in audio {
        if let Some(c) = detector.process_sample(s) {
            out.push(c);
        }
    }
    out
}

#[test]
fn all_sixteen_keys_with_50ms_cadence() {
    let keys = "123A456B789C*0#D";
    let audio = keypad_audio(keys, 0.05, 0.05);
    assert_eq!(detect(&audio), keys);
}

#[test]
fn sequencer_cuts_at_the_hash() {
    let audio = keypad_audio("B002#", 0.06, 0.06);
    let mut detector = DtmfDetector::new(FS);
    let mut sequencer = DtmfSequencer::new();
    let mut sequences = Vec::new();
    for &s in &audio {
        if let Some(c) = detector.process_sample(s) {
            if let Some(seq) = sequencer.push(c) {
                sequences.push(seq);
            }
        }
    }
    assert_eq!(sequences, vec!["B002#".to_string()]);
}

#[test]
fn long_silence_aborts_a_partial_sequence() {
    let mut audio = keypad_audio("12", 0.06, 0.06);
    audio.extend(std::iter::repeat(0).take(6 * FS as usize));
    audio.extend(keypad_audio("9#", 0.06, 0.06));

    let mut detector = DtmfDetector::new(FS);
    let mut sequencer = DtmfSequencer::new();
    let mut sequences = Vec::new();
    for &s in &audio {
        if let Some(c) = detector.process_sample(s) {
            if let Some(seq) = sequencer.push(c) {
                sequences.push(seq);
            }
        }
    }
    // The timeout marker cleared "12"; only the second entry completes.
    assert_eq!(sequences, vec!["9#".to_string()]);
}
