//! Hot-path throughput: samples per second through the demodulator bank.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use kitfox_core::config::ChannelConfig;
use kitfox_core::frame::{CallSign, Frame, PID_NO_LAYER3};
use kitfox_core::hdlc::stuff::HdlcEncoder;
use kitfox_core::modem::modulate::Modulator;
use kitfox_core::modem::DemodBank;

fn frame_audio(cfg: &ChannelConfig, sample_rate: u32) -> Vec<i16> {
    let dest: CallSign = "APRS".parse().unwrap();
    let src: CallSign = "N0CALL".parse().unwrap();
    let frame = Frame::new_ui(dest, src, &[], PID_NO_LAYER3, &[0x55u8; 100]).unwrap();

    let mut enc = HdlcEncoder::new();
    enc.push_flags(16);
    enc.push_body(frame.as_bytes());
    enc.push_flags(8);

    let mut modulator = Modulator::new(cfg, sample_rate);
    let mut audio = Vec::new();
    modulator.modulate_bits(enc.bits(), &mut audio);
    audio
}

fn bench_afsk_bank(c: &mut Criterion) {
    let sample_rate = 44_100;
    let mut group = c.benchmark_group("demod");

    for (name, subchans, slicers) in [("1x1", 1u8, 1u8), ("1x3", 1, 3), ("3x3", 3, 3)] {
        let cfg = ChannelConfig {
            subchannels: subchans,
            slicers,
            subchannel_spacing_hz: 100.0,
            ..ChannelConfig::default()
        };
        let audio = frame_audio(&cfg, sample_rate);
        group.throughput(Throughput::Elements(audio.len() as u64));
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut bank = DemodBank::new(0, &cfg, sample_rate).unwrap();
                for &s in &audio {
                    bank.process_sample(black_box(s));
                }
                while let Some(ev) = bank.poll_event() {
                    black_box(ev);
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_afsk_bank);
criterion_main!(benches);
