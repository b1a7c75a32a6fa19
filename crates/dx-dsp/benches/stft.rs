//! STFT benchmarks

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use dx_dsp::{Stft, triangular_overlap_weight};

fn test_signal(len: usize) -> Vec<f32> {
    (0..len).map(|i| (i as f32 * 0.013).sin() * 0.5).collect()
}

fn bench_stft_forward(c: &mut Criterion) {
    let stft = Stft::new(4096).unwrap();
    // One 5 second segment at 44.1 kHz
    let signal = test_signal(220_500);

    c.bench_function("stft_forward_4096_5s", |b| {
        b.iter(|| stft.forward(black_box(&signal)).unwrap())
    });
}

fn bench_stft_round_trip(c: &mut Criterion) {
    let stft = Stft::new(4096).unwrap();
    let signal = test_signal(220_500);

    c.bench_function("stft_round_trip_4096_5s", |b| {
        b.iter(|| {
            let spec = stft.forward(black_box(&signal)).unwrap();
            stft.inverse(spec.view(), Some(signal.len())).unwrap()
        })
    });
}

fn bench_overlap_weight(c: &mut Criterion) {
    c.bench_function("triangular_weight_220500", |b| {
        b.iter(|| triangular_overlap_weight(black_box(220_500), 1.0))
    });
}

criterion_group!(benches, bench_stft_forward, bench_stft_round_trip, bench_overlap_weight);
criterion_main!(benches);
