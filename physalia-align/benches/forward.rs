use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::Array2;
use physalia_align::{letter_dists, DpMatrix, EmissionParams, PairHmm};

fn random_letters(n: usize, seed: u64) -> Vec<usize> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            ((state >> 33) % 4) as usize
        })
        .collect()
}

fn matrix(n: usize) -> DpMatrix {
    let hmm = PairHmm::mid(
        [0.9, 0.05, 0.05],
        [[0.85, 0.05, 0.05], [0.5, 0.4, 0.0], [0.5, 0.0, 0.4]],
    )
    .unwrap();
    let s1 = random_letters(n, 17);
    let s2 = random_letters(n, 18);
    let freq = Array2::from_elem((1, 4), 0.25);
    let emission = EmissionParams::new(
        vec![1.0],
        letter_dists(&s1, 1, 4, 0.1),
        letter_dists(&s2, 1, 4, 0.1),
        freq,
    )
    .unwrap();
    DpMatrix::with_emission(n, n, hmm, 1.0, emission).unwrap()
}

fn bench_forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward");

    for &n in &[50usize, 200] {
        let m = matrix(n);
        group.bench_function(format!("square_{n}"), |b| {
            b.iter(|| {
                let mut m = m.clone();
                m.forward_square();
                black_box(m.forward_total())
            })
        });

        let m = matrix(n);
        group.bench_function(format!("band8_{n}"), |b| {
            b.iter(|| {
                let mut m = m.clone();
                m.forward_band(8);
                black_box(m.forward_total())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_forward);
criterion_main!(benches);
