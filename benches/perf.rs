use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use goalcast::learners::{LearnerConfig, LearnerRegistry, ProbabilityModel, RANDOM_FOREST, TrainingData};
use goalcast::metrics::roc_auc;
use goalcast::pipeline::{TrainConfig, train};
use goalcast::sample::{FeatureTable, Sample};

fn synthetic_rows(n: usize, width: usize, seed: u64) -> (Vec<Vec<f64>>, Vec<u8>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut x = Vec::with_capacity(n);
    let mut y = Vec::with_capacity(n);
    for _ in 0..n {
        let row = (0..width).map(|_| rng.gen_range(-1.0..1.0)).collect::<Vec<f64>>();
        let signal = row[0] + 0.5 * row[1] + rng.gen_range(-0.5..0.5);
        y.push(u8::from(signal > 0.0));
        x.push(row);
    }
    (x, y)
}

fn bench_forest_fit(c: &mut Criterion) {
    let (x, y) = synthetic_rows(1_000, 12, 7);
    let registry = LearnerRegistry::with_defaults();
    let config = LearnerConfig::new(RANDOM_FOREST).with_param("n_trees", 50.0);
    c.bench_function("forest_fit_1k_x12", |b| {
        b.iter(|| {
            let data = TrainingData {
                target: "bench",
                x: black_box(&x),
                y: black_box(&y),
            };
            let model = registry.fit(&config, &data, 42).unwrap();
            black_box(model.tree_count());
        })
    });
}

fn bench_forest_predict(c: &mut Criterion) {
    let (x, y) = synthetic_rows(1_000, 12, 11);
    let registry = LearnerRegistry::with_defaults();
    let data = TrainingData {
        target: "bench",
        x: &x,
        y: &y,
    };
    let model = registry.fit(&LearnerConfig::new(RANDOM_FOREST), &data, 42).unwrap();
    c.bench_function("forest_predict_1k", |b| {
        b.iter(|| {
            let probs = x.iter().map(|row| model.predict_proba(row)).collect::<Vec<_>>();
            black_box(roc_auc(&probs, &y));
        })
    });
}

fn bench_train_pipeline(c: &mut Criterion) {
    let (x, y) = synthetic_rows(400, 8, 3);
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    let samples = x
        .iter()
        .zip(&y)
        .enumerate()
        .map(|(i, (row, label))| {
            let mut s = Sample::new(format!("m{i}"), start + chrono::Duration::days(i as i64));
            for (j, v) in row.iter().enumerate() {
                s = s.with_feature(&format!("f{j}"), *v);
            }
            s.with_target("home_win", *label)
        })
        .collect::<Vec<_>>();
    let table = FeatureTable::new(samples).unwrap();
    let registry = LearnerRegistry::with_defaults();
    let config = TrainConfig {
        learners: vec![
            LearnerConfig::new(RANDOM_FOREST).with_param("n_trees", 20.0),
            LearnerConfig::new("gradient_boosting").with_param("n_stages", 20.0),
        ],
        ..TrainConfig::default()
    };
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);
    group.bench_function("train_400_rows", |b| {
        b.iter(|| {
            let outcome = train(black_box(&table), "home_win", &config, &registry).unwrap();
            black_box(outcome.report.rows.len());
        })
    });
    group.finish();
}

criterion_group!(benches, bench_forest_fit, bench_forest_predict, bench_train_pipeline);
criterion_main!(benches);
