//! Randomized checks of propagation invariants over generated cohorts.

use approx::assert_abs_diff_eq;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::Path;

use igwas::covariance::CovarianceMatrix;
use igwas::progress::NoopPropagationProgress;
use igwas::project::BetaVector;
use igwas::propagate::{FeatureSource, propagate_to_file, sources_in_dir};
use igwas::reader::GwasStatsReader;
use igwas::types::{PropagationOptions, StatColumns, VarianceModelKind, VariantStat};
use tempfile::tempdir;

const NUM_FEATURES: usize = 4;
const NUM_VARIANTS: usize = 250;

/// Writes one statistic file per feature and returns a positive definite covariance.
fn generate_cohort(dir: &Path, rng: &mut StdRng) -> CovarianceMatrix {
    let names: Vec<String> = (0..NUM_FEATURES).map(|i| format!("f{i}")).collect();
    for name in &names {
        let mut text = String::from("ID\tBETA\tSE\tOBS_CT\n");
        for v in 0..NUM_VARIANTS {
            text.push_str(&format!(
                "chr1:{v}\t{}\t{}\t{}\n",
                rng.gen_range(-0.5..0.5),
                rng.gen_range(0.001..0.1),
                rng.gen_range(500..5000)
            ));
        }
        fs::write(dir.join(format!("{name}.tsv")), text).unwrap();
    }

    // A·Aᵗ plus a ridge is symmetric positive definite.
    let a = Array2::from_shape_fn((NUM_FEATURES, NUM_FEATURES), |_| rng.gen_range(-1.0..1.0));
    let mut covariance = a.dot(&a.t());
    for i in 0..NUM_FEATURES {
        covariance[[i, i]] += 0.5;
    }
    // Exact symmetry after the product.
    let covariance = Array2::from_shape_fn(covariance.dim(), |(i, j)| {
        if i <= j { covariance[[i, j]] } else { covariance[[j, i]] }
    });
    CovarianceMatrix::new(names, covariance).unwrap()
}

fn random_beta(rng: &mut StdRng) -> BetaVector {
    let names = (0..NUM_FEATURES).map(|i| format!("f{i}")).collect();
    let values = (0..NUM_FEATURES)
        .map(|i| if i == 2 { 0.0 } else { rng.gen_range(-2.0..2.0) })
        .collect();
    BetaVector::new(names, values)
}

fn run(
    beta: &BetaVector,
    covariance: &CovarianceMatrix,
    sources: &[FeatureSource],
    options: &PropagationOptions,
    output: &Path,
) -> Vec<(String, VariantStat)> {
    propagate_to_file(
        beta,
        covariance,
        sources,
        options,
        output,
        &mut NoopPropagationProgress,
    )
    .unwrap();
    read_all(output)
}

fn read_all(path: &Path) -> Vec<(String, VariantStat)> {
    let mut reader = GwasStatsReader::open(path, &StatColumns::default()).unwrap();
    let mut rows = Vec::new();
    let mut id = String::new();
    while let Some(stat) = reader.read_variant(&mut id).unwrap() {
        rows.push((id.clone(), stat));
    }
    rows
}

fn options(chunk_size: usize, num_threads: usize, model: VarianceModelKind) -> PropagationOptions {
    PropagationOptions {
        chunk_size,
        num_threads,
        capacity: 3,
        quiet: true,
        variance_model: model,
        num_covar: 5,
        ..PropagationOptions::default()
    }
}

#[test]
fn results_do_not_depend_on_chunking_or_threads() {
    let mut rng = StdRng::seed_from_u64(0x1f2e3d);
    let dir = tempdir().unwrap();
    let gwas = dir.path().join("gwas");
    fs::create_dir(&gwas).unwrap();
    let covariance = generate_cohort(&gwas, &mut rng);
    let sources = sources_in_dir(&gwas).unwrap();

    for model in [
        VarianceModelKind::CorrelatedDelta,
        VarianceModelKind::GenotypePartialVariance,
    ] {
        let beta = random_beta(&mut rng);
        let reference = run(
            &beta,
            &covariance,
            &sources,
            &options(10_000, 1, model),
            &dir.path().join("reference.tsv"),
        );
        assert_eq!(reference.len(), NUM_VARIANTS);

        for (chunk_size, threads) in [(1, 1), (1, 6), (17, 3), (NUM_VARIANTS, 2)] {
            let rows = run(
                &beta,
                &covariance,
                &sources,
                &options(chunk_size, threads, model),
                &dir.path().join(format!("{chunk_size}-{threads}.tsv")),
            );
            assert_eq!(rows.len(), reference.len());
            for ((id, stat), (ref_id, ref_stat)) in rows.iter().zip(&reference) {
                assert_eq!(id, ref_id);
                assert_abs_diff_eq!(stat.effect, ref_stat.effect, epsilon = 1e-9);
                assert_abs_diff_eq!(stat.se, ref_stat.se, epsilon = 1e-9);
                assert_eq!(stat.sample_size, ref_stat.sample_size);
            }
        }
    }
}

#[test]
fn effect_is_linear_and_sample_size_bounded() {
    let mut rng = StdRng::seed_from_u64(42);
    let dir = tempdir().unwrap();
    let gwas = dir.path().join("gwas");
    fs::create_dir(&gwas).unwrap();
    let covariance = generate_cohort(&gwas, &mut rng);
    let sources = sources_in_dir(&gwas).unwrap();
    let inputs: Vec<_> = sources.iter().map(|s| read_all(&s.path)).collect();

    let beta = random_beta(&mut rng);
    let rows = run(
        &beta,
        &covariance,
        &sources,
        &options(64, 4, VarianceModelKind::CorrelatedDelta),
        &dir.path().join("out.tsv"),
    );

    for (v, (id, stat)) in rows.iter().enumerate() {
        assert_eq!(id, &format!("chr1:{v}"));
        let mut effect = 0.0;
        let mut min_n = u64::MAX;
        for (f, coefficient) in beta.values().iter().enumerate() {
            if *coefficient != 0.0 {
                effect += coefficient * inputs[f][v].1.effect;
                min_n = min_n.min(inputs[f][v].1.sample_size);
            }
        }
        assert_abs_diff_eq!(stat.effect, effect, epsilon = 1e-12);
        assert!(stat.sample_size <= min_n);
        assert!(stat.se.is_finite() && stat.se >= 0.0);
    }
}

#[test]
fn every_single_feature_passes_through() {
    let mut rng = StdRng::seed_from_u64(7);
    let dir = tempdir().unwrap();
    let gwas = dir.path().join("gwas");
    fs::create_dir(&gwas).unwrap();
    let covariance = generate_cohort(&gwas, &mut rng);
    let sources = sources_in_dir(&gwas).unwrap();

    for (f, source) in sources.iter().enumerate() {
        let names = covariance.labels().to_vec();
        let values = (0..NUM_FEATURES).map(|i| if i == f { 1.0 } else { 0.0 }).collect();
        let beta = BetaVector::new(names, values);
        let rows = run(
            &beta,
            &covariance,
            &sources,
            &options(33, 2, VarianceModelKind::GenotypePartialVariance),
            &dir.path().join(format!("{}.out.tsv", source.feature)),
        );
        assert_eq!(rows, read_all(&source.path));
    }
}
