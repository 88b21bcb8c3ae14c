use approx::assert_abs_diff_eq;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use igwas::pipeline::{RequestMetadata, Settings, Stage, run_pipeline};
use igwas::reader::GwasStatsReader;
use igwas::types::{StatColumns, VariantStat};
use tempfile::{TempDir, tempdir};

struct Fixture {
    _root: TempDir,
    settings: Settings,
    cohort_dir: PathBuf,
    work: PathBuf,
    results: PathBuf,
}

/// Two subjects with age and bmi, uncorrelated per-feature GWAS with identical
/// statistics at three variants.
fn stage_cohort(with_left_inverse: bool) -> Fixture {
    let root = tempdir().expect("temporary directory");
    let cohort_dir = root.path().join("data").join("cohorts").join("demo");
    fs::create_dir_all(cohort_dir.join("gwas")).unwrap();
    fs::write(cohort_dir.join("cohort.toml"), "name = \"demo\"\nnum_covar = 0\n").unwrap();
    fs::write(cohort_dir.join("phenotypes.tsv"), "age\tbmi\n40\t25\n50\t30\n").unwrap();
    fs::write(
        cohort_dir.join("covariance.tsv"),
        "feature\tage\tbmi\nage\t100\t0\nbmi\t0\t25\n",
    )
    .unwrap();
    if with_left_inverse {
        fs::write(
            cohort_dir.join("left_inverse.tsv"),
            "age\tbmi\n-0.6\t1.0\n0.5\t-0.8\n",
        )
        .unwrap();
    }
    let stats = "ID\tBETA\tSE\tOBS_CT\nrs1\t0.1\t0.01\t1000\nrs2\t0.1\t0.01\t1000\nrs3\t0.1\t0.01\t1000\n";
    fs::write(cohort_dir.join("gwas").join("age.tsv"), stats).unwrap();
    fs::write(cohort_dir.join("gwas").join("bmi.tsv"), stats).unwrap();

    let work = root.path().join("work");
    let results = root.path().join("results");
    let mut settings = Settings::default();
    settings.storage.data_root = root.path().join("data");
    settings.storage.temp_root = Some(work.clone());
    settings.storage.results_root = results.clone();
    settings.indirect_gwas.chunk_size = 2;
    settings.indirect_gwas.num_threads = Some(2);
    settings.indirect_gwas.quiet = true;

    Fixture {
        _root: root,
        settings,
        cohort_dir,
        work,
        results,
    }
}

fn read_stats(path: &Path) -> Vec<(String, VariantStat)> {
    let mut reader = GwasStatsReader::open(path, &StatColumns::default()).unwrap();
    let mut rows = Vec::new();
    let mut id = String::new();
    while let Some(stat) = reader.read_variant(&mut id).unwrap() {
        rows.push((id.clone(), stat));
    }
    rows
}

fn workspace_is_gone(work: &Path) -> bool {
    !work.exists() || fs::read_dir(work).unwrap().next().is_none()
}

#[test]
fn sum_of_age_and_bmi() {
    let fixture = stage_cohort(true);
    let result = run_pipeline(&fixture.settings, "req-1", "age bmi +", "demo").unwrap();

    assert_eq!(result.request_id, "req-1");
    assert_eq!(result.num_variants, 3);
    assert_abs_diff_eq!(result.rsquared.unwrap(), 1.0, epsilon = 1e-9);
    let url = result.url.expect("uploaded result has a URL");
    assert!(url.starts_with("file://"));

    let uploaded = fixture.results.join("igwas").join("req-1.tsv.gz");
    let rows = read_stats(&uploaded);
    let ids: Vec<_> = rows.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["rs1", "rs2", "rs3"]);
    for (_, stat) in rows {
        assert_abs_diff_eq!(stat.effect, 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(stat.se, (0.01f64.powi(2) + 0.01f64.powi(2)).sqrt(), epsilon = 1e-12);
        assert_eq!(stat.sample_size, 1000);
    }
    assert!(workspace_is_gone(&fixture.work));
}

#[test]
fn result_ships_with_its_provenance() {
    let fixture = stage_cohort(true);
    let result = run_pipeline(&fixture.settings, "req-meta", "age bmi +", "demo").unwrap();

    let metadata_url = result.metadata_url.expect("uploaded metadata has a URL");
    assert!(metadata_url.contains("req-meta.metadata.toml?expires="));
    let metadata =
        RequestMetadata::load(&fixture.results.join("igwas").join("req-meta.metadata.toml"))
            .unwrap();
    assert_eq!(
        metadata,
        RequestMetadata {
            request_id: "req-meta".to_string(),
            phenotype_definition: "`age` `bmi` [ADD]".to_string(),
            cohort: "demo".to_string(),
            num_subjects: 2,
        }
    );
}

#[test]
fn root_wrapped_feature_is_returned_unchanged() {
    let fixture = stage_cohort(true);
    fs::write(
        fixture.cohort_dir.join("gwas").join("age.tsv"),
        "ID\tBETA\tSE\tOBS_CT\nrs1\t0.31\t0.07\t812\nrs2\t-2e-4\t0.5\t9\nrs3\t0.0\t1.0\t1000\n",
    )
    .unwrap();
    let mut settings = fixture.settings.clone();
    settings.indirect_gwas.compress = false;

    let result = run_pipeline(&settings, "rooted", "`age` [ROOT]", "demo").unwrap();
    assert_eq!(result.num_variants, 3);
    assert_eq!(
        read_stats(&fixture.results.join("igwas").join("rooted.tsv")),
        read_stats(&fixture.cohort_dir.join("gwas").join("age.tsv"))
    );
}

#[test]
fn single_feature_is_returned_unchanged() {
    let fixture = stage_cohort(true);
    fs::write(
        fixture.cohort_dir.join("gwas").join("bmi.tsv"),
        "ID\tBETA\tSE\tOBS_CT\nrs1\t-0.37\t0.021\t977\nrs2\t0.5\t0.3\t12\nrs3\t1e-5\t0.002\t1000\n",
    )
    .unwrap();
    let mut settings = fixture.settings.clone();
    settings.indirect_gwas.compress = false;

    let result = run_pipeline(&settings, "just-bmi", "bmi", "demo").unwrap();
    assert_eq!(result.num_variants, 3);
    assert_eq!(
        read_stats(&fixture.results.join("igwas").join("just-bmi.tsv")),
        read_stats(&fixture.cohort_dir.join("gwas").join("bmi.tsv"))
    );
}

#[test]
fn missing_left_inverse_fails_at_the_beta_stage() {
    let fixture = stage_cohort(false);
    let failure = run_pipeline(&fixture.settings, "req-2", "age bmi +", "demo").unwrap_err();

    assert_eq!(failure.stage, Stage::ComputeBeta);
    assert_eq!(failure.http_status_hint, 500);
    assert!(failure.message.contains("left inverse"), "{}", failure.message);
    assert!(!fixture.results.exists());
    assert!(workspace_is_gone(&fixture.work));
}

#[test]
fn malformed_definition_is_a_client_error() {
    let fixture = stage_cohort(true);
    let failure = run_pipeline(&fixture.settings, "req-3", "age +", "demo").unwrap_err();
    assert_eq!(failure.stage, Stage::Parse);
    assert_eq!(failure.http_status_hint, 400);

    let failure = run_pipeline(&fixture.settings, "../escape", "age bmi +", "demo").unwrap_err();
    assert_eq!(failure.stage, Stage::Parse);
    assert_eq!(failure.http_status_hint, 400);
    assert!(workspace_is_gone(&fixture.work));
}

#[test]
fn unknown_feature_is_a_server_error() {
    let fixture = stage_cohort(true);
    let failure = run_pipeline(&fixture.settings, "req-4", "age height +", "demo").unwrap_err();
    assert_eq!(failure.stage, Stage::ComputePhenotype);
    assert_eq!(failure.http_status_hint, 500);
    assert!(failure.message.contains("height"));
    assert!(workspace_is_gone(&fixture.work));
}

#[test]
fn misaligned_statistics_fail_without_output() {
    let fixture = stage_cohort(true);
    fs::write(
        fixture.cohort_dir.join("gwas").join("bmi.tsv"),
        "ID\tBETA\tSE\tOBS_CT\nrs1\t0.1\t0.01\t1000\nrs9\t0.1\t0.01\t1000\nrs3\t0.1\t0.01\t1000\n",
    )
    .unwrap();
    let failure = run_pipeline(&fixture.settings, "req-5", "age bmi +", "demo").unwrap_err();
    assert_eq!(failure.stage, Stage::ProjectStats);
    assert!(failure.message.contains("rs9"));
    assert!(!fixture.results.exists());
    assert!(workspace_is_gone(&fixture.work));
}

#[test]
fn dry_run_skips_the_upload() {
    let fixture = stage_cohort(true);
    let mut settings = fixture.settings.clone();
    settings.storage.dry_run = true;
    let result = run_pipeline(&settings, "req-6", "age 2 * bmi -", "demo").unwrap();
    assert_eq!(result.url, None);
    assert_eq!(result.metadata_url, None);
    assert_eq!(result.num_variants, 3);
    assert!(!fixture.results.exists());
    assert!(workspace_is_gone(&fixture.work));
}

#[test]
fn cli_prints_the_result_as_json() {
    let fixture = stage_cohort(true);
    let config = fixture.work.with_file_name("igwas.toml");
    fixture.settings.save(&config).unwrap();

    let exe = env!("CARGO_BIN_EXE_igwas");
    let output = Command::new(exe)
        .args([
            "run",
            "--config",
            config.to_str().expect("path str"),
            "--cohort",
            "demo",
            "--phenotype",
            "`age` `bmi` [ADD]",
            "--request-id",
            "from-cli",
        ])
        .output()
        .expect("run igwas cli");
    assert!(output.status.success(), "CLI failed: {output:?}");

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["request_id"], "from-cli");
    assert_eq!(json["status"], "done");
    assert_eq!(json["num_variants"], 3);
    assert!(fixture.results.join("igwas").join("from-cli.tsv.gz").exists());
}
