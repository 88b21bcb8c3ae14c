//! # Summary-Statistic Propagation
//!
//! Derives GWAS summary statistics for `Y = Σ beta_i · X_i` from the per-feature GWAS
//! of every `X_i`, without touching genotypes.
//!
//! The statistic files are streamed. One producer thread reads `chunk_size` variants
//! from every file in lockstep and checks that the files agree on variant identity.
//! Chunks cross a bounded channel to a pool of workers; the calling thread reorders
//! their results by chunk index and writes them, so the output is in input order
//! irrespective of scheduling. Chunking only bounds memory: every variant is computed
//! independently of its neighbours.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::thread;

use crate::covariance::CovarianceMatrix;
use crate::progress::{PropagationObserver, PropagationStage};
use crate::project::BetaVector;
use crate::reader::GwasStatsReader;
use crate::shared::files::{feature_name_from_path, list_data_files};
use crate::types::{PropagationError, PropagationOptions, SampleSizePolicy, VariantStat};
use crate::variance::VarianceModel;
use crate::writer::StatsWriter;

// ========================================================================================
//                                   Inputs & outputs
// ========================================================================================

/// A per-feature GWAS file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureSource {
    pub feature: String,
    pub path: PathBuf,
}

impl FeatureSource {
    /// Names the source after its file, e.g. `gwas/bmi.tsv.gz` describes `bmi`.
    pub fn from_path(path: &Path) -> Option<Self> {
        Some(Self {
            feature: feature_name_from_path(path)?,
            path: path.to_path_buf(),
        })
    }
}

/// Every statistic file in `dir`, in natural file-name order.
pub fn sources_in_dir(dir: &Path) -> Result<Vec<FeatureSource>, PropagationError> {
    Ok(list_data_files(dir)?
        .iter()
        .filter_map(|path| FeatureSource::from_path(path))
        .collect())
}

#[derive(Clone, Debug, PartialEq)]
pub struct PropagationSummary {
    pub num_variants: u64,
    /// Features with a nonzero coefficient, in coefficient order.
    pub contributing_features: Vec<String>,
    /// `"passthrough"` or the name of the standard-error model used.
    pub method: &'static str,
}

// ========================================================================================
//                                   Work units
// ========================================================================================

/// `ids.len()` variants; `stats` is row-major with one entry per open file.
struct Chunk {
    index: usize,
    ids: Vec<String>,
    stats: Vec<VariantStat>,
}

struct ChunkResult {
    index: usize,
    ids: Vec<String>,
    stats: Vec<VariantStat>,
}

enum Combination {
    /// A single coefficient of exactly one: the feature's own statistics.
    Passthrough,
    Model(Box<dyn VarianceModel>),
}

/// Everything a worker needs, shared read-only between threads.
struct Plan<'a> {
    coefficients: &'a [f64],
    /// Open files per variant; the first `coefficients.len()` are the contributing ones.
    width: usize,
    sample_size: SampleSizePolicy,
    combination: Combination,
}

impl Plan<'_> {
    fn method(&self) -> &'static str {
        match &self.combination {
            Combination::Passthrough => "passthrough",
            Combination::Model(model) => model.name(),
        }
    }

    fn combine(&self, row: &[VariantStat]) -> Result<VariantStat, PropagationError> {
        let contributing = &row[..self.coefficients.len()];
        let model = match &self.combination {
            Combination::Passthrough => return Ok(contributing[0]),
            Combination::Model(model) => model,
        };

        let effect: f64 = contributing
            .iter()
            .zip(self.coefficients)
            .map(|(stat, beta)| beta * stat.effect)
            .sum();
        let pool = match self.sample_size {
            SampleSizePolicy::ContributingMinimum => contributing,
            SampleSizePolicy::GlobalMinimum => row,
        };
        let sample_size = pool.iter().map(|s| s.sample_size).min().unwrap_or(0);
        Ok(VariantStat {
            effect,
            se: model.standard_error(contributing, effect, sample_size)?,
            sample_size,
        })
    }

    fn process(&self, chunk: Chunk) -> Result<ChunkResult, PropagationError> {
        let stats = chunk
            .stats
            .chunks_exact(self.width)
            .map(|row| self.combine(row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ChunkResult {
            index: chunk.index,
            ids: chunk.ids,
            stats,
        })
    }
}

// ========================================================================================
//                                   Producer
// ========================================================================================

/// Reads up to `chunk_size` aligned variants. Returns `None` once every file is
/// exhausted.
fn read_chunk(
    readers: &mut [GwasStatsReader],
    chunk_size: usize,
    index: usize,
) -> Result<Option<Chunk>, PropagationError> {
    let Some((lead, rest)) = readers.split_first_mut() else {
        return Ok(None);
    };
    let mut ids: Vec<String> = Vec::with_capacity(chunk_size.min(1 << 16));
    let mut stats = Vec::with_capacity(ids.capacity() * (rest.len() + 1));
    let mut id = String::new();
    let mut other_id = String::new();

    while ids.len() < chunk_size {
        let Some(stat) = lead.read_variant(&mut id)? else {
            for reader in rest.iter_mut() {
                if reader.read_variant(&mut other_id)?.is_some() {
                    return Err(PropagationError::TruncatedStats {
                        path: lead.path().to_path_buf(),
                        variants: lead.variants_read(),
                    });
                }
            }
            break;
        };
        stats.push(stat);
        for reader in rest.iter_mut() {
            let Some(other) = reader.read_variant(&mut other_id)? else {
                return Err(PropagationError::TruncatedStats {
                    path: reader.path().to_path_buf(),
                    variants: reader.variants_read(),
                });
            };
            if other_id != id {
                return Err(PropagationError::MisalignedVariants {
                    index: lead.variants_read(),
                    expected: id,
                    found: other_id,
                    path: reader.path().to_path_buf(),
                });
            }
            stats.push(other);
        }
        ids.push(id.clone());
    }

    Ok((!ids.is_empty()).then_some(Chunk { index, ids, stats }))
}

fn produce(
    mut readers: Vec<GwasStatsReader>,
    chunk_size: usize,
    tx: Sender<Result<Chunk, PropagationError>>,
) {
    for index in 0.. {
        match read_chunk(&mut readers, chunk_size, index) {
            Ok(Some(chunk)) => {
                let last = chunk.ids.len() < chunk_size;
                if tx.send(Ok(chunk)).is_err() || last {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        }
    }
}

fn work(
    plan: &Plan<'_>,
    rx: Receiver<Result<Chunk, PropagationError>>,
    tx: Sender<Result<ChunkResult, PropagationError>>,
) {
    for chunk in rx {
        let result = chunk.and_then(|chunk| plan.process(chunk));
        let failed = result.is_err();
        if tx.send(result).is_err() || failed {
            return;
        }
    }
}

// ========================================================================================
//                                   Public API
// ========================================================================================

/// Propagates `beta` into `writer`. The writer is left open; the caller finishes it.
pub fn propagate(
    beta: &BetaVector,
    covariance: &CovarianceMatrix,
    sources: &[FeatureSource],
    options: &PropagationOptions,
    writer: &mut StatsWriter,
    observer: &mut dyn PropagationObserver,
) -> Result<PropagationSummary, PropagationError> {
    let (features, coefficients): (Vec<&str>, Vec<f64>) = beta.contributing().unzip();
    if features.is_empty() {
        return Err(PropagationError::NoContributingFeatures);
    }

    let source_for = |feature: &str| sources.iter().find(|s| s.feature == feature);
    let mut paths = Vec::with_capacity(sources.len());
    for feature in &features {
        let source = source_for(feature)
            .ok_or_else(|| PropagationError::MissingFeatureStats(feature.to_string()))?;
        paths.push(source.path.as_path());
    }
    if options.sample_size == SampleSizePolicy::GlobalMinimum {
        for source in sources {
            if !paths.contains(&source.path.as_path()) {
                paths.push(source.path.as_path());
            }
        }
    }

    let combination = if coefficients == [1.0] {
        Combination::Passthrough
    } else {
        Combination::Model(options.variance_model.build(
            &features,
            &coefficients,
            covariance,
            options.num_covar,
        )?)
    };
    let plan = Plan {
        coefficients: &coefficients,
        width: paths.len(),
        sample_size: options.sample_size,
        combination,
    };
    log::info!(
        "Propagating {} contributing features ({}) from {} statistic files with {}",
        features.len(),
        features.join(", "),
        paths.len(),
        plan.method()
    );

    let readers = paths
        .iter()
        .map(|path| GwasStatsReader::open(path, &options.columns))
        .collect::<Result<Vec<_>, _>>()?;

    let chunk_size = options.chunk_size.max(1);
    let num_threads = options.num_threads.max(1);
    let capacity = options.capacity.max(1);
    let (chunk_tx, chunk_rx) = bounded::<Result<Chunk, PropagationError>>(capacity);
    let (result_tx, result_rx) = bounded::<Result<ChunkResult, PropagationError>>(capacity);

    observer.on_stage_start(PropagationStage::Propagation);
    let outcome = thread::scope(|s| -> Result<u64, PropagationError> {
        let producer = s.spawn(move || produce(readers, chunk_size, chunk_tx));
        let workers: Vec<_> = (0..num_threads)
            .map(|_| {
                let rx = chunk_rx.clone();
                let tx = result_tx.clone();
                let plan = &plan;
                s.spawn(move || work(plan, rx, tx))
            })
            .collect();
        drop(chunk_rx);
        drop(result_tx);

        let collected = collect(result_rx, writer, observer);

        let panicked = producer.join().is_err()
            | workers.into_iter().fold(false, |acc, w| w.join().is_err() | acc);
        let written = collected?;
        if panicked {
            return Err(PropagationError::Worker(
                "a propagation thread panicked".to_string(),
            ));
        }
        Ok(written)
    });
    observer.on_stage_finish(PropagationStage::Propagation);

    let num_variants = outcome?;
    log::info!("Propagated {num_variants} variants");
    Ok(PropagationSummary {
        num_variants,
        contributing_features: features.iter().map(|f| f.to_string()).collect(),
        method: plan.method(),
    })
}

/// Writes results in chunk order. Returning drops `rx`, which stops the workers and,
/// through them, the producer.
fn collect(
    rx: Receiver<Result<ChunkResult, PropagationError>>,
    writer: &mut StatsWriter,
    observer: &mut dyn PropagationObserver,
) -> Result<u64, PropagationError> {
    let mut pending = BTreeMap::new();
    let mut next = 0usize;
    let mut written = 0u64;
    for result in rx {
        let result = result?;
        pending.insert(result.index, result);
        while let Some(ready) = pending.remove(&next) {
            for (id, stat) in ready.ids.iter().zip(&ready.stats) {
                writer.write(id, stat)?;
            }
            written += ready.ids.len() as u64;
            next += 1;
            observer.on_stage_advance(PropagationStage::Propagation, written);
        }
    }
    Ok(written)
}

/// Propagates into a new file at `output`, gzip-compressed when `options.compress`.
pub fn propagate_to_file(
    beta: &BetaVector,
    covariance: &CovarianceMatrix,
    sources: &[FeatureSource],
    options: &PropagationOptions,
    output: &Path,
    observer: &mut dyn PropagationObserver,
) -> Result<PropagationSummary, PropagationError> {
    let mut writer = StatsWriter::create(output, options.compress, &options.columns)?;
    let summary = propagate(beta, covariance, sources, options, &mut writer, observer)?;
    writer.finish()?;
    Ok(summary)
}
