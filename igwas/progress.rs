use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fmt;
use std::io::IsTerminal;

/// Stages reported while producing derived summary statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PropagationStage {
    Propagation,
}

impl PropagationStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Propagation => "summary statistic propagation",
        }
    }
}

impl fmt::Display for PropagationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for reporting variants written so far. The total is unknown up front
/// because statistic files are streamed.
pub trait PropagationObserver {
    fn on_stage_start(&mut self, stage: PropagationStage) {
        let _ = stage;
    }
    fn on_stage_advance(&mut self, stage: PropagationStage, processed_variants: u64) {
        let _ = (stage, processed_variants);
    }
    fn on_stage_finish(&mut self, stage: PropagationStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopPropagationProgress;

impl PropagationObserver for NoopPropagationProgress {}

/// A spinner on stderr, hidden when stderr is not a terminal.
#[derive(Default)]
pub struct ConsolePropagationProgress {
    bar: Option<ProgressBar>,
}

impl PropagationObserver for ConsolePropagationProgress {
    fn on_stage_start(&mut self, stage: PropagationStage) {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(10)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(None, draw_target);
        if let Ok(style) = ProgressStyle::with_template(
            "> [{elapsed_precise}] {spinner} {human_pos} variants ({per_sec}) {msg}",
        ) {
            bar.set_style(style);
        }
        bar.set_message(stage.describe());
        self.bar = Some(bar);
    }

    fn on_stage_advance(&mut self, _stage: PropagationStage, processed_variants: u64) {
        if let Some(bar) = &self.bar {
            bar.set_position(processed_variants);
        }
    }

    fn on_stage_finish(&mut self, _stage: PropagationStage) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

/// The observer a run uses: silent when `quiet`, otherwise a console spinner.
pub fn observer_for(quiet: bool) -> Box<dyn PropagationObserver> {
    if quiet {
        Box::new(NoopPropagationProgress)
    } else {
        Box::new(ConsolePropagationProgress::default())
    }
}
