/*!
Chain bookkeeping shared by every kernel.

A [`Chain`] owns the RNG, the current and proposed states, the burn-in/thinning
schedule and the recorded samples. A kernel owns a `Chain` and implements
[`MarkovChain::apply_kernel`]; the trait then provides the run loops:

- [`MarkovChain::run`]: `burn` discarded applications, record the current
  state, then `n_samples - 1` times apply the kernel `thin` times and record.
- [`MarkovChain::run_progress`]: the same schedule behind an `indicatif`
  progress bar.
- [`MarkovChain::generate_moment_estimates`]: the same schedule, keeping only
  running first and second moments.
- [`MarkovChain::estimate_expectation`]: running average of a scalar function
  of the state.
*/

use indicatif::{ProgressBar, ProgressStyle};
use nalgebra::DVector;
use ndarray::Array2;
use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::error::{invalid, precondition, McmcError, Result};
use crate::stats::{sample_covariance, AcceptanceWindow, ChainStats, MomentAccumulator};
use crate::target::LogPost;

/// Burn-in, thinning and sample count of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainConfig {
    pub burn: usize,
    /// Kernel applications between recorded samples; at least 1.
    pub thin: usize,
    pub n_samples: usize,
}

impl ChainConfig {
    pub fn new(burn: usize, thin: usize, n_samples: usize) -> Self {
        Self {
            burn,
            thin,
            n_samples,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.thin == 0 {
            return Err(invalid("thinning interval must be at least 1"));
        }
        Ok(())
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::new(10_000, 1, 10_000)
    }
}

/**
State of a single Markov chain.

The RNG is seeded from entropy at construction. [`Chain::set_seed`] may only be
called before the first stochastic draw.
*/
#[derive(Debug, Clone)]
pub struct Chain {
    pub(crate) target: LogPost,
    rng: SmallRng,
    seed: Option<u64>,
    draws_started: bool,
    initial_state: DVector<f64>,
    pub(crate) current: DVector<f64>,
    pub(crate) proposal: DVector<f64>,
    config: ChainConfig,
    samples: Vec<DVector<f64>>,
    generated: bool,
    n_proposed: u64,
    n_accepted: u64,
    window: AcceptanceWindow,
}

impl Chain {
    pub fn new(target: LogPost, initial_state: DVector<f64>, config: ChainConfig) -> Result<Self> {
        config.validate()?;
        check_dim(&target, &initial_state)?;
        Ok(Self {
            target,
            rng: SmallRng::seed_from_u64(thread_rng().gen::<u64>()),
            seed: None,
            draws_started: false,
            proposal: initial_state.clone(),
            current: initial_state.clone(),
            initial_state,
            config,
            samples: Vec::new(),
            generated: false,
            n_proposed: 0,
            n_accepted: 0,
            window: AcceptanceWindow::default(),
        })
    }

    /// Builder variant of [`Chain::set_seed`], with the same precondition.
    pub fn with_seed(mut self, seed: u64) -> Result<Self> {
        self.set_seed(seed)?;
        Ok(self)
    }

    /// Reseeds the RNG. Fails with `PreconditionViolation` once the chain has
    /// drawn a random number.
    pub fn set_seed(&mut self, seed: u64) -> Result<()> {
        if self.draws_started {
            return Err(precondition(
                "set_seed must be called before the first stochastic draw",
            ));
        }
        self.rng = SmallRng::seed_from_u64(seed);
        self.seed = Some(seed);
        Ok(())
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Sets the initial state and moves the chain there.
    pub fn set_initial_state(&mut self, state: DVector<f64>) -> Result<()> {
        check_dim(&self.target, &state)?;
        self.current = state.clone();
        self.proposal = state.clone();
        self.initial_state = state;
        Ok(())
    }

    /// Swaps the target, keeping the current state.
    pub fn set_target(&mut self, target: LogPost) -> Result<()> {
        check_dim(&target, &self.current)?;
        self.target = target;
        Ok(())
    }

    pub fn set_burn(&mut self, burn: usize) {
        self.config.burn = burn;
    }

    pub fn set_thin(&mut self, thin: usize) -> Result<()> {
        ChainConfig { thin, ..self.config }.validate()?;
        self.config.thin = thin;
        Ok(())
    }

    pub fn set_n_samples(&mut self, n_samples: usize) {
        self.config.n_samples = n_samples;
    }

    pub fn target(&self) -> &LogPost {
        &self.target
    }

    pub fn dim(&self) -> usize {
        self.target.dim()
    }

    pub fn config(&self) -> ChainConfig {
        self.config
    }

    pub fn burn(&self) -> usize {
        self.config.burn
    }

    pub fn thin(&self) -> usize {
        self.config.thin
    }

    pub fn n_samples(&self) -> usize {
        self.config.n_samples
    }

    pub fn initial_state(&self) -> &DVector<f64> {
        &self.initial_state
    }

    pub fn current_state(&self) -> &DVector<f64> {
        &self.current
    }

    pub fn proposal_state(&self) -> &DVector<f64> {
        &self.proposal
    }

    /// The recorded samples of the last completed run.
    pub fn samples(&self) -> Result<&[DVector<f64>]> {
        if !self.generated {
            return Err(McmcError::SamplesNotGenerated);
        }
        Ok(&self.samples)
    }

    pub fn is_generated(&self) -> bool {
        self.generated
    }

    /// Sample mean and elementwise second moment of the recorded samples.
    pub fn estimate_moments(&self) -> Result<(DVector<f64>, DVector<f64>)> {
        let samples = self.samples()?;
        if samples.is_empty() {
            return Err(invalid("the last run recorded no samples"));
        }
        let mut acc = MomentAccumulator::new(self.dim());
        samples.iter().for_each(|x| acc.push(x));
        Ok(acc.into_moments())
    }

    /// Recorded samples as an `n_samples × dim` array.
    pub fn samples_array(&self) -> Result<Array2<f64>> {
        let samples = self.samples()?;
        Ok(Array2::from_shape_fn((samples.len(), self.dim()), |(i, j)| {
            samples[i][j]
        }))
    }

    pub fn estimate_covariance(&self) -> Result<Array2<f64>> {
        sample_covariance(&self.samples_array()?)
    }

    /// Fraction of accepted proposals since the last run started.
    pub fn acceptance_rate(&self) -> f64 {
        if self.n_proposed == 0 {
            0.0
        } else {
            self.n_accepted as f64 / self.n_proposed as f64
        }
    }

    pub fn n_accepted(&self) -> u64 {
        self.n_accepted
    }

    pub fn n_proposed(&self) -> u64 {
        self.n_proposed
    }

    /// Returns to the initial state and forgets samples and counters. The RNG
    /// stream continues.
    pub fn reset(&mut self) {
        self.current = self.initial_state.clone();
        self.proposal = self.initial_state.clone();
        self.samples.clear();
        self.generated = false;
        self.reset_counters();
    }

    pub(crate) fn rng(&mut self) -> &mut SmallRng {
        self.draws_started = true;
        &mut self.rng
    }

    pub(crate) fn draw_standard_normal(&mut self) -> DVector<f64> {
        let dim = self.dim();
        let rng = self.rng();
        DVector::from_fn(dim, |_, _| rng.sample(StandardNormal))
    }

    /// `log U` for `U ~ Uniform(0, 1)`.
    pub(crate) fn draw_log_uniform(&mut self) -> f64 {
        self.rng().gen::<f64>().ln()
    }

    /// Metropolis-Hastings decision on `self.proposal`. On acceptance the
    /// proposal becomes the current state. A NaN ratio is a rejection.
    pub(crate) fn metropolis_step(&mut self, log_accept: f64) -> bool {
        let accepted = self.draw_log_uniform() < log_accept;
        if accepted {
            std::mem::swap(&mut self.current, &mut self.proposal);
        }
        accepted
    }

    fn record_outcome(&mut self, accepted: bool) {
        self.n_proposed += 1;
        if accepted {
            self.n_accepted += 1;
        }
        self.window.push(accepted);
    }

    fn reset_counters(&mut self) {
        self.n_proposed = 0;
        self.n_accepted = 0;
        self.window.clear();
    }

    fn begin_run(&mut self) {
        self.samples.clear();
        self.generated = false;
        self.reset_counters();
    }
}

fn check_dim(target: &LogPost, state: &DVector<f64>) -> Result<()> {
    if state.len() != target.dim() {
        return Err(invalid(format!(
            "state has dimension {}, target has dimension {}",
            state.len(),
            target.dim()
        )));
    }
    Ok(())
}

fn progress_bar(len: usize, prefix: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template("{prefix:8} {bar:40.white} ETA {eta:3} | {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
    pb.set_style(style);
    pb.set_prefix(prefix);
    pb
}

/// A transition kernel driving a [`Chain`].
pub trait MarkovChain {
    fn chain(&self) -> &Chain;

    fn chain_mut(&mut self) -> &mut Chain;

    /// One transition. Returns whether the proposal was accepted.
    fn apply_kernel(&mut self) -> Result<bool>;

    /// Short label shown in progress bars.
    fn label(&self) -> &'static str {
        "MCMC"
    }

    /// Applies the kernel and updates the acceptance counters.
    fn step(&mut self) -> Result<bool> {
        let accepted = self.apply_kernel()?;
        self.chain_mut().record_outcome(accepted);
        Ok(accepted)
    }

    fn current_state(&self) -> &DVector<f64> {
        self.chain().current_state()
    }

    /// See [`Chain::set_seed`].
    fn set_seed(&mut self, seed: u64) -> Result<()> {
        self.chain_mut().set_seed(seed)
    }

    fn samples(&self) -> Result<&[DVector<f64>]> {
        self.chain().samples()
    }

    fn estimate_moments(&self) -> Result<(DVector<f64>, DVector<f64>)> {
        self.chain().estimate_moments()
    }

    fn acceptance_rate(&self) -> f64 {
        self.chain().acceptance_rate()
    }

    /// Runs the burn-in/thinning schedule and records `n_samples` states,
    /// replacing the samples of any previous run.
    fn run(&mut self) -> Result<()> {
        self.chain_mut().begin_run();
        let config = self.chain().config();
        for _ in 0..config.burn {
            self.step()?;
        }
        for i in 0..config.n_samples {
            if i > 0 {
                for _ in 0..config.thin {
                    self.step()?;
                }
            }
            let chain = self.chain_mut();
            let state = chain.current.clone();
            chain.samples.push(state);
        }
        self.chain_mut().generated = true;
        Ok(())
    }

    /// [`MarkovChain::run`] with a progress bar reporting the acceptance rate
    /// over the last 100 applications.
    fn run_progress(&mut self) -> Result<ChainStats> {
        self.chain_mut().begin_run();
        let config = self.chain().config();
        let total = config.burn + config.n_samples.saturating_sub(1) * config.thin;
        let pb = progress_bar(total, self.label());
        let mut moments = MomentAccumulator::new(self.chain().dim());

        let tick = |kernel: &mut Self| -> Result<()> {
            kernel.step()?;
            pb.inc(1);
            pb.set_message(format!("p(accept)≈{:.2}", kernel.chain().window.rate()));
            Ok(())
        };

        for _ in 0..config.burn {
            tick(self)?;
        }
        for i in 0..config.n_samples {
            if i > 0 {
                for _ in 0..config.thin {
                    tick(self)?;
                }
            }
            let chain = self.chain_mut();
            let state = chain.current.clone();
            moments.push(&state);
            chain.samples.push(state);
        }
        self.chain_mut().generated = true;
        pb.finish_with_message("Done!");

        let p_accept = self.chain().acceptance_rate();
        let n = moments.n();
        let (mean, second_moment) = moments.into_moments();
        Ok(ChainStats {
            n,
            p_accept,
            mean,
            second_moment,
        })
    }

    /// Runs the schedule of [`MarkovChain::run`] for `n_samples` recorded
    /// points but keeps only the running mean and second moment.
    fn generate_moment_estimates(
        &mut self,
        n_samples: usize,
    ) -> Result<(DVector<f64>, DVector<f64>)> {
        if n_samples == 0 {
            return Err(invalid("moment estimation needs at least one sample"));
        }
        self.chain_mut().reset_counters();
        let config = self.chain().config();
        let mut moments = MomentAccumulator::new(self.chain().dim());
        for _ in 0..config.burn {
            self.step()?;
        }
        for i in 0..n_samples {
            if i > 0 {
                for _ in 0..config.thin {
                    self.step()?;
                }
            }
            moments.push(self.chain().current_state());
        }
        Ok(moments.into_moments())
    }

    /// Average of `f` over `n_samples` states, each taken after `thin` kernel
    /// applications, following `burn` discarded applications.
    fn estimate_expectation<F>(&mut self, mut f: F) -> Result<f64>
    where
        F: FnMut(&DVector<f64>) -> f64,
        Self: Sized,
    {
        let config = self.chain().config();
        if config.n_samples == 0 {
            return Err(invalid("expectation estimation needs at least one sample"));
        }
        self.chain_mut().reset_counters();
        for _ in 0..config.burn {
            self.step()?;
        }
        let mut mean = 0.0;
        for i in 0..config.n_samples {
            for _ in 0..config.thin {
                self.step()?;
            }
            mean += (f(self.chain().current_state()) - mean) / (i + 1) as f64;
        }
        Ok(mean)
    }
}
