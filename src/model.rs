use anyhow::{bail, Result};

use crate::loss::{Loss, Predictions};
use crate::matrix::Matrix;
use crate::rng::Rng;
use crate::vector::Vector;

/// `k` value meaning "return every target".
pub const K_UNLIMITED_PREDICTIONS: i32 = -1;
/// `target_index` value meaning "all targets are simultaneously positive"
/// (one-vs-all only).
pub const K_ALL_LABELS_AS_TARGET: i32 = -1;

/// Per-worker scratch: hidden/output/gradient vectors, the running loss,
/// and a private RNG. Never shared between threads.
pub struct State {
    loss_value: f32,
    nexamples: i64,
    pub hidden: Vector,
    pub output: Vector,
    pub grad: Vector,
    pub rng: Rng,
}

impl State {
    pub fn new(hidden_size: usize, output_size: usize, seed: u64) -> State {
        State {
            loss_value: 0.0,
            nexamples: 0,
            hidden: Vector::new(hidden_size),
            output: Vector::new(output_size),
            grad: Vector::new(hidden_size),
            rng: Rng::new(seed),
        }
    }

    /// Average loss per example so far.
    pub fn loss(&self) -> f32 {
        if self.nexamples == 0 {
            0.0
        } else {
            self.loss_value / self.nexamples as f32
        }
    }

    pub fn increment_nexamples(&mut self, loss: f32) {
        self.loss_value += loss;
        self.nexamples += 1;
    }
}

/// Borrows the input/output matrices and the active loss; drives the
/// forward/backward pass for one example and top-k label prediction.
pub struct Model<'a> {
    wi: &'a Matrix,
    wo: &'a Matrix,
    loss: &'a Loss,
    normalize_gradient: bool,
}

impl<'a> Model<'a> {
    pub fn new(wi: &'a Matrix, wo: &'a Matrix, loss: &'a Loss, normalize_gradient: bool) -> Model<'a> {
        Model {
            wi,
            wo,
            loss,
            normalize_gradient,
        }
    }

    /// Mean of the input-matrix rows selected by `input`.
    pub fn compute_hidden(&self, input: &[i32], state: &mut State) {
        state.hidden.zero();
        for &i in input {
            state.hidden.add_row(self.wi, i as usize);
        }
        if !input.is_empty() {
            state.hidden.mul(1.0 / input.len() as f32);
        }
    }

    pub fn predict(
        &self,
        input: &[i32],
        k: i32,
        threshold: f32,
        heap: &mut Predictions,
        state: &mut State,
    ) -> Result<()> {
        let k = if k == K_UNLIMITED_PREDICTIONS {
            self.wo.rows()
        } else if k <= 0 {
            bail!("k needs to be 1 or higher!");
        } else {
            k as usize
        };
        self.compute_hidden(input, state);
        self.loss.predict(self.wo, k, threshold, heap, state)
    }

    /// One stochastic-gradient step on a single example.
    ///
    /// The final gradient write into the selected input rows is the
    /// unsynchronized Hogwild update: every worker does this concurrently
    /// on the shared matrix.
    pub fn update(
        &self,
        input: &[i32],
        targets: &[i32],
        target_index: i32,
        lr: f32,
        state: &mut State,
    ) -> Result<()> {
        if input.is_empty() {
            return Ok(());
        }
        self.compute_hidden(input, state);
        state.grad.zero();

        let loss_value = self
            .loss
            .forward(self.wo, targets, target_index, state, lr, true)?;
        state.increment_nexamples(loss_value);

        if self.normalize_gradient {
            state.grad.mul(1.0 / input.len() as f32);
        }
        for &i in input {
            self.wi
                .add_vector_to_row(state.grad.as_slice(), i as usize, 1.0)?;
        }
        Ok(())
    }
}
