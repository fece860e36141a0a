//! Dropout Regularization
//!
//! Dropout randomly zeroes a fraction of its input during training, which
//! prevents the network from becoming too dependent on any particular
//! activation and improves generalization. During inference it passes data
//! through deterministically.
//!
//! ## The Two Scaling Conventions
//!
//! Zeroing elements shrinks the expected activation magnitude by a factor of
//! `1 - p`, so exactly one compensating scale must be applied somewhere.
//! Which side pays is controlled by `scale_in_train`:
//!
//! ```text
//! scale_in_train = true ("inverted dropout"):
//!     train:  y[i] = x[i] * mask[i] * 1/(1-p)
//!     infer:  y[i] = x[i]
//!
//! scale_in_train = false (compensation deferred to inference):
//!     train:  y[i] = x[i] * mask[i]
//!     infer:  y[i] = x[i] * (1-p)
//! ```
//!
//! In both conventions `E[y] = x` elementwise, so the layer is statistically
//! transparent: swapping phases never changes the expected magnitude seen by
//! the layers downstream.
//!
//! ## Mask Reuse Between Forward and Backward
//!
//! The backward pass must zero exactly the elements the forward pass zeroed,
//! so the sampled mask is owned instance state: `forward` writes it
//! (`&mut self`), `backward` reads it (`&self`). The caller guarantees that a
//! training-mode backward follows its matching forward with no other forward
//! in between. The gradient uses the same per-element multiplier as the
//! forward pass:
//!
//! ```text
//! train:  grad_x[i] = grad_y[i] * mask[i] * (1/(1-p) or 1)
//! infer:  grad_x[i] = grad_y[i] * (1 or (1-p))
//! ```
//!
//! ## Randomness
//!
//! Each transform owns its generator, so two instances never share a stream
//! and tests can seed deterministically. Mask sampling always runs on one
//! thread over that single stream; only the elementwise apply loops are
//! parallelized, keeping the sampled mask independent of work partitioning.

use crate::error::DropoutError;
use crate::tensor::Tensor;
use num_traits::Float;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Bernoulli, Distribution};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Execution phase supplied by the graph executor on every call
///
/// The transform does not decide or persist the phase; the caller passes it
/// per call, matching how a training loop flips the whole network between
/// optimization steps and evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Training: sample a fresh mask and drop activations
    Train,
    /// Inference: deterministic pass-through (plus deferred compensation)
    Infer,
}

/// Dropout parameter block
///
/// The shape a model definition would carry for this layer. Defaults match
/// the classic convention: drop half the activations and compensate at train
/// time.
///
/// # Fields
///
/// - `drop_ratio`: Probability an element is zeroed, strictly between 0 and 1
/// - `scale_in_train`: Apply the `1/(1-p)` compensation at train time; when
///   false, compensation is deferred to inference as a `(1-p)` scale
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DropoutConfig {
    pub drop_ratio: f64,
    pub scale_in_train: bool,
}

impl Default for DropoutConfig {
    fn default() -> Self {
        Self {
            drop_ratio: 0.5,
            scale_in_train: true,
        }
    }
}

/// Dropout transform with an owned mask buffer and random stream
///
/// One instance serves one position in the computation graph. The mask buffer
/// is written by [`forward`](Dropout::forward) in training mode and read back
/// by [`backward`](Dropout::backward); callers running minibatches
/// concurrently must use independent instances.
pub struct Dropout<T> {
    /// Probability of zeroing an element, in the element type
    drop_ratio: T,
    /// 1 / (1 - drop_ratio), the survivor compensation factor
    keep_scale: T,
    /// Whether compensation happens at train time or is deferred to inference
    scale_in_train: bool,
    /// Bernoulli distribution over keep probability 1 - drop_ratio
    keep_dist: Bernoulli,
    /// Per-element keep mask (1 = kept, 0 = dropped) from the last training
    /// forward; stale outside training mode
    mask: Vec<u8>,
    /// Generator owned by this instance
    rng: StdRng,
}

impl<T: Float + Send + Sync> Dropout<T> {
    /// Create a dropout transform seeded from OS entropy
    ///
    /// # Errors
    ///
    /// Returns [`DropoutError::InvalidConfiguration`] unless
    /// `0 < drop_ratio < 1`.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use puck::{Dropout, DropoutConfig};
    /// let dropout = Dropout::<f32>::new(DropoutConfig::default()).unwrap();
    /// assert_eq!(dropout.keep_scale(), 2.0);
    /// assert!(Dropout::<f32>::new(DropoutConfig { drop_ratio: 1.0, scale_in_train: true }).is_err());
    /// ```
    pub fn new(config: DropoutConfig) -> Result<Self, DropoutError> {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Create a dropout transform with a deterministic seed
    ///
    /// Two instances built from the same configuration and seed sample
    /// identical mask sequences, which makes training runs and tests
    /// reproducible.
    ///
    /// # Errors
    ///
    /// Returns [`DropoutError::InvalidConfiguration`] unless
    /// `0 < drop_ratio < 1`.
    pub fn with_seed(config: DropoutConfig, seed: u64) -> Result<Self, DropoutError> {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: DropoutConfig, rng: StdRng) -> Result<Self, DropoutError> {
        if !(config.drop_ratio > 0.0 && config.drop_ratio < 1.0) {
            return Err(DropoutError::InvalidConfiguration(config.drop_ratio));
        }

        let drop_ratio =
            T::from(config.drop_ratio).ok_or(DropoutError::InvalidConfiguration(config.drop_ratio))?;
        let keep_scale = T::one() / (T::one() - drop_ratio);
        let keep_dist = Bernoulli::new(1.0 - config.drop_ratio)
            .map_err(|_| DropoutError::InvalidConfiguration(config.drop_ratio))?;

        Ok(Self {
            drop_ratio,
            keep_scale,
            scale_in_train: config.scale_in_train,
            keep_dist,
            mask: Vec::new(),
            rng,
        })
    }

    /// Probability of zeroing an element
    pub fn drop_ratio(&self) -> T {
        self.drop_ratio
    }

    /// Survivor compensation factor `1 / (1 - drop_ratio)`
    pub fn keep_scale(&self) -> T {
        self.keep_scale
    }

    /// Keep mask sampled by the last training-mode forward (1 = kept,
    /// 0 = dropped)
    ///
    /// Empty before the first training forward; stale after an inference
    /// forward, which never touches it.
    pub fn mask(&self) -> &[u8] {
        &self.mask
    }

    /// Ensure the mask buffer holds exactly `element_count` slots
    ///
    /// A count change implies a shape change, so the old mask is discarded
    /// rather than partially preserved. Idempotent when the count is
    /// unchanged, leaving the buffer in place across same-shape minibatches.
    pub fn prepare(&mut self, element_count: usize) {
        if self.mask.len() != element_count {
            self.mask.clear();
            self.mask.resize(element_count, 0);
        }
    }

    /// Forward pass
    ///
    /// In [`Phase::Train`], samples a fresh keep mask (overwriting the stored
    /// one) and applies mask and scale in a single elementwise pass. In
    /// [`Phase::Infer`], copies the input through, applying the deferred
    /// `(1 - drop_ratio)` compensation when `scale_in_train` is false; the
    /// mask buffer is left untouched.
    ///
    /// # Arguments
    ///
    /// * `input` - Input tensor
    /// * `phase` - Training or inference, supplied by the caller
    ///
    /// # Returns
    ///
    /// Output tensor with the same shape as the input
    pub fn forward(&mut self, input: &Tensor<T>, phase: Phase) -> Tensor<T> {
        match phase {
            Phase::Train => {
                self.prepare(input.count());

                // Single sequential stream; see module docs on partitioning
                for slot in self.mask.iter_mut() {
                    *slot = u8::from(self.keep_dist.sample(&mut self.rng));
                }

                let factor = if self.scale_in_train {
                    self.keep_scale
                } else {
                    T::one()
                };
                let data: Vec<T> = input
                    .data
                    .par_iter()
                    .zip(self.mask.par_iter())
                    .map(|(&x, &keep)| if keep != 0 { x * factor } else { T::zero() })
                    .collect();

                Tensor::new(data, input.shape.clone())
            }
            Phase::Infer => {
                if self.scale_in_train {
                    input.clone()
                } else {
                    input.mul_scalar(T::one() - self.drop_ratio)
                }
            }
        }
    }

    /// Backward pass
    ///
    /// Applies the same per-element multiplier as the matching forward pass:
    /// the stored mask (training) or the inference compensation. Returns
    /// `None` without computing anything when `propagate_down` is false.
    ///
    /// # Arguments
    ///
    /// * `grad_output` - Gradient flowing back from the next layer
    /// * `phase` - Must match the phase of the preceding forward call
    /// * `propagate_down` - Whether a gradient for this input is needed at all
    ///
    /// # Returns
    ///
    /// Gradient with respect to the input, or `None` if not propagating
    ///
    /// # Panics
    ///
    /// Panics in training mode when the stored mask's element count disagrees
    /// with `grad_output`, i.e. when no matching forward preceded this call.
    pub fn backward(
        &self,
        grad_output: &Tensor<T>,
        phase: Phase,
        propagate_down: bool,
    ) -> Option<Tensor<T>> {
        if !propagate_down {
            return None;
        }

        let grad_input = match phase {
            Phase::Train => {
                assert_eq!(
                    self.mask.len(),
                    grad_output.count(),
                    "Mask holds {} entries but gradient has {}; backward in training mode requires a matching forward",
                    self.mask.len(),
                    grad_output.count()
                );

                let factor = if self.scale_in_train {
                    self.keep_scale
                } else {
                    T::one()
                };
                let data: Vec<T> = grad_output
                    .data
                    .par_iter()
                    .zip(self.mask.par_iter())
                    .map(|(&g, &keep)| if keep != 0 { g * factor } else { T::zero() })
                    .collect();

                Tensor::new(data, grad_output.shape.clone())
            }
            Phase::Infer => {
                if self.scale_in_train {
                    grad_output.clone()
                } else {
                    grad_output.mul_scalar(T::one() - self.drop_ratio)
                }
            }
        };

        Some(grad_input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(drop_ratio: f64, scale_in_train: bool) -> DropoutConfig {
        DropoutConfig {
            drop_ratio,
            scale_in_train,
        }
    }

    #[test]
    fn test_ratio_bounds_rejected() {
        assert!(Dropout::<f32>::new(config(0.0, true)).is_err());
        assert!(Dropout::<f32>::new(config(1.0, true)).is_err());
        assert!(Dropout::<f32>::new(config(-0.1, false)).is_err());
        assert!(Dropout::<f32>::new(config(1.5, false)).is_err());
    }

    #[test]
    fn test_ratio_just_inside_bounds_accepted() {
        assert!(Dropout::<f32>::new(config(1e-6, true)).is_ok());
        assert!(Dropout::<f32>::new(config(1.0 - 1e-6, true)).is_ok());
    }

    #[test]
    fn test_infer_is_identity_with_train_scaling() {
        let mut dropout = Dropout::<f32>::with_seed(config(0.5, true), 42).unwrap();
        let x = Tensor::new(vec![1.0, -2.5, 3.0, 0.0], vec![4]);
        let y = dropout.forward(&x, Phase::Infer);
        assert_eq!(y.data, x.data);
        assert_eq!(y.shape, x.shape);
    }

    #[test]
    fn test_infer_compensates_with_deferred_scaling() {
        let mut dropout = Dropout::<f32>::with_seed(config(0.5, false), 42).unwrap();
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![4]);
        let y = dropout.forward(&x, Phase::Infer);
        assert_eq!(y.data, vec![0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn test_infer_leaves_mask_untouched() {
        let mut dropout = Dropout::<f32>::with_seed(config(0.5, true), 42).unwrap();
        let x = Tensor::new(vec![1.0; 8], vec![8]);
        dropout.forward(&x, Phase::Train);
        let mask_before = dropout.mask().to_vec();
        dropout.forward(&x, Phase::Infer);
        assert_eq!(dropout.mask(), mask_before.as_slice());
    }

    #[test]
    fn test_train_forward_matches_sampled_mask() {
        let mut dropout = Dropout::<f32>::with_seed(config(0.5, true), 7).unwrap();
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![4]);
        let y = dropout.forward(&x, Phase::Train);

        // keep_scale = 2 for p = 0.5: survivors doubled, dropped zeroed
        for i in 0..4 {
            let expected = if dropout.mask()[i] != 0 {
                x.data[i] * 2.0
            } else {
                0.0
            };
            assert_eq!(y.data[i], expected);
        }
    }

    #[test]
    fn test_train_forward_without_scaling_leaves_survivors_unchanged() {
        let mut dropout = Dropout::<f32>::with_seed(config(0.5, false), 7).unwrap();
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![4]);
        let y = dropout.forward(&x, Phase::Train);

        for i in 0..4 {
            let expected = if dropout.mask()[i] != 0 { x.data[i] } else { 0.0 };
            assert_eq!(y.data[i], expected);
        }
    }

    #[test]
    fn test_backward_applies_forward_multiplier() {
        // The concrete mask [1, 0, 1, 0] with p = 0.5 and train-time scaling:
        // every surviving gradient is doubled, every dropped one zeroed.
        let mut dropout = Dropout::<f32>::with_seed(config(0.5, true), 3).unwrap();
        dropout.mask = vec![1, 0, 1, 0];

        let grad_out = Tensor::new(vec![1.0, 1.0, 1.0, 1.0], vec![4]);
        let grad_in = dropout.backward(&grad_out, Phase::Train, true).unwrap();
        assert_eq!(grad_in.data, vec![2.0, 0.0, 2.0, 0.0]);
    }

    #[test]
    fn test_backward_without_scaling_passes_survivors_unchanged() {
        let mut dropout = Dropout::<f32>::with_seed(config(0.5, false), 3).unwrap();
        dropout.mask = vec![1, 0, 1, 0];

        let grad_out = Tensor::new(vec![0.5, 0.5, 0.5, 0.5], vec![4]);
        let grad_in = dropout.backward(&grad_out, Phase::Train, true).unwrap();
        assert_eq!(grad_in.data, vec![0.5, 0.0, 0.5, 0.0]);
    }

    #[test]
    fn test_backward_infer_mirrors_forward_compensation() {
        let dropout = Dropout::<f32>::with_seed(config(0.25, false), 3).unwrap();
        let grad_out = Tensor::new(vec![4.0, 8.0], vec![2]);
        let grad_in = dropout.backward(&grad_out, Phase::Infer, true).unwrap();
        assert_eq!(grad_in.data, vec![3.0, 6.0]);

        let dropout = Dropout::<f32>::with_seed(config(0.25, true), 3).unwrap();
        let grad_in = dropout.backward(&grad_out, Phase::Infer, true).unwrap();
        assert_eq!(grad_in.data, vec![4.0, 8.0]);
    }

    #[test]
    fn test_forward_backward_share_one_mask() {
        let mut dropout = Dropout::<f32>::with_seed(config(0.5, true), 11).unwrap();
        let x = Tensor::new(vec![1.0; 64], vec![64]);
        let y = dropout.forward(&x, Phase::Train);

        let grad_out = Tensor::new(vec![1.0; 64], vec![64]);
        let grad_in = dropout.backward(&grad_out, Phase::Train, true).unwrap();

        // Identical zero pattern and identical multiplier on survivors
        for i in 0..64 {
            assert_eq!(grad_in.data[i], y.data[i]);
        }
    }

    #[test]
    fn test_no_propagate_short_circuits() {
        let mut dropout = Dropout::<f32>::with_seed(config(0.5, true), 11).unwrap();
        let x = Tensor::new(vec![1.0; 8], vec![8]);
        dropout.forward(&x, Phase::Train);
        let mask_before = dropout.mask().to_vec();

        let grad_out = Tensor::new(vec![1.0; 8], vec![8]);
        assert!(dropout.backward(&grad_out, Phase::Train, false).is_none());
        assert_eq!(dropout.mask(), mask_before.as_slice());
    }

    #[test]
    #[should_panic(expected = "matching forward")]
    fn test_backward_without_forward_panics() {
        let dropout = Dropout::<f32>::with_seed(config(0.5, true), 11).unwrap();
        let grad_out = Tensor::new(vec![1.0; 4], vec![4]);
        let _ = dropout.backward(&grad_out, Phase::Train, true);
    }

    #[test]
    fn test_prepare_resizes_and_discards_stale_mask() {
        let mut dropout = Dropout::<f32>::with_seed(config(0.5, true), 11).unwrap();
        dropout.mask = vec![1, 1, 1, 1];

        dropout.prepare(2);
        assert_eq!(dropout.mask, vec![0, 0]);

        // Idempotent when the count is unchanged
        dropout.mask = vec![1, 1];
        dropout.prepare(2);
        assert_eq!(dropout.mask, vec![1, 1]);
    }

    #[test]
    fn test_forward_adapts_to_shape_changes() {
        let mut dropout = Dropout::<f32>::with_seed(config(0.5, true), 11).unwrap();
        dropout.forward(&Tensor::new(vec![1.0; 4], vec![4]), Phase::Train);
        assert_eq!(dropout.mask().len(), 4);

        dropout.forward(&Tensor::new(vec![1.0; 6], vec![2, 3]), Phase::Train);
        assert_eq!(dropout.mask().len(), 6);
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let cfg = config(0.3, true);
        let mut a = Dropout::<f32>::with_seed(cfg, 99).unwrap();
        let mut b = Dropout::<f32>::with_seed(cfg, 99).unwrap();

        let x = Tensor::new(vec![1.0; 128], vec![128]);
        let ya = a.forward(&x, Phase::Train);
        let yb = b.forward(&x, Phase::Train);
        assert_eq!(ya.data, yb.data);
        assert_eq!(a.mask(), b.mask());
    }

    #[test]
    fn test_consecutive_forwards_resample() {
        let mut dropout = Dropout::<f32>::with_seed(config(0.5, true), 99).unwrap();
        let x = Tensor::new(vec![1.0; 256], vec![256]);
        dropout.forward(&x, Phase::Train);
        let first = dropout.mask().to_vec();
        dropout.forward(&x, Phase::Train);
        assert_ne!(dropout.mask(), first.as_slice());
    }

    #[test]
    fn test_mask_fraction_converges_to_drop_ratio() {
        let n = 1_000_000;
        let mut dropout = Dropout::<f32>::with_seed(config(0.25, true), 5).unwrap();
        let x = Tensor::new(vec![1.0; n], vec![n]);
        dropout.forward(&x, Phase::Train);

        let dropped = dropout.mask().iter().filter(|&&m| m == 0).count();
        let fraction = dropped as f64 / n as f64;
        // Standard error is sqrt(p(1-p)/n) ~ 4.3e-4; 0.005 is a wide margin
        assert!(
            (fraction - 0.25).abs() < 0.005,
            "dropped fraction {} too far from 0.25",
            fraction
        );
    }

    #[test]
    fn test_train_output_is_unbiased() {
        let x = Tensor::new(vec![1.0, -2.0, 3.0, 0.5], vec![4]);
        let trials = 4000;

        for scale_in_train in [true, false] {
            let mut dropout = Dropout::<f64>::with_seed(config(0.3, scale_in_train), 13).unwrap();
            let mut sums = vec![0.0f64; 4];
            for _ in 0..trials {
                let y = dropout.forward(&x, Phase::Train);
                for (sum, &v) in sums.iter_mut().zip(&y.data) {
                    *sum += v;
                }
            }

            // Without train-time scaling the expectation is x * (1 - p);
            // inference compensation restores it to x overall.
            let expectation_scale = if scale_in_train { 1.0 } else { 0.7 };
            for (sum, &xi) in sums.iter().zip(&x.data) {
                let mean = sum / trials as f64;
                assert!(
                    (mean - xi * expectation_scale).abs() < 0.1,
                    "mean {} too far from {}",
                    mean,
                    xi * expectation_scale
                );
            }
        }
    }

    #[test]
    fn test_double_precision_instance() {
        let mut dropout = Dropout::<f64>::with_seed(config(0.5, false), 1).unwrap();
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![4]);
        let y = dropout.forward(&x, Phase::Infer);
        assert_eq!(y.data, vec![0.5, 1.0, 1.5, 2.0]);
    }
}
