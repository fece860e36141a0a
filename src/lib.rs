//! Puck: Dropout Regularization Transform
//!
//! A stochastic regularization transform for from-scratch neural network
//! training, implemented in Rust. Named after the mischievous sprite from
//! Shakespeare's *A Midsummer Night's Dream*, who delights in randomly
//! meddling with mortals — much as dropout randomly silences activations.
//!
//! During training the transform zeroes each input element independently with
//! probability `drop_ratio` and rescales survivors so the expected activation
//! magnitude is preserved; during inference it passes data through
//! deterministically. The backward pass reuses the exact mask sampled on the
//! forward pass, so the gradient flows only through surviving elements.
//!
//! # Modules
//!
//! - [`dropout`] - The transform: configuration, phases, forward/backward
//! - [`tensor`] - Minimal tensor container backing the transform
//! - [`error`] - Configuration error type
//!
//! # Example
//!
//! ```rust
//! use puck::{Dropout, DropoutConfig, Phase, Tensor};
//!
//! let config = DropoutConfig { drop_ratio: 0.5, scale_in_train: true };
//! let mut dropout = Dropout::<f32>::with_seed(config, 42).unwrap();
//!
//! // Training: sample a mask, zero half the activations, double survivors
//! let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![4]);
//! let y = dropout.forward(&x, Phase::Train);
//!
//! // Backward reuses the same mask
//! let grad = dropout.backward(&y, Phase::Train, true).unwrap();
//! assert_eq!(grad.data.len(), 4);
//!
//! // Inference is the identity under train-time scaling
//! let z = dropout.forward(&x, Phase::Infer);
//! assert_eq!(z.data, x.data);
//! ```

pub mod dropout;
pub mod error;
pub mod tensor;

// Re-export main types for convenience
pub use dropout::{Dropout, DropoutConfig, Phase};
pub use error::DropoutError;
pub use tensor::Tensor;
