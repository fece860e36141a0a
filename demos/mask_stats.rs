//! Dropout Mask Statistics
//!
//! Exercises the dropout transform over a large vector and prints the
//! statistics its contracts promise: the dropped fraction converging to the
//! configured ratio, the preserved mean activation, and the forward/backward
//! multiplier agreement.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --example mask_stats -- --ratio 0.5 --count 1000000
//!
//! # Defer compensation to inference instead of scaling at train time
//! cargo run --release --example mask_stats -- --ratio 0.2 --no-train-scale
//! ```

use clap::Parser;
use puck::{Dropout, DropoutConfig, Phase, Tensor};

#[derive(Parser)]
#[command(name = "mask_stats", about = "Dropout transform statistics demo")]
struct Args {
    /// Probability of zeroing an element (strictly between 0 and 1)
    #[arg(long, default_value_t = 0.5)]
    ratio: f64,

    /// Number of elements in the probe vector
    #[arg(long, default_value_t = 1_000_000)]
    count: usize,

    /// RNG seed for reproducible masks
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Defer the compensating scale to inference instead of train time
    #[arg(long)]
    no_train_scale: bool,
}

fn main() {
    let args = Args::parse();
    let config = DropoutConfig {
        drop_ratio: args.ratio,
        scale_in_train: !args.no_train_scale,
    };

    let mut dropout = match Dropout::<f32>::with_seed(config, args.seed) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let input = Tensor::new(vec![1.0; args.count], vec![args.count]);

    // Training forward: sample a mask and measure what survived
    let output = dropout.forward(&input, Phase::Train);
    let dropped = dropout.mask().iter().filter(|&&m| m == 0).count();
    let train_mean = output.data.iter().sum::<f32>() / args.count as f32;

    println!(
        "Elements: {} | Drop ratio: {:.3} | Scale at train time: {}",
        args.count, args.ratio, config.scale_in_train
    );
    println!(
        "Dropped: {} ({:.4} of elements, expected {:.4})",
        dropped,
        dropped as f64 / args.count as f64,
        args.ratio
    );
    println!(
        "Train mean activation: {:.4} (expected {:.4})",
        train_mean,
        if config.scale_in_train {
            1.0
        } else {
            1.0 - args.ratio
        }
    );

    // Backward with a gradient of ones mirrors the forward multiplier
    let grad_out = Tensor::new(vec![1.0; args.count], vec![args.count]);
    let grad_in = dropout
        .backward(&grad_out, Phase::Train, true)
        .expect("propagation enabled");
    let grad_mean = grad_in.data.iter().sum::<f32>() / args.count as f32;
    println!("Backward mean gradient:  {:.4} (matches train mean)", grad_mean);

    // Inference forward is deterministic
    let infer = dropout.forward(&input, Phase::Infer);
    let infer_mean = infer.data.iter().sum::<f32>() / args.count as f32;
    println!(
        "Infer mean activation: {:.4} (expected {:.4})",
        infer_mean,
        if config.scale_in_train {
            1.0
        } else {
            1.0 - args.ratio
        }
    );
}
