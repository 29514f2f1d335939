//! AMPLIFY
//!
//! Encoder-only protein language model used as a fine-tuning backbone.
//!
//! - [GH Amplify Code](https://github.com/chandar-lab/AMPLIFY)
//! - [HF - 120M Model ](https://huggingface.co/chandar-lab/AMPLIFY_120M)
//! - [Paper](https://www.biorxiv.org/content/10.1101/2024.09.23.614603v1)
//!
pub mod amplify;
pub mod config;
pub mod encoder;
pub mod loader;
pub mod rmsnorm;
pub mod rotary;
