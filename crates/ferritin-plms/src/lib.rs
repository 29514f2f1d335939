//! ferritin-plms
//!
//! Protein language models that can be fine-tuned with candle.
//!
//! - [amplify model](https://github.com/chandar-lab/AMPLIFY)
//! - [amplify hf - 120M](https://huggingface.co/chandar-lab/AMPLIFY_120M)
//!
//! ```shell
//! cargo build -p ferritin-plms --features metal
//! ```
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{Device, Result};

pub use amplify::amplify::AMPLIFY;
pub use amplify::config::AMPLIFYConfig;
pub use amplify::loader::{AmplifyModels, AmplifyWeights, PretrainedSource};

pub mod amplify;

pub fn device(cpu: bool) -> Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else if cuda_is_available() {
        Ok(Device::new_cuda(0)?)
    } else if metal_is_available() {
        Ok(Device::new_metal(0)?)
    } else {
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        {
            log::info!(
                "Running on CPU, to run on GPU(metal), build with `--features metal`"
            );
        }
        #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
        {
            log::info!("Running on CPU, to run on GPU, build with `--features cuda`");
        }
        Ok(Device::Cpu)
    }
}
