//! Metrics collection modules.

mod gpu;
mod process;
pub mod slurm;
mod system;

pub use gpu::{build_gpu_stat, joules_to_millijoules};
pub use process::{build_process_stats, ProcessSample};
pub use system::{ProcessInspector, SysinfoInspector};
