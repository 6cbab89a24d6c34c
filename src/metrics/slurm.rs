//! Slurm job metadata from process environments.

use crate::types::SlurmInfo;

pub const SLURM_ENV_JOBID: &str = "SLURM_JOBID";
pub const SLURM_ENV_STEP_ID: &str = "SLURM_STEP_ID";
pub const SLURM_ENV_USER: &str = "SLURM_JOB_USER";
pub const SLURM_ENV_ACCOUNT: &str = "SLURM_JOB_ACCOUNT";
pub const SLURM_ENV_JOBNAME: &str = "SLURM_JOB_NAME";

/// Pick the well-known Slurm keys out of `KEY=VALUE` pairs. Missing keys stay
/// empty; malformed entries are skipped.
pub fn from_environ<I, S>(environ: I) -> SlurmInfo
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut info = SlurmInfo::default();
    for entry in environ {
        let Some((key, value)) = entry.as_ref().split_once('=') else {
            continue;
        };
        let slot = match key {
            SLURM_ENV_JOBID => &mut info.job_id,
            SLURM_ENV_STEP_ID => &mut info.step_id,
            SLURM_ENV_USER => &mut info.user,
            SLURM_ENV_ACCOUNT => &mut info.account,
            SLURM_ENV_JOBNAME => &mut info.job_name,
            _ => continue,
        };
        *slot = value.to_string();
    }
    info
}
