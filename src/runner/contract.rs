//! Positional argument contracts of stage programs.
//!
//! Every stage program receives a fixed, ordered list of positional arguments
//! derived from the unit being processed and the run context. The order is a
//! convention owned by the stage program, so contracts are versioned and keyed
//! by script name. Campaign files may override a contract per stage.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::{ProcessingUnit, SamplingConfig};

/// Current version of the built-in contracts.
pub const CONTRACT_VERSION: u32 = 1;

/// One positional argument of a stage program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgSlot {
    /// Root of the input archive.
    ArchiveRoot,
    /// Root of the output tree.
    OutputRoot,
    /// Sensor name of the unit.
    Sensor,
    /// Four digit year of the unit.
    Year,
    /// Zero padded month of the unit.
    Month,
    /// First day of the unit (`YYYY-MM-DD`).
    StartDate,
    /// Exclusive last day of the unit (`YYYY-MM-DD`).
    EndDate,
    /// Campaign use case name.
    Usecase,
    /// Output format tag of the run (e.g. `mmd6`).
    OutputFormat,
    /// Sampling cap, `0` for exhaustive.
    SamplesPerMonth,
}

/// Ordered positional arguments expected by a stage program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentContract {
    #[serde(default = "default_version")]
    pub version: u32,
    pub slots: Vec<ArgSlot>,
}

fn default_version() -> u32 {
    CONTRACT_VERSION
}

impl ArgumentContract {
    pub fn new(slots: Vec<ArgSlot>) -> Self {
        Self {
            version: CONTRACT_VERSION,
            slots,
        }
    }

    /// Built-in contract for a stage script, looked up by file name.
    pub fn builtin(script: &str) -> Self {
        use ArgSlot::*;

        let name = Path::new(script)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(script);

        let slots = match name {
            "sampling-start.sh" => vec![ArchiveRoot, OutputRoot, Sensor, Year, Month, SamplesPerMonth],
            "mmd-start.sh" => vec![ArchiveRoot, OutputRoot, Sensor, Year, Month, OutputFormat],
            _ => vec![ArchiveRoot, OutputRoot, Sensor, Year, Month],
        };
        Self::new(slots)
    }

    /// Renders the argument values for one unit.
    pub fn render(&self, unit: &ProcessingUnit, ctx: &InvocationContext) -> Vec<String> {
        self.slots
            .iter()
            .map(|slot| match slot {
                ArgSlot::ArchiveRoot => ctx.archive_root.display().to_string(),
                ArgSlot::OutputRoot => ctx.output_root.display().to_string(),
                ArgSlot::Sensor => unit.sensor.name.clone(),
                ArgSlot::Year => unit.month.year_str(),
                ArgSlot::Month => unit.month.month_str(),
                ArgSlot::StartDate => unit.start_date(),
                ArgSlot::EndDate => unit.end_date(),
                ArgSlot::Usecase => ctx.usecase.clone(),
                ArgSlot::OutputFormat => ctx.output_format.clone(),
                ArgSlot::SamplesPerMonth => ctx.sampling.samples_per_month.to_string(),
            })
            .collect()
    }
}

/// Run-wide values available to every stage invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationContext {
    pub usecase: String,
    pub output_format: String,
    pub archive_root: PathBuf,
    pub output_root: PathBuf,
    pub sampling: SamplingConfig,
}

impl InvocationContext {
    pub fn new(usecase: impl Into<String>, output_format: impl Into<String>) -> Self {
        Self {
            usecase: usecase.into(),
            output_format: output_format.into(),
            archive_root: PathBuf::from("./archive"),
            output_root: PathBuf::from("./output"),
            sampling: SamplingConfig::default(),
        }
    }

    pub fn with_archive_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.archive_root = root.into();
        self
    }

    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PrimarySensor;
    use crate::period::Period;

    fn unit() -> ProcessingUnit {
        let sensor = PrimarySensor::parse("amsr2", "2012-07-02", "2015-04-01").unwrap();
        let month = Period::parse("2012-07-02", "2015-01-01")
            .unwrap()
            .months()
            .next()
            .unwrap();
        ProcessingUnit { sensor, month }
    }

    fn ctx() -> InvocationContext {
        InvocationContext::new("mms6b", "mmd6")
            .with_archive_root("/archive")
            .with_output_root("/out")
            .with_sampling(SamplingConfig::new(3_000_000))
    }

    #[test]
    fn test_default_contract() {
        let args = ArgumentContract::builtin("coincidence-start.sh").render(&unit(), &ctx());
        assert_eq!(args, ["/archive", "/out", "amsr2", "2012", "07"]);
    }

    #[test]
    fn test_sampling_contract_carries_density() {
        let args = ArgumentContract::builtin("sampling-start.sh").render(&unit(), &ctx());
        assert_eq!(args.last().map(String::as_str), Some("3000000"));
    }

    #[test]
    fn test_builtin_lookup_ignores_directory() {
        let contract = ArgumentContract::builtin("/opt/mms/bin/mmd-start.sh");
        assert_eq!(contract.slots.last(), Some(&ArgSlot::OutputFormat));
        assert_eq!(contract.version, CONTRACT_VERSION);
    }

    #[test]
    fn test_custom_contract_from_yaml() {
        let contract: ArgumentContract =
            serde_yaml::from_str("slots: [usecase, start_date, end_date, sensor]").unwrap();
        assert_eq!(contract.version, 1);

        let args = contract.render(&unit(), &ctx());
        assert_eq!(args, ["mms6b", "2012-07-02", "2012-08-01", "amsr2"]);
    }
}
