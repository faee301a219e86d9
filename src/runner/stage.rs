//! Pipeline stage specifications.

use serde::{Deserialize, Serialize};

use super::contract::{ArgumentContract, InvocationContext};
use crate::catalog::ProcessingUnit;

/// Prefix of the ARC stage scripts, dropped by `without_arc` runs.
pub const ARC_STAGE_PREFIX: &str = "arc";

/// One ordered pipeline step backed by an external program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Script name or path of the stage program.
    #[serde(alias = "script_name")]
    pub script: String,
    /// Maximum concurrent invocations of this stage.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Overrides the built-in argument contract of the script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<ArgumentContract>,
}

fn default_parallelism() -> usize {
    1
}

impl StageSpec {
    pub fn new(script: impl Into<String>, parallelism: usize) -> Self {
        Self {
            script: script.into(),
            parallelism,
            contract: None,
        }
    }

    pub fn with_contract(mut self, contract: ArgumentContract) -> Self {
        self.contract = Some(contract);
        self
    }

    /// Stable stage name used as history key.
    pub fn name(&self) -> &str {
        std::path::Path::new(&self.script)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.script)
    }

    /// Effective argument contract of this stage.
    pub fn contract(&self) -> ArgumentContract {
        self.contract
            .clone()
            .unwrap_or_else(|| ArgumentContract::builtin(&self.script))
    }

    /// Positional arguments for one unit.
    pub fn arguments(&self, unit: &ProcessingUnit, ctx: &InvocationContext) -> Vec<String> {
        self.contract().render(unit, ctx)
    }

    /// Returns true for ARC stages.
    pub fn is_arc(&self) -> bool {
        self.name().starts_with(ARC_STAGE_PREFIX)
    }
}

/// Stage list used when a run does not declare its own calls.
pub fn default_stages() -> Vec<StageSpec> {
    vec![
        StageSpec::new("sampling-start.sh", 1),
        StageSpec::new("coincidence-start.sh", 1),
        StageSpec::new("sub-start.sh", 1),
        StageSpec::new("arc-start.sh", 1),
        StageSpec::new("mmd-start.sh", 1),
    ]
}

impl From<(&str, usize)> for StageSpec {
    fn from((script, parallelism): (&str, usize)) -> Self {
        StageSpec::new(script, parallelism)
    }
}
