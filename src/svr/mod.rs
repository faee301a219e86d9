//! Sensor validation report (SVR) helper.
//!
//! Assembles the `svr.sh` invocation and the archive paths around it. All
//! outputs are exact string contracts consumed by the report tooling.

use std::path::{Path, PathBuf};

use crate::runner::CommandLine;

/// Report script invoked for every validation measure.
pub const SVR_SCRIPT: &str = "svr.sh";

/// Canonical sensor families, matched as case-insensitive prefixes.
const SENSOR_FAMILIES: &[&str] = &["AVHRR", "ATSR", "AMSR2", "AMSRE", "SEVIRI", "TMI"];

#[derive(Debug, Clone, Copy, Default)]
pub struct Svr;

impl Svr {
    /// Structured command behind [`Svr::assemble_call`].
    pub fn command(interpreter: &str, input_dir: &str, result_dir: &str, measure: &str) -> CommandLine {
        CommandLine::new(SVR_SCRIPT).args([interpreter, input_dir, result_dir, measure])
    }

    /// `"svr.sh <interpreter> <input_dir> <result_dir> <measure>"`, each
    /// argument shell-quoted when it needs to be.
    pub fn assemble_call(interpreter: &str, input_dir: &str, result_dir: &str, measure: &str) -> String {
        Self::command(interpreter, input_dir, result_dir, measure).to_shell_string()
    }

    /// Joins `root/sensor/year/month` with the platform separator.
    pub fn assemble_input_path(root: impl AsRef<Path>, sensor: &str, year: &str, month: &str) -> PathBuf {
        root.as_ref().join(sensor).join(year).join(month)
    }

    /// Canonical family of a raw sensor identifier, or `""` when unknown.
    pub fn extract_sensor_name(raw: &str) -> &'static str {
        let upper = raw.to_ascii_uppercase();
        SENSOR_FAMILIES
            .iter()
            .find(|family| upper.starts_with(*family))
            .copied()
            .unwrap_or("")
    }

    /// Destination of a finished report; casing of `sensor_dir` is kept.
    pub fn create_post_condition(sensor_dir: &str, year: &str, month: &str) -> String {
        format!("/svr/{}/{}/{}", sensor_dir, year, month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_call() {
        assert_eq!(
            Svr::assemble_call("python_path", "/input/dir", "/result/dir", "weather_measure"),
            "svr.sh python_path /input/dir /result/dir weather_measure"
        );
    }

    #[test]
    fn test_assemble_call_quotes_paths_with_spaces() {
        assert_eq!(
            Svr::assemble_call("python", "/input/my dir", "/result/dir", "sst"),
            "svr.sh python '/input/my dir' /result/dir sst"
        );
    }

    #[test]
    fn test_command_renders_like_assembled_call() {
        let cmd = Svr::command("python_path", "/input/dir", "/result/dir", "weather_measure");
        assert_eq!(cmd.program(), SVR_SCRIPT);
        assert_eq!(
            cmd.to_shell_string(),
            Svr::assemble_call("python_path", "/input/dir", "/result/dir", "weather_measure")
        );
    }

    #[test]
    fn test_assemble_input_path() {
        let path = Svr::assemble_input_path("/archive/root", "SensoR", "2008", "05");
        let expected: PathBuf = ["/archive/root", "SensoR", "2008", "05"].iter().collect();
        assert_eq!(path, expected);

        #[cfg(unix)]
        assert_eq!(path.to_string_lossy(), "/archive/root/SensoR/2008/05");
    }

    #[test]
    fn test_extract_sensor_name() {
        assert_eq!(Svr::extract_sensor_name("AVHRRMTA_G"), "AVHRR");
        assert_eq!(Svr::extract_sensor_name("avhrrmta_g"), "AVHRR");
        assert_eq!(Svr::extract_sensor_name("MERIS_FRS"), "");
    }

    #[test]
    fn test_extract_sensor_name_atsr() {
        assert_eq!(Svr::extract_sensor_name("atsr.3"), "ATSR");
        assert_eq!(Svr::extract_sensor_name("ATSR.2.3"), "ATSR");
        assert_eq!(Svr::extract_sensor_name("amsr2"), "AMSR2");
        assert_eq!(Svr::extract_sensor_name(""), "");
    }

    #[test]
    fn test_create_post_condition() {
        assert_eq!(Svr::create_post_condition("SenSoR", "2010", "06"), "/svr/SenSoR/2010/06");
    }
}
