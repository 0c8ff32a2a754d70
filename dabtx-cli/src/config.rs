//! TOML configuration for the modulator front-end.

use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub modulator: ModulatorSection,
    #[serde(default)]
    pub firfilter: FirSection,
    #[serde(default)]
    pub poly: PolySection,
    #[serde(default)]
    pub tii: TiiSection,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    /// `file.eti`, `tcp://host:port` or `udp://:port` (EDI).
    pub source: String,
    /// Restart the file at EOF.
    #[serde(default)]
    pub loop_file: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        InputConfig {
            source: "/dev/stdin".to_string(),
            loop_file: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModulatorSection {
    /// 0 follows the mode signalled in the ETI stream.
    #[serde(default)]
    pub mode: u8,
    #[serde(default = "default_gain_mode")]
    pub gain_mode: String,
    #[serde(default = "default_one")]
    pub digital_gain: f32,
    #[serde(default = "default_var_factor")]
    pub normalise_variance: f32,
    #[serde(default)]
    pub window_overlap: usize,
    #[serde(default)]
    pub tist_offset: f64,
}

fn default_gain_mode() -> String {
    "var".to_string()
}

fn default_one() -> f32 {
    1.0
}

fn default_var_factor() -> f32 {
    4.0
}

impl Default for ModulatorSection {
    fn default() -> Self {
        ModulatorSection {
            mode: 0,
            gain_mode: default_gain_mode(),
            digital_gain: 1.0,
            normalise_variance: 4.0,
            window_overlap: 0,
            tist_offset: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FirSection {
    pub tapsfile: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PolySection {
    pub coeffile: Option<String>,
    #[serde(default)]
    pub num_threads: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TiiSection {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub comb: u8,
    #[serde(default)]
    pub pattern: u8,
    #[serde(default)]
    pub old_variant: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub target: String,
    /// complexf, s16, u8 or s8.
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_rate")]
    pub rate: usize,
}

fn default_format() -> String {
    "complexf".to_string()
}

fn default_rate() -> usize {
    2_048_000
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            target: "/dev/stdout".to_string(),
            format: default_format(),
            rate: default_rate(),
        }
    }
}

impl CliConfig {
    pub fn from_file(path: impl AsRef<Path>) -> color_eyre::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_parses() {
        let config: CliConfig = toml::from_str(
            r#"
            [input]
            source = "ensemble.eti"

            [output]
            target = "out.iq"
            format = "s16"
            "#,
        )
        .unwrap();
        assert_eq!(config.input.source, "ensemble.eti");
        assert_eq!(config.output.format, "s16");
        assert_eq!(config.output.rate, 2_048_000);
        assert_eq!(config.modulator.gain_mode, "var");
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result: Result<CliConfig, _> = toml::from_str(
            r#"
            [modulator]
            volume = 11
            "#,
        );
        assert!(result.is_err());
    }
}
