//! Provisioner Configuration
//!
//! Settings come from an optional YAML file. Command line flags override
//! individual fields after loading.

use crate::broker::BrokerConfig;
use crate::controlplane::ControlPlaneConfig;
use crate::engine::{PsmdbConfig, PxcConfig};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvisionerConfig {
    pub control_plane: ControlPlaneConfig,
    pub broker: BrokerConfig,
    pub pxc: PxcConfig,
    pub psmdb: PsmdbConfig,
}

impl ProvisionerConfig {
    /// Load from `path`, or defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_yaml::from_str(&text)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}

/// Read an options file: one assignment per line, `#` starts a comment
pub fn read_options_file(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Configuration(format!("cannot read options file {}: {}", path.display(), e))
    })?;
    Ok(parse_options_text(&text))
}

fn parse_options_text(text: &str) -> String {
    text.lines()
        .map(|line| match line.split_once('#') {
            Some((before, _)) => before,
            None => line,
        })
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = ProvisionerConfig::load(None).unwrap();
        assert_eq!(config, ProvisionerConfig::default());
        assert_eq!(config.control_plane.namespace, "default");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "controlPlane:\n  namespace: databases\npxc:\n  operatorVersion: 1.6.0\n"
        )
        .unwrap();

        let config = ProvisionerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.control_plane.namespace, "databases");
        assert_eq!(config.control_plane.field_manager, "dbaas-provisioner");
        assert_eq!(config.pxc.operator_version, "1.6.0");
        assert_eq!(config.pxc.pxc_image, PxcConfig::default().pxc_image);
        assert_eq!(config.broker, BrokerConfig::default());
    }

    #[test]
    fn test_missing_file() {
        let err = ProvisionerConfig::load(Some(Path::new("/nonexistent/dbaas.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_options_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "# sizing\npxc.size=5\n\n  proxysql.size=1   # keep one proxy\npxc.nodeselector=disk:ssd;zone:a\n"
        )
        .unwrap();

        let options = read_options_file(file.path()).unwrap();
        assert_eq!(options, "pxc.size=5,proxysql.size=1,pxc.nodeselector=disk:ssd;zone:a");
    }
}
