use std::fs;
use std::path::Path;

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Executor, Initiator, PgrError};

/// Harness configuration: the initiators that share one logical unit.
///
/// ```no_run
/// use pgr::{Config, Shell};
///
/// let cfg = Config::read("/etc/pgr.yml")?;
/// let initiators = cfg.initiators(Shell);
/// # anyhow::Ok(())
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    initiators: Vec<InitiatorCfg>,
}

impl Config {
    /// create `Config` from yaml string
    pub fn from(s: &str) -> Result<Config> {
        let config = serde_yml::from_str::<Config>(s)?;
        config.validate()?;
        Ok(config)
    }

    /// create `Config` from yaml file
    pub fn read<S: AsRef<Path>>(filename: S) -> Result<Config> {
        let s = fs::read_to_string(filename)?;
        Config::from(&s)
    }

    /// encodes `Config` to yaml string
    pub fn to_yml(&self) -> Result<String> {
        let s = serde_yml::to_string(self)?;
        Ok(s)
    }

    /// echo `Config` yaml string to the file
    pub fn write_to<S: AsRef<Path>>(&self, filename: S) -> Result<()> {
        let yml = self.to_yml()?;
        fs::write(filename, yml)?;

        Ok(())
    }

    pub fn initiator_cfgs(&self) -> &[InitiatorCfg] {
        &self.initiators
    }

    /// The two keyed initiators every fixture drives.
    pub fn keyed(&self) -> (&InitiatorCfg, &InitiatorCfg) {
        let keyed = self
            .initiators
            .iter()
            .filter(|i| i.key.is_some())
            .collect::<Vec<&InitiatorCfg>>();
        (keyed[0], keyed[1])
    }

    /// The keyless initiator used for non-registrant cases, if configured.
    pub fn keyless(&self) -> Option<&InitiatorCfg> {
        self.initiators.iter().find(|i| i.key.is_none())
    }

    /// Build the initiator proxies, one executor handle each.
    pub fn initiators<E: Executor + Clone>(&self, exec: E) -> Vec<Initiator<E>> {
        self.initiators
            .iter()
            .map(|i| {
                Initiator::new(
                    i.name.as_str(),
                    i.device.as_str(),
                    i.key.as_deref(),
                    exec.clone(),
                )
            })
            .collect()
    }

    fn validate(&self) -> Result<()> {
        let key_re = Regex::new(r"^0x[0-9a-fA-F]+$")?;

        let mut keys = Vec::new();
        for init in &self.initiators {
            if init.name.is_empty() || init.device.is_empty() {
                anyhow::bail!(PgrError::BadConfig(
                    "every initiator needs a name and a device".to_string(),
                ))
            }
            if let Some(key) = &init.key {
                if !key_re.is_match(key) {
                    anyhow::bail!(PgrError::BadConfig(format!(
                        "key '{}' of '{}' is not a 0x-prefixed hex value",
                        key, init.name,
                    )))
                }
                if keys.contains(key) {
                    anyhow::bail!(PgrError::BadConfig(format!(
                        "key '{}' is used by more than one initiator",
                        key,
                    )))
                }
                keys.push(key.clone());
            }
        }

        if keys.len() < 2 {
            anyhow::bail!(PgrError::BadConfig(
                "at least two keyed initiators are required".to_string(),
            ))
        }

        Ok(())
    }
}

/// One initiator entry: a path to the shared device as seen through this
/// initiator's interface, and the key it registers under. Omitting the key
/// marks the never-registered host.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct InitiatorCfg {
    #[serde(default)]
    name: String,
    #[serde(default)]
    device: String,
    #[serde(default)]
    key: Option<String>,
}

impl InitiatorCfg {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}
