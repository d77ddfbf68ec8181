//! Schedule - the deterministic list of configurations for a session

use super::RunConfiguration;
use crate::config::BenchConfig;

/// Ordered, enumerable set of configurations.
///
/// Order is tool (as listed in the config), then problem (as listed), then
/// trial. Results are written in this order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    configurations: Vec<RunConfiguration>,
}

impl Schedule {
    /// Wrap an explicit list, keeping its order.
    #[must_use]
    pub const fn new(configurations: Vec<RunConfiguration>) -> Self {
        Self { configurations }
    }

    /// Expand tools × problems × trials from a validated config.
    #[must_use]
    pub fn from_config(config: &BenchConfig) -> Self {
        let mut configurations = Vec::new();
        for tool in &config.tools {
            for problem in config.problems_for(tool) {
                for trial in 0..config.trials {
                    configurations.push(
                        RunConfiguration::builder(&tool.name, tool.kind, &problem.name)
                            .params(problem.params.clone())
                            .trial(trial)
                            .build(),
                    );
                }
            }
        }
        Self { configurations }
    }

    /// Number of configurations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    /// True when nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }

    /// Configurations in order.
    pub fn iter(&self) -> std::slice::Iter<'_, RunConfiguration> {
        self.configurations.iter()
    }

    /// Configurations as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[RunConfiguration] {
        &self.configurations
    }
}

impl<'a> IntoIterator for &'a Schedule {
    type Item = &'a RunConfiguration;
    type IntoIter = std::slice::Iter<'a, RunConfiguration>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
