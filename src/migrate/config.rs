//! Migration run configuration

use serde::{Deserialize, Serialize};

/// Default number of result documents logged per read
pub const DEFAULT_SAMPLE_SIZE: usize = 10;

/// Default destination namespace
pub const DEFAULT_NAMESPACE: &str = "dvdrental";

/// Main migration configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Destination namespace, reset before loading
    pub namespace: String,
    /// Phases to run (empty = all)
    pub phases: Vec<Phase>,
    /// Result documents logged per read pipeline
    pub sample_size: usize,
    /// Verbose output
    pub verbose: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            phases: Vec::new(),
            sample_size: DEFAULT_SAMPLE_SIZE,
            verbose: false,
        }
    }
}

impl MigrationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the destination namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set specific phases to run; `Done` is always reached regardless
    pub fn with_phases(mut self, phases: Vec<Phase>) -> Self {
        self.phases = phases;
        self
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// Enable verbose output
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Phases to run, in state machine order, ending with `Done`
    pub fn effective_phases(&self) -> Vec<Phase> {
        Phase::all()
            .into_iter()
            .filter(|p| *p == Phase::Done || self.should_run_phase(*p))
            .collect()
    }

    /// Check if a specific phase should run
    pub fn should_run_phase(&self, phase: Phase) -> bool {
        self.phases.is_empty() || phase == Phase::Done || self.phases.contains(&phase)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.namespace.trim().is_empty() {
            return Err(
                "namespace must not be empty; set [sink].namespace or pass --namespace"
                    .to_string(),
            );
        }
        if self.should_run_phase(Phase::Loading) && !self.should_run_phase(Phase::Extracting) {
            return Err(
                "the loading phase needs the extracting phase; list both phases or neither"
                    .to_string(),
            );
        }
        Ok(())
    }
}

/// States of a migration run, strictly sequential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Phase 1: Read every table of the source
    Extracting,
    /// Phase 2: Reset the namespace and bulk load the tables
    Loading,
    /// Phase 3: Run the read battery and register views
    Reading,
    /// Phase 4: Field updates and inserts
    Mutating,
    /// Phase 5: Cascading deletes
    Deleting,
    /// Terminal: release the source connection
    Done,
}

impl Phase {
    /// Get all phases in execution order
    pub fn all() -> Vec<Self> {
        vec![
            Self::Extracting,
            Self::Loading,
            Self::Reading,
            Self::Mutating,
            Self::Deleting,
            Self::Done,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Extracting => "extracting",
            Self::Loading => "loading",
            Self::Reading => "reading",
            Self::Mutating => "mutating",
            Self::Deleting => "deleting",
            Self::Done => "done",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Extracting => "Extract every source table as JSON records",
            Self::Loading => "Reset the namespace and load one collection per table",
            Self::Reading => "Run read pipelines and create views",
            Self::Mutating => "Update and insert documents",
            Self::Deleting => "Cascade deletes from children to parents",
            Self::Done => "Release the source connection",
        }
    }

    /// Get phase index (1-based)
    pub fn index(&self) -> usize {
        match self {
            Self::Extracting => 1,
            Self::Loading => 2,
            Self::Reading => 3,
            Self::Mutating => 4,
            Self::Deleting => 5,
            Self::Done => 6,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "extracting" | "extract" | "1" => Ok(Self::Extracting),
            "loading" | "load" | "2" => Ok(Self::Loading),
            "reading" | "read" | "3" => Ok(Self::Reading),
            "mutating" | "mutate" | "4" => Ok(Self::Mutating),
            "deleting" | "delete" | "5" => Ok(Self::Deleting),
            "done" | "6" => Ok(Self::Done),
            _ => Err(format!("Unknown phase: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_config_default() {
        let config = MigrationConfig::default();
        assert_eq!(config.namespace, "dvdrental");
        assert_eq!(config.sample_size, 10);
        assert_eq!(config.effective_phases(), Phase::all());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_migration_config_builder() {
        let config = MigrationConfig::new()
            .with_namespace("scratch")
            .with_phases(vec![Phase::Extracting, Phase::Loading])
            .with_sample_size(3)
            .with_verbose(true);

        assert_eq!(config.namespace, "scratch");
        assert_eq!(config.sample_size, 3);
        assert!(config.verbose);
        assert_eq!(
            config.effective_phases(),
            vec![Phase::Extracting, Phase::Loading, Phase::Done]
        );
        assert!(!config.should_run_phase(Phase::Reading));
    }

    #[test]
    fn test_loading_needs_extracting() {
        let config = MigrationConfig::new().with_phases(vec![Phase::Loading]);
        assert!(config.validate().is_err());

        let config = MigrationConfig::new().with_phases(vec![Phase::Reading, Phase::Deleting]);
        assert!(config.validate().is_ok());

        assert!(MigrationConfig::new().with_namespace(" ").validate().is_err());
    }

    #[test]
    fn test_phase_parsing() {
        assert_eq!("loading".parse::<Phase>().unwrap(), Phase::Loading);
        assert_eq!("Read".parse::<Phase>().unwrap(), Phase::Reading);
        assert_eq!("5".parse::<Phase>().unwrap(), Phase::Deleting);
        assert!("rollback".parse::<Phase>().is_err());
        assert_eq!(Phase::Mutating.to_string(), "mutating");
        assert_eq!(Phase::Done.index(), 6);
    }
}
