//! Pipeline and stage definitions
//!
//! Stages are plain data. They are built either from the JSON form used by
//! document stores (see [`Pipeline::from_json`]) or with the constructors
//! below, which keeps pipelines testable against synthetic collections.

use std::fmt;

use crate::document::Filter;

use super::expr::{Accumulator, Expression};

/// Sort direction for one sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// One key of a `sort` stage
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub path: String,
    pub direction: SortDirection,
}

/// `group` stage: partition by `key`, then fold each partition
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    pub key: Expression,
    pub accumulators: Vec<(String, Accumulator)>,
}

/// `lookup` stage: attach all foreign documents whose `foreign_field` equals
/// the input's `local_field`, as an array under `as_field`
#[derive(Debug, Clone, PartialEq)]
pub struct LookupSpec {
    pub from: String,
    pub local_field: String,
    pub foreign_field: String,
    pub as_field: String,
}

/// `unwind` stage: one output per element of the array at `path`
#[derive(Debug, Clone, PartialEq)]
pub struct UnwindSpec {
    pub path: String,
    /// Keep documents whose array is empty, null or absent
    pub preserve_missing: bool,
}

/// How a `project` stage treats one field
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Include,
    Exclude,
    Computed(Expression),
}

/// A single pipeline stage
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Group(GroupSpec),
    Sort(Vec<SortKey>),
    Limit(usize),
    Lookup(LookupSpec),
    Unwind(UnwindSpec),
    AddFields(Vec<(String, Expression)>),
    Project(Vec<(String, Projection)>),
    /// Replace the stream by one document `{name: count}`
    Count(String),
}

impl Stage {
    /// Operator name of the stage, as written in JSON
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Group(_) => "$group",
            Stage::Sort(_) => "$sort",
            Stage::Limit(_) => "$limit",
            Stage::Lookup(_) => "$lookup",
            Stage::Unwind(_) => "$unwind",
            Stage::AddFields(_) => "$addFields",
            Stage::Project(_) => "$project",
            Stage::Count(_) => "$count",
        }
    }

    pub fn lookup(
        from: impl Into<String>,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
        as_field: impl Into<String>,
    ) -> Self {
        Stage::Lookup(LookupSpec {
            from: from.into(),
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            as_field: as_field.into(),
        })
    }

    pub fn unwind(path: impl Into<String>, preserve_missing: bool) -> Self {
        Stage::Unwind(UnwindSpec {
            path: path.into(),
            preserve_missing,
        })
    }

    /// Group by a field and count the members of each group into `count_field`
    pub fn group_count(key_path: impl Into<String>, count_field: impl Into<String>) -> Self {
        Stage::Group(GroupSpec {
            key: Expression::Field(key_path.into()),
            accumulators: vec![(count_field.into(), Accumulator::Sum(Expression::literal(1)))],
        })
    }

    pub fn sort_by(path: impl Into<String>, direction: SortDirection) -> Self {
        Stage::Sort(vec![SortKey {
            path: path.into(),
            direction,
        }])
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered sequence of stages, evaluated left to right
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Compact form for log lines: `$group -> $sort -> $limit`
    pub fn describe(&self) -> String {
        if self.stages.is_empty() {
            return "(empty)".to_string();
        }
        self.stages
            .iter()
            .map(Stage::name)
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

impl From<Vec<Stage>> for Pipeline {
    fn from(stages: Vec<Stage>) -> Self {
        Self { stages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_builder_and_describe() {
        let pipeline = Pipeline::new()
            .with_stage(Stage::group_count("a_id", "count"))
            .with_stage(Stage::sort_by("count", SortDirection::Descending))
            .with_stage(Stage::Limit(1));
        assert_eq!(pipeline.len(), 3);
        assert_eq!(pipeline.describe(), "$group -> $sort -> $limit");
        assert_eq!(Pipeline::new().describe(), "(empty)");
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::unwind("actor", true).to_string(), "$unwind");
        assert_eq!(Stage::lookup("a", "b", "c", "d").name(), "$lookup");
    }
}
