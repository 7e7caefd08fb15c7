pub mod loader;
pub mod types;

pub use types::{
    DeploymentRequirements, Difficulty, EvaluationCriteria, ExpectedOutput, MetricCategory,
    NonFunctionalRequirement, Priority, Problem, Requirement, TestCase, TestInput, TestStatus,
};
