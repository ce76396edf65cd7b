//! Tempstack Core Library
//!
//! Drives one disposable environment through its lifecycle: provision,
//! validate, build, test locally, deploy, resolve the endpoint and test
//! remotely, then destroy it exactly once whatever happened before.

pub mod build;
pub mod config;
pub mod deploy;
pub mod e2e;
pub mod error;
pub mod fakes;
pub mod identity;
pub mod lifecycle;
pub mod package_json;
pub mod process;
pub mod provision;
pub mod readiness;
pub mod report;
pub mod stage;
pub mod telemetry;
pub mod validate;

pub use build::{Build, NpmBuild};
pub use config::{Environment, PollConfig, RunConfig};
pub use deploy::{
    find_deployment, resolve_endpoint, set_app_name, ApiGateway, ArcDeployer, AwsCliInventory,
    Deployer, DeploymentRecord, Inventory,
};
pub use e2e::{CypressTests, EndToEndTests, TestTarget};
pub use error::{FailureKind, LifecycleError, StageFailure};
pub use identity::RunIdentity;
pub use lifecycle::{Components, Lifecycle, LifecycleSettings};
pub use process::{CommandSpec, ProcessOutput, ProcessRunner, TokioProcessRunner};
pub use provision::{CommandScaffolder, ProjectSkeleton, Provision, Provisioner, Scaffolder};
pub use readiness::{HttpReadinessProbe, ReadinessProbe};
pub use report::{CleanupStatus, RunOutcome, RunReport, StageRecord, StageStatus};
pub use stage::{RunState, Stage, StateMachine};
pub use validate::{DependencyValidator, PackageVersionValidator, ValidationResult};

/// Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;
