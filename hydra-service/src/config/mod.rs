// Configuration Module
// Run parameters, their resolution into a RunConfiguration, and tool settings

pub mod models;
pub mod params;
pub mod resolver;
pub mod settings;

// Re-export key types
pub use models::{
    ArtifactSource, Backend, CloudProvider, DisposalPolicy, PostBehavior, ProvisionType,
    RunConfiguration,
};
pub use params::RawParams;
pub use resolver::{resolve, EnvironmentResolver, SelectorPolicy};
pub use settings::HydraSettings;
