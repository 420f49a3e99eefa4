pub mod core;
pub mod domain;
pub mod utils;

pub use core::artifact::Artifact;
pub use core::digests::PackageDigestsFetcher;
pub use core::index::IndexClient;
pub use core::pipfile::{Pipfile, PipfileLock, PipfileMeta};
pub use core::project::Project;
pub use domain::model::{
    ArtifactHash, PackageVersion, Packages, ProvenanceFinding, Severity, Source,
};
pub use domain::ports::DigestsFetcher;
pub use utils::error::{PipstackError, Result};
