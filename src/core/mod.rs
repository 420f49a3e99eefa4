pub mod artifact;
pub mod digests;
pub mod index;
pub mod pipfile;
pub mod project;

pub use crate::domain::model::{
    ArtifactHash, PackageVersion, Packages, ProvenanceFinding, Severity, Source,
};
pub use crate::domain::ports::DigestsFetcher;
pub use crate::utils::error::Result;
