//! Release manifest handling
//!
//! - [`classifier`]: partitions a manifest into control-plane and member halves
//! - [`substitution`]: install-time regex/template rewriting

pub mod classifier;
pub mod substitution;

pub use classifier::{
    parse_documents, split, ClassificationPolicy, ManifestDocument, Scope, SplitManifest,
    SEPARATOR,
};
pub use substitution::{
    KubeObjectLookup, ObjectLookup, Replacement, SubstitutionConfig, Substitutor,
};
