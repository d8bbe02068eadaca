//! The fixed table of benchmark variants.
//!
//! Artifact paths are relative to the repository root: the Python and C#
//! bundles are built outside this workspace, the Rust bundles come from
//! `cargo xtask package`.

use std::collections::BTreeMap;

use crate::deployment::{
    Architecture, ArtifactRef, RetentionDays, Runtime, VariantDescriptor, EXPERIMENT_TYPE_KEY,
};

pub const FUNCTION_NAME_PREFIX: &str = "PrimeNumbersCounter";
pub const PYTHON_ARTIFACT: &str = "Python/package.zip";
pub const CSHARP_X86_ARTIFACT: &str = "CSharp/package_x86.zip";
pub const CSHARP_ARM_ARTIFACT: &str = "CSharp/package_arm.zip";
pub const RUST_DIST_DIR: &str = "dist";

const PYTHON_HANDLER: &str = "index.handler";
const CSHARP_HANDLER: &str = "CSharp::CSharp.Functions::Handler";
const RUST_HANDLER: &str = "bootstrap";

/// Two runtimes on two architectures: Python 3.9 and .NET 8, each on
/// x86_64 and on Graviton (arm64).
pub fn standard_variants() -> Vec<VariantDescriptor> {
    vec![
        variant(
            "X86-Python",
            Architecture::X86_64,
            Runtime::Python39,
            PYTHON_HANDLER,
            "X86_PYTHON",
            ArtifactRef::portable(PYTHON_ARTIFACT),
        ),
        variant(
            "Graviton-Python",
            Architecture::Arm64,
            Runtime::Python39,
            PYTHON_HANDLER,
            "GRAVITON_PYTHON",
            ArtifactRef::portable(PYTHON_ARTIFACT),
        ),
        variant(
            "X86-CSharp",
            Architecture::X86_64,
            Runtime::Dotnet8,
            CSHARP_HANDLER,
            "X86_CSHARP",
            ArtifactRef::native(CSHARP_X86_ARTIFACT, Architecture::X86_64),
        ),
        variant(
            "Graviton-CSharp",
            Architecture::Arm64,
            Runtime::Dotnet8,
            CSHARP_HANDLER,
            "GRAVITON_CSHARP",
            ArtifactRef::native(CSHARP_ARM_ARTIFACT, Architecture::Arm64),
        ),
    ]
}

/// The Rust handler on the `provided.al2023` custom runtime.
pub fn rust_variants() -> Vec<VariantDescriptor> {
    vec![
        variant(
            "X86-Rust",
            Architecture::X86_64,
            Runtime::ProvidedAl2023,
            RUST_HANDLER,
            "X86_RUST",
            ArtifactRef::native(rust_artifact_path(Architecture::X86_64), Architecture::X86_64),
        ),
        variant(
            "Graviton-Rust",
            Architecture::Arm64,
            Runtime::ProvidedAl2023,
            RUST_HANDLER,
            "GRAVITON_RUST",
            ArtifactRef::native(rust_artifact_path(Architecture::Arm64), Architecture::Arm64),
        ),
    ]
}

/// Where `cargo xtask package` writes the Rust bundle for `architecture`.
pub fn rust_artifact_path(architecture: Architecture) -> String {
    format!("{RUST_DIST_DIR}/prime_counter_{}.zip", architecture.as_str())
}

pub fn catalog(include_rust: bool) -> Vec<VariantDescriptor> {
    let mut variants = standard_variants();
    if include_rust {
        variants.extend(rust_variants());
    }
    variants
}

fn variant(
    suffix: &str,
    architecture: Architecture,
    runtime: Runtime,
    handler: &str,
    experiment_type: &str,
    artifact: ArtifactRef,
) -> VariantDescriptor {
    VariantDescriptor {
        id: format!("{FUNCTION_NAME_PREFIX}-{suffix}"),
        architecture,
        runtime,
        handler: handler.to_string(),
        environment: BTreeMap::from([(
            EXPERIMENT_TYPE_KEY.to_string(),
            experiment_type.to_string(),
        )]),
        log_retention: RetentionDays::OneMonth,
        artifact,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_catalog_covers_two_runtimes_on_two_architectures() {
        let variants = standard_variants();
        let ids: Vec<&str> = variants.iter().map(|variant| variant.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "PrimeNumbersCounter-X86-Python",
                "PrimeNumbersCounter-Graviton-Python",
                "PrimeNumbersCounter-X86-CSharp",
                "PrimeNumbersCounter-Graviton-CSharp",
            ]
        );
        assert!(variants
            .iter()
            .all(|variant| variant.log_retention == RetentionDays::OneMonth));
    }

    #[test]
    fn python_bundle_is_shared_and_csharp_bundles_are_per_architecture() {
        let variants = standard_variants();
        assert_eq!(variants[0].artifact, variants[1].artifact);
        assert_ne!(variants[2].artifact, variants[3].artifact);
        assert_eq!(variants[3].artifact.architecture, Some(Architecture::Arm64));
    }

    #[test]
    fn rust_variants_point_at_packaged_bootstrap_bundles() {
        let variants = rust_variants();
        assert_eq!(variants[0].artifact.path, "dist/prime_counter_x86_64.zip");
        assert_eq!(variants[1].artifact.path, "dist/prime_counter_arm64.zip");
        assert!(variants.iter().all(|variant| variant.handler == "bootstrap"));
        assert_eq!(catalog(true).len(), 6);
        assert_eq!(catalog(false).len(), 4);
    }
}
