//! Variant descriptors and the all-or-nothing deployment planner.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const PARAMETER_NAME: &str = "PrimeNumbersCounterLimit";
pub const DEFAULT_LIMIT: &str = "1000";
pub const MEMORY_SIZE_MB: u32 = 128;
pub const TIMEOUT_SECONDS: u32 = 30;
pub const SCHEDULE_EXPRESSION: &str = "rate(1 minute)";
pub const EXPERIMENT_TYPE_KEY: &str = "EXPERIMENT_TYPE";
pub const MAX_FUNCTION_NAME_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "arm64")]
    Arm64,
}

impl Architecture {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Arm64 => "arm64",
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Runtime {
    #[serde(rename = "python3.9")]
    Python39,
    #[serde(rename = "dotnet8")]
    Dotnet8,
    #[serde(rename = "provided.al2023")]
    ProvidedAl2023,
    #[serde(rename = "go1.x")]
    Go1x,
}

impl Runtime {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python39 => "python3.9",
            Self::Dotnet8 => "dotnet8",
            Self::ProvidedAl2023 => "provided.al2023",
            Self::Go1x => "go1.x",
        }
    }

    /// Whether the execution environment offers this runtime on `architecture`.
    pub fn supports(self, architecture: Architecture) -> bool {
        match self {
            Self::Go1x => architecture == Architecture::X86_64,
            Self::Python39 | Self::Dotnet8 | Self::ProvidedAl2023 => true,
        }
    }
}

impl std::fmt::Display for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionDays {
    OneWeek,
    TwoWeeks,
    OneMonth,
    ThreeMonths,
    OneYear,
}

impl RetentionDays {
    pub fn days(self) -> u32 {
        match self {
            Self::OneWeek => 7,
            Self::TwoWeeks => 14,
            Self::OneMonth => 30,
            Self::ThreeMonths => 90,
            Self::OneYear => 365,
        }
    }
}

/// Pointer to a packaged code bundle.
///
/// Bundles containing native code are pinned to the architecture they were
/// built for; portable bundles can back any architecture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<Architecture>,
}

impl ArtifactRef {
    pub fn portable(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            architecture: None,
        }
    }

    pub fn native(path: impl Into<String>, architecture: Architecture) -> Self {
        Self {
            path: path.into(),
            architecture: Some(architecture),
        }
    }

    /// Object key the bundle is uploaded under, unique per artifact path.
    ///
    /// A digest of the full path prefixes the file name, so paths that share
    /// a file name or differ only in separators never share a key.
    pub fn object_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.path);
        let digest = format!("{:x}", hasher.finalize());
        let file_name = self.path.rsplit('/').next().unwrap_or_default();

        format!("artifacts/{}/{file_name}", &digest[..16])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDescriptor {
    pub id: String,
    pub architecture: Architecture,
    pub runtime: Runtime,
    pub handler: String,
    pub environment: BTreeMap<String, String>,
    pub log_retention: RetentionDays,
    pub artifact: ArtifactRef,
}

impl VariantDescriptor {
    pub fn log_group_name(&self) -> String {
        log_group_name(&self.id)
    }
}

pub fn log_group_name(function_name: &str) -> String {
    format!("/aws/lambda/{function_name}")
}

pub trait ArtifactResolver {
    fn resolve(&self, artifact: &ArtifactRef) -> Result<(), String>;
}

/// Resolves artifact paths against a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsArtifactResolver {
    root: PathBuf,
}

impl FsArtifactResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactResolver for FsArtifactResolver {
    fn resolve(&self, artifact: &ArtifactRef) -> Result<(), String> {
        let candidate = self.root.join(&artifact.path);
        if candidate.is_file() {
            Ok(())
        } else {
            Err(format!("no file at '{}'", candidate.display()))
        }
    }
}

/// Treats every artifact as resolvable. Used when planning before packaging.
#[derive(Debug, Default, Clone, Copy)]
pub struct SkipArtifactCheck;

impl ArtifactResolver for SkipArtifactCheck {
    fn resolve(&self, _artifact: &ArtifactRef) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    EmptyIdentifier {
        index: usize,
    },
    InvalidIdentifier {
        id: String,
        reason: String,
    },
    DuplicateIdentifier {
        id: String,
    },
    UnsupportedRuntime {
        id: String,
        runtime: Runtime,
        architecture: Architecture,
    },
    UnresolvableArtifact {
        id: String,
        path: String,
        reason: String,
    },
    ArtifactArchitectureMismatch {
        id: String,
        path: String,
        artifact: Architecture,
        variant: Architecture,
    },
}

impl std::fmt::Display for PlanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyIdentifier { index } => {
                write!(f, "variant at position {index} has an empty identifier")
            }
            Self::InvalidIdentifier { id, reason } => {
                write!(f, "variant '{id}' has an invalid identifier: {reason}")
            }
            Self::DuplicateIdentifier { id } => {
                write!(f, "variant identifier '{id}' is used more than once")
            }
            Self::UnsupportedRuntime {
                id,
                runtime,
                architecture,
            } => write!(
                f,
                "variant '{id}' requests runtime {runtime} which is not available on {architecture}"
            ),
            Self::UnresolvableArtifact { id, path, reason } => {
                write!(f, "variant '{id}' artifact '{path}' cannot be resolved: {reason}")
            }
            Self::ArtifactArchitectureMismatch {
                id,
                path,
                artifact,
                variant,
            } => write!(
                f,
                "variant '{id}' targets {variant} but artifact '{path}' was built for {artifact}"
            ),
        }
    }
}

impl std::error::Error for PlanError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedParameter {
    pub name: String,
    pub default_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogGroupSpec {
    pub name: String,
    pub retention: RetentionDays,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub runtime: Runtime,
    pub architecture: Architecture,
    pub handler: String,
    pub artifact: ArtifactRef,
    pub memory_size_mb: u32,
    pub timeout_seconds: u32,
    pub environment: BTreeMap<String, String>,
    pub log_group: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Grant {
    LogWrite { log_group: String },
    ParameterRead { parameter: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTrigger {
    pub schedule_expression: String,
    pub target_function: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeUnitPlan {
    pub variant_id: String,
    pub log_group: LogGroupSpec,
    pub function: FunctionSpec,
    pub grants: Vec<Grant>,
    pub trigger: ScheduleTrigger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub parameter: SharedParameter,
    pub units: Vec<ComputeUnitPlan>,
}

/// One resource-creation command, borrowed from a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource<'a> {
    Parameter(&'a SharedParameter),
    LogGroup(&'a LogGroupSpec),
    Function(&'a FunctionSpec),
    Grant {
        function: &'a str,
        grant: &'a Grant,
    },
    Trigger(&'a ScheduleTrigger),
}

impl DeploymentPlan {
    pub fn compute_unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn log_group_count(&self) -> usize {
        self.units.len()
    }

    pub fn trigger_count(&self) -> usize {
        self.units.len()
    }

    pub fn parameter_count(&self) -> usize {
        1
    }

    /// Resources in creation order: the parameter first, then each unit's
    /// log group, function, grants and trigger.
    pub fn resources(&self) -> Vec<Resource<'_>> {
        let mut resources = Vec::with_capacity(1 + self.units.len() * 5);
        resources.push(Resource::Parameter(&self.parameter));
        for unit in &self.units {
            resources.push(Resource::LogGroup(&unit.log_group));
            resources.push(Resource::Function(&unit.function));
            for grant in &unit.grants {
                resources.push(Resource::Grant {
                    function: &unit.function.name,
                    grant,
                });
            }
            resources.push(Resource::Trigger(&unit.trigger));
        }
        resources
    }

    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(stable_plan_json(self));
        format!("{:x}", hasher.finalize())
    }
}

pub fn stable_plan_json(value: impl Serialize) -> String {
    serde_json::to_string(&value).expect("serialization of plan value should not fail")
}

/// Builds the deployment plan for `variants`, all or nothing.
///
/// Every descriptor is validated before any resource is planned, so an
/// error means no plan at all.
pub fn plan_deployment(
    variants: &[VariantDescriptor],
    resolver: &impl ArtifactResolver,
) -> Result<DeploymentPlan, PlanError> {
    validate_variants(variants, resolver)?;

    let parameter = SharedParameter {
        name: PARAMETER_NAME.to_string(),
        default_value: DEFAULT_LIMIT.to_string(),
    };

    let units = variants
        .iter()
        .map(|variant| plan_compute_unit(variant, &parameter))
        .collect();

    Ok(DeploymentPlan { parameter, units })
}

fn plan_compute_unit(variant: &VariantDescriptor, parameter: &SharedParameter) -> ComputeUnitPlan {
    let log_group = LogGroupSpec {
        name: variant.log_group_name(),
        retention: variant.log_retention,
    };

    let function = FunctionSpec {
        name: variant.id.clone(),
        runtime: variant.runtime,
        architecture: variant.architecture,
        handler: variant.handler.clone(),
        artifact: variant.artifact.clone(),
        memory_size_mb: MEMORY_SIZE_MB,
        timeout_seconds: TIMEOUT_SECONDS,
        environment: variant.environment.clone(),
        log_group: log_group.name.clone(),
    };

    let grants = vec![
        Grant::LogWrite {
            log_group: log_group.name.clone(),
        },
        Grant::ParameterRead {
            parameter: parameter.name.clone(),
        },
    ];

    let trigger = ScheduleTrigger {
        schedule_expression: SCHEDULE_EXPRESSION.to_string(),
        target_function: function.name.clone(),
    };

    ComputeUnitPlan {
        variant_id: variant.id.clone(),
        log_group,
        function,
        grants,
        trigger,
    }
}

fn validate_variants(
    variants: &[VariantDescriptor],
    resolver: &impl ArtifactResolver,
) -> Result<(), PlanError> {
    let mut seen = HashSet::with_capacity(variants.len());

    for (index, variant) in variants.iter().enumerate() {
        validate_identifier(index, &variant.id)?;

        if !seen.insert(variant.id.as_str()) {
            return Err(PlanError::DuplicateIdentifier {
                id: variant.id.clone(),
            });
        }

        if !variant.runtime.supports(variant.architecture) {
            return Err(PlanError::UnsupportedRuntime {
                id: variant.id.clone(),
                runtime: variant.runtime,
                architecture: variant.architecture,
            });
        }

        if let Some(artifact_architecture) = variant.artifact.architecture {
            if artifact_architecture != variant.architecture {
                return Err(PlanError::ArtifactArchitectureMismatch {
                    id: variant.id.clone(),
                    path: variant.artifact.path.clone(),
                    artifact: artifact_architecture,
                    variant: variant.architecture,
                });
            }
        }

        resolver
            .resolve(&variant.artifact)
            .map_err(|reason| PlanError::UnresolvableArtifact {
                id: variant.id.clone(),
                path: variant.artifact.path.clone(),
                reason,
            })?;
    }

    Ok(())
}

fn validate_identifier(index: usize, id: &str) -> Result<(), PlanError> {
    if id.trim().is_empty() {
        return Err(PlanError::EmptyIdentifier { index });
    }

    if id.len() > MAX_FUNCTION_NAME_LEN {
        return Err(PlanError::InvalidIdentifier {
            id: id.to_string(),
            reason: format!("longer than {MAX_FUNCTION_NAME_LEN} characters"),
        });
    }

    if let Some(invalid) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(PlanError::InvalidIdentifier {
            id: id.to_string(),
            reason: format!("character '{invalid}' is not allowed"),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MissingArtifacts {
        missing: &'static str,
    }

    impl ArtifactResolver for MissingArtifacts {
        fn resolve(&self, artifact: &ArtifactRef) -> Result<(), String> {
            if artifact.path == self.missing {
                Err("not packaged".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn variant(id: &str, runtime: Runtime, architecture: Architecture) -> VariantDescriptor {
        VariantDescriptor {
            id: id.to_string(),
            architecture,
            runtime,
            handler: "index.handler".to_string(),
            environment: BTreeMap::from([(EXPERIMENT_TYPE_KEY.to_string(), id.to_uppercase())]),
            log_retention: RetentionDays::OneMonth,
            artifact: ArtifactRef::portable("Python/package.zip"),
        }
    }

    #[test]
    fn plans_one_unit_per_variant_in_order() {
        let variants = vec![
            variant("alpha", Runtime::Python39, Architecture::X86_64),
            variant("beta", Runtime::Python39, Architecture::Arm64),
        ];

        let plan = plan_deployment(&variants, &SkipArtifactCheck).expect("plan should pass");
        let ids: Vec<&str> = plan.units.iter().map(|unit| unit.variant_id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
        assert_eq!(plan.parameter.name, PARAMETER_NAME);
        assert_eq!(plan.parameter.default_value, DEFAULT_LIMIT);
    }

    #[test]
    fn wires_each_unit_to_its_log_group_parameter_and_trigger() {
        let plan = plan_deployment(
            &[variant("alpha", Runtime::Dotnet8, Architecture::Arm64)],
            &SkipArtifactCheck,
        )
        .expect("plan should pass");

        let unit = &plan.units[0];
        assert_eq!(unit.log_group.name, "/aws/lambda/alpha");
        assert_eq!(unit.log_group.retention.days(), 30);
        assert_eq!(unit.function.log_group, unit.log_group.name);
        assert_eq!(unit.function.memory_size_mb, 128);
        assert_eq!(unit.function.timeout_seconds, 30);
        assert_eq!(
            unit.function.environment.get(EXPERIMENT_TYPE_KEY).map(String::as_str),
            Some("ALPHA")
        );
        assert_eq!(
            unit.grants,
            vec![
                Grant::LogWrite {
                    log_group: "/aws/lambda/alpha".to_string()
                },
                Grant::ParameterRead {
                    parameter: PARAMETER_NAME.to_string()
                },
            ]
        );
        assert_eq!(unit.trigger.schedule_expression, "rate(1 minute)");
        assert_eq!(unit.trigger.target_function, "alpha");
    }

    #[test]
    fn resources_start_with_the_single_parameter() {
        let variants = vec![
            variant("alpha", Runtime::Python39, Architecture::X86_64),
            variant("beta", Runtime::Python39, Architecture::Arm64),
        ];
        let plan = plan_deployment(&variants, &SkipArtifactCheck).expect("plan should pass");
        let resources = plan.resources();

        assert!(matches!(resources[0], Resource::Parameter(_)));
        let parameters = resources
            .iter()
            .filter(|resource| matches!(resource, Resource::Parameter(_)))
            .count();
        assert_eq!(parameters, 1);
        assert_eq!(resources.len(), 1 + 2 * 5);
    }

    #[test]
    fn rejects_duplicate_identifiers() {
        let variants = vec![
            variant("alpha", Runtime::Python39, Architecture::X86_64),
            variant("alpha", Runtime::Python39, Architecture::Arm64),
        ];

        let error = plan_deployment(&variants, &SkipArtifactCheck).expect_err("plan should fail");
        assert_eq!(
            error,
            PlanError::DuplicateIdentifier {
                id: "alpha".to_string()
            }
        );
    }

    #[test]
    fn rejects_runtime_unavailable_on_architecture() {
        let variants = vec![
            variant("alpha", Runtime::Python39, Architecture::X86_64),
            variant("legacy-go", Runtime::Go1x, Architecture::Arm64),
        ];

        let error = plan_deployment(&variants, &SkipArtifactCheck).expect_err("plan should fail");
        assert!(matches!(error, PlanError::UnsupportedRuntime { ref id, .. } if id == "legacy-go"));
        assert_eq!(
            error.to_string(),
            "variant 'legacy-go' requests runtime go1.x which is not available on arm64"
        );
    }

    #[test]
    fn accepts_legacy_runtime_on_supported_architecture() {
        let variants = vec![variant("legacy-go", Runtime::Go1x, Architecture::X86_64)];
        assert!(plan_deployment(&variants, &SkipArtifactCheck).is_ok());
    }

    #[test]
    fn rejects_unresolvable_artifacts() {
        let mut native = variant("native", Runtime::Dotnet8, Architecture::X86_64);
        native.artifact = ArtifactRef::native("CSharp/package_x86.zip", Architecture::X86_64);

        let error = plan_deployment(
            &[native],
            &MissingArtifacts {
                missing: "CSharp/package_x86.zip",
            },
        )
        .expect_err("plan should fail");

        assert_eq!(
            error,
            PlanError::UnresolvableArtifact {
                id: "native".to_string(),
                path: "CSharp/package_x86.zip".to_string(),
                reason: "not packaged".to_string(),
            }
        );
    }

    #[test]
    fn rejects_artifact_built_for_another_architecture() {
        let mut native = variant("native", Runtime::Dotnet8, Architecture::Arm64);
        native.artifact = ArtifactRef::native("CSharp/package_x86.zip", Architecture::X86_64);

        let error = plan_deployment(&[native], &SkipArtifactCheck).expect_err("plan should fail");
        assert!(matches!(
            error,
            PlanError::ArtifactArchitectureMismatch {
                artifact: Architecture::X86_64,
                variant: Architecture::Arm64,
                ..
            }
        ));
    }

    #[test]
    fn rejects_empty_and_malformed_identifiers() {
        let empty = variant(" ", Runtime::Python39, Architecture::X86_64);
        assert_eq!(
            plan_deployment(&[empty], &SkipArtifactCheck),
            Err(PlanError::EmptyIdentifier { index: 0 })
        );

        let spaced = variant("has space", Runtime::Python39, Architecture::X86_64);
        assert!(matches!(
            plan_deployment(&[spaced], &SkipArtifactCheck),
            Err(PlanError::InvalidIdentifier { .. })
        ));

        let long = variant(&"x".repeat(65), Runtime::Python39, Architecture::X86_64);
        assert!(matches!(
            plan_deployment(&[long], &SkipArtifactCheck),
            Err(PlanError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn object_keys_are_distinct_per_artifact_path() {
        let nested = ArtifactRef::portable("Python/package.zip").object_key();
        let flat = ArtifactRef::portable("Python-package.zip").object_key();
        let rooted = ArtifactRef::portable("/Python/package.zip").object_key();

        assert_ne!(nested, flat);
        assert_ne!(nested, rooted);
        assert!(nested.starts_with("artifacts/"));
        assert!(nested.ends_with("/package.zip"));
        assert!(flat.ends_with("/Python-package.zip"));
        assert_eq!(
            nested,
            ArtifactRef::native("Python/package.zip", Architecture::X86_64).object_key()
        );
    }

    #[test]
    fn fs_resolver_requires_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        std::fs::create_dir_all(dir.path().join("Python")).expect("dir should be created");
        std::fs::write(dir.path().join("Python/package.zip"), b"PK").expect("file should write");

        let resolver = FsArtifactResolver::new(dir.path());
        assert!(resolver
            .resolve(&ArtifactRef::portable("Python/package.zip"))
            .is_ok());
        assert!(resolver
            .resolve(&ArtifactRef::portable("CSharp/package_x86.zip"))
            .is_err());
        assert!(resolver.resolve(&ArtifactRef::portable("Python")).is_err());
    }
}
