use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{exit, Command, ExitStatus};

use clap::{Args, Parser, Subcommand, ValueEnum};
use prime_bench_core::catalog::{catalog, rust_artifact_path};
use prime_bench_core::deployment::{
    plan_deployment, Architecture, DeploymentPlan, FsArtifactResolver, SkipArtifactCheck,
};
use prime_bench_core::template::{count_resources_of_type, render_template};
use serde_json::json;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the prime counter benchmark workspace",
    long_about = "A unified CLI for planning and synthesizing the benchmark deployment,\n\
                  packaging the Rust handler, running benchmarks, and CI checks."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the deployment plan for the variant catalog as JSON
    Plan(PlanArgs),
    /// Write the CloudFormation template for the variant catalog
    Synth {
        #[command(flatten)]
        plan: PlanArgs,
        /// Output file path
        #[arg(long, default_value = "target/prime_bench/template.json")]
        output: PathBuf,
    },
    /// Build and zip the Rust handler as a `provided.al2023` bootstrap bundle
    Package {
        /// Architecture(s) to package
        #[arg(value_enum, long, default_value_t = PackageArch::All)]
        arch: PackageArch,
        /// Build profile used for binaries
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
    },
    /// Run Criterion benchmarks for the counting workload
    Bench,
    /// Run CI checks (fmt, clippy, tests, benchmarks)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
}

#[derive(Args)]
struct PlanArgs {
    /// Directory that artifact paths are resolved against
    #[arg(long, env = "PRIME_BENCH_ARTIFACT_ROOT", default_value = ".")]
    artifact_root: PathBuf,
    /// Add the Rust variants to the standard catalog
    #[arg(long)]
    include_rust: bool,
    /// Plan without checking that artifacts exist
    #[arg(long)]
    skip_artifact_check: bool,
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Run benchmarks
    Bench,
    /// Run check + bench
    All,
}

#[derive(Clone, Copy, ValueEnum)]
enum PackageArch {
    #[value(name = "x86-64")]
    X86_64,
    Arm64,
    All,
}

impl PackageArch {
    fn architectures(self) -> Vec<Architecture> {
        match self {
            Self::X86_64 => vec![Architecture::X86_64],
            Self::Arm64 => vec![Architecture::Arm64],
            Self::All => vec![Architecture::X86_64, Architecture::Arm64],
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    fn as_cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

const LAMBDA_PACKAGE: &str = "prime_bench_lambda";
const LAMBDA_BINARY: &str = "prime_counter";

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    cargo_with_env(args, &[])
}

fn cargo_with_env(args: &[&str], envs: &[(String, String)]) -> ExitStatus {
    let assignments: Vec<String> = envs
        .iter()
        .map(|(key, value)| format!("{key}={value} "))
        .collect();
    eprintln!("+ {}cargo {}", assignments.concat(), args.join(" "));
    Command::new("cargo")
        .args(args)
        .envs(envs.iter().map(|(key, value)| (key.as_str(), value.as_str())))
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    run_cargo_with_env(args, &[]);
}

fn run_cargo_with_env(args: &[&str], envs: &[(String, String)]) {
    let status = cargo_with_env(args, envs);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn lambda_target(architecture: Architecture) -> &'static str {
    match architecture {
        Architecture::X86_64 => "x86_64-unknown-linux-gnu",
        Architecture::Arm64 => "aarch64-unknown-linux-gnu",
    }
}

// ── deployment ─────────────────────────────────────────────────────

fn build_plan(args: &PlanArgs) -> DeploymentPlan {
    let variants = catalog(args.include_rust);
    let result = if args.skip_artifact_check {
        plan_deployment(&variants, &SkipArtifactCheck)
    } else {
        plan_deployment(&variants, &FsArtifactResolver::new(&args.artifact_root))
    };

    match result {
        Ok(plan) => plan,
        Err(error) => {
            eprintln!("error: deployment plan rejected: {error}");
            if !args.skip_artifact_check {
                eprintln!(
                    "hint: artifacts are resolved under '{}'; package them or pass --skip-artifact-check",
                    args.artifact_root.display()
                );
            }
            exit(1);
        }
    }
}

fn print_plan(args: &PlanArgs) {
    let plan = build_plan(args);
    let units: Vec<_> = plan
        .units
        .iter()
        .map(|unit| {
            json!({
                "function_name": unit.function.name,
                "runtime": unit.function.runtime,
                "architecture": unit.function.architecture,
                "handler": unit.function.handler,
                "artifact": unit.function.artifact.path,
                "log_group": unit.log_group.name,
                "schedule": unit.trigger.schedule_expression,
            })
        })
        .collect();

    let summary = json!({
        "fingerprint": plan.fingerprint(),
        "parameter": plan.parameter,
        "compute_units": plan.compute_unit_count(),
        "log_groups": plan.log_group_count(),
        "triggers": plan.trigger_count(),
        "parameters": plan.parameter_count(),
        "units": units,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).expect("plan summary should serialize")
    );
}

fn synth_template(args: &PlanArgs, output: &Path) {
    let plan = build_plan(args);
    let template = match render_template(&plan) {
        Ok(template) => template,
        Err(error) => {
            eprintln!("error: template rejected: {error}");
            exit(1);
        }
    };

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).expect("failed to create template output directory");
    }
    let body = serde_json::to_string_pretty(&template).expect("template should serialize");
    fs::write(output, body).expect("failed to write template");

    eprintln!(
        "\nWrote {} ({} functions, {} schedule rules, plan {})",
        output.display(),
        count_resources_of_type(&template, "AWS::Lambda::Function"),
        count_resources_of_type(&template, "AWS::Events::Rule"),
        &plan.fingerprint()[..12],
    );
}

// ── packaging ──────────────────────────────────────────────────────

fn package_lambdas(arch: PackageArch, profile: BuildProfile) {
    let mut packaged = Vec::new();
    for architecture in arch.architectures() {
        packaged.push(package_lambda(architecture, profile));
    }

    eprintln!("\nPackaged artifacts:");
    for path in packaged {
        eprintln!("- {}", path.display());
    }
}

fn package_lambda(architecture: Architecture, profile: BuildProfile) -> PathBuf {
    let target = lambda_target(architecture);
    ensure_rust_target_installed(target);
    let linker_env: Vec<(String, String)> = ensure_c_linker_available(target)
        .map(|linker| (linker_env_key(target), linker))
        .into_iter()
        .collect();

    step(&format!("Build {LAMBDA_BINARY} for {architecture}"));

    let mut cargo_args = vec![
        "build",
        "-p",
        LAMBDA_PACKAGE,
        "--target",
        target,
        "--bin",
        LAMBDA_BINARY,
    ];
    if let Some(flag) = profile.as_cargo_flag() {
        cargo_args.push(flag);
    }
    run_cargo_with_env(&cargo_args, &linker_env);

    step(&format!("Package {architecture} bootstrap zip"));
    let target_dir = Path::new("target").join(target).join(profile.dir_name());
    let zip_path = PathBuf::from(rust_artifact_path(architecture));
    if let Some(dist_dir) = zip_path.parent() {
        fs::create_dir_all(dist_dir).expect("failed to create lambda dist directory");
    }

    package_lambda_zip(&target_dir.join(LAMBDA_BINARY), &zip_path);
    zip_path
}

fn ensure_rust_target_installed(target: &str) {
    let output = Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output();

    let output = match output {
        Ok(value) => value,
        Err(error) => {
            eprintln!(
                "warning: failed to run `rustup target list --installed` ({error}); continuing without target preflight"
            );
            return;
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "failed to list installed rust targets; run `rustup target list --installed` manually. details: {}",
            stderr.trim()
        );
    }

    let installed = String::from_utf8_lossy(&output.stdout);
    if !installed.lines().any(|line| line.trim() == target) {
        panic!(
            "required rust target `{target}` is not installed. install it with `rustup target add {target}` and re-run `cargo run -p xtask -- package`"
        );
    }
}

fn host_triple_prefix() -> &'static str {
    if cfg!(target_arch = "aarch64") {
        "aarch64"
    } else {
        "x86_64"
    }
}

/// Cargo's per-target linker variable, e.g. `CARGO_TARGET_AARCH64_UNKNOWN_LINUX_GNU_LINKER`.
fn linker_env_key(target: &str) -> String {
    format!("CARGO_TARGET_{}_LINKER", target.replace('-', "_").to_uppercase())
}

/// Resolves the cross linker cargo must use for `target`, or `None` when
/// building natively.
fn ensure_c_linker_available(target: &str) -> Option<String> {
    let cross_compiling = !target.starts_with(host_triple_prefix()) || cfg!(not(target_os = "linux"));
    match select_c_linker(
        target,
        cross_compiling,
        |key| std::env::var(key).ok(),
        tool_works,
    ) {
        Ok(linker) => linker,
        Err(message) => panic!("{message}"),
    }
}

fn select_c_linker(
    target: &str,
    cross_compiling: bool,
    lookup: impl Fn(&str) -> Option<String>,
    works: impl Fn(&str) -> bool,
) -> Result<Option<String>, String> {
    if !cross_compiling {
        return Ok(None);
    }

    let env_override_keys = [
        linker_env_key(target),
        format!("CC_{}", target.replace('-', "_")),
        format!("CC_{target}"),
        "TARGET_CC".to_string(),
    ];

    for key in env_override_keys {
        if let Some(value) = lookup(&key) {
            let candidate = value.trim();
            if candidate.is_empty() {
                continue;
            }
            if works(candidate) {
                return Ok(Some(candidate.to_string()));
            }
        }
    }

    let canonical = match target {
        "aarch64-unknown-linux-gnu" => "aarch64-linux-gnu-gcc",
        _ => "x86_64-linux-gnu-gcc",
    };
    if works(canonical) {
        return Ok(Some(canonical.to_string()));
    }

    Err(format!(
        "missing C cross-linker for target `{target}`. install `{canonical}` (or set {}) before running `cargo run -p xtask -- package`.",
        linker_env_key(target)
    ))
}

fn tool_works(program: &str) -> bool {
    let mut parts = program.split_whitespace();
    let Some(bin) = parts.next() else {
        return false;
    };
    let args: Vec<&str> = parts.collect();

    Command::new(bin)
        .args(&args)
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn package_lambda_zip(binary_path: &Path, zip_path: &Path) {
    if !binary_path.exists() {
        panic!("expected lambda binary at '{}'", binary_path.display());
    }

    let binary = fs::read(binary_path).expect("failed to read lambda binary");
    let file = fs::File::create(zip_path).expect("failed to create lambda zip");
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    zip.start_file("bootstrap", options)
        .expect("failed to start bootstrap entry in lambda zip");
    zip.write_all(&binary)
        .expect("failed to write bootstrap entry");
    zip.finish().expect("failed to finish lambda zip");
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test prime_bench_core");
    run_cargo(&["test", "-p", "prime_bench_core"]);

    step("Test prime_bench_lambda");
    run_cargo(&["test", "-p", LAMBDA_PACKAGE]);
}

fn ci_bench() {
    step("Run benchmarks");
    run_cargo(&["bench", "--package", "prime_bench_core", "--bench", "prime_count"]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Plan(args) => print_plan(&args),
        Commands::Synth { plan, output } => synth_template(&plan, &output),
        Commands::Package { arch, profile } => package_lambdas(arch, profile),
        Commands::Bench => ci_bench(),
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Bench => ci_bench(),
                CiJob::All => {
                    ci_check();
                    ci_bench();
                }
            }
            eprintln!("\nCI job passed.");
        }
    }
}
