// tests/recipes.rs

//! The recipes shipped in `recipes/` parse, validate and plan.

mod common;

use common::{FakeRunner, linux, recipes_dir};
use larder::deps::{DependencyEdge, DependencyProvider, ResolvedDependency};
use larder::export::{FlagSource, PackageInfo};
use larder::options::{EvalContext, OptionAssignment, OptionValue};
use larder::recipe::{parse_recipe_file, validate_recipe};
use larder::{CookRequest, Error, Kitchen, KitchenConfig, Recipe, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Satisfies every edge with an empty package folder
struct AnyProvider {
    root: PathBuf,
}

impl DependencyProvider for AnyProvider {
    fn resolve(&self, edge: &DependencyEdge) -> Result<ResolvedDependency> {
        let version = edge.reference.version.exact().unwrap_or("99.0");
        let folder = self.root.join(edge.name());
        fs::create_dir_all(&folder)?;

        let mut info = PackageInfo::bare(edge.name(), version);
        info.package_id = format!("{}-id", edge.name());
        info.options = OptionAssignment::from_values(
            edge.options
                .iter()
                .map(|o| {
                    let value = match o.value.to_ascii_lowercase().as_str() {
                        "true" => OptionValue::Bool(true),
                        "false" => OptionValue::Bool(false),
                        _ => OptionValue::Str(o.value.clone()),
                    };
                    (o.name.clone(), value)
                })
                .collect(),
        );
        Ok(ResolvedDependency::from_info(&folder, info))
    }
}

fn load(name: &str) -> Recipe {
    parse_recipe_file(&recipes_dir().join(format!("{}.toml", name))).unwrap()
}

fn kitchen(dir: &TempDir, env: &[(&str, &str)]) -> Kitchen {
    let env: BTreeMap<String, String> = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Kitchen::new(KitchenConfig::rooted(dir.path()))
        .with_runner(Box::new(FakeRunner::default()))
        .with_environment(Box::new(env))
        .with_provider(Box::new(AnyProvider {
            root: dir.path().join("deps"),
        }))
}

fn request(options: &[&str]) -> CookRequest {
    CookRequest {
        options: options.iter().map(|o| o.parse().unwrap()).collect(),
        settings: linux(),
        ..Default::default()
    }
}

#[test]
fn test_all_recipes_validate_and_plan() {
    let dir = TempDir::new().unwrap();
    let kitchen = kitchen(&dir, &[]);

    let mut seen = 0;
    for entry in fs::read_dir(recipes_dir()).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        let recipe = parse_recipe_file(&path).unwrap();
        let warnings = validate_recipe(&recipe)
            .unwrap_or_else(|e| panic!("{}: {}", path.display(), e));
        assert!(warnings.is_empty(), "{}: {:?}", path.display(), warnings);

        let plan = kitchen
            .plan(&recipe, &request(&[]))
            .unwrap_or_else(|e| panic!("{}: {}", path.display(), e));
        assert_eq!(plan.name, recipe.package.name);
        seen += 1;
    }
    assert!(seen >= 11);
}

#[test]
fn test_every_capability_appears_once() {
    let dir = TempDir::new().unwrap();
    let kitchen = kitchen(&dir, &[]);

    for name in ["openucx", "openucc", "openmpi", "upcxx", "rdma-core"] {
        let plan = kitchen.plan(&load(name), &request(&[])).unwrap();
        for cap in plan.capabilities.iter() {
            let flag = cap.flag();
            let count = plan.configure_args.iter().filter(|a| **a == flag).count();
            assert_eq!(count, 1, "{}: {}", name, flag);
        }
    }
}

#[test]
fn test_openucx_rdma_flags() {
    let dir = TempDir::new().unwrap();
    let kitchen = kitchen(&dir, &[]);
    let recipe = load("openucx");
    let rdma = dir.path().join("deps/rdma-core");

    let plan = kitchen.plan(&recipe, &request(&["rdma=True"])).unwrap();
    let args = &plan.configure_args;
    assert!(args.contains(&format!("--with-verbs={}", rdma.display())));
    assert!(args.contains(&format!("--with-mlx5={}", rdma.display())));
    assert!(args.contains(&"--with-rc=yes".to_string()));
    assert!(!args.contains(&"--with-verbs=no".to_string()));
    assert!(args.contains(&"--with-cuda=no".to_string()));
    assert!(args.contains(&"--enable-cma".to_string()));
    assert!(args.contains(&"--disable-doxygen-doc".to_string()));

    let plan = kitchen.plan(&recipe, &request(&[])).unwrap();
    let args = &plan.configure_args;
    assert!(plan.deps.is_empty());
    for cap in ["verbs", "rc", "ud", "dc", "ib-hw-tm", "dm", "devx", "mlx5"] {
        assert!(args.contains(&format!("--with-{}=no", cap)), "{}", cap);
    }
}

#[test]
fn test_cuda_requires_environment() {
    let dir = TempDir::new().unwrap();
    let recipe = load("openucc");

    let err = kitchen(&dir, &[]).plan(&recipe, &request(&["cuda=True"])).unwrap_err();
    assert!(matches!(err, Error::ConfigError(_)));
    assert!(err.to_string().contains("CUDA_HOME"));

    let with_env = kitchen(&dir, &[("CUDA_PATH", "/usr/local/cuda"), ("NVCC_GENCODE", "sm_90")]);
    let plan = with_env.plan(&recipe, &request(&["cuda=True"])).unwrap();
    assert!(plan.configure_args.contains(&"--with-cuda=/usr/local/cuda".to_string()));
    assert!(plan.configure_args.contains(&"--with-nvcc-gencode=sm_90".to_string()));

    // Propagated into the UCX requirement
    let ucx = plan.edges.iter().find(|e| e.name() == "openucx").unwrap();
    assert!(ucx.options.iter().any(|o| o.name == "cuda" && o.value == "True"));

    // Passthrough is ignored while cuda is off
    let plan = with_env.plan(&recipe, &request(&[])).unwrap();
    assert!(plan.configure_args.contains(&"--with-cuda=no".to_string()));
    assert!(!plan.configure_args.iter().any(|a| a.starts_with("--with-nvcc-gencode")));
}

#[test]
fn test_upcxx_option_flags() {
    let dir = TempDir::new().unwrap();
    let kitchen = kitchen(&dir, &[]);
    let recipe = load("upcxx");

    let plan = kitchen
        .plan(&recipe, &request(&["pmi-version=2", "udp=True", "shared=True"]))
        .unwrap();
    let args = &plan.configure_args;
    assert!(args.contains(&"--with-pmi-version=2".to_string()));
    assert!(args.contains(&"--enable-udp".to_string()));
    assert!(args.contains(&"--enable-smp".to_string()));
    assert!(args.contains(&"--disable-mpi".to_string()));
    assert!(args.ends_with(&["--disable-mpi-compat".to_string(), "--enable-single=opt".to_string()]));
    assert!(plan.options.is_removed("fPIC"));
    assert!(plan.command_line.contains(&"--enable-shared".to_string()));

    let err = kitchen.plan(&recipe, &request(&["pmi-version=3"])).unwrap_err();
    assert!(matches!(err, Error::ConfigError(_)));

    let plan = kitchen.plan(&recipe, &request(&["smp=False", "mpi=True"])).unwrap();
    assert!(plan.configure_args.contains(&"--disable-smp".to_string()));
    assert!(plan.configure_args.contains(&"--enable-mpi".to_string()));
}

fn exported_components(plan: &larder::recipe::BuildPlan, recipe: &Recipe) -> Vec<String> {
    let ctx = EvalContext {
        options: &plan.options,
        settings: &plan.settings,
        capabilities: Some(&plan.capabilities),
    };
    recipe.export.evaluate(&ctx).unwrap().components.into_keys().collect()
}

#[test]
fn test_upcxx_exports_enabled_backends() {
    let dir = TempDir::new().unwrap();
    let kitchen = kitchen(&dir, &[]);
    let recipe = load("upcxx");

    let plan = kitchen.plan(&recipe, &request(&[])).unwrap();
    assert_eq!(exported_components(&plan, &recipe), vec!["upcxx-smp-par", "upcxx-smp-seq"]);

    let plan = kitchen
        .plan(&recipe, &request(&["smp=False", "mpi=True", "ofi=True"]))
        .unwrap();
    assert_eq!(
        exported_components(&plan, &recipe),
        vec!["upcxx-mpi-par", "upcxx-mpi-seq", "upcxx-ofi-par", "upcxx-ofi-seq"]
    );

    // Every backend has its meta scripts rewritten and its flags read back
    for backend in ["udp", "mpi", "smp", "ucx", "ibv", "ofi"] {
        for mode in ["par", "seq"] {
            let dir = format!("upcxx.opt.gasnet_{}.{}/", mode, backend);
            let rules = recipe
                .packaging
                .replace
                .iter()
                .filter(|r| r.file.starts_with(&dir))
                .count();
            assert_eq!(rules, 2, "{}", dir);

            let name = format!("upcxx-{}-{}", backend, mode);
            let component = &recipe.export.components[&name];
            assert!(component.flags_from.is_some(), "{}", name);
            assert_eq!(
                component.properties["cmake_target_name"],
                format!("upcxx::{}-{}", backend, mode)
            );
        }
    }
}

#[test]
fn test_pmix_runtime_recipes() {
    let dir = TempDir::new().unwrap();
    let kitchen = kitchen(&dir, &[]);

    let recipe = load("openpmix");
    let plan = kitchen.plan(&recipe, &request(&[])).unwrap();
    let names: Vec<&str> = plan.deps.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["hwloc", "libevent", "zlib"]);
    assert!(plan.configure_args.contains(&"--with-pic".to_string()));
    assert!(matches!(
        recipe.export.root.flags_from,
        Some(FlagSource::PkgConfig { ref name, .. }) if name == "pmix"
    ));

    let plan = kitchen.plan(&recipe, &request(&["fPIC=False"])).unwrap();
    assert!(!plan.configure_args.contains(&"--with-pic".to_string()));

    let plan = kitchen.plan(&load("prrte"), &request(&[])).unwrap();
    assert!(plan.deps.contains_key("openpmix"));
    for flag in ["--with-pmix=yes", "--with-hwloc=yes", "--with-libevent=yes", "--with-slurm=no", "--with-libltdl=no"] {
        assert!(plan.configure_args.contains(&flag.to_string()), "{}", flag);
    }
}

#[test]
fn test_or_tools_cmake_flags() {
    let dir = TempDir::new().unwrap();
    let kitchen = kitchen(&dir, &[]);
    let plan = kitchen.plan(&load("or-tools"), &request(&[])).unwrap();
    assert_eq!(plan.version, "9.14");
    assert!(plan.configure_args.contains(&"-DBUILD_DEPS=ON".to_string()));
    assert!(plan.configure_args.contains(&"-DUSE_SCIP=OFF".to_string()));
    assert!(plan.command_line.contains(&"-DBUILD_SHARED_LIBS=OFF".to_string()));
}

#[test]
fn test_rdma_core_cmake_and_platforms() {
    let dir = TempDir::new().unwrap();
    let kitchen = kitchen(&dir, &[]);
    let recipe = load("rdma-core");

    let plan = kitchen.plan(&recipe, &request(&[])).unwrap();
    assert_eq!(plan.version, "61.0");
    assert!(plan.configure_args.contains(&"-DNO_PYVERBS=ON".to_string()));
    assert!(plan.configure_args.contains(&"-DIN_PLACE=OFF".to_string()));
    assert!(plan.command_line.contains(&"-DBUILD_SHARED_LIBS=ON".to_string()));

    let older = kitchen
        .plan(
            &recipe,
            &CookRequest {
                version: Some("57.0".to_string()),
                ..request(&[])
            },
        )
        .unwrap();
    assert_ne!(older.package_id, plan.package_id);

    let mut windows = request(&[]);
    windows.settings.apply("os=Windows").unwrap();
    assert!(kitchen.plan(&recipe, &windows).is_err());
}

#[test]
fn test_openmpi_propagates_options() {
    let dir = TempDir::new().unwrap();
    let kitchen = kitchen(&dir, &[]);
    let plan = kitchen.plan(&load("openmpi"), &request(&["rdma=True"])).unwrap();

    assert_eq!(plan.deps.len(), 8);
    for name in ["openucx", "openucc"] {
        let edge = plan.edges.iter().find(|e| e.name() == name).unwrap();
        assert!(edge.options.iter().any(|o| o.name == "rdma" && o.value == "True"));
    }
    let ucx = dir.path().join("deps/openucx");
    assert!(plan.configure_args.contains(&format!("--with-ucx={}", ucx.display())));
    assert!(plan.configure_args.contains(&"--with-pmix=external".to_string()));
    assert!(plan.configure_args.contains(&"--disable-oshmem".to_string()));

    let prrte = dir.path().join("deps/prrte");
    assert!(plan.configure_args.contains(&format!("--with-prrte={}", prrte.display())));
    for flag in [
        "--with-valgrind=no",
        "--disable-mpi-java",
        "--disable-mpi-fortran",
        "--disable-io-ompio",
        "--disable-io-romio",
        "--with-gpfs=no",
        "--with-lustre=no",
    ] {
        assert!(plan.configure_args.contains(&flag.to_string()), "{}", flag);
    }

    let shared = kitchen.plan(&load("openmpi"), &request(&["shared=True"])).unwrap();
    assert!(!shared.options.is_removed("fPIC"));
}
