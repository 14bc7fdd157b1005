// src/deps/pkgconfig.rs

//! pkg-config generator for resolved dependencies
//!
//! Autotools configure scripts find dependencies through pkg-config. Each
//! package's own `.pc` files are renamed aside at packaging time, so the
//! build gets freshly generated ones that point at the resolved folders.
//! Packages whose own `.pc` file is the authority on their flags are read
//! back with [`PcFile`].

use super::{DependencyMap, ResolvedDependency};
use crate::error::{Error, Result};
use crate::export::{COMPONENT_SEP, CppInfo};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the `.pc` file for a package or one of its components
pub fn pc_name(dep: &ResolvedDependency, component: Option<&str>) -> String {
    match component {
        None => dep
            .info
            .cpp_info
            .properties
            .get("pkg_config_name")
            .cloned()
            .unwrap_or_else(|| dep.name.clone()),
        Some(c) => dep
            .info
            .component(c)
            .and_then(|info| info.properties.get("pkg_config_name"))
            .cloned()
            .unwrap_or_else(|| format!("{}-{}", dep.name, c)),
    }
}

/// Translate a `requires` entry into the pc name it refers to
fn required_pc(dep: &ResolvedDependency, req: &str, deps: &DependencyMap) -> String {
    match req.split_once(COMPONENT_SEP) {
        Some((other, comp)) => match deps.get(other) {
            Some(o) if o.info.component(comp).is_some() => pc_name(o, Some(comp)),
            Some(o) => pc_name(o, None),
            None => other.to_string(),
        },
        None if dep.info.component(req).is_some() => pc_name(dep, Some(req)),
        None => deps
            .get(req)
            .map(|o| pc_name(o, None))
            .unwrap_or_else(|| req.to_string()),
    }
}

fn render(
    dep: &ResolvedDependency,
    name: &str,
    info: &CppInfo,
    requires: &[String],
    description: &str,
) -> String {
    let prefix = dep.folder.display().to_string();
    let mut out = format!("prefix={}\n", prefix);

    let mut libs_flags = Vec::new();
    for (i, dir) in info.libdirs.iter().enumerate() {
        out.push_str(&format!("libdir{}=${{prefix}}/{}\n", suffix(i), dir));
        libs_flags.push(format!("-L${{libdir{}}}", suffix(i)));
    }
    let mut cflags = Vec::new();
    for (i, dir) in info.includedirs.iter().enumerate() {
        out.push_str(&format!("includedir{}=${{prefix}}/{}\n", suffix(i), dir));
        cflags.push(format!("-I${{includedir{}}}", suffix(i)));
    }
    libs_flags.extend(info.libs.iter().map(|l| format!("-l{}", l)));
    libs_flags.extend(info.system_libs.iter().map(|l| format!("-l{}", l)));
    cflags.extend(info.defines.iter().map(|d| format!("-D{}", d)));

    out.push('\n');
    out.push_str(&format!("Name: {}\n", name));
    out.push_str(&format!("Description: {}\n", description));
    out.push_str(&format!("Version: {}\n", dep.version));
    out.push_str(&format!("Libs: {}\n", libs_flags.join(" ")));
    out.push_str(&format!("Cflags: {}\n", cflags.join(" ")));
    if !requires.is_empty() {
        out.push_str(&format!("Requires: {}\n", requires.join(" ")));
    }
    out
}

fn suffix(i: usize) -> String {
    if i == 0 { String::new() } else { i.to_string() }
}

/// Write `.pc` files for every dependency and component into `out_dir`
pub fn generate(deps: &DependencyMap, out_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)?;
    let mut written = Vec::new();

    for dep in deps.values() {
        let description = format!("{} (larder package {})", dep.name, dep.package_id);

        if dep.info.components.is_empty() {
            let requires: Vec<String> = dep
                .info
                .cpp_info
                .requires
                .iter()
                .map(|r| required_pc(dep, r, deps))
                .collect();
            let name = pc_name(dep, None);
            let content = render(dep, &name, &dep.info.cpp_info, &requires, &description);
            written.push(write_pc(out_dir, &name, &content)?);
            continue;
        }

        for (comp, info) in &dep.info.components {
            let requires: Vec<String> = info
                .requires
                .iter()
                .map(|r| required_pc(dep, r, deps))
                .collect();
            let name = pc_name(dep, Some(comp));
            let content = render(dep, &name, info, &requires, &description);
            written.push(write_pc(out_dir, &name, &content)?);
        }

        // Aggregate file for the whole package
        let name = pc_name(dep, None);
        if !dep.info.components.contains_key(&name) {
            let requires: Vec<String> = dep
                .info
                .components
                .keys()
                .map(|c| pc_name(dep, Some(c)))
                .filter(|n| n != &name)
                .collect();
            let empty = CppInfo {
                includedirs: Vec::new(),
                libdirs: Vec::new(),
                bindirs: Vec::new(),
                ..Default::default()
            };
            let content = render(dep, &name, &empty, &requires, &description);
            written.push(write_pc(out_dir, &name, &content)?);
        }
    }

    Ok(written)
}

fn write_pc(out_dir: &Path, name: &str, content: &str) -> Result<PathBuf> {
    let path = out_dir.join(format!("{}.pc", name));
    fs::write(&path, content)?;
    debug!("Generated {}", path.display());
    Ok(path)
}

/// An installed `.pc` file with its variables expanded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PcFile {
    pub variables: BTreeMap<String, String>,
    pub fields: BTreeMap<String, String>,
}

impl PcFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::PackageError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse `name=value` variables and `Key: value` fields
    ///
    /// Whichever of `=` and `:` comes first decides what a line is.
    /// Variables may only refer to variables defined above them.
    pub fn parse(content: &str) -> Result<Self> {
        let mut pc = PcFile::default();

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let eq = line.find('=');
            let colon = line.find(':');
            match (eq, colon) {
                (Some(e), c) if c.is_none_or(|c| e < c) => {
                    let value = pc.expand(line[e + 1..].trim())?;
                    pc.variables.insert(line[..e].trim().to_string(), value);
                }
                (_, Some(c)) => {
                    let value = pc.expand(line[c + 1..].trim())?;
                    pc.fields.insert(line[..c].trim().to_string(), value);
                }
                _ => debug!("Ignoring pkg-config line '{}'", line),
            }
        }

        Ok(pc)
    }

    fn expand(&self, value: &str) -> Result<String> {
        let mut out = String::new();
        let mut rest = value;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let tail = &rest[start + 2..];
            let end = tail.find('}').ok_or_else(|| {
                Error::PackageError(format!("Unterminated variable in '{}'", value))
            })?;
            let name = &tail[..end];
            let var = self.variables.get(name).ok_or_else(|| {
                Error::PackageError(format!("Undefined pkg-config variable '{}'", name))
            })?;
            out.push_str(var);
            rest = &tail[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Whitespace-split value of a field, empty when absent
    pub fn flags(&self, field: &str) -> Vec<String> {
        self.fields
            .get(field)
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::PackageInfo;
    use tempfile::TempDir;

    fn resolved(info: PackageInfo, folder: &str) -> ResolvedDependency {
        ResolvedDependency::from_info(Path::new(folder), info)
    }

    #[test]
    fn test_generate_plain_package() {
        let out = TempDir::new().unwrap();
        let mut info = PackageInfo::bare("munge", "0.5.15");
        info.cpp_info.libs = vec!["munge".into()];
        info.cpp_info.system_libs = vec!["pthread".into()];

        let mut deps = DependencyMap::new();
        deps.insert("munge".into(), resolved(info, "/opt/munge"));

        let files = generate(&deps, out.path()).unwrap();
        assert_eq!(files, vec![out.path().join("munge.pc")]);

        let pc = fs::read_to_string(&files[0]).unwrap();
        assert!(pc.starts_with("prefix=/opt/munge\n"));
        assert!(pc.contains("libdir=${prefix}/lib"));
        assert!(pc.contains("Libs: -L${libdir} -lmunge -lpthread"));
        assert!(pc.contains("Cflags: -I${includedir}"));
        assert!(pc.contains("Version: 0.5.15"));
        assert!(!pc.contains("Requires:"));
    }

    #[test]
    fn test_generate_components() {
        let out = TempDir::new().unwrap();

        let mut rdma = PackageInfo::bare("rdma-core", "61.0");
        let mut verbs = CppInfo::default();
        verbs.libs = vec!["ibverbs".into()];
        verbs.properties.insert("pkg_config_name".into(), "libibverbs".into());
        rdma.components.insert("libibverbs".into(), verbs);

        let mut ucx = PackageInfo::bare("openucx", "1.17.0");
        let mut ucs = CppInfo::default();
        ucs.libs = vec!["ucs".into()];
        let mut uct = CppInfo::default();
        uct.libs = vec!["uct".into()];
        uct.requires = vec!["ucs".into(), "rdma-core::libibverbs".into()];
        ucx.components.insert("ucs".into(), ucs);
        ucx.components.insert("uct".into(), uct);

        let mut deps = DependencyMap::new();
        deps.insert("rdma-core".into(), resolved(rdma, "/opt/rdma"));
        deps.insert("openucx".into(), resolved(ucx, "/opt/ucx"));

        let files = generate(&deps, out.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&"libibverbs.pc".to_string()));
        assert!(names.contains(&"openucx-uct.pc".to_string()));
        assert!(names.contains(&"openucx.pc".to_string()));

        let uct = fs::read_to_string(out.path().join("openucx-uct.pc")).unwrap();
        assert!(uct.contains("Requires: openucx-ucs libibverbs"));

        let aggregate = fs::read_to_string(out.path().join("openucx.pc")).unwrap();
        assert!(aggregate.contains("Requires: openucx-ucs openucx-uct"));
    }

    #[test]
    fn test_parse_installed_pc() {
        let pc = PcFile::parse(
            r#"# pmix installed file
prefix=/opt/pmix
exec_prefix=${prefix}
libdir=${exec_prefix}/lib
includedir=${prefix}/include

Name: pmix
Description: Process Management Interface for Exascale
Version: 5.0.3
Libs: -L${libdir} -lpmix
Libs.private: -lm -levent_core
Cflags: -I${includedir} -DPMIX_QUIET
"#,
        )
        .unwrap();

        assert_eq!(pc.variables["libdir"], "/opt/pmix/lib");
        assert_eq!(pc.fields["Version"], "5.0.3");
        assert_eq!(pc.flags("Libs"), vec!["-L/opt/pmix/lib", "-lpmix"]);
        assert_eq!(pc.flags("Cflags"), vec!["-I/opt/pmix/include", "-DPMIX_QUIET"]);
        assert!(pc.flags("Requires").is_empty());
    }

    #[test]
    fn test_parse_rejects_undefined_variable() {
        let err = PcFile::parse("Libs: -L${libdir}\n").unwrap_err();
        assert!(matches!(err, Error::PackageError(_)));
    }
}
