// src/recipe/parser.rs

//! Recipe file parsing and validation

use crate::error::{Error, Result};
use crate::hash::{HashAlgorithm, hash_bytes};
use crate::options::{Condition, OptionSchema};
use crate::recipe::format::Recipe;
use std::collections::BTreeSet;
use std::path::Path;

/// Parse a recipe from a TOML string
pub fn parse_recipe(content: &str) -> Result<Recipe> {
    let mut recipe: Recipe =
        toml::from_str(content).map_err(|e| Error::ParseError(format!("Invalid recipe: {}", e)))?;
    recipe.recipe_hash = hash_bytes(HashAlgorithm::Sha256, content.as_bytes());
    Ok(recipe)
}

/// Parse a recipe from a file
pub fn parse_recipe_file(path: &Path) -> Result<Recipe> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::IoError(format!("Failed to read recipe file {}: {}", path.display(), e))
    })?;

    let mut recipe = parse_recipe(&content)?;
    recipe.base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    Ok(recipe)
}

/// Check the option and capability names a condition refers to
///
/// `capabilities` is `None` where capabilities are not resolved yet.
fn check_refs(
    cond: &Condition,
    schema: &OptionSchema,
    capabilities: Option<&BTreeSet<String>>,
    what: &str,
) -> Result<()> {
    for opt in cond.referenced_options() {
        if !schema.contains(opt) {
            return Err(Error::ParseError(format!(
                "Condition '{}' of {} references undeclared option '{}'",
                cond, what, opt
            )));
        }
    }
    for cap in cond.referenced_capabilities() {
        match capabilities {
            None => {
                return Err(Error::ParseError(format!(
                    "Condition '{}' of {} cannot test capability '{}'",
                    cond, what, cap
                )));
            }
            Some(declared) if !declared.contains(cap) => {
                return Err(Error::ParseError(format!(
                    "Condition '{}' of {} references undeclared capability '{}'",
                    cond, what, cap
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Validate a recipe for completeness and correctness
///
/// Errors make the recipe unusable for any configuration; warnings are
/// returned for the caller to print.
pub fn validate_recipe(recipe: &Recipe) -> Result<Vec<String>> {
    let mut warnings = Vec::new();

    if recipe.package.name.is_empty() {
        return Err(Error::ParseError("Recipe package name cannot be empty".to_string()));
    }

    if recipe.sources.is_empty() {
        return Err(Error::ParseError(format!(
            "Recipe {} declares no sources",
            recipe.package.name
        )));
    }
    for (version, source) in &recipe.sources {
        source
            .validate()
            .map_err(|e| Error::ParseError(format!("Version {}: {}", version, e)))?;
    }
    for version in recipe.patches.keys() {
        if !recipe.sources.contains_key(version) {
            return Err(Error::ParseError(format!(
                "Patches declared for version {} which has no sources",
                version
            )));
        }
    }
    if let Some(default) = &recipe.package.default_version {
        if !recipe.sources.contains_key(default) {
            return Err(Error::ParseError(format!(
                "Default version {} has no sources",
                default
            )));
        }
    }

    let schema = recipe.option_schema().map_err(|e| Error::ParseError(e.to_string()))?;
    for (name, decl) in &recipe.options {
        if let Some(cond) = &decl.remove_when {
            check_refs(cond, &schema, None, &format!("option '{}'", name))?;
        }
    }

    for req in &recipe.requires {
        let what = format!("requirement {}", req.reference());
        if let Some(cond) = req.condition() {
            check_refs(cond, &schema, None, &what)?;
        }
        for (name, raw) in req.propagated().into_iter().flatten() {
            if let Some(source) = raw.strip_prefix('$') {
                if !schema.contains(source) {
                    return Err(Error::ParseError(format!(
                        "{} propagates {} from undeclared option '{}'",
                        what, name, source
                    )));
                }
            }
        }
    }

    // Structural capability checks: shorthand, gates, collisions
    let caps: BTreeSet<String> = recipe
        .configure
        .capabilities(&schema)
        .map_err(|e| Error::ParseError(e.to_string()))?
        .into_iter()
        .map(|c| c.name)
        .collect();

    for rule in &recipe.source_replace {
        if let Some(cond) = &rule.when {
            check_refs(cond, &schema, None, &format!("source replacement in {}", rule.file))?;
        }
    }

    for rule in &recipe.packaging.copy {
        if let Some(cond) = &rule.when {
            check_refs(cond, &schema, Some(&caps), &format!("copy rule '{}'", rule.pattern))?;
        }
    }
    for rule in &recipe.packaging.replace {
        if let Some(cond) = &rule.when {
            check_refs(cond, &schema, Some(&caps), &format!("replace rule in {}", rule.file))?;
        }
    }

    if recipe.export.root.when.is_some() {
        return Err(Error::ParseError(
            "[export] itself cannot carry 'when'; gate its components instead".to_string(),
        ));
    }
    for cond in recipe.export.root.conditions() {
        check_refs(cond, &schema, Some(&caps), "export")?;
    }
    for (name, component) in &recipe.export.components {
        for cond in component.conditions() {
            check_refs(cond, &schema, Some(&caps), &format!("component '{}'", name))?;
        }
    }

    warnings.extend(recipe.build.validate()?);
    for item in &recipe.build.commands {
        if let Some(cond) = item.condition() {
            check_refs(cond, &schema, None, "build command")?;
        }
    }

    if recipe.package.summary.is_none() {
        warnings.push("Missing package summary".to_string());
    }
    if recipe.package.license.is_none() {
        warnings.push("Missing package license".to_string());
    }
    if recipe.export.root.libs.is_empty()
        && recipe.export.root.flags_from.is_none()
        && recipe.export.components.is_empty()
        && recipe.package.package_type == crate::export::PackageType::Library
    {
        warnings.push("Library package exports no libs".to_string());
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = r#"
[package]
name = "test"
summary = "test"
license = "MIT"
package_type = "header-library"

[sources."1.0"]
url = "https://example.com/test-1.0.tar.gz"
sha256 = "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
"#;

    fn with(extra: &str) -> Result<Vec<String>> {
        let recipe = parse_recipe(&format!("{}\n{}", extra, HEADER))?;
        validate_recipe(&recipe)
    }

    #[test]
    fn test_parse_valid_recipe() {
        let recipe = parse_recipe(HEADER).unwrap();
        assert_eq!(recipe.package.name, "test");
        assert_eq!(recipe.recipe_hash.len(), 64);
        assert!(with("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_invalid_recipe() {
        let content = "this is not valid toml at all {}";
        assert!(matches!(parse_recipe(content), Err(Error::ParseError(_))));
    }

    #[test]
    fn test_recipe_hash_tracks_content() {
        let a = parse_recipe(HEADER).unwrap();
        let b = parse_recipe(&format!("{}\n# comment\n", HEADER)).unwrap();
        assert_ne!(a.recipe_hash, b.recipe_hash);
    }

    #[test]
    fn test_unpinned_source_rejected() {
        let recipe = parse_recipe(
            r#"
[package]
name = "test"

[sources."1.0"]
url = "https://example.com/test-1.0.tar.gz"
"#,
        )
        .unwrap();
        assert!(matches!(validate_recipe(&recipe), Err(Error::ParseError(_))));
    }

    #[test]
    fn test_patches_for_unknown_version() {
        let err = with("[[patches.\"2.0\"]]\nfile = \"fix.patch\"").unwrap_err();
        assert!(err.to_string().contains("2.0"));
    }

    #[test]
    fn test_requirement_conditions_checked() {
        let err = with("requires = [{ ref = \"zlib/1.3\", when = \"compress\" }]").unwrap_err();
        assert!(err.to_string().contains("undeclared option 'compress'"));

        let err = with(
            "requires = [{ ref = \"zlib/1.3\", options = { shared = \"$shared\" } }]",
        )
        .unwrap_err();
        assert!(err.to_string().contains("undeclared option 'shared'"));
    }

    #[test]
    fn test_export_may_test_declared_capabilities() {
        let ok = with(
            r#"
[options]
cuda = { values = [true, false], default = false }

[[configure.capability]]
name = "cuda"
when = "cuda"

[export]
defines = [{ value = "HAVE_CUDA", when = "cap:cuda" }]
"#,
        );
        assert!(ok.is_ok());

        let err = with("[export]\ndefines = [{ value = \"X\", when = \"cap:rocm\" }]").unwrap_err();
        assert!(err.to_string().contains("undeclared capability 'rocm'"));
    }

    #[test]
    fn test_component_gates_checked() {
        let ok = with(
            r#"
[options]
udp = { values = [true, false], default = false }

[export.components.upcxx-udp-seq]
when = "udp"
flags_from = { command = { program = "bin/upcxx-meta", cflags = "CPPFLAGS", libs = "LIBS" } }
"#,
        );
        assert!(ok.is_ok());

        let err = with("[export.components.x]\nwhen = \"ibv\"").unwrap_err();
        assert!(err.to_string().contains("undeclared option 'ibv'"));

        let err = with(
            "[options]\nudp = { values = [true, false], default = false }\n[export]\nwhen = \"udp\"",
        )
        .unwrap_err();
        assert!(err.to_string().contains("cannot carry 'when'"));
    }

    #[test]
    fn test_validate_warnings() {
        let recipe = parse_recipe(
            r#"
[package]
name = "test"

[sources."1.0"]
git = "https://example.com/test.git"
tag = "v1.0"
"#,
        )
        .unwrap();
        let warnings = validate_recipe(&recipe).unwrap();
        assert!(warnings.contains(&"Missing package summary".to_string()));
        assert!(warnings.contains(&"Library package exports no libs".to_string()));
    }
}
