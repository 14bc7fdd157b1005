// src/commands/validate.rs

//! Validate command - check recipes without resolving them

use anyhow::Result;
use larder::recipe::{parse_recipe_file, validate_recipe};
use std::path::Path;

/// Parse and validate one or more recipe files
///
/// Every file is checked; the command fails if any of them is invalid.
pub fn cmd_validate(recipes: &[String]) -> Result<()> {
    let mut failed = 0;

    for path in recipes {
        let path = Path::new(path);
        println!("Reading recipe: {}", path.display());

        let result = parse_recipe_file(path)
            .and_then(|recipe| validate_recipe(&recipe).map(|w| (recipe, w)));

        match result {
            Ok((recipe, warnings)) => {
                for warning in &warnings {
                    println!("Warning: {}", warning);
                }
                let versions = recipe.versions().join(", ");
                if warnings.is_empty() {
                    println!("[OK] {} ({}): no issues found", recipe.package.name, versions);
                } else {
                    println!(
                        "[OK] {} ({}): {} warning(s)",
                        recipe.package.name,
                        versions,
                        warnings.len()
                    );
                }
            }
            Err(e) => {
                println!("[FAILED] {}: {}", path.display(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} recipe(s) failed validation", failed);
    }
    Ok(())
}
