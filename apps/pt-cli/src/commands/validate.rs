// validate.rs - Validate one manifest file.

use std::path::Path;

use pt_manifest::ManifestValidator;

pub fn execute(path: &Path) -> anyhow::Result<()> {
    let result = ManifestValidator::new().validate_file(path)?;
    tracing::debug!(
        path = %path.display(),
        valid = result.valid,
        errors = result.errors.len(),
        warnings = result.warnings.len(),
        "manifest validated"
    );

    for issue in &result.errors {
        println!("error: {}", issue);
    }
    for warning in &result.warnings {
        println!("warning: {}", warning);
    }

    match (&result.manifest, result.valid) {
        (Some(manifest), true) => {
            println!(
                "{} is valid: {} {} ({}, {} intent(s))",
                path.display(),
                manifest.plugin.id,
                manifest.plugin.version,
                manifest.governing_policy(),
                manifest.capabilities.intents.len()
            );
            Ok(())
        }
        _ => anyhow::bail!(
            "{} was rejected with {} error(s)",
            path.display(),
            result.errors.len()
        ),
    }
}
