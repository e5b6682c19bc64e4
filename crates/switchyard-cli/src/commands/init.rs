use std::path::Path;

use switchyard_core::SwitchyardConfig;

pub fn run(config_path: &Path, name: &str, force: bool) -> anyhow::Result<u8> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    let config = SwitchyardConfig::scaffold(name);
    std::fs::write(config_path, config.to_toml_string()?)?;
    println!("✓ Generated {}", config_path.display());
    Ok(0)
}
