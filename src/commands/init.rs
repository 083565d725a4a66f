use anyhow::{Context, Result};
use filing_mirror::config::{Config, CONFIG_FILE_NAME};
use std::path::Path;

pub fn init_config(path: &Path, user_agent: Option<&str>) -> Result<()> {
    let config_path = path.join(CONFIG_FILE_NAME);
    if config_path.exists() {
        anyhow::bail!("Config file already exists: {}", config_path.display());
    }

    let mut config = Config::default();
    if let Some(user_agent) = user_agent {
        config.registry.user_agent = user_agent.to_string();
    }

    let content = format!(
        "# Filing Mirror Configuration\n\
         #\n\
         # registry.user_agent is required: the registry rejects anonymous\n\
         # clients. Use \"Org Name contact@example.com\".\n\n{}",
        config.to_toml()?
    );

    std::fs::create_dir_all(path)?;
    std::fs::write(&config_path, content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("Created config file: {}", config_path.display());
    if config.registry.user_agent.is_empty() {
        println!("Set registry.user_agent before running any command.");
    }
    Ok(())
}
