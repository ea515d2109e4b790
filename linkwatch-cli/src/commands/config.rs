//! Print the effective configuration.

use linkwatch_core::config::{LinkwatchConfig, RouteSettings};

use crate::error::CliError;
use crate::util::{GlobalOptions, create_config_manager, load_config};

/// Config command handler
///
/// Passwords are never serialized, so the printed TOML is safe to share;
/// hops that carry one are listed as redacted comments below it.
pub fn cmd_config(options: &GlobalOptions, check: bool) -> Result<(), CliError> {
    let config = load_config(options)?;
    if check {
        if !options.quiet {
            let path = create_config_manager(options)?.config_path().to_path_buf();
            println!("{} is valid", path.display());
        }
        return Ok(());
    }

    print!("{}", render(&config)?);
    Ok(())
}

fn render(config: &LinkwatchConfig) -> Result<String, CliError> {
    let mut text = toml::to_string_pretty(config)
        .map_err(|e| CliError::Output(format!("Failed to render configuration: {e}")))?;

    let mut redacted = redacted_hops("target", &config.target);
    if let Some(switch) = &config.switch {
        redacted.extend(redacted_hops("switch", switch));
    }
    if !redacted.is_empty() {
        text.push('\n');
        for line in redacted {
            text.push_str(&line);
            text.push('\n');
        }
    }
    Ok(text)
}

fn redacted_hops(section: &str, route: &RouteSettings) -> Vec<String> {
    route
        .hops
        .iter()
        .filter(|hop| hop.has_password())
        .map(|hop| format!("# [{section}] password for {}: <redacted>", hop.host))
        .collect()
}
