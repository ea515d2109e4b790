//! Create a default configuration file.

use crate::error::CliError;
use crate::util::{GlobalOptions, create_config_manager};

/// Init command handler
pub fn cmd_init(options: &GlobalOptions, force: bool) -> Result<(), CliError> {
    let manager = create_config_manager(options)?;
    let path = manager.write_default(force)?;
    if !options.quiet {
        println!("Wrote {}", path.display());
        println!("Edit the [target] section, then run `linkwatch check`.");
    }
    Ok(())
}
