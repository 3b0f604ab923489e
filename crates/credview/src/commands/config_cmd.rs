//! Config subcommand handlers.

use credview_config::{self as config, Config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg: Config = config::load_config(global.config.as_deref())?;
            let format = output::resolve_format(global, &cfg.defaults.output)?;
            let out = output::render_single(
                format,
                &cfg,
                |c| Ok(config::to_toml(c)?),
                |_| "config".into(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Path ────────────────────────────────────────────────────
        ConfigCommand::Path => {
            let path = global.config.clone().unwrap_or_else(config::config_path);
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }
    }
}
