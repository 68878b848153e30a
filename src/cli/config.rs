use colored::Colorize;

use crate::error::Result;
use crate::settings::{load_settings, save_settings, settings_path, Settings};

pub fn run(init: bool) -> Result<()> {
    let path = settings_path();
    if init {
        if path.exists() {
            println!("Settings already exist at {}", path.display());
        } else {
            let written = save_settings(&Settings::default())?;
            println!("{} Wrote default settings to {}", "\u{2713}".green(), written.display());
        }
    } else if !path.exists() {
        println!("No settings file at {}, using defaults.", path.display());
    } else {
        println!("Settings file: {}", path.display());
    }
    let settings = load_settings();
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}
