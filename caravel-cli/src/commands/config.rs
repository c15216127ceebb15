//! Configuration subcommands

use crate::ConfigCommands;
use crate::config::ConfigManager;

pub fn handle(cmd: ConfigCommands) -> anyhow::Result<()> {
    let mut manager = ConfigManager::new()?;
    match cmd {
        ConfigCommands::Show => {
            for key in ConfigManager::keys() {
                println!("{key} = {}", manager.get(key)?);
            }
        }
        ConfigCommands::Set { key, value } => {
            manager.set(&key, &value)?;
            manager.save()?;
            println!("{key} = {value}");
        }
        ConfigCommands::Get { key } => {
            println!("{}", manager.get(&key)?);
        }
        ConfigCommands::Path => {
            println!("{}", manager.path().display());
        }
    }
    Ok(())
}
