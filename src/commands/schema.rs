use schemars::schema_for;

use crate::config::TownSettings;

/// Print the JSON Schema for the town settings file to stdout.
pub fn run_schema() -> anyhow::Result<()> {
    let schema = schema_for!(TownSettings);
    let json = serde_json::to_string_pretty(&schema)?;
    println!("{json}");
    Ok(())
}
