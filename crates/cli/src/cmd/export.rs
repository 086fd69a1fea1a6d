use std::path::Path;

use anyhow::{Context, Result};

use kiln_lib::export::export_recipe;
use kiln_lib::platform::paths;

use crate::output::{Mark, OutputFormat, emit_json, field, headline, short_id};

pub fn cmd_export(path: &Path, output: OutputFormat) -> Result<()> {
  let result = export_recipe(path, &paths::recipes_dir())
    .with_context(|| format!("Failed to export recipe from {}", path.display()))?;

  if output.is_json() {
    emit_json(&result)?;
  } else {
    let versions: Vec<String> = result.versions.iter().map(ToString::to_string).collect();
    headline(Mark::Done, &format!("Exported {}", result.name));
    field("Versions", versions.join(", "));
    field("Revision", short_id(&result.revision));
    field("Location", result.path.display());
  }
  Ok(())
}
