//! Definition file validation

use std::path::Path;

use anyhow::{Context, Result, bail};
use signalgate::{
  definition::file::DefinitionFile,
  door::{Severity, ValidationMode},
};

pub async fn cmd_validate(path: &Path, strict: bool, json: bool) -> Result<()> {
  let mode = if strict {
    ValidationMode::Strict
  } else {
    ValidationMode::Lenient
  };

  let set = DefinitionFile::load(path)?
    .into_set()
    .with_context(|| format!("failed to build definitions from {:?}", path))?;

  let (issues, failed) = match set.validate(mode) {
    Ok(issues) => (issues, false),
    Err(e) => (e.issues, true),
  };

  if json {
    let report = serde_json::json!({
      "file": path,
      "signals": set.signals().len(),
      "doors": set.doors().len(),
      "valid": !failed,
      "issues": issues,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
  } else {
    println!("{:?}: {} signals, {} doors", path, set.signals().len(), set.doors().len());
    for issue in &issues {
      let label = match issue.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
      };
      println!("  {}: {}", label, issue.message);
    }
    if issues.is_empty() {
      println!("No issues found");
    }
  }

  if failed {
    bail!("{} is not valid", path.display());
  }
  Ok(())
}
