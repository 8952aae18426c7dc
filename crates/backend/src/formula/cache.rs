//! Compiled formula cache shared by door actors on a node.

use std::sync::Arc;

use moka::future::Cache;

use super::{CompiledFormula, FormulaError, compile};

/// Bounded cache of compiled formulas, keyed by formula text plus the
/// ordered variable list.
///
/// Passed to door factories explicitly; there is no process-wide instance.
#[derive(Clone)]
pub struct FormulaCache {
  inner: Cache<String, Arc<CompiledFormula>>,
}

impl FormulaCache {
  pub fn new(capacity: u64) -> Self {
    Self {
      inner: Cache::builder().max_capacity(capacity).build(),
    }
  }

  fn key<S: AsRef<str>>(formula: &str, variables: &[S]) -> String {
    let vars: Vec<&str> = variables.iter().map(|v| v.as_ref()).collect();
    format!("{}\u{1f}{}", formula, vars.join(","))
  }

  /// Return the cached compilation or compile and insert it
  pub async fn get_or_compile<S: AsRef<str>>(
    &self,
    formula: &str,
    variables: &[S],
  ) -> Result<Arc<CompiledFormula>, FormulaError> {
    let key = Self::key(formula, variables);
    let owned: Vec<String> = variables.iter().map(|v| v.as_ref().to_string()).collect();
    let source = formula.to_string();

    self
      .inner
      .try_get_with(key, async move { compile(&source, &owned).map(Arc::new) })
      .await
      .map_err(|e| (*e).clone())
  }

  pub fn entry_count(&self) -> u64 {
    self.inner.entry_count()
  }
}

impl Default for FormulaCache {
  fn default() -> Self {
    Self::new(1024)
  }
}

impl std::fmt::Debug for FormulaCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FormulaCache")
      .field("entries", &self.inner.entry_count())
      .finish()
  }
}
