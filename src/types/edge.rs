//! Edges: routing rules connecting executor outputs to downstream inputs.

use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Predicate deciding the branch of an [Edge::Conditional]; may be async.
pub type EdgePredicate = Arc<dyn Fn(&Value) -> BoxFuture<'static, bool> + Send + Sync>;

/// Selector yielding the case key for an [Edge::SwitchCase].
pub type CaseSelector = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// Merge combining fan-in outputs, received in declared source order.
pub type MergeFn = Arc<dyn Fn(Vec<Value>) -> Value + Send + Sync>;

/// Wraps a synchronous predicate into an [EdgePredicate].
pub fn predicate_fn(f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> EdgePredicate {
  Arc::new(move |value| {
    let hit = f(value);
    Box::pin(async move { hit })
  })
}

/// Wraps a synchronous selector into a [CaseSelector].
pub fn selector_fn(f: impl Fn(&Value) -> String + Send + Sync + 'static) -> CaseSelector {
  Arc::new(f)
}

/// Wraps a synchronous merge into a [MergeFn].
pub fn merge_fn(f: impl Fn(Vec<Value>) -> Value + Send + Sync + 'static) -> MergeFn {
  Arc::new(f)
}

/// A routing rule between executors. Endpoints are executor ids; the graph
/// owns the executors themselves.
///
/// Predicates, selectors and merges are opaque callables supplied by the
/// caller; they are excluded from signature hashing, which covers only the
/// structural shape ([Edge::canonical]).
#[derive(Clone)]
pub enum Edge {
  /// Output flows unchanged from `from` to `to`.
  Direct { from: String, to: String },
  /// `predicate(output)` selects `true_branch` or `false_branch`; a false
  /// result with no false branch terminates the path without error.
  Conditional {
    from: String,
    predicate: EdgePredicate,
    true_branch: String,
    false_branch: Option<String>,
  },
  /// Identical output dispatched to every target.
  FanOut { from: String, to: Vec<String> },
  /// `to` runs once all of `from` have produced output; `merge` receives the
  /// outputs in the exact order listed in `from`, not completion order.
  FanIn {
    from: Vec<String>,
    to: String,
    merge: MergeFn,
  },
  /// `selector(output)` picks a case key; falls back to `default` when no
  /// case matches, else the path terminates without error.
  SwitchCase {
    from: String,
    selector: CaseSelector,
    cases: Vec<(String, String)>,
    default: Option<String>,
  },
}

impl Edge {
  pub fn direct(from: impl Into<String>, to: impl Into<String>) -> Self {
    Edge::Direct {
      from: from.into(),
      to: to.into(),
    }
  }

  /// Conditional edge over a synchronous predicate.
  pub fn conditional(
    from: impl Into<String>,
    true_branch: impl Into<String>,
    false_branch: Option<String>,
    predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
  ) -> Self {
    Edge::Conditional {
      from: from.into(),
      predicate: predicate_fn(predicate),
      true_branch: true_branch.into(),
      false_branch,
    }
  }

  /// Conditional edge over an async predicate.
  pub fn conditional_async(
    from: impl Into<String>,
    true_branch: impl Into<String>,
    false_branch: Option<String>,
    predicate: EdgePredicate,
  ) -> Self {
    Edge::Conditional {
      from: from.into(),
      predicate,
      true_branch: true_branch.into(),
      false_branch,
    }
  }

  pub fn fan_out(
    from: impl Into<String>,
    to: impl IntoIterator<Item = impl Into<String>>,
  ) -> Self {
    Edge::FanOut {
      from: from.into(),
      to: to.into_iter().map(Into::into).collect(),
    }
  }

  pub fn fan_in(
    from: impl IntoIterator<Item = impl Into<String>>,
    to: impl Into<String>,
    merge: impl Fn(Vec<Value>) -> Value + Send + Sync + 'static,
  ) -> Self {
    Edge::FanIn {
      from: from.into_iter().map(Into::into).collect(),
      to: to.into(),
      merge: merge_fn(merge),
    }
  }

  pub fn switch_case(
    from: impl Into<String>,
    cases: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    default: Option<String>,
    selector: impl Fn(&Value) -> String + Send + Sync + 'static,
  ) -> Self {
    Edge::SwitchCase {
      from: from.into(),
      selector: selector_fn(selector),
      cases: cases
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect(),
      default,
    }
  }

  /// Executor ids whose output this edge routes.
  pub fn sources(&self) -> Vec<&str> {
    match self {
      Edge::Direct { from, .. }
      | Edge::Conditional { from, .. }
      | Edge::FanOut { from, .. }
      | Edge::SwitchCase { from, .. } => vec![from.as_str()],
      Edge::FanIn { from, .. } => from.iter().map(String::as_str).collect(),
    }
  }

  /// Executor ids this edge may route to.
  pub fn targets(&self) -> Vec<&str> {
    match self {
      Edge::Direct { to, .. } => vec![to.as_str()],
      Edge::Conditional {
        true_branch,
        false_branch,
        ..
      } => {
        let mut t = vec![true_branch.as_str()];
        if let Some(f) = false_branch {
          t.push(f.as_str());
        }
        t
      }
      Edge::FanOut { to, .. } => to.iter().map(String::as_str).collect(),
      Edge::FanIn { to, .. } => vec![to.as_str()],
      Edge::SwitchCase { cases, default, .. } => {
        let mut t: Vec<&str> = cases.iter().map(|(_, id)| id.as_str()).collect();
        if let Some(d) = default {
          t.push(d.as_str());
        }
        t
      }
    }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      Edge::Direct { .. } => "direct",
      Edge::Conditional { .. } => "conditional",
      Edge::FanOut { .. } => "fan_out",
      Edge::FanIn { .. } => "fan_in",
      Edge::SwitchCase { .. } => "switch_case",
    }
  }

  /// Deterministic textual form used for signature hashing. Argument order of
  /// fan-out targets, fan-in sources and switch cases is structural and kept;
  /// callables are opaque and excluded.
  pub fn canonical(&self) -> String {
    match self {
      Edge::Direct { from, to } => format!("direct:{}->{}", from, to),
      Edge::Conditional {
        from,
        true_branch,
        false_branch,
        ..
      } => format!(
        "conditional:{}->{}|{}",
        from,
        true_branch,
        false_branch.as_deref().unwrap_or("-")
      ),
      Edge::FanOut { from, to } => format!("fan_out:{}->[{}]", from, to.join(",")),
      Edge::FanIn { from, to, .. } => format!("fan_in:[{}]->{}", from.join(","), to),
      Edge::SwitchCase {
        from,
        cases,
        default,
        ..
      } => {
        let cases: Vec<String> = cases.iter().map(|(k, id)| format!("{}:{}", k, id)).collect();
        format!(
          "switch_case:{}->{{{}}}|{}",
          from,
          cases.join(","),
          default.as_deref().unwrap_or("-")
        )
      }
    }
  }
}

impl fmt::Debug for Edge {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Edge({})", self.canonical())
  }
}
