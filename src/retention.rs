//! Multi-granularity retention
//!
//! A [`RetentionPolicy`] is an ordered list of [`Rule`]s. Each rule cuts the
//! timeline into buckets of its [`Granularity`], keeps the most recent
//! `quantity` buckets and pins one representative snapshot in each of them.
//! Pins accumulate across rules, so a snapshot chosen by any rule survives.
//!
//! ## Example
//!
//! A "grandfather-father-son" plan:
//!
//! ```rust
//! use hfbr::retention::{Granularity, Quantity, RetentionPolicy, Rule};
//!
//! let policy = RetentionPolicy::new(vec![
//!     Rule::new(Granularity::Unbucketed, Quantity::Limited(10)),
//!     Rule::new("1 hour".parse().unwrap(), Quantity::Limited(18)),
//!     Rule::new("1 day".parse().unwrap(), Quantity::Limited(5)),
//!     Rule::new("1 week".parse().unwrap(), Quantity::Limited(6)),
//!     Rule::new(Granularity::Month, Quantity::Limited(9)),
//!     Rule::new(Granularity::Year, Quantity::Unbounded),
//! ]);
//! assert!(!policy.is_vacuous());
//! ```
//!
//! ## Representatives
//!
//! Within a bucket an already pinned snapshot is preferred, so rules reuse
//! each other's choices instead of pinning extra files. Between snapshots
//! of equal pin status the older one wins.

use crate::catalog::{Snapshot, SnapshotCatalog, SnapshotId};
use crate::error::{HfbrError, Result};
use crate::events::{EventSink, RetentionEvent};
use chrono::Datelike;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

/// Longest fixed bucket, in seconds
const MAX_BUCKET_SECS: u64 = i64::MAX as u64;

/// Time bucketing of a [`Rule`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    /// No calendar bucketing: "the N most recent". Snapshots with the same
    /// mtime second share a bucket.
    Unbucketed,
    /// Fixed-length buckets counted from the Unix epoch, in seconds (never 0)
    FixedDuration(u64),
    /// Calendar month of the local timestamp
    Month,
    /// Calendar year of the local timestamp
    Year,
}

impl Granularity {
    /// Fixed-length buckets of `duration`, truncated to whole seconds.
    ///
    /// The length must be at least one second and fit an `i64` of seconds.
    pub fn fixed(duration: Duration) -> Result<Self> {
        match duration.as_secs() {
            secs @ 1..=MAX_BUCKET_SECS => Ok(Granularity::FixedDuration(secs)),
            _ => Err(HfbrError::InvalidDuration(
                humantime::format_duration(duration).to_string(),
            )),
        }
    }

    /// Parse an optional configuration token; `None` means unbucketed
    pub fn from_token(token: Option<&str>) -> Result<Self> {
        match token {
            None => Ok(Granularity::Unbucketed),
            Some(token) => token.parse(),
        }
    }

    fn bucket_key(&self, snapshot: &Snapshot) -> i64 {
        match self {
            // Every second is its own bucket, so a quantity of N keeps the N most recent
            Granularity::Unbucketed => snapshot.modified.timestamp(),
            Granularity::FixedDuration(secs) => {
                let secs = i64::try_from(*secs).unwrap_or(i64::MAX);
                snapshot.modified.timestamp().div_euclid(secs)
            }
            Granularity::Month => {
                let when = snapshot.local_time();
                i64::from(when.year()) * 12 + i64::from(when.month())
            }
            Granularity::Year => i64::from(snapshot.local_time().year()),
        }
    }
}

impl FromStr for Granularity {
    type Err = HfbrError;

    /// Accepts `month`, `year` or a duration such as `1 week`, `5 days`, `90min`
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        match normalized.as_str() {
            "month" => return Ok(Granularity::Month),
            "year" => return Ok(Granularity::Year),
            "" => return Err(HfbrError::UnknownGranularity(s.to_string())),
            _ => {}
        }

        if !normalized.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(HfbrError::UnknownGranularity(s.to_string()));
        }

        // humantime wants "1week", configs say "1 week"
        let compact: String = normalized.split_whitespace().collect();
        let duration = humantime::parse_duration(&compact)
            .map_err(|_| HfbrError::InvalidDuration(s.to_string()))?;
        Granularity::fixed(duration).map_err(|_| HfbrError::InvalidDuration(s.to_string()))
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Unbucketed => write!(f, "latest"),
            Granularity::FixedDuration(secs) => {
                write!(f, "{}", humantime::format_duration(Duration::from_secs(*secs)))
            }
            Granularity::Month => write!(f, "month"),
            Granularity::Year => write!(f, "year"),
        }
    }
}

/// How many buckets a [`Rule`] keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    /// Every bucket
    Unbounded,
    /// The most recent `n` buckets. `Limited(0)` keeps nothing.
    Limited(usize),
}

impl Quantity {
    /// Whether this quantity caps the number of buckets
    pub fn is_bounded(&self) -> bool {
        matches!(self, Quantity::Limited(_))
    }
}

impl From<Option<usize>> for Quantity {
    fn from(value: Option<usize>) -> Self {
        value.map_or(Quantity::Unbounded, Quantity::Limited)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Unbounded => write!(f, "all"),
            Quantity::Limited(n) => write!(f, "{}", n),
        }
    }
}

/// One `(granularity, quantity)` line of a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rule {
    /// Bucketing
    pub granularity: Granularity,
    /// Bucket cap
    pub quantity: Quantity,
}

impl Rule {
    /// Create a rule
    pub fn new(granularity: Granularity, quantity: Quantity) -> Self {
        Self {
            granularity,
            quantity,
        }
    }

    /// Keep the `n` most recent snapshots
    pub fn latest(n: usize) -> Self {
        Self::new(Granularity::Unbucketed, Quantity::Limited(n))
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.granularity, self.quantity)
    }
}

/// Ordered list of rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    rules: Vec<Rule>,
}

impl RetentionPolicy {
    /// Create a policy; rules are applied in the given order
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// True when no rule caps anything, including the empty policy.
    ///
    /// A vacuous policy keeps every snapshot.
    pub fn is_vacuous(&self) -> bool {
        self.rules.iter().all(|r| !r.quantity.is_bounded())
    }
}

impl From<Vec<Rule>> for RetentionPolicy {
    fn from(rules: Vec<Rule>) -> Self {
        Self::new(rules)
    }
}

/// What one rule did during an evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    /// The rule
    pub rule: Rule,
    /// Distinct buckets among all snapshots
    pub buckets: usize,
    /// Buckets that received a representative
    pub retained: usize,
    /// Representatives that were not pinned before this rule
    pub newly_pinned: usize,
}

/// Result of [`RetentionEngine::evaluate`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    /// The policy was vacuous and everything was kept
    pub vacuous: bool,
    /// Per-rule outcomes, in rule order (empty when vacuous)
    pub rules: Vec<RuleOutcome>,
    /// Snapshots pinned after the evaluation
    pub kept: usize,
}

/// Applies a [`RetentionPolicy`] to a [`SnapshotCatalog`]
#[derive(Debug, Clone)]
pub struct RetentionEngine {
    policy: RetentionPolicy,
}

impl RetentionEngine {
    /// Create an engine for `policy`
    pub fn new(policy: RetentionPolicy) -> Self {
        Self { policy }
    }

    /// The policy being applied
    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Pin the representatives selected by every rule.
    ///
    /// The catalog is sorted newest first. Pins already present (from the
    /// pin list) are honored and never cleared.
    #[instrument(skip_all, fields(dir = ?catalog.dir(), snapshots = catalog.len()))]
    pub fn evaluate(&self, catalog: &mut SnapshotCatalog, sink: &dyn EventSink) -> Evaluation {
        if self.policy.is_vacuous() {
            sink.emit(&RetentionEvent::PolicyVacuous {
                dir: catalog.dir().to_path_buf(),
            });
            catalog.pin_all();
            return Evaluation {
                vacuous: true,
                rules: Vec::new(),
                kept: catalog.len(),
            };
        }

        sink.emit(&RetentionEvent::PolicyApplied {
            dir: catalog.dir().to_path_buf(),
            snapshots: catalog.len(),
            rules: self.policy.rules.len(),
        });

        catalog.sort_newest_first();
        let rules = self
            .policy
            .rules
            .iter()
            .map(|rule| muster(rule, catalog))
            .collect();

        Evaluation {
            vacuous: false,
            rules,
            kept: catalog.pinned().count(),
        }
    }
}

/// Apply one rule: group by bucket, keep the newest buckets, pin one per bucket
fn muster(rule: &Rule, catalog: &mut SnapshotCatalog) -> RuleOutcome {
    let mut buckets: BTreeMap<i64, Vec<SnapshotId>> = BTreeMap::new();
    for (id, snapshot) in catalog.iter() {
        buckets
            .entry(rule.granularity.bucket_key(snapshot))
            .or_default()
            .push(id);
    }

    let limit = match rule.quantity {
        Quantity::Unbounded => buckets.len(),
        Quantity::Limited(n) => n.min(buckets.len()),
    };

    let chosen: Vec<SnapshotId> = buckets
        .values()
        .rev()
        .take(limit)
        .filter_map(|members| representative(catalog, members))
        .collect();

    let mut newly_pinned = 0;
    for id in &chosen {
        if !catalog.get(*id).pinned {
            newly_pinned += 1;
        }
        catalog.pin(*id);
    }

    debug!(
        "Rule {}: {} buckets, {} retained, {} newly pinned",
        rule,
        buckets.len(),
        chosen.len(),
        newly_pinned
    );

    RuleOutcome {
        rule: *rule,
        buckets: buckets.len(),
        retained: chosen.len(),
        newly_pinned,
    }
}

/// Pinned beats unpinned; on equal pin status the older snapshot wins
fn representative(catalog: &SnapshotCatalog, members: &[SnapshotId]) -> Option<SnapshotId> {
    members.iter().copied().reduce(|best, candidate| {
        let (b, c) = (catalog.get(best), catalog.get(candidate));
        if b.pinned != c.pinned {
            if c.pinned {
                candidate
            } else {
                best
            }
        } else if c.modified < b.modified {
            candidate
        } else {
            best
        }
    })
}
