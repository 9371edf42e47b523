//! Random resource names that satisfy platform naming rules.

use std::collections::HashSet;
use std::fmt;

use rand::distributions::Alphanumeric;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::{DeployError, DeployResult};

/// Minimum number of random characters in a generated name.
pub const MIN_SUFFIX_LEN: usize = 5;

/// Attempts before giving up on finding an unused name.
const MAX_ATTEMPTS: usize = 16;

/// Kind of resource a name is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Function app (also its host name).
    FunctionApp,
    /// Resource group.
    ResourceGroup,
    /// Hosting plan.
    HostingPlan,
}

impl ResourceKind {
    /// Shortest name the platform accepts.
    #[must_use]
    pub const fn min_len(&self) -> usize {
        match self {
            Self::FunctionApp => 2,
            Self::ResourceGroup | Self::HostingPlan => 1,
        }
    }

    /// Longest name the platform accepts.
    #[must_use]
    pub const fn max_len(&self) -> usize {
        match self {
            Self::FunctionApp | Self::HostingPlan => 60,
            Self::ResourceGroup => 90,
        }
    }

    const fn allows(&self, c: char) -> bool {
        match self {
            Self::FunctionApp => c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-',
            Self::ResourceGroup => {
                c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '(' | ')')
            }
            Self::HostingPlan => c.is_ascii_alphanumeric() || c == '-',
        }
    }

    /// Get the kind name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FunctionApp => "function app",
            Self::ResourceGroup => "resource group",
            Self::HostingPlan => "hosting plan",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> DeployError {
    DeployError::InvalidName {
        name: name.to_owned(),
        reason: reason.into(),
    }
}

/// Check `name` against the platform rules for `kind`.
pub fn validate(kind: ResourceKind, name: &str) -> DeployResult<()> {
    let len = name.chars().count();
    if len < kind.min_len() || len > kind.max_len() {
        return Err(invalid(
            name,
            format!(
                "{kind} names must be {}-{} characters, got {len}",
                kind.min_len(),
                kind.max_len()
            ),
        ));
    }

    if let Some(bad) = name.chars().find(|c| !kind.allows(*c)) {
        return Err(invalid(name, format!("{kind} names may not contain {bad:?}")));
    }

    match kind {
        ResourceKind::FunctionApp if name.starts_with('-') || name.ends_with('-') => {
            Err(invalid(name, "function app names may not start or end with '-'"))
        }
        ResourceKind::ResourceGroup if name.ends_with('.') => {
            Err(invalid(name, "resource group names may not end with '.'"))
        }
        _ => Ok(()),
    }
}

/// Issues random names and remembers them so none repeats within a run.
#[derive(Debug)]
pub struct NameGenerator {
    rng: SmallRng,
    issued: HashSet<String>,
}

impl Default for NameGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl NameGenerator {
    /// Create a generator seeded from the OS.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
            issued: HashSet::new(),
        }
    }

    /// Create a deterministic generator.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            issued: HashSet::new(),
        }
    }

    /// Names issued so far.
    #[must_use]
    pub fn issued(&self) -> usize {
        self.issued.len()
    }

    /// Generate `prefix` followed by random lowercase alphanumerics, `max_len` long.
    ///
    /// `max_len` is capped at the platform limit for `kind`. The prefix is
    /// truncated if it would leave fewer than [`MIN_SUFFIX_LEN`] random
    /// characters.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::InvalidName`] if no valid unused name can be
    /// produced.
    pub fn random_name(
        &mut self,
        kind: ResourceKind,
        prefix: &str,
        max_len: usize,
    ) -> DeployResult<String> {
        let max_len = max_len.min(kind.max_len());
        if max_len < MIN_SUFFIX_LEN {
            return Err(invalid(
                prefix,
                format!("maximum length {max_len} leaves no room for a random suffix"),
            ));
        }

        let prefix: String = prefix.chars().take(max_len - MIN_SUFFIX_LEN).collect();
        let suffix_len = max_len - prefix.chars().count();

        for _ in 0..MAX_ATTEMPTS {
            let suffix: String = (&mut self.rng)
                .sample_iter(Alphanumeric)
                .take(suffix_len)
                .map(|b| char::from(b).to_ascii_lowercase())
                .collect();
            let name = format!("{prefix}{suffix}");

            validate(kind, &name)?;
            if self.issued.insert(name.clone()) {
                return Ok(name);
            }
        }

        Err(invalid(
            &prefix,
            format!("no unused {kind} name after {MAX_ATTEMPTS} attempts"),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::app(ResourceKind::FunctionApp, "fnapp1-a1b2c")]
    #[case::app_min(ResourceKind::FunctionApp, "ab")]
    #[case::group(ResourceKind::ResourceGroup, "rgfn_Prod.(eu)")]
    #[case::plan(ResourceKind::HostingPlan, "Plan-01")]
    fn accepts_valid_names(#[case] kind: ResourceKind, #[case] name: &str) {
        validate(kind, name).unwrap();
    }

    #[rstest]
    #[case::app_upper(ResourceKind::FunctionApp, "FnApp")]
    #[case::app_underscore(ResourceKind::FunctionApp, "fn_app")]
    #[case::app_leading_dash(ResourceKind::FunctionApp, "-fnapp")]
    #[case::app_trailing_dash(ResourceKind::FunctionApp, "fnapp-")]
    #[case::app_too_short(ResourceKind::FunctionApp, "a")]
    #[case::group_trailing_dot(ResourceKind::ResourceGroup, "rgfn.")]
    #[case::group_empty(ResourceKind::ResourceGroup, "")]
    #[case::plan_underscore(ResourceKind::HostingPlan, "my_plan")]
    fn rejects_invalid_names(#[case] kind: ResourceKind, #[case] name: &str) {
        assert!(matches!(
            validate(kind, name),
            Err(DeployError::InvalidName { .. })
        ));
    }

    #[test]
    fn rejects_overlong_names() {
        let name = "a".repeat(61);
        assert!(validate(ResourceKind::FunctionApp, &name).is_err());
        assert!(validate(ResourceKind::ResourceGroup, &name).is_ok());
    }

    #[test]
    fn fills_to_max_len_with_prefix() {
        let mut names = NameGenerator::seeded(7);
        let name = names
            .random_name(ResourceKind::FunctionApp, "fnapp1-", 20)
            .unwrap();
        assert_eq!(name.len(), 20);
        assert!(name.starts_with("fnapp1-"));
        assert!(name[7..]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn long_prefix_is_truncated() {
        let mut names = NameGenerator::seeded(7);
        let name = names
            .random_name(ResourceKind::ResourceGroup, "a-very-long-prefix_", 10)
            .unwrap();
        assert_eq!(name.len(), 10);
        assert!(name.starts_with("a-ver"));
        assert!(name[5..]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn max_len_is_capped_by_platform_limit() {
        let mut names = NameGenerator::seeded(1);
        let name = names
            .random_name(ResourceKind::FunctionApp, "fn-", 500)
            .unwrap();
        assert_eq!(name.len(), 60);
    }

    #[test]
    fn too_short_for_suffix() {
        let mut names = NameGenerator::new();
        assert!(names
            .random_name(ResourceKind::FunctionApp, "fn", 4)
            .is_err());
    }

    #[test]
    fn names_are_unique_within_a_run() {
        let mut names = NameGenerator::seeded(42);
        let mut seen = HashSet::new();
        for _ in 0..500 {
            let name = names
                .random_name(ResourceKind::FunctionApp, "fnapp1-", 12)
                .unwrap();
            assert!(seen.insert(name));
        }
        assert_eq!(names.issued(), 500);
    }

    #[test]
    fn prefix_with_invalid_chars_is_rejected() {
        let mut names = NameGenerator::new();
        let err = names
            .random_name(ResourceKind::FunctionApp, "Fn_App", 20)
            .unwrap_err();
        assert!(matches!(err, DeployError::InvalidName { .. }));
    }
}
