//! Policy Engine
//!
//! Classifies a caller's argument vector as allowed or denied.
//!
//! # Algorithm
//!
//! 1. Every token is checked against the global-argument blocklist, whatever
//!    the mode. A hit rejects the whole command.
//! 2. Flags are removed to obtain the "bare words". A flag without `=`
//!    consumes the following token as its value.
//! 3. Candidate phrases of 1..N bare words are looked up in the active rule
//!    set, N being its longest phrase.
//! 4. Write-allowed mode denies on a `blocked` hit. Read-only mode allows only
//!    on an `allowed` hit.
//!
//! The same engine instance backs both enforcement points: the per-call check
//! and the registry interceptor of the embedded strategy.

use super::error::PolicyViolation;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Whether the backend may be asked to modify state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
    /// Allow-list: only explicitly allowed phrases run
    ReadOnly,
    /// Deny-list: everything runs except blocked phrases
    WriteAllowed,
}

impl PolicyMode {
    pub fn from_allow_write(allow_write: bool) -> Self {
        if allow_write {
            Self::WriteAllowed
        } else {
            Self::ReadOnly
        }
    }
}

/// Which phrases of the bare words are looked up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    /// Leading phrases only (`get`, `adm top`)
    #[default]
    Prefix,
    /// Any contiguous phrase (`server list` matches the verb `list`)
    Verb,
}

/// Malformed policy configuration; fatal at startup
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyConfigError {
    #[error("Policy entries must contain at least one word")]
    EmptyPhrase,

    #[error("Policy entry '{0}' starts with a flag, entries must be command words")]
    FlagPhrase(String),

    #[error("Policy entry '{0}' is both allowed and blocked")]
    Overlap(String),

    #[error("Read-only mode requires a non-empty allow-list")]
    EmptyAllowList,
}

/// A set of command phrases, each an ordered list of words
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    phrases: HashSet<Vec<String>>,
    max_words: usize,
}

impl RuleSet {
    /// Build a rule set from space-separated phrases
    pub fn new<I, S>(entries: I) -> Result<Self, PolicyConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut phrases = HashSet::new();
        let mut max_words = 0;

        for entry in entries {
            let entry = entry.as_ref();
            let words: Vec<String> = entry.split_whitespace().map(str::to_string).collect();
            match words.first() {
                None => return Err(PolicyConfigError::EmptyPhrase),
                Some(first) if first.starts_with('-') => {
                    return Err(PolicyConfigError::FlagPhrase(entry.to_string()))
                }
                Some(_) => {}
            }
            max_words = max_words.max(words.len());
            phrases.insert(words);
        }

        Ok(Self { phrases, max_words })
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    /// Length of the longest phrase
    pub fn max_words(&self) -> usize {
        self.max_words
    }

    pub fn contains(&self, phrase: &[String]) -> bool {
        self.phrases.contains(phrase)
    }

    /// Does a leading phrase of `words` belong to the set
    pub fn matches_prefix(&self, words: &[String]) -> bool {
        (1..=self.max_words.min(words.len())).any(|len| self.contains(&words[..len]))
    }

    /// Does any contiguous phrase of `words` belong to the set
    pub fn matches_window(&self, words: &[String]) -> bool {
        (1..=self.max_words.min(words.len()))
            .any(|len| words.windows(len).any(|window| self.contains(window)))
    }

    fn matches(&self, words: &[String], strategy: MatchStrategy) -> bool {
        match strategy {
            MatchStrategy::Prefix => self.matches_prefix(words),
            MatchStrategy::Verb => self.matches_window(words),
        }
    }

    fn overlap(&self, other: &RuleSet) -> Option<String> {
        self.phrases
            .iter()
            .find(|phrase| other.phrases.contains(*phrase))
            .map(|phrase| phrase.join(" "))
    }
}

/// The allow-list and deny-list of one backend
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    allowed: RuleSet,
    blocked: RuleSet,
}

impl PolicySet {
    /// Build the two rule sets, rejecting entries present in both
    pub fn new<A, B, S1, S2>(allowed: A, blocked: B) -> Result<Self, PolicyConfigError>
    where
        A: IntoIterator<Item = S1>,
        B: IntoIterator<Item = S2>,
        S1: AsRef<str>,
        S2: AsRef<str>,
    {
        let allowed = RuleSet::new(allowed)?;
        let blocked = RuleSet::new(blocked)?;
        if let Some(phrase) = allowed.overlap(&blocked) {
            return Err(PolicyConfigError::Overlap(phrase));
        }
        Ok(Self { allowed, blocked })
    }

    pub fn allowed(&self) -> &RuleSet {
        &self.allowed
    }

    pub fn blocked(&self) -> &RuleSet {
        &self.blocked
    }
}

/// Flags the caller may never supply
#[derive(Debug, Clone, Default)]
pub struct GlobalArgBlocklist {
    flags: Vec<String>,
    abbreviations: bool,
}

impl GlobalArgBlocklist {
    pub fn new<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            flags: flags.into_iter().map(Into::into).collect(),
            abbreviations: false,
        }
    }

    /// Also reject unambiguous-prefix spellings of long flags
    ///
    /// Needed for backends whose option parser expands `--os-tok` to
    /// `--os-token`.
    pub fn with_abbreviations(mut self, enabled: bool) -> Self {
        self.abbreviations = enabled;
        self
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    pub fn accepts_abbreviations(&self) -> bool {
        self.abbreviations
    }

    /// Return the first blocked flag found among `args`
    pub fn find(&self, args: &[String]) -> Option<&str> {
        args.iter()
            .filter(|arg| arg.starts_with('-'))
            .find_map(|arg| {
                self.flags
                    .iter()
                    .find(|flag| flag_matches(flag, arg, self.abbreviations))
                    .map(String::as_str)
            })
    }

    pub fn check(&self, args: &[String]) -> Result<(), PolicyViolation> {
        match self.find(args) {
            Some(flag) => Err(PolicyViolation::GlobalArgumentRejected(flag.to_string())),
            None => Ok(()),
        }
    }
}

/// `--server=x` matches `--server`; `-shttps://x` matches `-s`
///
/// With `abbreviations`, `--serv` matches `--server` as well. A bare `--`
/// ends option parsing and never matches.
fn flag_matches(flag: &str, arg: &str, abbreviations: bool) -> bool {
    let name = arg.split_once('=').map_or(arg, |(name, _)| name);
    if name == flag {
        return true;
    }
    if flag.starts_with("--") {
        return abbreviations && name.len() > 2 && name.starts_with("--") && flag.starts_with(name);
    }
    let is_short = flag.len() == 2;
    is_short && !arg.starts_with("--") && arg.starts_with(flag)
}

/// Remove flags and their values, keeping the command words
///
/// A flag without `=` is assumed to take the next token as its value.
///
/// ```
/// use cligate::gateway::policy::bare_words;
///
/// let args: Vec<String> = ["cmd", "--foo", "bar", "baz"].map(String::from).to_vec();
/// assert_eq!(bare_words(&args), ["cmd", "baz"]);
/// ```
pub fn bare_words(args: &[String]) -> Vec<String> {
    let mut words = Vec::with_capacity(args.len());
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg.starts_with('-') {
            if !arg.contains('=') {
                iter.next();
            }
        } else {
            words.push(arg.clone());
        }
    }
    words
}

/// Allow/deny classifier for one backend
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    mode: PolicyMode,
    strategy: MatchStrategy,
    policy: PolicySet,
    global_args: GlobalArgBlocklist,
}

impl PolicyEngine {
    /// Build an engine, validating that read-only mode has something to allow
    pub fn new(
        mode: PolicyMode,
        strategy: MatchStrategy,
        policy: PolicySet,
        global_args: GlobalArgBlocklist,
    ) -> Result<Self, PolicyConfigError> {
        if mode == PolicyMode::ReadOnly && policy.allowed.is_empty() {
            return Err(PolicyConfigError::EmptyAllowList);
        }
        Ok(Self {
            mode,
            strategy,
            policy,
            global_args,
        })
    }

    pub fn mode(&self) -> PolicyMode {
        self.mode
    }

    pub fn strategy(&self) -> MatchStrategy {
        self.strategy
    }

    pub fn policy(&self) -> &PolicySet {
        &self.policy
    }

    pub fn global_args(&self) -> &GlobalArgBlocklist {
        &self.global_args
    }

    /// Validate a caller argument vector
    ///
    /// # Errors
    ///
    /// - [`PolicyViolation::GlobalArgumentRejected`] for a blocked global flag
    /// - [`PolicyViolation::CommandBlocked`] for a deny-list hit or an
    ///   allow-list miss
    pub fn check(&self, args: &[String]) -> Result<(), PolicyViolation> {
        self.global_args.check(args)?;

        let words = bare_words(args);
        if self.is_command_allowed(&words) {
            Ok(())
        } else {
            Err(PolicyViolation::CommandBlocked(args.join(" ")))
        }
    }

    /// Classify command words that are already free of flags
    ///
    /// This is the entry point of the registry interceptor, which evaluates
    /// static command names once at registry build time.
    pub fn is_command_allowed(&self, words: &[String]) -> bool {
        let allowed = &self.policy.allowed;
        let blocked = &self.policy.blocked;

        match (self.mode, self.strategy) {
            (PolicyMode::WriteAllowed, strategy) => !blocked.matches(words, strategy),
            (PolicyMode::ReadOnly, MatchStrategy::Prefix) => allowed.matches_prefix(words),
            // A read verb among the arguments must not smuggle in a write verb
            (PolicyMode::ReadOnly, MatchStrategy::Verb) => {
                allowed.matches_window(words) && !blocked.matches_window(words)
            }
        }
    }
}
