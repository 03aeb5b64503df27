//! Property-Based Tests for distupgrade
//!
//! Uses proptest for invariants that must hold for any input:
//! - conflict rule matching against arbitrary output
//! - Debian version parsing
//! - escalation attempt bounds
//! - stage ordering for both profiles

use proptest::prelude::*;
use std::cell::RefCell;
use std::collections::VecDeque;

use distupgrade::commands::dpkg::upstream_major;
use distupgrade::config::is_valid_package_name;
use distupgrade::{
    CommandOutput, CommandRunner, CompiledRule, ConflictRule, Escalation, PackageCommand, Profile,
    RebootPolicy, Remedy, Reporter, Result, UpgradeConfig, UpgradeStage, UpgradeTracker,
};

// =============================================================================
// Conflict rule matching
// =============================================================================

fn overwrite_rule() -> CompiledRule {
    CompiledRule::compile(&ConflictRule::file_overwrite()).expect("compile")
}

proptest! {
    /// The overwrite trigger is found wherever it sits in the output
    #[test]
    fn overwrite_rule_matches_embedded_trigger(prefix in "[a-zA-Z0-9 :/'\n]{0,80}", suffix in "[a-zA-Z0-9 :/'\n]{0,80}") {
        let output = format!("{}trying to overwrite{}", prefix, suffix);
        prop_assert!(overwrite_rule().matches(&output));
    }

    /// Output without the trigger never matches
    #[test]
    fn overwrite_rule_ignores_unrelated_output(output in "[a-z0-9 :\n]{0,200}") {
        prop_assume!(!output.contains("trying to overwrite"));
        prop_assert!(!overwrite_rule().matches(&output));
    }

    /// A rule matches iff at least one of its literal patterns occurs
    #[test]
    fn rule_matches_any_pattern(patterns in prop::collection::vec("[a-z]{3,8}", 1..4), output in "[a-z ]{0,60}") {
        let refs: Vec<&str> = patterns.iter().map(String::as_str).collect();
        let rule = CompiledRule::compile(&ConflictRule::new("test", &refs, Remedy::None, false))
            .expect("compile");
        let expected = patterns.iter().any(|p| output.contains(p.as_str()));
        prop_assert_eq!(rule.matches(&output), expected);
    }
}

// =============================================================================
// Version parsing
// =============================================================================

proptest! {
    /// Epoch never leaks into the major version
    #[test]
    fn upstream_major_strips_epoch(epoch in 0u32..100, major in 0u32..10_000, rest in "[.+~a-z-][0-9.+~a-z-]{0,11}") {
        let version = format!("{}:{}{}", epoch, major, rest);
        prop_assert_eq!(upstream_major(&version), Some(major));
        prop_assert_eq!(upstream_major(&format!("{}{}", major, rest)), Some(major));
    }

    /// Strings not starting with a digit have no major version
    #[test]
    fn upstream_major_requires_leading_digit(s in "[a-z~+][a-z0-9.]{0,10}") {
        prop_assert_eq!(upstream_major(&s), None);
    }

    /// Valid package names survive the config validator
    #[test]
    fn generated_package_names_are_valid(name in "[a-z0-9][a-z0-9+.-]{1,30}") {
        prop_assert!(is_valid_package_name(&name));
    }

    /// Upper case is never valid in a Debian package name
    #[test]
    fn uppercase_package_names_are_invalid(name in "[a-z]{0,5}[A-Z][a-z]{0,5}") {
        prop_assert!(!is_valid_package_name(&name));
    }
}

// =============================================================================
// Escalation bounds
// =============================================================================

struct AlwaysFails {
    outputs: RefCell<VecDeque<String>>,
    upgrades: RefCell<usize>,
}

impl CommandRunner for AlwaysFails {
    fn run(&self, cmd: &dyn PackageCommand) -> Result<CommandOutput> {
        if cmd.display().ends_with("full-upgrade") {
            *self.upgrades.borrow_mut() += 1;
            let text = self.outputs.borrow_mut().pop_front().unwrap_or_default();
            return Ok(CommandOutput::failed(100, text));
        }
        Ok(CommandOutput::ok(""))
    }
}

fn trigger_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("trying to overwrite '/usr/lib/x'".to_string()),
        Just("E: Unmet dependencies.".to_string()),
        Just(" foo : Depends: bar".to_string()),
        Just("E: Failed to fetch".to_string()),
        "[a-z ]{0,40}",
    ]
}

proptest! {
    /// Every rule fires at most once, so attempts never exceed rules + 1
    #[test]
    fn escalation_attempts_are_bounded(outputs in prop::collection::vec(trigger_strategy(), 1..8)) {
        let rules = UpgradeConfig::default().compile_rules().expect("compile");
        let runner = AlwaysFails {
            outputs: RefCell::new(outputs.into()),
            upgrades: RefCell::new(0),
        };
        let outcome = Escalation::new(&runner, &rules, &Reporter::quiet()).run().expect("run");

        prop_assert!(!outcome.succeeded());
        prop_assert!(outcome.attempts.len() <= rules.len() + 1);
        prop_assert_eq!(outcome.attempts.len(), *runner.upgrades.borrow());
        prop_assert_eq!(outcome.attempts.len(), outcome.applied_rules.len() + 1);

        let mut seen = outcome.applied_rules.clone();
        seen.sort();
        seen.dedup();
        prop_assert_eq!(seen.len(), outcome.applied_rules.len());

        // force-overwrite is sticky once enabled
        let first_forced = outcome.attempts.iter().position(|a| a.force_overwrite);
        if let Some(i) = first_forced {
            prop_assert!(outcome.attempts[i..].iter().all(|a| a.force_overwrite));
        }
    }
}

// =============================================================================
// Stage ordering
// =============================================================================

fn profile_strategy() -> impl Strategy<Value = Profile> {
    prop_oneof![Just(Profile::Generic), Just(Profile::Sbc)]
}

proptest! {
    /// Advancing never skips or repeats a stage of the profile's sequence
    #[test]
    fn tracker_follows_sequence(profile in profile_strategy(), steps in 0usize..20) {
        let mut tracker = UpgradeTracker::new(profile);
        tracker.confirm();
        for _ in 0..steps {
            if tracker.advance().is_err() {
                break;
            }
        }
        let sequence = UpgradeStage::sequence(profile);
        let visited = tracker.stages();
        prop_assert_eq!(&visited[..], &sequence[1..=visited.len()]);
    }

    /// No mutating stage is reachable without confirmation
    #[test]
    fn unconfirmed_tracker_never_mutates(profile in profile_strategy(), steps in 0usize..20) {
        let mut tracker = UpgradeTracker::new(profile);
        for _ in 0..steps {
            if tracker.advance().is_err() {
                break;
            }
        }
        prop_assert!(!tracker.stages().iter().any(|s| s.is_mutating()));
    }

    /// RebootPolicy: to_string → parse round-trip is identity
    #[test]
    fn reboot_policy_roundtrip(policy in prop_oneof![
        Just(RebootPolicy::Ask),
        Just(RebootPolicy::Auto),
        Just(RebootPolicy::Never),
    ]) {
        let parsed: RebootPolicy = policy.to_string().parse().expect("parse");
        prop_assert_eq!(policy, parsed);
    }
}
