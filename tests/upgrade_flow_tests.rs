//! End-to-end tests of the upgrade flow
//!
//! The real phases run against a scripted `CommandRunner` that replays canned
//! apt/dpkg output and records every command line, and a scripted `Prompter`
//! with queued answers. File trees live in temp directories.
//!
//! These tests verify:
//! - nothing mutating runs when pre-flight fails or the operator declines
//! - the escalation tiers fire exactly as the captured output dictates
//! - cleanup and verification follow a successful retry, in order
//! - the sbc flow enables the framework-transition rule and writes its report

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use distupgrade::preflight::PreflightReport;
use distupgrade::{
    CommandOutput, CommandRunner, OsRelease, PackageCommand, Profile, Prompter, RebootPolicy,
    Reporter, Result, RunContext, UpgradeConfig, UpgradeError, UpgradeStage, Upgrader,
};
use tempfile::{tempdir, TempDir};

// =============================================================================
// Scripted collaborators
// =============================================================================

#[derive(Debug, Clone)]
struct Call {
    line: String,
    mutating: bool,
}

struct ScriptedRunner {
    calls: RefCell<Vec<Call>>,
    upgrades: RefCell<VecDeque<CommandOutput>>,
    installed: String,
    policy: String,
}

impl ScriptedRunner {
    fn new(upgrades: Vec<CommandOutput>) -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            upgrades: RefCell::new(upgrades.into()),
            installed: String::new(),
            policy: String::new(),
        }
    }

    fn with_installed(mut self, installed: &str) -> Self {
        self.installed = installed.to_string();
        self
    }

    fn with_policy(mut self, policy: &str) -> Self {
        self.policy = policy.to_string();
        self
    }

    fn lines(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.line.clone()).collect()
    }

    fn any_mutating(&self) -> bool {
        self.calls.borrow().iter().any(|c| c.mutating)
    }

    fn count(&self, suffix: &str) -> usize {
        self.lines().iter().filter(|l| l.ends_with(suffix)).count()
    }

    /// Commands issued after the first full-upgrade attempt.
    fn after_first_upgrade(&self) -> Vec<String> {
        let lines = self.lines();
        match lines.iter().position(|l| l.ends_with("full-upgrade")) {
            Some(i) => lines[i + 1..].to_vec(),
            None => vec![],
        }
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, cmd: &dyn PackageCommand) -> Result<CommandOutput> {
        let line = cmd.display();
        self.calls.borrow_mut().push(Call {
            line: line.clone(),
            mutating: cmd.is_mutating(),
        });

        if line.ends_with("full-upgrade") {
            return Ok(self
                .upgrades
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| CommandOutput::ok("0 upgraded, 0 newly installed")));
        }
        Ok(match cmd.program() {
            "dpkg-query" if line.contains("-f=${Version}") => CommandOutput::failed(1, ""),
            "dpkg-query" => CommandOutput::ok(self.installed.clone()),
            "apt-cache" => CommandOutput::ok(self.policy.clone()),
            "dpkg" if line.ends_with("--get-selections") => CommandOutput::ok("bash\tinstall\n"),
            _ => CommandOutput::ok(""),
        })
    }
}

struct ScriptedPrompter {
    answers: RefCell<VecDeque<bool>>,
    questions: RefCell<Vec<String>>,
}

impl ScriptedPrompter {
    fn new(answers: &[bool]) -> Self {
        Self {
            answers: RefCell::new(answers.iter().copied().collect()),
            questions: RefCell::new(Vec::new()),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&self, question: &str, _default: bool) -> bool {
        self.questions.borrow_mut().push(question.to_string());
        self.answers.borrow_mut().pop_front().unwrap_or(false)
    }
}

// =============================================================================
// Fixtures
// =============================================================================

struct Fixture {
    dir: TempDir,
    config: UpgradeConfig,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().expect("tempdir");
        let root = dir.path();
        let etc_apt = root.join("etc/apt");
        fs::create_dir_all(etc_apt.join("sources.list.d")).expect("mkdir");
        fs::write(
            etc_apt.join("sources.list"),
            "deb http://deb.debian.org/debian trixie main\n",
        )
        .expect("write sources.list");

        let config = UpgradeConfig {
            sources_list: etc_apt.join("sources.list"),
            sources_dir: etc_apt.join("sources.list.d"),
            backup_root: root.join("backups"),
            log_dir: root.join("logs"),
            reboot: RebootPolicy::Never,
            ..UpgradeConfig::default()
        };
        Self { dir, config }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn context(&self, profile: Profile) -> RunContext {
        RunContext::with_timestamp(
            "20261017-120000".into(),
            &self.config.log_dir,
            OsRelease::parse("PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nID=debian\nVERSION_CODENAME=bookworm\n"),
            profile,
            false,
            false,
        )
    }

    fn backups_exist(&self) -> bool {
        self.config.backup_root.exists()
    }
}

fn root_ok() -> PreflightReport {
    PreflightReport {
        is_root: true,
        ..PreflightReport::default()
    }
}

fn run(
    fixture: &Fixture,
    profile: Profile,
    runner: &ScriptedRunner,
    prompter: &ScriptedPrompter,
    preflight: PreflightReport,
) -> Result<distupgrade::UpgradeSummary> {
    let ctx = fixture.context(profile);
    let reporter = Reporter::quiet();
    Upgrader::new(&ctx, &fixture.config, runner, prompter, &reporter)
        .with_root(fixture.root())
        .with_preflight(preflight)
        .run()
}

// =============================================================================
// Blocking pre-conditions
// =============================================================================

#[test]
fn test_not_root_exits_before_any_mutating_command() {
    let fixture = Fixture::new();
    let runner = ScriptedRunner::new(vec![]);
    let prompter = ScriptedPrompter::new(&[true, true, true]);

    let err = run(&fixture, Profile::Generic, &runner, &prompter, PreflightReport::default())
        .expect_err("must fail");

    assert!(matches!(err, UpgradeError::Preflight(_)));
    assert_eq!(err.exit_code(), 3);
    assert!(!runner.any_mutating());
    assert!(!fixture.backups_exist());
    assert!(prompter.questions.borrow().is_empty());
}

#[test]
fn test_busy_package_manager_blocks_run() {
    let fixture = Fixture::new();
    let runner = ScriptedRunner::new(vec![]);
    let prompter = ScriptedPrompter::new(&[true]);
    let preflight = PreflightReport {
        is_root: true,
        busy_processes: vec![distupgrade::preflight::BusyProcess {
            pid: 812,
            name: "unattended-upgr".into(),
        }],
        ..PreflightReport::default()
    };

    let err = run(&fixture, Profile::Generic, &runner, &prompter, preflight).expect_err("busy");
    assert!(err.to_string().contains("unattended-upgr"));
    assert!(!runner.any_mutating());
}

#[test]
fn test_decline_runs_no_backup_update_or_upgrade() {
    let fixture = Fixture::new();
    let runner = ScriptedRunner::new(vec![]);
    let prompter = ScriptedPrompter::new(&[false]);

    let err = run(&fixture, Profile::Generic, &runner, &prompter, root_ok()).expect_err("declined");

    assert!(matches!(err, UpgradeError::Aborted(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(!fixture.backups_exist());
    assert!(!runner.any_mutating());
    assert!(!runner.lines().iter().any(|l| l == "apt-get update"));
    assert_eq!(runner.count("full-upgrade"), 0);
}

#[test]
fn test_decline_after_low_space_warning() {
    let fixture = Fixture::new();
    let runner = ScriptedRunner::new(vec![]);
    let prompter = ScriptedPrompter::new(&[false]);
    let preflight = PreflightReport {
        is_root: true,
        low_space: vec![distupgrade::preflight::SpaceShortfall {
            path: "/".into(),
            available_mb: 300,
            required_mb: 2048,
        }],
        ..PreflightReport::default()
    };

    let err = run(&fixture, Profile::Generic, &runner, &prompter, preflight).expect_err("declined");
    assert_eq!(err.exit_code(), 2);
    assert!(prompter.questions.borrow()[0].contains("Continue"));
    assert!(!runner.any_mutating());
}

// =============================================================================
// Escalation
// =============================================================================

#[test]
fn test_overwrite_conflict_retries_with_force_overwrite_once() {
    let fixture = Fixture::new();
    let runner = ScriptedRunner::new(vec![
        CommandOutput::failed(
            100,
            "dpkg: error processing archive x.deb (--unpack):\n trying to overwrite '/usr/share/foo', which is also in package bar",
        ),
        CommandOutput::ok("done"),
    ]);
    let prompter = ScriptedPrompter::new(&[true]);

    let summary = run(&fixture, Profile::Generic, &runner, &prompter, root_ok()).expect("upgrade");

    let forced: Vec<_> = runner
        .lines()
        .into_iter()
        .filter(|l| l.ends_with("full-upgrade") && l.contains("--force-overwrite"))
        .collect();
    assert_eq!(forced.len(), 1);
    assert_eq!(runner.count("full-upgrade"), 2);
    assert_eq!(summary.escalation.applied_rules, ["file-overwrite"]);
    assert!(!runner.after_first_upgrade().iter().any(|l| l.ends_with("-f install")));
}

#[test]
fn test_untriggered_failure_stops_after_first_attempt() {
    let fixture = Fixture::new();
    let runner = ScriptedRunner::new(vec![CommandOutput::failed(
        100,
        "E: Failed to fetch http://deb.debian.org/debian/pool/main/x.deb  404  Not Found",
    )]);
    let prompter = ScriptedPrompter::new(&[true]);

    let err = run(&fixture, Profile::Generic, &runner, &prompter, root_ok()).expect_err("fails");

    match &err {
        UpgradeError::UpgradeFailed { attempts, log } => {
            assert_eq!(*attempts, 1);
            assert!(log.ends_with("distupgrade-20261017-120000.log"));
        }
        other => panic!("expected UpgradeFailed, got {:?}", other),
    }
    assert_eq!(err.exit_code(), 4);
    assert_eq!(runner.count("full-upgrade"), 1);
    assert!(runner.after_first_upgrade().is_empty());
}

#[test]
fn test_unmet_dependencies_then_success_runs_cleanup_and_verification_in_order() {
    let fixture = Fixture::new();
    let runner = ScriptedRunner::new(vec![
        CommandOutput::failed(
            100,
            "The following packages have unmet dependencies:\n libfoo2 : Depends: libbar (>= 2) but it is not going to be installed\nE: Unmet dependencies.",
        ),
        CommandOutput::ok("Setting up libfoo2"),
    ]);
    let prompter = ScriptedPrompter::new(&[true]);

    let summary = run(&fixture, Profile::Generic, &runner, &prompter, root_ok()).expect("upgrade");

    let after = runner.after_first_upgrade();
    assert_eq!(after.iter().filter(|l| l.ends_with("-f install")).count(), 1);
    assert_eq!(after.iter().filter(|l| l.ends_with("full-upgrade")).count(), 1);
    assert!(summary.escalation.succeeded());
    assert_eq!(summary.escalation.attempts.len(), 2);
    assert!(summary.escalation.attempts[1].success);

    let position = |needle: &str| {
        after
            .iter()
            .position(|l| l == needle)
            .unwrap_or_else(|| panic!("{} not run", needle))
    };
    let fix = after
        .iter()
        .position(|l| l.ends_with("-f install"))
        .expect("fix-broken");
    let retry = after
        .iter()
        .position(|l| l.ends_with("full-upgrade"))
        .expect("retry");
    let autoremove = position("apt-get -y autoremove --purge");
    let clean = position("apt-get clean");
    let audit = position("dpkg --audit");
    let check = position("apt-get check");
    assert!(fix < retry);
    assert!(retry < autoremove);
    assert!(autoremove < clean);
    assert!(clean < audit);
    assert!(audit < check);

    let stages = &summary.stages;
    let stage_pos = |s: UpgradeStage| stages.iter().position(|x| *x == s).expect("stage");
    assert!(stage_pos(UpgradeStage::FullUpgrade) < stage_pos(UpgradeStage::Cleanup));
    assert!(stage_pos(UpgradeStage::Cleanup) < stage_pos(UpgradeStage::Verification));
    assert_eq!(stages.last(), Some(&UpgradeStage::Completed));
}

#[test]
fn test_custom_rule_from_config_file() {
    let mut fixture = Fixture::new();
    let path = fixture.root().join("rules.json");
    fs::write(
        &path,
        r#"{
            "conflict_rules": [
                {
                    "name": "interrupted-dpkg",
                    "patterns": ["dpkg was interrupted"],
                    "remedy": { "action": "configure_pending" }
                }
            ]
        }"#,
    )
    .expect("write rules");
    let loaded = UpgradeConfig::load_from_file(&path).expect("load");
    loaded.validate().expect("valid");
    fixture.config.conflict_rules = loaded.conflict_rules;

    let runner = ScriptedRunner::new(vec![
        CommandOutput::failed(100, "E: dpkg was interrupted, you must manually run 'dpkg --configure -a'"),
        CommandOutput::ok(""),
    ]);
    let prompter = ScriptedPrompter::new(&[true]);

    let summary = run(&fixture, Profile::Generic, &runner, &prompter, root_ok()).expect("upgrade");
    assert_eq!(summary.escalation.applied_rules, ["interrupted-dpkg"]);
    let after = runner.after_first_upgrade();
    assert!(after[0].ends_with("--configure -a"));
    assert!(!after[1].contains("--force-overwrite"));
}

// =============================================================================
// Backup and problematic packages
// =============================================================================

#[test]
fn test_backup_contains_sources_and_selections() {
    let fixture = Fixture::new();
    let runner = ScriptedRunner::new(vec![]);
    let prompter = ScriptedPrompter::new(&[true]);

    let summary = run(&fixture, Profile::Generic, &runner, &prompter, root_ok()).expect("upgrade");

    let dir = fixture
        .config
        .backup_root
        .join("distupgrade-backup-20261017-120000");
    assert_eq!(summary.backup.dir, dir);
    assert!(dir.join("sources.list").is_file());
    assert!(dir.join("packages.list").is_file());
}

#[test]
fn test_missing_sources_list_does_not_fail_run() {
    let fixture = Fixture::new();
    fs::remove_file(&fixture.config.sources_list).expect("remove");
    let runner = ScriptedRunner::new(vec![]);
    let prompter = ScriptedPrompter::new(&[true]);

    let summary = run(&fixture, Profile::Generic, &runner, &prompter, root_ok()).expect("upgrade");
    assert!(summary.backup.skipped.contains(&fixture.config.sources_list));
}

#[test]
fn test_problematic_packages_removed_on_confirmation() {
    let fixture = Fixture::new();
    let runner = ScriptedRunner::new(vec![])
        .with_installed("ureadahead\tinstalled\t0.100.0-21\nbash\tinstalled\t5.2-2\n");
    let prompter = ScriptedPrompter::new(&[true, true]);

    let summary = run(&fixture, Profile::Generic, &runner, &prompter, root_ok()).expect("upgrade");
    assert_eq!(summary.removed_packages, vec!["ureadahead".to_string()]);
    assert!(runner.lines().iter().any(|l| l == "apt-get -y purge ureadahead"));
}

#[test]
fn test_problematic_packages_kept_when_declined() {
    let fixture = Fixture::new();
    let runner = ScriptedRunner::new(vec![])
        .with_installed("ureadahead\tinstalled\t0.100.0-21\n");
    let prompter = ScriptedPrompter::new(&[true, false]);

    let summary = run(&fixture, Profile::Generic, &runner, &prompter, root_ok()).expect("upgrade");
    assert!(summary.removed_packages.is_empty());
    assert!(!runner.lines().iter().any(|l| l.contains("purge")));
    assert_eq!(runner.count("full-upgrade"), 1);
}

// =============================================================================
// Hardware-aware flow
// =============================================================================

const PLASMA_POLICY: &str = "plasma-workspace:\n  Installed: 4:5.27.5-2\n  Candidate: 4:6.3.4-1\n";

fn board_tree(root: &Path) {
    let write = |rel: &str, content: &[u8]| {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, content).expect("write");
    };
    write("proc/device-tree/model", b"Radxa ROCK 5B\0");
    write("proc/device-tree/compatible", b"radxa,rock-5b\0rockchip,rk3588\0");
    write(
        "etc/armbian-release",
        b"BOARD=rock-5b\nBOARD_NAME=\"Rock 5B\"\nBRANCH=vendor\nVERSION=24.2.1\nLINUXFAMILY=rk35xx\n",
    );
    write("boot/armbianEnv.txt", b"verbosity=1\n");
    write("boot/boot.scr", b"");
}

#[test]
fn test_sbc_transition_rule_purges_framework_packages() {
    let fixture = Fixture::new();
    board_tree(fixture.root());
    let runner = ScriptedRunner::new(vec![
        CommandOutput::failed(
            100,
            "plasma-workspace : Breaks: libkf5plasma5 (< 5.100)\nE: Error, pkgProblemResolver::Resolve generated breaks, this may be caused by held packages.",
        ),
        CommandOutput::ok(""),
    ])
    .with_installed("plasma-workspace\tinstalled\t4:5.27.5-2\nlibkf5plasma5\tinstalled\t5.107.0-1\n")
    .with_policy(PLASMA_POLICY);
    let prompter = ScriptedPrompter::new(&[true]);

    let summary = run(&fixture, Profile::Sbc, &runner, &prompter, root_ok()).expect("upgrade");

    assert_eq!(summary.escalation.applied_rules, ["framework-transition"]);
    assert!(runner
        .after_first_upgrade()
        .iter()
        .any(|l| l == "apt-get -y purge libkf5plasma5"));
    assert!(summary.escalation.attempts[1].force_overwrite);

    assert!(summary.stages.contains(&UpgradeStage::HardwareDetection));
    assert!(summary.stages.contains(&UpgradeStage::PlatformChecks));

    let report = summary.report_file.expect("report written");
    let text = fs::read_to_string(report).expect("read report");
    assert!(text.contains("Radxa ROCK 5B"));
    assert!(text.contains("transition 5 -> 6"));
    assert!(text.contains("framework-transition"));

    let hw_log = fixture
        .config
        .log_dir
        .join("distupgrade-hardware-20261017-120000.log");
    assert!(fs::read_to_string(hw_log).expect("hardware log").contains("Rockchip"));
}

#[test]
fn test_sbc_without_transition_keeps_default_rules() {
    let fixture = Fixture::new();
    board_tree(fixture.root());
    let runner = ScriptedRunner::new(vec![CommandOutput::failed(100, "Breaks: something")]);
    let prompter = ScriptedPrompter::new(&[true]);

    let err = run(&fixture, Profile::Sbc, &runner, &prompter, root_ok()).expect_err("fails");
    assert_eq!(err.exit_code(), 4);
    assert_eq!(runner.count("full-upgrade"), 1);
}

#[test]
fn test_generic_profile_skips_hardware_stages() {
    let fixture = Fixture::new();
    let runner = ScriptedRunner::new(vec![]);
    let prompter = ScriptedPrompter::new(&[true]);

    let summary = run(&fixture, Profile::Generic, &runner, &prompter, root_ok()).expect("upgrade");
    assert!(!summary.stages.iter().any(|s| s.is_sbc_only()));
    assert!(summary.report_file.is_none());
    assert!(!summary.rebooted);
}
