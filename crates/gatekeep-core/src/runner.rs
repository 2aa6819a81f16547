use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use crate::collaborator::{CancelToken, CheckError, CheckInvocation, CollaboratorRegistry};
use crate::config::ExecutionSettings;
use crate::determinism::DeterminismComparator;
use crate::error::{ContractDriftError, GatekeepError, Result};
use crate::models::{
    BlockKind, CheckArtifact, CheckKind, CheckReport, CheckResult, CheckSpec, CheckStatus,
    DEFAULT_SUBJECT, DeterminismPin, DeterminismRun, Gate, GateStatus, PredicateSpec,
    SubjectReport,
};

mod dispatch;
mod predicate;

pub use predicate::{AllHardChecks, HardChecksWithBudget, PassPredicate, PredicateRegistry};

/// Name of the single hard check a determinism gate reports.
pub const DETERMINISM_CHECK: &str = "determinism";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    pub default_timeout: Duration,
    pub max_parallel: usize,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        ExecutionSettings::default().into()
    }
}

impl From<ExecutionSettings> for RunnerSettings {
    fn from(value: ExecutionSettings) -> Self {
        Self {
            default_timeout: value.default_timeout(),
            max_parallel: value.max_parallel_checks.max(1),
        }
    }
}

/// Why a gate stopped before all of its checks ran.
#[derive(Debug, Clone, PartialEq)]
pub struct GateAbort {
    pub kind: BlockKind,
    pub message: String,
    pub drift: Option<ContractDriftError>,
}

impl GateAbort {
    fn drift(drift: ContractDriftError) -> Self {
        Self {
            kind: BlockKind::ContractDrift,
            message: format!("contract drift: {drift}"),
            drift: Some(drift),
        }
    }

    fn from_precondition(err: GatekeepError) -> Self {
        match err {
            GatekeepError::ContractDrift(drift) => Self::drift(drift),
            other => Self {
                kind: BlockKind::Prerequisite,
                message: other.to_string(),
                drift: None,
            },
        }
    }

    fn from_check_error(err: CheckError) -> Self {
        match err {
            CheckError::ContractDrift(drift) => Self::drift(drift),
            other => Self {
                kind: BlockKind::Prerequisite,
                message: other.to_string(),
                drift: None,
            },
        }
    }
}

/// Output of one gate attempt, handed to the evidence recorder.
#[derive(Debug, Clone)]
pub struct GateRun {
    pub result: CheckResult,
    pub artifacts: Vec<CheckArtifact>,
    pub abort: Option<GateAbort>,
}

impl GateRun {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.abort.is_none() && self.result.status.is_passed()
    }
}

#[derive(Default)]
struct PassOutput {
    reports: Vec<CheckReport>,
    artifacts: Vec<CheckArtifact>,
    abort: Option<GateAbort>,
}

impl PassOutput {
    /// Re-labels one determinism run: its checks become informational.
    fn prefixed(self, prefix: &str) -> Self {
        Self {
            reports: self
                .reports
                .into_iter()
                .map(|report| CheckReport {
                    name: format!("{prefix}/{}", report.name),
                    hard: false,
                    ..report
                })
                .collect(),
            artifacts: self
                .artifacts
                .into_iter()
                .map(|artifact| CheckArtifact {
                    name: format!("{prefix}/{}", artifact.name),
                    content: artifact.content,
                })
                .collect(),
            abort: self.abort,
        }
    }

    fn absorb(&mut self, other: Self) {
        self.reports.extend(other.reports);
        self.artifacts.extend(other.artifacts);
        if self.abort.is_none() {
            self.abort = other.abort;
        }
    }
}

struct CheckRun {
    report: CheckReport,
    artifacts: Vec<CheckArtifact>,
    fatal: Option<CheckError>,
}

/// Collaborator-chosen artifact name reduced to plain `/`-separated segments:
/// whitespace and control characters become `_`, `.`/`..`/empty segments go.
fn storable_artifact_name(raw: &str) -> String {
    let segments = raw
        .split(['/', '\\'])
        .filter(|segment| !matches!(*segment, "" | "." | ".."))
        .map(|segment| {
            segment
                .chars()
                .map(|ch| {
                    if ch.is_whitespace() || ch.is_control() {
                        '_'
                    } else {
                        ch
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>();
    if segments.is_empty() {
        "artifact".to_string()
    } else {
        segments.join("/")
    }
}

fn collides(taken: &BTreeSet<String>, key: &str) -> bool {
    taken.iter().any(|other| {
        other == key
            || other.strip_prefix(key).is_some_and(|rest| rest.starts_with('/'))
            || key.strip_prefix(other.as_str()).is_some_and(|rest| rest.starts_with('/'))
    })
}

/// Places `name` under `prefix` without clashing with a taken key, either
/// as the same file or as a file that is another's directory. Clashing
/// names are flattened and get a `.2`, `.3`, ... suffix.
fn unique_artifact_key(taken: &mut BTreeSet<String>, prefix: &str, name: &str) -> String {
    let mut key = format!("{prefix}/{name}");
    let flat = name.replace('/', "_");
    let mut suffix = 2_u32;
    while collides(taken, &key) {
        key = format!("{prefix}/{flat}.{suffix}");
        suffix += 1;
    }
    taken.insert(key.clone());
    key
}

/// Executes one gate's checks and applies its pass predicate.
#[derive(Debug, Clone, Default)]
pub struct GateRunner {
    collaborators: CollaboratorRegistry,
    predicates: PredicateRegistry,
    settings: RunnerSettings,
}

impl GateRunner {
    #[must_use]
    pub fn new(collaborators: CollaboratorRegistry) -> Self {
        Self {
            collaborators,
            predicates: PredicateRegistry::default(),
            settings: RunnerSettings::default(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: RunnerSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_predicate(mut self, predicate: std::sync::Arc<dyn PassPredicate>) -> Self {
        self.predicates.register(predicate);
        self
    }

    #[must_use]
    pub const fn settings(&self) -> RunnerSettings {
        self.settings
    }

    /// Rejects gates whose pass rule cannot be resolved.
    pub fn validate(&self, gate: &Gate) -> Result<()> {
        self.predicates.resolve(&gate.predicate).map(|_| ())
    }

    pub fn run(&self, gate: &Gate) -> GateRun {
        self.run_guarded(gate, &|| Ok(()))
    }

    /// Runs `gate`, calling `precondition` before every check. A failing
    /// precondition cancels the gate: in-flight work is signalled and the
    /// remaining checks are recorded as cancelled.
    pub fn run_guarded(&self, gate: &Gate, precondition: &dyn Fn() -> Result<()>) -> GateRun {
        let started_at = Utc::now().to_rfc3339();
        let cancel = CancelToken::new();
        let output = match &gate.determinism {
            None => self.run_pass(gate, precondition, &cancel, None),
            Some(pin) => self.run_determinism(gate, pin, precondition, &cancel),
        };
        let ended_at = Utc::now().to_rfc3339();
        self.finish(gate, output, started_at, ended_at)
    }

    fn run_pass(
        &self,
        gate: &Gate,
        precondition: &dyn Fn() -> Result<()>,
        cancel: &CancelToken,
        determinism: Option<(&DeterminismPin, u8)>,
    ) -> PassOutput {
        let mut output = PassOutput::default();
        for spec in &gate.checks {
            if output.abort.is_none()
                && let Err(err) = precondition()
            {
                cancel.cancel();
                output.abort = Some(GateAbort::from_precondition(err));
            }
            if let Some(abort) = &output.abort {
                output
                    .reports
                    .push(CheckReport::cancelled(spec, &abort.message));
                continue;
            }

            let run = self.run_check(gate, spec, cancel, determinism);
            output.reports.push(run.report);
            output.artifacts.extend(run.artifacts);
            if let Some(fatal) = run.fatal {
                cancel.cancel();
                output.abort = Some(GateAbort::from_check_error(fatal));
            }
        }
        output
    }

    fn run_check(
        &self,
        gate: &Gate,
        spec: &CheckSpec,
        cancel: &CancelToken,
        determinism: Option<(&DeterminismPin, u8)>,
    ) -> CheckRun {
        let timeout = spec
            .timeout_ms
            .map_or(self.settings.default_timeout, Duration::from_millis);
        let declared = !spec.subjects.is_empty();
        let subjects = if declared {
            spec.subjects.clone()
        } else {
            vec![DEFAULT_SUBJECT.to_string()]
        };
        let template = CheckInvocation {
            gate_id: gate.id.clone(),
            check_name: spec.name.clone(),
            kind: spec.kind.clone(),
            subject: None,
            params: spec.params.clone(),
            timeout,
            determinism: determinism.map(|(pin, _)| pin.clone()),
            run_index: determinism.map(|(_, index)| index),
            cancel: cancel.clone(),
        };
        let runs = dispatch::dispatch(
            self.collaborators.get(&spec.kind),
            &template,
            &subjects,
            declared,
            self.settings.max_parallel,
        );

        let mut report = CheckReport {
            name: spec.name.clone(),
            kind: spec.kind.clone(),
            hard: spec.hard,
            status: CheckStatus::Completed,
            total: 0,
            passed: 0,
            failed: 0,
            threshold: spec.threshold,
            met: false,
            subjects: BTreeMap::new(),
            detail: BTreeMap::new(),
            failing_ids: BTreeSet::new(),
        };
        let mut artifacts = Vec::new();
        let mut taken = BTreeSet::new();
        let mut fatal = None;
        for run in runs {
            report.status = report.status.worst(run.report.status);
            report.total = report.total.saturating_add(run.report.total);
            report.passed = report.passed.saturating_add(run.report.passed);
            report.failed = report.failed.saturating_add(run.report.failed);
            if let Some(outcome) = run.outcome {
                for (key, value) in outcome.detail {
                    let key = if declared {
                        format!("{}.{key}", run.subject)
                    } else {
                        key
                    };
                    report.detail.insert(key, value);
                }
                report.failing_ids.extend(outcome.failing_ids);
                let prefix = format!("{}/{}", spec.name, run.subject);
                for artifact in outcome.artifacts {
                    let name = storable_artifact_name(&artifact.name);
                    artifacts.push(CheckArtifact {
                        name: unique_artifact_key(&mut taken, &prefix, &name),
                        content: artifact.content,
                    });
                }
            }
            if fatal.is_none() {
                fatal = run.fatal;
            }
            report.subjects.insert(run.subject, run.report);
        }
        report.met = report.status == CheckStatus::Completed
            && spec.threshold.map_or(report.failed == 0, |threshold| {
                threshold.is_met(report.total, report.failed)
            });

        CheckRun {
            report,
            artifacts,
            fatal,
        }
    }

    /// Runs the declared checks twice under `pin`; the comparison of the two
    /// runs is the gate's only hard check.
    fn run_determinism(
        &self,
        gate: &Gate,
        pin: &DeterminismPin,
        precondition: &dyn Fn() -> Result<()>,
        cancel: &CancelToken,
    ) -> PassOutput {
        let first = self.run_pass(gate, precondition, cancel, Some((pin, 1)));
        let second = first
            .abort
            .is_none()
            .then(|| self.run_pass(gate, precondition, cancel, Some((pin, 2))));

        let verdict = determinism_report(pin, &first, second.as_ref());
        let mut output = first.prefixed("run1");
        if let Some(second) = second {
            output.absorb(second.prefixed("run2"));
        }
        output.reports.push(verdict);
        output
    }

    fn finish(
        &self,
        gate: &Gate,
        output: PassOutput,
        started_at: String,
        ended_at: String,
    ) -> GateRun {
        let (total, passed, failed) =
            output
                .reports
                .iter()
                .fold((0_u64, 0_u64, 0_u64), |(total, passed, failed), check| {
                    (
                        total.saturating_add(check.total),
                        passed.saturating_add(check.passed),
                        failed.saturating_add(check.failed),
                    )
                });
        let mut result = CheckResult {
            gate_id: gate.id.clone(),
            total,
            passed,
            failed,
            status: GateStatus::Failed,
            predicate: predicate_label(&gate.predicate),
            checks: output.reports,
            detail: BTreeMap::new(),
            started_at,
            ended_at,
            aborted: output.abort.as_ref().map(|abort| abort.message.clone()),
        };

        let verdict = match self.predicates.resolve(&gate.predicate) {
            Ok(predicate) => {
                result.predicate = predicate.name().to_string();
                predicate.evaluate(&result)
            }
            Err(err) => {
                result
                    .detail
                    .insert("predicate_error".to_string(), json!(err.to_string()));
                false
            }
        };
        let has_hard_check = result.hard_checks().next().is_some();
        let floor = predicate::zero_tolerance_floor(&result, &gate.predicate);
        result.status = GateStatus::from_passed(
            verdict && floor && has_hard_check && result.aborted.is_none(),
        );

        let hard_failed = result
            .failed_hard_checks()
            .into_iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        let informational = result
            .checks
            .iter()
            .filter(|check| !check.hard)
            .map(|check| {
                (
                    check.name.clone(),
                    json!({
                        "status": check.status.as_str(),
                        "total": check.total,
                        "passed": check.passed,
                        "failed": check.failed,
                        "met": check.met,
                    }),
                )
            })
            .collect::<serde_json::Map<_, _>>();
        result
            .detail
            .insert("predicate".to_string(), json!(result.predicate));
        if let PredicateSpec::HardChecksWithBudget {
            max_failed_hard_checks,
        } = gate.predicate
        {
            result.detail.insert(
                "max_failed_hard_checks".to_string(),
                json!(max_failed_hard_checks),
            );
        }
        result
            .detail
            .insert("hard_checks_failed".to_string(), json!(hard_failed));
        result.detail.insert(
            "informational".to_string(),
            serde_json::Value::Object(informational),
        );

        GateRun {
            result,
            artifacts: output.artifacts,
            abort: output.abort,
        }
    }
}

fn predicate_label(spec: &PredicateSpec) -> String {
    match spec {
        PredicateSpec::AllHardChecks => "all_hard_checks".to_string(),
        PredicateSpec::HardChecksWithBudget { .. } => "hard_checks_with_budget".to_string(),
        PredicateSpec::Named { name } => name.clone(),
    }
}

fn determinism_run(pin: &DeterminismPin, index: u8, output: &PassOutput) -> DeterminismRun {
    let mut run = DeterminismRun {
        run_index: index,
        pass_count: 0,
        fail_count: 0,
        failing_ids: BTreeSet::new(),
        config_fingerprint: pin.fingerprint(),
        pinned: pin.is_effective(),
    };
    for report in &output.reports {
        run.pass_count = run.pass_count.saturating_add(report.passed);
        run.fail_count = run.fail_count.saturating_add(report.failed);
        run.failing_ids
            .extend(report.failing_ids.iter().map(|id| format!("{}:{id}", report.name)));
    }
    run
}

fn determinism_report(
    pin: &DeterminismPin,
    first: &PassOutput,
    second: Option<&PassOutput>,
) -> CheckReport {
    let spec = CheckSpec::hard(
        DETERMINISM_CHECK,
        CheckKind::Custom(DETERMINISM_CHECK.to_string()),
    );
    let Some(second) = second else {
        let reason = first
            .abort
            .as_ref()
            .map_or("first run aborted", |abort| abort.message.as_str());
        return CheckReport::cancelled(&spec, reason);
    };

    let incomplete = first
        .reports
        .iter()
        .chain(&second.reports)
        .map(|report| report.status)
        .fold(CheckStatus::Completed, CheckStatus::worst);
    let mut detail = BTreeMap::new();
    let (status, deterministic) = if second.abort.is_some() {
        detail.insert("error".to_string(), json!("second run aborted"));
        (CheckStatus::Cancelled, false)
    } else if incomplete != CheckStatus::Completed {
        detail.insert(
            "error".to_string(),
            json!(format!(
                "a run did not complete ({}), outcomes are not comparable",
                incomplete.as_str()
            )),
        );
        (incomplete, false)
    } else {
        match DeterminismComparator::compare(
            determinism_run(pin, 1, first),
            determinism_run(pin, 2, second),
        ) {
            Ok(verdict) => {
                let deterministic = verdict.deterministic;
                detail.insert(
                    "verdict".to_string(),
                    serde_json::to_value(&verdict).unwrap_or_default(),
                );
                (CheckStatus::Completed, deterministic)
            }
            Err(err) => {
                detail.insert("error".to_string(), json!(err.to_string()));
                (CheckStatus::Errored, false)
            }
        }
    };

    let subject = SubjectReport {
        status,
        total: 1,
        passed: u64::from(deterministic),
        failed: u64::from(!deterministic),
        error: None,
    };
    CheckReport {
        name: spec.name,
        kind: spec.kind,
        hard: true,
        status,
        total: 1,
        passed: subject.passed,
        failed: subject.failed,
        threshold: None,
        met: deterministic && status == CheckStatus::Completed,
        subjects: [(DEFAULT_SUBJECT.to_string(), subject)].into_iter().collect(),
        detail,
        failing_ids: BTreeSet::new(),
    }
}
