//! Supervisor Scenario Tests
//!
//! Runs small launch files whose units are `/bin/sh` scripts and checks the
//! lifecycle the supervisor drives them through.

#![cfg(unix)]

mod common;

use common::{read_lines, InstallTree};
use mission_launch::{LaunchError, LaunchOutcome, Supervisor, SupervisorConfig, UnitState};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::watch;

fn config() -> SupervisorConfig {
    SupervisorConfig {
        shutdown_timeout: Duration::from_millis(500),
        ready_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// A `/bin/sh -c` process unit
fn sh_unit(id: &str, script: &str, extra: &str) -> String {
    format!(
        "  - id: {id}\n    process: {{ executable: /bin/sh, args: [\"-c\", {script:?}] }}\n{extra}"
    )
}

fn launch_yaml(units: &[String]) -> String {
    format!("units:\n{}", units.concat())
}

fn supervisor(tree: &InstallTree, launch_file: &Path, config: SupervisorConfig) -> Supervisor {
    let plan = tree.plan(launch_file, &[]).unwrap();
    Supervisor::new(plan, tree.locator(), config)
}

async fn run_to_end(supervisor: &mut Supervisor) -> LaunchOutcome {
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    supervisor.launch(shutdown_rx.clone()).await.unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(10), supervisor.wait(shutdown_rx))
        .await
        .unwrap();
    supervisor.shutdown().await;
    outcome
}

#[tokio::test]
async fn test_units_start_in_declaration_order_with_exit_readiness() {
    let tree = InstallTree::new();
    let out = tree.out("order.txt");
    let out = out.display();
    let file = tree.launch_file(
        "order.launch.yaml",
        &launch_yaml(&[
            sh_unit("first", &format!("sleep 0.2; echo first >> {out}"), "    ready: { kind: exited }\n"),
            sh_unit("second", &format!("echo second >> {out}"), "    depends_on: [first]\n"),
        ]),
    );

    let mut supervisor = supervisor(&tree, &file, config());
    assert_eq!(run_to_end(&mut supervisor).await, LaunchOutcome::Completed);

    assert_eq!(read_lines(&tree.out("order.txt")), vec!["first", "second"]);
    assert!(supervisor.all_succeeded());
    assert_eq!(supervisor.state("second"), Some(&UnitState::Exited(Some(0))));
}

#[tokio::test]
async fn test_required_spawn_failure_cancels_remaining_units() {
    let tree = InstallTree::new();
    let marker = tree.out("never.txt");
    let file = tree.launch_file(
        "spawn.launch.yaml",
        &format!(
            "units:\n  - id: database\n    process: {{ executable: /nonexistent/typedb }}\n    required: true\n{}",
            sh_unit("mission", &format!("touch {}", marker.display()), "")
        ),
    );

    let mut supervisor = supervisor(&tree, &file, config());
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    let err = supervisor.launch(shutdown_rx).await.unwrap_err();
    supervisor.shutdown().await;

    assert!(matches!(err, LaunchError::Spawn { ref unit, .. } if unit == "database"));
    assert!(!err.is_configuration());
    assert!(matches!(supervisor.state("database"), Some(UnitState::Failed(_))));
    assert_eq!(supervisor.state("mission"), Some(&UnitState::Cancelled));
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_failed_sibling_does_not_cancel_others() {
    let tree = InstallTree::new();
    let out = tree.out("siblings.txt");
    let file = tree.launch_file(
        "siblings.launch.yaml",
        &launch_yaml(&[
            sh_unit("flaky", "exit 4", ""),
            sh_unit("steady", &format!("sleep 0.2; echo done >> {}", out.display()), ""),
        ]),
    );

    let mut supervisor = supervisor(&tree, &file, config());
    assert_eq!(run_to_end(&mut supervisor).await, LaunchOutcome::Completed);

    assert_eq!(supervisor.state("flaky"), Some(&UnitState::Exited(Some(4))));
    assert_eq!(supervisor.state("steady"), Some(&UnitState::Exited(Some(0))));
    assert_eq!(read_lines(&out), vec!["done"]);
    assert!(!supervisor.all_succeeded());
}

#[tokio::test]
async fn test_required_unit_exit_fails_launch() {
    let tree = InstallTree::new();
    let file = tree.launch_file(
        "required.launch.yaml",
        &launch_yaml(&[
            sh_unit("bringup", "sleep 0.3; exit 2", "    required: true\n"),
            sh_unit("mission", "sleep 30", ""),
        ]),
    );

    let mut supervisor = supervisor(&tree, &file, config());
    let outcome = run_to_end(&mut supervisor).await;

    assert_eq!(
        outcome,
        LaunchOutcome::Failed {
            unit: "bringup".into(),
            cause: "exited with code 2".into()
        }
    );
    assert!(supervisor.states().iter().all(|(_, s)| s.is_terminal()));
}

#[tokio::test]
async fn test_shutdown_terminates_running_units_within_grace() {
    let tree = InstallTree::new();
    let file = tree.launch_file(
        "long.launch.yaml",
        &launch_yaml(&[
            sh_unit("a", "sleep 30", ""),
            sh_unit("b", "sleep 30", ""),
            sh_unit("stubborn", "trap '' TERM; sleep 30", ""),
        ]),
    );

    let mut supervisor = supervisor(&tree, &file, config());
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    supervisor.launch(shutdown_rx.clone()).await.unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = shutdown_tx.send(());
    });
    assert_eq!(supervisor.wait(shutdown_rx).await, LaunchOutcome::Interrupted);

    let begin = Instant::now();
    supervisor.shutdown().await;
    // grace period plus the abort margin
    assert!(begin.elapsed() < Duration::from_millis(500) + Duration::from_secs(2));

    for (id, state) in supervisor.states() {
        assert!(state.is_terminal(), "unit '{}' left in state {}", id, state);
        assert_ne!(state, UnitState::Running);
    }
}

#[tokio::test]
async fn test_shutdown_before_launch_starts_nothing() {
    let tree = InstallTree::new();
    let marker = tree.out("started.txt");
    let file = tree.launch_file(
        "early.launch.yaml",
        &launch_yaml(&[sh_unit("a", &format!("touch {}", marker.display()), "")]),
    );

    let mut supervisor = supervisor(&tree, &file, config());
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    shutdown_tx.send(()).unwrap();

    supervisor.launch(shutdown_rx.clone()).await.unwrap();
    assert_eq!(supervisor.wait(shutdown_rx).await, LaunchOutcome::Interrupted);
    supervisor.shutdown().await;

    assert_eq!(supervisor.state("a"), Some(&UnitState::Cancelled));
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_pattern_readiness_gates_dependent() {
    let tree = InstallTree::new();
    let out = tree.out("ready.txt");
    let out = out.display();
    let file = tree.launch_file(
        "pattern.launch.yaml",
        &launch_yaml(&[
            sh_unit(
                "typedb",
                &format!("sleep 0.2; echo 'TypeDB server is ready'; echo db >> {out}; sleep 30"),
                "    ready: { kind: pattern, regex: \"server is ready\" }\n",
            ),
            sh_unit("rosa", &format!("echo rosa >> {out}"), "    depends_on: [typedb]\n"),
        ]),
    );

    let mut supervisor = supervisor(&tree, &file, config());
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    supervisor.launch(shutdown_rx.clone()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    shutdown_tx.send(()).unwrap();
    supervisor.wait(shutdown_rx).await;
    supervisor.shutdown().await;

    let lines = read_lines(&tree.out("ready.txt"));
    assert_eq!(lines.len(), 2);
    assert!(lines.contains(&"rosa".to_string()));
    assert_eq!(supervisor.state("rosa"), Some(&UnitState::Exited(Some(0))));
}

#[tokio::test]
async fn test_dependency_never_ready_times_out() {
    let tree = InstallTree::new();
    let file = tree.launch_file(
        "timeout.launch.yaml",
        &launch_yaml(&[
            sh_unit(
                "typedb",
                "sleep 30",
                "    ready: { kind: pattern, regex: \"never printed\" }\n",
            ),
            sh_unit("rosa", "true", "    depends_on: [typedb]\n    required: true\n"),
        ]),
    );

    let config = SupervisorConfig {
        ready_timeout: Duration::from_millis(300),
        ..config()
    };
    let mut supervisor = supervisor(&tree, &file, config);
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    let err = supervisor.launch(shutdown_rx).await.unwrap_err();
    supervisor.shutdown().await;

    assert!(matches!(
        err,
        LaunchError::DependencyFailed { ref unit, ref dependency, .. } if unit == "rosa" && dependency == "typedb"
    ));
    assert!(matches!(supervisor.state("rosa"), Some(UnitState::Failed(_))));
}

#[tokio::test]
async fn test_parameters_and_identity_reach_the_process() {
    let tree = InstallTree::new();
    let out = tree.out("argv.txt");
    let file = tree.launch_file(
        "params.launch.yaml",
        &format!(
            r#"
units:
  - id: metrics
    process:
      executable: /bin/sh
      name: mission_metrics
      args: ["-c", "printf '%s\n' \"$@\" > {out}; echo $LAUNCH_NODE_NAME >> {out}; echo $MISSION >> {out}", "sh"]
    parameters:
      values:
        adaptation_manager: rosa
        time_limit: 300
    env:
      MISSION: inspection
"#,
            out = out.display()
        ),
    );

    let mut supervisor = supervisor(&tree, &file, config());
    assert_eq!(run_to_end(&mut supervisor).await, LaunchOutcome::Completed);

    assert_eq!(
        read_lines(&out),
        vec![
            "--adaptation_manager",
            "rosa",
            "--time_limit",
            "300",
            "mission_metrics",
            "inspection"
        ]
    );
}

#[tokio::test]
async fn test_include_runs_nested_launch() {
    let tree = InstallTree::new();
    let out = tree.out("include.txt");
    let out = out.display();
    tree.write(
        "rosa_bringup",
        "launch/rosa_bringup.launch.yaml",
        &format!(
            "args:\n  database_name: {{}}\n{}",
            launch_yaml(&[sh_unit(
                "typedb",
                &format!("echo $(arg database_name) >> {out}"),
                ""
            )])
        ),
    );
    let file = tree.launch_file(
        "parent.launch.yaml",
        &format!(
            r#"
units:
  - id: bringup
    include: {{ package: rosa_bringup, file: launch/rosa_bringup.launch.yaml }}
    args: {{ database_name: suave_db }}
    ready: {{ kind: exited }}
    required: true
{}"#,
            sh_unit("mission", &format!("echo mission >> {out}"), "    depends_on: [bringup]\n")
        ),
    );

    let mut supervisor = supervisor(&tree, &file, config());
    assert_eq!(run_to_end(&mut supervisor).await, LaunchOutcome::Completed);

    assert_eq!(read_lines(&tree.out("include.txt")), vec!["suave_db", "mission"]);
    assert_eq!(supervisor.state("bringup"), Some(&UnitState::Exited(Some(0))));
}

#[tokio::test]
async fn test_failing_required_include_fails_launch() {
    let tree = InstallTree::new();
    tree.write(
        "rosa_bringup",
        "launch/rosa_bringup.launch.yaml",
        &launch_yaml(&[sh_unit("typedb", "sleep 0.3; exit 1", "    required: true\n")]),
    );
    let file = tree.launch_file(
        "parent.launch.yaml",
        &format!(
            "units:\n  - id: bringup\n    include: {{ package: rosa_bringup, file: launch/rosa_bringup.launch.yaml }}\n    required: true\n{}",
            sh_unit("mission", "sleep 30", "")
        ),
    );

    let mut supervisor = supervisor(&tree, &file, config());
    let outcome = run_to_end(&mut supervisor).await;

    assert!(matches!(outcome, LaunchOutcome::Failed { ref unit, .. } if unit == "bringup"));
    assert!(matches!(supervisor.state("bringup"), Some(UnitState::Failed(_))));
}

#[tokio::test]
async fn test_nested_optional_failure_does_not_fail_required_include() {
    let tree = InstallTree::new();
    let out = tree.out("optional.txt");
    let out = out.display();
    tree.write(
        "rosa_bringup",
        "launch/rosa_bringup.launch.yaml",
        &launch_yaml(&[
            sh_unit("flaky_monitor", "exit 3", ""),
            sh_unit("typedb", &format!("sleep 0.2; echo typedb >> {out}"), ""),
        ]),
    );
    let file = tree.launch_file(
        "parent.launch.yaml",
        &format!(
            "units:\n  - id: bringup\n    include: {{ package: rosa_bringup, file: launch/rosa_bringup.launch.yaml }}\n    ready: {{ kind: exited }}\n    required: true\n{}",
            sh_unit("mission", &format!("echo mission >> {out}"), "    depends_on: [bringup]\n")
        ),
    );

    let mut supervisor = supervisor(&tree, &file, config());
    assert_eq!(run_to_end(&mut supervisor).await, LaunchOutcome::Completed);

    assert_eq!(read_lines(&tree.out("optional.txt")), vec!["typedb", "mission"]);
    assert_eq!(supervisor.state("bringup"), Some(&UnitState::Exited(Some(0))));
    assert!(supervisor.all_succeeded());
}

#[tokio::test]
async fn test_self_include_is_depth_limited() {
    let tree = InstallTree::new();
    let file = tree.launch_file(
        "loop.launch.yaml",
        "units:\n  - id: again\n    include: { file: loop.launch.yaml }\n    required: true\n",
    );

    let config = SupervisorConfig {
        max_include_depth: 3,
        ..config()
    };
    let mut supervisor = supervisor(&tree, &file, config);
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    // The failure surfaces either while launching or while waiting
    let cause = match supervisor.launch(shutdown_rx.clone()).await {
        Err(e) => e.to_string(),
        Ok(()) => match tokio::time::timeout(Duration::from_secs(10), supervisor.wait(shutdown_rx))
            .await
            .unwrap()
        {
            LaunchOutcome::Failed { unit, cause } => {
                assert_eq!(unit, "again");
                cause
            }
            other => panic!("unexpected outcome: {:?}", other),
        },
    };
    supervisor.shutdown().await;

    assert!(cause.contains("include depth exceeds 3"), "{}", cause);
    assert!(matches!(supervisor.state("again"), Some(UnitState::Failed(_))));
}
