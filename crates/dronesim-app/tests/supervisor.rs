//! Supervision of real child processes speaking the control protocol.

use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use dronesim_app::signals::{self, Pending};
use dronesim_app::supervisor::{
    supervise, ProcessState, Supervisor, SupervisorConfig, TeardownCause, WorkerSpec,
};
use dronesim_core::control::ControlMessage;
use dronesim_core::enums::Role;
use dronesim_core::types::GameBounds;

/// Announces itself, answers pings, leaves on terminate.
const HEALTHY: &str = r#"echo "ready $$"
while read cmd; do
  case "$cmd" in
    ping) echo "pong $$" ;;
    terminate) exit 0 ;;
  esac
done"#;

/// Healthy, but exits with a distinct code for each command it is told.
const LISTENER: &str = r#"printf '\377\n'
echo "ready $$"
while read cmd; do
  case "$cmd" in
    ping) echo "pong $$" ;;
    regenerate) exit 7 ;;
    "resize 90, 30") exit 5 ;;
    terminate) exit 0 ;;
  esac
done"#;

fn config(heartbeat_timeout: Duration) -> SupervisorConfig {
    SupervisorConfig {
        heartbeat_interval: Duration::from_millis(50),
        heartbeat_timeout,
        startup_timeout: Duration::from_secs(2),
        teardown_grace: Duration::from_millis(500),
    }
}

fn sh(role: Role, script: &str) -> WorkerSpec {
    let mut command = Command::new("/bin/sh");
    command.arg("-c").arg(script);
    WorkerSpec { role, command }
}

#[test]
fn test_worker_failure_tears_down_the_group() {
    let report = supervise(
        config(Duration::from_secs(5)),
        vec![
            sh(Role::Router, HEALTHY),
            sh(Role::Physics, "echo \"ready $$\"; sleep 0.3; exit 1"),
            sh(Role::Viewer, HEALTHY),
        ],
    );

    assert!(matches!(
        report.cause,
        TeardownCause::WorkerExited {
            role: Role::Physics,
            code: Some(1),
            ..
        }
    ));
    assert_eq!(report.outcomes.len(), 3);
    for outcome in &report.outcomes {
        assert!(!outcome.killed, "{outcome:?}");
        let expected = if outcome.role == Role::Physics { 1 } else { 0 };
        assert_eq!(outcome.code, Some(expected), "{outcome:?}");
    }
}

#[test]
fn test_killed_worker_is_noticed() {
    let mut supervisor = Supervisor::new(config(Duration::from_secs(5)));
    for role in [Role::Router, Role::Physics, Role::Viewer] {
        supervisor.launch(sh(role, HEALTHY)).unwrap();
    }
    assert!(supervisor
        .records()
        .iter()
        .all(|r| r.state == ProcessState::Alive));

    let victim = supervisor.records()[1].pid;
    assert_eq!(unsafe { libc::kill(victim as libc::pid_t, libc::SIGKILL) }, 0);

    let started = Instant::now();
    let cause = supervisor.monitor();
    assert_eq!(
        cause,
        TeardownCause::WorkerExited {
            role: Role::Physics,
            pid: victim,
            code: None,
        }
    );
    assert!(started.elapsed() < Duration::from_secs(2));

    let outcomes = supervisor.teardown();
    assert_eq!(outcomes[0].code, Some(0));
    assert_eq!(outcomes[1].code, None);
    assert_eq!(outcomes[2].code, Some(0));
    assert_eq!(supervisor.records()[1].state, ProcessState::Dead);
    assert_eq!(supervisor.records()[0].state, ProcessState::Terminated);
}

#[test]
fn test_silent_worker_hits_the_liveness_timeout() {
    let timeout = Duration::from_millis(500);
    let mut supervisor = Supervisor::new(config(timeout));
    supervisor.launch(sh(Role::Router, HEALTHY)).unwrap();
    let silent = supervisor
        .launch(sh(Role::TargetGenerator, "echo \"ready $$\"; exec sleep 30"))
        .unwrap();

    let started = Instant::now();
    let cause = supervisor.monitor();
    assert_eq!(
        cause,
        TeardownCause::LivenessTimeout {
            role: Role::TargetGenerator,
            pid: silent,
        }
    );
    assert!(started.elapsed() < timeout * 4);

    let outcomes = supervisor.teardown();
    assert_eq!(outcomes[0].code, Some(0));
    assert!(!outcomes[0].killed);
    assert!(outcomes[1].killed);
}

#[test]
fn test_startup_failure_stops_the_launch_sequence() {
    let report = supervise(
        config(Duration::from_secs(5)),
        vec![
            sh(Role::Router, HEALTHY),
            sh(Role::Physics, "exit 2"),
            sh(Role::Viewer, HEALTHY),
        ],
    );

    match &report.cause {
        TeardownCause::StartupFailed { role, .. } => assert_eq!(*role, Role::Physics),
        other => panic!("unexpected cause {other:?}"),
    }
    // The viewer was never launched.
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.outcomes[0].code, Some(0));
    assert_eq!(report.outcomes[1].code, Some(2));
}

#[test]
fn test_worker_that_never_gets_ready_is_killed() {
    let config = SupervisorConfig {
        startup_timeout: Duration::from_millis(300),
        ..config(Duration::from_secs(5))
    };
    let report = supervise(config, vec![sh(Role::Router, "exec sleep 30")]);

    assert!(matches!(
        report.cause,
        TeardownCause::StartupFailed {
            role: Role::Router,
            ..
        }
    ));
    assert_eq!(report.outcomes.len(), 1);
    assert!(report.outcomes[0].killed);
}

#[test]
fn test_regenerate_reaches_only_the_named_role() {
    let mut supervisor = Supervisor::new(config(Duration::from_secs(5)));
    supervisor.launch(sh(Role::Viewer, LISTENER)).unwrap();
    let generator = supervisor
        .launch(sh(Role::ObstacleGenerator, LISTENER))
        .unwrap();

    assert_eq!(supervisor.send_to(Role::TargetGenerator, ControlMessage::Regenerate), 0);
    assert_eq!(supervisor.send_to(Role::ObstacleGenerator, ControlMessage::Regenerate), 1);

    let cause = supervisor.monitor();
    assert_eq!(
        cause,
        TeardownCause::WorkerExited {
            role: Role::ObstacleGenerator,
            pid: generator,
            code: Some(7),
        }
    );
    let outcomes = supervisor.teardown();
    assert_eq!(outcomes[0].code, Some(0));
}

#[test]
fn test_terminal_resize_is_forwarded_to_the_viewer() {
    let mut supervisor = Supervisor::new(config(Duration::from_secs(5)));
    let viewer = supervisor.launch(sh(Role::Viewer, LISTENER)).unwrap();
    supervisor.launch(sh(Role::Physics, LISTENER)).unwrap();

    let handle = supervisor.handle();
    let forwarder = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        let pending = Pending {
            resized: true,
            regenerate: false,
        };
        signals::forward(pending, || GameBounds::new(90, 30).ok(), &handle)
    });

    let cause = supervisor.monitor();
    assert!(forwarder.join().unwrap());
    assert_eq!(
        cause,
        TeardownCause::WorkerExited {
            role: Role::Viewer,
            pid: viewer,
            code: Some(5),
        }
    );
    let outcomes = supervisor.teardown();
    assert_eq!(outcomes[1].code, Some(0));
}
