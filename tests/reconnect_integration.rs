//! Automatic reconnection after transient client exits.
#![cfg(unix)]

mod common;

use std::time::Duration;

use common::*;
use streamhost::events::{DisconnectOrigin, EventPayload};
use streamhost::session::SessionState;

/// Client body that records each run in `runs` and then runs `rest`.
fn counting(fx: &Fixture, rest: &str) -> std::path::PathBuf {
    let runs = fx.path("runs");
    fx.script(
        "client.sh",
        &format!(
            "echo run >> {runs}\nn=$(wc -l < {runs} | tr -d ' ')\n{rest}",
            runs = runs.display()
        ),
    )
}

#[tokio::test]
async fn transient_exits_back_off_until_the_budget_is_spent() {
    let fx = Fixture::new();
    let exe = counting(&fx, "exit 1");
    let mut t = spawn_supervisor(fast_config());

    t.supervisor.start("game", managed(&exe)).await.unwrap();

    let mut delays = Vec::new();
    let mut exits = 0;
    loop {
        let event = next_event(&mut t.events).await;
        match event.payload {
            EventPayload::Reconnecting {
                attempt,
                max_attempts,
                delay_ms,
            } => {
                assert_eq!(attempt as usize, delays.len() + 1);
                assert_eq!(max_attempts, 5);
                delays.push(delay_ms);
            }
            EventPayload::Disconnected(d) if d.origin == DisconnectOrigin::Process => {
                assert_eq!(d.reason, "transient_error");
                assert!(d.was_error);
                exits += 1;
                if exits == 6 {
                    break;
                }
            }
            _ => {}
        }
    }

    assert_eq!(delays, vec![10, 20, 40, 80, 160]);
    assert_quiet(&mut t.events, Duration::from_millis(300)).await;
    assert_eq!(fx.line_count("runs"), 6);
    assert!(t.supervisor.sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn pending_reconnect_is_visible_and_cancelled_by_stop() {
    let fx = Fixture::new();
    let exe = counting(&fx, "exit 1");
    let mut config = fast_config();
    config.reconnect.base_delay_ms = 300;
    let mut t = spawn_supervisor(config);

    t.supervisor.start("game", managed(&exe)).await.unwrap();
    wait_for(&mut t.events, |p| matches!(p, EventPayload::Reconnecting { .. })).await;

    let sessions = t.supervisor.sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].state, SessionState::Disconnected);
    assert_eq!(sessions[0].reconnect_attempts, 1);
    assert_eq!(sessions[0].exit_code, Some(1));
    assert_eq!(sessions[0].pid, None);

    assert!(t.supervisor.stop("game").await.unwrap());
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(fx.line_count("runs"), 1);
    assert!(t.supervisor.sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn restart_during_backoff_starts_a_fresh_sequence() {
    let fx = Fixture::new();
    let exe = counting(&fx, "exit 1");
    let mut config = fast_config();
    config.reconnect.base_delay_ms = 300;
    let mut t = spawn_supervisor(config);

    t.supervisor.start("game", managed(&exe)).await.unwrap();
    wait_for(&mut t.events, |p| matches!(p, EventPayload::Reconnecting { .. })).await;

    // A user-initiated start replaces the pending reconnect.
    t.supervisor.start("game", managed(&exe)).await.unwrap();
    let event = wait_for(&mut t.events, |p| matches!(p, EventPayload::Reconnecting { .. })).await;
    let EventPayload::Reconnecting { attempt, .. } = event.payload else {
        unreachable!()
    };
    assert_eq!(attempt, 1);
    assert_eq!(fx.line_count("runs"), 2);
    t.supervisor.stop("game").await.unwrap();
}

#[tokio::test]
async fn respawn_failure_is_terminal() {
    let fx = Fixture::new();
    let exe = counting(&fx, "rm -f \"$0\"\nexit 1");
    let mut t = spawn_supervisor(fast_config());

    t.supervisor.start("game", managed(&exe)).await.unwrap();
    wait_for(&mut t.events, |p| matches!(p, EventPayload::Reconnecting { .. })).await;

    let event = wait_for(&mut t.events, |p| matches!(p, EventPayload::Disconnected(_))).await;
    let EventPayload::Disconnected(d) = event.payload else {
        unreachable!()
    };
    assert_eq!(d.origin, DisconnectOrigin::Process);
    assert_eq!(d.reason, "spawn_failed");
    assert!(d.was_error);

    assert_quiet(&mut t.events, Duration::from_millis(200)).await;
    assert_eq!(fx.line_count("runs"), 1);
    assert!(t.supervisor.sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn streaming_resets_the_attempt_counter() {
    let fx = Fixture::new();
    let exe = counting(
        &fx,
        "if [ \"$n\" -eq 2 ]; then echo 'stream connected'; fi\nexit 1",
    );
    let mut t = spawn_supervisor(fast_config());

    t.supervisor.start("game", managed(&exe)).await.unwrap();

    let mut attempts = Vec::new();
    while attempts.len() < 3 {
        let event = wait_for(&mut t.events, |p| matches!(p, EventPayload::Reconnecting { .. })).await;
        if let EventPayload::Reconnecting { attempt, .. } = event.payload {
            attempts.push(attempt);
        }
    }
    t.supervisor.stop("game").await.unwrap();

    // Run 2 reached streaming, so its failure starts over at attempt 1.
    assert_eq!(attempts, vec![1, 1, 2]);
}

#[tokio::test]
async fn clean_and_auth_exits_are_not_retried() {
    let fx = Fixture::new();
    let clean = fx.script("clean.sh", "exit 0");
    let auth = fx.script("auth.sh", "exit 2");
    let mut t = spawn_supervisor(fast_config());

    for (key, exe) in [("clean", &clean), ("auth", &auth)] {
        t.supervisor.start(key, managed(exe)).await.unwrap();
        let event = wait_for(&mut t.events, is_exit).await;
        assert_eq!(event.tracking_key, key);
        assert_quiet(&mut t.events, Duration::from_millis(150)).await;
    }
    assert!(t.supervisor.sessions().await.unwrap().is_empty());
}
