//! End-to-end tests running the supervisor against real child processes.
//!
//! Check commands are ordinary executables (`true`, `test`), reload
//! commands `touch` a marker file so the tests can observe every reload
//! invocation. Probes tick on one-second intervals, so each scenario
//! allows a generous deadline before giving up.

use std::fs;
use std::path::Path;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use birdwatcher::config::{self, Config};
use birdwatcher::supervisor::Supervisor;

const DEADLINE: Duration = Duration::from_secs(15);

struct Harness {
    shutdown: CancellationToken,
    supervisor: JoinHandle<()>,
    status_rx: mpsc::Receiver<String>,
}

impl Harness {
    async fn start(config: &Config) -> Self {
        let shutdown = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (status_tx, status_rx) = mpsc::channel(32);

        let mut supervisor = Supervisor::new(config);
        let token = shutdown.clone();
        let handle =
            tokio::spawn(async move { supervisor.run(ready_tx, status_tx, token).await });

        ready_rx.await.expect("supervisor did not become ready");

        Self {
            shutdown,
            supervisor: handle,
            status_rx,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.supervisor.await.expect("supervisor task panicked");
    }
}

/// Polls until the fragment file has the expected content.
async fn wait_for_fragment(path: &Path, expected: &str) {
    let deadline = tokio::time::Instant::now() + DEADLINE;
    loop {
        if let Ok(content) = fs::read_to_string(path) {
            if content == expected {
                return;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "fragment at {} never matched; current: {:?}",
            path.display(),
            fs::read_to_string(path).ok()
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Polls until a file exists.
async fn wait_for_file(path: &Path) {
    let deadline = tokio::time::Instant::now() + DEADLINE;
    while !path.exists() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "{} never appeared",
            path.display()
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

#[tokio::test]
async fn single_service_rise_and_fall() {
    let dir = tempfile::tempdir().unwrap();
    let fragment = dir.path().join("bird.conf");
    let reloaded = dir.path().join("reloaded");
    let down_marker = dir.path().join("down");

    // healthy while the marker file is absent
    let toml = format!(
        r#"
        config_file = "{}"
        reload_command = "touch {}"

        [services."foo"]
        command = "test ! -e {}"
        interval = 1
        rise = 2
        fail = 1
        prefixes = ["192.168.0.0/24"]
        "#,
        fragment.display(),
        reloaded.display(),
        down_marker.display()
    );
    let config = config::from_str(&toml).unwrap();
    let mut harness = Harness::start(&config).await;

    // two consecutive successes flip the service up
    wait_for_fragment(
        &fragment,
        "# DO NOT EDIT MANUALLY\n\
         function match_route()\n\
         {\n\
         \treturn net ~ [\n\
         \t\t192.168.0.0/24\n\
         \t];\n\
         }\n",
    )
    .await;
    wait_for_file(&reloaded).await;
    assert_eq!(
        harness.status_rx.recv().await.unwrap(),
        "all 1 service(s) up"
    );

    // one failure (fail = 1) withdraws the prefix again
    fs::remove_file(&reloaded).unwrap();
    fs::write(&down_marker, "").unwrap();

    wait_for_fragment(
        &fragment,
        "# DO NOT EDIT MANUALLY\n\
         function match_route()\n\
         {\n\
         \treturn false;\n\
         }\n",
    )
    .await;
    wait_for_file(&reloaded).await;
    assert_eq!(
        harness.status_rx.recv().await.unwrap(),
        "all 1 service(s) down"
    );

    harness.stop().await;
}

#[tokio::test]
async fn two_function_names_render_in_lexical_order() {
    let dir = tempfile::tempdir().unwrap();
    let fragment = dir.path().join("bird.conf");

    let toml = format!(
        r#"
        config_file = "{}"
        reload_command = "true"

        [services."a"]
        command = "true"
        interval = 1
        function_name = "fa"
        prefixes = ["10.0.0.0/24"]

        [services."b"]
        command = "true"
        interval = 1
        function_name = "fb"
        prefixes = ["10.0.1.0/24"]
        "#,
        fragment.display()
    );
    let config = config::from_str(&toml).unwrap();
    let mut harness = Harness::start(&config).await;

    wait_for_fragment(
        &fragment,
        "# DO NOT EDIT MANUALLY\n\
         function fa()\n\
         {\n\
         \treturn net ~ [\n\
         \t\t10.0.0.0/24\n\
         \t];\n\
         }\n\
         function fb()\n\
         {\n\
         \treturn net ~ [\n\
         \t\t10.0.1.0/24\n\
         \t];\n\
         }\n",
    )
    .await;

    // drain statuses until both services are up
    let deadline = tokio::time::Instant::now() + DEADLINE;
    loop {
        let status = tokio::time::timeout_at(deadline, harness.status_rx.recv())
            .await
            .expect("no status update in time")
            .expect("status channel closed");
        if status == "all 2 service(s) up" {
            break;
        }
    }

    harness.stop().await;
}

#[tokio::test]
async fn startup_reconciliation_reloads_identical_fragment_once() {
    let dir = tempfile::tempdir().unwrap();
    let fragment = dir.path().join("bird.conf");
    let reloaded = dir.path().join("reloaded");

    let expected = "# DO NOT EDIT MANUALLY\n\
                    function match_route()\n\
                    {\n\
                    \treturn net ~ [\n\
                    \t\t192.168.0.0/24\n\
                    \t];\n\
                    }\n";
    // leftover fragment from a previous run, already up to date
    fs::write(&fragment, expected).unwrap();

    let toml = format!(
        r#"
        config_file = "{}"
        reload_command = "touch {}"

        [services."foo"]
        command = "true"
        interval = 1
        prefixes = ["192.168.0.0/24"]
        "#,
        fragment.display(),
        reloaded.display()
    );
    let config = config::from_str(&toml).unwrap();
    let harness = Harness::start(&config).await;

    // the first action leaves the fragment untouched but reloads anyway
    wait_for_file(&reloaded).await;
    assert_eq!(fs::read_to_string(&fragment).unwrap(), expected);

    harness.stop().await;
}
