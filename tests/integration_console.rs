use std::path::PathBuf;

#[test]
fn fixture_scripts_exist() {
    assert!(PathBuf::from("tests/fixtures/mock-parser.sh").exists());
    assert!(PathBuf::from("tests/fixtures/stubborn-parser.sh").exists());
}

#[cfg(unix)]
mod unix {
    use dofler_console::config::{ConsoleConfig, StopPolicy};
    use dofler_console::db::Database;
    use dofler_console::models::{ServiceAction, Transition};
    use dofler_console::{Console, LogSinks, SettingsStore, Supervisor};
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn fixture_command(script: &str, args: &[&Path]) -> String {
        let script = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(script);
        let mut line = format!("bash '{}'", script.display());
        for arg in args {
            line.push_str(&format!(" '{}'", arg.display()));
        }
        line
    }

    fn form(pairs: &[(&str, String)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    fn supervisor(dir: &Path, command: String, grace: Duration) -> (Arc<Database>, Arc<Supervisor>) {
        let db = Arc::new(Database::new(&dir.join("dofler.sqlite")).expect("db"));
        let parsers = vec!["feedparser".to_string()];
        db.ensure_parser_settings(&parsers).expect("seed");
        db.write_batch(&form(&[("feedparser_command", command)]))
            .expect("command");
        let policy = StopPolicy {
            grace,
            kill_wait: Duration::from_secs(2),
        };
        let supervisor = Arc::new(Supervisor::new(&parsers, db.clone(), policy));
        (db, supervisor)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_restarts_never_overlap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = dir.path().join("state");
        std::fs::create_dir_all(&state).expect("state dir");
        let command = fixture_command("mock-parser.sh", &[&state]);
        let (_db, supervisor) = supervisor(dir.path(), command, Duration::from_secs(2));

        let mut launches = 0;
        if supervisor.start("feedparser").await.expect("start") == Transition::Started {
            launches += 1;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let supervisor = supervisor.clone();
            tasks.push(tokio::spawn(async move { supervisor.restart("feedparser").await }));
        }
        for task in tasks {
            if task.await.expect("join").expect("restart") == Transition::Started {
                launches += 1;
            }
        }
        assert_eq!(launches, 5);
        tokio::time::sleep(Duration::from_millis(500)).await;

        let status = supervisor.status().await.expect("status");
        assert!(status["feedparser"].running);
        assert!(!state.join("overlaps").exists(), "two parser instances ran at once");

        // A restart may terminate an instance before bash records it, so the
        // file can hold fewer lines than launches; the live one is always last.
        let starts = std::fs::read_to_string(state.join("starts")).expect("starts");
        let recorded: Vec<&str> = starts.lines().collect();
        assert!((1..=5).contains(&recorded.len()), "{recorded:?}");
        let live_pid = status["feedparser"].pid.expect("pid").to_string();
        assert_eq!(recorded.last().copied(), Some(live_pid.as_str()));

        supervisor.shutdown().await;
        assert!(!state.join("running").exists());
    }

    #[tokio::test]
    async fn stubborn_parser_is_killed_after_grace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let command = fixture_command("stubborn-parser.sh", &[]);
        let grace = Duration::from_millis(400);
        let (_db, supervisor) = supervisor(dir.path(), command, grace);

        supervisor.start("feedparser").await.expect("start");
        tokio::time::sleep(Duration::from_millis(300)).await;

        let began = Instant::now();
        assert_eq!(supervisor.stop("feedparser").await.expect("stop"), Transition::Stopped);
        assert!(began.elapsed() >= grace);

        let status = supervisor.status().await.expect("status");
        assert!(!status["feedparser"].running);
        assert_eq!(status["feedparser"].pid, None);
    }

    #[tokio::test]
    async fn enabling_a_parser_through_settings_starts_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = dir.path().join("state");
        std::fs::create_dir_all(&state).expect("state dir");
        let config = ConsoleConfig {
            database: dir.path().join("dofler.sqlite"),
            parsers: vec!["feedparser".to_string()],
            stop_grace_ms: 1_000,
            kill_wait_ms: 1_000,
            ..ConsoleConfig::default()
        };
        let console = Console::open(&config, &dir.path().join("console.yaml"), LogSinks::detached())
            .expect("console");
        let token = console
            .login("admin", &config.admin_password)
            .await
            .expect("login")
            .expect("token");

        let report = console
            .submit_settings(
                Some(&token),
                &form(&[
                    ("feedparser_enabled", "1".to_string()),
                    ("feedparser_command", fixture_command("mock-parser.sh", &[&state])),
                ]),
            )
            .await
            .expect("submit")
            .applied()
            .expect("applied");
        assert_eq!(report.autostart.started, vec!["feedparser".to_string()]);
        assert!(console.services_view(None).await.expect("view").parsers["feedparser"].running);

        let again = console
            .service_action(Some(&token), "feedparser", ServiceAction::Start)
            .await
            .expect("start")
            .applied()
            .expect("applied");
        assert_eq!(again, Transition::AlreadyRunning);

        let report = console
            .submit_settings(Some(&token), &form(&[("feedparser_enabled", "0".to_string())]))
            .await
            .expect("submit")
            .applied()
            .expect("applied");
        assert_eq!(report.autostart.stopped, vec!["feedparser".to_string()]);
        assert!(!console.services_view(None).await.expect("view").parsers["feedparser"].running);

        console.shutdown().await;
    }
}
