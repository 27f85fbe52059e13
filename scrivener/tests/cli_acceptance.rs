use scrivener_core::{ProjectStore, SessionStatus};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    base: PathBuf,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            base,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    fn research_dir(&self, name: &str) -> PathBuf {
        let dir = self.base.join(name);
        fs::create_dir_all(&dir).expect("failed to create research dir");
        dir
    }

    fn pointer_path(&self) -> PathBuf {
        self.xdg_data.join("scrivener/active_project.json")
    }
}

fn run(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("scrivener"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env_remove("SCRIVENER_PROJECT_ROOT")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute scrivener: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "scrivener {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn run_ok(env: &CliTestEnv, args: &[&str]) -> String {
    let output = run(env, args);
    assert_success(args, &output);
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[test]
fn status_without_project_fails_with_guidance() {
    let env = CliTestEnv::new();

    let output = run(&env, &["status"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("no active project"),
        "expected guidance on stderr, got:\n{stderr}"
    );
    assert!(stderr.contains("scrivener init"));
}

#[test]
fn switch_then_log_updates_progress() {
    let env = CliTestEnv::new();
    let thesis = env.research_dir("thesis");
    let thesis_arg = path_arg(&thesis);

    let stdout = run_ok(&env, &["switch", &thesis_arg]);
    assert!(stdout.contains("Active project: thesis"));
    assert!(env.pointer_path().exists());

    run_ok(&env, &["log", "literature_search", "--result", "12 papers"]);
    run_ok(&env, &["log", "draft_section", "--error", "timeout"]);

    let progress: serde_json::Value =
        serde_json::from_str(&run_ok(&env, &["--json", "progress"])).expect("progress is JSON");
    let literature = progress["acts"]
        .as_array()
        .unwrap()
        .iter()
        .flat_map(|act| act["categories"].as_array().unwrap().iter())
        .find(|c| c["research_category"] == "Literature Search")
        .expect("literature category listed");
    assert_eq!(literature["completion_percentage"], 28.33);

    // Failed calls are logged but do not count toward progress
    let history = run_ok(&env, &["--json", "history"]);
    let events: serde_json::Value = serde_json::from_str(&history).unwrap();
    assert_eq!(events.as_array().unwrap().len(), 2);
    assert_eq!(events[1]["tool_name"], "draft_section");
    assert_eq!(events[1]["success"], false);
    assert_eq!(events[1]["error_message"], "timeout");
}

#[test]
fn explicit_project_overrides_pointer() {
    let env = CliTestEnv::new();
    let a = env.research_dir("a");
    let b = env.research_dir("b");
    run_ok(&env, &["init", &path_arg(&b)]);
    run_ok(&env, &["switch", &path_arg(&a)]);

    run_ok(&env, &["--project", &path_arg(&b), "log", "semantic_search"]);

    let a_store = ProjectStore::open(&a.canonicalize().unwrap()).unwrap();
    let b_store = ProjectStore::open(&b.canonicalize().unwrap()).unwrap();
    assert_eq!(a_store.count_invocations().unwrap(), 0);
    assert_eq!(b_store.count_invocations().unwrap(), 1);
}

#[test]
fn session_lifecycle_through_cli() {
    let env = CliTestEnv::new();
    let thesis = env.research_dir("thesis");
    run_ok(&env, &["switch", &path_arg(&thesis)]);

    run_ok(&env, &["session", "start", "first focus"]);
    let stdout = run_ok(&env, &["session", "start", "second focus", "--goal", "draft intro"]);
    assert!(stdout.contains("Closed session"));

    let store = ProjectStore::open(&thesis.canonicalize().unwrap()).unwrap();
    let project = store.project().unwrap();
    let sessions = store.list_sessions(&project.id, None).unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(
        sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Active)
            .count(),
        1
    );

    run_ok(&env, &["session", "end"]);
    let output = run(&env, &["session", "show"]);
    assert!(!output.status.success());
}

#[test]
fn invoke_runs_builtin_tools() {
    let env = CliTestEnv::new();
    let thesis = env.research_dir("thesis");
    run_ok(&env, &["switch", &path_arg(&thesis)]);

    let stdout = run_ok(&env, &["--json", "invoke", "research_milestones"]);
    let milestones: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(milestones.as_array().unwrap().is_empty());

    // The built-in call itself was logged
    let history: serde_json::Value =
        serde_json::from_str(&run_ok(&env, &["--json", "history"])).unwrap();
    assert_eq!(history[0]["tool_name"], "research_milestones");
    assert_eq!(history[0]["research_act"], "uncategorized");

    let output = run(&env, &["invoke", "no_such_tool"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("tool not found"));
}

#[test]
fn reset_points_at_default_project() {
    let env = CliTestEnv::new();
    let thesis = env.research_dir("thesis");
    run_ok(&env, &["switch", &path_arg(&thesis)]);

    let stdout = run_ok(&env, &["reset"]);
    assert!(stdout.contains("default-project"));
    assert!(env.xdg_data.join("scrivener/default-project/.scrivener").is_dir());

    let status = run_ok(&env, &["status"]);
    assert!(status.contains("default-project"));
}
