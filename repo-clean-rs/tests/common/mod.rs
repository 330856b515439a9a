use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use repo_clean_rs as rc;

pub fn mktemp(prefix: &str) -> PathBuf {
    let mut p = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    p.push("target");
    p.push("it");
    static COUNT: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let c = COUNT.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    p.push(format!("{}_{}_{}_{}", prefix, pid, t, c));
    p
}

pub fn run_git(dir: &Path, args: &[&str]) -> (i32, String, String) {
    let out = Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .expect("run git");
    let code = out.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&out.stdout).to_string();
    let stderr = String::from_utf8_lossy(&out.stderr).to_string();
    (code, stdout, stderr)
}

#[allow(dead_code)]
pub fn write_file(dir: &Path, rel: &str, contents: &str) {
    let path = dir.join(rel);
    if let Some(p) = path.parent() {
        fs::create_dir_all(p).unwrap();
    }
    let mut f = File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
}

pub fn init_repo() -> PathBuf {
    let repo = mktemp("rc_rs_it");
    fs::create_dir_all(&repo).unwrap();
    let (c, _o, e) = run_git(&repo, &["init"]);
    assert_eq!(c, 0, "git init failed: {}", e);
    assert_eq!(run_git(&repo, &["config", "user.name", "A U Thor"]).0, 0);
    assert_eq!(
        run_git(&repo, &["config", "user.email", "a.u.thor@example.com"]).0,
        0
    );
    repo
}

#[allow(dead_code)]
pub fn init_repo_with_commit() -> PathBuf {
    let repo = init_repo();
    write_file(&repo, "README.md", "hello");
    assert_eq!(run_git(&repo, &["add", "."]).0, 0, "git add failed");
    assert_eq!(run_git(&repo, &["commit", "-q", "-m", "init commit"]).0, 0);
    repo
}

/// Drop a hand-written export stream next to the repo and return its path.
pub fn write_stream(repo: &Path, name: &str, contents: &str) -> PathBuf {
    let path = repo.join(name);
    fs::write(&path, contents).expect("write export stream");
    path
}

/// File of target blob ids, one 40-hex fingerprint per line.
#[allow(dead_code)]
pub fn write_targets(repo: &Path, oids: &[&str]) -> PathBuf {
    let path = repo.join("targets.txt");
    let mut body = String::new();
    for oid in oids {
        body.push_str(oid);
        body.push('\n');
    }
    fs::write(&path, body).expect("write target list");
    path
}

pub fn run_tool(dir: &Path, configure: impl FnOnce(&mut rc::Options)) -> rc::Result<()> {
    let mut opts = rc::Options::default();
    opts.source = dir.to_path_buf();
    opts.target = dir.to_path_buf();
    opts.quiet = true;
    configure(&mut opts);
    rc::run(&opts)
}

pub fn run_tool_expect_success(dir: &Path, configure: impl FnOnce(&mut rc::Options)) {
    run_tool(dir, configure).expect("repo-clean-rs run should succeed");
}

/// Contents of the filtered debug mirror left behind by a run.
#[allow(dead_code)]
pub fn filtered_stream(repo: &Path) -> String {
    let path = repo.join(".git").join("repo-clean").join("fast-export.filtered");
    fs::read_to_string(&path).expect("read filtered stream")
}

#[allow(dead_code)]
pub fn original_stream(repo: &Path) -> String {
    let path = repo.join(".git").join("repo-clean").join("fast-export.original");
    fs::read_to_string(&path).expect("read original stream")
}

#[allow(dead_code)]
pub fn commit_count(repo: &Path, rev: &str) -> usize {
    let (_c, out, _e) = run_git(repo, &["rev-list", "--count", rev]);
    out.trim().parse().unwrap_or(0)
}
