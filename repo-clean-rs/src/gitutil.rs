use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Resolve the git directory of a repository, made absolute relative to the
/// repository path when git reports a relative one.
pub fn git_dir(repo: &Path) -> io::Result<PathBuf> {
    let out = Command::new("git")
        .arg("-C")
        .arg(repo)
        .arg("rev-parse")
        .arg("--git-dir")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()?;
    if !out.status.success() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("'git -C {:?} rev-parse --git-dir' failed", repo),
        ));
    }
    let s = String::from_utf8_lossy(&out.stdout).trim().to_string();
    let p = PathBuf::from(&s);
    if p.is_absolute() {
        Ok(p)
    } else {
        Ok(repo.join(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn resolves_the_git_dir_of_a_fresh_repo() {
        let temp = TempDir::new().unwrap();
        Command::new("git")
            .arg("init")
            .arg(temp.path())
            .output()
            .unwrap();
        let dir = git_dir(temp.path()).unwrap();
        assert!(dir.ends_with(".git"));
        assert!(dir.is_absolute() || dir.exists());
    }

    #[test]
    fn fails_outside_a_repository() {
        let temp = TempDir::new().unwrap();
        assert!(git_dir(&temp.path().join("nope")).is_err());
    }
}
