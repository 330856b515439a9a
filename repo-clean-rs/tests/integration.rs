mod common;
use common::*;

use repo_clean_rs::RewriteError;

#[test]
fn identity_run_preserves_history() {
    // no targets, real exporter and importer
    let repo = init_repo_with_commit();
    write_file(&repo, "src/lib.rs", "pub fn one() -> u32 { 1 }\n");
    run_git(&repo, &["add", "."]);
    run_git(&repo, &["commit", "-q", "-m", "add lib"]);
    let before = commit_count(&repo, "HEAD");

    run_tool_expect_success(&repo, |_o| {});

    assert_eq!(commit_count(&repo, "HEAD"), before);
    let (c, content, _e) = run_git(&repo, &["show", "HEAD:src/lib.rs"]);
    assert_eq!(c, 0);
    assert!(content.contains("pub fn one()"));
    let (c, readme, _e) = run_git(&repo, &["show", "HEAD:README.md"]);
    assert_eq!(c, 0);
    assert_eq!(readme, "hello");
}

#[test]
fn deleting_a_blob_rewrites_every_commit_that_held_it() {
    // the payload disappears from all of history, ordering survives
    let repo = init_repo_with_commit();
    write_file(&repo, "big.bin", &"x".repeat(4096));
    run_git(&repo, &["add", "."]);
    run_git(&repo, &["commit", "-q", "-m", "add big file"]);
    write_file(&repo, "README.md", "hello world");
    run_git(&repo, &["add", "."]);
    run_git(&repo, &["commit", "-q", "-m", "update readme"]);

    let (c, oid, _e) = run_git(&repo, &["rev-parse", "HEAD~1:big.bin"]);
    assert_eq!(c, 0);
    let oid = oid.trim().to_string();
    let before = commit_count(&repo, "HEAD");
    let targets = write_targets(&repo, &[&oid]);

    run_tool_expect_success(&repo, |o| {
        o.strip_blobs_with_ids = Some(targets.clone());
    });

    // empty commits are preserved, so the chain keeps its length
    assert_eq!(commit_count(&repo, "HEAD"), before);
    let (c, _out, _e) = run_git(&repo, &["show", "HEAD~1:big.bin"]);
    assert_ne!(c, 0, "big.bin should be gone from history");
    let (_c, objects, _e) = run_git(&repo, &["rev-list", "--objects", "--all"]);
    assert!(!objects.contains(&oid), "stripped blob still reachable");
    let (c, readme, _e) = run_git(&repo, &["show", "HEAD:README.md"]);
    assert_eq!(c, 0);
    assert_eq!(readme, "hello world");
}

#[test]
fn second_run_with_same_targets_changes_nothing() {
    // the rewrite is idempotent
    let repo = init_repo_with_commit();
    write_file(&repo, "big.bin", &"y".repeat(2048));
    run_git(&repo, &["add", "."]);
    run_git(&repo, &["commit", "-q", "-m", "add big file"]);
    let (_c, oid, _e) = run_git(&repo, &["rev-parse", "HEAD:big.bin"]);
    let oid = oid.trim().to_string();
    let targets = write_targets(&repo, &[&oid]);

    run_tool_expect_success(&repo, |o| {
        o.strip_blobs_with_ids = Some(targets.clone());
    });
    let after_first = commit_count(&repo, "HEAD");
    let (_c, head_first, _e) = run_git(&repo, &["rev-parse", "HEAD"]);

    run_tool_expect_success(&repo, |o| {
        o.strip_blobs_with_ids = Some(targets.clone());
    });
    assert_eq!(commit_count(&repo, "HEAD"), after_first);
    let (_c, head_second, _e) = run_git(&repo, &["rev-parse", "HEAD"]);
    assert_eq!(head_first.trim(), head_second.trim());
}

#[test]
fn size_limit_rewrite_on_a_real_repo() {
    let repo = init_repo_with_commit();
    write_file(&repo, "huge.dat", &"z".repeat(100_000));
    run_git(&repo, &["add", "."]);
    run_git(&repo, &["commit", "-q", "-m", "add huge file"]);

    run_tool_expect_success(&repo, |o| {
        o.limit = Some(10_000);
        o.write_report = true;
    });

    let (c, _out, _e) = run_git(&repo, &["show", "HEAD:huge.dat"]);
    assert_ne!(c, 0, "huge.dat should be gone");
    let (c, readme, _e) = run_git(&repo, &["show", "HEAD:README.md"]);
    assert_eq!(c, 0);
    assert_eq!(readme, "hello");

    let report = std::fs::read_to_string(
        repo.join(".git").join("repo-clean").join("report.txt"),
    )
    .expect("report written");
    assert!(report.contains("Blobs stripped by size: 1"));
}

#[test]
fn malformed_stream_is_fatal_with_a_diagnostic() {
    let repo = init_repo();
    let stream = "blob\noriginal-oid zzz\ndata 0\ndone\n";
    let stream_path = write_stream(&repo, "bad.stream", stream);

    let err = run_tool(&repo, |o| {
        o.dry_run = true;
        o.debug_mode = true;
        o.fe_stream_override = Some(stream_path.clone());
    })
    .unwrap_err();
    assert!(matches!(err, RewriteError::StreamMalformed(_)));
}

#[test]
fn nested_tags_abort_with_advice() {
    let repo = init_repo();
    let zeros = "0".repeat(40);
    let stream = format!(
        "tag v2.0\nmark :5\nfrom :{zeros}\n\
         original-oid 7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a7a\n\
         tagger A U Thor <a.u.thor@example.com> 0 +0000\ndata 0\ndone\n"
    );
    let stream_path = write_stream(&repo, "nested.stream", &stream);

    let err = run_tool(&repo, |o| {
        o.dry_run = true;
        o.debug_mode = true;
        o.fe_stream_override = Some(stream_path.clone());
    })
    .unwrap_err();
    assert!(matches!(err, RewriteError::NestedTags));
    assert!(err.to_string().contains("single branch"));
}

#[test]
fn unsupported_filechange_kind_is_fatal() {
    let repo = init_repo();
    let stream = "commit refs/heads/main\nmark :1\n\
                  original-oid c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1\n\
                  committer A U Thor <a.u.thor@example.com> 0 +0000\n\
                  data 3\nc1\nN inline notes\n\ndone\n";
    let stream_path = write_stream(&repo, "unsupported.stream", stream);

    let err = run_tool(&repo, |o| {
        o.dry_run = true;
        o.debug_mode = true;
        o.fe_stream_override = Some(stream_path.clone());
    })
    .unwrap_err();
    assert!(matches!(err, RewriteError::UnsupportedFileChange(_)));
}
