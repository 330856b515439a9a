use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Options consumed by the rewrite pipeline.
///
/// The interactive surface of the tool (prompt flows, scan output) lives
/// outside this crate; callers hand the core a finished set of predicates
/// and a target list and the pipeline takes it from there.
#[derive(Debug, Clone)]
pub struct Options {
    pub source: PathBuf,
    pub target: PathBuf,
    /// Refs handed to fast-export; defaults to `--all`.
    pub refs: Vec<String>,
    /// Drop every blob strictly larger than this many bytes.
    pub limit: Option<u64>,
    /// File of 40-hex blob ids to strip, one per line.
    pub strip_blobs_with_ids: Option<PathBuf>,
    /// Drop file-changes whose path carries one of these suffixes.
    pub strip_suffixes: Vec<Vec<u8>>,
    /// Drop file-changes whose path matches one of these globs.
    pub path_globs: Vec<Vec<u8>>,
    /// Replace matched blobs with LFS pointers instead of deleting them.
    pub lfs: bool,
    /// Reference-only export: blobs never enter the stream and file-changes
    /// carry raw object ids. Incompatible with `lfs`.
    pub no_data: bool,
    pub quiet: bool,
    pub verbose: bool,
    /// Run the whole pipeline but never spawn fast-import.
    pub dry_run: bool,
    pub write_report: bool,
    pub report_json: bool,
    pub reencode: bool,
    pub quotepath: bool,
    pub mark_tags: bool,
    /// Test hook: read a prebuilt export stream from this file instead of
    /// spawning fast-export. Debug-gated.
    pub fe_stream_override: Option<PathBuf>,
    pub debug_mode: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            source: PathBuf::from("."),
            target: PathBuf::from("."),
            refs: vec!["--all".to_string()],
            limit: None,
            strip_blobs_with_ids: None,
            strip_suffixes: Vec::new(),
            path_globs: Vec::new(),
            lfs: false,
            no_data: false,
            quiet: false,
            verbose: false,
            dry_run: false,
            write_report: false,
            report_json: false,
            reencode: true,
            quotepath: true,
            mark_tags: true,
            fe_stream_override: None,
            debug_mode: false,
        }
    }
}

/// Convert a size limit of the form `<digits><B|K|M|G>` to bytes.
///
/// Units are case-insensitive; a bare number means bytes.
pub fn parse_limit(input: &str) -> Result<u64, String> {
    if input.is_empty() || !input.is_ascii() {
        return Err(format!("expected a value like 10M after --limit, got '{input}'"));
    }
    if input.bytes().all(|b| b.is_ascii_digit()) {
        return input
            .parse::<u64>()
            .map_err(|e| format!("invalid --limit value '{input}': {e}"));
    }
    let (value, unit) = input.split_at(input.len() - 1);
    let n = value
        .parse::<u64>()
        .map_err(|e| format!("invalid --limit value '{input}': {e}"))?;
    let mult: u64 = match unit {
        "b" | "B" => 1,
        "k" | "K" => 1024,
        "m" | "M" => 1024 * 1024,
        "g" | "G" => 1024 * 1024 * 1024,
        _ => {
            return Err(format!(
                "expected --limit=<n><B|K|M|G>, got --limit={input}"
            ))
        }
    };
    n.checked_mul(mult)
        .ok_or_else(|| format!("--limit value '{input}' overflows"))
}

#[derive(Debug, Default, Deserialize)]
struct FilterSection {
    limit: Option<String>,
    types: Option<Vec<String>>,
    globs: Option<Vec<String>>,
    branch: Option<String>,
    lfs: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    filter: Option<FilterSection>,
}

enum ConfigError {
    Io(std::io::Error),
    Parse(String),
}

/// Overlay `.repo-clean-rs.toml` values onto options the command line left
/// at their defaults. Command-line flags always win.
fn apply_config_from_file(opts: &mut Options, path: &Path) -> Result<(), ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
    let parsed: FileConfig = toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let section = match parsed.filter {
        Some(s) => s,
        None => return Ok(()),
    };
    if opts.limit.is_none() {
        if let Some(raw_limit) = section.limit {
            let bytes = parse_limit(&raw_limit).map_err(ConfigError::Parse)?;
            opts.limit = Some(bytes);
        }
    }
    if opts.strip_suffixes.is_empty() {
        if let Some(types) = section.types {
            for t in types {
                opts.strip_suffixes.push(normalize_suffix(&t));
            }
        }
    }
    if opts.path_globs.is_empty() {
        if let Some(globs) = section.globs {
            for g in globs {
                opts.path_globs.push(g.into_bytes());
            }
        }
    }
    if opts.refs == vec!["--all".to_string()] {
        if let Some(branch) = section.branch {
            opts.refs = branch_to_refs(&branch);
        }
    }
    if !opts.lfs {
        if let Some(lfs) = section.lfs {
            opts.lfs = lfs;
        }
    }
    Ok(())
}

fn branch_to_refs(branch: &str) -> Vec<String> {
    if branch == "all" {
        vec!["--all".to_string()]
    } else {
        vec![branch.to_string()]
    }
}

fn normalize_suffix(t: &str) -> Vec<u8> {
    let mut s = Vec::with_capacity(t.len() + 1);
    if !t.starts_with('.') {
        s.push(b'.');
    }
    s.extend_from_slice(t.as_bytes());
    s
}

fn debug_mode_enabled(args: &[String]) -> bool {
    if std::env::var("RCRS_DEBUG").map(|v| v == "1").unwrap_or(false) {
        return true;
    }
    args.iter().any(|a| a == "--debug-mode")
}

fn guard_debug(flag: &str, debug_mode: bool) {
    if !debug_mode {
        eprintln!(
            "error: {flag} is gated behind debug mode. Set RCRS_DEBUG=1 or pass --debug-mode first."
        );
        std::process::exit(2);
    }
}

pub fn parse_args() -> Options {
    use std::env;
    let mut args: Vec<String> = env::args().skip(1).collect();
    let mut config_override = env::var("REPO_CLEAN_RS_CONFIG").ok().map(PathBuf::from);

    let mut idx = 0;
    while idx < args.len() {
        if args[idx] == "--config" {
            if idx + 1 >= args.len() {
                eprintln!("error: --config requires a file path");
                std::process::exit(2);
            }
            config_override = Some(PathBuf::from(args.remove(idx + 1)));
            args.remove(idx);
            continue;
        } else if let Some(path) = args[idx].strip_prefix("--config=") {
            if path.is_empty() {
                eprintln!("error: --config= requires a file path");
                std::process::exit(2);
            }
            config_override = Some(PathBuf::from(path));
            args.remove(idx);
            continue;
        }
        idx += 1;
    }

    let mut opts = Options::default();
    opts.debug_mode = debug_mode_enabled(&args);
    let mut branch_set = false;
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--source" | "-p" | "--path" => {
                let p = it.next().expect("--source requires value");
                opts.source = PathBuf::from(&p);
                opts.target = PathBuf::from(p);
            }
            "--target" => opts.target = PathBuf::from(it.next().expect("--target requires value")),
            "--ref" | "--refs" => {
                let r = it.next().expect("--ref requires value");
                if !branch_set {
                    opts.refs.clear();
                    branch_set = true;
                }
                opts.refs.push(r);
            }
            "--branch" | "-b" => {
                let b = it.next().expect("--branch requires value");
                opts.refs = branch_to_refs(&b);
                branch_set = true;
            }
            "--limit" | "-l" => {
                let v = it.next().expect("--limit requires a size like 10M");
                match parse_limit(&v) {
                    Ok(n) => opts.limit = Some(n),
                    Err(msg) => {
                        eprintln!("error: {msg}");
                        std::process::exit(2);
                    }
                }
            }
            "--type" | "-t" => {
                let t = it.next().expect("--type requires a suffix like tar.gz");
                opts.strip_suffixes.push(normalize_suffix(&t));
            }
            "--path-glob" => {
                let g = it.next().expect("--path-glob requires value");
                opts.path_globs.push(g.into_bytes());
            }
            "--strip-blobs-with-ids" => {
                let p = it.next().expect("--strip-blobs-with-ids requires FILE");
                opts.strip_blobs_with_ids = Some(PathBuf::from(p));
            }
            "--lfs" => opts.lfs = true,
            "--no-data" => opts.no_data = true,
            "--quiet" | "-q" => opts.quiet = true,
            "--verbose" | "-v" => opts.verbose = true,
            "--dry-run" => opts.dry_run = true,
            "--write-report" => opts.write_report = true,
            "--report-json" => {
                opts.write_report = true;
                opts.report_json = true;
            }
            "--no-reencode" => {
                guard_debug("--no-reencode", opts.debug_mode);
                opts.reencode = false;
            }
            "--no-quotepath" => {
                guard_debug("--no-quotepath", opts.debug_mode);
                opts.quotepath = false;
            }
            "--no-mark-tags" => {
                guard_debug("--no-mark-tags", opts.debug_mode);
                opts.mark_tags = false;
            }
            "--fe_stream_override" => {
                guard_debug("--fe_stream_override", opts.debug_mode);
                let p = it.next().expect("--fe_stream_override requires FILE");
                opts.fe_stream_override = Some(PathBuf::from(p));
            }
            "--debug-mode" => continue,
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_help();
                std::process::exit(2);
            }
        }
    }

    if opts.lfs && opts.no_data {
        eprintln!("error: --lfs needs blob payloads and cannot be combined with --no-data");
        std::process::exit(2);
    }

    let config_target = if let Some(path) = config_override {
        (path, true)
    } else {
        (opts.source.join(".repo-clean-rs.toml"), false)
    };
    let (path, explicit) = config_target;
    match apply_config_from_file(&mut opts, &path) {
        Ok(()) => {}
        Err(ConfigError::Io(err)) => {
            use std::io::ErrorKind;
            if explicit || err.kind() != ErrorKind::NotFound {
                eprintln!("error: failed to read config at {}: {}", path.display(), err);
                std::process::exit(2);
            }
        }
        Err(ConfigError::Parse(msg)) => {
            eprintln!("error: invalid config at {}: {}", path.display(), msg);
            std::process::exit(2);
        }
    }

    opts
}

fn print_help() {
    println!(
        "usage: repo-clean-rs [options]

Rewrite history so that selected blobs disappear from every commit, then
rebuild the object database through git fast-import.

Options:
  -p, --path DIR              repository to rewrite (default '.')
      --source DIR            alias for --path
      --target DIR            repository receiving the import (default: source)
  -b, --branch NAME           branch to rewrite; 'all' means every ref
      --ref REF               pass an explicit ref to fast-export (repeatable)
  -l, --limit SIZE            drop blobs larger than SIZE (e.g. 10M, 1G)
  -t, --type SUFFIX           drop files with this suffix (e.g. tar.gz)
      --path-glob GLOB        drop files whose path matches GLOB
      --strip-blobs-with-ids FILE
                              drop blobs whose 40-hex ids are listed in FILE
      --lfs                   convert matched blobs to LFS pointers
      --no-data               reference-only stream (ids instead of payloads)
      --dry-run               filter without running fast-import
      --write-report          write a summary under <git-dir>/repo-clean/
      --report-json           same, as JSON
  -q, --quiet                 suppress warnings
  -v, --verbose               report every dropped file-change
      --config FILE           read defaults from a TOML config
  -h, --help                  show this help"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_units_convert_to_bytes() {
        let table: &[(&str, u64)] = &[
            ("0B", 0),
            ("123b", 123),
            ("1k", 1024),
            ("1000K", 1000 * 1024),
            ("1M", 1024 * 1024),
            ("10m", 10 * 1024 * 1024),
            ("1G", 1024 * 1024 * 1024),
            ("4g", 4 * 1024 * 1024 * 1024),
            ("512", 512),
        ];
        for (input, expected) in table {
            let got = parse_limit(input).unwrap();
            assert_eq!(got, *expected, "parse_limit({input})");
        }
    }

    #[test]
    fn limit_rejects_garbage() {
        assert!(parse_limit("").is_err());
        assert!(parse_limit("10x").is_err());
        assert!(parse_limit("tenM").is_err());
        assert!(parse_limit("M").is_err());
    }

    #[test]
    fn suffixes_gain_a_leading_dot() {
        assert_eq!(normalize_suffix("tar.gz"), b".tar.gz".to_vec());
        assert_eq!(normalize_suffix(".zip"), b".zip".to_vec());
    }

    #[test]
    fn branch_all_maps_to_all_refs() {
        assert_eq!(branch_to_refs("all"), vec!["--all".to_string()]);
        assert_eq!(branch_to_refs("main"), vec!["main".to_string()]);
    }

    #[test]
    fn config_file_fills_only_unset_options() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(".repo-clean-rs.toml");
        std::fs::write(
            &path,
            "[filter]\nlimit = \"1M\"\ntypes = [\"zip\"]\nbranch = \"main\"\n",
        )
        .unwrap();

        let mut opts = Options::default();
        assert!(apply_config_from_file(&mut opts, &path).is_ok());
        assert_eq!(opts.limit, Some(1024 * 1024));
        assert_eq!(opts.strip_suffixes, vec![b".zip".to_vec()]);
        assert_eq!(opts.refs, vec!["main".to_string()]);

        let mut opts = Options::default();
        opts.limit = Some(5);
        assert!(apply_config_from_file(&mut opts, &path).is_ok());
        assert_eq!(opts.limit, Some(5), "command line wins over config");
    }
}
