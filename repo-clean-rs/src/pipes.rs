use std::io;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use crate::error::{Result, RewriteError};
use crate::opts::Options;

pub fn build_fast_export_cmd(opts: &Options) -> io::Result<Command> {
    // Test override: read a prebuilt stream from a file instead
    if let Some(stream_path) = &opts.fe_stream_override {
        if !opts.debug_mode {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "error: --fe_stream_override is gated behind debug mode. Set RCRS_DEBUG=1 or pass --debug-mode to access debug-only flags.",
            ));
        }
        #[cfg(windows)]
        {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg("type").arg(stream_path);
            cmd.stdout(Stdio::piped());
            cmd.stderr(if opts.quiet { Stdio::null() } else { Stdio::inherit() });
            return Ok(cmd);
        }
        #[cfg(not(windows))]
        {
            let mut cmd = Command::new("cat");
            cmd.arg(stream_path);
            cmd.stdout(Stdio::piped());
            cmd.stderr(if opts.quiet { Stdio::null() } else { Stdio::inherit() });
            return Ok(cmd);
        }
    }
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(&opts.source);
    if opts.quotepath {
        cmd.arg("-c").arg("core.quotepath=false");
    }
    cmd.arg("fast-export");
    for r in &opts.refs {
        cmd.arg(r);
    }
    cmd.arg("--show-original-ids")
        .arg("--signed-tags=strip")
        .arg("--tag-of-filtered-object=rewrite")
        .arg("--fake-missing-tagger")
        .arg("--use-done-feature");
    if opts.reencode {
        cmd.arg("--reencode=yes");
    }
    if opts.mark_tags {
        cmd.arg("--mark-tags");
    }
    if opts.no_data && !opts.lfs {
        cmd.arg("--no-data");
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(if opts.quiet { Stdio::null() } else { Stdio::inherit() });
    Ok(cmd)
}

pub fn build_fast_import_cmd(opts: &Options) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(&opts.target);
    // Config overrides must precede the subcommand
    cmd.arg("-c").arg("core.ignorecase=false");
    cmd.arg("fast-import");
    cmd.arg("--force").arg("--quiet");
    cmd.arg("--date-format=raw-permissive");
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::inherit());
    cmd
}

/// Owns the exporter and importer children and the shutdown protocol: on a
/// clean finish the importer's stdin must already be closed, both children
/// are waited on, and any non-zero exit turns into a fatal error. On an
/// abort both are killed before waiting so neither blocks on a dead pipe.
pub struct Supervisor {
    exporter: Child,
    importer: Option<Child>,
}

impl Supervisor {
    pub fn spawn(opts: &Options) -> io::Result<Supervisor> {
        let exporter = build_fast_export_cmd(opts)?.spawn().map_err(|e| {
            io::Error::new(io::ErrorKind::Other, format!("failed to spawn fast-export: {e}"))
        })?;
        let importer = if opts.dry_run {
            None
        } else {
            Some(build_fast_import_cmd(opts).spawn().map_err(|e| {
                io::Error::new(io::ErrorKind::Other, format!("failed to spawn fast-import: {e}"))
            })?)
        };
        Ok(Supervisor { exporter, importer })
    }

    pub fn take_export_reader(&mut self) -> io::Result<ChildStdout> {
        self.exporter
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no stdout from fast-export"))
    }

    pub fn take_import_writer(&mut self) -> Option<ChildStdin> {
        self.importer.as_mut().and_then(|child| child.stdin.take())
    }

    pub fn finish(mut self) -> Result<()> {
        let export_status = self.exporter.wait()?;
        if !export_status.success() {
            if let Some(mut importer) = self.importer.take() {
                let _ = importer.kill();
                let _ = importer.wait();
            }
            return Err(RewriteError::ChildProcess {
                name: "fast-export",
                status: export_status,
            });
        }
        if let Some(mut importer) = self.importer.take() {
            let import_status = importer.wait()?;
            if !import_status.success() {
                return Err(RewriteError::ChildProcess {
                    name: "fast-import",
                    status: import_status,
                });
            }
        }
        Ok(())
    }

    /// Fatal-path teardown: kill both children and reap them.
    pub fn abort(mut self) {
        if let Some(mut importer) = self.importer.take() {
            let _ = importer.kill();
            let _ = importer.wait();
        }
        let _ = self.exporter.kill();
        let _ = self.exporter.wait();
    }
}
