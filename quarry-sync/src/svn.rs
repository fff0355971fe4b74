//! [`VcsBackend`] driving the `svn` command-line client.
//!
//! Every call spawns one `svn` process with `--non-interactive` and
//! `--no-auth-cache`, parses its plain-text output line by line and polls the
//! event sink for cancellation before each line. On cancellation the child is
//! killed.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;

use chrono::{DateTime, Utc};

use quarry_core::Credentials;

use crate::error::{vcs_io_err, VcsError};
use crate::vcs::{
    Depth, DirEntry, EventSink, NodeKind, RevisionInfo, Revision, UpdateAction, UpdateEvent,
    VcsBackend,
};

#[derive(Debug, Clone)]
pub struct SvnCli {
    program: PathBuf,
}

impl Default for SvnCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("svn"),
        }
    }
}

impl SvnCli {
    fn command(&self, subcommand: &str, credentials: Option<&Credentials>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(subcommand)
            .arg("--non-interactive")
            .arg("--no-auth-cache");
        if let Some(creds) = credentials {
            cmd.arg("--username")
                .arg(&creds.username)
                .arg("--password")
                .arg(&creds.password);
        }
        cmd.env("LC_ALL", "C");
        cmd
    }

    fn spawn_error(&self, err: std::io::Error) -> VcsError {
        if err.kind() == std::io::ErrorKind::NotFound {
            VcsError::Vcs {
                code: None,
                message: format!("'{}' executable not found", self.program.display()),
            }
        } else {
            vcs_io_err(&self.program, err)
        }
    }

    /// Run to completion, returning stdout.
    fn capture(&self, mut cmd: Command) -> Result<Vec<u8>, VcsError> {
        let output = cmd.output().map_err(|e| self.spawn_error(e))?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(VcsError::from_stderr(&String::from_utf8_lossy(&output.stderr)))
        }
    }

    /// Run while feeding each stdout line to `on_line`, polling `sink` for
    /// cancellation before every line.
    fn stream(
        &self,
        mut cmd: Command,
        sink: &mut dyn EventSink,
        mut on_line: impl FnMut(&str, &mut dyn EventSink) -> Result<(), VcsError>,
    ) -> Result<(), VcsError> {
        sink.check_cancelled()?;
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stderr_reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text);
                text
            })
        });

        let outcome = match child.stdout.take() {
            Some(stdout) => read_lines(stdout, sink, &mut on_line),
            None => Ok(()),
        };
        if let Err(err) = outcome {
            abort(&mut child);
            return Err(err);
        }

        let status = child.wait().map_err(|e| vcs_io_err(&self.program, e))?;
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        if status.success() {
            Ok(())
        } else {
            Err(VcsError::from_stderr(&stderr))
        }
    }

    /// `export --force --depth <depth|infinity> <url>@HEAD <path>`
    fn export_command(
        &self,
        url: &str,
        path: &Path,
        depth: Option<Depth>,
        credentials: Option<&Credentials>,
    ) -> Command {
        let mut cmd = self.command("export", credentials);
        cmd.arg("--force")
            .arg("--depth")
            .arg(depth.unwrap_or(Depth::Infinity).as_arg())
            .arg(target_at(url, Revision::Head))
            .arg(path);
        cmd
    }

    fn working_revision(
        &self,
        path: &Path,
        credentials: Option<&Credentials>,
    ) -> Result<Option<u64>, VcsError> {
        Ok(self
            .info(&path.display().to_string(), false, credentials)?
            .and_then(|info| info.revision))
    }

    /// Estimate for an incomplete working copy: items missing locally or
    /// added remotely and absent locally, directories excluded.
    ///
    /// The status listing carries no node kind, so a path with listed entries
    /// beneath it counts as a directory. Empty remote directories are still
    /// counted.
    fn estimate_incomplete(entries: &[StatusEntry]) -> u64 {
        let absent: Vec<&Path> = entries
            .iter()
            .filter(|entry| entry.item == '!' || entry.out_of_date)
            .filter(|entry| !entry.path.exists())
            .map(|entry| entry.path.as_path())
            .collect();
        absent
            .iter()
            .filter(|path| {
                !entries
                    .iter()
                    .any(|other| other.path != **path && other.path.starts_with(path))
            })
            .count() as u64
    }
}

fn read_lines(
    stdout: impl Read,
    sink: &mut dyn EventSink,
    on_line: &mut impl FnMut(&str, &mut dyn EventSink) -> Result<(), VcsError>,
) -> Result<(), VcsError> {
    for line in BufReader::new(stdout).lines() {
        let line = line.map_err(|e| vcs_io_err("svn stdout", e))?;
        sink.check_cancelled()?;
        on_line(&line, &mut *sink)?;
    }
    Ok(())
}

fn abort(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn target_at(url: &str, revision: Revision) -> String {
    format!("{url}@{revision}")
}

impl VcsBackend for SvnCli {
    fn info(
        &self,
        target: &str,
        remote: bool,
        credentials: Option<&Credentials>,
    ) -> Result<Option<RevisionInfo>, VcsError> {
        if !remote && !Path::new(target).exists() {
            return Ok(None);
        }
        let mut cmd = self.command("info", credentials);
        if remote {
            cmd.arg(target_at(target, Revision::Head));
        } else {
            cmd.arg(target);
        }
        let stdout = self.capture(cmd)?;
        Ok(Some(parse_info(&String::from_utf8_lossy(&stdout))))
    }

    fn list(
        &self,
        url: &str,
        depth: Depth,
        credentials: Option<&Credentials>,
    ) -> Result<Vec<DirEntry>, VcsError> {
        let mut cmd = self.command("list", credentials);
        cmd.arg("--depth").arg(depth.as_arg()).arg(url);
        let stdout = self.capture(cmd)?;
        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .filter_map(parse_list_line)
            .collect())
    }

    fn estimate_changes(
        &self,
        path: &Path,
        url: &str,
        revision: Revision,
        credentials: Option<&Credentials>,
        sink: &mut dyn EventSink,
    ) -> Result<u64, VcsError> {
        let mut changes = 0u64;

        if !self.is_working_copy(path) {
            let mut cmd = self.command("list", credentials);
            cmd.arg("--depth")
                .arg(Depth::Infinity.as_arg())
                .arg(target_at(url, revision));
            self.stream(cmd, sink, |line, _| {
                if let Some(entry) = parse_list_line(line) {
                    if entry.kind != NodeKind::Dir {
                        changes += 1;
                    }
                }
                Ok(())
            })?;
            return Ok(changes);
        }

        let mut entries = Vec::new();
        let mut cmd = self.command("status", credentials);
        cmd.arg("--show-updates").arg(path);
        self.stream(cmd, sink, |line, _| {
            if let Some(entry) = parse_status_line(line) {
                entries.push(entry);
            }
            Ok(())
        })?;

        let incomplete = entries
            .iter()
            .any(|entry| entry.item == '!' && entry.path.is_dir());
        if incomplete {
            return Ok(Self::estimate_incomplete(&entries));
        }

        let Some(current) = self.working_revision(path, credentials)? else {
            return Ok(0);
        };
        let mut cmd = self.command("diff", credentials);
        cmd.arg("--summarize")
            .arg(format!("--old={}", target_at(url, Revision::Number(current))))
            .arg(format!("--new={}", target_at(url, revision)));
        self.stream(cmd, sink, |line, _| {
            if !line.trim().is_empty() {
                changes += 1;
            }
            Ok(())
        })?;
        Ok(changes)
    }

    fn checkout(
        &self,
        url: &str,
        path: &Path,
        revision: Revision,
        credentials: Option<&Credentials>,
        sink: &mut dyn EventSink,
    ) -> Result<(), VcsError> {
        let mut cmd = self.command("checkout", credentials);
        cmd.arg("--depth")
            .arg(Depth::Infinity.as_arg())
            .arg("-r")
            .arg(revision.to_string())
            .arg(url)
            .arg(path);
        self.stream(cmd, sink, forward_update_line)
    }

    fn update(
        &self,
        path: &Path,
        revision: Revision,
        credentials: Option<&Credentials>,
        sink: &mut dyn EventSink,
    ) -> Result<(), VcsError> {
        let mut cmd = self.command("update", credentials);
        cmd.arg("-r").arg(revision.to_string()).arg(path);
        self.stream(cmd, sink, forward_update_line)
    }

    fn cleanup(&self, path: &Path) -> Result<(), VcsError> {
        let mut cmd = self.command("cleanup", None);
        cmd.arg(path);
        self.capture(cmd).map(|_| ())
    }

    fn export(
        &self,
        url: &str,
        path: &Path,
        depth: Option<Depth>,
        credentials: Option<&Credentials>,
    ) -> Result<(), VcsError> {
        self.capture(self.export_command(url, path, depth, credentials))
            .map(|_| ())
    }

    fn cat(&self, url: &str, credentials: Option<&Credentials>) -> Result<Vec<u8>, VcsError> {
        let mut cmd = self.command("cat", credentials);
        cmd.arg(target_at(url, Revision::Head));
        self.capture(cmd)
    }
}

fn forward_update_line(line: &str, sink: &mut dyn EventSink) -> Result<(), VcsError> {
    match parse_update_line(line) {
        Some(event) => sink.handle_event(&event),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

/// `svn info` key/value output.
pub(crate) fn parse_info(text: &str) -> RevisionInfo {
    let mut info = RevisionInfo::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(": ") else {
            continue;
        };
        let value = value.trim();
        match key {
            "Revision" => info.revision = value.parse().ok(),
            "Last Changed Rev" => info.committed_revision = value.parse().ok(),
            "Last Changed Date" => info.committed_date = parse_svn_date(value),
            _ => {}
        }
    }
    info
}

/// `2024-03-01 14:02:11 +0100 (Fri, 01 Mar 2024)`
fn parse_svn_date(value: &str) -> Option<DateTime<Utc>> {
    let stamp = value.get(..25)?;
    DateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S %z")
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// One `svn list` line; a trailing `/` marks a directory.
pub(crate) fn parse_list_line(line: &str) -> Option<DirEntry> {
    let line = line.trim_end();
    if line.is_empty() {
        return None;
    }
    Some(match line.strip_suffix('/') {
        Some(dir) => DirEntry {
            path: dir.to_string(),
            kind: NodeKind::Dir,
        },
        None => DirEntry {
            path: line.to_string(),
            kind: NodeKind::File,
        },
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatusEntry {
    /// First status column (`!` missing/incomplete, `A`, `M`, ...).
    pub item: char,
    /// `*` in the out-of-date column.
    pub out_of_date: bool,
    pub path: PathBuf,
}

/// One `svn status --show-updates` line:
/// seven status columns, a space, the out-of-date column, a space, the
/// working revision (blank for remote additions) and the path.
pub(crate) fn parse_status_line(line: &str) -> Option<StatusEntry> {
    if line.starts_with("Status against revision") || line.len() < 10 {
        return None;
    }
    let columns: Vec<char> = line.chars().take(9).collect();
    if columns.len() < 9 {
        return None;
    }
    let item = columns[0];
    let out_of_date = columns[8] == '*';
    let rest = line.get(9..)?.trim_start();
    let path = match rest.split_once(char::is_whitespace) {
        Some((rev, path)) if rev.chars().all(|c| c.is_ascii_digit() || c == '-') => {
            path.trim_start()
        }
        _ => rest,
    };
    if path.is_empty() {
        return None;
    }
    Some(StatusEntry {
        item,
        out_of_date,
        path: PathBuf::from(path),
    })
}

/// One line of `svn checkout`/`svn update` output.
pub(crate) fn parse_update_line(line: &str) -> Option<UpdateEvent> {
    let marker = |action| UpdateEvent {
        action,
        path: PathBuf::new(),
        kind: NodeKind::Dir,
    };
    if line.starts_with("Updating '") {
        return Some(marker(UpdateAction::Started));
    }
    if line.starts_with("At revision")
        || line.starts_with("Updated to revision")
        || line.starts_with("Checked out revision")
    {
        return Some(marker(UpdateAction::Completed));
    }
    if let Some(rest) = line.strip_prefix("Restored '") {
        let path = PathBuf::from(rest.trim_end().trim_end_matches('\''));
        return Some(UpdateEvent {
            action: UpdateAction::Restore,
            kind: node_kind(&path),
            path,
        });
    }

    let flags: Vec<char> = line.chars().take(5).collect();
    if flags.len() < 5
        || flags[4] != ' '
        || !flags[..4].iter().all(|c| "ADUCGEB ".contains(*c))
        || flags[..4].iter().all(|c| *c == ' ')
    {
        return None;
    }
    let path = PathBuf::from(line.get(5..)?.trim());
    if path.as_os_str().is_empty() {
        return None;
    }
    let action = match (flags[0], flags[1]) {
        ('A', _) => UpdateAction::Add,
        ('D', _) => UpdateAction::Delete,
        ('U' | 'G', _) | (' ', 'U' | 'G') => UpdateAction::Update,
        ('C', _) | (' ', 'C') => UpdateAction::Other("conflict".into()),
        ('E', _) => UpdateAction::Other("exists".into()),
        (other, _) => UpdateAction::Other(other.to_string()),
    };
    Some(UpdateEvent {
        action,
        kind: node_kind(&path),
        path,
    })
}

/// Deleted items no longer exist and are reported as files.
fn node_kind(path: &Path) -> NodeKind {
    if path.is_dir() {
        NodeKind::Dir
    } else {
        NodeKind::File
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn info_output_is_parsed() {
        let text = "Path: .\nURL: svn://host/repo/dev/2.1\nRevision: 812\nNode Kind: directory\n\
                    Last Changed Rev: 809\n\
                    Last Changed Date: 2024-03-01 14:02:11 +0100 (Fri, 01 Mar 2024)\n";
        let info = parse_info(text);
        assert_eq!(info.revision, Some(812));
        assert_eq!(info.committed_revision, Some(809));
        assert_eq!(
            info.committed_date.unwrap().to_rfc3339(),
            "2024-03-01T13:02:11+00:00"
        );
    }

    #[test]
    fn info_without_commit_metadata_is_not_committed() {
        let info = parse_info("Path: .\nRevision: 0\nSchedule: normal\n");
        assert!(!info.is_committed());
    }

    #[rstest]
    #[case("trunk/", "trunk", NodeKind::Dir)]
    #[case("a/b/file.txt", "a/b/file.txt", NodeKind::File)]
    fn list_lines(#[case] line: &str, #[case] path: &str, #[case] kind: NodeKind) {
        let entry = parse_list_line(line).unwrap();
        assert_eq!(entry.path, path);
        assert_eq!(entry.kind, kind);
    }

    #[rstest]
    #[case("A    /w/src/new.txt", UpdateAction::Add)]
    #[case("D    /w/src/old.txt", UpdateAction::Delete)]
    #[case("U    /w/src/main.rs", UpdateAction::Update)]
    #[case("G    /w/src/merged.rs", UpdateAction::Update)]
    #[case(" U   /w/src", UpdateAction::Update)]
    #[case("C    /w/src/clash.rs", UpdateAction::Other("conflict".into()))]
    #[case("Restored '/w/src/lost.txt'", UpdateAction::Restore)]
    #[case("Updating '/w':", UpdateAction::Started)]
    #[case("At revision 12.", UpdateAction::Completed)]
    #[case("Checked out revision 12.", UpdateAction::Completed)]
    fn update_lines(#[case] line: &str, #[case] action: UpdateAction) {
        assert_eq!(parse_update_line(line).unwrap().action, action);
    }

    #[rstest]
    #[case("")]
    #[case("Fetching external item into '/w/ext':")]
    #[case("Summary of conflicts:")]
    fn non_item_lines_are_ignored(#[case] line: &str) {
        assert!(parse_update_line(line).is_none());
    }

    #[test]
    fn status_lines_with_and_without_working_revision() {
        let local = parse_status_line("!       *      812   /w/src/gone.txt").unwrap();
        assert_eq!(local.item, '!');
        assert!(local.out_of_date);
        assert_eq!(local.path, PathBuf::from("/w/src/gone.txt"));

        let remote = parse_status_line("        *            /w/src/added.txt").unwrap();
        assert_eq!(remote.item, ' ');
        assert!(remote.out_of_date);
        assert_eq!(remote.path, PathBuf::from("/w/src/added.txt"));

        assert!(parse_status_line("Status against revision:    815").is_none());
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn export_defaults_to_infinite_depth() {
        let svn = SvnCli {
            program: PathBuf::from("/opt/svn/bin/svn"),
        };
        let cmd = svn.export_command("svn://host/repo/dev/2.1", Path::new("/tmp/out"), None, None);
        assert_eq!(cmd.get_program(), "/opt/svn/bin/svn");
        assert_eq!(
            args(&cmd),
            [
                "export",
                "--non-interactive",
                "--no-auth-cache",
                "--force",
                "--depth",
                "infinity",
                "svn://host/repo/dev/2.1@HEAD",
                "/tmp/out",
            ]
        );
    }

    #[test]
    fn export_passes_depth_and_credentials() {
        let creds = Credentials {
            username: "builder".into(),
            password: "s3cret".into(),
        };
        let cmd = SvnCli::default().export_command(
            "svn://host/repo",
            Path::new("out"),
            Some(Depth::Files),
            Some(&creds),
        );
        let args = args(&cmd);
        assert_eq!(args[3..7], ["--username", "builder", "--password", "s3cret"]);
        assert_eq!(args[8..10], ["--depth", "files"]);
    }

    #[test]
    fn incomplete_estimate_counts_absent_files_only() {
        let dir = tempfile::TempDir::new().unwrap();
        let present = dir.path().join("present.txt");
        std::fs::write(&present, "x").unwrap();
        let entries = vec![
            StatusEntry {
                item: '!',
                out_of_date: false,
                path: dir.path().join("missing.txt"),
            },
            StatusEntry {
                item: ' ',
                out_of_date: true,
                path: dir.path().join("remote-new.txt"),
            },
            StatusEntry {
                item: ' ',
                out_of_date: true,
                path: present,
            },
            StatusEntry {
                item: '!',
                out_of_date: false,
                path: dir.path().to_path_buf(),
            },
            StatusEntry {
                item: ' ',
                out_of_date: true,
                path: dir.path().join("remote-dir"),
            },
            StatusEntry {
                item: ' ',
                out_of_date: true,
                path: dir.path().join("remote-dir").join("nested.txt"),
            },
        ];
        // missing.txt, remote-new.txt and remote-dir/nested.txt
        assert_eq!(SvnCli::estimate_incomplete(&entries), 3);
    }
}
