//! `svn` command line client backend
//!
//! Working copy metadata is loaded once at startup from `svn info -R` and
//! `svn propget svn:mime-type -R`; diffs are requested per call.

use super::diff_parse::{self, DiffSummary, BINARY_MARKER};
use super::{
    DiffProvider, FileDiff, RepositoryError, RepositoryMetadata, RepositoryResult, WorkingCopy,
};
use crate::models::{LineDiff, RevisionNumber};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;
use tracing::{debug, info, trace};

/// Oldest client whose `svn info` output carries the repository root.
pub const MINIMUM_VERSION: (u32, u32, u32) = (1, 3, 10);
/// Oldest client supporting `svn diff -c`.
pub const MINIMUM_VERSION_PER_REVISION: (u32, u32, u32) = (1, 4, 0);

/// Optional credentials passed to every `svn` call.
#[derive(Debug, Clone, Default)]
pub struct SvnCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl SvnCredentials {
    fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(user) = &self.username {
            args.push("--username".to_string());
            args.push(user.clone());
            if let Some(password) = &self.password {
                args.push("--password".to_string());
                args.push(password.clone());
            }
            args.push("--no-auth-cache".to_string());
        }
        args.push("--non-interactive".to_string());
        args
    }
}

/// Parsed `svn info -R` output.
#[derive(Debug, Clone, Default)]
struct SvnInfo {
    root_url: String,
    repository_root: String,
    uuid: String,
    root_revision: Option<RevisionNumber>,
    /// Module-relative path -> last changed revision.
    revisions: HashMap<String, RevisionNumber>,
    directories: HashSet<String>,
}

/// Repository access through the `svn` executable.
pub struct SvnCommandLine {
    working_copy: WorkingCopy,
    credentials: SvnCredentials,
    version: String,
    info: SvnInfo,
    module_name: String,
    binary_files: HashSet<String>,
}

impl SvnCommandLine {
    /// Opens the working copy at `path`.
    ///
    /// Fails with a fatal error if the client is missing or too old, or if
    /// the working copy does not report a repository root and UUID.
    pub fn open(path: &Path, credentials: SvnCredentials) -> RepositoryResult<Self> {
        let working_copy = WorkingCopy::new(path);
        let version = check_version(path)?;
        info!("Using Subversion {}", version);

        let mut backend = Self {
            working_copy,
            credentials,
            version,
            info: SvnInfo::default(),
            module_name: String::new(),
            binary_files: HashSet::new(),
        };

        let output = backend.run(&["info", "-R"])?;
        let info = parse_info(&output)?;
        backend.module_name = module_name(&info.root_url, &info.repository_root);
        debug!(
            "svn info: {} paths, {} directories, module '{}'",
            info.revisions.len(),
            info.directories.len(),
            backend.module_name
        );
        backend.info = info;

        match backend.run(&["propget", "svn:mime-type", "-R"]) {
            Ok(output) => backend.binary_files = parse_binary_files(&output),
            Err(e) => info!("Unable to load mime types: {}", e),
        }

        Ok(backend)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether `svn diff -c` is available (one call per revision).
    pub fn supports_per_revision_diff(&self) -> bool {
        parse_version_triple(&self.version).is_some_and(|v| v >= MINIMUM_VERSION_PER_REVISION)
    }

    pub fn root_url(&self) -> &str {
        &self.info.root_url
    }

    fn relative_to_url(&self, relative: &str) -> String {
        let relative = relative.replace('\\', "/");
        let url = if relative == "." || relative.is_empty() {
            self.info.root_url.clone()
        } else {
            format!(
                "{}/{}",
                self.info.root_url,
                relative.strip_suffix('/').unwrap_or(&relative)
            )
        };
        url.replace(' ', "%20")
    }

    fn run(&self, args: &[&str]) -> RepositoryResult<String> {
        let command_line = format!("svn {}", args.join(" "));
        trace!(
            "{:?} firing command line: [{}]",
            std::thread::current().name(),
            command_line
        );

        let output = Command::new("svn")
            .args(args)
            .args(self.credentials.args())
            .current_dir(self.working_copy.root())
            .output()?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if stderr.contains(BINARY_MARKER) {
                return Err(RepositoryError::BinaryContent);
            }
            return Err(RepositoryError::CommandFailed {
                command: command_line,
                message: stderr.trim().to_string(),
            });
        }
        Ok(stdout)
    }
}

impl DiffProvider for SvnCommandLine {
    fn line_diff(
        &self,
        old: RevisionNumber,
        new: RevisionNumber,
        path: &str,
    ) -> RepositoryResult<LineDiff> {
        let url = self.relative_to_url(path);
        let old_target = format!("{}@{}", url, old);
        let new_target = format!("{}@{}", url, new);
        let output = self.run(&["diff", "--old", &old_target, "--new", &new_target])?;

        match diff_parse::parse_diff(&output) {
            DiffSummary::Lines(lines) => Ok(lines),
            DiffSummary::Binary => Err(RepositoryError::BinaryContent),
            DiffSummary::Unknown => Err(RepositoryError::InconclusiveDiff {
                path: path.to_string(),
                old,
                new,
            }),
        }
    }

    fn revision_diff(&self, revision: RevisionNumber) -> RepositoryResult<Vec<FileDiff>> {
        let change = revision.to_string();
        let output = self.run(&["diff", "-c", &change, &self.info.root_url])?;
        Ok(diff_parse::parse_revision_diff(&output))
    }
}

impl RepositoryMetadata for SvnCommandLine {
    fn line_count(&self, path: &str) -> RepositoryResult<i64> {
        self.working_copy.line_count(path)
    }

    fn is_directory(&self, path: &str) -> bool {
        self.info.directories.contains(path)
    }

    fn exists_in_working_copy(&self, path: &str) -> bool {
        self.info.revisions.contains_key(path)
    }

    fn is_binary(&self, path: &str) -> bool {
        self.binary_files.contains(path)
    }

    fn working_revision(&self, path: &str) -> Option<RevisionNumber> {
        self.info.revisions.get(path).copied()
    }

    fn root_revision(&self) -> Option<RevisionNumber> {
        self.info.root_revision
    }

    fn repository_uuid(&self) -> &str {
        &self.info.uuid
    }

    fn module_name(&self) -> &str {
        &self.module_name
    }
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("valid version regex"))
}

fn parse_version_triple(version: &str) -> Option<(u32, u32, u32)> {
    let caps = version_regex().captures(version)?;
    Some((
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    ))
}

/// Extracts the client version from `svn --version` output.
fn parse_version(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| version_regex().find(line))
        .map(|m| m.as_str().to_string())
}

fn format_version((major, minor, patch): (u32, u32, u32)) -> String {
    format!("{}.{}.{}", major, minor, patch)
}

fn check_version(working_copy: &Path) -> RepositoryResult<String> {
    let required = format_version(MINIMUM_VERSION);
    let output = Command::new("svn")
        .arg("--version")
        .current_dir(working_copy)
        .output()
        .map_err(|e| RepositoryError::VersionMismatch {
            found: format!("no usable svn client ({})", e),
            required: required.clone(),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let version = parse_version(&stdout).ok_or_else(|| RepositoryError::VersionMismatch {
        found: "unknown version".to_string(),
        required: required.clone(),
    })?;

    match parse_version_triple(&version) {
        Some(found) if found >= MINIMUM_VERSION => Ok(version),
        _ => Err(RepositoryError::VersionMismatch {
            found: version,
            required,
        }),
    }
}

/// Parses the plain-text output of `svn info -R` run at the working copy root.
fn parse_info(output: &str) -> RepositoryResult<SvnInfo> {
    let mut info = SvnInfo::default();

    for block in output.split("\n\n") {
        let mut path = None;
        let mut url = None;
        let mut kind = None;
        let mut revision = None;
        let mut last_changed = None;
        let mut repository_root = None;
        let mut uuid = None;

        for line in block.lines() {
            let Some((key, value)) = line.split_once(": ") else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "Path" => path = Some(value.replace('\\', "/")),
                "URL" => url = Some(value.to_string()),
                "Node Kind" => kind = Some(value.to_string()),
                "Revision" => revision = value.parse::<RevisionNumber>().ok(),
                "Last Changed Rev" => last_changed = value.parse::<RevisionNumber>().ok(),
                "Repository Root" => repository_root = Some(value.to_string()),
                "Repository UUID" => uuid = Some(value.to_string()),
                _ => {}
            }
        }

        let Some(path) = path else {
            continue;
        };
        let path = path.strip_prefix("./").unwrap_or(&path).to_string();

        if path == "." && info.root_url.is_empty() {
            info.root_url = url.clone().unwrap_or_default();
            info.root_revision = revision;
            info.repository_root = repository_root.unwrap_or_default();
            info.uuid = uuid.unwrap_or_default();
        }
        if let Some(rev) = last_changed.or(revision) {
            info.revisions.insert(path.clone(), rev);
        }
        if kind.as_deref() == Some("directory") {
            info.directories.insert(path);
        }
    }

    if info.root_url.is_empty() || info.repository_root.is_empty() {
        return Err(RepositoryError::MissingMetadata(format!(
            "repository root not available; check out the module with Subversion {} or newer",
            format_version(MINIMUM_VERSION)
        )));
    }
    if info.uuid.is_empty() {
        return Err(RepositoryError::MissingMetadata(
            "repository UUID not available".to_string(),
        ));
    }
    Ok(info)
}

/// Module name: the root URL with the repository root stripped, decoded.
fn module_name(root_url: &str, repository_root: &str) -> String {
    match root_url.strip_prefix(repository_root) {
        Some(rest) => percent_decode(rest),
        None => {
            info!("Unable to process module name.");
            String::new()
        }
    }
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(byte) = decoded {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Paths whose `svn:mime-type` is not textual.
fn parse_binary_files(output: &str) -> HashSet<String> {
    const OCTET_STREAM: &str = " - application/octet-stream";
    output
        .lines()
        .filter_map(|line| {
            let line = line.replace('\\', "/");
            let separator = line.rfind(" - ")?;
            let textual = line[separator..].starts_with(" - text/");
            if line.ends_with(OCTET_STREAM) || !textual {
                Some(line[..separator].to_string())
            } else {
                None
            }
        })
        .collect()
}
