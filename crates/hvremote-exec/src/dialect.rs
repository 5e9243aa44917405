//! Remote shell dialects
//!
//! Everything that differs between a Windows (PowerShell) host and a POSIX
//! host lives here as pure functions: path joining, quoting, existence
//! probes, deletion, directory creation, base64 file writes and the naming
//! of temporary upload directories. Transports pick a [`Dialect`] from the
//! connection config and never branch on the host type themselves.

use serde::{Deserialize, Serialize};

/// Prefix of every generated upload directory name
pub const UPLOAD_DIR_PREFIX: &str = "hyperv-upload-";

/// Remote shell family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Windows host, commands run through PowerShell
    #[default]
    Windows,
    /// Unix host, commands run through a POSIX shell
    Posix,
}

impl Dialect {
    /// Path separator on the remote host
    #[must_use]
    pub fn separator(self) -> char {
        match self {
            Dialect::Windows => '\\',
            Dialect::Posix => '/',
        }
    }

    /// Default directory under which upload directories are created
    #[must_use]
    pub fn default_temp_dir(self) -> &'static str {
        match self {
            Dialect::Windows => "C:\\Temp",
            Dialect::Posix => "/tmp",
        }
    }

    /// Whether `path` names a directory rather than a file
    #[must_use]
    pub fn is_dir_path(self, path: &str) -> bool {
        path.is_empty() || path.ends_with('/') || (self == Dialect::Windows && path.ends_with('\\'))
    }

    /// Join a base path and a relative path
    ///
    /// `relative` may use either separator; the result uses this dialect's.
    #[must_use]
    pub fn join(self, base: &str, relative: &str) -> String {
        let sep = self.separator();
        let relative = self.normalize(relative);
        let relative = relative.trim_start_matches(sep);
        if base.is_empty() {
            return relative.to_string();
        }
        let base = self.normalize(base);
        if base.ends_with(sep) {
            format!("{base}{relative}")
        } else {
            format!("{base}{sep}{relative}")
        }
    }

    /// Parent directory of `path`, or `None` for a bare file name
    #[must_use]
    pub fn parent(self, path: &str) -> Option<String> {
        let path = self.normalize(path);
        let sep = self.separator();
        let trimmed = path.trim_end_matches(sep);
        let idx = trimmed.rfind(sep)?;
        let parent = &trimmed[..idx];
        if parent.is_empty() {
            Some(sep.to_string())
        } else if self == Dialect::Windows && parent.len() == 2 && parent.ends_with(':') {
            Some(format!("{parent}{sep}"))
        } else {
            Some(parent.to_string())
        }
    }

    /// Convert separators to this dialect's
    #[must_use]
    pub fn normalize(self, path: &str) -> String {
        match self {
            Dialect::Windows => path.replace('/', "\\"),
            Dialect::Posix => path.to_string(),
        }
    }

    /// Quote a value as a single-quoted shell literal
    #[must_use]
    pub fn quote(self, value: &str) -> String {
        match self {
            Dialect::Windows => format!("'{}'", value.replace('\'', "''")),
            Dialect::Posix => format!("'{}'", value.replace('\'', "'\\''")),
        }
    }

    /// Directory name for a directory upload started at `unix_timestamp`
    ///
    /// `suffix` tells apart uploads started within the same second.
    #[must_use]
    pub fn upload_root(self, temp_dir: Option<&str>, unix_timestamp: i64, suffix: &str) -> String {
        let base = temp_dir.unwrap_or_else(|| self.default_temp_dir());
        self.join(base, &format!("{UPLOAD_DIR_PREFIX}{unix_timestamp}-{suffix}"))
    }

    /// Command printing `true` or `false` depending on whether a file exists
    #[must_use]
    pub fn file_exists_command(self, path: &str) -> String {
        match self {
            Dialect::Windows => powershell(&format!(
                "Test-Path -Path {} -PathType Leaf",
                self.quote(path)
            )),
            Dialect::Posix => format!(
                "test -f {} && echo 'true' || echo 'false'",
                self.quote(path)
            ),
        }
    }

    /// Command printing `true` or `false` depending on whether a directory exists
    #[must_use]
    pub fn directory_exists_command(self, path: &str) -> String {
        match self {
            Dialect::Windows => powershell(&format!(
                "Test-Path -Path {} -PathType Container",
                self.quote(path)
            )),
            Dialect::Posix => format!(
                "test -d {} && echo 'true' || echo 'false'",
                self.quote(path)
            ),
        }
    }

    /// Interpret the stdout of an existence probe
    ///
    /// `None` means the output was neither `true` nor `false`.
    #[must_use]
    pub fn parse_probe(self, stdout: &str) -> Option<bool> {
        let out = stdout.trim();
        match self {
            Dialect::Windows if out.eq_ignore_ascii_case("true") => Some(true),
            Dialect::Windows if out.eq_ignore_ascii_case("false") => Some(false),
            Dialect::Posix if out == "true" => Some(true),
            Dialect::Posix if out == "false" => Some(false),
            _ => None,
        }
    }

    /// Command removing a file or directory tree
    #[must_use]
    pub fn delete_command(self, path: &str) -> String {
        match self {
            Dialect::Windows => powershell(&format!(
                "Remove-Item -Path {} -Recurse -Force -ErrorAction SilentlyContinue",
                self.quote(path)
            )),
            Dialect::Posix => format!("rm -rf {}", self.quote(path)),
        }
    }

    /// Command creating a directory and its parents
    #[must_use]
    pub fn mkdir_command(self, path: &str) -> String {
        match self {
            Dialect::Windows => powershell(&format!(
                "New-Item -ItemType Directory -Force -Path {} | Out-Null",
                self.quote(path)
            )),
            Dialect::Posix => format!("mkdir -p {}", self.quote(path)),
        }
    }

    /// Command decoding one base64 chunk into `path`
    ///
    /// The first chunk truncates the file, later ones append.
    #[must_use]
    pub fn write_base64_command(self, path: &str, encoded: &str, append: bool) -> String {
        match self {
            Dialect::Windows if append => powershell(&format!(
                "$bytes = [System.Convert]::FromBase64String('{encoded}'); \
                 $stream = [System.IO.File]::Open({}, [System.IO.FileMode]::Append); \
                 $stream.Write($bytes, 0, $bytes.Length); $stream.Close()",
                self.quote(path)
            )),
            Dialect::Windows => powershell(&format!(
                "$bytes = [System.Convert]::FromBase64String('{encoded}'); \
                 [System.IO.File]::WriteAllBytes({}, $bytes)",
                self.quote(path)
            )),
            Dialect::Posix => format!(
                "echo '{encoded}' | base64 -d {} {}",
                if append { ">>" } else { ">" },
                self.quote(path)
            ),
        }
    }
}

/// Wrap a PowerShell statement for a host whose login shell may be `cmd.exe`
fn powershell(statement: &str) -> String {
    format!("powershell -Command \"{statement}\"")
}
