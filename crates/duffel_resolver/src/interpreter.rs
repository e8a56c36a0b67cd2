//! The identity of the interpreter that resolved distributions must run on.
//!
//! The resolver never imports anything itself; it only needs to know which
//! built archives the *target* interpreter can load. That knowledge is an
//! [`InterpreterIdentity`]: implementation, version, and ABI, from which the
//! ordered set of supported compatibility tags and the environment-marker
//! snapshot are derived. An identity is usually obtained by probing a real
//! interpreter with [`InterpreterIdentity::from_python`].

use std::io;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::str::FromStr;

use miette::Diagnostic;
use pep440_rs::Version;
use serde::Deserialize;
use thiserror::Error;

use crate::marker::MarkerSnapshot;
use crate::tags::{CompatibilityTag, CompatibilityTags, Platform};
use crate::types::Requirement;

/// A `major.minor.micro` interpreter version.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize)]
#[allow(missing_docs)]
pub struct PythonVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

impl PythonVersion {
    /// The `major.minor` rendering used by egg tags and `python_version`.
    pub fn python(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }

    /// The full `major.minor.micro` rendering.
    pub fn full(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.micro)
    }
}

/// The identity of a target interpreter: implementation, version and ABI.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InterpreterIdentity {
    /// Implementation name as reported by the interpreter, e.g. `CPython`.
    pub implementation: String,
    /// Interpreter version.
    pub version: PythonVersion,
    /// ABI tag, e.g. `cp27m`, or `none` when the implementation has no
    /// stable ABI naming.
    pub abi: String,
}

/// Error produced when probing an interpreter fails.
#[derive(Debug, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum ProbeError {
    #[error("could not find an interpreter named '{0}'")]
    NotFound(String),

    #[error(transparent)]
    FailedToExecute(#[from] io::Error),

    #[error("interpreter probe exited with {0}")]
    FailedToRun(ExitStatus),

    #[error("interpreter probe produced unparseable output")]
    FailedToParse(#[from] serde_json::Error),
}

const PROBE_SCRIPT: &str = r#"
import json
import os
import platform
import sys

impl = platform.python_implementation()

def full_version(info):
    version = "%d.%d.%d" % (info[0], info[1], info[2])
    if info[3] != "final":
        version += info[3][0] + str(info[4])
    return version

if impl == "CPython":
    abi = "cp%d%d%s" % (sys.version_info[0], sys.version_info[1], getattr(sys, "abiflags", ""))
else:
    abi = "none"

if hasattr(sys, "implementation"):
    implementation_name = sys.implementation.name
    implementation_version = full_version(sys.implementation.version)
else:
    implementation_name = impl.lower()
    implementation_version = full_version(sys.version_info)

print(json.dumps({
    "implementation": impl,
    "version": [sys.version_info[0], sys.version_info[1], sys.version_info[2]],
    "abi": abi,
    "markers": {
        "os_name": os.name,
        "sys_platform": sys.platform,
        "platform_machine": platform.machine(),
        "platform_python_implementation": impl,
        "platform_release": platform.release(),
        "platform_version": platform.version(),
        "python_version": "%d.%d" % (sys.version_info[0], sys.version_info[1]),
        "python_full_version": full_version(sys.version_info),
        "implementation_name": implementation_name,
        "implementation_version": implementation_version,
    },
}))
"#;

#[derive(Deserialize)]
struct ProbePayload {
    implementation: String,
    version: [u32; 3],
    abi: String,
    markers: MarkerSnapshot,
}

impl InterpreterIdentity {
    /// Probes an interpreter for its identity and marker snapshot. `python`
    /// is either a path to an executable or a bare name looked up on `PATH`.
    pub async fn from_python(
        python: &str,
    ) -> Result<(InterpreterIdentity, MarkerSnapshot), ProbeError> {
        let executable = if python.contains(std::path::MAIN_SEPARATOR) || python.contains('/') {
            PathBuf::from(python)
        } else {
            which::which(python).map_err(|_| ProbeError::NotFound(python.to_owned()))?
        };

        let output = match tokio::process::Command::new(&executable)
            .arg("-c")
            .arg(PROBE_SCRIPT)
            .output()
            .await
        {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ProbeError::NotFound(python.to_owned()))
            }
            Err(e) => return Err(ProbeError::FailedToExecute(e)),
            Ok(output) => output,
        };

        if !output.status.success() {
            return Err(ProbeError::FailedToRun(output.status));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let payload: ProbePayload = serde_json::from_str(stdout.trim())?;
        let identity = InterpreterIdentity {
            implementation: payload.implementation,
            version: PythonVersion {
                major: payload.version[0],
                minor: payload.version[1],
                micro: payload.version[2],
            },
            abi: payload.abi,
        };
        Ok((identity, payload.markers))
    }

    /// The `major.minor` interpreter version, as used by egg tags.
    pub fn python(&self) -> String {
        self.version.python()
    }

    /// The two-letter interpreter abbreviation used in PEP-425 tags.
    pub fn abbreviation(&self) -> &str {
        match self.implementation.to_ascii_lowercase().as_str() {
            "cpython" => "cp",
            "pypy" => "pp",
            "ironpython" => "ip",
            "jython" => "jy",
            _ => "py",
        }
    }

    /// The deterministic ordered list of tags this interpreter can load on
    /// `platform`, most specific first.
    pub fn tags(&self, platform: &Platform) -> CompatibilityTags {
        let abbr = self.abbreviation();
        let major = self.version.major;
        let minor = self.version.minor;
        let interp = format!("{abbr}{major}{minor}");
        let plat = platform.as_str();

        let mut tags = Vec::new();
        tags.push(CompatibilityTag {
            python: interp.clone(),
            abi: self.abi.clone(),
            platform: plat.to_owned(),
        });
        if abbr == "cp" {
            // CPython can load any stable-ABI wheel built for the same or an
            // older minor version.
            for m in (2..=minor).rev() {
                tags.push(CompatibilityTag {
                    python: format!("cp{major}{m}"),
                    abi: String::from("abi3"),
                    platform: plat.to_owned(),
                });
            }
        }
        tags.push(CompatibilityTag {
            python: interp.clone(),
            abi: String::from("none"),
            platform: plat.to_owned(),
        });
        tags.push(CompatibilityTag {
            python: format!("py{major}{minor}"),
            abi: String::from("none"),
            platform: plat.to_owned(),
        });
        tags.push(CompatibilityTag {
            python: format!("py{major}"),
            abi: String::from("none"),
            platform: plat.to_owned(),
        });
        tags.push(CompatibilityTag {
            python: format!("py{major}{minor}"),
            abi: String::from("none"),
            platform: String::from("any"),
        });
        tags.push(CompatibilityTag {
            python: format!("py{major}"),
            abi: String::from("none"),
            platform: String::from("any"),
        });
        for m in (0..minor).rev() {
            tags.push(CompatibilityTag {
                python: format!("py{major}{m}"),
                abi: String::from("none"),
                platform: String::from("any"),
            });
        }
        tags.into_iter().collect()
    }

    /// Derives the marker snapshot for this identity on `platform`, for use
    /// when the target interpreter cannot be executed (cross-resolving).
    /// Release/version markers that only the live system knows stay empty.
    pub fn marker_snapshot(&self, platform: &Platform) -> MarkerSnapshot {
        let plat = platform.as_str();
        let (os_name, sys_platform) = if plat.starts_with("win") {
            ("nt", "win32")
        } else if plat.starts_with("macosx") {
            ("posix", "darwin")
        } else if plat.starts_with("linux") || plat.starts_with("manylinux") {
            ("posix", "linux")
        } else {
            ("posix", "")
        };
        MarkerSnapshot {
            os_name: os_name.to_owned(),
            sys_platform: sys_platform.to_owned(),
            platform_machine: machine_of(plat),
            platform_python_implementation: self.implementation.clone(),
            platform_release: String::new(),
            platform_version: String::new(),
            python_version: self.version.python(),
            python_full_version: self.version.full(),
            implementation_name: self.implementation.to_ascii_lowercase(),
            implementation_version: self.version.full(),
        }
    }

    /// Does this interpreter meet an interpreter constraint such as
    /// `CPython>=2.7,<3`?
    pub fn satisfies(&self, requirement: &Requirement) -> bool {
        let full = Version::from_str(&self.version.full()).expect("x.y.z is a valid version");
        requirement.name.as_str() == self.implementation.to_ascii_lowercase()
            && requirement.versions_match(&full)
    }
}

fn machine_of(platform: &str) -> String {
    for arch in ["x86_64", "aarch64", "arm64", "amd64", "i686", "i386", "ppc64le", "s390x"] {
        if platform.ends_with(arch) {
            return arch.to_owned();
        }
    }
    String::new()
}
