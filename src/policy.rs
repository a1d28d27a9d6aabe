//! Library classification by bare file name.
//!
//! Patterns use `*` as the only wildcard and match the whole, case-sensitive
//! bare name. They are compiled once into a [`RegexSet`] per list.

use regex::RegexSet;
use std::fmt;
use std::str::FromStr;

/// Target platform of the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// ELF binaries, `$ORIGIN`-relative run-paths.
    Linux,
    /// Mach-O binaries, `@rpath` / `@loader_path` references.
    Darwin,
}

impl Platform {
    /// Platform of the running host.
    pub fn native() -> Self {
        if cfg!(target_os = "macos") {
            Platform::Darwin
        } else {
            Platform::Linux
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" | "elf" => Ok(Platform::Linux),
            "darwin" | "macos" | "macho" | "mach-o" => Ok(Platform::Darwin),
            other => Err(format!("unknown platform '{other}' (expected linux or darwin)")),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => f.write_str("linux"),
            Platform::Darwin => f.write_str("darwin"),
        }
    }
}

/// How a library is treated by the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Provided by the operating system; never copied, never framework-mapped.
    System,
    /// Provided by whatever hosts the bundle; not copied, not traced further.
    Host,
    /// Everything else: copied into the bundle.
    Bundle,
}

const LINUX_SYSTEM_DEFAULTS: &[&str] = &[
    "ld-linux*.so*",
    "ld64.so*",
    "linux-vdso.so*",
    "linux-gate.so*",
    "libc.so*",
    "libm.so*",
    "libdl.so*",
    "libpthread.so*",
    "librt.so*",
    "libresolv.so*",
    "libutil.so*",
    "libnsl.so*",
    "libanl.so*",
    "libmvec.so*",
    "libBrokenLocale.so*",
];

const LINUX_HOST_DEFAULTS: &[&str] = &[
    "libGL.so*",
    "libEGL.so*",
    "libGLX*.so*",
    "libGLdispatch.so*",
    "libOpenGL.so*",
    "libvulkan.so*",
    "libdrm.so*",
    "libgbm.so*",
];

const DARWIN_SYSTEM_DEFAULTS: &[&str] = &[
    "libSystem*.dylib",
    "libc++*.dylib",
    "libobjc*.dylib",
    "libresolv*.dylib",
    "libiconv*.dylib",
    "libcharset*.dylib",
    "libz*.dylib",
    "libbsm*.dylib",
    "libsandbox*.dylib",
    "AppKit",
    "ApplicationServices",
    "Carbon",
    "Cocoa",
    "CoreFoundation",
    "CoreGraphics",
    "CoreServices",
    "CoreText",
    "CoreVideo",
    "DiskArbitration",
    "Foundation",
    "IOKit",
    "IOSurface",
    "Metal",
    "QuartzCore",
    "Security",
    "SystemConfiguration",
    "UniformTypeIdentifiers",
];

const DARWIN_HOST_DEFAULTS: &[&str] = &[];

/// A compiled list of `*`-globs matched against whole names.
#[derive(Debug, Clone)]
pub struct PatternSet(RegexSet);

impl PatternSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        RegexSet::new(patterns.iter().map(|p| glob_to_regex(p.as_ref()))).map(PatternSet)
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.0.is_match(name)
    }
}

/// Ordered system / host pattern lists, compiled.
#[derive(Debug, Clone)]
pub struct ExclusionPolicy {
    system: PatternSet,
    host: PatternSet,
}

impl ExclusionPolicy {
    /// Compile caller patterns, unioned with the platform defaults when
    /// `use_defaults` is set.
    pub fn new(
        platform: Platform,
        system_patterns: &[String],
        host_patterns: &[String],
        use_defaults: bool,
    ) -> Result<Self, regex::Error> {
        let (sys_defaults, host_defaults) = match platform {
            Platform::Linux => (LINUX_SYSTEM_DEFAULTS, LINUX_HOST_DEFAULTS),
            Platform::Darwin => (DARWIN_SYSTEM_DEFAULTS, DARWIN_HOST_DEFAULTS),
        };

        let mut system: Vec<String> = system_patterns.to_vec();
        let mut host: Vec<String> = host_patterns.to_vec();
        if use_defaults {
            system.extend(sys_defaults.iter().map(|p| p.to_string()));
            host.extend(host_defaults.iter().map(|p| p.to_string()));
        }

        Ok(Self {
            system: PatternSet::new(system.as_slice())?,
            host: PatternSet::new(host.as_slice())?,
        })
    }

    /// Classify a bare library name. System patterns are checked first and a
    /// hit there is final.
    pub fn classify(&self, name: &str) -> Classification {
        if self.system.is_match(name) {
            Classification::System
        } else if self.host.is_match(name) {
            Classification::Host
        } else {
            Classification::Bundle
        }
    }
}

/// Translate a `*`-only glob into an anchored regex.
fn glob_to_regex(pattern: &str) -> String {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    format!("^{body}$")
}
