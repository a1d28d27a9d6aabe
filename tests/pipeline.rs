//! End-to-end bundling scenarios driven through the scripted link editor.

mod common;

use common::{FakeBinary, FakeLinkEditor};
use leviso_bundle::{
    bundle, check_tree, BundleConfig, BundleError, Platform, Violation, VerifyOptions, QT_CONF,
};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Workspace {
    _temp: TempDir,
    root: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        Self { _temp: temp, root }
    }

    fn source(&self) -> PathBuf {
        self.root.join("src")
    }

    fn output(&self) -> PathBuf {
        self.root.join("out")
    }

    fn store(&self, name: &str) -> PathBuf {
        self.root.join("store").join(name)
    }

    fn store_prefix(&self) -> String {
        format!("{}/", self.root.join("store").display())
    }

    fn config(&self, platform: Platform, roots: &[&str]) -> BundleConfig {
        BundleConfig::new(self.source(), self.output())
            .with_candidate_roots(roots.iter().map(|r| self.store(r)).collect())
            .with_platform(platform)
            .with_store_prefix(self.store_prefix())
    }

    fn verify_options(&self) -> VerifyOptions {
        VerifyOptions {
            store_prefix: self.store_prefix(),
            tolerate_store_references: false,
        }
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `app -> libx.so -> liby.so`, each found through an absolute run-path.
fn elf_chain(ws: &Workspace) {
    let x_lib = ws.store("x/lib");
    let y_lib = ws.store("y/lib");
    FakeBinary::elf()
        .needs("libx.so")
        .needs("libc.so.6")
        .rpath(path_str(&x_lib))
        .interp(path_str(&ws.store("glibc/lib/ld-linux-x86-64.so.2")))
        .write(&ws.source().join("bin/app"));
    FakeBinary::elf()
        .needs("liby.so")
        .rpath(path_str(&y_lib))
        .write(&x_lib.join("libx.so"));
    FakeBinary::elf().write(&y_lib.join("liby.so"));
}

#[test]
fn test_elf_closure_is_bundled_and_portable() {
    let ws = Workspace::new();
    elf_chain(&ws);
    let config = ws.config(Platform::Linux, &["x", "y"]);

    let report = bundle(&config, &FakeLinkEditor::default()).unwrap();

    let out = ws.output();
    assert_eq!(report.staged, 1);
    assert!(out.join("lib/libx.so").is_file());
    assert!(out.join("lib/liby.so").is_file());
    assert_eq!(report.libraries_bundled, 2);
    assert!(report.rewrite.failures.is_empty(), "{:?}", report.rewrite.failures);

    let app = FakeBinary::read(&out.join("bin/app"));
    assert_eq!(app.info.dependencies, vec!["libx.so", "libc.so.6"]);
    assert_eq!(app.info.run_paths, vec!["$ORIGIN/../lib"]);
    assert_eq!(app.info.interpreter.as_deref(), Some("/lib64/ld-linux-x86-64.so.2"));

    let libx = FakeBinary::read(&out.join("lib/libx.so"));
    assert_eq!(libx.info.run_paths, vec!["$ORIGIN"]);

    // libc and the loader are system-provided; recorded but not fatal
    assert!(report
        .trace
        .unresolved
        .iter()
        .any(|e| e.reference == "libc.so.6"));
    assert!(report.is_success(), "{:?}", report.verification.violations);
    assert_eq!(report.verification.binaries_checked, 3);
}

#[test]
fn test_shared_dependency_copied_once() {
    let ws = Workspace::new();
    let x_lib = ws.store("x/lib");
    for app in ["one", "two"] {
        FakeBinary::elf()
            .needs("libx.so")
            .rpath(path_str(&x_lib))
            .write(&ws.source().join("bin").join(app));
    }
    FakeBinary::elf().write(&x_lib.join("libx.so"));

    let report = bundle(&ws.config(Platform::Linux, &["x"]), &FakeLinkEditor::default()).unwrap();

    assert_eq!(report.staged, 2);
    assert_eq!(report.trace.copied, vec![ws.output().join("lib/libx.so")]);
    assert_eq!(report.libraries_bundled, 1);
    assert!(report.is_success());
}

#[test]
fn test_dependency_found_by_root_search() {
    let ws = Workspace::new();
    // No run-path at all; the candidate roots' lib dirs are searched
    FakeBinary::elf()
        .needs("libz.so.1")
        .write(&ws.source().join("bin/app"));
    FakeBinary::elf().write(&ws.store("zlib/lib/libz.so.1"));

    let report = bundle(&ws.config(Platform::Linux, &["zlib"]), &FakeLinkEditor::default()).unwrap();

    assert!(ws.output().join("lib/libz.so.1").is_file());
    assert!(report.trace.unresolved.is_empty());
    assert!(report.is_success());
}

#[test]
fn test_host_framework_is_mapped_not_copied() {
    let ws = Workspace::new();
    let qt_lib = ws.store("qt/lib");
    let qtcore = qt_lib.join("QtCore.framework/Versions/A/QtCore");
    FakeBinary::macho().id(path_str(&qtcore)).write(&qtcore);
    FakeBinary::macho()
        .needs(path_str(&qtcore))
        .needs("/usr/lib/libSystem.B.dylib")
        .rpath(path_str(&qt_lib))
        .write(&ws.source().join("bin/app"));

    let config = ws
        .config(Platform::Darwin, &["qt"])
        .with_patterns(Vec::new(), vec!["QtCore".to_string()]);
    let report = bundle(&config, &FakeLinkEditor::default()).unwrap();

    let out = ws.output();
    assert_eq!(report.libraries_bundled, 0);
    assert_eq!(report.frameworks_rebuilt, 0);
    assert!(!out.join("lib/QtCore").exists());
    assert!(!out.join("lib/QtCore.framework").exists());

    let app = FakeBinary::read(&out.join("bin/app"));
    assert_eq!(
        app.info.dependencies,
        vec!["@rpath/QtCore.framework/Versions/A/QtCore", "/usr/lib/libSystem.B.dylib"]
    );
    assert_eq!(app.info.run_paths, vec!["@loader_path/../lib"]);
    assert!(report.is_success(), "{:?}", report.verification.violations);
}

#[test]
fn test_bundled_framework_is_reconstructed() {
    let ws = Workspace::new();
    let foo = ws.store("foo/lib/Foo.framework/Versions/A/Foo");
    FakeBinary::macho().id(path_str(&foo)).write(&foo);
    FakeBinary::macho()
        .needs(path_str(&foo))
        .write(&ws.source().join("bin/app"));

    let report = bundle(&ws.config(Platform::Darwin, &["foo"]), &FakeLinkEditor::default()).unwrap();

    let lib = ws.output().join("lib");
    assert_eq!(report.frameworks_rebuilt, 1);
    assert!(!lib.join("Foo").exists());
    let binary = lib.join("Foo.framework/Versions/A/Foo");
    assert!(binary.is_file());
    assert_eq!(
        fs::read_link(lib.join("Foo.framework/Versions/Current")).unwrap(),
        PathBuf::from("A")
    );
    assert!(lib.join("Foo.framework/Foo").is_symlink());

    let framework = FakeBinary::read(&binary);
    assert_eq!(
        framework.info.identity.as_deref(),
        Some("@rpath/Foo.framework/Versions/A/Foo")
    );
    let app = FakeBinary::read(&ws.output().join("bin/app"));
    assert_eq!(app.info.dependencies, vec!["@rpath/Foo.framework/Versions/A/Foo"]);
    assert!(report.is_success(), "{:?}", report.verification.violations);
}

#[test]
fn test_embedded_store_reference_fails_by_default() {
    let ws = Workspace::new();
    elf_chain(&ws);
    let x_lib = ws.store("x/lib");
    FakeBinary::elf()
        .needs("liby.so")
        .rpath(path_str(&ws.store("y/lib")))
        .data(path_str(&ws.store("x/share/resources")))
        .write(&x_lib.join("libx.so"));

    let report = bundle(&ws.config(Platform::Linux, &["x", "y"]), &FakeLinkEditor::default()).unwrap();

    assert!(!report.is_success());
    assert_eq!(report.verification.violations.len(), 1);
    let violation = &report.verification.violations[0];
    assert_eq!(violation.path(), Path::new("lib/libx.so"));
    let Violation::EmbeddedStorePath { count, matches, .. } = violation else {
        panic!("unexpected violation: {violation:?}");
    };
    assert_eq!(*count, 1);
    assert_eq!(matches, &vec![path_str(&ws.store("x/share/resources"))]);

    match report.into_result() {
        Err(BundleError::VerificationFailed { count }) => assert_eq!(count, 1),
        other => panic!("expected verification failure, got {other:?}"),
    }
}

#[test]
fn test_embedded_store_reference_tolerated() {
    let ws = Workspace::new();
    elf_chain(&ws);
    FakeBinary::elf()
        .needs("liby.so")
        .rpath(path_str(&ws.store("y/lib")))
        .data(path_str(&ws.store("x/share/resources")))
        .write(&ws.store("x/lib/libx.so"));

    let config = ws
        .config(Platform::Linux, &["x", "y"])
        .with_tolerate_store_references(true);
    let report = bundle(&config, &FakeLinkEditor::default()).unwrap();

    assert!(report.is_success());
    assert_eq!(report.verification.warnings.len(), 1);
    assert!(report.into_result().is_ok());
}

#[test]
fn test_failed_edit_is_a_warning_then_a_violation() {
    let ws = Workspace::new();
    let libfoo = ws.store("foo/lib/libfoo.1.dylib");
    FakeBinary::macho().id(path_str(&libfoo)).write(&libfoo);
    FakeBinary::macho()
        .needs(path_str(&libfoo))
        .write(&ws.source().join("bin/app"));

    let editor = FakeLinkEditor {
        fail_identity_edits: true,
    };
    let report = bundle(&ws.config(Platform::Darwin, &["foo"]), &editor).unwrap();

    // The run goes on; the dependency edit in the app still lands
    assert_eq!(report.rewrite.failures.len(), 1);
    let app = FakeBinary::read(&ws.output().join("bin/app"));
    assert_eq!(app.info.dependencies, vec!["@loader_path/../lib/libfoo.1.dylib"]);

    assert!(!report.is_success());
    assert!(report
        .verification
        .violations
        .iter()
        .any(|v| matches!(v, Violation::Identity { .. })));
}

#[test]
fn test_qt_plugins_are_discovered_and_traced() {
    let ws = Workspace::new();
    let qt = ws.store("qtbase");
    FakeBinary::elf()
        .needs("libQt6Core.so.6")
        .write(&ws.source().join("bin/app"));
    FakeBinary::elf().write(&qt.join("lib/libQt6Core.so.6"));
    FakeBinary::elf().write(&qt.join("lib/libQt6XcbQpa.so.6"));
    let plugins = qt.join("lib/qt-6/plugins");
    FakeBinary::elf()
        .needs("libQt6XcbQpa.so.6")
        .needs("libQt6Core.so.6")
        .write(&plugins.join("platforms/libqxcb.so"));
    fs::write(plugins.join("platforms/libqxcb.so.debug"), "symbols").unwrap();

    let report = bundle(&ws.config(Platform::Linux, &["qtbase"]), &FakeLinkEditor::default()).unwrap();

    let out = ws.output();
    assert!(report.discovery.config_written);
    assert_eq!(report.discovery.plugin_dirs, vec![plugins]);
    assert!(!out.join("plugins/platforms/libqxcb.so.debug").exists());

    // Pulled in only by the plugin
    assert!(out.join("lib/libQt6XcbQpa.so.6").is_file());
    let plugin = FakeBinary::read(&out.join("plugins/platforms/libqxcb.so"));
    assert_eq!(plugin.info.run_paths, vec!["$ORIGIN/../../lib"]);

    let conf = fs::read_to_string(out.join("bin").join(QT_CONF)).unwrap();
    assert!(conf.starts_with("[Paths]\n"));
    assert!(conf.contains("Plugins = ../plugins"));
    assert!(report.is_success(), "{:?}", report.verification.violations);
}

#[test]
fn test_extra_dirs_are_staged_verbatim() {
    let ws = Workspace::new();
    FakeBinary::elf().write(&ws.source().join("bin/app"));
    let share = ws.source().join("share/app");
    fs::create_dir_all(&share).unwrap();
    fs::write(share.join("config.ini"), "key = value\n").unwrap();

    let config = ws
        .config(Platform::Linux, &[])
        .with_extra_dirs(vec!["share".to_string()]);
    let report = bundle(&config, &FakeLinkEditor::default()).unwrap();

    assert_eq!(
        fs::read_to_string(ws.output().join("share/app/config.ini")).unwrap(),
        "key = value\n"
    );
    assert!(report.is_success());
}

#[test]
fn test_bundle_reverifies_after_relocation() {
    let ws = Workspace::new();
    elf_chain(&ws);
    let editor = FakeLinkEditor::default();
    bundle(&ws.config(Platform::Linux, &["x", "y"]), &editor)
        .unwrap()
        .into_result()
        .unwrap();

    let moved = ws.root.join("relocated/bundle");
    fs::create_dir_all(moved.parent().unwrap()).unwrap();
    fs::rename(ws.output(), &moved).unwrap();

    let report = check_tree(&moved, &editor, &ws.verify_options()).unwrap();
    assert_eq!(report.binaries_checked, 3);
    assert!(report.is_success(), "{:?}", report.violations);
}

#[test]
fn test_rerun_into_existing_output_is_stable() {
    let ws = Workspace::new();
    elf_chain(&ws);
    let editor = FakeLinkEditor::default();
    let config = ws.config(Platform::Linux, &["x", "y"]);

    let first = bundle(&config, &editor).unwrap();
    let second = bundle(&config, &editor).unwrap();

    assert!(first.is_success());
    assert!(second.is_success());
    assert!(second.trace.copied.is_empty(), "nothing new to copy");
    assert_eq!(second.rewrite.edits_applied, 0);
}

#[test]
fn test_store_symlinked_executable_is_copied_in_and_traced() {
    let ws = Workspace::new();
    let real = ws.store("app-real/bin/app");
    FakeBinary::elf()
        .needs("libx.so")
        .rpath(path_str(&ws.store("x/lib")))
        .write(&real);
    FakeBinary::elf().write(&ws.store("x/lib/libx.so"));
    let bin = ws.source().join("bin");
    fs::create_dir_all(&bin).unwrap();
    symlink(&real, bin.join("app")).unwrap();
    symlink("app", bin.join("app-alias")).unwrap();

    let editor = FakeLinkEditor::default();
    let report = bundle(&ws.config(Platform::Linux, &["app-real", "x"]), &editor).unwrap();

    let out = ws.output();
    let app = out.join("bin/app");
    assert!(!app.is_symlink(), "store link must be replaced by its target");
    assert!(app.is_file());
    assert_eq!(fs::read_link(out.join("bin/app-alias")).unwrap(), PathBuf::from("app"));
    assert_eq!(report.staged, 1);
    assert!(out.join("lib/libx.so").is_file());
    assert_eq!(FakeBinary::read(&app).info.run_paths, vec!["$ORIGIN/../lib"]);
    assert!(report.is_success(), "{:?}", report.verification.violations);

    // A link back into the store is caught on its own
    symlink(ws.store("x/lib/libx.so"), out.join("lib/libx-stray.so")).unwrap();
    let recheck = check_tree(&out, &editor, &ws.verify_options()).unwrap();
    assert!(!recheck.is_success());
    assert_eq!(recheck.violations.len(), 1);
    assert!(matches!(
        &recheck.violations[0],
        Violation::Symlink { path, .. } if path == Path::new("lib/libx-stray.so")
    ));
}

#[test]
fn test_rpath_reference_resolved_through_own_run_path() {
    let ws = Workspace::new();
    let png_lib = ws.store("png/lib");
    FakeBinary::macho()
        .id("@rpath/libpng16.16.dylib")
        .write(&png_lib.join("libpng16.16.dylib"));
    FakeBinary::macho()
        .needs("@rpath/libpng16.16.dylib")
        .rpath(path_str(&png_lib))
        .write(&ws.source().join("bin/app"));

    let report = bundle(&ws.config(Platform::Darwin, &["png"]), &FakeLinkEditor::default()).unwrap();

    let out = ws.output();
    assert!(out.join("lib/libpng16.16.dylib").is_file());
    assert_eq!(report.libraries_bundled, 1);
    assert!(report.trace.unresolved.is_empty(), "{:?}", report.trace.unresolved);

    let app = FakeBinary::read(&out.join("bin/app"));
    assert_eq!(app.info.dependencies, vec!["@loader_path/../lib/libpng16.16.dylib"]);
    assert_eq!(app.info.run_paths, vec!["@loader_path/../lib"]);
    let png = FakeBinary::read(&out.join("lib/libpng16.16.dylib"));
    assert_eq!(png.info.identity.as_deref(), Some("@rpath/libpng16.16.dylib"));
    assert!(report.is_success(), "{:?}", report.verification.violations);
}

#[test]
fn test_bundled_interpreter_uses_canonical_output_root() {
    let ws = Workspace::new();
    let loader = ws.store("musl/lib/ld-musl-x86_64.so.1");
    FakeBinary::elf().write(&loader);
    FakeBinary::elf()
        .interp(path_str(&loader))
        .write(&ws.source().join("bin/app"));
    fs::create_dir_all(ws.root.join("work")).unwrap();

    let mut config = ws.config(Platform::Linux, &["musl"]);
    config.output_root = ws.root.join("work/../out");
    let report = bundle(&config, &FakeLinkEditor::default()).unwrap();

    let out = ws.output();
    assert!(out.join("lib/ld-musl-x86_64.so.1").is_file());
    let app = FakeBinary::read(&out.join("bin/app"));
    assert_eq!(
        app.info.interpreter,
        Some(path_str(&out.join("lib/ld-musl-x86_64.so.1")))
    );
    assert!(report.is_success(), "{:?}", report.verification.violations);
}
