//! Manifest loader integration tests: import resolution, root inheritance,
//! and cycle detection.

mod common;

use std::path::Path;

use tempfile::TempDir;

use jiri_core::GitOps;

use common::{FakeGit, RemoteSpec};
use jiri_core::{Config, Project, ProjectKey, Projects};
use jiri_sync::{load_manifest_file, SyncError};

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn load(
    config: &Config,
    git: &FakeGit,
    locals: Projects,
    update: bool,
) -> Result<jiri_sync::LoadedWorld, SyncError> {
    load_manifest_file(config, git, &config.manifest_file, locals, update, false)
}

#[test]
fn flat_manifest_resolves_projects_and_hooks() {
    let root = TempDir::new().unwrap();
    let config = Config::new(root.path());
    write_file(
        &config.manifest_file,
        r#"<manifest>
  <projects>
    <project name="alpha" path="alpha" remote="https://r/alpha"/>
    <project name="beta" path="sub/beta" remote="https://r/beta"/>
  </projects>
  <hooks>
    <hook name="gen" action="scripts/gen.sh" project="alpha"/>
  </hooks>
</manifest>
"#,
    );

    let world = load(&config, &FakeGit::new(), Projects::new(), false).unwrap();
    assert_eq!(world.projects.len(), 2);
    let keys: Vec<String> = world.projects.keys().map(|k| k.to_string()).collect();
    assert_eq!(keys, vec!["alpha=https://r/alpha", "beta=https://r/beta"]);

    let alpha = &world.projects[&ProjectKey::from("alpha=https://r/alpha")];
    assert_eq!(alpha.path, root.path().join("alpha"));
    assert_eq!(alpha.remote_branch, "master");
    assert_eq!(alpha.revision, "HEAD");

    assert_eq!(world.hooks.len(), 1);
    let hook = world.hooks.values().next().unwrap();
    assert_eq!(hook.action_path, root.path().join("alpha"));
}

#[test]
fn local_import_loads_nested_manifest() {
    let root = TempDir::new().unwrap();
    let config = Config::new(root.path());
    write_file(
        &config.manifest_file,
        r#"<manifest>
  <imports>
    <localimport file="manifests/extra"/>
  </imports>
  <projects>
    <project name="alpha" path="alpha" remote="https://r/alpha"/>
  </projects>
</manifest>
"#,
    );
    write_file(
        &root.path().join("manifests/extra"),
        r#"<manifest>
  <projects>
    <project name="extra" path="extra" remote="https://r/extra"/>
  </projects>
</manifest>
"#,
    );

    let world = load(&config, &FakeGit::new(), Projects::new(), false).unwrap();
    assert_eq!(world.projects.len(), 2);
    assert!(world
        .projects
        .contains_key(&ProjectKey::from("extra=https://r/extra")));
}

#[test]
fn local_import_cycle_is_detected_with_both_frames() {
    let root = TempDir::new().unwrap();
    let config = Config::new(root.path());
    let a = config.manifest_file.clone();
    let b = root.path().join("b");
    write_file(
        &a,
        r#"<manifest><imports><localimport file="b"/></imports></manifest>"#,
    );
    write_file(
        &b,
        r#"<manifest><imports><localimport file=".jiri_manifest"/></imports></manifest>"#,
    );

    let err = load(&config, &FakeGit::new(), Projects::new(), false).unwrap_err();
    match err {
        SyncError::FileCycle(stack) => {
            assert!(stack.contains(&a.display().to_string()), "{stack}");
            assert!(stack.contains(&b.display().to_string()), "{stack}");
        }
        other => panic!("expected a file cycle, got {other}"),
    }
}

#[test]
fn duplicate_project_with_differing_content_fails() {
    let root = TempDir::new().unwrap();
    let config = Config::new(root.path());
    write_file(
        &config.manifest_file,
        r#"<manifest>
  <imports>
    <localimport file="other"/>
  </imports>
  <projects>
    <project name="alpha" path="alpha" remote="https://r/alpha"/>
  </projects>
</manifest>
"#,
    );
    write_file(
        &root.path().join("other"),
        r#"<manifest>
  <projects>
    <project name="alpha" path="elsewhere" remote="https://r/alpha"/>
  </projects>
</manifest>
"#,
    );

    let err = load(&config, &FakeGit::new(), Projects::new(), false).unwrap_err();
    assert!(matches!(err, SyncError::DuplicateProject { .. }), "{err}");
}

#[test]
fn identical_duplicate_is_tolerated() {
    let root = TempDir::new().unwrap();
    let config = Config::new(root.path());
    let entry = r#"<manifest>
  <projects>
    <project name="alpha" path="alpha" remote="https://r/alpha"/>
  </projects>
</manifest>
"#;
    write_file(
        &config.manifest_file,
        r#"<manifest>
  <imports>
    <localimport file="same"/>
  </imports>
  <projects>
    <project name="alpha" path="alpha" remote="https://r/alpha"/>
  </projects>
</manifest>
"#,
    );
    write_file(&root.path().join("same"), entry);

    let world = load(&config, &FakeGit::new(), Projects::new(), false).unwrap();
    assert_eq!(world.projects.len(), 1);
}

#[test]
fn hook_naming_an_absent_project_fails() {
    let root = TempDir::new().unwrap();
    let config = Config::new(root.path());
    write_file(
        &config.manifest_file,
        r#"<manifest>
  <hooks>
    <hook name="gen" action="gen.sh" project="ghost"/>
  </hooks>
</manifest>
"#,
    );

    let err = load(&config, &FakeGit::new(), Projects::new(), false).unwrap_err();
    match err {
        SyncError::UnknownHookProject { hook, project } => {
            assert_eq!(hook, "gen");
            assert_eq!(project, "ghost");
        }
        other => panic!("expected unknown hook project, got {other}"),
    }
}

#[test]
fn remote_import_outside_update_mode_requires_a_local() {
    let root = TempDir::new().unwrap();
    let config = Config::new(root.path());
    write_file(
        &config.manifest_file,
        r#"<manifest>
  <imports>
    <import manifest="default" name="manifest" remote="https://r/manifest"/>
  </imports>
</manifest>
"#,
    );

    let err = load(&config, &FakeGit::new(), Projects::new(), false).unwrap_err();
    assert!(matches!(err, SyncError::UnresolvedImport { .. }), "{err}");
}

#[test]
fn remote_import_clones_and_roots_imported_projects() {
    let root = TempDir::new().unwrap();
    let config = Config::new(root.path());
    let git = FakeGit::new();
    git.add_remote(
        "https://r/manifest",
        RemoteSpec::at("mmm111").with_file(
            "default",
            r#"<manifest>
  <projects>
    <project name="p" path="p" remote="https://r/p"/>
  </projects>
</manifest>
"#,
        ),
    );
    write_file(
        &config.manifest_file,
        r#"<manifest>
  <imports>
    <import manifest="default" name="manifest" remote="https://r/manifest" root="r"/>
  </imports>
</manifest>
"#,
    );

    let world = load(&config, &git, Projects::new(), true).unwrap();

    // The imported project is rooted: name and path gain the "r" prefix.
    let key = ProjectKey::from("r/p=https://r/p");
    let p = world.projects.get(&key).expect("rooted project");
    assert_eq!(p.name, "r/p");
    assert_eq!(p.path, root.path().join("r").join("p"));

    // The manifest-hosting project was cloned into the temp workspace and
    // inserted into the known locals under its rooted key.
    assert!(world.tmp_dir.is_some());
    let synthetic = world
        .local_projects
        .get(&ProjectKey::from("r/manifest=https://r/manifest"))
        .expect("synthetic manifest project");
    assert!(synthetic.path.starts_with(world.tmp_dir.as_ref().unwrap().path()));
    assert!(synthetic.path.join(".git").is_dir());
}

#[test]
fn remote_import_cycle_is_detected() {
    let root = TempDir::new().unwrap();
    let config = Config::new(root.path());
    let git = FakeGit::new();
    git.add_remote(
        "https://r/a",
        RemoteSpec::at("aaa111").with_file(
            "m",
            r#"<manifest>
  <imports>
    <import manifest="m" name="b" remote="https://r/b"/>
  </imports>
</manifest>
"#,
        ),
    );
    git.add_remote(
        "https://r/b",
        RemoteSpec::at("bbb222").with_file(
            "m",
            r#"<manifest>
  <imports>
    <import manifest="m" name="a-again" remote="https://r/a"/>
  </imports>
</manifest>
"#,
        ),
    );
    write_file(
        &config.manifest_file,
        r#"<manifest>
  <imports>
    <import manifest="m" name="a" remote="https://r/a"/>
  </imports>
</manifest>
"#,
    );

    let err = load(&config, &git, Projects::new(), true).unwrap_err();
    match err {
        SyncError::RemoteCycle(stack) => {
            assert!(stack.contains("https://r/a + m"), "{stack}");
            assert!(stack.contains("https://r/b + m"), "{stack}");
        }
        other => panic!("expected a remote cycle, got {other}"),
    }
}

#[test]
fn manifest_project_branch_is_restored_after_load() {
    let root = TempDir::new().unwrap();
    let config = Config::new(root.path());
    let git = FakeGit::new();
    git.add_remote(
        "https://r/manifest",
        RemoteSpec::at("mmm111").with_file(
            "default",
            r#"<manifest>
  <projects>
    <project name="p" path="p" remote="https://r/p"/>
  </projects>
</manifest>
"#,
        ),
    );

    // A manifest project already checked out locally, sitting on master.
    let manifest_dir = root.path().join("manifest");
    git.clone_repo("https://r/manifest", &manifest_dir, None)
        .unwrap();
    let mut local = Project {
        name: "manifest".to_owned(),
        path: manifest_dir.clone(),
        remote: "https://r/manifest".to_owned(),
        ..Project::default()
    };
    local.fill_defaults().unwrap();
    let locals: Projects = [(local.key(), local)].into_iter().collect();

    write_file(
        &config.manifest_file,
        r#"<manifest>
  <imports>
    <import manifest="default" name="manifest" remote="https://r/manifest"/>
  </imports>
</manifest>
"#,
    );

    let world = load(&config, &git, locals, true).unwrap();
    assert!(world.projects.contains_key(&ProjectKey::from("p=https://r/p")));
    // The loader detached to read the manifest, then restored the branch.
    assert_eq!(
        git.state_value(&manifest_dir, "branch").as_deref(),
        Some("master")
    );
}

